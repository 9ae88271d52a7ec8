//! Compose application model

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A compose application: one compose file describing a set of services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeApp {
    /// App name, also the name of its working directory
    #[serde(default)]
    pub name: String,
    /// Services keyed by name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Store metadata for the whole app
    #[serde(
        rename = "x-appstack",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub store: Option<StoreExtension>,
    /// Every other top-level key (networks, volumes, other `x-*` extensions)
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
    /// File this app was loaded from, if any
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl ComposeApp {
    /// Get a service by name
    pub fn app(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    /// Directory holding the persisted compose file
    pub fn working_dir(&self) -> Option<&Path> {
        self.config_file.as_deref().and_then(Path::parent)
    }

    /// Store app id from the store extension
    pub fn store_app_id(&self) -> Option<&str> {
        self.store.as_ref().and_then(|s| s.store_app_id.as_deref())
    }
}

/// Store metadata attached to the app under `x-appstack`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreExtension {
    /// Identifier of the app in the store; stamped with the app name at first install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_app_id: Option<String>,
    /// Service that is authoritative for display metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<LocalizedText>,
    /// Display description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LocalizedText>,
    /// Icon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Vendor fields not modelled above
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Store metadata attached to a single service under `x-appstack`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppStoreExtension {
    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<LocalizedText>,
    /// Display description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LocalizedText>,
    /// Icon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Vendor fields not modelled above
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Text that is either plain or keyed by locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    /// Plain text
    Plain(String),
    /// Map of locale (e.g. `en_US`) to text
    Localized(BTreeMap<String, String>),
}

impl LocalizedText {
    /// Fallback locale for display
    pub const DEFAULT_LOCALE: &'static str = "en_US";

    /// Text for the default locale, or the first available one
    pub fn text(&self) -> Option<&str> {
        match self {
            LocalizedText::Plain(s) => Some(s),
            LocalizedText::Localized(map) => map
                .get(Self::DEFAULT_LOCALE)
                .or_else(|| map.values().next())
                .map(String::as_str),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandConfig>,
    /// Entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandConfig>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
    /// Port mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortConfig>>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeMount>>,
    /// Service dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOnConfig>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Display metadata for this service
    #[serde(
        rename = "x-appstack",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub store: Option<AppStoreExtension>,
    /// Every other service key, passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ServiceConfig {
    /// Names of the services this one depends on
    pub fn dependencies(&self) -> Vec<String> {
        match &self.depends_on {
            Some(DependsOnConfig::Array(arr)) => arr.clone(),
            Some(DependsOnConfig::Map(map)) => map.keys().cloned().collect(),
            None => Vec::new(),
        }
    }
}

/// Command configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

/// Environment configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to scalar value
    Map(BTreeMap<String, Option<Value>>),
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Short syntax: "8080:80"
    Short(String),
    /// Bare container port
    Number(u32),
    /// Long syntax
    Long(PortConfigLong),
}

/// Long port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port in container
    pub target: Value,
    /// Published port on host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<Value>,
    /// Host IP to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Protocol (tcp/udp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Remaining keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Volume mount configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeMount {
    /// Short syntax: "host:container:mode"
    Short(String),
    /// Long syntax
    Long(VolumeMountLong),
}

/// Long volume mount configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMountLong {
    /// Mount type (volume, bind, tmpfs)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    /// Source path or volume name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Target path in container
    pub target: String,
    /// Remaining keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Depends on configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names
    Array(Vec<String>),
    /// Map of service to condition
    Map(BTreeMap<String, Value>),
}

/// Display metadata of a single service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStoreInfo {
    /// Display title
    pub title: Option<String>,
    /// Display description
    pub description: Option<String>,
    /// Icon URL
    pub icon: Option<String>,
    /// Image reference
    pub image: Option<String>,
}

/// Read-only projection of an app's services and its main service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Store app id, if stamped
    pub store_app_id: Option<String>,
    /// Metadata per service
    pub apps: BTreeMap<String, AppStoreInfo>,
    /// Resolved main service name; always a key of `apps`
    pub main_app: String,
}

impl StoreInfo {
    /// Metadata of the main service
    pub fn main_app_info(&self) -> Option<&AppStoreInfo> {
        self.apps.get(&self.main_app)
    }
}
