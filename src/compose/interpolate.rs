//! Variable interpolation for raw compose text
//!
//! Only a fixed set of host defaults is substituted here. Anything else is
//! left for the container engine, which interpolates from its own environment
//! when the stack is brought up.

use crate::config::InterpolationDefaults;
use crate::error::{AppError, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;

/// Matches `$$`, `${NAME}`, `${NAME:-default}`, `${NAME-default}` and `$NAME`
const VARIABLE_PATTERN: &str =
    r"\$(?:\$|\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?-)([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))";

/// Substitutes host defaults into compose text
#[derive(Debug, Clone)]
pub struct Interpolator {
    vars: BTreeMap<String, String>,
    pattern: Regex,
}

impl Interpolator {
    /// Create an interpolator from the configured defaults and the host timezone
    pub fn new(defaults: &InterpolationDefaults) -> Result<Self> {
        let mut vars = BTreeMap::new();
        vars.insert("DefaultUserName".to_string(), defaults.user_name.clone());
        vars.insert("DefaultPassword".to_string(), defaults.password.clone());
        vars.insert("PUID".to_string(), defaults.puid.clone());
        vars.insert("PGID".to_string(), defaults.pgid.clone());
        vars.insert("TZ".to_string(), host_timezone());

        Self::from_vars(vars)
    }

    /// Create an interpolator over an explicit variable map
    pub fn from_vars(vars: BTreeMap<String, String>) -> Result<Self> {
        let pattern = Regex::new(VARIABLE_PATTERN)
            .map_err(|e| AppError::InvalidConfig(format!("Bad interpolation pattern: {}", e)))?;

        Ok(Self { vars, pattern })
    }

    /// Variables this interpolator substitutes
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Substitute known variables and check the result is well-formed YAML
    pub fn interpolate(&self, content: &str) -> Result<String> {
        let result = self.substitute(content);

        serde_yaml::from_str::<serde_yaml::Value>(&result)
            .map_err(|e| AppError::Parse(format!("Failed to parse YAML: {}", e)))?;

        Ok(result)
    }

    fn substitute(&self, content: &str) -> String {
        self.pattern
            .replace_all(content, |caps: &Captures<'_>| {
                let whole = &caps[0];

                if let Some(name) = caps.get(4) {
                    return self
                        .vars
                        .get(name.as_str())
                        .cloned()
                        .unwrap_or_else(|| whole.to_string());
                }

                let Some(name) = caps.get(1) else {
                    // `$$` escape
                    return whole.to_string();
                };

                let Some(value) = self.vars.get(name.as_str()) else {
                    return whole.to_string();
                };

                match (caps.get(2).map(|m| m.as_str()), caps.get(3)) {
                    (Some(":-"), Some(default)) if value.is_empty() => {
                        default.as_str().to_string()
                    }
                    _ => value.clone(),
                }
            })
            .into_owned()
    }
}

/// IANA name of the host timezone, `UTC` when it cannot be determined
pub fn host_timezone() -> String {
    if let Ok(tz) = std::env::var("TZ") {
        let tz = tz.trim_start_matches(':').trim();
        if !tz.is_empty() {
            return tz.to_string();
        }
    }

    if let Ok(content) = std::fs::read_to_string("/etc/timezone") {
        let tz = content.trim();
        if !tz.is_empty() {
            return tz.to_string();
        }
    }

    if let Ok(target) = std::fs::read_link("/etc/localtime") {
        if let Some(tz) = zone_from_localtime(&target) {
            return tz;
        }
    }

    "UTC".to_string()
}

fn zone_from_localtime(target: &Path) -> Option<String> {
    let target = target.to_string_lossy();
    let (_, zone) = target.split_once("zoneinfo/")?;
    if zone.is_empty() {
        None
    } else {
        Some(zone.to_string())
    }
}
