//! Loading compose apps from text and from persisted compose files

use super::config::{AppStoreInfo, ComposeApp, StoreExtension, StoreInfo};
use super::interpolate::Interpolator;
use crate::error::{AppError, Result};
use std::path::Path;

impl ComposeApp {
    /// Interpolate and parse freshly submitted compose text
    pub fn from_yaml(content: &str, interpolator: &Interpolator) -> Result<Self> {
        let interpolated = interpolator.interpolate(content)?;
        let app = Self::parse_str(&interpolated)?;
        app.validate()?;
        Ok(app)
    }

    /// Reload an app from a previously persisted compose file
    ///
    /// The app is named `name` regardless of what the file says, since the
    /// name is owned by the working directory the file lives in.
    pub async fn load_from_file(name: &str, path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Parse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut app = Self::parse_str(&content)?;
        app.name = name.to_string();
        app.config_file = Some(path.to_path_buf());
        app.validate()?;
        Ok(app)
    }

    /// Parse compose text without interpolation or validation
    pub fn parse_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| AppError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Canonical YAML form, as written to disk
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| AppError::Yaml(e.to_string()))
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<()> {
        validate_app_name(&self.name)?;

        if self.services.is_empty() {
            return Err(AppError::NoAppFound);
        }

        for (name, service) in &self.services {
            if service.image.as_deref().map_or(true, str::is_empty) {
                return Err(AppError::Parse(format!(
                    "Service '{}' must have 'image' specified",
                    name
                )));
            }

            for dep in service.dependencies() {
                if !self.services.contains_key(&dep) {
                    return Err(AppError::Parse(format!(
                        "Service '{}' depends on unknown service '{}'",
                        name, dep
                    )));
                }
            }
        }

        self.main_app().map(|_| ())
    }

    /// Name of the main service
    ///
    /// Falls back to the first service when none is declared.
    pub fn main_app(&self) -> Result<&str> {
        let declared = self
            .store
            .as_ref()
            .and_then(|s| s.main.as_deref())
            .filter(|main| !main.is_empty());

        match declared {
            Some(main) => self
                .services
                .get_key_value(main)
                .map(|(name, _)| name.as_str())
                .ok_or_else(|| AppError::MainAppNotFound(main.to_string())),
            None => self
                .services
                .keys()
                .next()
                .map(String::as_str)
                .ok_or(AppError::NoAppFound),
        }
    }

    /// Derive the store projection of this app
    pub fn store_info(&self) -> Result<StoreInfo> {
        if self.services.is_empty() {
            return Err(AppError::NoAppFound);
        }

        let main_app = self.main_app()?.to_string();
        let app_icon = self.store.as_ref().and_then(|s| s.icon.clone());

        let apps = self
            .services
            .iter()
            .map(|(name, service)| {
                let store = service.store.as_ref();
                let mut info = AppStoreInfo {
                    title: store
                        .and_then(|s| s.title.as_ref())
                        .and_then(|t| t.text())
                        .map(str::to_string),
                    description: store
                        .and_then(|s| s.description.as_ref())
                        .and_then(|t| t.text())
                        .map(str::to_string),
                    icon: store.and_then(|s| s.icon.clone()),
                    image: service.image.clone(),
                };

                if *name == main_app && info.icon.is_none() {
                    info.icon = app_icon.clone();
                }

                (name.clone(), info)
            })
            .collect();

        Ok(StoreInfo {
            store_app_id: self.store_app_id().map(str::to_string),
            apps,
            main_app,
        })
    }

    /// Set the store app id to the app name unless one is already present
    ///
    /// Returns true when the id was stamped.
    pub fn stamp_store_app_id(&mut self) -> bool {
        let name = self.name.clone();
        let store = self.store.get_or_insert_with(StoreExtension::default);

        let missing = store.store_app_id.as_deref().map_or(true, str::is_empty);
        if missing {
            store.store_app_id = Some(name);
        }
        missing
    }
}

/// Check that an app name is usable as a single directory name
pub fn validate_app_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Parse("Compose app must have a 'name'".to_string()));
    }

    if name == "." || name == ".." || name.contains('/') || name.contains('\\') || name.contains('\0')
    {
        return Err(AppError::Parse(format!("Invalid compose app name '{}'", name)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn interpolator() -> Interpolator {
        let mut vars = BTreeMap::new();
        vars.insert("PUID".to_string(), "1000".to_string());
        Interpolator::from_vars(vars).unwrap()
    }

    const DEMO: &str = r#"
name: demo
services:
  web:
    image: demo:latest
    environment:
      PUID: $PUID
    x-appstack:
      icon: https://example.com/web.png
      title:
        en_US: Demo Web
  db:
    image: postgres:16
x-appstack:
  main: web
"#;

    #[test]
    fn test_from_yaml_demo() {
        let app = ComposeApp::from_yaml(DEMO, &interpolator()).unwrap();
        assert_eq!(app.name, "demo");
        assert_eq!(app.services.len(), 2);

        let info = app.store_info().unwrap();
        assert_eq!(info.main_app, "web");
        let main = info.main_app_info().unwrap();
        assert_eq!(main.icon.as_deref(), Some("https://example.com/web.png"));
        assert_eq!(main.title.as_deref(), Some("Demo Web"));
        assert_eq!(main.image.as_deref(), Some("demo:latest"));
    }

    #[test]
    fn test_interpolation_applied_before_parse() {
        let app = ComposeApp::from_yaml(DEMO, &interpolator()).unwrap();
        let text = app.to_yaml().unwrap();
        assert!(text.contains("PUID: 1000"));
        assert!(!text.contains("$PUID"));
    }

    #[test]
    fn test_no_services() {
        let result = ComposeApp::from_yaml("name: broken\nservices: {}\n", &interpolator());
        assert!(matches!(result, Err(AppError::NoAppFound)));
    }

    #[test]
    fn test_unresolved_main() {
        let yaml = r#"
name: demo
services:
  web:
    image: demo:latest
x-appstack:
  main: api
"#;
        let result = ComposeApp::from_yaml(yaml, &interpolator());
        assert!(matches!(result, Err(AppError::MainAppNotFound(ref m)) if m == "api"));
    }

    #[test]
    fn test_main_defaults_to_first_service() {
        let yaml = r#"
name: pair
services:
  zeta:
    image: z
  alpha:
    image: a
x-appstack:
  icon: https://example.com/app.png
"#;
        let app = ComposeApp::from_yaml(yaml, &interpolator()).unwrap();
        let info = app.store_info().unwrap();
        assert_eq!(info.main_app, "alpha");
        assert_eq!(
            info.main_app_info().unwrap().icon.as_deref(),
            Some("https://example.com/app.png")
        );
    }

    #[test]
    fn test_missing_image_and_unknown_dependency() {
        let no_image = "name: x\nservices:\n  web:\n    restart: always\n";
        assert!(matches!(
            ComposeApp::from_yaml(no_image, &interpolator()),
            Err(AppError::Parse(_))
        ));

        let bad_dep = "name: x\nservices:\n  web:\n    image: a\n    depends_on: [db]\n";
        assert!(matches!(
            ComposeApp::from_yaml(bad_dep, &interpolator()),
            Err(AppError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", ".", "..", "a/b"] {
            assert!(validate_app_name(name).is_err(), "{:?} accepted", name);
        }
        assert!(validate_app_name("nextcloud").is_ok());
    }

    #[test]
    fn test_stamp_store_app_id_only_once() {
        let mut app = ComposeApp::from_yaml(DEMO, &interpolator()).unwrap();
        assert!(app.stamp_store_app_id());
        assert_eq!(app.store_app_id(), Some("demo"));

        app.name = "renamed".to_string();
        assert!(!app.stamp_store_app_id());
        assert_eq!(app.store_app_id(), Some("demo"));
    }

    #[test]
    fn test_stamp_creates_extension() {
        let mut app =
            ComposeApp::from_yaml("name: solo\nservices:\n  s:\n    image: i\n", &interpolator())
                .unwrap();
        assert!(app.store.is_none());
        assert!(app.stamp_store_app_id());
        assert_eq!(app.store_app_id(), Some("solo"));
    }

    #[tokio::test]
    async fn test_load_from_file_uses_given_name() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("docker-compose.yml");
        let app = ComposeApp::from_yaml(DEMO, &interpolator()).unwrap();
        std::fs::write(&path, app.to_yaml().unwrap()).unwrap();

        let loaded = ComposeApp::load_from_file("stack-id", &path).await.unwrap();
        assert_eq!(loaded.name, "stack-id");
        assert_eq!(loaded.services, app.services);
        assert_eq!(loaded.working_dir(), Some(temp.path()));
    }

    #[tokio::test]
    async fn test_load_from_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let result = ComposeApp::load_from_file("gone", &temp.path().join("nope.yml")).await;
        assert!(matches!(result, Err(AppError::Parse(_))));
    }
}
