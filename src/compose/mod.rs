//! Compose application model, interpolation and loading
//!
//! A compose application is a docker-compose compatible YAML document with
//! an `x-appstack` extension carrying store metadata for the app and for
//! each of its services.

pub mod config;
pub mod interpolate;
pub mod loader;

pub use config::{
    AppStoreExtension, AppStoreInfo, ComposeApp, ServiceConfig, StoreExtension, StoreInfo,
};
pub use interpolate::Interpolator;
pub use loader::validate_app_name;
