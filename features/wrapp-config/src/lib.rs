//! Wrapp Config provides a registry of configs that can be injected into controllers.
//!
//! Wrapp Config is split into two major parts:
//! 1. ConfigProvider: Used to create the registry of all configs and publish it into a scope
//! 2. Config<T>: A resolver to retrieve a single config as a controller dependency
//!
//! # Examples
//!
//! ```rust
//! use wrapp_config::provider::ConfigProvider;
//!
//! #[derive(Clone)]
//! struct AppConfig {
//!     host: String,
//!     port: u16,
//! }
//!
//! let app_config = AppConfig {
//!     host: "localhost".to_string(),
//!     port: 8080_u16,
//! };
//!
//! let mut config_provider = ConfigProvider::default();
//! config_provider.add_config(app_config.clone()).unwrap();
//!
//! let retrieved_config = config_provider.get_config::<AppConfig>().unwrap().unwrap();
//! assert_eq!(app_config.host, retrieved_config.host);
//! assert_eq!(app_config.port, retrieved_config.port);
//! ```

pub mod config;
pub mod errors;
pub mod provider;
