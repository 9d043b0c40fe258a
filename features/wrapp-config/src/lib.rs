//! Wrapp Config lets bindings of a [wrapp_context::Context] carry configuration.
//!
//! The configuration of a binding key lives in a binding of its own, resolved
//! through the same context chain as everything else. A request context can
//! therefore override the configuration it inherits from the application.
//!
//! # Examples
//!
//! ```rust
//! use serde_json::json;
//! use wrapp_config::ContextConfigExt;
//! use wrapp_context::Context;
//!
//! let app = Context::new("app");
//! app.configure("servers.rest")
//!     .unwrap()
//!     .to(json!({ "host": "localhost", "port": 3000 }));
//!
//! let request = Context::with_parent(&app, "request");
//! request.configure("servers.rest").unwrap().to(json!({ "port": 8080 }));
//!
//! let port = request
//!     .get_config_sync("servers.rest", Some("port"))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(*port.downcast::<serde_json::Value>().unwrap(), json!(8080));
//! ```
//!
//! Wrapp Config consists of the following components:
//!
//! 1. Context - the [ContextConfigExt] extension to configure keys and read their configuration
//! 2. Resolver - pluggable lookup of configuration values
//! 3. Config - typed access to configuration through `serde`
//! 4. Inject - injections of configuration, getters and views into classes
//! 5. Errors - for config errors

pub mod config;
pub mod context;
pub mod errors;
pub mod inject;
pub mod resolver;

pub use config::Config;
pub use context::{ContextConfigExt, SharedConfigurationResolver};
pub use errors::ConfigError;
pub use inject::{
    config_getter, config_getter_from, config_injection, config_injection_from, config_view,
    config_view_from, ConfigurationView,
};
pub use resolver::{ConfigurationResolver, DefaultConfigurationResolver};
