use std::{any::type_name, fmt, ops::Deref, rc::Rc, sync::Arc};

use serde::de::DeserializeOwned;
use wrapp_context::Instance;

use crate::errors::ConfigError;

/// A typed view of a configuration value
///
/// Configuration bound as the type itself is shared as is. JSON configuration is
/// deserialized into `T`.
///
/// # Example
/// ```rust
/// use serde::Deserialize;
/// use wrapp_config::ContextConfigExt;
/// use wrapp_context::Context;
///
/// #[derive(Deserialize)]
/// struct RestConfig {
///     port: u16,
/// }
///
/// let ctx = Context::new("app");
/// ctx.configure("servers.rest")
///     .unwrap()
///     .to(serde_json::json!({ "port": 3000 }));
///
/// let config = ctx
///     .get_config_sync_as::<RestConfig>("servers.rest", None)
///     .unwrap()
///     .unwrap();
/// assert_eq!(config.port, 3000);
/// ```
pub struct Config<T> {
    inner: Rc<T>,
}

impl<T> Deref for Config<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Config {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Config").field(&self.inner).finish()
    }
}

impl<T> Config<T> {
    pub fn new(value: T) -> Self {
        Config {
            inner: Rc::new(value),
        }
    }

    pub fn inner(&self) -> Rc<T> {
        self.inner.clone()
    }

    pub fn into_inner(self) -> Rc<T> {
        self.inner
    }
}

impl<T: DeserializeOwned + 'static> Config<T> {
    /// Reads the configuration of `key` from a resolved value
    pub fn from_instance(key: &str, value: &Instance) -> Result<Self, ConfigError> {
        if let Ok(inner) = value.downcast::<T>() {
            return Ok(Config { inner });
        }
        let json = value
            .downcast::<serde_json::Value>()
            .map_err(|actual| ConfigError::Mismatch {
                key: key.to_string(),
                required: type_name::<T>(),
                actual,
            })?;
        let inner = T::deserialize(&*json).map_err(|error| ConfigError::Deserialize {
            key: key.to_string(),
            error: Arc::new(error),
        })?;
        Ok(Config::new(inner))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Limits {
        max: u32,
        #[serde(default)]
        burst: u32,
    }

    #[test]
    fn shares_typed_values() {
        let value = Instance::new(Limits { max: 3, burst: 1 });
        let config = Config::<Limits>::from_instance("limits", &value).unwrap();
        assert!(Rc::ptr_eq(&config.inner(), &value.downcast::<Limits>().unwrap()));
    }

    #[test]
    fn deserializes_json() {
        let value = Instance::new(json!({ "max": 10 }));
        let config = Config::<Limits>::from_instance("limits", &value).unwrap();
        assert_eq!(*config, Limits { max: 10, burst: 0 });
    }

    #[test]
    fn reports_what_could_not_be_read() {
        let err = Config::<Limits>::from_instance("limits", &Instance::new(json!({ "max": "ten" })))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Deserialize { ref key, .. } if key == "limits"));

        let err = Config::<Limits>::from_instance("limits", &Instance::new(7u8)).unwrap_err();
        assert!(matches!(err, ConfigError::Mismatch { actual: "u8", .. }));
    }
}
