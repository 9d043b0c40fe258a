use std::{fmt, str::FromStr};

use crate::errors::ContextError;

/// Separates a binding key from a deep property path, e.g. `config#rest.port`
pub const PROPERTY_SEPARATOR: char = '#';

/// Key of a binding, optionally addressing a property inside the bound value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    key: String,
    property_path: Option<String>,
}

impl BindingKey {
    /// Creates a key, rejecting empty keys and keys containing [PROPERTY_SEPARATOR]
    pub fn create(key: impl Into<String>, property_path: Option<&str>) -> Result<Self, ContextError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(BindingKey {
            key,
            property_path: property_path.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }

    /// Splits `key#path` at the first separator
    pub fn parse(key_with_path: &str) -> Result<Self, ContextError> {
        match key_with_path.split_once(PROPERTY_SEPARATOR) {
            Some((key, path)) => Self::create(key, Some(path)),
            None => Self::create(key_with_path, None),
        }
    }

    pub fn validate(key: &str) -> Result<(), ContextError> {
        if key.is_empty() {
            return Err(ContextError::InvalidBindingKey {
                key: key.to_string(),
                reason: "binding keys must not be empty",
            });
        }
        if key.contains(PROPERTY_SEPARATOR) {
            return Err(ContextError::InvalidBindingKey {
                key: key.to_string(),
                reason: "binding keys must not contain '#'",
            });
        }
        Ok(())
    }

    /// Key of the binding holding the configuration for `key`
    pub fn build_key_for_config(key: &str) -> String {
        if key.is_empty() {
            "$config".to_string()
        } else {
            format!("{key}:$config")
        }
    }

    /// Generates a unique key inside `namespace`
    pub fn generate(namespace: &str) -> Self {
        let id = uuid::Uuid::new_v4();
        let key = if namespace.is_empty() {
            id.to_string()
        } else {
            format!("{namespace}.{id}")
        };
        BindingKey {
            key,
            property_path: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn property_path(&self) -> Option<&str> {
        self.property_path.as_deref()
    }

    /// Same binding, addressing `path` inside its value
    pub fn deep_property(&self, path: &str) -> Self {
        BindingKey {
            key: self.key.clone(),
            property_path: Some(path.to_string()).filter(|p| !p.is_empty()),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)?;
        if let Some(path) = &self.property_path {
            write!(f, "{PROPERTY_SEPARATOR}{path}")?;
        }
        Ok(())
    }
}

impl FromStr for BindingKey {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Anything that can address a binding: plain strings (`key` or `key#path`) or
/// a [BindingKey]
pub trait BindingAddress {
    fn to_binding_key(&self) -> Result<BindingKey, ContextError>;
}

impl BindingAddress for BindingKey {
    fn to_binding_key(&self) -> Result<BindingKey, ContextError> {
        Ok(self.clone())
    }
}
impl BindingAddress for str {
    fn to_binding_key(&self) -> Result<BindingKey, ContextError> {
        BindingKey::parse(self)
    }
}
impl BindingAddress for String {
    fn to_binding_key(&self) -> Result<BindingKey, ContextError> {
        BindingKey::parse(self)
    }
}
impl<T: BindingAddress + ?Sized> BindingAddress for &T {
    fn to_binding_key(&self) -> Result<BindingKey, ContextError> {
        (**self).to_binding_key()
    }
}

/// Resolves an address that must not carry a property path
pub(crate) fn plain_key(address: &(impl BindingAddress + ?Sized)) -> Result<String, ContextError> {
    let key = address.to_binding_key()?;
    if key.property_path().is_some() {
        return Err(ContextError::InvalidBindingKey {
            key: key.to_string(),
            reason: "binding keys must not contain '#'",
        });
    }
    Ok(key.key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_with_path() {
        let key = BindingKey::parse("config#rest.port").unwrap();
        assert_eq!(key.key(), "config");
        assert_eq!(key.property_path(), Some("rest.port"));
        assert_eq!(key.to_string(), "config#rest.port");

        let plain: BindingKey = "app.name".parse().unwrap();
        assert_eq!(plain.property_path(), None);
    }

    #[test]
    fn rejects_invalid_keys() {
        assert!(BindingKey::create("", None).is_err());
        assert!(BindingKey::create("a#b", None).is_err());
        assert!(plain_key("a#b").is_err());
        assert_eq!(plain_key("a").unwrap(), "a");
    }

    #[test]
    fn builds_config_keys() {
        assert_eq!(BindingKey::build_key_for_config("servers.rest"), "servers.rest:$config");
        assert_eq!(BindingKey::build_key_for_config(""), "$config");
    }

    #[test]
    fn generated_keys_are_namespaced_and_unique() {
        let a = BindingKey::generate("interceptors");
        let b = BindingKey::generate("interceptors");
        assert!(a.key().starts_with("interceptors."));
        assert_ne!(a, b);
    }
}
