use std::{any::type_name, rc::Rc};

use serde::de::DeserializeOwned;
use wrapp_context::{
    Binding, BindingKey, Context, ContextBindings, ContextError, ContextTags, Instance,
    ResolutionError, ResolutionErrorKind, ResolutionOptions, Resolved, ValueOrPromise,
};

use crate::{
    config::Config,
    errors::ConfigError,
    resolver::{ConfigurationResolver, DefaultConfigurationResolver},
};

/// Shared handle to a configuration resolver, the type bound at
/// [ContextBindings::CONFIGURATION_RESOLVER]
pub type SharedConfigurationResolver = Rc<dyn ConfigurationResolver>;

/// Configuration support for [Context].
///
/// The configuration of a binding key `k` lives in its own binding `k:$config`,
/// tagged with `configurationFor=k`. Lookups go through the context chain like
/// every other resolution and are optional: missing configuration is `None`.
#[allow(async_fn_in_trait)]
pub trait ContextConfigExt {
    /// Creates the binding holding the configuration of `key`
    fn configure(&self, key: &str) -> Result<Binding, ContextError>;

    /// Replaces the resolver used for configuration lookups in this context
    fn bind_configuration_resolver(
        &self,
        resolver: impl ConfigurationResolver + 'static,
    ) -> Result<Binding, ContextError>;

    fn configuration_resolver(&self) -> Result<SharedConfigurationResolver, ContextError>;

    fn get_config_as_value_or_promise(
        &self,
        key: &str,
        property_path: Option<&str>,
        options: ResolutionOptions,
    ) -> Resolved<Option<Instance>>;

    async fn get_config(&self, key: &str, property_path: Option<&str>) -> Result<Option<Instance>, ConfigError>;

    /// Fails if the configuration is only available asynchronously
    fn get_config_sync(&self, key: &str, property_path: Option<&str>) -> Result<Option<Instance>, ConfigError>;

    async fn get_config_as<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
        property_path: Option<&str>,
    ) -> Result<Option<Config<T>>, ConfigError>;

    fn get_config_sync_as<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
        property_path: Option<&str>,
    ) -> Result<Option<Config<T>>, ConfigError>;
}

impl ContextConfigExt for Context {
    fn configure(&self, key: &str) -> Result<Binding, ContextError> {
        let binding = self
            .bind(BindingKey::build_key_for_config(key))?
            .tag_value(ContextTags::CONFIGURATION_FOR, key);
        tracing::debug!(context = self.name(), key, "Configuring binding");
        Ok(binding)
    }

    fn bind_configuration_resolver(
        &self,
        resolver: impl ConfigurationResolver + 'static,
    ) -> Result<Binding, ContextError> {
        let resolver: SharedConfigurationResolver = Rc::new(resolver);
        Ok(self.bind(ContextBindings::CONFIGURATION_RESOLVER)?.to(resolver))
    }

    fn configuration_resolver(&self) -> Result<SharedConfigurationResolver, ContextError> {
        let bound = self.get_sync_with(ContextBindings::CONFIGURATION_RESOLVER, ResolutionOptions::optional())?;
        let Some(resolver) = bound else {
            return Ok(Rc::new(DefaultConfigurationResolver));
        };
        resolver
            .downcast::<SharedConfigurationResolver>()
            .map(|resolver| (*resolver).clone())
            .map_err(|actual| ContextError::DowncastFailed {
                required_type: type_name::<SharedConfigurationResolver>(),
                actual_type: actual,
            })
    }

    fn get_config_as_value_or_promise(
        &self,
        key: &str,
        property_path: Option<&str>,
        options: ResolutionOptions,
    ) -> Resolved<Option<Instance>> {
        self.configuration_resolver()?
            .get_config_as_value_or_promise(self, key, property_path, options)
    }

    async fn get_config(&self, key: &str, property_path: Option<&str>) -> Result<Option<Instance>, ConfigError> {
        let value = self
            .get_config_as_value_or_promise(key, property_path, ResolutionOptions::optional())?
            .await?;
        Ok(value)
    }

    fn get_config_sync(&self, key: &str, property_path: Option<&str>) -> Result<Option<Instance>, ConfigError> {
        match self.get_config_as_value_or_promise(key, property_path, ResolutionOptions::optional())? {
            ValueOrPromise::Value(value) => Ok(value),
            ValueOrPromise::Promise(_) => {
                let config_key = BindingKey::build_key_for_config(key);
                Err(ContextError::from(ResolutionError {
                    kind: ResolutionErrorKind::AsyncInSync,
                    message: format!("Cannot get config for {key} synchronously: the value is a promise"),
                    context: self.name().to_string(),
                    binding: Some(config_key),
                    resolution_path: String::new(),
                })
                .into())
            }
        }
    }

    async fn get_config_as<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
        property_path: Option<&str>,
    ) -> Result<Option<Config<T>>, ConfigError> {
        self.get_config(key, property_path)
            .await?
            .map(|value| Config::from_instance(key, &value))
            .transpose()
    }

    fn get_config_sync_as<T: DeserializeOwned + 'static>(
        &self,
        key: &str,
        property_path: Option<&str>,
    ) -> Result<Option<Config<T>>, ConfigError> {
        self.get_config_sync(key, property_path)?
            .map(|value| Config::from_instance(key, &value))
            .transpose()
    }
}
