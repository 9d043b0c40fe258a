use wrapp_context::{BindingKey, Context, Instance, ResolutionOptions, Resolved};

/// Looks up the configuration of a binding.
///
/// A context uses the resolver bound at
/// [wrapp_context::ContextBindings::CONFIGURATION_RESOLVER], or
/// [DefaultConfigurationResolver] when there is none.
pub trait ConfigurationResolver {
    /// Resolves the configuration of `key`, narrowed to `property_path` if given
    fn get_config_as_value_or_promise(
        &self,
        ctx: &Context,
        key: &str,
        property_path: Option<&str>,
        options: ResolutionOptions,
    ) -> Resolved<Option<Instance>>;
}

/// Reads configuration from the `<key>:$config` binding
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConfigurationResolver;

impl ConfigurationResolver for DefaultConfigurationResolver {
    fn get_config_as_value_or_promise(
        &self,
        ctx: &Context,
        key: &str,
        property_path: Option<&str>,
        options: ResolutionOptions,
    ) -> Resolved<Option<Instance>> {
        let config_key = BindingKey::create(
            BindingKey::build_key_for_config(key),
            property_path.filter(|path| !path.is_empty()),
        )?;
        tracing::trace!(context = ctx.name(), key = %config_key, "Resolving configuration");
        ctx.get_value_or_promise(&config_key, options)
    }
}
