//! Injections reading the configuration of the binding being resolved.
//!
//! Each helper has a `_from` variant that names the configured binding
//! explicitly instead of taking it from the resolution session.

use std::rc::Rc;

use wrapp_context::{
    types::get_deep_property, BindingFilter, Context, ContextError, ContextTags, ContextView, Getter,
    Injection, Instance, ResolutionOptions, ResolutionSession, TagFilter, ValueOrPromise,
};

use crate::context::ContextConfigExt;

/// Injects the configuration at `property_path` (empty for all of it)
pub fn config_injection(property_path: impl Into<String>) -> Injection {
    config_injection_for(None, property_path.into())
}

pub fn config_injection_from(binding_key: impl Into<String>, property_path: impl Into<String>) -> Injection {
    config_injection_for(Some(binding_key.into()), property_path.into())
}

fn config_injection_for(from_binding: Option<String>, property_path: String) -> Injection {
    Injection::new(None)
        .optional()
        .with_decorator("@config")
        .with_resolver(move |ctx, injection, session| {
            let Some(key) = target_key(from_binding.as_deref(), session) else {
                return Ok(ValueOrPromise::Value(None));
            };
            ctx.get_config_as_value_or_promise(
                &key,
                path(&property_path),
                ResolutionOptions::default()
                    .with_session(session.clone())
                    .with_optional(injection.metadata.optional),
            )
        })
}

/// Injects a [Getter] that reads the configuration again on every call
pub fn config_getter(property_path: impl Into<String>) -> Injection {
    config_getter_for(None, property_path.into())
}

pub fn config_getter_from(binding_key: impl Into<String>, property_path: impl Into<String>) -> Injection {
    config_getter_for(Some(binding_key.into()), property_path.into())
}

fn config_getter_for(from_binding: Option<String>, property_path: String) -> Injection {
    Injection::new(None)
        .optional()
        .with_decorator("@config.getter")
        .with_resolver(move |ctx, injection, session| {
            let key = target_key(from_binding.as_deref(), session);
            let property_path = property_path.clone();
            let options = ResolutionOptions::default()
                .with_session(session.fork())
                .with_optional(injection.metadata.optional);
            let ctx = ctx.clone();
            let getter: Getter = Getter::new(move || match &key {
                Some(key) => ctx.get_config_as_value_or_promise(key, path(&property_path), options.clone()),
                None => Ok(ValueOrPromise::Value(None)),
            });
            Ok(ValueOrPromise::Value(Some(Instance::new(getter))))
        })
}

/// Injects a [ConfigurationView] over every configuration of the binding
pub fn config_view(property_path: impl Into<String>) -> Injection {
    config_view_for(None, property_path.into())
}

pub fn config_view_from(binding_key: impl Into<String>, property_path: impl Into<String>) -> Injection {
    config_view_for(Some(binding_key.into()), property_path.into())
}

fn config_view_for(from_binding: Option<String>, property_path: String) -> Injection {
    Injection::new(None)
        .with_decorator("@config.view")
        .with_resolver(move |ctx, injection, session| {
            let key = target_key(from_binding.as_deref(), session).ok_or_else(|| ContextError::Injection {
                target: injection.target_name(),
                message: "A configuration view needs a binding to read the configuration of".to_string(),
            })?;
            let view = ConfigurationView::new(ctx, &key, path(&property_path));
            Ok(ValueOrPromise::Value(Some(Instance::new(view))))
        })
}

fn target_key(from_binding: Option<&str>, session: &ResolutionSession) -> Option<String> {
    from_binding
        .map(str::to_string)
        .or_else(|| session.current_binding().map(|binding| binding.key().to_string()))
}

fn path(property_path: &str) -> Option<&str> {
    Some(property_path).filter(|path| !path.is_empty())
}

/// Live view over the configuration bindings of a key, found by their
/// `configurationFor` tag anywhere in the context chain
#[derive(Clone)]
pub struct ConfigurationView {
    view: ContextView,
    property_path: Option<Rc<str>>,
}

impl ConfigurationView {
    pub fn new(ctx: &Context, key: &str, property_path: Option<&str>) -> Self {
        let filter = BindingFilter::by_tag(TagFilter::values([(
            ContextTags::CONFIGURATION_FOR,
            key,
        )]));
        ConfigurationView {
            view: ctx.create_view(filter, None),
            property_path: property_path.map(Rc::from),
        }
    }

    pub fn view(&self) -> &ContextView {
        &self.view
    }

    /// Configuration values, closest context first
    pub async fn values(&self) -> Result<Vec<Instance>, ContextError> {
        Ok(self.select(self.view.values().await?))
    }

    pub fn values_sync(&self) -> Result<Vec<Instance>, ContextError> {
        Ok(self.select(self.view.values_sync()?))
    }

    /// The only configuration value, if any
    pub async fn single_value(&self) -> Result<Option<Instance>, ContextError> {
        let values = self.values().await?;
        if values.len() > 1 {
            return Err(ContextError::MultipleValues(values.len()));
        }
        Ok(values.into_iter().next())
    }

    pub fn close(&self) {
        self.view.close();
    }

    fn select(&self, values: Vec<Instance>) -> Vec<Instance> {
        match &self.property_path {
            None => values,
            Some(path) => values
                .iter()
                .filter_map(|value| get_deep_property(value, path))
                .collect(),
        }
    }
}
