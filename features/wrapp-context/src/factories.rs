use std::{
    any::{type_name, Any},
    marker::PhantomData,
    ops::Deref,
    rc::Rc,
};

use crate::{
    binding::BindingSpec,
    context::Context,
    errors::ContextError,
    injection::Injection,
    resolution_session::ResolutionSession,
    resolver::{instantiate_class, InjectedArgs},
    types::{short_type_name, DynError, Instance, TypeInfo},
    value_promise::Resolved,
};

/// A class the resolver can instantiate.
///
/// The injection descriptors are plain data, typically produced by a macro or
/// written by hand next to the type.
pub trait Injectable: Sized + 'static {
    /// Name used in resolution paths and error messages
    fn class_name() -> &'static str {
        short_type_name(type_name::<Self>())
    }

    /// One entry per constructor parameter. `None` slots take the next non-injected argument.
    fn parameters() -> Vec<Option<Injection>> {
        Vec::new()
    }

    /// Injected properties, assigned after construction
    fn properties() -> Vec<(&'static str, Injection)> {
        Vec::new()
    }

    /// Scope and tags applied when the class is bound with [Context::bind_class]
    fn binding_spec() -> BindingSpec {
        BindingSpec::default()
    }

    /// Constructs the instance from the resolved constructor arguments
    fn construct(args: InjectedArgs) -> Result<Self, DynError>;

    /// Assigns a resolved property
    fn assign(&mut self, property: &str, value: Option<Instance>) -> Result<(), DynError> {
        let _ = (property, value);
        Ok(())
    }

    /// Wraps the finished instance. Interceptable classes return [Instance::interceptable].
    fn into_instance(self) -> Instance {
        Instance::new(self)
    }
}

/// A class whose binding resolves to the value it provides
pub trait Provider: Injectable {
    type Value: 'static;

    fn value(&self) -> Resolved<Self::Value>;
}

/// Wrapper trait for classes, allowing for dynamic dispatch
pub trait DynClass {
    fn name(&self) -> &'static str;

    fn info(&self) -> TypeInfo;

    fn parameters(&self) -> Vec<Option<Injection>>;

    fn properties(&self) -> Vec<(&'static str, Injection)>;

    fn binding_spec(&self) -> BindingSpec;

    /// Constructs the bare object; properties are assigned afterwards
    fn construct(&self, args: InjectedArgs) -> Result<Box<dyn Any>, DynError>;

    fn assign(&self, object: &mut dyn Any, property: &str, value: Option<Instance>) -> Result<(), DynError>;

    fn finish(&self, object: Box<dyn Any>) -> Result<Instance, ContextError>;
}

struct ClassOf<T>(PhantomData<fn() -> T>);

// Impl DynClass for any Injectable
impl<T: Injectable> DynClass for ClassOf<T> {
    fn name(&self) -> &'static str {
        T::class_name()
    }

    fn info(&self) -> TypeInfo {
        TypeInfo::of::<T>()
    }

    fn parameters(&self) -> Vec<Option<Injection>> {
        T::parameters()
    }

    fn properties(&self) -> Vec<(&'static str, Injection)> {
        T::properties()
    }

    fn binding_spec(&self) -> BindingSpec {
        T::binding_spec()
    }

    fn construct(&self, args: InjectedArgs) -> Result<Box<dyn Any>, DynError> {
        T::construct(args).map(|object| Box::new(object) as Box<dyn Any>)
    }

    fn assign(&self, object: &mut dyn Any, property: &str, value: Option<Instance>) -> Result<(), DynError> {
        let Some(object) = object.downcast_mut::<T>() else {
            return Err(downcast_failed::<T>().into());
        };
        object.assign(property, value)
    }

    fn finish(&self, object: Box<dyn Any>) -> Result<Instance, ContextError> {
        object
            .downcast::<T>()
            .map(|object| object.into_instance())
            .map_err(|_| downcast_failed::<T>())
    }
}

fn downcast_failed<T>() -> ContextError {
    ContextError::DowncastFailed {
        required_type: type_name::<T>(),
        actual_type: "unknown",
    }
}

/// Type erased [Injectable], the source of class bindings
#[derive(Clone)]
pub struct ClassConstructor(Rc<dyn DynClass>);

impl ClassConstructor {
    pub fn of<T: Injectable>() -> Self {
        ClassConstructor(Rc::new(ClassOf::<T>(PhantomData)))
    }
}

impl Deref for ClassConstructor {
    type Target = dyn DynClass;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// Wrapper trait for providers, allowing for dynamic dispatch
pub trait DynProvider {
    fn class(&self) -> ClassConstructor;

    /// Calls `value()` on an instance created from [DynProvider::class]
    fn value(&self, provider: &Instance) -> Resolved<Instance>;
}

struct ProviderOf<P>(PhantomData<fn() -> P>);

impl<P: Provider> DynProvider for ProviderOf<P> {
    fn class(&self) -> ClassConstructor {
        ClassConstructor::of::<P>()
    }

    fn value(&self, provider: &Instance) -> Resolved<Instance> {
        let provider = provider
            .downcast::<P>()
            .map_err(|actual_type| ContextError::DowncastFailed {
                required_type: type_name::<P>(),
                actual_type,
            })?;
        provider.value()?.map(|value| Ok(Instance::new(value)))
    }
}

/// Type erased [Provider], the source of provider bindings
#[derive(Clone)]
pub struct ProviderClass(Rc<dyn DynProvider>);

impl ProviderClass {
    pub fn of<P: Provider>() -> Self {
        ProviderClass(Rc::new(ProviderOf::<P>(PhantomData)))
    }

    pub fn name(&self) -> &'static str {
        self.0.class().name()
    }

    /// Instantiates the provider class, then asks it for its value
    pub fn provide(&self, ctx: &Context, session: Option<&ResolutionSession>) -> Resolved<Instance> {
        let provider = instantiate_class(&self.0.class(), ctx, session, Vec::new())?;
        let this = self.clone();
        provider.then(move |provider| this.0.value(&provider))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{binding::BindingScope, value_promise::ValueOrPromise};

    struct Clock {
        start: u64,
        label: Option<String>,
    }

    impl Injectable for Clock {
        fn parameters() -> Vec<Option<Injection>> {
            vec![None]
        }

        fn binding_spec() -> BindingSpec {
            BindingSpec::default().in_scope(BindingScope::Singleton).tag("clock")
        }

        fn construct(args: InjectedArgs) -> Result<Self, DynError> {
            Ok(Clock {
                start: *args.required::<u64>(0)?,
                label: None,
            })
        }

        fn assign(&mut self, property: &str, value: Option<Instance>) -> Result<(), DynError> {
            if property == "label" {
                self.label = value.and_then(|v| v.downcast::<String>().ok()).map(|s| (*s).clone());
            }
            Ok(())
        }
    }

    impl Provider for Clock {
        type Value = u64;

        fn value(&self) -> Resolved<u64> {
            Ok(ValueOrPromise::Value(self.start + 1))
        }
    }

    #[test]
    fn erased_class_constructs_and_assigns() {
        let class = ClassConstructor::of::<Clock>();
        assert_eq!(class.name(), "Clock");
        assert_eq!(class.binding_spec().tags.get("clock"), Some(&json!("clock")));

        let args = InjectedArgs::new("Clock", vec![Some(Instance::new(7u64))]);
        let mut object = class.construct(args).unwrap();
        class
            .assign(&mut *object, "label", Some(Instance::new("tick".to_string())))
            .unwrap();
        let clock = class.finish(object).unwrap().downcast::<Clock>().unwrap();
        assert_eq!(clock.start, 7);
        assert_eq!(clock.label.as_deref(), Some("tick"));
    }

    #[test]
    fn provider_values_are_wrapped() {
        let provider = ProviderOf::<Clock>(PhantomData);
        let instance = Instance::new(Clock { start: 1, label: None });
        let value = provider.value(&instance).unwrap().try_into_value().ok().unwrap();
        assert_eq!(*value.downcast::<u64>().unwrap(), 2);

        assert!(matches!(
            provider.value(&Instance::new(0u8)),
            Err(ContextError::DowncastFailed { .. })
        ));
    }
}
