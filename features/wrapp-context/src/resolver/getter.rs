use std::{fmt, rc::Rc};

use crate::{
    binding::Binding,
    context::Context,
    errors::ContextError,
    types::Instance,
    value_promise::Resolved,
};

/// Deferred lookup handed out by getter injection.
///
/// Every call resolves again, so the getter sees rebinds and never holds on to a
/// stale value.
pub struct Getter<T = Option<Instance>>(Rc<dyn Fn() -> Resolved<T>>);

impl<T: 'static> Getter<T> {
    pub fn new(get: impl Fn() -> Resolved<T> + 'static) -> Self {
        Getter(Rc::new(get))
    }

    pub fn get(&self) -> Resolved<T> {
        (self.0)()
    }

    pub async fn value(&self) -> Result<T, ContextError> {
        self.get()?.await
    }
}

impl<T> Clone for Getter<T> {
    fn clone(&self) -> Self {
        Getter(self.0.clone())
    }
}

impl<T> fmt::Debug for Getter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Getter")
    }
}

/// What a [Setter] does when its key has no binding yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BindingCreationPolicy {
    /// Always bind a new binding in the target context
    AlwaysCreate,
    /// Fail if no binding exists in the chain
    NeverCreate,
    /// Reuse the binding found in the chain, bind one otherwise
    #[default]
    CreateIfNotBound,
}

/// Writes constant values to a key, handed out by setter injection
#[derive(Clone)]
pub struct Setter {
    context: Context,
    key: String,
    policy: BindingCreationPolicy,
}

impl Setter {
    pub fn new(context: &Context, key: impl Into<String>, policy: BindingCreationPolicy) -> Self {
        Setter {
            context: context.clone(),
            key: key.into(),
            policy,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Binds `value` as a constant to the target binding
    pub fn set<T: 'static>(&self, value: T) -> Result<Binding, ContextError> {
        let binding = find_or_create_binding(&self.context, &self.key, self.policy)?;
        binding.try_to(value)
    }
}

/// Binding for `key` as seen from `ctx`, created in `ctx` as `policy` allows
pub(crate) fn find_or_create_binding(
    ctx: &Context,
    key: &str,
    policy: BindingCreationPolicy,
) -> Result<Binding, ContextError> {
    match (policy, ctx.find_binding(key)) {
        (BindingCreationPolicy::AlwaysCreate, _) | (BindingCreationPolicy::CreateIfNotBound, None) => ctx.bind(key),
        (_, Some(binding)) => Ok(binding),
        (BindingCreationPolicy::NeverCreate, None) => Err(ContextError::other(format!(
            "No binding found for {key} in {}",
            ctx.name()
        ))),
    }
}

impl fmt::Debug for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("context", &self.context.name())
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish()
    }
}
