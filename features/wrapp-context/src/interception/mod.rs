//! Method interception.
//!
//! Targets opt in by implementing [Interceptable]: they name their methods, expose
//! the interceptors declared for the class and per method, and dispatch calls by
//! name. An [InterceptionProxy] runs every call through the merged chain of
//! global, class and method interceptors before it reaches the target.

use std::{any::type_name, fmt, rc::Rc};

use futures::FutureExt;

use crate::{
    binding::Binding,
    binding_key::BindingKey,
    context::Context,
    errors::ContextError,
    factories::Provider,
    keys::{ContextTags, GLOBAL_INTERCEPTOR_NAMESPACE, LOCAL_INTERCEPTOR_NAMESPACE},
    types::{short_type_name, Instance},
    value_promise::{Resolved, ValueOrPromise},
};

pub mod chain;
pub mod invocation;
pub mod proxy;

pub use chain::{GenericInterceptorChain, Next};
pub use invocation::InvocationContext;
pub use proxy::InterceptionProxy;

/// A value whose methods can be called by name through an interceptor chain
pub trait Interceptable: 'static {
    fn class_name(&self) -> &'static str {
        short_type_name(type_name::<Self>())
    }

    /// Interceptors applied to every method of the class
    fn class_interceptors(&self) -> Vec<Interceptor> {
        Vec::new()
    }

    fn method_interceptors(&self, method: &str) -> Vec<Interceptor> {
        let _ = method;
        Vec::new()
    }

    /// Names of the methods [Interceptable::invoke_method] dispatches
    fn methods(&self) -> &'static [&'static str];

    fn invoke_method(&self, method: &str, args: &[Instance]) -> Resolved<Instance>;
}

pub type InterceptorFn = Rc<dyn Fn(InvocationContext, Next) -> Resolved<Instance>>;

/// A named interceptor function
#[derive(Clone)]
pub struct InterceptorFunction {
    name: String,
    func: InterceptorFn,
}

impl InterceptorFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, invocation: InvocationContext, next: Next) -> Resolved<Instance> {
        (self.func)(invocation, next)
    }
}

/// Interceptor in a chain, either a function or the key of a binding resolving to one
#[derive(Clone)]
pub enum Interceptor {
    Function(InterceptorFunction),
    Key(String),
}

impl Interceptor {
    /// Functions are told apart by name when chains are merged
    pub fn from_fn(
        name: impl Into<String>,
        func: impl Fn(InvocationContext, Next) -> Resolved<Instance> + 'static,
    ) -> Self {
        Interceptor::Function(InterceptorFunction {
            name: name.into(),
            func: Rc::new(func),
        })
    }

    pub fn key(key: impl Into<String>) -> Self {
        Interceptor::Key(key.into())
    }

    fn same(&self, other: &Interceptor) -> bool {
        match (self, other) {
            (Interceptor::Function(a), Interceptor::Function(b)) => a.name == b.name,
            (Interceptor::Key(a), Interceptor::Key(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interceptor::Function(func) => f.debug_tuple("Function").field(&func.name).finish(),
            Interceptor::Key(key) => f.debug_tuple("Key").field(key).finish(),
        }
    }
}

/// Puts `from_spec` in front of `existing`, keeping each interceptor once. An
/// interceptor listed in both keeps its position in `existing`.
pub fn merge_interceptors(from_spec: Vec<Interceptor>, existing: Vec<Interceptor>) -> Vec<Interceptor> {
    let from_spec: Vec<Interceptor> = from_spec
        .into_iter()
        .filter(|interceptor| !existing.iter().any(|i| i.same(interceptor)))
        .collect();
    let mut merged: Vec<Interceptor> = Vec::new();
    for interceptor in from_spec.into_iter().chain(existing) {
        if !merged.iter().any(|i| i.same(&interceptor)) {
            merged.push(interceptor);
        }
    }
    merged
}

/// Options for [register_interceptor]
#[derive(Debug, Clone, Default)]
pub struct InterceptorBindingOptions {
    /// Binding key, defaults to `<namespace>.<name>`
    pub key: Option<String>,
    pub name: Option<String>,
    /// Register as global interceptor. Implied by `group` or `source` unless set to `false`.
    pub global: Option<bool>,
    pub group: Option<String>,
    /// Invocation source types the interceptor applies to
    pub source: Vec<String>,
    pub namespace: Option<String>,
}

impl InterceptorBindingOptions {
    fn is_global(&self) -> bool {
        match self.global {
            Some(global) => global,
            None => self.group.is_some() || !self.source.is_empty(),
        }
    }

    fn binding_key(&self, name: Option<&str>) -> String {
        if let Some(key) = &self.key {
            return key.clone();
        }
        let namespace = self.namespace.clone().unwrap_or_else(|| {
            if self.is_global() {
                GLOBAL_INTERCEPTOR_NAMESPACE.to_string()
            } else {
                LOCAL_INTERCEPTOR_NAMESPACE.to_string()
            }
        });
        match self.name.as_deref().or(name) {
            Some(name) => format!("{namespace}.{name}"),
            None => BindingKey::generate(&namespace).to_string(),
        }
    }

    fn apply(&self, binding: Binding) -> Binding {
        let mut binding = binding;
        if self.is_global() {
            binding = binding
                .tag(ContextTags::GLOBAL_INTERCEPTOR)
                .tag_value(ContextTags::NAMESPACE, GLOBAL_INTERCEPTOR_NAMESPACE);
            if let Some(group) = &self.group {
                binding = binding.tag_value(ContextTags::GLOBAL_INTERCEPTOR_GROUP, group.as_str());
            }
        }
        if !self.source.is_empty() {
            binding = binding.tag_value(ContextTags::GLOBAL_INTERCEPTOR_SOURCE, self.source.clone());
        }
        binding
    }
}

/// Binds `interceptor` in `ctx`, tagged as global interceptor if requested
pub fn register_interceptor(
    ctx: &Context,
    interceptor: Interceptor,
    options: InterceptorBindingOptions,
) -> Result<Binding, ContextError> {
    let name = match &interceptor {
        Interceptor::Function(func) => Some(func.name().to_string()),
        Interceptor::Key(_) => None,
    };
    let key = options.binding_key(name.as_deref());
    let binding = match interceptor {
        Interceptor::Key(target) => ctx.bind(key.as_str())?.to_alias(target),
        function => ctx.bind(key.as_str())?.to(function),
    };
    tracing::debug!(context = ctx.name(), key, global = options.is_global(), "Registered interceptor");
    Ok(options.apply(binding))
}

/// Binds a provider of an interceptor, applying its binding spec first
pub fn register_interceptor_provider<P>(
    ctx: &Context,
    options: InterceptorBindingOptions,
) -> Result<Binding, ContextError>
where
    P: Provider<Value = Interceptor>,
{
    let spec = P::binding_spec();
    let mut options = options;
    if spec.tags.contains_key(ContextTags::GLOBAL_INTERCEPTOR) && options.global.is_none() {
        options.global = Some(true);
    }
    let key = match spec.tags.get(ContextTags::KEY).and_then(|key| key.as_str()) {
        Some(key) if options.key.is_none() => key.to_string(),
        _ => options.binding_key(Some(P::class_name())),
    };
    let binding = ctx.bind(key.as_str())?.to_provider::<P>().apply_spec(&spec);
    Ok(options.apply(binding))
}

/// Invokes `method` on `target` through the interceptors that apply to it.
///
/// The invocation runs in a child context of `ctx`, which is closed once the
/// call has finished.
pub fn invoke_method_with_interceptors(
    ctx: &Context,
    target: Rc<dyn Interceptable>,
    method: &str,
    args: Vec<Instance>,
    source: Option<&str>,
) -> Resolved<Instance> {
    let invocation = InvocationContext::new(ctx, target, method, args, source);
    let result = run_invocation(&invocation);
    match result {
        Ok(ValueOrPromise::Promise(pending)) => Ok(ValueOrPromise::Promise(
            async move {
                let result = pending.await;
                invocation.close();
                result
            }
            .boxed_local(),
        )),
        other => {
            invocation.close();
            other
        }
    }
}

fn run_invocation(invocation: &InvocationContext) -> Resolved<Instance> {
    invocation.assert_method_exists()?;
    let mut interceptors = invocation.load_interceptors()?;
    interceptors.push(Interceptor::from_fn("invokeTargetMethod", |invocation, _| {
        invocation.invoke_target_method()
    }));
    GenericInterceptorChain::new(invocation.clone(), interceptors).invoke_interceptors()
}
