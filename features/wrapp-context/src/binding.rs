use std::{
    any::type_name,
    cell::{Cell, Ref, RefCell},
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    rc::{Rc, Weak},
};

use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    binding_key::{plain_key, BindingAddress},
    context::{Context, ContextId, ContextInner},
    errors::{ContextError, ResolutionError, ResolutionErrorKind},
    factories::{ClassConstructor, Injectable, Provider, ProviderClass},
    interception::InterceptionProxy,
    resolution_session::ResolutionSession,
    resolver::instantiate_class,
    types::Instance,
    value_promise::{Resolved, ValueOrPromise},
};

/// Tags of a binding. A plain name tag stores its own name as value, array values
/// are multi-value tags.
pub type TagMap = BTreeMap<String, Value>;

/// Lifetime of the values a binding produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum BindingScope {
    /// A new value for every resolution
    #[default]
    Transient,
    /// Cached once per requesting context, never shared with descendants
    Context,
    /// Cached once in the context owning the binding
    Singleton,
    /// Cached in the nearest context marked as application scope
    Application,
    /// Cached in the nearest context marked as server scope
    Server,
    /// Cached in the nearest context marked as request scope
    Request,
}

impl BindingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingScope::Transient => "Transient",
            BindingScope::Context => "Context",
            BindingScope::Singleton => "Singleton",
            BindingScope::Application => "Application",
            BindingScope::Server => "Server",
            BindingScope::Request => "Request",
        }
    }

    /// Scopes that are cached in a context carrying the same scope marker
    pub fn is_context_marker(&self) -> bool {
        matches!(
            self,
            BindingScope::Application | BindingScope::Server | BindingScope::Request
        )
    }
}

impl fmt::Display for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindingType {
    Constant,
    DynamicValue,
    Class,
    Provider,
    Alias,
}

/// Produces the value of a dynamic binding
pub type DynamicValueFactory = Rc<dyn Fn(&ResolutionContext) -> Resolved<Instance>>;

/// Where the value of a binding comes from
#[derive(Clone)]
pub enum BindingSource {
    Constant(Instance),
    DynamicValue(DynamicValueFactory),
    Class(ClassConstructor),
    Provider(ProviderClass),
    /// Key (optionally with a property path) of another binding
    Alias(String),
}

impl BindingSource {
    pub fn binding_type(&self) -> BindingType {
        match self {
            BindingSource::Constant(_) => BindingType::Constant,
            BindingSource::DynamicValue(_) => BindingType::DynamicValue,
            BindingSource::Class(_) => BindingType::Class,
            BindingSource::Provider(_) => BindingType::Provider,
            BindingSource::Alias(_) => BindingType::Alias,
        }
    }
}

/// Handed to value producers
#[derive(Clone)]
pub struct ResolutionContext {
    /// Context the value is resolved (and cached) in
    pub context: Context,
    pub binding: Binding,
    pub options: ResolutionOptions,
}

#[derive(Clone, Default)]
pub struct ResolutionOptions {
    /// Session to continue, a new one is started if unset
    pub session: Option<ResolutionSession>,
    /// Resolve to `None` instead of failing if the key is unbound or its scope unsatisfiable
    pub optional: bool,
    /// Wrap the value in an [InterceptionProxy]
    pub as_proxy_with_interceptors: bool,
}

impl ResolutionOptions {
    pub fn optional() -> Self {
        ResolutionOptions {
            optional: true,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session: ResolutionSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn as_proxy(mut self) -> Self {
        self.as_proxy_with_interceptors = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingOperation {
    Tag,
    Scope,
    Value,
    Lock,
    Unlock,
}

/// Emitted whenever a binding is reconfigured
#[derive(Clone)]
pub struct BindingEvent {
    pub binding: Binding,
    pub operation: BindingOperation,
}

pub type BindingEventListener = Rc<dyn Fn(&BindingEvent)>;

/// Scope and tags declared for a class, applied when the class gets bound
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSpec {
    pub scope: Option<BindingScope>,
    pub tags: TagMap,
}

impl BindingSpec {
    pub fn in_scope(mut self, scope: BindingScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn tag(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.tags.insert(name.clone(), Value::String(name));
        self
    }

    pub fn tag_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }
}

struct CacheEntry {
    context: Weak<ContextInner>,
    value: Instance,
}

/// A registry entry: key, scope, tags and the source producing its value.
///
/// Bindings are shared handles. Configuration methods take and return `self` so
/// they chain: `ctx.bind("greeting")?.to("hello").tag("text")`.
#[derive(Clone)]
pub struct Binding(Rc<BindingInner>);

struct BindingInner {
    key: String,
    scope: Cell<BindingScope>,
    scope_is_explicit: Cell<bool>,
    source: RefCell<Option<BindingSource>>,
    tags: RefCell<TagMap>,
    locked: Cell<bool>,
    /// Produced values by resolution context
    cache: RefCell<HashMap<ContextId, CacheEntry>>,
    listeners: RefCell<Vec<(u64, BindingEventListener)>>,
    next_listener_id: Cell<u64>,
}

impl Binding {
    pub fn new(key: impl BindingAddress) -> Result<Self, ContextError> {
        Ok(Self::with_key(plain_key(&key)?))
    }

    pub(crate) fn with_key(key: String) -> Self {
        Binding(Rc::new(BindingInner {
            key,
            scope: Cell::new(BindingScope::Transient),
            scope_is_explicit: Cell::new(false),
            source: RefCell::new(None),
            tags: RefCell::new(TagMap::new()),
            locked: Cell::new(false),
            cache: RefCell::new(HashMap::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(0),
        }))
    }

    pub fn key(&self) -> &str {
        &self.0.key
    }

    pub fn scope(&self) -> BindingScope {
        self.0.scope.get()
    }

    pub fn is_locked(&self) -> bool {
        self.0.locked.get()
    }

    pub fn tag_map(&self) -> Ref<'_, TagMap> {
        self.0.tags.borrow()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.0.tags.borrow().keys().cloned().collect()
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.0.tags.borrow().contains_key(name)
    }

    pub fn source(&self) -> Option<BindingSource> {
        self.0.source.borrow().clone()
    }

    pub fn binding_type(&self) -> Option<BindingType> {
        self.0.source.borrow().as_ref().map(BindingSource::binding_type)
    }

    /// `true` if both handles point to the same binding
    pub fn ptr_eq(&self, other: &Binding) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    // ###############################################
    // Configuration

    pub fn lock(self) -> Self {
        self.0.locked.set(true);
        self.emit_changed(BindingOperation::Lock);
        self
    }

    pub fn unlock(self) -> Self {
        self.0.locked.set(false);
        self.emit_changed(BindingOperation::Unlock);
        self
    }

    pub fn tag(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.tag_value(name.clone(), Value::String(name))
    }

    pub fn tag_value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.tags.borrow_mut().insert(name.into(), value.into());
        self.emit_changed(BindingOperation::Tag);
        self
    }

    pub fn tags<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut tags = self.0.tags.borrow_mut();
            for name in names {
                let name = name.into();
                tags.insert(name.clone(), Value::String(name));
            }
        }
        self.emit_changed(BindingOperation::Tag);
        self
    }

    /// Sets the scope, dropping every cached value
    pub fn in_scope(self, scope: BindingScope) -> Self {
        self.0.scope_is_explicit.set(true);
        self.set_scope(scope);
        self
    }

    /// Sets the scope unless one was set explicitly
    pub fn apply_default_scope(self, scope: BindingScope) -> Self {
        if !self.0.scope_is_explicit.get() {
            self.set_scope(scope);
        }
        self
    }

    fn set_scope(&self, scope: BindingScope) {
        self.0.scope.set(scope);
        self.clear_cache();
        self.emit_changed(BindingOperation::Scope);
    }

    pub fn apply_spec(self, spec: &BindingSpec) -> Self {
        let binding = match spec.scope {
            Some(scope) => self.in_scope(scope),
            None => self,
        };
        if spec.tags.is_empty() {
            return binding;
        }
        binding
            .0
            .tags
            .borrow_mut()
            .extend(spec.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        binding.emit_changed(BindingOperation::Tag);
        binding
    }

    /// Runs a configuration template against this binding
    pub fn apply(self, template: impl FnOnce(Binding) -> Binding) -> Self {
        template(self)
    }

    /// Binds a constant value.
    ///
    /// # Panics
    ///
    /// If `value` is a pending computation (a boxed future, a future combinator, an
    /// async block or a [ValueOrPromise]). Use [Binding::try_to] to get an error
    /// instead, or [Binding::to_async_dynamic_value] to bind a computation.
    pub fn to<T: 'static>(self, value: T) -> Self {
        match self.clone().try_to(value) {
            Ok(binding) => binding,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_to<T: 'static>(self, value: T) -> Result<Self, ContextError> {
        if is_pending_computation::<T>() {
            return Err(ContextError::PromiseAsConstant(self.key().to_string()));
        }
        Ok(self.to_instance(Instance::new(value)))
    }

    pub fn to_instance(self, instance: Instance) -> Self {
        self.set_source(BindingSource::Constant(instance));
        self
    }

    /// Binds a synchronous factory, called on every uncached resolution
    pub fn to_dynamic_value<T, F>(self, factory: F) -> Self
    where
        T: 'static,
        F: Fn(&ResolutionContext) -> Result<T, ContextError> + 'static,
    {
        self.to_value_factory(Rc::new(move |resolution| {
            factory(resolution).map(|value| ValueOrPromise::Value(Instance::new(value)))
        }))
    }

    /// Binds an asynchronous factory
    pub fn to_async_dynamic_value<T, F, Fut>(self, factory: F) -> Self
    where
        T: 'static,
        F: Fn(ResolutionContext) -> Fut + 'static,
        Fut: Future<Output = Result<T, ContextError>> + 'static,
    {
        self.to_value_factory(Rc::new(move |resolution| {
            let pending = factory(resolution.clone());
            Ok(ValueOrPromise::from_future(async move {
                pending.await.map(Instance::new)
            }))
        }))
    }

    pub fn to_value_factory(self, factory: DynamicValueFactory) -> Self {
        self.set_source(BindingSource::DynamicValue(factory));
        self
    }

    /// Binds a class, instantiated with its injections resolved from the resolution context
    pub fn to_class<T: Injectable>(self) -> Self {
        self.set_source(BindingSource::Class(ClassConstructor::of::<T>()));
        self
    }

    /// Binds a provider class; the binding resolves to what its `value()` returns
    pub fn to_provider<P: Provider>(self) -> Self {
        self.set_source(BindingSource::Provider(ProviderClass::of::<P>()));
        self
    }

    /// Resolves another key (optionally `key#path`) from the resolution context
    pub fn to_alias(self, key_with_path: impl Into<String>) -> Self {
        self.set_source(BindingSource::Alias(key_with_path.into()));
        self
    }

    fn set_source(&self, source: BindingSource) {
        *self.0.source.borrow_mut() = Some(source);
        self.clear_cache();
        self.emit_changed(BindingOperation::Value);
    }

    // ###############################################
    // Events

    /// Registers a listener for configuration changes, returns its id
    pub fn on_changed(&self, listener: impl Fn(&BindingEvent) + 'static) -> u64 {
        let id = self.0.next_listener_id.get();
        self.0.next_listener_id.set(id + 1);
        self.0.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn remove_changed_listener(&self, id: u64) -> bool {
        let mut listeners = self.0.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn emit_changed(&self, operation: BindingOperation) {
        // Listeners may reconfigure the binding, so call them on a snapshot
        let listeners: Vec<_> = self
            .0
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        let event = BindingEvent {
            binding: self.clone(),
            operation,
        };
        for listener in listeners {
            listener(&event);
        }
    }

    // ###############################################
    // Cache

    /// Drops the value cached for the resolution context `ctx` maps to
    pub fn refresh(&self, ctx: &Context) {
        if let Ok(Some(resolution_ctx)) =
            ctx.get_resolution_context(self, &ResolutionOptions::optional())
        {
            self.clear_cache_for(resolution_ctx.id());
        }
    }

    pub(crate) fn clear_cache(&self) {
        self.0.cache.borrow_mut().clear();
    }

    pub(crate) fn clear_cache_for(&self, context: ContextId) {
        self.0.cache.borrow_mut().remove(&context);
    }

    fn cached_value(&self, ctx: &Context) -> Option<Instance> {
        self.0
            .cache
            .borrow()
            .get(&ctx.id())
            .map(|entry| entry.value.clone())
    }

    fn cache_value(&self, ctx: &Context, value: &Instance) {
        let mut cache = self.0.cache.borrow_mut();
        cache.retain(|_, entry| entry.context.strong_count() > 0);
        // No single-flight: concurrent productions overwrite each other
        cache.insert(
            ctx.id(),
            CacheEntry {
                context: ctx.downgrade(),
                value: value.clone(),
            },
        );
    }

    // ###############################################
    // Resolution

    /// Resolves the value of this binding as seen from `ctx`.
    ///
    /// 1. The scope selects the resolution context (see [Context::get_resolution_context])
    /// 2. Non transient bindings return the value cached for that context
    /// 3. Otherwise the source produces a value inside a session frame, which is
    ///    cached according to the scope
    pub fn get_value(&self, ctx: &Context, options: ResolutionOptions) -> Resolved<Option<Instance>> {
        if self.0.source.borrow().is_none() {
            return Err(ResolutionError::new(
                ResolutionErrorKind::NoValue,
                format!("No value was configured for binding {}.", self.key()),
                ctx,
                Some(self.key()),
                options.session.as_ref(),
            )
            .into());
        }

        let Some(resolution_ctx) = ctx.get_resolution_context(self, &options)? else {
            return Ok(ValueOrPromise::Value(None));
        };

        let scope = self.scope();
        if scope != BindingScope::Transient {
            if let Some(cached) = self.cached_value(&resolution_ctx) {
                tracing::trace!(
                    key = self.key(),
                    context = resolution_ctx.name(),
                    "Using cached value"
                );
                return self
                    .value_or_proxy(&resolution_ctx, cached, &options)
                    .map(|value| ValueOrPromise::Value(Some(value)));
            }
        }

        let resolution = ResolutionContext {
            context: resolution_ctx.clone(),
            binding: self.clone(),
            options: options.clone(),
        };
        let produced = ResolutionSession::run_with_binding(
            move |session| {
                let mut producer_options = resolution.options.clone();
                producer_options.session = Some(session.clone());
                producer_options.as_proxy_with_interceptors = false;
                resolution.binding.produce(ResolutionContext {
                    options: producer_options,
                    ..resolution.clone()
                })
            },
            self,
            ctx,
            options.session.as_ref(),
        )?;

        let binding = self.clone();
        produced.then(move |value| {
            let Some(value) = value else {
                return Ok(ValueOrPromise::Value(None));
            };
            if scope != BindingScope::Transient {
                binding.cache_value(&resolution_ctx, &value);
            }
            binding
                .value_or_proxy(&resolution_ctx, value, &options)
                .map(|value| ValueOrPromise::Value(Some(value)))
        })
    }

    fn produce(&self, resolution: ResolutionContext) -> Resolved<Option<Instance>> {
        let Some(source) = self.source() else {
            return Err(ResolutionError::new(
                ResolutionErrorKind::NoValue,
                format!("No value was configured for binding {}.", self.key()),
                &resolution.context,
                Some(self.key()),
                resolution.options.session.as_ref(),
            )
            .into());
        };
        tracing::trace!(key = self.key(), source = ?source.binding_type(), "Producing value");

        let session = resolution.options.session.as_ref();
        match source {
            BindingSource::Constant(value) => Ok(ValueOrPromise::Value(Some(value))),
            BindingSource::DynamicValue(factory) => present(factory(&resolution)),
            BindingSource::Class(class) => {
                present(instantiate_class(&class, &resolution.context, session, Vec::new()))
            }
            BindingSource::Provider(provider) => {
                present(provider.provide(&resolution.context, session))
            }
            BindingSource::Alias(key) => resolution
                .context
                .get_value_or_promise(key.as_str(), resolution.options.clone()),
        }
    }

    fn value_or_proxy(
        &self,
        resolution_ctx: &Context,
        value: Instance,
        options: &ResolutionOptions,
    ) -> Result<Instance, ContextError> {
        if !options.as_proxy_with_interceptors {
            return Ok(value);
        }
        let proxy = InterceptionProxy::from_instance(&value, resolution_ctx, options.session.clone())?;
        Ok(Instance::new(proxy))
    }

    /// JSON description of the binding for diagnostics
    pub fn inspect(&self) -> Value {
        let mut description = json!({
            "key": self.key(),
            "scope": self.scope(),
            "tags": *self.tag_map(),
            "isLocked": self.is_locked(),
        });
        if let Some(source) = self.source() {
            description["type"] = json!(source.binding_type());
            match source {
                BindingSource::Class(class) => description["valueConstructor"] = json!(class.name()),
                BindingSource::Provider(provider) => {
                    description["providerConstructor"] = json!(provider.name())
                }
                BindingSource::Alias(key) => description["alias"] = json!(key),
                BindingSource::Constant(_) | BindingSource::DynamicValue(_) => {}
            }
        }
        description
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key())
            .field("scope", &self.scope())
            .field("type", &self.binding_type())
            .field("tags", &*self.tag_map())
            .field("locked", &self.is_locked())
            .finish()
    }
}

fn present(produced: Resolved<Instance>) -> Resolved<Option<Instance>> {
    produced?.map(|value| Ok(Some(value)))
}

/// Best effort detection of pending computations by their type name
fn is_pending_computation<T: 'static>() -> bool {
    const PREFIXES: [&str; 3] = [
        "core::future::",
        "core::pin::Pin<alloc::boxed::Box<dyn core::future::",
        "futures_util::future::",
    ];
    const ASYNC_MARKERS: [&str; 4] = [
        "{async block",
        "{async_block",
        "{async fn body",
        "{async_fn_body",
    ];
    let name = type_name::<T>();
    let promise = type_name::<ValueOrPromise<()>>();
    let promise = promise.split('<').next().unwrap_or(promise);

    name.starts_with(promise)
        || PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        || ASYNC_MARKERS.iter().any(|marker| name.contains(marker))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::future::LocalBoxFuture;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn tags_and_scope_emit_change_events() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let binding = Binding::new("greeter").unwrap();
        let recorder = seen.clone();
        binding.on_changed(move |event| recorder.borrow_mut().push(event.operation));

        let binding = binding
            .tag("service")
            .tag_value("name", "greeter")
            .in_scope(BindingScope::Singleton)
            .to(1u8)
            .lock();

        assert_eq!(
            *seen.borrow(),
            vec![
                BindingOperation::Tag,
                BindingOperation::Tag,
                BindingOperation::Scope,
                BindingOperation::Value,
                BindingOperation::Lock,
            ]
        );
        assert_eq!(binding.tag_names(), vec!["name".to_string(), "service".to_string()]);
        assert!(binding.is_locked());
        assert_eq!(binding.binding_type(), Some(BindingType::Constant));
    }

    #[test]
    fn default_scope_does_not_override_explicit_scope() {
        let binding = Binding::new("a").unwrap().apply_default_scope(BindingScope::Singleton);
        assert_eq!(binding.scope(), BindingScope::Singleton);

        let binding = Binding::new("b")
            .unwrap()
            .in_scope(BindingScope::Transient)
            .apply_default_scope(BindingScope::Singleton);
        assert_eq!(binding.scope(), BindingScope::Transient);
    }

    #[test]
    fn pending_computations_are_rejected_as_constants() {
        let pending: LocalBoxFuture<'static, u8> = Box::pin(async { 1 });
        let err = Binding::new("later").unwrap().try_to(pending).unwrap_err();
        assert!(matches!(err, ContextError::PromiseAsConstant(key) if key == "later"));

        let promise = ValueOrPromise::Value(1u8);
        assert!(Binding::new("p").unwrap().try_to(promise).is_err());

        let factory: Rc<dyn Fn() -> LocalBoxFuture<'static, u8>> = Rc::new(|| Box::pin(async { 1 }));
        assert!(Binding::new("fn").unwrap().try_to(factory).is_ok());
    }

    #[test]
    #[should_panic(expected = "cannot be bound to a pending computation")]
    fn constants_reject_pending_computations() {
        let pending: LocalBoxFuture<'static, u8> = Box::pin(async { 1 });
        let _ = Binding::new("later").unwrap().to(pending);
    }

    #[test]
    fn inspect_describes_the_binding() {
        let binding = Binding::new("alias").unwrap().to_alias("target#path").tag("x");
        assert_eq!(
            binding.inspect(),
            json!({
                "key": "alias",
                "scope": "Transient",
                "tags": {"x": "x"},
                "isLocked": false,
                "type": "Alias",
                "alias": "target#path",
            })
        );
    }

    #[test]
    fn spec_applies_scope_and_tags() {
        let spec = BindingSpec::default()
            .in_scope(BindingScope::Request)
            .tag("controller")
            .tag_value("name", "greeter");
        let binding = Binding::new("controllers.greeter").unwrap().apply_spec(&spec);
        assert_eq!(binding.scope(), BindingScope::Request);
        assert_eq!(binding.tag_map().get("name"), Some(&json!("greeter")));
    }
}
