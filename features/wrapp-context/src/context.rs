use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    fmt,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use serde_json::{json, Map, Value};

use crate::{
    binding::{Binding, BindingScope, ResolutionOptions},
    binding_filter::{BindingComparator, BindingFilter, TagFilter},
    binding_key::{plain_key, BindingAddress},
    builder::ContextBuilder,
    errors::{ContextError, ResolutionError, ResolutionErrorKind},
    factories::Injectable,
    keys::ContextTags,
    resolver::downcast,
    subscription::{ContextEvent, ContextEventType, SubscriptionManager},
    tag_indexer::TagIndexer,
    types::{get_deep_property, Instance},
    value_promise::{Resolved, ValueOrPromise},
    view::ContextView,
};

/// Identity of a context, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub type ContextEventListener = Rc<dyn Fn(&ContextEvent)>;
pub type ContextErrorListener = Rc<dyn Fn(&ContextError)>;

/// A node in the context tree: owns bindings and delegates lookups to its parent.
///
/// Contexts are cheap handles, clones refer to the same node.
#[derive(Clone)]
pub struct Context(pub(crate) Rc<ContextInner>);

pub struct ContextInner {
    id: ContextId,
    name: String,
    scope: Option<BindingScope>,
    parent: Option<Context>,
    /// Bindings with their insertion sequence
    registry: RefCell<HashMap<String, (u64, Binding)>>,
    next_sequence: Cell<u64>,
    /// Bumped whenever a binding of this context is added, removed or reconfigured
    revision: Cell<u64>,
    pub(crate) indexer: TagIndexer,
    pub(crate) subscriptions: SubscriptionManager,
    event_listeners: RefCell<Vec<(u64, ContextEventListener)>>,
    error_listeners: RefCell<Vec<(u64, ContextErrorListener)>>,
    next_listener_id: Cell<u64>,
    closed: Cell<bool>,
}

impl ContextInner {
    pub(crate) fn touch(&self) {
        self.revision.set(self.revision.get() + 1);
    }
}

impl Context {
    /// Root context
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder().name(name).build()
    }

    pub fn with_parent(parent: &Context, name: impl Into<String>) -> Self {
        Self::builder().parent(parent).name(name).build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub(crate) fn create(name: String, parent: Option<Context>, scope: Option<BindingScope>) -> Self {
        tracing::debug!(
            name,
            parent = parent.as_ref().map(Context::name),
            scope = ?scope,
            "Creating context"
        );
        Context(Rc::new(ContextInner {
            id: ContextId::next(),
            name,
            scope,
            parent,
            registry: RefCell::new(HashMap::new()),
            next_sequence: Cell::new(0),
            revision: Cell::new(0),
            indexer: TagIndexer::default(),
            subscriptions: SubscriptionManager::default(),
            event_listeners: RefCell::new(Vec::new()),
            error_listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(0),
            closed: Cell::new(false),
        }))
    }

    pub fn id(&self) -> ContextId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Scope this context stands for, if any
    pub fn scope(&self) -> Option<BindingScope> {
        self.0.scope
    }

    pub fn parent(&self) -> Option<Context> {
        self.0.parent.clone()
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn revision(&self) -> u64 {
        self.0.revision.get()
    }

    /// This context followed by its ancestors
    pub fn chain(&self) -> impl Iterator<Item = Context> {
        std::iter::successors(Some(self.clone()), Context::parent)
    }

    // ###############################################
    // Registry

    /// Creates a binding for `key` and adds it to this context
    pub fn bind(&self, key: impl BindingAddress) -> Result<Binding, ContextError> {
        let binding = Binding::new(key)?;
        self.add(binding)
    }

    /// Adds a binding, replacing an unlocked binding with the same key.
    ///
    /// A replaced binding is reported with an unbind event before the bind event.
    pub fn add(&self, binding: Binding) -> Result<Binding, ContextError> {
        let key = binding.key().to_string();
        let existing = self.0.registry.borrow().get(&key).cloned();
        if let Some((_, existing)) = &existing {
            if existing.is_locked() {
                return Err(ContextError::BindingAlreadyLocked(key));
            }
        }

        tracing::debug!(context = self.name(), key, "Adding binding");
        let sequence = match &existing {
            Some((sequence, _)) => *sequence,
            None => {
                let sequence = self.0.next_sequence.get();
                self.0.next_sequence.set(sequence + 1);
                sequence
            }
        };
        self.0
            .registry
            .borrow_mut()
            .insert(key, (sequence, binding.clone()));

        self.0.touch();
        if let Some((_, replaced)) = existing {
            self.0.indexer.untrack(&replaced);
            self.emit_new(ContextEventType::Unbind, replaced);
        }
        self.0.indexer.track(&binding, self.downgrade());
        self.emit_new(ContextEventType::Bind, binding.clone());
        Ok(binding)
    }

    /// Creates a class binding from the type's declared binding spec. The key is
    /// taken from a `key` tag, or defaults to `classes.<ClassName>`.
    pub fn bind_class<T: Injectable>(&self) -> Result<Binding, ContextError> {
        let spec = T::binding_spec();
        let key = match spec.tags.get(ContextTags::KEY).and_then(Value::as_str) {
            Some(key) => key.to_string(),
            None => format!("classes.{}", T::class_name()),
        };
        let binding = Binding::new(key)?.to_class::<T>().apply_spec(&spec);
        self.add(binding)
    }

    /// Removes a binding from this context only. Returns `false` if the key was not bound here.
    pub fn unbind(&self, key: impl BindingAddress) -> Result<bool, ContextError> {
        let key = plain_key(&key)?;
        let Some((_, binding)) = self.0.registry.borrow().get(&key).cloned() else {
            return Ok(false);
        };
        if binding.is_locked() {
            return Err(ContextError::UnbindLocked(key));
        }
        tracing::debug!(context = self.name(), key, "Removing binding");
        self.0.registry.borrow_mut().remove(&key);
        self.0.touch();
        self.0.indexer.untrack(&binding);
        self.emit_new(ContextEventType::Unbind, binding);
        Ok(true)
    }

    /// `true` if this context itself holds `key`
    pub fn contains(&self, key: &str) -> bool {
        self.0.registry.borrow().contains_key(key)
    }

    /// `true` if `key` is bound anywhere in the chain
    pub fn is_bound(&self, key: &str) -> bool {
        self.chain().any(|ctx| ctx.contains(key))
    }

    /// Bindings of this context in insertion order
    pub fn own_bindings(&self) -> Vec<Binding> {
        let registry = self.0.registry.borrow();
        let mut bindings: Vec<_> = registry.values().cloned().collect();
        bindings.sort_by_key(|(sequence, _)| *sequence);
        bindings.into_iter().map(|(_, binding)| binding).collect()
    }

    fn own_binding(&self, key: &str) -> Option<Binding> {
        self.0
            .registry
            .borrow()
            .get(key)
            .map(|(_, binding)| binding.clone())
    }

    /// Closest binding for `key` in the chain
    pub fn find_binding(&self, key: &str) -> Option<Binding> {
        self.chain().find_map(|ctx| ctx.own_binding(key))
    }

    pub fn get_binding(&self, key: impl BindingAddress) -> Result<Binding, ContextError> {
        let key = plain_key(&key)?;
        self.find_binding(&key).ok_or_else(|| {
            ResolutionError::new(
                ResolutionErrorKind::NotBound,
                format!("The key '{key}' is not bound to any value in context {}", self.name()),
                self,
                Some(&key),
                None,
            )
            .into()
        })
    }

    /// Closest context in the chain holding `key`
    pub fn get_owner_context(&self, key: &str) -> Option<Context> {
        self.chain().find(|ctx| ctx.contains(key))
    }

    /// Context in the chain holding exactly this binding
    fn get_binding_owner(&self, binding: &Binding) -> Option<Context> {
        self.chain().find(|ctx| {
            ctx.own_binding(binding.key())
                .is_some_and(|own| own.ptr_eq(binding))
        })
    }

    /// Nearest context in the chain marked with `scope`
    pub fn get_scoped_context(&self, scope: BindingScope) -> Option<Context> {
        self.chain().find(|ctx| ctx.scope() == Some(scope))
    }

    /// `true` if this context is `other` or one of its ancestors
    pub fn is_visible_to(&self, other: &Context) -> bool {
        other.chain().any(|ctx| ctx.ptr_eq(self))
    }

    // ###############################################
    // Queries

    /// Bindings matching `filter` in the chain. A key bound in a closer context
    /// hides every binding of that key further up.
    pub fn find(&self, filter: impl Into<BindingFilter>) -> Vec<Binding> {
        let filter = filter.into();
        let mut shadowed = HashSet::new();
        let mut found = Vec::new();
        for ctx in self.chain() {
            let own = ctx.own_bindings();
            let indexed = filter.tag_filter().and_then(|tag| ctx.0.indexer.find(tag));
            for binding in &own {
                if shadowed.contains(binding.key()) {
                    continue;
                }
                if indexed.as_ref().is_some_and(|ids| !ids.contains(&binding.id())) {
                    continue;
                }
                if filter.matches(binding) {
                    found.push(binding.clone());
                }
            }
            shadowed.extend(own.iter().map(|binding| binding.key().to_string()));
        }
        found
    }

    pub fn find_by_tag(&self, tag: impl Into<TagFilter>) -> Vec<Binding> {
        self.find(BindingFilter::by_tag(tag))
    }

    /// Live, cached view over the bindings matching `filter`
    pub fn create_view(
        &self,
        filter: impl Into<BindingFilter>,
        comparator: Option<BindingComparator>,
    ) -> ContextView {
        let view = ContextView::new(self, filter.into(), comparator);
        view.open();
        view
    }

    // ###############################################
    // Resolution

    /// Context a binding's value is resolved and cached in, as required by its scope.
    ///
    /// Returns `Ok(None)` for an unsatisfiable scope if `options.optional` is set.
    pub fn get_resolution_context(
        &self,
        binding: &Binding,
        options: &ResolutionOptions,
    ) -> Result<Option<Context>, ContextError> {
        let owner = self.get_binding_owner(binding);
        let scope = binding.scope();
        let resolution_ctx = match scope {
            BindingScope::Transient | BindingScope::Context => self.clone(),
            BindingScope::Singleton => owner.clone().unwrap_or_else(|| self.clone()),
            BindingScope::Application | BindingScope::Server | BindingScope::Request => {
                match self.get_scoped_context(scope) {
                    Some(ctx) => ctx,
                    None if options.optional => return Ok(None),
                    None => {
                        return Err(ResolutionError::new(
                            ResolutionErrorKind::ScopeUnsatisfied,
                            format!(
                                "Binding '{}' requires a context in scope {scope}, none found from context {}",
                                binding.key(),
                                self.name()
                            ),
                            self,
                            Some(binding.key()),
                            options.session.as_ref(),
                        )
                        .into())
                    }
                }
            }
        };

        if let Some(owner) = owner {
            if !owner.is_visible_to(&resolution_ctx) {
                return Err(ResolutionError::new(
                    ResolutionErrorKind::NotVisible,
                    format!(
                        "Resolution context '{}' does not have visibility to binding '{}' (scope: {scope}) in context '{}'",
                        resolution_ctx.name(),
                        binding.key(),
                        owner.name()
                    ),
                    self,
                    Some(binding.key()),
                    options.session.as_ref(),
                )
                .into());
            }
        }
        Ok(Some(resolution_ctx))
    }

    /// Resolves `key_with_path`, ready or pending.
    ///
    /// A property path is applied to the resolved value. `optional` turns an
    /// unbound key or an unsatisfiable scope into `None`.
    pub fn get_value_or_promise(
        &self,
        key_with_path: impl BindingAddress,
        options: ResolutionOptions,
    ) -> Resolved<Option<Instance>> {
        let key = key_with_path.to_binding_key()?;
        let Some(binding) = self.find_binding(key.key()) else {
            if options.optional {
                return Ok(ValueOrPromise::Value(None));
            }
            return Err(ResolutionError::new(
                ResolutionErrorKind::NotBound,
                format!(
                    "The key '{}' is not bound to any value in context {}",
                    key.key(),
                    self.name()
                ),
                self,
                Some(key.key()),
                options.session.as_ref(),
            )
            .into());
        };

        let value = binding.get_value(self, options)?;
        match key.property_path() {
            None => Ok(value),
            Some(path) => {
                let path = path.to_string();
                value.map(move |value| Ok(value.and_then(|value| get_deep_property(&value, &path))))
            }
        }
    }

    /// Resolves `key_with_path`, failing if it is unbound or resolves to no value
    pub async fn get(&self, key_with_path: impl BindingAddress) -> Result<Instance, ContextError> {
        let key = key_with_path.to_binding_key()?;
        let value = self
            .get_value_or_promise(&key, ResolutionOptions::default())?
            .await?;
        value.ok_or_else(|| self.no_value(&key.to_string()))
    }

    pub async fn get_with(
        &self,
        key_with_path: impl BindingAddress,
        options: ResolutionOptions,
    ) -> Result<Option<Instance>, ContextError> {
        self.get_value_or_promise(key_with_path, options)?.await
    }

    pub async fn get_as<T: 'static>(&self, key_with_path: impl BindingAddress) -> Result<Rc<T>, ContextError> {
        downcast(&self.get(key_with_path).await?)
    }

    /// Resolves synchronously, failing with [ResolutionErrorKind::AsyncInSync] if
    /// any producer involved returns a pending computation
    pub fn get_sync(&self, key_with_path: impl BindingAddress) -> Result<Instance, ContextError> {
        let key = key_with_path.to_binding_key()?;
        self.get_sync_with(&key, ResolutionOptions::default())?
            .ok_or_else(|| self.no_value(&key.to_string()))
    }

    pub fn get_sync_with(
        &self,
        key_with_path: impl BindingAddress,
        options: ResolutionOptions,
    ) -> Result<Option<Instance>, ContextError> {
        let key = key_with_path.to_binding_key()?;
        let session = options.session.clone();
        match self.get_value_or_promise(&key, options)? {
            ValueOrPromise::Value(value) => Ok(value),
            ValueOrPromise::Promise(_) => Err(ResolutionError::new(
                ResolutionErrorKind::AsyncInSync,
                format!("Cannot get {key} synchronously: the value is a promise"),
                self,
                Some(key.key()),
                session.as_ref(),
            )
            .into()),
        }
    }

    pub fn get_sync_as<T: 'static>(&self, key_with_path: impl BindingAddress) -> Result<Rc<T>, ContextError> {
        downcast(&self.get_sync(key_with_path)?)
    }

    fn no_value(&self, key: &str) -> ContextError {
        ResolutionError::new(
            ResolutionErrorKind::NoValue,
            format!("The key '{key}' resolved to no value"),
            self,
            Some(key),
            None,
        )
        .into()
    }

    // ###############################################
    // Events

    /// Registers a listener called synchronously on bind and unbind, including
    /// forwarded parent events
    pub fn on_event(&self, listener: impl Fn(&ContextEvent) + 'static) -> u64 {
        self.ensure_parent_listener();
        let id = self.next_listener_id();
        self.0
            .event_listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn remove_event_listener(&self, id: u64) -> bool {
        let mut listeners = self.0.event_listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Registers a listener for observer failures of this context and its descendants
    pub fn on_error(&self, listener: impl Fn(&ContextError) + 'static) -> u64 {
        let id = self.next_listener_id();
        self.0
            .error_listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn remove_error_listener(&self, id: u64) -> bool {
        let mut listeners = self.0.error_listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn next_listener_id(&self) -> u64 {
        let id = self.0.next_listener_id.get();
        self.0.next_listener_id.set(id + 1);
        id
    }

    /// Calls the error listeners, returns `false` if there are none
    pub(crate) fn emit_error(&self, err: &ContextError) -> bool {
        let listeners: Vec<_> = self
            .0
            .error_listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in &listeners {
            listener(err);
        }
        !listeners.is_empty()
    }

    fn emit_new(&self, event_type: ContextEventType, binding: Binding) {
        self.emit(ContextEvent {
            event_type,
            binding,
            context: self.clone(),
        });
    }

    /// Calls the event listeners, then queues the event for observers
    pub(crate) fn emit(&self, event: ContextEvent) {
        let listeners: Vec<_> = self
            .0
            .event_listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
        self.0.subscriptions.enqueue(event);
    }

    // ###############################################
    // Lifecycle

    /// Detaches from the parent, drops observers and pending notifications, and
    /// releases the values cached for this context. The bindings stay registered
    /// and indexed.
    pub fn close(&self) {
        if self.0.closed.replace(true) {
            return;
        }
        tracing::debug!(context = self.name(), "Closing context");
        self.close_subscriptions();
        for ctx in self.chain() {
            for binding in ctx.own_bindings() {
                binding.clear_cache_for(self.id());
            }
        }
        self.0.event_listeners.borrow_mut().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.get()
    }

    /// JSON description of this context and its bindings
    pub fn inspect(&self, include_parent: bool) -> Value {
        let bindings: Map<String, Value> = self
            .own_bindings()
            .iter()
            .map(|binding| (binding.key().to_string(), binding.inspect()))
            .collect();
        let mut description = json!({
            "name": self.name(),
            "bindings": bindings,
        });
        if let Some(scope) = self.scope() {
            description["scope"] = json!(scope);
        }
        if include_parent {
            if let Some(parent) = self.parent() {
                description["parent"] = parent.inspect(true);
            }
        }
        description
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name())
            .field("scope", &self.scope())
            .field("bindings", &self.0.registry.borrow().len())
            .field("parent", &self.0.parent.as_ref().map(Context::name))
            .finish()
    }
}
