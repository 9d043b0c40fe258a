use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    binding::{Binding, ResolutionOptions},
    binding_filter::{BindingComparator, BindingFilter},
    context::Context,
    errors::{ContextError, ResolutionError, ResolutionErrorKind},
    resolution_session::ResolutionSession,
    resolver::getter::Getter,
    subscription::{ContextEvent, ContextEventType, ContextObserver, Subscription},
    types::Instance,
    value_promise::{resolve_list, Resolved, ValueOrPromise},
};

/// Emitted by a [ContextView] to its listeners
#[derive(Clone)]
pub enum ContextViewEvent {
    Bind(Binding),
    Unbind(Binding),
    Refresh,
    Resolve(Vec<Instance>),
    Close,
}

impl fmt::Debug for ContextViewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextViewEvent::Bind(binding) => f.debug_tuple("Bind").field(&binding.key()).finish(),
            ContextViewEvent::Unbind(binding) => f.debug_tuple("Unbind").field(&binding.key()).finish(),
            ContextViewEvent::Refresh => f.write_str("Refresh"),
            ContextViewEvent::Resolve(values) => f.debug_tuple("Resolve").field(&values.len()).finish(),
            ContextViewEvent::Close => f.write_str("Close"),
        }
    }
}

/// Live query over the bindings of a context chain.
///
/// Matching bindings and their values are cached until a context of the chain
/// changes, which is checked on every read. Observed bind and unbind events are
/// reported to the view listeners once the context drains its notifications.
/// Values are always resolved with a fresh session.
///
/// The view stops observing when its last handle is dropped.
#[derive(Clone)]
pub struct ContextView(Rc<ViewInner>);

struct ViewInner {
    context: Context,
    filter: BindingFilter,
    comparator: Option<BindingComparator>,
    cached_bindings: RefCell<Option<Vec<Binding>>>,
    cached_values: RefCell<Option<Vec<Instance>>>,
    /// Revisions of the context chain the caches were filled at
    revisions: RefCell<Vec<u64>>,
    subscription: RefCell<Option<Subscription>>,
    listeners: RefCell<Vec<(u64, Rc<dyn Fn(&ContextViewEvent)>)>>,
    next_listener_id: Cell<u64>,
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.unsubscribe();
        }
    }
}

/// Forwards context events to a view without keeping it alive
struct ViewObserver {
    view: Weak<ViewInner>,
    filter: BindingFilter,
}

impl ContextObserver for ViewObserver {
    fn filter(&self) -> Option<&BindingFilter> {
        Some(&self.filter)
    }

    fn observe(&self, event: &ContextEvent) -> Resolved<()> {
        if let Some(view) = self.view.upgrade() {
            ContextView(view).observe(event);
        }
        Ok(ValueOrPromise::Value(()))
    }
}

impl ContextView {
    /// Creates a closed view, see [ContextView::open]
    pub fn new(ctx: &Context, filter: BindingFilter, comparator: Option<BindingComparator>) -> Self {
        ContextView(Rc::new(ViewInner {
            context: ctx.clone(),
            filter,
            comparator,
            cached_bindings: RefCell::new(None),
            cached_values: RefCell::new(None),
            revisions: RefCell::new(Vec::new()),
            subscription: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(0),
        }))
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    /// Starts observing the context chain
    pub fn open(&self) {
        if self.is_open() {
            return;
        }
        let observer = ViewObserver {
            view: Rc::downgrade(&self.0),
            filter: self.0.filter.clone(),
        };
        let subscription = self.0.context.subscribe(Rc::new(observer));
        *self.0.subscription.borrow_mut() = Some(subscription);
    }

    pub fn is_open(&self) -> bool {
        self.0.subscription.borrow().is_some()
    }

    /// Stops observing and drops the caches
    pub fn close(&self) {
        let subscription = self.0.subscription.borrow_mut().take();
        let Some(subscription) = subscription else {
            return;
        };
        subscription.unsubscribe();
        self.clear();
        self.emit(&ContextViewEvent::Close);
    }

    /// Matching bindings, sorted by the comparator if there is one
    pub fn bindings(&self) -> Vec<Binding> {
        self.revalidate();
        if let Some(bindings) = self.0.cached_bindings.borrow().as_ref() {
            return bindings.clone();
        }
        let mut bindings = self.0.context.find(self.0.filter.clone());
        if let Some(comparator) = &self.0.comparator {
            bindings.sort_by(|a, b| comparator(a, b));
        }
        *self.0.cached_bindings.borrow_mut() = Some(bindings.clone());
        bindings
    }

    /// Marks the view stale
    pub fn refresh(&self) {
        tracing::debug!(context = self.0.context.name(), "Refreshing context view");
        self.clear();
        self.emit(&ContextViewEvent::Refresh);
    }

    /// Drops the caches if a context of the chain changed since they were filled
    fn revalidate(&self) {
        let revisions: Vec<u64> = self.0.context.chain().map(|ctx| ctx.revision()).collect();
        if *self.0.revisions.borrow() == revisions {
            return;
        }
        self.clear();
        *self.0.revisions.borrow_mut() = revisions;
    }

    fn clear(&self) {
        *self.0.cached_bindings.borrow_mut() = None;
        *self.0.cached_values.borrow_mut() = None;
    }

    /// Resolves the values of the matching bindings, dropping absent ones.
    ///
    /// The caller's session is not continued, so unrelated consumers of the same
    /// view never look like a circular dependency.
    pub fn resolve(&self, session: Option<&ResolutionSession>) -> Resolved<Vec<Instance>> {
        self.revalidate();
        if let Some(values) = self.0.cached_values.borrow().as_ref() {
            return Ok(ValueOrPromise::Value(values.clone()));
        }
        tracing::trace!(
            context = self.0.context.name(),
            caller = session.map(ResolutionSession::get_resolution_path),
            "Resolving context view"
        );
        let context = self.0.context.clone();
        let values = resolve_list(
            self.bindings()
                .into_iter()
                .map(|binding| binding.get_value(&context, ResolutionOptions::default())),
        )?;

        let view = self.clone();
        values.map(move |values| {
            let values: Vec<Instance> = values.into_iter().flatten().collect();
            *view.0.cached_values.borrow_mut() = Some(values.clone());
            view.emit(&ContextViewEvent::Resolve(values.clone()));
            Ok(values)
        })
    }

    pub async fn values(&self) -> Result<Vec<Instance>, ContextError> {
        self.resolve(None)?.await
    }

    pub fn values_sync(&self) -> Result<Vec<Instance>, ContextError> {
        match self.resolve(None)? {
            ValueOrPromise::Value(values) => Ok(values),
            ValueOrPromise::Promise(_) => Err(ResolutionError::new(
                ResolutionErrorKind::AsyncInSync,
                "Cannot resolve the context view synchronously: a value is a promise",
                &self.0.context,
                None,
                None,
            )
            .into()),
        }
    }

    /// The only value of the view, `None` if there is none
    pub async fn single_value(&self) -> Result<Option<Instance>, ContextError> {
        let mut values = self.values().await?;
        if values.len() > 1 {
            return Err(ContextError::MultipleValues(values.len()));
        }
        Ok(values.pop())
    }

    /// Getter resolving the current values on every call
    pub fn as_getter(&self, session: Option<&ResolutionSession>) -> Getter<Vec<Instance>> {
        let view = self.clone();
        let session = session.cloned();
        Getter::new(move || view.resolve(session.as_ref()))
    }

    pub fn on_event(&self, listener: impl Fn(&ContextViewEvent) + 'static) -> u64 {
        let id = self.0.next_listener_id.get();
        self.0.next_listener_id.set(id + 1);
        self.0.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn remove_event_listener(&self, id: u64) -> bool {
        let mut listeners = self.0.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn observe(&self, event: &ContextEvent) {
        self.refresh();
        let event = match event.event_type {
            ContextEventType::Bind => ContextViewEvent::Bind(event.binding.clone()),
            ContextEventType::Unbind => ContextViewEvent::Unbind(event.binding.clone()),
        };
        self.emit(&event);
    }

    fn emit(&self, event: &ContextViewEvent) {
        let listeners: Vec<_> = self
            .0
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for ContextView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextView")
            .field("context", &self.0.context.name())
            .field("filter", &self.0.filter)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::binding_filter::compare_bindings_by_tag;

    fn numbers(values: Vec<Instance>) -> Vec<u32> {
        values.iter().map(|v| *v.downcast::<u32>().unwrap()).collect()
    }

    #[test]
    fn follows_the_chain_without_draining() {
        let parent = Context::new("parent");
        let child = Context::with_parent(&parent, "child");
        parent.bind("one").unwrap().to(1u32).tag("number");
        let view = child.create_view(BindingFilter::by_tag("number"), None);
        assert_eq!(numbers(view.values_sync().unwrap()), vec![1]);

        child.bind("two").unwrap().to(2u32).tag("number");
        parent.bind("ignored").unwrap().to(3u32);
        assert_eq!(numbers(block_on(view.values()).unwrap()), vec![2, 1]);

        parent.bind("late").unwrap().to(4u32);
        assert_eq!(numbers(view.values_sync().unwrap()), vec![2, 1]);
        parent.get_binding("late").unwrap().tag("number");
        parent.unbind("one").unwrap();
        assert_eq!(numbers(view.values_sync().unwrap()), vec![2, 4]);

        child.get_binding("two").unwrap().to(20u32);
        assert_eq!(numbers(view.values_sync().unwrap()), vec![20, 4]);
    }

    #[test]
    fn dropped_views_stop_observing() {
        let ctx = Context::new("app");
        for _ in 0..5 {
            let view = ctx.create_view(BindingFilter::by_tag("x"), None);
            view.bindings();
        }
        assert_eq!(ctx.observer_count(), 0);

        let view = ctx.create_view(BindingFilter::by_tag("x"), None);
        let getter = view.as_getter(None);
        drop(view);
        assert_eq!(ctx.observer_count(), 1, "the getter keeps the view alive");
        drop(getter);
        assert_eq!(ctx.observer_count(), 0);

        ctx.bind("a").unwrap().to(1u32).tag("x");
        block_on(ctx.wait_until_pending_notifications_done()).unwrap();
    }

    #[test]
    fn sorts_with_comparator_and_propagates_failures() {
        let ctx = Context::new("app");
        ctx.bind("b").unwrap().to(2u32).tag_value("group", "second");
        ctx.bind("a").unwrap().to(1u32).tag_value("group", "first");
        ctx.bind("gone").unwrap().to_alias("missing").tag_value("group", "first");

        let order = vec!["first".to_string(), "second".to_string()];
        let view = ContextView::new(
            &ctx,
            BindingFilter::by_tag("group"),
            Some(compare_bindings_by_tag("group", order)),
        );
        let keys: Vec<_> = view.bindings().iter().map(|b| b.key().to_string()).collect();
        assert_eq!(keys, vec!["a", "gone", "b"]);
        assert!(view.values_sync().is_err(), "required alias target is missing");

        ctx.unbind("gone").unwrap();
        assert_eq!(numbers(view.values_sync().unwrap()), vec![1, 2]);
    }

    #[test]
    fn single_value_rejects_multiple_matches() {
        let ctx = Context::new("app");
        ctx.bind("a").unwrap().to(1u32).tag("x");
        let view = ctx.create_view(BindingFilter::by_tag("x"), None);
        assert_eq!(numbers(vec![block_on(view.single_value()).unwrap().unwrap()]), vec![1]);

        ctx.bind("b").unwrap().to(2u32).tag("x");
        assert!(matches!(
            block_on(view.single_value()),
            Err(ContextError::MultipleValues(2))
        ));
    }

    #[test]
    fn emits_view_events_and_closes() {
        let ctx = Context::new("app");
        let view = ctx.create_view(BindingFilter::by_tag("x"), None);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        view.on_event(move |event| sink.borrow_mut().push(format!("{event:?}")));

        ctx.bind("a").unwrap().to(1u32).tag("x");
        block_on(ctx.wait_until_pending_notifications_done()).unwrap();
        view.values_sync().unwrap();
        view.close();
        assert!(!view.is_open());

        assert_eq!(
            *seen.borrow(),
            vec!["Refresh", "Bind(\"a\")", "Resolve(1)", "Close"]
        );
    }
}
