//! Deferred notification of context observers.
//!
//! `bind` and `unbind` enqueue an event together with a snapshot of the observers
//! subscribed at that moment. Observers run when the queue is drained with
//! [Context::wait_until_pending_notifications_done], so a fluent configuration
//! chain completes before anybody observes the binding.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use futures::{FutureExt, StreamExt};
use futures_channel::mpsc;
use serde::Serialize;

use crate::{
    binding::Binding,
    binding_filter::BindingFilter,
    context::{Context, ContextInner},
    errors::ContextError,
    value_promise::Resolved,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextEventType {
    Bind,
    Unbind,
}

/// A binding was added to or removed from `context`
#[derive(Clone)]
pub struct ContextEvent {
    pub event_type: ContextEventType,
    pub binding: Binding,
    /// Context owning the binding, which may be an ancestor of the observed one
    pub context: Context,
}

impl fmt::Debug for ContextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEvent")
            .field("event_type", &self.event_type)
            .field("key", &self.binding.key())
            .field("context", &self.context.name())
            .finish()
    }
}

/// Reacts to bind and unbind events of a context and its ancestors
pub trait ContextObserver {
    /// Only events for matching bindings are observed
    fn filter(&self) -> Option<&BindingFilter> {
        None
    }

    fn observe(&self, event: &ContextEvent) -> Resolved<()>;
}

impl<F> ContextObserver for F
where
    F: Fn(&ContextEvent) -> Resolved<()>,
{
    fn observe(&self, event: &ContextEvent) -> Resolved<()> {
        self(event)
    }
}

/// Handle returned by [Context::subscribe]
pub struct Subscription {
    context: Weak<ContextInner>,
    observer: Rc<dyn ContextObserver>,
    closed: Cell<bool>,
}

impl Subscription {
    pub fn unsubscribe(&self) -> bool {
        if self.closed.replace(true) {
            return false;
        }
        match self.context.upgrade() {
            Some(context) => Context(context).unsubscribe(&self.observer),
            None => false,
        }
    }

    pub fn closed(&self) -> bool {
        self.closed.get()
    }
}

pub(crate) struct Notification {
    event: ContextEvent,
    observers: Vec<Rc<dyn ContextObserver>>,
}

/// Observers of one context and their pending notifications
pub(crate) struct SubscriptionManager {
    observers: RefCell<Vec<Rc<dyn ContextObserver>>>,
    sender: RefCell<mpsc::UnboundedSender<Notification>>,
    receiver: RefCell<mpsc::UnboundedReceiver<Notification>>,
    /// Listener forwarding parent events into this context
    parent_listener: RefCell<Option<(Context, u64)>>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        SubscriptionManager {
            observers: RefCell::new(Vec::new()),
            sender: RefCell::new(sender),
            receiver: RefCell::new(receiver),
            parent_listener: RefCell::new(None),
        }
    }
}

impl SubscriptionManager {
    fn subscribe(&self, observer: Rc<dyn ContextObserver>) {
        self.observers.borrow_mut().push(observer);
    }

    fn unsubscribe(&self, observer: &Rc<dyn ContextObserver>) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        observers.len() != before
    }

    fn is_subscribed(&self, observer: &Rc<dyn ContextObserver>) -> bool {
        self.observers
            .borrow()
            .iter()
            .any(|o| same_observer(o, observer))
    }

    /// Queues `event` for the observers subscribed right now
    pub(crate) fn enqueue(&self, event: ContextEvent) {
        let observers = self.observers.borrow().clone();
        if observers.is_empty() {
            return;
        }
        if let Err(err) = self
            .sender
            .borrow()
            .unbounded_send(Notification { event, observers })
        {
            tracing::error!(%err, "Notification queue closed");
        }
    }

    fn next(&self) -> Option<Notification> {
        self.receiver.borrow_mut().next().now_or_never().flatten()
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    fn has_parent_listener(&self) -> bool {
        self.parent_listener.borrow().is_some()
    }

    fn close(&self) {
        self.observers.borrow_mut().clear();
        let (sender, receiver) = mpsc::unbounded();
        *self.sender.borrow_mut() = sender;
        *self.receiver.borrow_mut() = receiver;
        let parent_listener = self.parent_listener.borrow_mut().take();
        if let Some((parent, listener)) = parent_listener {
            parent.remove_event_listener(listener);
        }
    }
}

fn same_observer(a: &Rc<dyn ContextObserver>, b: &Rc<dyn ContextObserver>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl Context {
    /// Adds an observer for bind and unbind events of this context and its ancestors
    pub fn subscribe(&self, observer: Rc<dyn ContextObserver>) -> Subscription {
        self.ensure_parent_listener();
        self.0.subscriptions.subscribe(observer.clone());
        Subscription {
            context: Rc::downgrade(&self.0),
            observer,
            closed: Cell::new(false),
        }
    }

    /// Removes an observer. Notifications already queued still reach it.
    pub fn unsubscribe(&self, observer: &Rc<dyn ContextObserver>) -> bool {
        self.0.subscriptions.unsubscribe(observer)
    }

    pub fn is_subscribed(&self, observer: &Rc<dyn ContextObserver>) -> bool {
        self.0.subscriptions.is_subscribed(observer)
    }

    /// Runs every queued notification.
    ///
    /// Observer failures go to the error listeners of the nearest context in the
    /// chain that has any. If there is none, the failure is returned as
    /// [ContextError::UnhandledObserverError] and the remaining notifications stay
    /// queued.
    pub async fn wait_until_pending_notifications_done(&self) -> Result<(), ContextError> {
        while let Some(notification) = self.0.subscriptions.next() {
            self.notify(notification).await?;
        }
        Ok(())
    }

    async fn notify(&self, notification: Notification) -> Result<(), ContextError> {
        let Notification { event, observers } = notification;
        tracing::trace!(
            context = self.name(),
            key = event.binding.key(),
            event = ?event.event_type,
            observers = observers.len(),
            "Notifying observers"
        );
        for observer in observers {
            if let Some(filter) = observer.filter() {
                if !filter.matches(&event.binding) {
                    continue;
                }
            }
            let result = match observer.observe(&event) {
                Ok(pending) => pending.await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                self.handle_observer_error(err)?;
            }
        }
        Ok(())
    }

    fn handle_observer_error(&self, err: ContextError) -> Result<(), ContextError> {
        let mut current = Some(self.clone());
        while let Some(ctx) = current {
            if ctx.emit_error(&err) {
                return Ok(());
            }
            current = ctx.parent();
        }
        tracing::warn!(context = self.name(), %err, "Unhandled observer error");
        Err(ContextError::UnhandledObserverError {
            context: self.name().to_string(),
            error: Box::new(err),
        })
    }

    /// Forwards bind/unbind events of the parent into this context, unless this
    /// context shadows the key
    pub(crate) fn ensure_parent_listener(&self) {
        if self.0.subscriptions.has_parent_listener() {
            return;
        }
        let Some(parent) = self.parent() else {
            return;
        };
        let child = Rc::downgrade(&self.0);
        let listener = parent.on_event(move |event| {
            let Some(child) = child.upgrade().map(Context) else {
                return;
            };
            if child.contains(event.binding.key()) {
                return;
            }
            child.emit(event.clone());
        });
        *self.0.subscriptions.parent_listener.borrow_mut() = Some((parent, listener));
    }

    pub(crate) fn close_subscriptions(&self) {
        self.0.subscriptions.close();
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.0.subscriptions.observer_count()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value_promise::ValueOrPromise;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, name: &'static str) -> Rc<dyn ContextObserver> {
        let log = log.clone();
        Rc::new(move |event: &ContextEvent| -> Resolved<()> {
            log.borrow_mut()
                .push(format!("{name}:{:?}:{}", event.event_type, event.binding.key()));
            Ok(ValueOrPromise::Value(()))
        })
    }

    #[test]
    fn notifications_are_deferred_until_drained() {
        let ctx = Context::new("app");
        let log = Rc::new(RefCell::new(Vec::new()));
        ctx.subscribe(recorder(&log, "x"));

        ctx.bind("a").unwrap().to(1u8).tag("t");
        assert!(log.borrow().is_empty());

        block_on(ctx.wait_until_pending_notifications_done()).unwrap();
        assert_eq!(*log.borrow(), vec!["x:Bind:a".to_string()]);
    }

    #[test]
    fn observers_are_snapshotted_at_event_time() {
        let ctx = Context::new("app");
        let log = Rc::new(RefCell::new(Vec::new()));
        let early = recorder(&log, "early");
        ctx.subscribe(early.clone());

        ctx.bind("a").unwrap();
        ctx.unsubscribe(&early);
        let late = recorder(&log, "late");
        ctx.subscribe(late);

        block_on(ctx.wait_until_pending_notifications_done()).unwrap();
        assert_eq!(*log.borrow(), vec!["early:Bind:a".to_string()]);
    }

    #[test]
    fn child_forwards_unshadowed_parent_events() {
        let parent = Context::new("parent");
        let child = Context::with_parent(&parent, "child");
        let log = Rc::new(RefCell::new(Vec::new()));
        child.subscribe(recorder(&log, "child"));

        child.bind("shadowed").unwrap();
        block_on(child.wait_until_pending_notifications_done()).unwrap();
        log.borrow_mut().clear();

        parent.bind("shadowed").unwrap();
        parent.bind("visible").unwrap();
        block_on(child.wait_until_pending_notifications_done()).unwrap();
        assert_eq!(*log.borrow(), vec!["child:Bind:visible".to_string()]);
    }

    #[test]
    fn closed_children_stop_hearing_from_the_parent() {
        let parent = Context::new("parent");
        let child = Context::with_parent(&parent, "child");
        let log = Rc::new(RefCell::new(Vec::new()));
        child.subscribe(recorder(&log, "child"));
        assert!(child.0.subscriptions.has_parent_listener());

        parent.bind("queued").unwrap();
        child.close();
        assert!(!child.0.subscriptions.has_parent_listener());
        assert_eq!(child.observer_count(), 0);

        parent.bind("later").unwrap();
        block_on(child.wait_until_pending_notifications_done()).unwrap();
        assert!(log.borrow().is_empty(), "{:?}", log.borrow());
        assert!(child.find_binding("later").is_some());
    }

    #[test]
    fn observer_errors_reach_the_nearest_error_listener() {
        let parent = Context::new("parent");
        let child = Context::with_parent(&parent, "child");
        let failing: Rc<dyn ContextObserver> =
            Rc::new(|_: &ContextEvent| -> Resolved<()> { Err(ContextError::other("observer failed")) });
        child.subscribe(failing);

        child.bind("a").unwrap();
        let err = block_on(child.wait_until_pending_notifications_done()).unwrap_err();
        assert!(matches!(err, ContextError::UnhandledObserverError { ref context, .. } if context == "child"));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        parent.on_error(move |err| sink.borrow_mut().push(err.to_string()));
        child.bind("b").unwrap();
        block_on(child.wait_until_pending_notifications_done()).unwrap();
        assert_eq!(*seen.borrow(), vec!["observer failed".to_string()]);
    }

    #[test]
    fn subscription_handle_unsubscribes_once() {
        let ctx = Context::new("app");
        let log = Rc::new(RefCell::new(Vec::new()));
        let observer = recorder(&log, "x");
        let subscription = ctx.subscribe(observer.clone());
        assert!(ctx.is_subscribed(&observer));
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert!(subscription.closed());
        assert!(!ctx.is_subscribed(&observer));
    }
}
