use std::{cell::RefCell, fmt, rc::Rc};

use serde_json::{json, Value};

use crate::{
    binding::Binding,
    context::Context,
    errors::{ContextError, ResolutionError, ResolutionErrorKind},
    injection::Injection,
    value_promise::{Resolved, ValueOrPromise},
};

/// A frame of a [ResolutionSession]
#[derive(Clone)]
pub enum ResolutionElement {
    Binding(Binding),
    Injection(Rc<Injection>),
}

impl ResolutionElement {
    /// `key` for bindings, `@Target.member` for injections
    pub fn describe(&self) -> String {
        match self {
            ResolutionElement::Binding(binding) => binding.key().to_string(),
            ResolutionElement::Injection(injection) => format!("@{}", injection.target_name()),
        }
    }
}

impl fmt::Debug for ResolutionElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Stack of the bindings and injections currently being resolved.
///
/// Used to detect circular dependencies and to describe where a failure happened.
/// Cloning a session shares its stack; [ResolutionSession::fork] copies it.
#[derive(Clone, Default)]
pub struct ResolutionSession {
    stack: Rc<RefCell<Vec<ResolutionElement>>>,
}

impl ResolutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent session starting with the same frames
    pub fn fork(&self) -> Self {
        ResolutionSession {
            stack: Rc::new(RefCell::new(self.stack.borrow().clone())),
        }
    }

    /// Forks `session` if given, starts a new one otherwise
    pub fn fork_or_new(session: Option<&ResolutionSession>) -> Self {
        session.map(Self::fork).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.stack.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.borrow().is_empty()
    }

    pub fn elements(&self) -> Vec<ResolutionElement> {
        self.stack.borrow().clone()
    }

    /// Pushes a binding frame, failing if the binding key is already on the stack.
    /// `ctx` is the context the binding is resolved for.
    pub fn push_binding(&self, binding: &Binding, ctx: &Context) -> Result<(), ContextError> {
        let cycle = self.stack.borrow().iter().any(|element| {
            matches!(element, ResolutionElement::Binding(b) if b.key() == binding.key())
        });
        if cycle {
            let path = format!("{} --> {}", self.get_resolution_path(), binding.key());
            return Err(ResolutionError {
                kind: ResolutionErrorKind::CircularDependency,
                message: format!("Circular dependency detected: {path}"),
                context: ctx.name().to_string(),
                binding: Some(binding.key().to_string()),
                resolution_path: path,
            }
            .into());
        }
        tracing::trace!(key = binding.key(), depth = self.len(), "Enter binding");
        self.stack
            .borrow_mut()
            .push(ResolutionElement::Binding(binding.clone()));
        Ok(())
    }

    pub fn pop_binding(&self) -> Result<Binding, ContextError> {
        let mut stack = self.stack.borrow_mut();
        match stack.pop() {
            Some(ResolutionElement::Binding(binding)) => {
                tracing::trace!(key = binding.key(), depth = stack.len(), "Exit binding");
                Ok(binding)
            }
            Some(element) => {
                stack.push(element);
                Err(ContextError::InvalidSessionState(
                    "The top element must be a binding".to_string(),
                ))
            }
            None => Err(ContextError::InvalidSessionState(
                "The session has no frames to pop".to_string(),
            )),
        }
    }

    pub fn push_injection(&self, injection: Rc<Injection>) {
        tracing::trace!(target_name = %injection.target_name(), depth = self.len(), "Enter injection");
        self.stack
            .borrow_mut()
            .push(ResolutionElement::Injection(injection));
    }

    pub fn pop_injection(&self) -> Result<Rc<Injection>, ContextError> {
        let mut stack = self.stack.borrow_mut();
        match stack.pop() {
            Some(ResolutionElement::Injection(injection)) => Ok(injection),
            Some(element) => {
                stack.push(element);
                Err(ContextError::InvalidSessionState(
                    "The top element must be an injection".to_string(),
                ))
            }
            None => Err(ContextError::InvalidSessionState(
                "The session has no frames to pop".to_string(),
            )),
        }
    }

    /// Innermost binding being resolved
    pub fn current_binding(&self) -> Option<Binding> {
        self.stack.borrow().iter().rev().find_map(|element| match element {
            ResolutionElement::Binding(binding) => Some(binding.clone()),
            ResolutionElement::Injection(_) => None,
        })
    }

    /// Innermost injection being resolved
    pub fn current_injection(&self) -> Option<Rc<Injection>> {
        self.stack.borrow().iter().rev().find_map(|element| match element {
            ResolutionElement::Injection(injection) => Some(injection.clone()),
            ResolutionElement::Binding(_) => None,
        })
    }

    pub fn binding_stack(&self) -> Vec<Binding> {
        self.stack
            .borrow()
            .iter()
            .filter_map(|element| match element {
                ResolutionElement::Binding(binding) => Some(binding.clone()),
                ResolutionElement::Injection(_) => None,
            })
            .collect()
    }

    pub fn injection_stack(&self) -> Vec<Rc<Injection>> {
        self.stack
            .borrow()
            .iter()
            .filter_map(|element| match element {
                ResolutionElement::Injection(injection) => Some(injection.clone()),
                ResolutionElement::Binding(_) => None,
            })
            .collect()
    }

    /// Renders the stack as `a --> @Class.constructor[0] --> b`
    pub fn get_resolution_path(&self) -> String {
        self.stack
            .borrow()
            .iter()
            .map(ResolutionElement::describe)
            .collect::<Vec<_>>()
            .join(" --> ")
    }

    pub fn describe_injection(injection: &Injection) -> Value {
        json!({
            "targetName": injection.target_name(),
            "bindingSelector": injection.describe_selector(),
            "metadata": {
                "decorator": injection.metadata.decorator,
                "optional": injection.metadata.optional,
                "asProxyWithInterceptors": injection.metadata.as_proxy_with_interceptors,
            },
        })
    }

    /// Runs `action` with `binding` pushed on the session.
    ///
    /// The frame is popped when the action fails, when its result is ready, and
    /// when a pending result settles or is dropped.
    pub fn run_with_binding<T, F>(
        action: F,
        binding: &Binding,
        ctx: &Context,
        session: Option<&ResolutionSession>,
    ) -> Resolved<T>
    where
        T: 'static,
        F: FnOnce(&ResolutionSession) -> Resolved<T>,
    {
        let session = session.cloned().unwrap_or_default();
        session.push_binding(binding, ctx)?;
        let frame = FrameGuard::new(session.clone(), FrameKind::Binding);
        frame.bracket(action(&session))
    }

    /// Runs `action` with `injection` pushed on the session, see [ResolutionSession::run_with_binding]
    pub fn run_with_injection<T, F>(
        action: F,
        injection: Rc<Injection>,
        session: Option<&ResolutionSession>,
    ) -> Resolved<T>
    where
        T: 'static,
        F: FnOnce(&ResolutionSession) -> Resolved<T>,
    {
        let session = session.cloned().unwrap_or_default();
        session.push_injection(injection);
        let frame = FrameGuard::new(session.clone(), FrameKind::Injection);
        frame.bracket(action(&session))
    }
}

impl fmt::Debug for ResolutionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolutionSession")
            .field(&self.get_resolution_path())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum FrameKind {
    Binding,
    Injection,
}

/// Pops one frame exactly once, either explicitly or on drop
struct FrameGuard {
    session: ResolutionSession,
    kind: FrameKind,
    armed: bool,
}

impl FrameGuard {
    fn new(session: ResolutionSession, kind: FrameKind) -> Self {
        FrameGuard {
            session,
            kind,
            armed: true,
        }
    }

    fn bracket<T: 'static>(self, result: Resolved<T>) -> Resolved<T> {
        match result? {
            ValueOrPromise::Value(value) => {
                self.finish()?;
                Ok(ValueOrPromise::Value(value))
            }
            ValueOrPromise::Promise(pending) => Ok(ValueOrPromise::from_future(async move {
                let result = pending.await;
                self.finish()?;
                result
            })),
        }
    }

    fn finish(mut self) -> Result<(), ContextError> {
        self.armed = false;
        self.pop()
    }

    fn pop(&self) -> Result<(), ContextError> {
        match self.kind {
            FrameKind::Binding => self.session.pop_binding().map(drop),
            FrameKind::Injection => self.session.pop_injection().map(drop),
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.pop() {
            tracing::error!(kind = ?self.kind, %err, "Failed to pop resolution frame");
        }
    }
}
