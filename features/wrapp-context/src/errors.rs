use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::{context::Context, resolution_session::ResolutionSession, types::DynError};

/// Errors raised by contexts, bindings and the resolver
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    /// Tried to replace a locked binding
    #[error("Cannot rebind key '{0}' to a locked binding")]
    BindingAlreadyLocked(String),
    /// Tried to remove a locked binding
    #[error("Cannot unbind key '{0}' of a locked binding")]
    UnbindLocked(String),
    /// The key is empty or contains the property separator
    #[error("Invalid binding key '{key}': {reason}")]
    InvalidBindingKey { key: String, reason: &'static str },
    /// A value could not be resolved
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// Unbalanced push/pop on a resolution session
    #[error("Invalid resolution session state: {0}")]
    InvalidSessionState(String),
    /// A constructor slot could not be satisfied
    #[error("{message} (target: {target})")]
    Injection { target: String, message: String },
    /// The proxied target does not expose the invoked method
    #[error("Method '{method}' not found on target '{target}'")]
    ProxyTarget { target: String, method: String },
    /// Only instances created with [crate::Instance::interceptable] can be proxied
    #[error("Value of type '{0}' cannot be wrapped in an interception proxy")]
    NotInterceptable(&'static str),
    /// An interceptor binding resolved to something else than an interceptor
    #[error("Binding '{0}' does not resolve to an interceptor function")]
    InvalidInterceptor(String),
    /// A pending computation was handed to the constant-value API
    #[error("Binding '{0}' cannot be bound to a pending computation as a constant, use a dynamic value instead")]
    PromiseAsConstant(String),
    /// A single value was requested but several matched
    #[error("The context view has {0} values, use `values()` to access them")]
    MultipleValues(usize),

    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
    /// An observer failed and no context in the chain listens for errors
    #[error("Unhandled observer error in context '{context}': {error}")]
    UnhandledObserverError {
        context: String,
        error: Box<ContextError>,
    },
    /// Error raised by user code (factories, providers, observers, interceptors)
    #[error("{0}")]
    Other(Arc<DynError>),
}

impl ContextError {
    /// Wraps a foreign error, unwrapping it again if it already is a [ContextError]
    pub fn from_dyn(error: DynError) -> Self {
        match error.downcast::<ContextError>() {
            Ok(error) => *error,
            Err(error) => ContextError::Other(Arc::new(error)),
        }
    }

    pub fn other(error: impl Into<DynError>) -> Self {
        Self::from_dyn(error.into())
    }

    /// Kind of the resolution failure, if this is one
    pub fn resolution_kind(&self) -> Option<ResolutionErrorKind> {
        match self {
            ContextError::Resolution(err) => Some(err.kind),
            _ => None,
        }
    }

    /// `true` for failures an `optional` resolution turns into an absent value
    pub fn is_absence(&self) -> bool {
        matches!(
            self.resolution_kind(),
            Some(ResolutionErrorKind::NotBound | ResolutionErrorKind::ScopeUnsatisfied)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// No binding for the key anywhere in the chain
    NotBound,
    /// The binding exists but was never given a source
    NoValue,
    /// `get_sync` hit a pending computation
    AsyncInSync,
    /// No context in the chain carries the scope the binding requires
    ScopeUnsatisfied,
    /// The resolution context cannot see the binding's owner
    NotVisible,
    /// The binding is already being resolved further up the session
    CircularDependency,
}

/// Failure to resolve a value, carrying the resolution path for diagnostics
#[derive(Debug, Clone, Error)]
pub struct ResolutionError {
    pub kind: ResolutionErrorKind,
    pub message: String,
    pub context: String,
    pub binding: Option<String>,
    pub resolution_path: String,
}

impl ResolutionError {
    pub(crate) fn new(
        kind: ResolutionErrorKind,
        message: impl Into<String>,
        context: &Context,
        binding: Option<&str>,
        session: Option<&ResolutionSession>,
    ) -> Self {
        ResolutionError {
            kind,
            message: message.into(),
            context: context.name().to_string(),
            binding: binding.map(str::to_string),
            resolution_path: session
                .map(ResolutionSession::get_resolution_path)
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut details = Vec::new();
        if !self.context.is_empty() {
            details.push(format!("context: {}", self.context));
        }
        if let Some(binding) = &self.binding {
            details.push(format!("binding: {binding}"));
        }
        if !self.resolution_path.is_empty() {
            details.push(format!("resolutionPath: {}", self.resolution_path));
        }
        if details.is_empty() {
            return f.write_str(&self.message);
        }
        write!(f, "{} ({})", self.message, details.join(", "))
    }
}
