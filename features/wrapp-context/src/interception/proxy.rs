use std::{fmt, rc::Rc};

use futures::{future::LocalBoxFuture, FutureExt};

use crate::{
    context::Context,
    errors::ContextError,
    interception::{invoke_method_with_interceptors, Interceptable},
    resolution_session::ResolutionSession,
    resolver::downcast,
    types::Instance,
};

/// Invocation source type of calls made through a proxy
pub const PROXY_SOURCE: &str = "proxy";

/// Wraps an interceptable value so that method calls run through its interceptors.
///
/// Every call is asynchronous, whether or not the target method or any of the
/// interceptors are. State of the target is reached through [InterceptionProxy::target]
/// without interception.
#[derive(Clone)]
pub struct InterceptionProxy {
    target: Instance,
    interceptable: Rc<dyn Interceptable>,
    context: Context,
    /// Session the proxy was resolved in, for diagnostics
    session: Option<ResolutionSession>,
}

impl InterceptionProxy {
    pub fn new<T: Interceptable>(target: T, ctx: &Context) -> Self {
        let target = Rc::new(target);
        InterceptionProxy {
            interceptable: target.clone(),
            target: Instance::from_rc(target),
            context: ctx.clone(),
            session: None,
        }
    }

    /// Proxies a resolved value. Fails if it was not created with [Instance::interceptable].
    pub fn from_instance(
        value: &Instance,
        ctx: &Context,
        session: Option<ResolutionSession>,
    ) -> Result<Self, ContextError> {
        let interceptable = value
            .as_interceptable()
            .ok_or(ContextError::NotInterceptable(value.info.type_name))?;
        Ok(InterceptionProxy {
            target: value.clone(),
            interceptable,
            context: ctx.clone(),
            session: session.map(|session| session.fork()),
        })
    }

    pub fn target(&self) -> &Instance {
        &self.target
    }

    pub fn target_as<T: 'static>(&self) -> Result<Rc<T>, ContextError> {
        downcast(&self.target)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Path of the resolution that produced the proxy, empty if unknown
    pub fn resolution_path(&self) -> String {
        self.session
            .as_ref()
            .map(ResolutionSession::get_resolution_path)
            .unwrap_or_default()
    }

    /// Calls `method` through the interceptor chain
    pub fn invoke(
        &self,
        method: &str,
        args: Vec<Instance>,
    ) -> LocalBoxFuture<'static, Result<Instance, ContextError>> {
        tracing::trace!(
            target_name = self.interceptable.class_name(),
            method,
            resolution_path = self.resolution_path(),
            "Invoking proxied method"
        );
        let result = invoke_method_with_interceptors(
            &self.context,
            self.interceptable.clone(),
            method,
            args,
            Some(PROXY_SOURCE),
        );
        async move { result?.await }.boxed_local()
    }

    /// Calls `method` and downcasts its result
    pub async fn invoke_as<T: 'static>(&self, method: &str, args: Vec<Instance>) -> Result<Rc<T>, ContextError> {
        let value = self.invoke(method, args).await?;
        downcast(&value)
    }
}

impl fmt::Debug for InterceptionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionProxy")
            .field("target", &self.interceptable.class_name())
            .field("context", &self.context.name())
            .finish()
    }
}
