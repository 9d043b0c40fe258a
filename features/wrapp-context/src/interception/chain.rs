use std::rc::Rc;

use crate::{
    binding::ResolutionOptions,
    errors::ContextError,
    interception::{InterceptorFunction, Interceptor, InvocationContext},
    resolver::downcast,
    types::Instance,
    value_promise::{Resolved, ValueOrPromise},
};

/// Runs a list of interceptors as nested middleware.
///
/// Each interceptor receives a [Next] that continues with the rest of the list.
/// Interceptors given by key are resolved from the invocation context when their
/// turn comes.
pub struct GenericInterceptorChain {
    invocation: InvocationContext,
    interceptors: Rc<[Interceptor]>,
}

impl GenericInterceptorChain {
    pub fn new(invocation: InvocationContext, interceptors: Vec<Interceptor>) -> Self {
        GenericInterceptorChain {
            invocation,
            interceptors: interceptors.into(),
        }
    }

    pub fn invoke_interceptors(&self) -> Resolved<Instance> {
        Next {
            invocation: self.invocation.clone(),
            interceptors: self.interceptors.clone(),
            index: 0,
        }
        .call()
    }
}

/// Continuation of an interceptor chain
pub struct Next {
    invocation: InvocationContext,
    interceptors: Rc<[Interceptor]>,
    index: usize,
}

impl Next {
    /// Runs the rest of the chain. Past its end the result is `()`.
    pub fn call(self) -> Resolved<Instance> {
        let Some(interceptor) = self.interceptors.get(self.index).cloned() else {
            return Ok(ValueOrPromise::Value(Instance::new(())));
        };
        let next = Next {
            invocation: self.invocation.clone(),
            interceptors: self.interceptors.clone(),
            index: self.index + 1,
        };
        let invocation = self.invocation;
        match interceptor {
            Interceptor::Function(func) => func.call(invocation, next),
            Interceptor::Key(key) => {
                tracing::trace!(key, "Resolving interceptor");
                let resolved = invocation
                    .context()
                    .get_value_or_promise(key.as_str(), ResolutionOptions::default())?;
                resolved.then(move |value| {
                    let func = as_interceptor_function(&key, value)?;
                    func.call(invocation, next)
                })
            }
        }
    }
}

fn as_interceptor_function(key: &str, value: Option<Instance>) -> Result<InterceptorFunction, ContextError> {
    let invalid = || ContextError::InvalidInterceptor(key.to_string());
    let value = value.ok_or_else(invalid)?;
    match downcast::<Interceptor>(&value).map_err(|_| invalid())?.as_ref() {
        Interceptor::Function(func) => Ok(func.clone()),
        Interceptor::Key(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, future::IntoFuture};

    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{context::Context, interception::Interceptable};

    struct Nothing;

    impl Interceptable for Nothing {
        fn methods(&self) -> &'static [&'static str] {
            &[]
        }

        fn invoke_method(&self, _: &str, _: &[Instance]) -> Resolved<Instance> {
            Ok(ValueOrPromise::Value(Instance::new(())))
        }
    }

    fn tracer(log: &Rc<RefCell<Vec<String>>>, name: &'static str) -> Interceptor {
        let log = log.clone();
        Interceptor::from_fn(name, move |_, next| {
            log.borrow_mut().push(format!("{name}:before"));
            let log = log.clone();
            next.call()?.map(move |value| {
                log.borrow_mut().push(format!("{name}:after"));
                Ok(value)
            })
        })
    }

    #[test]
    fn runs_as_nested_middleware_with_keyed_interceptors() {
        let ctx = Context::new("app");
        let log = Rc::new(RefCell::new(Vec::new()));
        ctx.bind("interceptors.inner").unwrap().to(tracer(&log, "inner"));

        let invocation = InvocationContext::new(&ctx, Rc::new(Nothing), "m", Vec::new(), None);
        let chain = GenericInterceptorChain::new(
            invocation,
            vec![tracer(&log, "outer"), Interceptor::key("interceptors.inner")],
        );
        let result = chain.invoke_interceptors().unwrap();
        assert!(block_on(result.into_future()).unwrap().is::<()>());
        assert_eq!(
            *log.borrow(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[test]
    fn async_interceptors_make_the_chain_async() {
        let ctx = Context::new("app");
        let invocation = InvocationContext::new(&ctx, Rc::new(Nothing), "m", Vec::new(), None);
        let delayed = Interceptor::from_fn("delayed", |_, next| {
            Ok(ValueOrPromise::from_future(async move {
                futures::future::ready(()).await;
                next.call()?.await
            }))
        });
        let result = GenericInterceptorChain::new(invocation, vec![delayed]).invoke_interceptors().unwrap();
        assert!(result.is_promise());
        assert!(block_on(result.into_future()).unwrap().is::<()>());
    }

    #[test]
    fn keys_must_resolve_to_interceptors() {
        let ctx = Context::new("app");
        ctx.bind("interceptors.bogus").unwrap().to(1u8);
        let invocation = InvocationContext::new(&ctx, Rc::new(Nothing), "m", Vec::new(), None);
        let err = GenericInterceptorChain::new(invocation, vec![Interceptor::key("interceptors.bogus")])
            .invoke_interceptors()
            .err()
            .unwrap();
        assert!(matches!(err, ContextError::InvalidInterceptor(ref key) if key == "interceptors.bogus"));
    }
}
