use std::{cell::RefCell, rc::Rc};

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use wrapp_context::{
    inject, interception::register_interceptor_provider, register_interceptor, BindingSpec, Context,
    ContextBindings, ContextTags, DynError, InjectedArgs, Injectable, Injection, InterceptionProxy,
    Interceptable, Interceptor, InterceptorBindingOptions, Instance, Provider, ResolutionOptions,
    Resolved, ValueOrPromise,
};

type Trace = Rc<RefCell<Vec<String>>>;

fn tracer(trace: &Trace, name: &'static str) -> Interceptor {
    let trace = trace.clone();
    Interceptor::from_fn(name, move |_, next| {
        trace.borrow_mut().push(format!("{name}:before"));
        let trace = trace.clone();
        next.call()?.map(move |value| {
            trace.borrow_mut().push(format!("{name}:after"));
            Ok(value)
        })
    })
}

struct Greeter {
    trace: Trace,
}

impl Interceptable for Greeter {
    fn class_interceptors(&self) -> Vec<Interceptor> {
        vec![tracer(&self.trace, "log")]
    }

    fn method_interceptors(&self, method: &str) -> Vec<Interceptor> {
        if method != "greet" {
            return Vec::new();
        }
        let trace = self.trace.clone();
        let convert_name = Interceptor::from_fn("convertName", move |invocation, next| {
            trace.borrow_mut().push("convertName:before".to_string());
            let name = invocation.arg_as::<String>(0)?;
            invocation.set_arg(0, Instance::new(name.to_uppercase()));
            let trace = trace.clone();
            next.call()?.map(move |value| {
                trace.borrow_mut().push("convertName:after".to_string());
                Ok(value)
            })
        });
        vec![convert_name, tracer(&self.trace, "log")]
    }

    fn methods(&self) -> &'static [&'static str] {
        &["greet", "farewell"]
    }

    fn invoke_method(&self, method: &str, args: &[Instance]) -> Resolved<Instance> {
        let name = args[0].downcast::<String>().map_err(wrapp_context::ContextError::other)?;
        let text = match method {
            "greet" => format!("Hello, {name}"),
            _ => format!("Bye, {name}"),
        };
        self.trace.borrow_mut().push(text.clone());
        Ok(ValueOrPromise::Value(Instance::new(text)))
    }
}

fn proxy(ctx: &Context, key: &str) -> Rc<InterceptionProxy> {
    ctx.get_sync_with(key, ResolutionOptions::default().as_proxy())
        .unwrap()
        .unwrap()
        .downcast::<InterceptionProxy>()
        .unwrap()
}

#[test]
fn method_interceptors_run_inside_class_interceptors_once() {
    let ctx = Context::new("app");
    let trace = Trace::default();
    ctx.bind("greeter")
        .unwrap()
        .to_instance(Instance::interceptable(Greeter { trace: trace.clone() }));

    let greeting = block_on(proxy(&ctx, "greeter").invoke_as::<String>("greet", vec![Instance::new(
        "John".to_string(),
    )]))
    .unwrap();

    assert_eq!(*greeting, "Hello, JOHN");
    assert_eq!(
        *trace.borrow(),
        vec![
            "convertName:before",
            "log:before",
            "Hello, JOHN",
            "log:after",
            "convertName:after"
        ]
    );

    trace.borrow_mut().clear();
    let farewell = block_on(proxy(&ctx, "greeter").invoke_as::<String>("farewell", vec![Instance::new(
        "John".to_string(),
    )]))
    .unwrap();
    assert_eq!(*farewell, "Bye, John");
    assert_eq!(*trace.borrow(), vec!["log:before", "Bye, John", "log:after"]);
}

#[test]
fn global_interceptors_run_first_in_group_order() {
    let ctx = Context::new("app");
    let trace = Trace::default();
    ctx.bind(ContextBindings::GLOBAL_INTERCEPTOR_ORDERED_GROUPS)
        .unwrap()
        .to(vec!["auth".to_string(), "metrics".to_string()]);
    for (name, group) in [("metrics", "metrics"), ("auth", "auth")] {
        register_interceptor(
            &ctx,
            tracer(&trace, name),
            InterceptorBindingOptions {
                group: Some(group.to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    }
    let local = register_interceptor(&ctx, tracer(&trace, "local"), Default::default()).unwrap();
    assert!(!local.has_tag(ContextTags::GLOBAL_INTERCEPTOR));
    ctx.bind("greeter")
        .unwrap()
        .to_instance(Instance::interceptable(Greeter { trace: trace.clone() }));

    block_on(proxy(&ctx, "greeter").invoke("farewell", vec![Instance::new("Jane".to_string())]))
        .unwrap();
    assert_eq!(
        *trace.borrow(),
        vec![
            "auth:before",
            "metrics:before",
            "log:before",
            "Bye, Jane",
            "log:after",
            "metrics:after",
            "auth:after"
        ]
    );
}

struct AuditProvider {
    prefix: Rc<String>,
    trace: Rc<Trace>,
}

impl Injectable for AuditProvider {
    fn parameters() -> Vec<Option<Injection>> {
        vec![Some(inject("audit.prefix")), Some(inject("audit.trace"))]
    }

    fn binding_spec() -> BindingSpec {
        BindingSpec::default().tag(ContextTags::GLOBAL_INTERCEPTOR)
    }

    fn construct(args: InjectedArgs) -> Result<Self, DynError> {
        Ok(AuditProvider {
            prefix: args.required(0)?,
            trace: args.required(1)?,
        })
    }
}

impl Provider for AuditProvider {
    type Value = Interceptor;

    fn value(&self) -> Resolved<Interceptor> {
        let prefix = self.prefix.clone();
        let trace = self.trace.clone();
        Ok(ValueOrPromise::Value(Interceptor::from_fn("audit", move |invocation, next| {
            trace
                .borrow_mut()
                .push(format!("{prefix}{}", invocation.target_name()));
            next.call()
        })))
    }
}

#[test]
fn provided_interceptors_are_resolved_per_invocation() {
    let ctx = Context::new("app");
    let trace = Trace::default();
    ctx.bind("audit.prefix").unwrap().to("audit:".to_string());
    ctx.bind("audit.trace").unwrap().to(trace.clone());
    let binding = register_interceptor_provider::<AuditProvider>(&ctx, Default::default()).unwrap();
    assert_eq!(binding.key(), "globalInterceptors.AuditProvider");

    ctx.bind("greeter")
        .unwrap()
        .to_instance(Instance::interceptable(Greeter { trace: trace.clone() }));
    let greeter = proxy(&ctx, "greeter");
    block_on(greeter.invoke("farewell", vec![Instance::new("Ann".to_string())])).unwrap();
    ctx.bind("audit.prefix").unwrap().to("again:".to_string());
    block_on(greeter.invoke("farewell", vec![Instance::new("Ann".to_string())])).unwrap();

    let audits: Vec<_> = trace
        .borrow()
        .iter()
        .filter(|entry| entry.contains("Greeter.prototype"))
        .cloned()
        .collect();
    assert_eq!(
        audits,
        vec!["audit:Greeter.prototype.farewell", "again:Greeter.prototype.farewell"]
    );
}

#[test]
fn invocation_contexts_are_closed_after_the_call() {
    let ctx = Context::new("app");
    let seen = Rc::new(RefCell::new(None));
    let captured = seen.clone();
    register_interceptor(
        &ctx,
        Interceptor::from_fn("capture", move |invocation, next| {
            *captured.borrow_mut() = Some(invocation.context().clone());
            next.call()
        }),
        InterceptorBindingOptions {
            global: Some(true),
            ..Default::default()
        },
    )
    .unwrap();
    ctx.bind("greeter").unwrap().to_instance(Instance::interceptable(Greeter {
        trace: Trace::default(),
    }));

    block_on(proxy(&ctx, "greeter").invoke("greet", vec![Instance::new("Bo".to_string())])).unwrap();
    let invocation_ctx = seen.borrow().clone().unwrap();
    assert!(invocation_ctx.is_closed());
    assert!(invocation_ctx.name().starts_with("invocation"));
}
