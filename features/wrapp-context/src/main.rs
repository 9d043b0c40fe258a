use std::rc::Rc;

use wrapp_context::{
    inject, register_interceptor, BindingScope, Context, ContextBuilder, DynError, InjectedArgs,
    Injectable, Injection, InterceptionProxy, Interceptable, Interceptor, InterceptorBindingOptions,
    Instance, ResolutionOptions, Resolved, ValueOrPromise,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let app = ContextBuilder::new()
        .name("app")
        .scope(BindingScope::Application)
        .build();
    app.bind("greeting.prefix").unwrap().to("Hello".to_string());
    app.bind("greeter")
        .unwrap()
        .to_class::<Greeter>()
        .in_scope(BindingScope::Singleton);
    register_interceptor(
        &app,
        Interceptor::from_fn("log", |invocation, next| {
            tracing::info!(method = invocation.method_name(), "before");
            let method = invocation.method_name().to_string();
            next.call()?.map(move |value| {
                tracing::info!(method, "after");
                Ok(value)
            })
        }),
        InterceptorBindingOptions {
            global: Some(true),
            ..Default::default()
        },
    )
    .unwrap();

    let request = Context::with_parent(&app, "request");
    request.bind("user").unwrap().to("John".to_string());

    let proxy = request
        .get_sync_with("greeter", ResolutionOptions::default().as_proxy())
        .unwrap()
        .unwrap()
        .downcast::<InterceptionProxy>()
        .unwrap();
    let user = request.get_sync("user").unwrap();
    let greeting = futures::executor::block_on(proxy.invoke_as::<String>("greet", vec![user])).unwrap();

    println!("{greeting}");
    println!("{:#}", app.inspect(false));
}

struct Greeter {
    prefix: Rc<String>,
}

impl Injectable for Greeter {
    fn parameters() -> Vec<Option<Injection>> {
        vec![Some(inject("greeting.prefix"))]
    }

    fn construct(args: InjectedArgs) -> Result<Self, DynError> {
        Ok(Greeter {
            prefix: args.required(0)?,
        })
    }

    fn into_instance(self) -> Instance {
        Instance::interceptable(self)
    }
}

impl Interceptable for Greeter {
    fn methods(&self) -> &'static [&'static str] {
        &["greet"]
    }

    fn invoke_method(&self, _: &str, args: &[Instance]) -> Resolved<Instance> {
        let name = args
            .first()
            .and_then(|name| name.downcast::<String>().ok())
            .map_or_else(|| "stranger".to_string(), |name| name.to_string());
        Ok(ValueOrPromise::Value(Instance::new(format!("{}, {name}!", self.prefix))))
    }
}
