use std::{cell::Cell, future::IntoFuture, rc::Rc};

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use wrapp_context::{
    inject, inject_context, inject_getter, BindingScope, Context, ContextError, DynError, Getter,
    InjectedArgs, Injectable, Injection, Instance, ResolutionErrorKind, ResolutionOptions,
    ResolutionSession, ValueOrPromise,
};

fn counting(ctx: &Context, key: &str, scope: BindingScope) -> Rc<Cell<u32>> {
    let count = Rc::new(Cell::new(0));
    let produced = count.clone();
    ctx.bind(key)
        .unwrap()
        .to_dynamic_value(move |_| {
            produced.set(produced.get() + 1);
            Ok(produced.get())
        })
        .in_scope(scope);
    count
}

#[test]
fn scopes_decide_where_values_are_cached() {
    let app = Context::builder().name("app").scope(BindingScope::Application).build();
    let server = Context::builder()
        .name("server")
        .parent(&app)
        .scope(BindingScope::Server)
        .build();
    let first = Context::builder().parent(&server).scope(BindingScope::Request).build();
    let second = Context::builder().parent(&server).scope(BindingScope::Request).build();

    let transient = counting(&app, "transient", BindingScope::Transient);
    let singleton = counting(&app, "singleton", BindingScope::Singleton);
    let per_server = counting(&app, "server", BindingScope::Server);
    let per_request = counting(&app, "request", BindingScope::Request);

    for ctx in [&first, &second, &first] {
        for key in ["transient", "singleton", "server", "request"] {
            ctx.get_sync(key).unwrap();
        }
    }

    assert_eq!(transient.get(), 3);
    assert_eq!(singleton.get(), 1);
    assert_eq!(per_server.get(), 1);
    assert_eq!(per_request.get(), 2);
}

#[test]
fn closer_bindings_shadow_parent_bindings() {
    let app = Context::new("app");
    let request = Context::with_parent(&app, "request");
    app.bind("name").unwrap().to("app".to_string()).tag("named");
    app.bind("other").unwrap().to("other".to_string()).tag("named");
    request.bind("name").unwrap().to("request".to_string());

    assert_eq!(*request.get_sync_as::<String>("name").unwrap(), "request");
    assert_eq!(*app.get_sync_as::<String>("name").unwrap(), "app");
    assert!(request.get_owner_context("name").unwrap().ptr_eq(&request));

    let keys: Vec<_> = request
        .find_by_tag("named")
        .iter()
        .map(|binding| binding.key().to_string())
        .collect();
    assert_eq!(keys, vec!["other"]);
}

struct Left;

impl Injectable for Left {
    fn parameters() -> Vec<Option<Injection>> {
        vec![Some(inject("right"))]
    }

    fn construct(_: InjectedArgs) -> Result<Self, DynError> {
        Ok(Left)
    }
}

struct Right;

impl Injectable for Right {
    fn parameters() -> Vec<Option<Injection>> {
        vec![Some(inject("left"))]
    }

    fn construct(_: InjectedArgs) -> Result<Self, DynError> {
        Ok(Right)
    }
}

#[test]
fn circular_dependencies_report_the_path() {
    let ctx = Context::new("app");
    ctx.bind("left").unwrap().to_class::<Left>();
    ctx.bind("right").unwrap().to_class::<Right>();

    let err = ctx.get_sync("left").unwrap_err();
    assert_eq!(err.resolution_kind(), Some(ResolutionErrorKind::CircularDependency));
    assert!(
        err.to_string().contains(
            "left --> @Left.constructor[0] --> right --> @Right.constructor[0] --> left"
        ),
        "{err}"
    );
    let ContextError::Resolution(err) = err else {
        panic!("expected a resolution error");
    };
    assert_eq!(err.context, "app");
    assert_eq!(err.binding.as_deref(), Some("left"));
}

#[test]
fn sessions_are_balanced_after_success_and_failure() {
    let ctx = Context::new("app");
    ctx.bind("ok").unwrap().to(1u8);
    ctx.bind("failing")
        .unwrap()
        .to_dynamic_value(|_| -> Result<u8, ContextError> { Err(ContextError::other("boom")) });

    let session = ResolutionSession::new();
    let options = ResolutionOptions::default().with_session(session.clone());
    ctx.get_sync_with("ok", options.clone()).unwrap();
    assert!(session.is_empty());

    assert!(ctx.get_sync_with("failing", options).is_err());
    assert!(session.is_empty());
}

struct Report {
    title: Rc<String>,
    context: Rc<Context>,
    total: Rc<Getter>,
}

impl Injectable for Report {
    fn parameters() -> Vec<Option<Injection>> {
        vec![
            Some(inject("report.title")),
            Some(inject_context()),
            Some(inject_getter("report.total")),
        ]
    }

    fn construct(args: InjectedArgs) -> Result<Self, DynError> {
        Ok(Report {
            title: args.required(0)?,
            context: args.required(1)?,
            total: args.required(2)?,
        })
    }
}

#[test]
fn async_dependencies_make_the_class_async() {
    let app = Context::new("app");
    app.bind("report.title")
        .unwrap()
        .to_async_dynamic_value(|_| async { Ok("Sales".to_string()) });
    app.bind("report").unwrap().to_class::<Report>();
    let request = Context::with_parent(&app, "request");
    request.bind("report.total").unwrap().to(10u32);

    let pending = request
        .get_value_or_promise("report", ResolutionOptions::default())
        .unwrap();
    assert!(pending.is_promise());
    assert!(matches!(
        request.get_sync("report").unwrap_err().resolution_kind(),
        Some(ResolutionErrorKind::AsyncInSync)
    ));

    let report = block_on(pending.into_future())
        .unwrap()
        .unwrap()
        .downcast::<Report>()
        .unwrap();
    assert_eq!(*report.title, "Sales");
    assert!(report.context.ptr_eq(&request));

    let total = match report.total.get().unwrap() {
        ValueOrPromise::Value(Some(total)) => total,
        _ => panic!("expected a ready total"),
    };
    assert_eq!(*total.downcast::<u32>().unwrap(), 10);
}

#[test]
fn singleton_values_survive_child_contexts() {
    let app = Context::new("app");
    app.bind("config")
        .unwrap()
        .to_dynamic_value(|_| Ok(Instance::new(serde_json::json!({"port": 3000}))))
        .in_scope(BindingScope::Singleton);

    for name in ["a", "b"] {
        let child = Context::with_parent(&app, name);
        let port = child.get_sync("config#port").unwrap();
        assert_eq!(*port.downcast::<serde_json::Value>().unwrap(), 3000);
        child.close();
    }
    assert!(block_on(app.get("config#missing")).is_err());
}
