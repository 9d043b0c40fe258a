//! Constructors for the common kinds of [Injection].
//!
//! | helper                  | injected value                  |
//! |-------------------------|---------------------------------|
//! | [inject]                | value bound to the key          |
//! | [inject_filter]         | `Vec<Instance>` of all matches  |
//! | [inject_tag]            | `Vec<Instance>` of tagged ones  |
//! | [inject_view]           | an open [ContextView]           |
//! | [inject_context]        | the resolution [Context]        |
//! | [inject_getter]         | [Getter] for the key            |
//! | [inject_getter_by_filter] | [Getter] for all matches      |
//! | [inject_setter]         | [Setter] for the key            |
//! | [inject_binding]        | the [Binding] itself            |

use std::rc::Rc;

use crate::{
    binding::ResolutionOptions,
    binding_filter::{BindingFilter, TagFilter},
    context::Context,
    injection::{BindingSelector, Injection},
    resolution_session::ResolutionSession,
    resolver::getter::{find_or_create_binding, BindingCreationPolicy, Getter, Setter},
    types::Instance,
    value_promise::{Resolved, ValueOrPromise},
    view::ContextView,
};

/// Injects the value of `key`, which may carry a `#` property path
pub fn inject(key: impl Into<String>) -> Injection {
    Injection::new(Some(BindingSelector::Key(key.into())))
}

/// Injects the values of every binding matching `filter`
pub fn inject_filter(filter: impl Into<BindingFilter>) -> Injection {
    Injection::new(Some(BindingSelector::Filter(filter.into())))
}

pub fn inject_tag(tag: impl Into<TagFilter>) -> Injection {
    inject_filter(BindingFilter::by_tag(tag)).with_decorator("@inject.tag")
}

/// Injects a live view, sorted by the injection's comparator
pub fn inject_view(filter: impl Into<BindingFilter>) -> Injection {
    inject_filter(filter)
        .with_decorator("@inject.view")
        .with_resolver(|ctx, injection, _| {
            let filter = selector_filter(injection);
            let view = ctx.create_view(filter, injection.metadata.binding_comparator.clone());
            Ok(ValueOrPromise::Value(Some(Instance::new(view))))
        })
}

/// Injects the context the dependent is resolved in
pub fn inject_context() -> Injection {
    Injection::new(None)
        .with_decorator("@inject.context")
        .with_resolver(|ctx, _, _| Ok(ValueOrPromise::Value(Some(Instance::new(ctx.clone())))))
}

/// Injects a [Getter] resolving `key` on every call.
///
/// The getter continues a fork of the session it was injected with, so a cycle
/// through the getter is still reported.
pub fn inject_getter(key: impl Into<String>) -> Injection {
    inject(key)
        .with_decorator("@inject.getter")
        .with_resolver(|ctx, injection, session| {
            let key = injection.binding_key().unwrap_or_default().to_string();
            let options = ResolutionOptions {
                session: Some(session.fork()),
                optional: injection.metadata.optional,
                as_proxy_with_interceptors: injection.metadata.as_proxy_with_interceptors,
            };
            let ctx = ctx.clone();
            let getter: Getter = Getter::new(move || ctx.get_value_or_promise(key.as_str(), options.clone()));
            Ok(ValueOrPromise::Value(Some(Instance::new(getter))))
        })
}

/// Injects a `Getter<Vec<Instance>>` over a live view of `filter`
pub fn inject_getter_by_filter(filter: impl Into<BindingFilter>) -> Injection {
    inject_filter(filter)
        .with_decorator("@inject.getter")
        .with_resolver(|ctx, injection, session| {
            let view = ContextView::new(
                ctx,
                selector_filter(injection),
                injection.metadata.binding_comparator.clone(),
            );
            view.open();
            let getter = view.as_getter(Some(session));
            Ok(ValueOrPromise::Value(Some(Instance::new(getter))))
        })
}

/// Injects a [Setter] for `key` that binds in the resolution context when needed
pub fn inject_setter(key: impl Into<String>) -> Injection {
    inject_setter_with(key, BindingCreationPolicy::default())
}

pub fn inject_setter_with(key: impl Into<String>, policy: BindingCreationPolicy) -> Injection {
    inject(key)
        .with_decorator("@inject.setter")
        .with_resolver(move |ctx, injection, _| {
            let key = injection.binding_key().unwrap_or_default();
            Ok(ValueOrPromise::Value(Some(Instance::new(Setter::new(ctx, key, policy)))))
        })
}

/// Injects the binding of `key`, creating it in the resolution context if needed
pub fn inject_binding(key: impl Into<String>) -> Injection {
    inject_binding_with(key, BindingCreationPolicy::default())
}

pub fn inject_binding_with(key: impl Into<String>, policy: BindingCreationPolicy) -> Injection {
    inject(key)
        .with_decorator("@inject.binding")
        .with_resolver(move |ctx, injection, _| {
            let key = injection.binding_key().unwrap_or_default();
            let binding = find_or_create_binding(ctx, key, policy)?;
            Ok(ValueOrPromise::Value(Some(Instance::new(binding))))
        })
}

fn selector_filter(injection: &Injection) -> BindingFilter {
    injection.filter().cloned().unwrap_or_else(BindingFilter::all)
}

/// Resolves a single injection from `ctx` outside of any class, e.g. for method
/// parameters
pub fn resolve_standalone(
    ctx: &Context,
    injection: Injection,
    session: Option<&ResolutionSession>,
) -> Resolved<Option<Instance>> {
    super::resolve_injection(ctx, Rc::new(injection), session)
}
