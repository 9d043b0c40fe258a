//! Constructor and property injection.
//!
//! Every injected slot is resolved with its own fork of the session. The result
//! stays synchronous if every slot is, otherwise all slots are awaited together.

use std::{any::type_name, rc::Rc};

use crate::{
    binding::ResolutionOptions,
    context::Context,
    errors::ContextError,
    factories::ClassConstructor,
    injection::{BindingSelector, Injection, InjectionMember},
    resolution_session::ResolutionSession,
    types::Instance,
    value_promise::{resolve_list, Resolved, ValueOrPromise},
    view::ContextView,
};

pub mod getter;
pub mod inject;

/// Creates an instance of `class`: resolve constructor arguments, construct,
/// resolve properties, assign them
pub fn instantiate_class(
    class: &ClassConstructor,
    ctx: &Context,
    session: Option<&ResolutionSession>,
    non_injected_args: Vec<Instance>,
) -> Resolved<Instance> {
    tracing::debug!(class = class.name(), context = ctx.name(), "Instantiating class");
    let args = resolve_injected_arguments(class, ctx, session, non_injected_args)?;

    let class = class.clone();
    let ctx = ctx.clone();
    let session = session.cloned();
    args.then(move |args| {
        let object = class
            .construct(InjectedArgs::new(class.name(), args))
            .map_err(ContextError::from_dyn)?;
        let properties = resolve_injected_properties(&class, &ctx, session.as_ref())?;
        properties.map(move |properties| {
            let mut object = object;
            for (name, value) in properties {
                class
                    .assign(&mut *object, &name, value)
                    .map_err(ContextError::from_dyn)?;
            }
            class.finish(object)
        })
    })
}

/// Resolves the constructor arguments of `class`.
///
/// Slots without an injection take the next value of `non_injected_args`; a slot
/// with neither fails with [ContextError::Injection].
pub fn resolve_injected_arguments(
    class: &ClassConstructor,
    ctx: &Context,
    session: Option<&ResolutionSession>,
    non_injected_args: Vec<Instance>,
) -> Resolved<Vec<Option<Instance>>> {
    let mut extra_args = non_injected_args.into_iter();
    let mut slots = Vec::new();

    for (index, parameter) in class.parameters().into_iter().enumerate() {
        let slot = match parameter {
            Some(injection) => {
                let injection = injection.at(class.name(), InjectionMember::Constructor(index));
                let session = ResolutionSession::fork_or_new(session);
                resolve_injection(ctx, Rc::new(injection), Some(&session))
            }
            None => match extra_args.next() {
                Some(value) => Ok(ValueOrPromise::Value(Some(value))),
                None => {
                    let target = format!("{}.constructor[{index}]", class.name());
                    return Err(ContextError::Injection {
                        message: format!(
                            "The argument '{target}' is not decorated for dependency injection but no value was supplied"
                        ),
                        target,
                    });
                }
            },
        };
        slots.push(slot);
    }

    resolve_list(slots)
}

/// Resolves the injected properties of `class` as `(name, value)` pairs
pub fn resolve_injected_properties(
    class: &ClassConstructor,
    ctx: &Context,
    session: Option<&ResolutionSession>,
) -> Resolved<Vec<(String, Option<Instance>)>> {
    let slots = class.properties().into_iter().map(|(name, injection)| {
        let injection = injection.at(class.name(), InjectionMember::Property(name.to_string()));
        let session = ResolutionSession::fork_or_new(session);
        let name = name.to_string();
        resolve_injection(ctx, Rc::new(injection), Some(&session))?.map(move |value| Ok((name, value)))
    });
    resolve_list(slots)
}

/// Resolves a single injection inside its own session frame.
///
/// Custom resolvers take precedence. Keys resolve through the context, filters
/// through a [ContextView] sorted by the injection's comparator.
pub fn resolve_injection(
    ctx: &Context,
    injection: Rc<Injection>,
    session: Option<&ResolutionSession>,
) -> Resolved<Option<Instance>> {
    ResolutionSession::run_with_injection(
        |session| {
            if let Some(resolve) = &injection.resolve {
                return resolve(ctx, &injection, session);
            }
            match &injection.selector {
                Some(BindingSelector::Key(key)) => ctx.get_value_or_promise(
                    key.as_str(),
                    ResolutionOptions {
                        session: Some(session.clone()),
                        optional: injection.metadata.optional,
                        as_proxy_with_interceptors: injection.metadata.as_proxy_with_interceptors,
                    },
                ),
                Some(BindingSelector::Filter(_)) => resolve_values_by_filter(ctx, &injection, session),
                None => Err(ContextError::Injection {
                    target: injection.target_name(),
                    message: "The injection has neither a binding selector nor a resolver".to_string(),
                }),
            }
        },
        injection.clone(),
        session,
    )
}

/// Resolves every binding matching the injection's filter into a `Vec<Instance>`
pub(crate) fn resolve_values_by_filter(
    ctx: &Context,
    injection: &Injection,
    session: &ResolutionSession,
) -> Resolved<Option<Instance>> {
    let Some(filter) = injection.filter() else {
        return Err(ContextError::Injection {
            target: injection.target_name(),
            message: "A binding filter is required".to_string(),
        });
    };
    let view = ContextView::new(ctx, filter.clone(), injection.metadata.binding_comparator.clone());
    view.resolve(Some(session))?
        .map(|values| Ok(Some(Instance::new(values))))
}

/// Resolved constructor arguments, handed to [crate::Injectable::construct]
#[derive(Debug, Clone)]
pub struct InjectedArgs {
    class: &'static str,
    values: Vec<Option<Instance>>,
}

impl InjectedArgs {
    pub fn new(class: &'static str, values: Vec<Option<Instance>>) -> Self {
        InjectedArgs { class, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instance> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// The argument at `index`, failing if it is absent
    pub fn instance(&self, index: usize) -> Result<Instance, ContextError> {
        self.get(index).cloned().ok_or_else(|| ContextError::Injection {
            target: format!("{}.constructor[{index}]", self.class),
            message: "The argument resolved to no value".to_string(),
        })
    }

    pub fn required<T: 'static>(&self, index: usize) -> Result<Rc<T>, ContextError> {
        downcast(&self.instance(index)?)
    }

    pub fn optional<T: 'static>(&self, index: usize) -> Result<Option<Rc<T>>, ContextError> {
        self.get(index).map(downcast).transpose()
    }
}

pub(crate) fn downcast<T: 'static>(instance: &Instance) -> Result<Rc<T>, ContextError> {
    instance
        .downcast::<T>()
        .map_err(|actual_type| ContextError::DowncastFailed {
            required_type: type_name::<T>(),
            actual_type,
        })
}
