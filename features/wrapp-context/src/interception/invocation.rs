use std::{cell::RefCell, fmt, rc::Rc};

use serde_json::Value;

use crate::{
    binding::{Binding, ResolutionOptions},
    binding_filter::compare_bindings_by_tag,
    builder::ContextBuilder,
    context::Context,
    errors::ContextError,
    interception::{merge_interceptors, Interceptable, Interceptor},
    keys::{ContextBindings, ContextTags},
    resolver::downcast,
    types::Instance,
    value_promise::Resolved,
};

/// A single method call travelling through an interceptor chain.
///
/// Carries its own child context of the context the call was made from, so
/// interceptors can bind per-invocation values. Arguments can be replaced by
/// interceptors before the target method sees them.
#[derive(Clone)]
pub struct InvocationContext(Rc<InvocationInner>);

struct InvocationInner {
    context: Context,
    target: Rc<dyn Interceptable>,
    method_name: String,
    args: RefCell<Vec<Instance>>,
    /// Type of what triggered the invocation, e.g. `proxy` or `route`
    source: Option<String>,
}

impl InvocationContext {
    pub fn new(
        parent: &Context,
        target: Rc<dyn Interceptable>,
        method_name: impl Into<String>,
        args: Vec<Instance>,
        source: Option<&str>,
    ) -> Self {
        let context = ContextBuilder::new()
            .parent(parent)
            .name_prefix("invocation")
            .build();
        InvocationContext(Rc::new(InvocationInner {
            context,
            target,
            method_name: method_name.into(),
            args: RefCell::new(args),
            source: source.map(str::to_string),
        }))
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn target(&self) -> Rc<dyn Interceptable> {
        self.0.target.clone()
    }

    pub fn method_name(&self) -> &str {
        &self.0.method_name
    }

    /// `Class.prototype.method`
    pub fn target_name(&self) -> String {
        format!("{}.prototype.{}", self.0.target.class_name(), self.0.method_name)
    }

    pub fn source(&self) -> Option<&str> {
        self.0.source.as_deref()
    }

    pub fn args(&self) -> Vec<Instance> {
        self.0.args.borrow().clone()
    }

    pub fn arg(&self, index: usize) -> Option<Instance> {
        self.0.args.borrow().get(index).cloned()
    }

    /// Typed access to an argument
    pub fn arg_as<T: 'static>(&self, index: usize) -> Result<Rc<T>, ContextError> {
        let arg = self.arg(index).ok_or_else(|| ContextError::Injection {
            target: format!("{}[{index}]", self.target_name()),
            message: "The invocation has no such argument".to_string(),
        })?;
        downcast(&arg)
    }

    /// Replaces the argument at `index`, appending if it is one past the end
    pub fn set_arg(&self, index: usize, value: Instance) {
        let mut args = self.0.args.borrow_mut();
        match args.get_mut(index) {
            Some(arg) => *arg = value,
            None => args.push(value),
        }
    }

    pub fn set_args(&self, args: Vec<Instance>) {
        *self.0.args.borrow_mut() = args;
    }

    pub fn assert_method_exists(&self) -> Result<(), ContextError> {
        if self.0.target.methods().contains(&self.method_name()) {
            return Ok(());
        }
        Err(ContextError::ProxyTarget {
            target: self.0.target.class_name().to_string(),
            method: self.0.method_name.clone(),
        })
    }

    /// Keys of the global interceptors applying to this invocation, in group order
    pub fn get_global_interceptor_binding_keys(&self) -> Result<Vec<String>, ContextError> {
        let mut bindings: Vec<Binding> = self
            .0
            .context
            .find_by_tag(ContextTags::GLOBAL_INTERCEPTOR)
            .into_iter()
            .filter(|binding| self.applies_to(binding))
            .collect();

        let ordered_groups = self
            .0
            .context
            .get_sync_with(
                ContextBindings::GLOBAL_INTERCEPTOR_ORDERED_GROUPS,
                ResolutionOptions::optional(),
            )?
            .map(|groups| downcast::<Vec<String>>(&groups))
            .transpose()?
            .map(|groups| groups.as_ref().clone())
            .unwrap_or_default();
        let compare = compare_bindings_by_tag(ContextTags::GLOBAL_INTERCEPTOR_GROUP, ordered_groups);
        bindings.sort_by(|a, b| compare(a, b));

        Ok(bindings.iter().map(|b| b.key().to_string()).collect())
    }

    /// Bindings without a source tag apply to every invocation, as do all global
    /// interceptors to invocations of unknown source
    fn applies_to(&self, binding: &Binding) -> bool {
        let Some(source) = self.source() else {
            return true;
        };
        match binding.tag_map().get(ContextTags::GLOBAL_INTERCEPTOR_SOURCE) {
            None => true,
            Some(Value::String(allowed)) => allowed == source,
            Some(Value::Array(allowed)) => allowed.iter().any(|s| s.as_str() == Some(source)),
            Some(_) => false,
        }
    }

    /// Global, then class, then method interceptors
    pub fn load_interceptors(&self) -> Result<Vec<Interceptor>, ContextError> {
        let target = &self.0.target;
        let interceptors = merge_interceptors(
            target.class_interceptors(),
            target.method_interceptors(self.method_name()),
        );
        let global = self
            .get_global_interceptor_binding_keys()?
            .into_iter()
            .map(Interceptor::Key)
            .collect();
        Ok(merge_interceptors(global, interceptors))
    }

    /// Calls the target method with the current arguments
    pub fn invoke_target_method(&self) -> Resolved<Instance> {
        tracing::trace!(target_name = self.target_name(), "Invoking target method");
        let args = self.args();
        self.0.target.invoke_method(self.method_name(), &args)
    }

    pub(crate) fn close(&self) {
        self.0.context.close();
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("context", &self.0.context.name())
            .field("target", &self.target_name())
            .field("args", &self.0.args.borrow().len())
            .field("source", &self.0.source)
            .finish()
    }
}
