use std::{fmt, rc::Rc};

use serde_json::{json, Value};

use crate::{
    binding_filter::{BindingComparator, BindingFilter},
    context::Context,
    resolution_session::ResolutionSession,
    types::Instance,
    value_promise::Resolved,
};

/// Custom resolution of an injection, e.g. getters, views or the context itself
pub type InjectionResolver =
    Rc<dyn Fn(&Context, &Injection, &ResolutionSession) -> Resolved<Option<Instance>>>;

/// Where a value gets injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionMember {
    /// Constructor parameter by position
    Constructor(usize),
    Property(String),
    /// Method parameter by position
    Method { name: String, index: usize },
}

/// What an injection resolves
#[derive(Clone)]
pub enum BindingSelector {
    /// A key, optionally with a `#` property path
    Key(String),
    Filter(BindingFilter),
}

impl fmt::Debug for BindingSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingSelector::Key(key) => f.debug_tuple("Key").field(key).finish(),
            BindingSelector::Filter(filter) => f.debug_tuple("Filter").field(filter).finish(),
        }
    }
}

#[derive(Clone)]
pub struct InjectionMetadata {
    /// Name of the helper that created the injection, e.g. `@inject.getter`
    pub decorator: String,
    /// Resolve to `None` when the key is unbound
    pub optional: bool,
    pub as_proxy_with_interceptors: bool,
    /// Sort order for filter based injections
    pub binding_comparator: Option<BindingComparator>,
}

impl Default for InjectionMetadata {
    fn default() -> Self {
        InjectionMetadata {
            decorator: "@inject".to_string(),
            optional: false,
            as_proxy_with_interceptors: false,
            binding_comparator: None,
        }
    }
}

impl fmt::Debug for InjectionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionMetadata")
            .field("decorator", &self.decorator)
            .field("optional", &self.optional)
            .field("as_proxy_with_interceptors", &self.as_proxy_with_interceptors)
            .field("binding_comparator", &self.binding_comparator.is_some())
            .finish()
    }
}

/// Describes a dependency of a class: where it goes and how it is resolved.
///
/// Classes hand these out from [crate::Injectable::parameters] and
/// [crate::Injectable::properties]. The resolver fills in target and member.
#[derive(Clone)]
pub struct Injection {
    /// Class name of the injection target
    pub target: String,
    pub member: InjectionMember,
    pub selector: Option<BindingSelector>,
    pub metadata: InjectionMetadata,
    /// Overrides the default key/filter resolution
    pub resolve: Option<InjectionResolver>,
}

impl Injection {
    pub fn new(selector: Option<BindingSelector>) -> Self {
        Injection {
            target: String::new(),
            member: InjectionMember::Constructor(0),
            selector,
            metadata: InjectionMetadata::default(),
            resolve: None,
        }
    }

    /// Injection of `key` at a known target
    pub fn for_key(target: impl Into<String>, member: InjectionMember, key: impl Into<String>) -> Self {
        Self::new(Some(BindingSelector::Key(key.into()))).at(target, member)
    }

    pub fn at(mut self, target: impl Into<String>, member: InjectionMember) -> Self {
        self.target = target.into();
        self.member = member;
        self
    }

    pub fn optional(mut self) -> Self {
        self.metadata.optional = true;
        self
    }

    /// Inject the value wrapped in an interception proxy
    pub fn as_proxy(mut self) -> Self {
        self.metadata.as_proxy_with_interceptors = true;
        self
    }

    pub fn with_decorator(mut self, decorator: impl Into<String>) -> Self {
        self.metadata.decorator = decorator.into();
        self
    }

    pub fn with_comparator(mut self, comparator: BindingComparator) -> Self {
        self.metadata.binding_comparator = Some(comparator);
        self
    }

    pub fn with_resolver(
        mut self,
        resolve: impl Fn(&Context, &Injection, &ResolutionSession) -> Resolved<Option<Instance>> + 'static,
    ) -> Self {
        self.resolve = Some(Rc::new(resolve));
        self
    }

    /// `Class.constructor[0]`, `Class.prototype.prop` or `Class.prototype.method[1]`
    pub fn target_name(&self) -> String {
        match &self.member {
            InjectionMember::Constructor(index) => format!("{}.constructor[{index}]", self.target),
            InjectionMember::Property(name) => format!("{}.prototype.{name}", self.target),
            InjectionMember::Method { name, index } => {
                format!("{}.prototype.{name}[{index}]", self.target)
            }
        }
    }

    pub fn binding_key(&self) -> Option<&str> {
        match &self.selector {
            Some(BindingSelector::Key(key)) => Some(key),
            _ => None,
        }
    }

    pub fn filter(&self) -> Option<&BindingFilter> {
        match &self.selector {
            Some(BindingSelector::Filter(filter)) => Some(filter),
            _ => None,
        }
    }

    pub fn describe_selector(&self) -> Value {
        match &self.selector {
            Some(BindingSelector::Key(key)) => json!(key),
            Some(BindingSelector::Filter(_)) => json!("<filter>"),
            None => Value::Null,
        }
    }
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injection")
            .field("target", &self.target_name())
            .field("selector", &self.selector)
            .field("metadata", &self.metadata)
            .field("custom_resolver", &self.resolve.is_some())
            .finish()
    }
}
