//! Wrapp Context is a hierarchical dependency injection container.
//!
//! Values are registered as [Binding]s under string keys in a [Context]. Contexts
//! form a tree: lookups that miss in a context continue in its parent, so a
//! request context sees everything bound to the application context while its
//! own bindings stay private.
//!
//! # Examples
//!
//! ```rust
//! use wrapp_context::{BindingScope, Context};
//!
//! let app = Context::new("app");
//! app.bind("greeting").unwrap().to("Hello".to_string());
//! app.bind("answer")
//!     .unwrap()
//!     .in_scope(BindingScope::Singleton)
//!     .to_dynamic_value(|_| Ok(42u32));
//!
//! let request = Context::with_parent(&app, "request");
//! assert_eq!(*request.get_sync_as::<String>("greeting").unwrap(), "Hello");
//! assert_eq!(*request.get_sync_as::<u32>("answer").unwrap(), 42);
//! ```
//!
//! Wrapp Context consists of the following components:
//!
//! 1. Context - registry, lookup delegation, events
//! 2. Binding - value sources, scopes, tags and per-context caching
//! 3. Resolver - constructor and property injection for [Injectable] classes
//! 4. ResolutionSession - tracks the bindings and injections being resolved to detect cycles
//! 5. ContextView - live, cached queries over bindings
//! 6. Interception - method interceptor chains and proxies

pub mod binding;
pub mod binding_filter;
pub mod binding_key;
pub mod builder;
pub mod context;
pub mod errors;
pub mod factories;
pub mod injection;
pub mod interception;
pub mod keys;
pub mod resolution_session;
pub mod resolver;
pub mod subscription;
mod tag_indexer;
pub mod types;
pub mod value_promise;
pub mod view;

pub use binding::{
    Binding, BindingEvent, BindingOperation, BindingScope, BindingSource, BindingSpec, BindingType,
    ResolutionContext, ResolutionOptions,
};
pub use binding_filter::{BindingComparator, BindingFilter, TagFilter, TagValueMatcher};
pub use binding_key::{BindingAddress, BindingKey};
pub use builder::ContextBuilder;
pub use context::{Context, ContextId};
pub use errors::{ContextError, ResolutionError, ResolutionErrorKind};
pub use factories::{ClassConstructor, Injectable, Provider, ProviderClass};
pub use injection::{BindingSelector, Injection, InjectionMember, InjectionMetadata};
pub use interception::{
    register_interceptor, InterceptionProxy, Interceptable, Interceptor, InterceptorBindingOptions,
    InvocationContext, Next,
};
pub use keys::{ContextBindings, ContextTags};
pub use resolution_session::{ResolutionElement, ResolutionSession};
pub use resolver::{
    getter::{BindingCreationPolicy, Getter, Setter},
    inject::*,
    instantiate_class, InjectedArgs,
};
pub use subscription::{ContextEvent, ContextEventType, ContextObserver, Subscription};
pub use types::{DynError, Instance, TypeInfo};
pub use value_promise::{resolve_list, Resolved, ValueOrPromise};
pub use view::{ContextView, ContextViewEvent};
