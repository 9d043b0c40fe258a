//! Well known tag names, binding keys and namespaces.

/// Tag names with a meaning to the container
pub struct ContextTags;

impl ContextTags {
    /// Key a class binding is created with
    pub const KEY: &'static str = "key";
    pub const NAMESPACE: &'static str = "namespace";
    /// Marks a binding as a global interceptor
    pub const GLOBAL_INTERCEPTOR: &'static str = "globalInterceptor";
    /// Invocation source types a global interceptor applies to
    pub const GLOBAL_INTERCEPTOR_SOURCE: &'static str = "globalInterceptorSource";
    /// Ordering group of a global interceptor
    pub const GLOBAL_INTERCEPTOR_GROUP: &'static str = "globalInterceptorGroup";
    /// Key whose configuration a binding holds
    pub const CONFIGURATION_FOR: &'static str = "configurationFor";
}

/// Binding keys the container reads itself
pub struct ContextBindings;

impl ContextBindings {
    /// `Vec<String>` with the order of global interceptor groups
    pub const GLOBAL_INTERCEPTOR_ORDERED_GROUPS: &'static str = "globalInterceptor.orderedGroups";
    pub const CONFIGURATION_RESOLVER: &'static str = "context.configurationResolver";
}

pub const GLOBAL_INTERCEPTOR_NAMESPACE: &str = "globalInterceptors";
pub const LOCAL_INTERCEPTOR_NAMESPACE: &str = "interceptors";
