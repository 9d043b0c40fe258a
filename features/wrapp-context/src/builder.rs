use crate::{binding::BindingScope, context::Context};

/// Configures a [Context] before creating it.
///
/// Unnamed contexts get a generated `<prefix>-<uuid>` name.
pub struct ContextBuilder {
    name: Option<String>,
    prefix: String,
    parent: Option<Context>,
    scope: Option<BindingScope>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        ContextBuilder {
            name: None,
            prefix: "context".to_string(),
            parent: None,
            scope: None,
        }
    }
}

impl ContextBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Prefix of the generated name
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn parent(mut self, parent: &Context) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Marks the context as the boundary of an application, server or request scope
    pub fn scope(mut self, scope: BindingScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn build(self) -> Context {
        let name = self
            .name
            .unwrap_or_else(|| format!("{}-{}", self.prefix, uuid::Uuid::new_v4()));
        Context::create(name, self.parent, self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_prefixed_names() {
        let ctx = ContextBuilder::new().name_prefix("request").build();
        assert!(ctx.name().starts_with("request-"));
        assert_ne!(ctx.name(), ContextBuilder::new().name_prefix("request").build().name());
    }

    #[test]
    fn keeps_parent_and_scope() {
        let app = ContextBuilder::new().name("app").scope(BindingScope::Application).build();
        let request = ContextBuilder::new().parent(&app).build();
        assert!(request.parent().unwrap().ptr_eq(&app));
        assert_eq!(app.scope(), Some(BindingScope::Application));
        assert!(request.name().starts_with("context-"));
    }
}
