use std::{cmp::Ordering, fmt, rc::Rc};

use regex::Regex;
use serde_json::Value;

use crate::binding::{Binding, TagMap};

/// Predicate over bindings
pub type BindingPredicate = Rc<dyn Fn(&Binding) -> bool>;

/// Orders bindings, e.g. for sorted views
pub type BindingComparator = Rc<dyn Fn(&Binding, &Binding) -> Ordering>;

/// Selects bindings.
///
/// Filters built from a [TagFilter] remember it, so contexts can answer them from
/// their tag index instead of scanning every binding.
#[derive(Clone)]
pub struct BindingFilter {
    predicate: BindingPredicate,
    tag_filter: Option<TagFilter>,
}

impl BindingFilter {
    pub fn new(predicate: impl Fn(&Binding) -> bool + 'static) -> Self {
        BindingFilter {
            predicate: Rc::new(predicate),
            tag_filter: None,
        }
    }

    /// Matches every binding
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn by_tag(tag: impl Into<TagFilter>) -> Self {
        let tag: TagFilter = tag.into();
        let matcher = tag.clone();
        BindingFilter {
            predicate: Rc::new(move |binding| matcher.matches(&binding.tag_map())),
            tag_filter: Some(tag),
        }
    }

    /// Matches keys against a pattern where `*` and `?` are wildcards that do not
    /// cross `.` or `:`
    pub fn by_key(pattern: &str) -> Self {
        let regex = wildcard_to_regex(pattern);
        Self::new(move |binding| regex.is_match(binding.key()))
    }

    pub fn by_key_regex(regex: Regex) -> Self {
        Self::new(move |binding| regex.is_match(binding.key()))
    }

    pub fn matches(&self, binding: &Binding) -> bool {
        (self.predicate)(binding)
    }

    pub fn tag_filter(&self) -> Option<&TagFilter> {
        self.tag_filter.as_ref()
    }

    /// Both filters must match. The tag index is kept if only one side has one.
    pub fn and(self, other: BindingFilter) -> Self {
        let tag_filter = match (&self.tag_filter, &other.tag_filter) {
            (Some(tag), None) | (None, Some(tag)) => Some(tag.clone()),
            _ => None,
        };
        let (left, right) = (self.predicate, other.predicate);
        BindingFilter {
            predicate: Rc::new(move |binding| left(binding) && right(binding)),
            tag_filter,
        }
    }
}

impl fmt::Debug for BindingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingFilter")
            .field("tag_filter", &self.tag_filter)
            .finish_non_exhaustive()
    }
}

impl From<&str> for BindingFilter {
    fn from(pattern: &str) -> Self {
        BindingFilter::by_key(pattern)
    }
}
impl From<Regex> for BindingFilter {
    fn from(regex: Regex) -> Self {
        BindingFilter::by_key_regex(regex)
    }
}
impl From<TagFilter> for BindingFilter {
    fn from(tag: TagFilter) -> Self {
        BindingFilter::by_tag(tag)
    }
}

/// Query over binding tags
#[derive(Clone)]
pub enum TagFilter {
    /// A tag name, `*` and `?` act as wildcards. Any matching name selects the binding.
    Name(String),
    /// A regex tested against every tag name. Any matching name selects the binding.
    Pattern(Regex),
    /// Name/value pairs that must all match
    Values(Vec<(String, TagValueMatcher)>),
}

impl TagFilter {
    pub fn values<N, M>(pairs: impl IntoIterator<Item = (N, M)>) -> Self
    where
        N: Into<String>,
        M: Into<TagValueMatcher>,
    {
        TagFilter::Values(
            pairs
                .into_iter()
                .map(|(name, matcher)| (name.into(), matcher.into()))
                .collect(),
        )
    }

    pub fn matches(&self, tags: &TagMap) -> bool {
        match self {
            TagFilter::Name(name) => {
                let regex = wildcard_to_regex(name);
                tags.keys().any(|tag| regex.is_match(tag))
            }
            TagFilter::Pattern(regex) => tags.keys().any(|tag| regex.is_match(tag)),
            TagFilter::Values(pairs) => pairs
                .iter()
                .all(|(name, matcher)| matcher.matches(tags.get(name), name, tags)),
        }
    }
}

impl fmt::Debug for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagFilter::Name(name) => f.debug_tuple("Name").field(name).finish(),
            TagFilter::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            TagFilter::Values(pairs) => f
                .debug_map()
                .entries(pairs.iter().map(|(name, matcher)| (name, matcher)))
                .finish(),
        }
    }
}

impl From<&str> for TagFilter {
    fn from(name: &str) -> Self {
        TagFilter::Name(name.to_string())
    }
}
impl From<String> for TagFilter {
    fn from(name: String) -> Self {
        TagFilter::Name(name)
    }
}
impl From<Regex> for TagFilter {
    fn from(regex: Regex) -> Self {
        TagFilter::Pattern(regex)
    }
}

pub type TagValuePredicate = Rc<dyn Fn(Option<&Value>, &str, &TagMap) -> bool>;

/// How a single tag value is matched inside [TagFilter::Values]
#[derive(Clone)]
pub enum TagValueMatcher {
    /// The tag is present, whatever its value
    Any,
    Equals(Value),
    /// The tag value equals the item, or is an array containing it
    Includes(Value),
    Custom(TagValuePredicate),
}

impl TagValueMatcher {
    pub fn matches(&self, value: Option<&Value>, name: &str, tags: &TagMap) -> bool {
        match self {
            TagValueMatcher::Any => tags.contains_key(name),
            TagValueMatcher::Equals(expected) => value == Some(expected),
            TagValueMatcher::Includes(item) => match value {
                Some(Value::Array(items)) => items.contains(item),
                Some(value) => value == item,
                None => false,
            },
            TagValueMatcher::Custom(predicate) => predicate(value, name, tags),
        }
    }
}

impl fmt::Debug for TagValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValueMatcher::Any => f.write_str("Any"),
            TagValueMatcher::Equals(value) => f.debug_tuple("Equals").field(value).finish(),
            TagValueMatcher::Includes(value) => f.debug_tuple("Includes").field(value).finish(),
            TagValueMatcher::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl From<Value> for TagValueMatcher {
    fn from(value: Value) -> Self {
        TagValueMatcher::Equals(value)
    }
}
impl From<&str> for TagValueMatcher {
    fn from(value: &str) -> Self {
        TagValueMatcher::Equals(Value::String(value.to_string()))
    }
}

/// Converts a wildcard pattern into an anchored regex.
///
/// `*` matches any run of characters except `.` and `:`, `?` matches exactly one
/// such character. Everything else is literal.
pub fn wildcard_to_regex(pattern: &str) -> Regex {
    let mut source = String::with_capacity(pattern.len() + 2);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str("[^.:]*"),
            '?' => source.push_str("[^.:]"),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).expect("escaped wildcard pattern is a valid regex")
}

pub(crate) fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Compares two values by their position in `order`.
///
/// Values missing from `order` sort before listed ones and compare equal to each
/// other, so a stable sort keeps their original order.
pub fn compare_by_order(a: Option<&str>, b: Option<&str>, order: &[String]) -> Ordering {
    let position = |value: Option<&str>| {
        value
            .and_then(|value| order.iter().position(|item| item == value))
            .map_or(-1, |index| index as isize)
    };
    position(a).cmp(&position(b))
}

/// Sorts bindings by the value of `tag_name`, following `order`
pub fn compare_bindings_by_tag(tag_name: &str, order: Vec<String>) -> BindingComparator {
    let tag_name = tag_name.to_string();
    Rc::new(move |a, b| {
        let (a, b) = (a.tag_map(), b.tag_map());
        compare_by_order(
            a.get(&tag_name).and_then(Value::as_str),
            b.get(&tag_name).and_then(Value::as_str),
            &order,
        )
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tags(pairs: &[(&str, Value)]) -> TagMap {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn wildcards_do_not_cross_separators() {
        let regex = wildcard_to_regex("servers.*");
        assert!(regex.is_match("servers.rest"));
        assert!(!regex.is_match("servers.rest.port"));
        assert!(!regex.is_match("servers:rest"));

        let single = wildcard_to_regex("a?c");
        assert!(single.is_match("abc"));
        assert!(!single.is_match("a.c"));
        assert!(wildcard_to_regex("a+b(c)").is_match("a+b(c)"));
    }

    #[test]
    fn tag_name_filters_union_over_names() {
        let map = tags(&[("controller", json!("controller")), ("rest", json!("rest"))]);
        assert!(TagFilter::from("controller").matches(&map));
        assert!(TagFilter::from("con*").matches(&map));
        assert!(!TagFilter::from("service").matches(&map));
        assert!(TagFilter::from(Regex::new("^re").unwrap()).matches(&map));
    }

    #[test]
    fn tag_value_filters_intersect() {
        let map = tags(&[("name", json!("greeter")), ("groups", json!(["a", "b"]))]);
        assert!(TagFilter::values([("name", json!("greeter"))]).matches(&map));
        assert!(!TagFilter::values([
            ("name", TagValueMatcher::from(json!("greeter"))),
            ("missing", TagValueMatcher::Any),
        ])
        .matches(&map));
        assert!(TagFilter::values([("groups", TagValueMatcher::Includes(json!("b")))]).matches(&map));
        assert!(!TagFilter::values([("groups", TagValueMatcher::Includes(json!("c")))]).matches(&map));
    }

    #[test]
    fn unknown_order_values_come_first() {
        let order = vec!["auth".to_string(), "log".to_string()];
        assert_eq!(compare_by_order(Some("log"), Some("auth"), &order), Ordering::Greater);
        assert_eq!(compare_by_order(None, Some("auth"), &order), Ordering::Less);
        assert_eq!(compare_by_order(Some("x"), None, &order), Ordering::Equal);
    }
}
