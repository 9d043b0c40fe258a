use pretty_assertions::assert_eq;
use proptest::prelude::*;
use regex::Regex;
use serde_json::{json, Value};
use wrapp_context::{Binding, BindingFilter, Context, TagFilter, TagValueMatcher};

const TAGS: [&str; 4] = ["controller", "repository", "service", "route"];

fn tag_values() -> [Value; 3] {
    [json!("a"), json!("b"), json!(["a", "b"])]
}

fn queries() -> Vec<TagFilter> {
    let mut queries: Vec<TagFilter> = TAGS.iter().map(|tag| TagFilter::from(*tag)).collect();
    queries.extend([TagFilter::from("r*"), TagFilter::from("*o*")]);
    queries.extend([
        TagFilter::from(Regex::new("^(controller|route)$").unwrap()),
        TagFilter::from(Regex::new("e$").unwrap()),
    ]);
    queries.extend([
        TagFilter::values([("service", json!("a"))]),
        TagFilter::values([("controller", TagValueMatcher::Any), ("route", TagValueMatcher::Any)]),
        TagFilter::values([("route", TagValueMatcher::Includes(json!("b")))]),
        TagFilter::values([
            ("repository", TagValueMatcher::Includes(json!("a"))),
            ("service", TagValueMatcher::Any),
        ]),
    ]);
    queries
}

#[derive(Debug, Clone)]
enum Step {
    Bind { key: usize, tags: Vec<usize>, in_parent: bool },
    Tag { key: usize, tag: usize },
    TagValue { key: usize, tag: usize, value: usize },
    Unbind { key: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..6usize, prop::collection::vec(0..TAGS.len(), 0..3), any::<bool>())
            .prop_map(|(key, tags, in_parent)| Step::Bind { key, tags, in_parent }),
        2 => (0..6usize, 0..TAGS.len()).prop_map(|(key, tag)| Step::Tag { key, tag }),
        2 => (0..6usize, 0..TAGS.len(), 0..3usize)
            .prop_map(|(key, tag, value)| Step::TagValue { key, tag, value }),
        1 => (0..6usize).prop_map(|key| Step::Unbind { key }),
    ]
}

fn keys(bindings: &[Binding]) -> Vec<String> {
    bindings.iter().map(|binding| binding.key().to_string()).collect()
}

fn scan(ctx: &Context, query: &TagFilter) -> Vec<Binding> {
    let query = query.clone();
    ctx.find(BindingFilter::new(move |binding| query.matches(&binding.tag_map())))
}

proptest! {
    #[test]
    fn indexed_tag_queries_match_a_linear_scan(steps in prop::collection::vec(step(), 1..24)) {
        let parent = Context::new("parent");
        let child = Context::with_parent(&parent, "child");

        for step in steps {
            match step {
                Step::Bind { key, tags, in_parent } => {
                    let ctx = if in_parent { &parent } else { &child };
                    ctx.bind(format!("key{key}"))
                        .unwrap()
                        .to(key)
                        .tags(tags.into_iter().map(|tag| TAGS[tag]));
                }
                Step::Tag { key, tag } => {
                    if let Some(binding) = child.find_binding(&format!("key{key}")) {
                        binding.tag(TAGS[tag]);
                    }
                }
                Step::TagValue { key, tag, value } => {
                    let binding = parent
                        .find_binding(&format!("key{key}"))
                        .or_else(|| child.find_binding(&format!("key{key}")));
                    if let Some(binding) = binding {
                        binding.tag_value(TAGS[tag], tag_values()[value].clone());
                    }
                }
                Step::Unbind { key } => {
                    child.unbind(format!("key{key}")).unwrap();
                }
            }
        }

        for (n, query) in queries().into_iter().enumerate() {
            for ctx in [&parent, &child] {
                assert_eq!(
                    keys(&ctx.find_by_tag(query.clone())),
                    keys(&scan(ctx, &query)),
                    "query #{n} in {}",
                    ctx.name()
                );
            }
        }
    }
}

#[test]
fn value_queries_are_answered_from_the_index() {
    let ctx = Context::new("app");
    ctx.bind("a").unwrap().to(1u8).tag_value("group", "x");
    ctx.bind("b").unwrap().to(2u8).tag_value("group", "y");
    ctx.bind("c").unwrap().to(3u8).tag("other");

    let found = ctx.find_by_tag(TagFilter::values([("group", json!("y"))]));
    assert_eq!(keys(&found), vec!["b"]);

    ctx.find_binding("a").unwrap().tag_value("group", "y");
    let found = ctx.find_by_tag(TagFilter::values([("group", json!("y"))]));
    assert_eq!(keys(&found), vec!["a", "b"]);
}
