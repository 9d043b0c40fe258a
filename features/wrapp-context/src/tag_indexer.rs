use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Weak,
};

use crate::{
    binding::{Binding, BindingOperation},
    binding_filter::{has_wildcards, wildcard_to_regex, TagFilter, TagValueMatcher},
    context::ContextInner,
};

/// Index `tag name -> bindings` over the bindings of one context.
///
/// Queries answer with the same bindings a scan with [TagFilter::matches] would.
#[derive(Default)]
pub(crate) struct TagIndexer {
    index: RefCell<HashMap<String, Vec<Binding>>>,
    /// Change listeners registered on tracked bindings, by binding id
    listeners: RefCell<HashMap<usize, (Binding, u64)>>,
}

impl TagIndexer {
    /// Indexes `binding` and keeps it indexed when its tags change. Any change to
    /// the binding bumps the revision of its owner.
    pub(crate) fn track(&self, binding: &Binding, owner: Weak<ContextInner>) {
        self.index(binding);
        let listener = binding.on_changed(move |event| {
            let Some(owner) = owner.upgrade() else {
                return;
            };
            owner.touch();
            if event.operation == BindingOperation::Tag {
                owner.indexer.unindex(&event.binding);
                owner.indexer.index(&event.binding);
            }
        });
        let previous = self
            .listeners
            .borrow_mut()
            .insert(binding.id(), (binding.clone(), listener));
        if let Some((binding, listener)) = previous {
            binding.remove_changed_listener(listener);
        }
    }

    pub(crate) fn untrack(&self, binding: &Binding) {
        self.unindex(binding);
        let removed = self.listeners.borrow_mut().remove(&binding.id());
        if let Some((binding, listener)) = removed {
            binding.remove_changed_listener(listener);
        }
    }

    fn index(&self, binding: &Binding) {
        let mut index = self.index.borrow_mut();
        for tag in binding.tag_names() {
            let bindings = index.entry(tag).or_default();
            if !bindings.iter().any(|b| b.ptr_eq(binding)) {
                bindings.push(binding.clone());
            }
        }
    }

    fn unindex(&self, binding: &Binding) {
        let mut index = self.index.borrow_mut();
        index.retain(|_, bindings| {
            bindings.retain(|b| !b.ptr_eq(binding));
            !bindings.is_empty()
        });
    }

    /// Ids of the indexed bindings matching `filter`, or `None` if the filter
    /// cannot be answered from the index
    pub(crate) fn find(&self, filter: &TagFilter) -> Option<HashSet<usize>> {
        let index = self.index.borrow();
        let union = |matches: &dyn Fn(&str) -> bool| {
            index
                .iter()
                .filter(|(tag, _)| matches(tag))
                .flat_map(|(_, bindings)| bindings.iter().map(Binding::id))
                .collect::<HashSet<_>>()
        };

        let found = match filter {
            TagFilter::Name(name) if !has_wildcards(name) => index
                .get(name)
                .map(|bindings| bindings.iter().map(Binding::id).collect())
                .unwrap_or_default(),
            TagFilter::Name(name) => {
                let regex = wildcard_to_regex(name);
                union(&|tag| regex.is_match(tag))
            }
            TagFilter::Pattern(regex) => union(&|tag| regex.is_match(tag)),
            TagFilter::Values(pairs) => {
                // Custom predicates may accept bindings without the tag
                let custom = pairs
                    .iter()
                    .any(|(_, matcher)| matches!(matcher, TagValueMatcher::Custom(_)));
                let (first, _) = pairs.first()?;
                if custom {
                    return None;
                }
                let Some(candidates) = index.get(first) else {
                    return Some(HashSet::new());
                };
                candidates
                    .iter()
                    .filter(|binding| filter.matches(&binding.tag_map()))
                    .map(Binding::id)
                    .collect()
            }
        };
        Some(found)
    }
}
