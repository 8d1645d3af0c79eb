//! Name to handler tables for bracket tags and `n:` attributes.

use std::collections::HashMap;

use crate::tag::TagHandler;
use crate::tags;

/// Handlers for one compile configuration.
///
/// Registration order is kept: it decides the order in which several
/// `n:` attributes on one element are opened.
#[derive(Clone, Default)]
pub struct TagRegistry {
    tags: Vec<(String, TagHandler)>,
    tag_index: HashMap<String, usize>,
    attributes: Vec<(String, TagHandler)>,
    attribute_index: HashMap<String, usize>,
}

impl TagRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tag.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        tags::register_defaults(&mut registry);
        registry
    }

    /// Register a bracket tag, replacing any handler of the same name.
    pub fn add_tag(&mut self, name: &str, handler: TagHandler) -> &mut Self {
        insert(&mut self.tags, &mut self.tag_index, name, handler);
        self
    }

    /// Register an `n:` attribute (without the `n:` prefix).
    pub fn add_attribute(&mut self, name: &str, handler: TagHandler) -> &mut Self {
        insert(&mut self.attributes, &mut self.attribute_index, name, handler);
        self
    }

    pub fn tag(&self, name: &str) -> Option<TagHandler> {
        self.tag_index.get(name).map(|&i| self.tags[i].1)
    }

    pub fn attribute(&self, name: &str) -> Option<TagHandler> {
        self.attribute_index.get(name).map(|&i| self.attributes[i].1)
    }

    /// Registration rank of an attribute.
    pub fn attribute_order(&self, name: &str) -> Option<usize> {
        self.attribute_index.get(name).copied()
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|(name, _)| name.as_str())
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(name, _)| name.as_str())
    }
}

fn insert(
    list: &mut Vec<(String, TagHandler)>,
    index: &mut HashMap<String, usize>,
    name: &str,
    handler: TagHandler,
) {
    match index.get(name) {
        Some(&i) => list[i].1 = handler,
        None => {
            index.insert(name.to_string(), list.len());
            list.push((name.to_string(), handler));
        }
    }
}

impl std::fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagRegistry")
            .field("tags", &self.tag_names().collect::<Vec<_>>())
            .field("attributes", &self.attribute_names().collect::<Vec<_>>())
            .finish()
    }
}
