//! Right-biased schema merge.
//!
//! `patch(base, overlay)` rewrites `base` in place so that every attribute the
//! overlay sets explicitly wins. Type sets are unioned; composition lists append,
//! except that an overlay entry whose `title` matches a base entry is patched into
//! that entry; `properties` recurse per key and append new keys; `required`,
//! `enum`, `const` and `default` are replaced wholesale.
//!
//! Entries are deduplicated by id, so applying the same overlay twice is a no-op.

use super::registry::RegistryBuilder;
use super::types::{AdditionalProperties, SchemaId};
use std::collections::HashSet;
use tracing::debug;

/// Merge `overlay` into `base`.
pub fn patch(builder: &mut RegistryBuilder, base: SchemaId, overlay: SchemaId) {
    let mut visited = HashSet::new();
    patch_into(builder, base, overlay, &mut visited);
}

fn patch_into(
    builder: &mut RegistryBuilder,
    base: SchemaId,
    overlay: SchemaId,
    visited: &mut HashSet<(SchemaId, SchemaId)>,
) {
    let base = builder.registry().resolve(base);
    let overlay = builder.registry().resolve(overlay);
    if base == overlay || !visited.insert((base, overlay)) {
        return;
    }
    debug!("Patching schema {} with {}", base, overlay);

    let over = builder.get(overlay).clone();
    let current = builder.get(base).clone();
    let mut nested: Vec<(SchemaId, SchemaId)> = Vec::new();

    let any_of = merge_composition(builder, &current.any_of, &over.any_of, &mut nested);
    let all_of = merge_composition(builder, &current.all_of, &over.all_of, &mut nested);
    let one_of = merge_composition(builder, &current.one_of, &over.one_of, &mut nested);

    let mut properties = current.properties.clone();
    for (key, id) in &over.properties {
        match properties.get(key) {
            Some(existing) if existing != id => nested.push((*existing, *id)),
            Some(_) => {}
            None => {
                properties.insert(key.clone(), *id);
            }
        }
    }

    let items = match (current.items, over.items) {
        (Some(b), Some(o)) => {
            nested.push((b, o));
            Some(b)
        }
        (b, o) => o.or(b),
    };
    let additional = match (current.additional_properties, over.additional_properties) {
        (Some(AdditionalProperties::Schema(b)), Some(AdditionalProperties::Schema(o))) => {
            nested.push((b, o));
            Some(AdditionalProperties::Schema(b))
        }
        (b, o) => o.or(b),
    };

    let target = builder.get_mut(base);

    // identity
    if over.boolean.is_some() {
        target.boolean = over.boolean;
    }
    set_if(&mut target.id, &over.id);
    set_if(&mut target.anchor, &over.anchor);
    set_if(&mut target.dynamic_anchor, &over.dynamic_anchor);
    set_if(&mut target.dialect, &over.dialect);
    if over.reference.is_some() {
        target.reference = over.reference.clone();
        target.ref_has_siblings = over.ref_has_siblings;
    }

    // type
    target.types.union(&over.types);
    target.nullable |= over.nullable;

    // composition
    target.any_of = any_of;
    target.all_of = all_of;
    target.one_of = one_of;
    set_copy(&mut target.not, over.not);
    set_copy(&mut target.if_schema, over.if_schema);
    set_copy(&mut target.then_schema, over.then_schema);
    set_copy(&mut target.else_schema, over.else_schema);

    // strings
    set_if(&mut target.pattern, &over.pattern);
    set_copy(&mut target.min_length, over.min_length);
    set_copy(&mut target.max_length, over.max_length);
    set_if(&mut target.format, &over.format);
    set_if(&mut target.content_media_type, &over.content_media_type);
    set_if(&mut target.content_encoding, &over.content_encoding);

    // numbers
    set_copy(&mut target.multiple_of, over.multiple_of);
    set_copy(&mut target.minimum, over.minimum);
    set_copy(&mut target.maximum, over.maximum);
    set_copy(&mut target.exclusive_minimum, over.exclusive_minimum);
    set_copy(&mut target.exclusive_maximum, over.exclusive_maximum);

    // arrays
    target.items = items;
    if !over.prefix_items.is_empty() {
        target.prefix_items = over.prefix_items.clone();
    }
    set_copy(&mut target.contains, over.contains);
    set_copy(&mut target.min_contains, over.min_contains);
    set_copy(&mut target.max_contains, over.max_contains);
    set_copy(&mut target.min_items, over.min_items);
    set_copy(&mut target.max_items, over.max_items);
    target.unique_items |= over.unique_items;
    set_copy(&mut target.unevaluated_items, over.unevaluated_items);
    target.shuffle_items |= over.shuffle_items;

    // objects
    target.properties = properties;
    for (i, (source, id)) in over.pattern_properties.iter().enumerate() {
        match target.pattern_properties.get_index_of(source) {
            Some(index) => {
                target.pattern_properties.insert(source.clone(), *id);
                target.pattern_property_regex[index] = over.pattern_property_regex[i].clone();
            }
            None => {
                target.pattern_properties.insert(source.clone(), *id);
                target.pattern_property_regex.push(over.pattern_property_regex[i].clone());
            }
        }
    }
    target.additional_properties = additional;
    set_copy(&mut target.unevaluated_properties, over.unevaluated_properties);
    set_copy(&mut target.property_names, over.property_names);
    set_copy(&mut target.min_properties, over.min_properties);
    set_copy(&mut target.max_properties, over.max_properties);
    if !over.required.is_empty() {
        target.required = over.required.clone();
    }
    for (key, deps) in &over.dependent_required {
        target.dependent_required.insert(key.clone(), deps.clone());
    }
    for (key, id) in &over.dependent_schemas {
        target.dependent_schemas.insert(key.clone(), *id);
    }

    // values and annotations
    if !over.enumeration.is_empty() {
        target.enumeration = over.enumeration.clone();
    }
    set_if(&mut target.constant, &over.constant);
    set_if(&mut target.default, &over.default);
    set_if(&mut target.title, &over.title);
    set_if(&mut target.description, &over.description);
    target.deprecated |= over.deprecated;
    target.read_only |= over.read_only;
    target.write_only |= over.write_only;
    if !over.examples.is_empty() {
        target.examples = over.examples.clone();
    }
    set_if(&mut target.example, &over.example);
    set_if(&mut target.xml, &over.xml);
    for (key, id) in &over.defs {
        target.defs.insert(key.clone(), *id);
    }

    for (b, o) in nested {
        patch_into(builder, b, o, visited);
    }
}

fn set_if<T: Clone>(target: &mut Option<T>, overlay: &Option<T>) {
    if overlay.is_some() {
        target.clone_from(overlay);
    }
}

fn set_copy<T: Copy>(target: &mut Option<T>, overlay: Option<T>) {
    if overlay.is_some() {
        *target = overlay;
    }
}

fn title_of(builder: &RegistryBuilder, id: SchemaId) -> Option<String> {
    let id = builder.registry().resolve(id);
    builder.get(id).title.clone().filter(|t| !t.is_empty())
}

/// Append overlay entries not already present; titled matches are patched instead.
fn merge_composition(
    builder: &RegistryBuilder,
    base: &[SchemaId],
    overlay: &[SchemaId],
    nested: &mut Vec<(SchemaId, SchemaId)>,
) -> Vec<SchemaId> {
    let mut merged = base.to_vec();
    for entry in overlay {
        if merged.contains(entry) {
            continue;
        }
        let matching = title_of(builder, *entry)
            .and_then(|title| base.iter().find(|b| title_of(builder, **b).as_deref() == Some(title.as_str())));
        match matching {
            Some(existing) => nested.push((*existing, *entry)),
            None => merged.push(*entry),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaRegistry, TypeTag};
    use serde_json::json;

    fn two(base: serde_json::Value, overlay: serde_json::Value) -> (RegistryBuilder, SchemaId, SchemaId) {
        let mut builder = RegistryBuilder::new();
        let b = builder.load_root("file:///base.json", base).unwrap();
        let o = builder.load_root("file:///overlay.json", overlay).unwrap();
        builder.link(&crate::config::NoReader).unwrap();
        (builder, b, o)
    }

    #[test]
    fn test_overlay_wins_for_explicit_attributes() {
        let (mut builder, b, o) = two(
            json!({"type": "string", "minLength": 1, "maxLength": 10, "required": ["a"]}),
            json!({"maxLength": 5, "type": "null", "required": ["b"]}),
        );
        patch(&mut builder, b, o);
        let schema = builder.get(b);
        assert_eq!(schema.min_length, Some(1));
        assert_eq!(schema.max_length, Some(5));
        assert!(schema.types.contains(TypeTag::String));
        assert!(schema.types.contains(TypeTag::Null));
        assert_eq!(schema.required, vec!["b"]);
    }

    #[test]
    fn test_properties_recurse_and_append() {
        let (mut builder, b, o) = two(
            json!({"properties": {"a": {"type": "string"}, "b": {"type": "integer"}}}),
            json!({"properties": {"a": {"maxLength": 3}, "c": {"type": "boolean"}}}),
        );
        patch(&mut builder, b, o);
        let registry: SchemaRegistry = builder.build();
        let schema = registry.get(b);
        let keys: Vec<&String> = schema.properties.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        let a = registry.get(schema.properties["a"]);
        assert!(a.types.is(TypeTag::String));
        assert_eq!(a.max_length, Some(3));
    }

    #[test]
    fn test_titled_composition_entries_merge() {
        let (mut builder, b, o) = two(
            json!({"anyOf": [{"title": "Cat", "type": "object"}, {"title": "Dog"}]}),
            json!({"anyOf": [{"title": "Cat", "properties": {"meow": {}}}, {"title": "Fish"}]}),
        );
        patch(&mut builder, b, o);
        let schema = builder.get(b).clone();
        assert_eq!(schema.any_of.len(), 3);
        assert!(builder.get(schema.any_of[0]).properties.contains_key("meow"));
    }

    #[test]
    fn test_patch_is_idempotent() {
        let (mut builder, b, o) = two(
            json!({"type": "object", "properties": {"a": {"type": "string"}}, "oneOf": [{"type": "object"}]}),
            json!({"properties": {"x": {"type": "integer"}}, "oneOf": [{"required": ["x"]}], "enum": [{"x": 1}]}),
        );
        patch(&mut builder, b, o);
        let once = builder.get(b).clone();
        patch(&mut builder, b, o);
        assert_eq!(builder.get(b), &once);
    }

    #[test]
    fn test_patch_with_itself_is_noop() {
        let (mut builder, b, _) = two(json!({"type": "string"}), json!({}));
        let before = builder.get(b).clone();
        patch(&mut builder, b, b);
        assert_eq!(builder.get(b), &before);
    }

    #[test]
    fn test_recursive_schemas_terminate() {
        let (mut builder, b, o) = two(
            json!({"properties": {"child": {"$ref": "#"}}}),
            json!({"properties": {"child": {"$ref": "#"}, "name": {"type": "string"}}}),
        );
        patch(&mut builder, b, o);
        assert!(builder.get(b).properties.contains_key("name"));
    }
}
