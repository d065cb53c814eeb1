//! Pseudo-random values conforming to a schema.
//!
//! A [`Generator`] owns a seeded RNG; the same seed, registry and request always
//! yield the same value. Recursive schemas terminate at `max_depth`, where objects
//! and arrays shrink to null (when nullable) or to their required skeleton.
//!
//! Composition is handled structurally: `allOf` members are merged into one
//! synthetic schema whose type set is the intersection of the members' types,
//! `anyOf`/`oneOf` pick a branch (a `oneOf` pick is retried until exactly one
//! branch accepts the value).

mod faker;
mod pattern;

use crate::schema::{deep_equal, DynamicScope, ParseOptions, Parser, Schema, SchemaId, SchemaRegistry, TypeTag, Types};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_MAX_DEPTH: usize = 8;
const OPTIONAL_PROBABILITY: f64 = 0.7;
const NULL_PROBABILITY: f64 = 0.1;
const UNIQUE_ATTEMPTS_PER_ITEM: usize = 10;
const ONE_OF_ATTEMPTS: usize = 10;
const DEFAULT_SPAN: i64 = 1000;

// ============================================================================
// Public types
// ============================================================================

/// Generator settings.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Fixed seed; a random one is drawn when unset.
    pub seed: Option<u64>,
    /// Nesting depth past which objects and arrays become `null`.
    pub max_depth: usize,
    pub cancel: Option<CancellationToken>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            seed: None,
            max_depth: DEFAULT_MAX_DEPTH,
            cancel: None,
        }
    }
}

impl GeneratorOptions {
    pub fn seeded(seed: u64) -> Self {
        GeneratorOptions {
            seed: Some(seed),
            ..Default::default()
        }
    }
}

/// What to generate: a schema and, optionally, the name of the property or
/// parameter it is for (used for realistic strings).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub schema: SchemaId,
    pub name: Option<String>,
}

impl GenerationRequest {
    pub fn new(schema: SchemaId) -> Self {
        GenerationRequest { schema, name: None }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Constraints that cannot be satisfied.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("cannot fill {wanted} unique items at '{pointer}', only {found} distinct values generated")]
    CannotFillUnique { pointer: String, wanted: u64, found: usize },

    #[error("allOf at '{pointer}' has no shared type")]
    NoSharedType { pointer: String },

    #[error("cannot satisfy schema at '{pointer}': {reason}")]
    Unsatisfiable { pointer: String, reason: String },

    #[error("generation cancelled")]
    Cancelled,
}

// ============================================================================
// Generator
// ============================================================================

#[derive(Default)]
struct Walk {
    depth: usize,
    pointer: String,
    scope: DynamicScope,
}

impl Walk {
    fn unsatisfiable(&self, reason: impl Into<String>) -> GenerationError {
        GenerationError::Unsatisfiable {
            pointer: self.pointer.clone(),
            reason: reason.into(),
        }
    }
}

/// Seeded value generator over one registry.
pub struct Generator<'r> {
    registry: &'r SchemaRegistry,
    options: GeneratorOptions,
    seed: u64,
    rng: StdRng,
}

impl<'r> Generator<'r> {
    pub fn new(registry: &'r SchemaRegistry, options: GeneratorOptions) -> Self {
        let seed = options.seed.unwrap_or_else(rand::random);
        debug!("Generator seeded with {}", seed);
        Generator {
            registry,
            options,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed in use, so a run can be replayed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn generate(&mut self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        let mut walk = Walk {
            depth: 0,
            pointer: String::new(),
            scope: DynamicScope::new(),
        };
        self.value(request.schema, request.name.as_deref(), &mut walk)
    }

    fn check_cancelled(&self) -> Result<(), GenerationError> {
        match &self.options.cancel {
            Some(token) if token.is_cancelled() => Err(GenerationError::Cancelled),
            _ => Ok(()),
        }
    }

    fn value(&mut self, id: SchemaId, name: Option<&str>, walk: &mut Walk) -> Result<Value, GenerationError> {
        self.check_cancelled()?;
        let pushed = walk.scope.enter(self.registry, id);
        let result = self.value_in(id, name, walk);
        walk.scope.leave(pushed);
        result
    }

    fn value_in(&mut self, id: SchemaId, name: Option<&str>, walk: &mut Walk) -> Result<Value, GenerationError> {
        let id = self.registry.resolve_in(id, &walk.scope);
        let schema = self.registry.get(id);
        match schema.boolean {
            Some(false) => return Err(walk.unsatisfiable("schema 'false' accepts no value")),
            Some(true) => return Ok(self.any_value(name)),
            None => {}
        }
        let merged = self.effective(id, walk, &mut Vec::new())?;
        self.from_schema(merged, name, walk)
    }

    /// The schema at `id` with its `allOf` members merged in.
    fn effective(
        &self,
        id: SchemaId,
        walk: &Walk,
        seen: &mut Vec<SchemaId>,
    ) -> Result<Cow<'r, Schema>, GenerationError> {
        let registry = self.registry;
        let schema = registry.get(id);
        let members = registry.all_of(id);
        if members.is_empty() || seen.contains(&id) {
            return Ok(Cow::Borrowed(schema));
        }
        seen.push(id);
        let mut merged = schema.clone();
        merged.all_of.clear();
        merged.reference = None;
        let mut types = (!schema.types.is_empty()).then(|| schema.types.clone());
        for member in members {
            let member = self.effective(registry.resolve_in(member, &walk.scope), walk, seen)?;
            if !member.types.is_empty() {
                types = Some(match types {
                    None => member.types.clone(),
                    Some(current) => intersect(&current, &member.types),
                });
            }
            merge(&mut merged, &member);
        }
        seen.pop();
        if let Some(types) = types {
            if types.is_empty() {
                return Err(GenerationError::NoSharedType {
                    pointer: walk.pointer.clone(),
                });
            }
            merged.types = types;
        }
        Ok(Cow::Owned(merged))
    }

    fn from_schema(&mut self, schema: Cow<'_, Schema>, name: Option<&str>, walk: &mut Walk) -> Result<Value, GenerationError> {
        if let Some(constant) = &schema.constant {
            return Ok(constant.clone());
        }
        if !schema.enumeration.is_empty() {
            let index = self.rng.gen_range(0..schema.enumeration.len());
            return Ok(schema.enumeration[index].clone());
        }
        if !schema.any_of.is_empty() || !schema.one_of.is_empty() {
            return self.branch(schema.into_owned(), name, walk);
        }
        let tag = self.pick_type(&schema);
        if walk.depth >= self.options.max_depth && matches!(tag, TypeTag::Object | TypeTag::Array) {
            return self.skeleton(&schema, tag, name, walk);
        }
        match tag {
            TypeTag::Null => Ok(Value::Null),
            TypeTag::Boolean => Ok(Value::Bool(self.rng.gen_bool(0.5))),
            TypeTag::Integer => self.integer(&schema, name, walk),
            TypeTag::Number => self.number(&schema, name, walk),
            TypeTag::String => self.string(&schema, name, walk),
            TypeTag::Array => self.array(&schema, name, walk),
            TypeTag::Object => self.object(&schema, walk),
        }
    }

    /// Smallest conforming container once `max_depth` is reached: null when the
    /// schema admits it, otherwise only required properties or `minItems` items.
    fn skeleton(&mut self, schema: &Schema, tag: TypeTag, name: Option<&str>, walk: &mut Walk) -> Result<Value, GenerationError> {
        if schema.is_nullable() || walk.depth > self.options.max_depth * 2 {
            return Ok(Value::Null);
        }
        if tag == TypeTag::Array {
            let min = schema.min_items.unwrap_or(0) as usize;
            let mut items = Vec::with_capacity(min);
            while items.len() < min {
                let index = items.len();
                let segment = index.to_string();
                let value = match schema.prefix_items.get(index).copied().or(schema.items) {
                    Some(item) => self.child(item, name, &segment, walk)?,
                    None => self.any_value(name),
                };
                items.push(value);
            }
            return Ok(Value::Array(items));
        }

        let mut map = Map::new();
        let wanted = schema.min_properties.unwrap_or(0) as usize;
        for (key, site) in &schema.properties {
            let optional = !schema.is_required(key);
            if optional && (map.len() >= wanted || self.registry.get(self.registry.resolve(*site)).write_only) {
                continue;
            }
            let value = self.child(*site, Some(key.as_str()), key, walk)?;
            map.insert(key.clone(), value);
        }
        for key in &schema.required {
            if !map.contains_key(key) {
                let value = match extra(schema, key) {
                    Some(site) => self.child(site, Some(key.as_str()), key, walk)?,
                    None => self.any_value(Some(key.as_str())),
                };
                map.insert(key.clone(), value);
            }
        }
        Ok(Value::Object(map))
    }

    /// Pick an `anyOf`/`oneOf` branch and generate from it combined with the
    /// keywords of `base`.
    fn branch(&mut self, mut base: Schema, name: Option<&str>, walk: &mut Walk) -> Result<Value, GenerationError> {
        if walk.depth > self.options.max_depth * 2 {
            return Ok(Value::Null);
        }
        let exclusive = !base.one_of.is_empty();
        let branches = if exclusive {
            std::mem::take(&mut base.one_of)
        } else {
            std::mem::take(&mut base.any_of)
        };
        let registry = self.registry;
        let parser = Parser::new(registry, ParseOptions::default());
        let mut last = Value::Null;
        for _ in 0..ONE_OF_ATTEMPTS {
            let pick = branches[self.rng.gen_range(0..branches.len())];
            let target = registry.resolve_in(pick, &walk.scope);
            let branch = self.effective(target, walk, &mut Vec::new())?;
            let combined = combine(&base, &branch);
            let pushed = walk.scope.enter(registry, target);
            walk.depth += 1;
            let value = self.from_schema(Cow::Owned(combined), name, walk);
            walk.depth -= 1;
            walk.scope.leave(pushed);
            let value = value?;
            if !exclusive || branches.iter().filter(|b| parser.matches(&value, **b)).count() == 1 {
                return Ok(value);
            }
            last = value;
        }
        debug!("No exclusive oneOf value found at '{}'", walk.pointer);
        Ok(last)
    }

    fn pick_type(&mut self, schema: &Schema) -> TypeTag {
        if schema.is_nullable() && self.rng.gen_bool(NULL_PROBABILITY) {
            return TypeTag::Null;
        }
        let candidates: Vec<TypeTag> = schema.types.iter().filter(|t| *t != TypeTag::Null).collect();
        if !candidates.is_empty() {
            return candidates[self.rng.gen_range(0..candidates.len())];
        }
        if !schema.types.is_empty() {
            return TypeTag::Null;
        }
        if schema.is_object() || !schema.required.is_empty() {
            TypeTag::Object
        } else if schema.items.is_some() || !schema.prefix_items.is_empty() || schema.min_items.is_some() {
            TypeTag::Array
        } else if matches!(schema.format.as_deref(), Some("int32" | "int64")) {
            TypeTag::Integer
        } else if schema.minimum.is_some() || schema.maximum.is_some() || schema.multiple_of.is_some() {
            TypeTag::Number
        } else {
            TypeTag::String
        }
    }

    fn any_value(&mut self, name: Option<&str>) -> Value {
        match name {
            Some(name) => faker::guess(name, &mut self.rng),
            None => Value::String(faker::words(&mut self.rng, 1, None)),
        }
    }

    // ------------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------------

    fn integer(&mut self, schema: &Schema, name: Option<&str>, walk: &Walk) -> Result<Value, GenerationError> {
        let lower = schema.lower_bound().map(|(v, exclusive)| {
            let c = v.ceil();
            if exclusive && c == v {
                c as i64 + 1
            } else {
                c as i64
            }
        });
        let upper = schema.upper_bound().map(|(v, exclusive)| {
            let f = v.floor();
            if exclusive && f == v {
                f as i64 - 1
            } else {
                f as i64
            }
        });
        let (format_lo, format_hi) = match schema.format.as_deref() {
            Some("int32") => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        };
        let (lo, hi) = match (lower, upper) {
            (Some(lo), Some(hi)) => (lo, hi),
            (Some(lo), None) => (lo, lo.saturating_add(DEFAULT_SPAN)),
            (None, Some(hi)) if hi >= 0 => (0, hi),
            (None, Some(hi)) => (hi.saturating_sub(DEFAULT_SPAN), hi),
            (None, None) => faker::integer_range(name).unwrap_or((0, DEFAULT_SPAN)),
        };
        let (lo, hi) = (lo.max(format_lo), hi.min(format_hi));
        if lo > hi {
            return Err(walk.unsatisfiable(format!("empty integer range [{lo}, {hi}]")));
        }
        if let Some(step) = schema.multiple_of.filter(|m| *m >= 1.0 && m.fract() == 0.0) {
            let step = step as i64;
            let first = lo.div_euclid(step) + i64::from(lo.rem_euclid(step) != 0);
            let last = hi.div_euclid(step);
            if first > last {
                return Err(walk.unsatisfiable(format!("no multiple of {step} in [{lo}, {hi}]")));
            }
            return Ok(Value::from(self.rng.gen_range(first..=last) * step));
        }
        Ok(Value::from(self.rng.gen_range(lo..=hi)))
    }

    fn number(&mut self, schema: &Schema, name: Option<&str>, walk: &Walk) -> Result<Value, GenerationError> {
        if matches!(schema.format.as_deref(), Some("int32" | "int64")) {
            return self.integer(schema, name, walk);
        }
        let lower = schema.lower_bound();
        let upper = schema.upper_bound();
        let span = DEFAULT_SPAN as f64;
        let (lo, lo_exclusive, hi, hi_exclusive) = match (lower, upper) {
            (Some((lo, le)), Some((hi, he))) => (lo, le, hi, he),
            (Some((lo, le)), None) => (lo, le, lo + span, false),
            (None, Some((hi, he))) => (hi - span, false, hi, he),
            (None, None) => {
                let (lo, hi) = faker::number_range(name).unwrap_or((0.0, span));
                (lo, false, hi, false)
            }
        };
        if lo > hi || (lo == hi && (lo_exclusive || hi_exclusive)) {
            return Err(walk.unsatisfiable(format!("empty number range ({lo}, {hi})")));
        }
        let inside = |v: f64| {
            (if lo_exclusive { v > lo } else { v >= lo }) && (if hi_exclusive { v < hi } else { v <= hi })
        };
        if let Some(step) = schema.multiple_of.filter(|m| *m > 0.0) {
            let mut first = (lo / step).ceil();
            if !inside(first * step) {
                first += 1.0;
            }
            let mut last = (hi / step).floor();
            if !inside(last * step) {
                last -= 1.0;
            }
            if first > last {
                return Err(walk.unsatisfiable(format!("no multiple of {step} in ({lo}, {hi})")));
            }
            let k = self.rng.gen_range(first as i64..=last as i64) as f64;
            return Ok(number(k * step));
        }
        if lo == hi {
            return Ok(number(lo));
        }
        for _ in 0..8 {
            let v = self.rng.gen_range(lo..hi);
            let rounded = (v * 100.0).round() / 100.0;
            if inside(rounded) {
                return Ok(number(rounded));
            }
            if inside(v) {
                return Ok(number(v));
            }
        }
        Ok(number((lo + hi) / 2.0))
    }

    fn string(&mut self, schema: &Schema, name: Option<&str>, walk: &Walk) -> Result<Value, GenerationError> {
        let min = schema.min_length.unwrap_or(0) as usize;
        let max = schema.max_length.map(|m| m as usize);
        if max.is_some_and(|max| max < min) {
            return Err(walk.unsatisfiable(format!("minLength {min} exceeds maxLength")));
        }
        if let Some(value) = schema.format.as_deref().and_then(|f| faker::format(f, &mut self.rng)) {
            return Ok(Value::String(value));
        }
        if let Some(pattern) = &schema.pattern {
            return pattern::generate(&pattern.source, &mut self.rng, min, max)
                .map(Value::String)
                .map_err(|e| walk.unsatisfiable(format!("pattern '{}': {}", pattern.source, e)));
        }
        if schema.content_encoding.as_deref() == Some("base64") {
            return Ok(Value::String(faker::format("byte", &mut self.rng).unwrap_or_default()));
        }
        let text = match faker::by_name(name, &mut self.rng) {
            Some(text) => text,
            None => faker::words(&mut self.rng, min, max),
        };
        Ok(Value::String(faker::fit_length(text, min, max, &mut self.rng)))
    }

    // ------------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------------

    fn child(&mut self, id: SchemaId, name: Option<&str>, segment: &str, walk: &mut Walk) -> Result<Value, GenerationError> {
        let len = walk.pointer.len();
        walk.pointer.push('/');
        walk.pointer.push_str(&crate::schema::escape_pointer(segment));
        walk.depth += 1;
        let result = self.value(id, name, walk);
        walk.depth -= 1;
        walk.pointer.truncate(len);
        result
    }

    fn array(&mut self, schema: &Schema, name: Option<&str>, walk: &mut Walk) -> Result<Value, GenerationError> {
        let min = schema.min_items.unwrap_or(0);
        let max = schema.max_items.unwrap_or(min.max(1) + 3);
        if max < min {
            return Err(walk.unsatisfiable(format!("minItems {min} exceeds maxItems {max}")));
        }
        let len = self.rng.gen_range(min..=max) as usize;
        let mut items: Vec<Value> = Vec::with_capacity(len);

        for prefix in schema.prefix_items.iter().take(len) {
            let segment = items.len().to_string();
            items.push(self.child(*prefix, name, &segment, walk)?);
        }
        if let Some(contains) = schema.contains {
            let wanted = schema.min_contains.unwrap_or(1) as usize;
            for _ in 0..wanted {
                let segment = items.len().to_string();
                items.push(self.child(contains, name, &segment, walk)?);
            }
        }

        let budget = len * UNIQUE_ATTEMPTS_PER_ITEM + UNIQUE_ATTEMPTS_PER_ITEM;
        let mut attempts = 0;
        while items.len() < len && attempts < budget {
            self.check_cancelled()?;
            let segment = items.len().to_string();
            let value = match schema.items {
                Some(item) => self.child(item, name, &segment, walk)?,
                None if !schema.prefix_items.is_empty() => break,
                None => self.any_value(name),
            };
            if schema.unique_items && items.iter().any(|existing| deep_equal(existing, &value)) {
                attempts += 1;
                continue;
            }
            items.push(value);
        }

        if schema.unique_items && (items.len() as u64) < min {
            return Err(GenerationError::CannotFillUnique {
                pointer: walk.pointer.clone(),
                wanted: min,
                found: items.len(),
            });
        }
        if schema.shuffle_items {
            items.shuffle(&mut self.rng);
        }
        Ok(Value::Array(items))
    }

    fn object(&mut self, schema: &Schema, walk: &mut Walk) -> Result<Value, GenerationError> {
        let registry = self.registry;
        let mut map = Map::new();

        for (key, site) in &schema.properties {
            let write_only = registry.get(*site).write_only || registry.get(registry.resolve(*site)).write_only;
            if write_only {
                continue;
            }
            if !schema.is_required(key) && !self.rng.gen_bool(OPTIONAL_PROBABILITY) {
                continue;
            }
            let value = self.child(*site, Some(key.as_str()), key, walk)?;
            map.insert(key.clone(), value);
        }

        for (key, dependents) in &schema.dependent_required {
            if !map.contains_key(key) {
                continue;
            }
            for dependent in dependents {
                if map.contains_key(dependent) {
                    continue;
                }
                let value = match schema.properties.get(dependent) {
                    Some(site) => self.child(*site, Some(dependent.as_str()), dependent, walk)?,
                    None => self.any_value(Some(dependent.as_str())),
                };
                map.insert(dependent.clone(), value);
            }
        }

        for key in &schema.required {
            if !map.contains_key(key) && !schema.properties.contains_key(key) {
                let value = match extra(schema, key) {
                    Some(site) => self.child(site, Some(key.as_str()), key, walk)?,
                    None => self.any_value(Some(key.as_str())),
                };
                map.insert(key.clone(), value);
            }
        }

        let synthesize = schema.properties.is_empty() && !schema.is_closed();
        let mut wanted = schema.min_properties.unwrap_or(0) as usize;
        if synthesize {
            wanted = wanted.max(map.len() + self.rng.gen_range(3..=8));
        }
        if let Some(max) = schema.max_properties {
            wanted = wanted.min(max as usize);
        }
        let mut attempts = 0;
        while map.len() < wanted && attempts < wanted * 4 {
            attempts += 1;
            let key = faker::property_name(&mut self.rng);
            if map.contains_key(key) {
                continue;
            }
            let value = match extra(schema, key) {
                Some(site) => self.child(site, Some(key), key, walk)?,
                None if schema.is_closed() => break,
                None => self.any_value(Some(key)),
            };
            map.insert(key.to_string(), value);
        }

        if let Some(max) = schema.max_properties {
            while map.len() > max as usize {
                let optional = map.keys().rev().find(|k| !schema.is_required(k)).cloned();
                match optional {
                    Some(key) => {
                        map.remove(&key);
                    }
                    None => break,
                }
            }
        }
        Ok(Value::Object(map))
    }
}

// ============================================================================
// Schema merging
// ============================================================================

/// Schema for a key outside `properties`.
fn extra(schema: &Schema, key: &str) -> Option<SchemaId> {
    schema.pattern_property(key).or_else(|| schema.additional_schema())
}

fn number(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Types admitted by both sets; `integer` satisfies `number`.
fn intersect(a: &Types, b: &Types) -> Types {
    let mut out = Types::new();
    for tag in a.iter() {
        if b.contains(tag) {
            out.insert(tag);
        } else if tag == TypeTag::Integer && b.contains(TypeTag::Number) {
            out.insert(TypeTag::Integer);
        } else if tag == TypeTag::Number && b.contains(TypeTag::Integer) {
            out.insert(TypeTag::Integer);
        }
    }
    out
}

/// Fold the keywords of `other` into `target` where `target` leaves them unset.
fn merge(target: &mut Schema, other: &Schema) {
    for (key, id) in &other.properties {
        target.properties.entry(key.clone()).or_insert(*id);
    }
    for (source, id) in &other.pattern_properties {
        if !target.pattern_properties.contains_key(source) {
            if let Err(e) = target.add_pattern_property(source, *id) {
                warn!("Dropping patternProperties entry '{}' while merging allOf: {}", source, e);
            }
        }
    }
    for name in &other.required {
        if !target.is_required(name) {
            target.required.push(name.clone());
        }
    }
    for (key, deps) in &other.dependent_required {
        target.dependent_required.entry(key.clone()).or_insert_with(|| deps.clone());
    }
    target.any_of.extend(other.any_of.iter().copied());
    target.one_of.extend(other.one_of.iter().copied());

    macro_rules! fill {
        ($($field:ident),*) => {
            $(if target.$field.is_none() {
                target.$field = other.$field.clone();
            })*
        };
    }
    fill!(
        pattern,
        min_length,
        max_length,
        format,
        content_encoding,
        multiple_of,
        minimum,
        maximum,
        exclusive_minimum,
        exclusive_maximum,
        items,
        contains,
        min_contains,
        min_items,
        max_items,
        additional_properties,
        min_properties,
        max_properties,
        constant
    );
    if target.enumeration.is_empty() {
        target.enumeration = other.enumeration.clone();
    }
    if target.prefix_items.is_empty() {
        target.prefix_items = other.prefix_items.clone();
    }
    target.unique_items |= other.unique_items;
    target.shuffle_items |= other.shuffle_items;
}

/// A branch of `anyOf`/`oneOf` narrowed by the keywords around it. Branch
/// keywords take precedence; a type conflict keeps the branch's types.
fn combine(base: &Schema, branch: &Schema) -> Schema {
    let mut combined = branch.clone();
    let base_types = base.types.clone();
    merge(&mut combined, base);
    combined.nullable = branch.nullable || (base.nullable && branch.types.is_empty());
    if combined.types.is_empty() {
        combined.types = base_types;
    } else if !base_types.is_empty() {
        let shared = intersect(&combined.types, &base_types);
        if !shared.is_empty() {
            combined.types = shared;
        }
    }
    combined
}

#[cfg(test)]
mod tests;
