//! `${resource.output}` references inside attribute values
//!
//! A string attribute that is exactly one reference is replaced by the
//! referenced output value with its JSON type preserved. References embedded
//! in a longer string are interpolated as text.

use crate::types::Attributes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_.-]+)\}").expect("reference pattern is valid")
});

/// A pointer to one output of another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub resource: String,
    pub output: String,
}

impl Reference {
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.output)
    }
}

/// All references in a value, in order of first appearance
pub fn references_in(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    walk(value, &mut found);
    found
}

/// All references across an attribute set, in key order
pub fn collect_references(attributes: &Attributes) -> Vec<Reference> {
    let mut found = Vec::new();
    for value in attributes.values() {
        walk(value, &mut found);
    }
    found
}

fn walk(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(s) => {
            for caps in REFERENCE.captures_iter(s) {
                let reference = Reference::new(&caps[1], &caps[2]);
                if !found.contains(&reference) {
                    found.push(reference);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| walk(v, found)),
        Value::Object(map) => map.values().for_each(|v| walk(v, found)),
        _ => {}
    }
}

/// Substitute references in a value.
///
/// Returns every reference the lookup could not answer on failure.
pub fn resolve_value<F>(value: &Value, lookup: &F) -> Result<Value, Vec<Reference>>
where
    F: Fn(&Reference) -> Option<Value>,
{
    let mut missing = Vec::new();
    let resolved = substitute(value, lookup, &mut missing);
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(missing)
    }
}

/// Substitute references in every attribute
pub fn resolve_attributes<F>(attributes: &Attributes, lookup: &F) -> Result<Attributes, Vec<Reference>>
where
    F: Fn(&Reference) -> Option<Value>,
{
    let mut missing = Vec::new();
    let resolved = attributes
        .iter()
        .map(|(k, v)| (k.clone(), substitute(v, lookup, &mut missing)))
        .collect();
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(missing)
    }
}

/// Substitute what the lookup knows and leave other references in place.
///
/// Returns the new value and the references left untouched.
pub fn resolve_partial<F>(value: &Value, lookup: &F) -> (Value, Vec<Reference>)
where
    F: Fn(&Reference) -> Option<Value>,
{
    let mut missing = Vec::new();
    let resolved = substitute(value, lookup, &mut missing);
    (resolved, missing)
}

fn substitute<F>(value: &Value, lookup: &F, missing: &mut Vec<Reference>) -> Value
where
    F: Fn(&Reference) -> Option<Value>,
{
    match value {
        Value::String(s) => substitute_str(s, lookup, missing),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute(v, lookup, missing))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, lookup, missing)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str<F>(s: &str, lookup: &F, missing: &mut Vec<Reference>) -> Value
where
    F: Fn(&Reference) -> Option<Value>,
{
    // Whole-string reference keeps the output's JSON type
    if let Some(caps) = REFERENCE.captures(s)
        && caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len())
    {
        let reference = Reference::new(&caps[1], &caps[2]);
        return match lookup(&reference) {
            Some(v) => v,
            None => {
                push_missing(missing, reference);
                Value::String(s.to_string())
            }
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in REFERENCE.captures_iter(s) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&s[last..m.start()]);
        let reference = Reference::new(&caps[1], &caps[2]);
        match lookup(&reference) {
            Some(Value::String(text)) => out.push_str(&text),
            Some(other) => out.push_str(&other.to_string()),
            None => {
                out.push_str(m.as_str());
                push_missing(missing, reference);
            }
        }
        last = m.end();
    }
    out.push_str(&s[last..]);
    Value::String(out)
}

fn push_missing(missing: &mut Vec<Reference>, reference: Reference) {
    if !missing.contains(&reference) {
        missing.push(reference);
    }
}
