//! `{{@nodeId:Label.field}}` references between node configs and outputs.
//!
//! The node id is authoritative. The label only helps humans reading the
//! config and is never compared against the node's current label.

use crate::{Fields, NodeOutput, ResolutionError, Value};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::{Arc, OnceLock};

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{\{@([^{}]*)\}\}").expect("valid token pattern"))
}

/// One parsed reference token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub node_id: String,
    pub label: String,
    /// Field name, possibly a dotted path into nested output values.
    pub field: String,
    /// Byte range of the whole token in the source string.
    pub span: Range<usize>,
}

impl TemplateRef {
    /// Parse the inside of a token: `nodeId:Label.field`.
    pub fn parse_inner(inner: &str, span: Range<usize>) -> Result<Self, ResolutionError> {
        let malformed = || ResolutionError::MalformedToken {
            token: format!("{{{{@{}}}}}", inner),
        };
        let (node_id, rest) = inner.split_once(':').ok_or_else(malformed)?;
        let (label, field) = rest.split_once('.').ok_or_else(malformed)?;
        let (node_id, field) = (node_id.trim(), field.trim());
        if node_id.is_empty() || field.is_empty() {
            return Err(malformed());
        }
        Ok(TemplateRef {
            node_id: node_id.to_string(),
            label: label.trim().to_string(),
            field: field.to_string(),
            span,
        })
    }
}

/// Read access to the outputs published so far in a run.
pub trait OutputLookup {
    fn output(&self, node_id: &str) -> Option<&NodeOutput>;
}

impl OutputLookup for HashMap<String, NodeOutput> {
    fn output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.get(node_id)
    }
}

impl OutputLookup for HashMap<String, Arc<NodeOutput>> {
    fn output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.get(node_id).map(|o| o.as_ref())
    }
}

impl OutputLookup for BTreeMap<String, NodeOutput> {
    fn output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.get(node_id)
    }
}

/// All reference tokens in `template`, in order of appearance.
pub fn references(template: &str) -> Result<Vec<TemplateRef>, ResolutionError> {
    token_regex()
        .captures_iter(template)
        .map(|cap| {
            let whole = cap.get(0).expect("group 0 always present");
            TemplateRef::parse_inner(&cap[1], whole.range())
        })
        .collect()
}

pub fn has_references(template: &str) -> bool {
    token_regex().is_match(template)
}

/// Value a reference points to.
pub fn lookup<'a>(
    reference: &TemplateRef,
    outputs: &'a impl OutputLookup,
) -> Result<&'a Value, ResolutionError> {
    let output = outputs
        .output(&reference.node_id)
        .ok_or_else(|| ResolutionError::UnresolvedReference {
            node_id: reference.node_id.clone(),
            field: reference.field.clone(),
        })?;
    output
        .get(&reference.field)
        .ok_or_else(|| ResolutionError::MissingField {
            node_id: reference.node_id.clone(),
            field: reference.field.clone(),
        })
}

/// Substitute every token in `template`. Fails on the first token that does
/// not resolve; no partially substituted string is ever returned.
pub fn resolve(template: &str, outputs: &impl OutputLookup) -> Result<String, ResolutionError> {
    let refs = references(template)?;
    if refs.is_empty() {
        return Ok(template.to_string());
    }

    let mut resolved = String::with_capacity(template.len());
    let mut cursor = 0;
    for reference in &refs {
        let value = lookup(reference, outputs)?;
        resolved.push_str(&template[cursor..reference.span.start]);
        resolved.push_str(&value.to_template_string());
        cursor = reference.span.end;
    }
    resolved.push_str(&template[cursor..]);
    Ok(resolved)
}

/// Resolve a config value. Only strings are scanned; everything else passes
/// through untouched.
pub fn resolve_value(value: &Value, outputs: &impl OutputLookup) -> Result<Value, ResolutionError> {
    match value {
        Value::String(s) => resolve(s, outputs).map(Value::String),
        other => Ok(other.clone()),
    }
}

pub fn resolve_fields(fields: &Fields, outputs: &impl OutputLookup) -> Result<Fields, ResolutionError> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, outputs)?)))
        .collect()
}
