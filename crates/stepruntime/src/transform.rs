use crate::run::NodeFailure;
use stepcore::template::{self, OutputLookup};
use stepcore::{ActionError, Fields, NodeOutput, TransformConfig, TransformKind, Value};

/// Apply a Transform node.
///
/// `outputs` is what template references may see; `upstream` holds the
/// outputs of live direct predecessors in edge order.
pub fn apply(
    config: &TransformConfig,
    outputs: &impl OutputLookup,
    upstream: &[&NodeOutput],
) -> Result<Fields, NodeFailure> {
    let transform_type = config.transform_type.as_deref().unwrap_or_default();
    let kind = TransformKind::parse(transform_type).ok_or_else(|| ActionError::InvalidConfig {
        field: "transformType".into(),
        reason: format!("unknown transform '{}'", transform_type),
    })?;

    match kind {
        TransformKind::Map => map(config, outputs),
        TransformKind::Pick => pick(config, upstream),
        TransformKind::Merge => Ok(merge(upstream)),
        TransformKind::JsonParse => json_parse(config, outputs),
        TransformKind::JsonStringify => json_stringify(config, outputs),
    }
}

fn field<'a>(config: &'a TransformConfig, name: &str) -> Result<&'a Value, NodeFailure> {
    config.fields.get(name).ok_or_else(|| {
        NodeFailure::from(ActionError::InvalidConfig {
            field: name.into(),
            reason: "missing".into(),
        })
    })
}

fn map(config: &TransformConfig, outputs: &impl OutputLookup) -> Result<Fields, NodeFailure> {
    let mapping = field(config, "fields")?.as_object().ok_or_else(|| ActionError::InvalidConfig {
        field: "fields".into(),
        reason: "expected an object of output field to template".into(),
    })?;
    Ok(template::resolve_fields(mapping, outputs)?)
}

fn pick(config: &TransformConfig, upstream: &[&NodeOutput]) -> Result<Fields, NodeFailure> {
    let names: Vec<String> = match field(config, "fields")? {
        Value::Array(items) => items.iter().filter_map(|v| v.as_str()).map(str::to_string).collect(),
        Value::String(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        other => {
            return Err(ActionError::InvalidConfig {
                field: "fields".into(),
                reason: format!("expected a list of field names, got {}", other.type_name()),
            }
            .into())
        }
    };

    let merged = merge(upstream);
    let source = NodeOutput::new("", "").with_fields(merged);
    let mut picked = Fields::new();
    for name in names {
        let value = source
            .get(&name)
            .ok_or_else(|| ActionError::Failed(format!("no upstream field '{}' to pick", name)))?;
        picked.insert(name, value.clone());
    }
    Ok(picked)
}

fn merge(upstream: &[&NodeOutput]) -> Fields {
    let mut merged = Fields::new();
    for output in upstream {
        merged.extend(output.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

fn json_parse(config: &TransformConfig, outputs: &impl OutputLookup) -> Result<Fields, NodeFailure> {
    let input = template::resolve_value(field(config, "input")?, outputs)?;
    let text = input.to_template_string();
    let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| ActionError::InvalidConfig {
        field: "input".into(),
        reason: format!("not valid JSON: {}", e),
    })?;
    Ok(match Value::from(parsed) {
        Value::Object(fields) => fields,
        other => Fields::from([("value".to_string(), other)]),
    })
}

fn json_stringify(config: &TransformConfig, outputs: &impl OutputLookup) -> Result<Fields, NodeFailure> {
    let input = field(config, "input")?;
    let json = match input.as_str() {
        // A lone reference stringifies the referenced value itself, not its
        // template rendering.
        Some(text) => match template::references(text)?.as_slice() {
            [only] if only.span == (0..text.len()) => template::lookup(only, outputs)?.to_json().to_string(),
            _ => serde_json::Value::String(template::resolve(text, outputs)?).to_string(),
        },
        None => input.to_json().to_string(),
    };
    Ok(Fields::from([("json".to_string(), Value::String(json))]))
}
