//! TypeScript text for values, templates and condition expressions.

use std::collections::HashMap;
use stepcore::expr::{CmpOp, Expr};
use stepcore::template::TemplateRef;
use stepcore::Value;

/// Node id to the variable holding that node's output.
pub(crate) type Bindings = HashMap<String, String>;

/// Quoted string literal. JSON string syntax is valid TypeScript.
pub(crate) fn string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

pub(crate) fn literal(value: &Value) -> String {
    value.to_json().to_string()
}

pub(crate) fn reference(r: &TemplateRef, bindings: &Bindings) -> String {
    let token = format!("{{{{@{}:{}.{}}}}}", r.node_id, r.label, r.field);
    let var = bindings.get(&r.node_id).map(String::as_str).unwrap_or("undefined");
    format!("ref({}, {}, {})", var, string(&r.field), string(&token))
}

/// Lower a config string. References render through `text()`, matching
/// how the engine substitutes them; the result is always a string.
pub(crate) fn template(source: &str, refs: &[TemplateRef], bindings: &Bindings) -> String {
    match refs {
        [] => string(source),
        [only] if only.span == (0..source.len()) => format!("text({})", reference(only, bindings)),
        _ => {
            let mut out = String::from("`");
            let mut cursor = 0;
            for r in refs {
                out.push_str(&escape_template_literal(&source[cursor..r.span.start]));
                out.push_str("${text(");
                out.push_str(&reference(r, bindings));
                out.push_str(")}");
                cursor = r.span.end;
            }
            out.push_str(&escape_template_literal(&source[cursor..]));
            out.push('`');
            out
        }
    }
}

fn escape_template_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${")
}

/// Lower a condition expression. `upstream` names the array of live
/// predecessor outputs that bare identifiers are looked up in.
pub(crate) fn expression(expr: &Expr, bindings: &Bindings, upstream: &str) -> String {
    match expr {
        Expr::Literal(v) => literal(v),
        Expr::Reference(r) => reference(r, bindings),
        Expr::Path(segments) => format!("local({}, {})", upstream, string(&segments.join("."))),
        Expr::Not(inner) => format!("!truthy({})", expression(inner, bindings, upstream)),
        Expr::And(l, r) => format!(
            "(truthy({}) && truthy({}))",
            expression(l, bindings, upstream),
            expression(r, bindings, upstream)
        ),
        Expr::Or(l, r) => format!(
            "(truthy({}) || truthy({}))",
            expression(l, bindings, upstream),
            expression(r, bindings, upstream)
        ),
        Expr::Compare(op, l, r) => {
            let (l, r) = (expression(l, bindings, upstream), expression(r, bindings, upstream));
            match op {
                CmpOp::Eq => format!("equals({}, {})", l, r),
                CmpOp::Ne => format!("!equals({}, {})", l, r),
                CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
                    format!("compare({}, {}, {})", l, r, string(op.symbol()))
                }
            }
        }
    }
}

/// A TypeScript identifier derived from `raw`, e.g. `send-email` -> `sendEmail`.
pub(crate) fn camel_ident(raw: &str) -> String {
    let mut out = String::new();
    let mut upper = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if out.is_empty() && c.is_ascii_digit() {
                out.push('_');
            }
            if upper && !out.is_empty() {
                out.push(c.to_ascii_uppercase());
            } else if out.is_empty() {
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
            upper = false;
        } else {
            upper = true;
        }
    }
    out
}

/// Variable names for node outputs, unique within one program.
pub(crate) fn node_variables<'a>(ids: impl IntoIterator<Item = &'a str>) -> Bindings {
    let mut bindings = Bindings::new();
    let mut taken: Vec<String> = Vec::new();
    for id in ids {
        let sanitized: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let base = format!("node_{}", sanitized);
        let mut name = base.clone();
        let mut n = 2;
        while taken.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        taken.push(name.clone());
        bindings.insert(id.to_string(), name);
    }
    bindings
}
