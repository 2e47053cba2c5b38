//! Boolean expression language used by Condition nodes.
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | compare
//! compare := operand (("==" | "===" | "!=" | "!==" | ">" | ">=" | "<" | "<=") operand)?
//! operand := literal | template-ref | path | "(" expr ")"
//! ```
//!
//! Paths (`status`, `user.plan`) resolve against the outputs of the
//! condition's live direct predecessors.

use crate::template::{self, OutputLookup, TemplateRef};
use crate::{NodeOutput, ResolutionError, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "===",
            CmpOp::Ne => "!==",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Reference(TemplateRef),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
}

/// What an expression can see while it is evaluated.
pub struct Scope<'a, L: OutputLookup> {
    /// Outputs visible to template references.
    pub outputs: &'a L,
    /// Live direct predecessors, searched in order for bare paths.
    pub locals: Vec<&'a NodeOutput>,
}

impl Expr {
    /// Template references in evaluation order.
    pub fn references(&self) -> Vec<&TemplateRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a TemplateRef>) {
        match self {
            Expr::Reference(r) => refs.push(r),
            Expr::Not(inner) => inner.collect_refs(refs),
            Expr::And(l, r) | Expr::Or(l, r) | Expr::Compare(_, l, r) => {
                l.collect_refs(refs);
                r.collect_refs(refs);
            }
            Expr::Literal(_) | Expr::Path(_) => {}
        }
    }

    pub fn evaluate<L: OutputLookup>(&self, scope: &Scope<'_, L>) -> Result<Value, ResolutionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Reference(r) => template::lookup(r, scope.outputs).cloned(),
            Expr::Path(segments) => {
                let path = segments.join(".");
                scope
                    .locals
                    .iter()
                    .find_map(|output| output.get(&path))
                    .cloned()
                    .ok_or(ResolutionError::UnknownIdentifier { name: path })
            }
            Expr::Not(inner) => Ok(Value::Bool(!inner.evaluate(scope)?.is_truthy())),
            Expr::And(l, r) => {
                let left = l.evaluate(scope)?;
                if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(r.evaluate(scope)?.is_truthy()))
            }
            Expr::Or(l, r) => {
                let left = l.evaluate(scope)?;
                if left.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(r.evaluate(scope)?.is_truthy()))
            }
            Expr::Compare(op, l, r) => {
                let (left, right) = (l.evaluate(scope)?, r.evaluate(scope)?);
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => !values_equal(left, right),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ord) => match op {
                    CmpOp::Gt => ord == Ordering::Greater,
                    CmpOp::Ge => ord != Ordering::Less,
                    CmpOp::Lt => ord == Ordering::Less,
                    _ => ord != Ordering::Greater,
                },
                None => false,
            }
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => left == right,
    }
}

/// Parse and evaluate `source`, requiring a boolean result.
pub fn evaluate_condition<L: OutputLookup>(
    source: &str,
    scope: &Scope<'_, L>,
) -> Result<bool, ResolutionError> {
    match parse(source)?.evaluate(scope)? {
        Value::Bool(b) => Ok(b),
        other => Err(ResolutionError::NotBoolean {
            expression: source.to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Value(Value),
    Ref(TemplateRef),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

pub fn parse(source: &str) -> Result<Expr, ResolutionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let expr = parser.or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

const OPERATORS: [&str; 12] = [
    "===", "!==", "==", "!=", ">=", "<=", "&&", "||", ">", "<", "!", "=",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ResolutionError> {
    let invalid = |reason: String| ResolutionError::InvalidExpression {
        expression: source.to_string(),
        reason,
    };
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < source.len() {
        let rest = &source[i..];
        let c = match rest.chars().next() {
            Some(c) => c,
            None => break,
        };

        if c.is_whitespace() {
            i += c.len_utf8();
        } else if rest.starts_with("{{@") {
            let end = rest
                .find("}}")
                .ok_or_else(|| invalid("unterminated template reference".into()))?;
            let reference = TemplateRef::parse_inner(&rest[3..end], i..i + end + 2)?;
            tokens.push(Token::Ref(reference));
            i += end + 2;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '"' || c == '\'' {
            let close = rest[1..]
                .find(c)
                .ok_or_else(|| invalid("unterminated string literal".into()))?;
            tokens.push(Token::Value(Value::String(rest[1..1 + close].to_string())));
            i += close + 2;
        } else if c.is_ascii_digit() || (c == '-' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) {
            let len = rest[1..]
                .find(|d: char| !(d.is_ascii_digit() || d == '.'))
                .map(|n| n + 1)
                .unwrap_or(rest.len());
            let number = rest[..len]
                .parse::<f64>()
                .map_err(|_| invalid(format!("bad number '{}'", &rest[..len])))?;
            tokens.push(Token::Value(Value::Number(number)));
            i += len;
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let len = rest
                .find(|d: char| !(d.is_alphanumeric() || d == '_' || d == '$' || d == '.'))
                .unwrap_or(rest.len());
            let word = &rest[..len];
            tokens.push(match word {
                "true" => Token::Value(Value::Bool(true)),
                "false" => Token::Value(Value::Bool(false)),
                "null" | "undefined" => Token::Value(Value::Null),
                _ => Token::Ident(word.to_string()),
            });
            i += len;
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(*op)) {
            if *op == "=" {
                return Err(invalid("assignment is not allowed, use '=='".into()));
            }
            tokens.push(Token::Op(*op));
            i += op.len();
        } else {
            return Err(invalid(format!("unexpected character '{}'", c)));
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> ResolutionError {
        ResolutionError::InvalidExpression {
            expression: self.source.to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn or(&mut self) -> Result<Expr, ResolutionError> {
        let mut left = self.and()?;
        while self.peek_op() == Some("||") {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ResolutionError> {
        let mut left = self.compare()?;
        while self.peek_op() == Some("&&") {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.compare()?));
        }
        Ok(left)
    }

    /// `!` binds tighter than comparison: `!a === b` is `(!a) === b`.
    fn unary(&mut self) -> Result<Expr, ResolutionError> {
        if self.peek_op() == Some("!") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.operand()
    }

    fn compare(&mut self) -> Result<Expr, ResolutionError> {
        let left = self.unary()?;
        let op = match self.peek_op() {
            Some("==") | Some("===") => CmpOp::Eq,
            Some("!=") | Some("!==") => CmpOp::Ne,
            Some(">") => CmpOp::Gt,
            Some(">=") => CmpOp::Ge,
            Some("<") => CmpOp::Lt,
            Some("<=") => CmpOp::Le,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.unary()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn operand(&mut self) -> Result<Expr, ResolutionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::Value(v) => Ok(Expr::Literal(v)),
            Token::Ref(r) => Ok(Expr::Reference(r)),
            Token::Ident(name) => {
                let segments: Vec<String> = name.split('.').map(str::to_string).collect();
                if segments.iter().any(String::is_empty) {
                    return Err(self.error("empty path segment"));
                }
                Ok(Expr::Path(segments))
            }
            Token::LParen => {
                let inner = self.or()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("missing ')'")),
                }
            }
            Token::RParen | Token::Op(_) => Err(self.error("expected a value")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval(source: &str, local: &NodeOutput) -> Result<bool, ResolutionError> {
        let outputs: HashMap<String, NodeOutput> = HashMap::new();
        let scope = Scope {
            outputs: &outputs,
            locals: vec![local],
        };
        evaluate_condition(source, &scope)
    }

    #[test]
    fn strict_and_loose_equality_agree() {
        let out = NodeOutput::new("t", "Form").with_field("status", "active");
        assert!(eval("status == \"active\"", &out).unwrap());
        assert!(eval("status === 'active'", &out).unwrap());
        assert!(!eval("status !== 'active'", &out).unwrap());
    }

    #[test]
    fn numeric_comparison_and_logic() {
        let out = NodeOutput::new("t", "Form")
            .with_field("count", 5i64)
            .with_field("vip", false);
        assert!(eval("count > 3 && !vip", &out).unwrap());
        assert!(eval("(count < 3) || count >= 5", &out).unwrap());
        assert!(!eval("count <= -1", &out).unwrap());
    }

    #[test]
    fn negation_binds_to_its_operand() {
        let out = NodeOutput::new("t", "Form").with_field("flag", "yes");
        assert!(!eval("!flag === true", &out).unwrap());
        assert!(eval("!flag === false", &out).unwrap());
        assert!(eval("!(flag === 'no')", &out).unwrap());
        assert!(matches!(
            parse("!a === b").unwrap(),
            Expr::Compare(CmpOp::Eq, ref left, _) if matches!(**left, Expr::Not(_))
        ));
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let out = NodeOutput::new("t", "Form");
        assert_eq!(
            eval("missing == 1", &out),
            Err(ResolutionError::UnknownIdentifier {
                name: "missing".into()
            })
        );
    }

    #[test]
    fn non_boolean_result_is_rejected() {
        let out = NodeOutput::new("t", "Form").with_field("status", "active");
        assert!(matches!(
            eval("status", &out),
            Err(ResolutionError::NotBoolean { .. })
        ));
    }

    #[test]
    fn single_equals_is_rejected() {
        assert!(parse("a = 1").is_err());
    }

    #[test]
    fn template_references_parse() {
        let expr = parse("{{@trigger-1:Form.status}} === 'active'").unwrap();
        let refs = expr.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].node_id, "trigger-1");
    }
}
