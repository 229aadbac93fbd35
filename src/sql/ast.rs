//! Compiled expression tree
//!
//! The compiler lowers SQL predicates into this small operator set. Its
//! rendered form (see [`Expr::render`]) is itself valid compiler input and
//! parses back to an identical tree.
//!
//! Precedence (lowest to highest):
//! 1. Ternary: `?:`
//! 2. Logical OR: `||`
//! 3. Logical AND: `&&`
//! 4. Negation: `!`
//! 5. Comparison: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! 6. Additive: `+`, `-`
//! 7. Multiplicative: `*`, `/`, `%`
//! 8. Unary minus
//! 9. Primary: literals, row references, calls, parenthesized expressions

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulus => "%",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
        )
    }

    /// `a op b` holds iff `b op.flip() a` holds.
    pub fn flip(&self) -> Self {
        match self {
            BinaryOperator::LessThan => BinaryOperator::GreaterThan,
            BinaryOperator::LessThanOrEqual => BinaryOperator::GreaterThanOrEqual,
            BinaryOperator::GreaterThan => BinaryOperator::LessThan,
            BinaryOperator::GreaterThanOrEqual => BinaryOperator::LessThanOrEqual,
            other => *other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Row lookup by key
    Column(String),
    Unary(UnaryOperator, Box<Expr>),
    Binary(Box<Expr>, BinaryOperator, Box<Expr>),
    /// Upper-cased function name and arguments
    Call(String, Vec<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::Binary(Box::new(left), op, Box::new(right))
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Unary(UnaryOperator::Not, Box::new(inner))
    }

    pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    /// Fold a list with `op`, or return `empty` when there is nothing to fold.
    pub fn fold(items: Vec<Expr>, op: BinaryOperator, empty: Expr) -> Self {
        let mut iter = items.into_iter();
        match iter.next() {
            Some(first) => iter.fold(first, |acc, e| Expr::binary(acc, op, e)),
            None => empty,
        }
    }

    /// Every row key this expression reads, in first-use order.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(key) => {
                if !out.contains(key) {
                    out.push(key.clone());
                }
            }
            Expr::Unary(_, inner) => inner.collect_columns(out),
            Expr::Binary(l, _, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_columns(out)),
            Expr::Ternary(c, t, e) => {
                c.collect_columns(out);
                t.collect_columns(out);
                e.collect_columns(out);
            }
        }
    }

    /// Minimal-operator source form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Expr::Literal(v) => out.push_str(&render_literal(v)),
            Expr::Column(key) => {
                out.push_str("${");
                out.push_str(key);
                out.push('}');
            }
            Expr::Unary(UnaryOperator::Not, inner) => {
                out.push_str("!(");
                inner.write_to(out);
                out.push(')');
            }
            Expr::Unary(UnaryOperator::Negate, inner) => {
                out.push_str("-(");
                inner.write_to(out);
                out.push(')');
            }
            Expr::Binary(l, op, r) => {
                out.push('(');
                l.write_to(out);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                r.write_to(out);
                out.push(')');
            }
            Expr::Call(name, args) => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.write_to(out);
                }
                out.push(')');
            }
            Expr::Ternary(c, t, e) => {
                out.push('(');
                c.write_to(out);
                out.push_str(" ? ");
                t.write_to(out);
                out.push_str(" : ");
                e.write_to(out);
                out.push(')');
            }
        }
    }
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_fully_parenthesized() {
        let e = Expr::binary(
            Expr::Column("a".into()),
            BinaryOperator::GreaterThanOrEqual,
            Expr::Literal(json!(1)),
        );
        let e = Expr::binary(e, BinaryOperator::And, Expr::not(Expr::Literal(json!(true))));
        assert_eq!(e.render(), "((${a} >= 1) && !(TRUE))");
    }

    #[test]
    fn test_render_strings_escaped() {
        let e = Expr::Call("UPPER".into(), vec![Expr::Literal(json!("it's"))]);
        assert_eq!(e.render(), "UPPER('it''s')");
    }

    #[test]
    fn test_columns_deduplicated() {
        let e = Expr::ternary(
            Expr::Column("a".into()),
            Expr::Column("b".into()),
            Expr::Column("a".into()),
        );
        assert_eq!(e.columns(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_fold_empty() {
        let e = Expr::fold(vec![], BinaryOperator::Or, Expr::Literal(json!(false)));
        assert_eq!(e, Expr::Literal(json!(false)));
    }
}
