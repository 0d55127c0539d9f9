//! Abstract Syntax Tree for docsel expressions.
//!
//! The expression language is a restricted single-expression subset of a
//! dynamic scripting language: literals, names, attribute chains, calls,
//! subscripts, operators, conditionals, anonymous functions and
//! single-generator comprehensions.

use serde::{Deserialize, Serialize};

/// A literal constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// True for numeric literals.
    pub fn is_number(&self) -> bool {
        matches!(self, Literal::Int(_) | Literal::Float(_))
    }
}

/// Arithmetic and bitwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinaryOp {
    /// Source spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::MatMul => "@",
            BinaryOp::LShift => "<<",
            BinaryOp::RShift => ">>",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
        }
    }

    /// Look an operator up by its source spelling.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "//" => BinaryOp::FloorDiv,
            "%" => BinaryOp::Mod,
            "**" => BinaryOp::Pow,
            "@" => BinaryOp::MatMul,
            "<<" => BinaryOp::LShift,
            ">>" => BinaryOp::RShift,
            "|" => BinaryOp::BitOr,
            "^" => BinaryOp::BitXor,
            "&" => BinaryOp::BitAnd,
            _ => return None,
        })
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

/// The ten comparison kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    /// Source spelling of the comparison.
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }

    /// Look a comparison up by its source spelling.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "==" => CmpOp::Eq,
            "!=" => CmpOp::NotEq,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::LtE,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::GtE,
            "is" => CmpOp::Is,
            "is not" => CmpOp::IsNot,
            "in" => CmpOp::In,
            "not in" => CmpOp::NotIn,
            _ => return None,
        })
    }
}

/// Short-circuit boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn keyword(self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }
}

/// A keyword argument; `arg` is `None` for a `**mapping` spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
}

/// One `for target in iter [if cond]*` clause of a comprehension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    pub target: String,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// A positional parameter with an optional default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Parameter list of an anonymous function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Arguments {
    pub params: Vec<Param>,
    pub vararg: Option<String>,
    pub kwarg: Option<String>,
}

impl Arguments {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.vararg.is_none() && self.kwarg.is_none()
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Anonymous function (`lambda args: body`)
    Lambda { args: Arguments, body: Box<Expr> },
    Literal(Literal),
    Name(String),
    /// Attribute access (`value.attr`)
    Attribute { value: Box<Expr>, attr: String },
    BinOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// Comparison chain (`a < b <= c`)
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    BoolOp { op: BoolOp, values: Vec<Expr> },
    /// Conditional expression (`body if test else orelse`)
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    /// Positional spread (`*value`) inside a call
    Starred(Box<Expr>),
    Subscript { value: Box<Expr>, slice: Box<Expr> },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    /// A construct the language recognizes but does not model (dict and set
    /// displays); carries the kind name.
    Opaque(String),
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn attr(value: Expr, attr: impl Into<String>) -> Self {
        Expr::Attribute {
            value: Box::new(value),
            attr: attr.into(),
        }
    }

    pub fn compare(left: Expr, op: CmpOp, right: Expr) -> Self {
        Expr::Compare {
            left: Box::new(left),
            ops: vec![op],
            comparators: vec![right],
        }
    }

    /// Build a boolean node, collapsing singleton operand lists.
    /// Returns `None` when there is nothing left.
    pub fn bool_op(op: BoolOp, mut values: Vec<Expr>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop(),
            _ => Some(Expr::BoolOp { op, values }),
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Decompose a pure attribute chain `root.a.b.c` into `("root", ["a", "b", "c"])`.
    pub fn attribute_chain(&self) -> Option<(&str, Vec<&str>)> {
        let mut attrs = Vec::new();
        let mut node = self;
        loop {
            match node {
                Expr::Attribute { value, attr } => {
                    attrs.push(attr.as_str());
                    node = value;
                }
                Expr::Name(root) if !attrs.is_empty() => {
                    attrs.reverse();
                    return Some((root, attrs));
                }
                _ => return None,
            }
        }
    }

    /// True when the node is a literal string.
    pub fn as_str_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(Literal::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Short kind name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Lambda { .. } => "lambda",
            Expr::Literal(_) => "literal",
            Expr::Name(_) => "name",
            Expr::Attribute { .. } => "attribute",
            Expr::BinOp { .. } => "binary operation",
            Expr::UnaryOp { .. } => "unary operation",
            Expr::Compare { .. } => "comparison",
            Expr::BoolOp { .. } => "boolean operation",
            Expr::IfExp { .. } => "conditional",
            Expr::Call { .. } => "call",
            Expr::Starred(_) => "starred",
            Expr::Subscript { .. } => "subscript",
            Expr::Slice { .. } => "slice",
            Expr::List(_) => "list",
            Expr::Tuple(_) => "tuple",
            Expr::ListComp { .. } => "list comprehension",
            Expr::GeneratorExp { .. } => "generator expression",
            Expr::Opaque(_) => "opaque",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_chain() {
        let e = Expr::attr(Expr::attr(Expr::name("person"), "primary_name"), "first_name");
        assert_eq!(
            e.attribute_chain(),
            Some(("person", vec!["primary_name", "first_name"]))
        );
        assert_eq!(Expr::name("person").attribute_chain(), None);
    }

    #[test]
    fn test_json_dump() {
        let e = Expr::attr(Expr::name("person"), "gender");
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            serde_json::json!({"Attribute": {"value": {"Name": "person"}, "attr": "gender"}})
        );
        let back: Expr = serde_json::from_value(serde_json::to_value(&e).unwrap()).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_bool_op_collapse() {
        assert_eq!(Expr::bool_op(BoolOp::And, vec![]), None);
        assert_eq!(
            Expr::bool_op(BoolOp::Or, vec![Expr::name("a")]),
            Some(Expr::name("a"))
        );
    }
}
