//! Canonical text rendering of expression trees.
//!
//! Every compound node is parenthesized, so the output re-parses to the same
//! tree without any precedence reasoning. Rendering a re-parsed rendering
//! yields identical text.

use std::fmt;

use crate::ast::*;

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => write!(f, "None"),
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(x) => {
                let s = x.to_string();
                if s.contains(['.', 'e', 'E', 'i', 'N']) {
                    write!(f, "{}", s)
                } else {
                    write!(f, "{}.0", s)
                }
            }
            Literal::Str(s) => write_quoted(f, s),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\'' => f.write_str("\\'")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\0' => f.write_str("\\0")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.default {
                Some(default) => format!("{}={}", p.name, default),
                None => p.name.clone(),
            })
            .collect();
        if let Some(vararg) = &self.vararg {
            parts.push(format!("*{}", vararg));
        }
        if let Some(kwarg) = &self.kwarg {
            parts.push(format!("**{}", kwarg));
        }
        f.write_str(&parts.join(", "))
    }
}

impl fmt::Display for Comprehension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "for {} in {}", self.target, self.iter)?;
        for cond in &self.ifs {
            write!(f, " if {}", cond)?;
        }
        Ok(())
    }
}

fn join(items: &[Expr]) -> String {
    items
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_generators(f: &mut fmt::Formatter<'_>, generators: &[Comprehension]) -> fmt::Result {
    for generator in generators {
        write!(f, " {}", generator)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Lambda { args, body } => {
                // the body extends as far right as possible
                if args.is_empty() {
                    write!(f, "(lambda: {})", body)
                } else {
                    write!(f, "(lambda {}: {})", args, body)
                }
            }
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Name(name) => f.write_str(name),
            Expr::Attribute { value, attr } => match value.as_ref() {
                // `1.real` would lex as a float
                Expr::Literal(lit) if lit.is_number() => write!(f, "({}).{}", value, attr),
                _ => write!(f, "{}.{}", value, attr),
            },
            Expr::BinOp { left, op, right } => write!(f, "({} {} {})", left, op, right),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "(not {})", operand),
                UnaryOp::Neg => write!(f, "(-{})", operand),
                UnaryOp::Pos => write!(f, "(+{})", operand),
                UnaryOp::Invert => write!(f, "(~{})", operand),
            },
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                write!(f, "({}", left)?;
                for (op, right) in ops.iter().zip(comparators) {
                    write!(f, " {} {}", op, right)?;
                }
                f.write_str(")")
            }
            Expr::BoolOp { op, values } => {
                let sep = format!(" {} ", op);
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(&sep))
            }
            Expr::IfExp { test, body, orelse } => {
                write!(f, "({} if {} else {})", body, test, orelse)
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let mut parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                for kw in keywords {
                    match &kw.arg {
                        Some(name) => parts.push(format!("{}={}", name, kw.value)),
                        None => parts.push(format!("**{}", kw.value)),
                    }
                }
                write!(f, "{}({})", func, parts.join(", "))
            }
            Expr::Starred(value) => write!(f, "*{}", value),
            Expr::Subscript { value, slice } => match slice.as_ref() {
                Expr::Tuple(items) if !items.is_empty() => {
                    write!(f, "{}[{}", value, join(items))?;
                    if items.len() == 1 {
                        f.write_str(",")?;
                    }
                    f.write_str("]")
                }
                _ => write!(f, "{}[{}]", value, slice),
            },
            Expr::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    write!(f, "{}", lower)?;
                }
                f.write_str(":")?;
                if let Some(upper) = upper {
                    write!(f, "{}", upper)?;
                }
                if let Some(step) = step {
                    write!(f, ":{}", step)?;
                }
                Ok(())
            }
            Expr::List(items) => write!(f, "[{}]", join(items)),
            Expr::Tuple(items) => match items.len() {
                1 => write!(f, "({},)", items[0]),
                _ => write!(f, "({})", join(items)),
            },
            Expr::ListComp { elt, generators } => {
                write!(f, "[{}", elt)?;
                write_generators(f, generators)?;
                f.write_str("]")
            }
            Expr::GeneratorExp { elt, generators } => {
                write!(f, "({}", elt)?;
                write_generators(f, generators)?;
                f.write_str(")")
            }
            Expr::Opaque(kind) => write!(f, "<{}>", kind),
        }
    }
}
