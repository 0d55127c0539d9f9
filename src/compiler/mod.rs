//! Expression-to-SQL compiler.
//!
//! An [`Evaluator`] compiles one expression tree against a base table. It
//! resolves names through a [`Scope`], accumulates field paths in
//! [`AttributeNode`]s and stringifies them to SQLite JSON1 calls.
//!
//! ```
//! use docsel::compiler::Evaluator;
//! use docsel::env::{Environment, Tables};
//!
//! let env = Environment::genealogy();
//! let tables = Tables::default();
//! let sql = Evaluator::new("person", &env, &tables)
//!     .compile_text("person.gender == Person.MALE")
//!     .unwrap();
//! assert_eq!(sql, "(json_extract(json_data, '$.gender') = 1)");
//! ```

pub mod detect;
pub mod joins;
pub mod value;

use crate::ast::{BinaryOp, BoolOp, CmpOp, Expr, Literal, UnaryOp};
use crate::env::{DomainValue, Environment, Resolved, Scope, Tables};
use crate::error::{SelectError, SelectResult};
use crate::parser::parse;

pub use detect::{Existential, Membership, ProjectionComprehension};
pub use joins::{JoinCondition, JoinKind};
pub use value::{AttributeNode, Root, Segment, Value};

use value::{quote, sequence_sql, sql_literal};

/// Compiles expressions to SQL fragments against one base table.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    scope: Scope<'a>,
    base: &'a str,
    qualify: bool,
    satisfied: Option<&'a Membership>,
}

impl<'a> Evaluator<'a> {
    pub fn new(base: &'a str, env: &'a Environment, tables: &'a Tables) -> Self {
        Self {
            scope: Scope::new(env, tables),
            base,
            qualify: false,
            satisfied: None,
        }
    }

    /// Qualify document references with their table name.
    pub fn qualified(self, qualify: bool) -> Self {
        Self { qualify, ..self }
    }

    /// Root bare references to `var` at the current array-expansion row.
    pub fn iterating(self, var: Option<&'a str>) -> Self {
        Self {
            scope: self.scope.with_iteration(var),
            ..self
        }
    }

    /// Treat this membership test as always true.
    pub fn excluding(self, membership: Option<&'a Membership>) -> Self {
        Self {
            satisfied: membership,
            ..self
        }
    }

    pub fn base(&self) -> &'a str {
        self.base
    }

    pub fn is_qualified(&self) -> bool {
        self.qualify
    }

    /// The base table's whole JSON document.
    pub fn document(&self) -> String {
        Root::table(self.base, self.qualify).document()
    }

    pub fn compile_text(&self, text: &str) -> SelectResult<String> {
        self.compile(&parse(text)?)
    }

    /// Compile an expression to a SQL fragment.
    pub fn compile(&self, expr: &Expr) -> SelectResult<String> {
        let value = self.eval(expr)?;
        self.to_sql(value, expr)
    }

    /// Compile a predicate; `None` when it is always true.
    pub fn compile_predicate(&self, expr: &Expr) -> SelectResult<Option<String>> {
        match self.eval(expr)? {
            Value::Satisfied => Ok(None),
            value => self.to_sql(value, expr).map(Some),
        }
    }

    /// Compile an expression that must denote a field path.
    pub fn field_path(&self, expr: &Expr) -> SelectResult<AttributeNode> {
        match self.eval(expr)? {
            Value::FieldPath(node) => Ok(node),
            _ => Err(SelectError::shape(expr.to_string(), "not a field path")),
        }
    }

    fn table_root(&self, table: &str) -> Root {
        Root::table(table, self.qualify || table != self.base)
    }

    fn to_sql(&self, value: Value<'a>, expr: &Expr) -> SelectResult<String> {
        match value {
            Value::Literal(text) => Ok(text),
            Value::FieldPath(node) => Ok(node.field_sql()),
            Value::Bound(DomainValue::Constant(literal)) => Ok(sql_literal(literal)),
            Value::Bound(DomainValue::Namespace { name, .. }) => Err(SelectError::shape(
                expr.to_string(),
                format!("class '{}' is not a value", name),
            )),
            Value::Table(table) => Ok(self.table_root(&table).document()),
            Value::Sequence(items) => Ok(format!("({})", sequence_sql(&items))),
            Value::Satisfied => Ok("TRUE".to_string()),
        }
    }

    fn eval(&self, expr: &Expr) -> SelectResult<Value<'a>> {
        if let Some(quantified) = detect::existential(expr) {
            return self.exists(&quantified).map(Value::Literal);
        }
        match expr {
            Expr::Literal(literal) => Ok(Value::Literal(sql_literal(literal))),
            Expr::Name(name) => Ok(self.name(name)),
            Expr::Attribute { value, attr } => self.attribute(expr, value, attr),
            Expr::Subscript { value, slice } => self.subscript(expr, value, slice),
            Expr::BinOp { left, op, right } => self.binary(expr, left, *op, right),
            Expr::UnaryOp { op, operand } => self.unary(expr, *op, operand),
            Expr::Compare {
                left,
                ops,
                comparators,
            } => self.comparison(expr, left, ops, comparators),
            Expr::BoolOp { op, values } => self.boolean(*op, values),
            Expr::IfExp { test, body, orelse } => Ok(Value::Literal(format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                self.compile(test)?,
                self.compile(body)?,
                self.compile(orelse)?
            ))),
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                if !keywords.is_empty() {
                    return Err(SelectError::unsupported(
                        expr.to_string(),
                        "keyword arguments",
                    ));
                }
                self.call(expr, func, args)
            }
            Expr::List(items) | Expr::Tuple(items) => items
                .iter()
                .map(|item| self.compile(item))
                .collect::<SelectResult<Vec<_>>>()
                .map(Value::Sequence),
            Expr::Lambda { .. }
            | Expr::Starred(_)
            | Expr::Slice { .. }
            | Expr::ListComp { .. }
            | Expr::GeneratorExp { .. }
            | Expr::Opaque(_) => Err(SelectError::unsupported(
                expr.to_string(),
                format!("{} has no SQL form here", expr.kind()),
            )),
        }
    }

    fn name(&self, name: &str) -> Value<'a> {
        match self.scope.resolve(name) {
            Resolved::Element => Value::FieldPath(AttributeNode::new(Root::Element(name.into()))),
            Resolved::Bound(value) => Value::Bound(value),
            Resolved::Table => Value::Table(name.to_string()),
            Resolved::Unbound => Value::Literal(name.to_string()),
        }
    }

    fn attribute(&self, expr: &Expr, base: &Expr, attr: &str) -> SelectResult<Value<'a>> {
        match self.eval(base)? {
            Value::Table(table) => Ok(Value::FieldPath(
                AttributeNode::new(self.table_root(&table)).field(attr),
            )),
            Value::FieldPath(mut node) => {
                node.push_field(attr);
                Ok(Value::FieldPath(node))
            }
            Value::Bound(object) => object.attribute(attr).map(Value::Bound).ok_or_else(|| {
                SelectError::shape(expr.to_string(), format!("no attribute '{}'", attr))
            }),
            Value::Literal(text) => Ok(Value::Literal(format!("{}.{}", text, attr))),
            Value::Sequence(_) | Value::Satisfied => Err(SelectError::shape(
                expr.to_string(),
                "attribute of a non-object",
            )),
        }
    }

    fn subscript(&self, expr: &Expr, base: &Expr, index: &Expr) -> SelectResult<Value<'a>> {
        let Value::FieldPath(mut node) = self.eval(base)? else {
            return Err(SelectError::shape(expr.to_string(), "indexing a non-path"));
        };
        let segment = match index {
            Expr::Literal(Literal::Int(n)) => Some(Segment::Index(*n)),
            Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => match operand.as_ref() {
                Expr::Literal(Literal::Int(n)) => Some(Segment::Index(-n)),
                _ => None,
            },
            Expr::Literal(Literal::Str(key)) => Some(Segment::Field(key.clone())),
            _ => None,
        };
        match segment {
            Some(Segment::Index(n)) => node.push_index(n),
            Some(Segment::Field(key)) => node.push_field(key),
            None => {
                return Err(SelectError::shape(
                    expr.to_string(),
                    "index must be an integer or string literal",
                ));
            }
        }
        Ok(Value::FieldPath(node))
    }

    fn binary(&self, expr: &Expr, left: &Expr, op: BinaryOp, right: &Expr) -> SelectResult<Value<'a>> {
        let l = self.compile(left)?;
        let r = self.compile(right)?;
        let sql = match op {
            BinaryOp::Pow => format!("POW({}, {})", l, r),
            BinaryOp::FloorDiv => format!("CAST(({}) / ({}) AS INTEGER)", l, r),
            BinaryOp::BitXor => format!("(({} | {}) - ({} & {}))", l, r, l, r),
            BinaryOp::MatMul => {
                return Err(SelectError::unsupported(
                    expr.to_string(),
                    "matrix multiplication",
                ));
            }
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::LShift
            | BinaryOp::RShift
            | BinaryOp::BitOr
            | BinaryOp::BitAnd => format!("({} {} {})", l, op.symbol(), r),
        };
        Ok(Value::Literal(sql))
    }

    fn unary(&self, expr: &Expr, op: UnaryOp, operand: &Expr) -> SelectResult<Value<'a>> {
        if let (UnaryOp::Neg, Expr::Literal(literal)) = (op, operand) {
            if literal.is_number() {
                return Ok(Value::Literal(format!("-{}", sql_literal(literal))));
            }
        }
        let inner = match self.eval(operand)? {
            Value::Satisfied => {
                return Err(SelectError::unsupported(
                    expr.to_string(),
                    "negated array membership",
                ));
            }
            value => self.to_sql(value, operand)?,
        };
        let sql = match op {
            UnaryOp::Not => format!("NOT ({})", inner),
            UnaryOp::Neg => format!("-({})", inner),
            UnaryOp::Pos => format!("+({})", inner),
            UnaryOp::Invert => format!("~({})", inner),
        };
        Ok(Value::Literal(sql))
    }

    fn comparison(
        &self,
        expr: &Expr,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
    ) -> SelectResult<Value<'a>> {
        if self.satisfied.is_some_and(|m| m.matches(expr)) {
            return Ok(Value::Satisfied);
        }
        if let ([op @ (CmpOp::In | CmpOp::NotIn)], [right]) = (ops, comparators) {
            if let Some(value) = self.containment(expr, left, *op, right)? {
                return Ok(value);
            }
        }
        if ops.len() != comparators.len() || ops.is_empty() {
            return Err(SelectError::shape(expr.to_string(), "malformed comparison"));
        }

        let mut current = self.compile(left)?;
        let mut parts = Vec::with_capacity(ops.len());
        for (op, right) in ops.iter().zip(comparators) {
            let next = self.compile(right)?;
            let spelling = match op {
                CmpOp::Eq => "=",
                CmpOp::NotEq => "!=",
                CmpOp::Lt => "<",
                CmpOp::LtE => "<=",
                CmpOp::Gt => ">",
                CmpOp::GtE => ">=",
                CmpOp::Is => "IS",
                CmpOp::IsNot => "IS NOT",
                CmpOp::In => "IN",
                CmpOp::NotIn => "NOT IN",
            };
            parts.push(format!("({} {} {})", current, spelling, next));
            current = next;
        }
        Ok(Value::Literal(match parts.len() {
            1 => parts.remove(0),
            _ => format!("({})", parts.join(" AND ")),
        }))
    }

    /// The IN/NOT IN special cases; `None` falls through to the general rule.
    fn containment(
        &self,
        expr: &Expr,
        left: &Expr,
        op: CmpOp,
        right: &Expr,
    ) -> SelectResult<Option<Value<'a>>> {
        let negated = op == CmpOp::NotIn;
        match (left, right) {
            (_, Expr::List(items) | Expr::Tuple(items)) => {
                let l = self.compile(left)?;
                let items = items
                    .iter()
                    .map(|item| self.compile(item))
                    .collect::<SelectResult<Vec<_>>>()?;
                let keyword = if negated { "NOT IN" } else { "IN" };
                Ok(Some(Value::Literal(format!(
                    "({} {} ({}))",
                    l,
                    keyword,
                    sequence_sql(&items)
                ))))
            }
            (_, Expr::Literal(Literal::None)) => {
                let l = self.compile(left)?;
                let keyword = if negated { "NOT IN" } else { "IN" };
                Ok(Some(Value::Literal(format!("({} {} (NULL))", l, keyword))))
            }
            (Expr::Literal(Literal::Str(text)), _) => {
                let r = self.compile(right)?;
                let keyword = if negated { "NOT LIKE" } else { "LIKE" };
                Ok(Some(Value::Literal(format!(
                    "({} {} {})",
                    r,
                    keyword,
                    quote(&format!("%{}%", text))
                ))))
            }
            (Expr::Name(var), _) if self.scope.resolve(var) == Resolved::Unbound => {
                match self.eval(right)? {
                    Value::FieldPath(_) => Err(SelectError::unsupported(
                        expr.to_string(),
                        "array membership is only supported as a condition of the query",
                    )),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn boolean(&self, op: BoolOp, values: &[Expr]) -> SelectResult<Value<'a>> {
        let mut parts = Vec::with_capacity(values.len());
        for value in values {
            match self.eval(value)? {
                // TRUE absorbs a disjunction and vanishes from a conjunction
                Value::Satisfied if op == BoolOp::Or => return Ok(Value::Satisfied),
                Value::Satisfied => {}
                compiled => parts.push(self.to_sql(compiled, value)?),
            }
        }
        let keyword = match op {
            BoolOp::And => " AND ",
            BoolOp::Or => " OR ",
        };
        Ok(match parts.len() {
            0 => Value::Satisfied,
            1 => Value::Literal(parts.remove(0)),
            _ => Value::Literal(format!("({})", parts.join(keyword))),
        })
    }

    fn call(&self, expr: &Expr, func: &Expr, args: &[Expr]) -> SelectResult<Value<'a>> {
        match func {
            Expr::Name(name) if name == "len" => {
                let [argument] = args else {
                    return Err(SelectError::shape(
                        expr.to_string(),
                        "len() takes exactly one argument",
                    ));
                };
                match self.eval(argument)? {
                    Value::FieldPath(node) => Ok(Value::Literal(node.length_sql())),
                    _ => Err(SelectError::shape(
                        expr.to_string(),
                        "len() of something that is not a field path",
                    )),
                }
            }
            Expr::Attribute { value, attr } if attr == "startswith" || attr == "endswith" => {
                let text = match args {
                    [argument] => argument.as_str_literal(),
                    _ => None,
                };
                let Some(text) = text else {
                    return Err(SelectError::shape(
                        expr.to_string(),
                        format!("{}() requires a single literal string argument", attr),
                    ));
                };
                let pattern = if attr == "startswith" {
                    format!("{}%", text)
                } else {
                    format!("%{}", text)
                };
                Ok(Value::Literal(format!(
                    "({} LIKE {})",
                    self.compile(value)?,
                    quote(&pattern)
                )))
            }
            Expr::Attribute { attr, .. } => Err(SelectError::unsupported(
                attr.as_str(),
                format!("unsupported method in '{}'", expr),
            )),
            Expr::Name(name) => Err(SelectError::unsupported(
                name.as_str(),
                format!("unsupported function in '{}'", expr),
            )),
            _ => Err(SelectError::unsupported(
                expr.to_string(),
                "unsupported callee",
            )),
        }
    }

    fn exists(&self, quantified: &Existential<'_>) -> SelectResult<String> {
        let array = self.field_path(quantified.array)?;
        let inner = Evaluator {
            scope: self.scope.with_iteration(Some(quantified.var)),
            satisfied: None,
            ..*self
        };
        let mut sql = format!(
            "EXISTS (SELECT 1 FROM {}",
            array.expansion_sql(quantified.var)
        );
        if let Some(condition) = &quantified.condition {
            if let Some(filter) = inner.compile_predicate(condition)? {
                sql.push_str(" WHERE ");
                sql.push_str(&filter);
            }
        }
        sql.push(')');
        if quantified.negated {
            sql.insert_str(0, "NOT ");
        }
        Ok(sql)
    }
}
