//! Values produced while compiling one expression.
//!
//! Every sub-expression evaluates to a [`Value`] first and is stringified to
//! SQL only at the point where its consumer needs text. Field-access chains
//! accumulate into an [`AttributeNode`] until then.

use crate::ast::Literal;
use crate::env::DomainValue;

/// Name of the JSON document column of every table.
pub const DOCUMENT_COLUMN: &str = "json_data";

/// What a field path is rooted at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// The document column of a table, optionally qualified by the table name.
    Table { table: String, qualified: bool },
    /// The `value` accessor of an array-expansion row.
    Element(String),
}

impl Root {
    pub fn table(table: impl Into<String>, qualified: bool) -> Self {
        Root::Table {
            table: table.into(),
            qualified,
        }
    }

    /// SQL for the JSON document this root stands for.
    pub fn document(&self) -> String {
        match self {
            Root::Table {
                table,
                qualified: true,
            } => format!("{}.{}", table, DOCUMENT_COLUMN),
            Root::Table { .. } => DOCUMENT_COLUMN.to_string(),
            Root::Element(var) => format!("{}.value", var),
        }
    }
}

/// One step of a field-access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(i64),
}

/// A dotted/indexed field-access path rooted at a table or an array element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeNode {
    root: Root,
    path: Vec<Segment>,
}

impl AttributeNode {
    pub fn new(root: Root) -> Self {
        Self {
            root,
            path: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.push_field(name);
        self
    }

    pub fn push_field(&mut self, name: impl Into<String>) {
        self.path.push(Segment::Field(name.into()));
    }

    pub fn push_index(&mut self, index: i64) {
        self.path.push(Segment::Index(index));
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn path(&self) -> &[Segment] {
        &self.path
    }

    /// The JSON path expression, e.g. `$.primary_name.surname_list[0]`.
    pub fn json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.path {
            match segment {
                Segment::Field(name) => {
                    out.push('.');
                    out.push_str(name);
                }
                Segment::Index(n) if *n < 0 => out.push_str(&format!("[#{}]", n)),
                Segment::Index(n) => out.push_str(&format!("[{}]", n)),
            }
        }
        out
    }

    /// Field extraction template.
    pub fn field_sql(&self) -> String {
        if self.path.is_empty() {
            return self.root.document();
        }
        format!(
            "json_extract({}, {})",
            self.root.document(),
            quote(&self.json_path())
        )
    }

    /// Array-length template.
    pub fn length_sql(&self) -> String {
        if self.path.is_empty() {
            return format!("json_array_length({})", self.root.document());
        }
        format!(
            "json_array_length({}, {})",
            self.root.document(),
            quote(&self.json_path())
        )
    }

    /// Table-valued expansion yielding one row per array element.
    pub fn expansion_sql(&self, alias: &str) -> String {
        if self.path.is_empty() {
            return format!("json_each({}) AS {}", self.root.document(), alias);
        }
        format!(
            "json_each({}, {}) AS {}",
            self.root.document(),
            quote(&self.json_path()),
            alias
        )
    }
}

/// The value of a compiled sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    /// Finished SQL text.
    Literal(String),
    FieldPath(AttributeNode),
    /// A value bound in the environment.
    Bound(&'a DomainValue),
    /// A known table identifier.
    Table(String),
    /// Compiled items of a list or tuple literal.
    Sequence(Vec<String>),
    /// A predicate already guaranteed by the FROM clause.
    Satisfied,
}

/// Render a literal as SQL.
pub fn sql_literal(literal: &Literal) -> String {
    match literal {
        Literal::None => "NULL".to_string(),
        Literal::Bool(true) => "TRUE".to_string(),
        Literal::Bool(false) => "FALSE".to_string(),
        Literal::Int(n) => n.to_string(),
        Literal::Float(_) => literal.to_string(),
        Literal::Str(s) => quote(s),
    }
}

/// Single-quote a SQL string.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Comma-joined items; an empty sequence is `NULL`.
pub fn sequence_sql(items: &[String]) -> String {
    if items.is_empty() {
        "NULL".to_string()
    } else {
        items.join(", ")
    }
}
