//! Query assembly.
//!
//! Turns a [`SelectRequest`] into a [`CompiledQuery`]: normalizes closures to
//! text, runs the detectors, infers joins and lays out the final statement,
//! splitting it into a UNION when an OR mixes array membership with other
//! conditions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::ast::Expr;
use crate::bytecode::Closure;
use crate::compiler::detect::{self, Membership, ProjectionComprehension};
use crate::compiler::joins::{self, JoinCondition};
use crate::compiler::value::{AttributeNode, DOCUMENT_COLUMN};
use crate::compiler::Evaluator;
use crate::decompiler::decompile;
use crate::env::{Environment, Scope, Tables};
use crate::error::{DecompileFailure, SelectError, SelectResult};
use crate::parser::parse;

/// An expression given as text or as a compiled closure.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Text(String),
    Closure(Closure),
}

impl Source {
    /// Expression text; closures are decompiled.
    pub fn normalize(&self) -> SelectResult<String> {
        match self {
            Source::Text(text) => Ok(text.clone()),
            Source::Closure(closure) => decompile(closure),
        }
    }

    /// Parse the source, unwrapping a zero-argument lambda to its body.
    pub fn parse(&self) -> SelectResult<Expr> {
        let text = self.normalize()?;
        match parse(&text)? {
            Expr::Lambda { args, body } => {
                if args.is_empty() {
                    Ok(*body)
                } else {
                    Err(SelectError::decompile(
                        DecompileFailure::Parameterized,
                        format!("lambda {}: ...", args),
                    ))
                }
            }
            expr => Ok(expr),
        }
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Source::Text(text.to_string())
    }
}

impl From<String> for Source {
    fn from(text: String) -> Self {
        Source::Text(text)
    }
}

impl From<Closure> for Source {
    fn from(closure: Closure) -> Self {
        Source::Closure(closure)
    }
}

/// What to select.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    /// The whole JSON document.
    #[default]
    Document,
    One(Source),
    Many(Vec<Source>),
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub source: Source,
    pub descending: bool,
}

impl OrderSpec {
    /// Parse `"-expr"` as descending, anything else as ascending.
    pub fn parse(text: &str) -> Self {
        match text.trim_start().strip_prefix('-') {
            Some(rest) => Self::desc(rest.trim_start()),
            None => Self::asc(text),
        }
    }

    pub fn asc(source: impl Into<Source>) -> Self {
        Self {
            source: source.into(),
            descending: false,
        }
    }

    pub fn desc(source: impl Into<Source>) -> Self {
        Self {
            source: source.into(),
            descending: true,
        }
    }
}

impl From<&str> for OrderSpec {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

/// A complete "select from table" call.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub table: String,
    pub what: Projection,
    pub where_: Option<Source>,
    pub order_by: Vec<OrderSpec>,
}

impl SelectRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            what: Projection::Document,
            where_: None,
            order_by: Vec::new(),
        }
    }

    pub fn what(mut self, source: impl Into<Source>) -> Self {
        self.what = Projection::One(source.into());
        self
    }

    pub fn what_many<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Source>,
    {
        self.what = Projection::Many(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, source: impl Into<Source>) -> Self {
        self.where_ = Some(source.into());
        self
    }

    pub fn order_by(mut self, spec: impl Into<OrderSpec>) -> Self {
        self.order_by.push(spec.into());
        self
    }
}

/// Alias prefix of projection columns inside an ordered UNION.
pub const COLUMN_ALIAS: &str = "_col_";
/// Alias prefix of ordering columns inside an ordered UNION.
pub const ORDER_ALIAS: &str = "_order_";

/// One `SELECT ... FROM ... [WHERE ...]` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub projection: String,
    pub from: String,
    pub predicate: Option<String>,
    /// Ordering terms selected as `_order_<n>` columns for an enclosing query.
    pub ordering: Vec<String>,
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {}", self.projection)?;
        for (i, term) in self.ordering.iter().enumerate() {
            write!(f, ", {} AS {}{}", term, ORDER_ALIAS, i)?;
        }
        write!(f, " FROM {}", self.from)?;
        if let Some(predicate) = &self.predicate {
            write!(f, " WHERE {}", predicate)?;
        }
        Ok(())
    }
}

/// One statement, or two joined by UNION, with an optional shared ORDER BY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub branches: Vec<Select>,
    pub order_by: Option<String>,
    /// Columns the enclosing query of an ordered UNION selects.
    pub columns: Vec<String>,
}

impl CompiledQuery {
    pub fn is_union(&self) -> bool {
        self.branches.len() > 1
    }

    pub fn sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let branches: Vec<String> = self.branches.iter().map(|b| b.to_string()).collect();
        match &self.order_by {
            // compound selects only order by result columns
            Some(order_by) if self.is_union() => write!(
                f,
                "SELECT {} FROM ({}) ORDER BY {}",
                self.columns.join(", "),
                branches.join(" UNION "),
                order_by
            )?,
            Some(order_by) => write!(f, "{} ORDER BY {}", branches.join(" UNION "), order_by)?,
            None => f.write_str(&branches.join(" UNION "))?,
        }
        f.write_str(";")
    }
}

/// Parsed inputs of one request.
struct Parsed {
    what: Vec<Expr>,
    document: bool,
    predicate: Option<Expr>,
    order_by: Vec<(Expr, bool)>,
}

/// An array-expansion pseudo-table in the FROM clause.
struct Expansion {
    var: String,
    array: AttributeNode,
}

/// Compiles select requests against an environment and a table set.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    env: Environment,
    tables: Tables,
}

impl Compiler {
    pub fn new(env: Environment, tables: Tables) -> Self {
        Self { env, tables }
    }

    /// Built-in genealogy constants and tables.
    pub fn genealogy() -> Self {
        Self::new(Environment::genealogy(), Tables::default())
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// An evaluator for standalone fragments.
    pub fn evaluator<'a>(&'a self, base: &'a str) -> Evaluator<'a> {
        Evaluator::new(base, &self.env, &self.tables)
    }

    pub fn compile(&self, request: &SelectRequest) -> SelectResult<CompiledQuery> {
        let base = request.table.as_str();
        if !self.tables.contains(base) {
            return Err(SelectError::shape(base, "unknown table"));
        }
        let parsed = self.parse_request(request)?;

        let mut referenced = BTreeSet::new();
        for expr in parsed.predicate.iter().chain(&parsed.what) {
            referenced.extend(detect::referenced_tables(expr, base, &self.tables));
        }

        let joins = match &parsed.predicate {
            Some(predicate) if !referenced.is_empty() => {
                joins::extract_joins(predicate, &referenced, &self.tables)
            }
            _ => BTreeMap::new(),
        };
        let joined: Vec<&String> = joins.keys().collect();
        tracing::debug!(table = base, ?referenced, ?joined, "join inference");
        let predicate = parsed
            .predicate
            .as_ref()
            .and_then(|p| joins::strip_joins(p, joins.values(), &self.tables));

        let scope = Scope::new(&self.env, &self.tables);
        let membership = predicate
            .as_ref()
            .and_then(|p| detect::membership(p, base, &scope));

        let layout = Layout {
            compiler: self,
            base,
            parsed: &parsed,
            joins: &joins,
        };

        if let (Some(predicate), Some(membership)) = (&predicate, &membership) {
            if let Some((without, with)) = detect::split_on_membership(predicate, membership) {
                tracing::debug!(
                    var = membership.var.as_str(),
                    array = %membership.array,
                    "splitting disjunction into UNION"
                );
                let first = layout.branch(Some(&without), None)?;
                let second = layout.branch(Some(&with), Some(membership))?;
                let query = CompiledQuery {
                    branches: vec![first, second],
                    order_by: layout.union_order_by(),
                    columns: layout.union_columns(),
                };
                tracing::debug!(sql = %query, "compiled");
                return Ok(query);
            }
        }

        let (select, evaluator) = layout.assemble(predicate.as_ref(), membership.as_ref(), false)?;
        let order_by = layout.order_by(&evaluator)?;
        let query = CompiledQuery {
            branches: vec![select],
            order_by,
            columns: Vec::new(),
        };
        tracing::debug!(sql = %query, "compiled");
        Ok(query)
    }

    fn parse_request(&self, request: &SelectRequest) -> SelectResult<Parsed> {
        let what = match &request.what {
            Projection::Document => Vec::new(),
            Projection::One(source) => vec![source.parse()?],
            Projection::Many(sources) => sources
                .iter()
                .map(Source::parse)
                .collect::<SelectResult<Vec<_>>>()?,
        };
        let predicate = request.where_.as_ref().map(Source::parse).transpose()?;
        let order_by = request
            .order_by
            .iter()
            .map(|spec| Ok((spec.source.parse()?, spec.descending)))
            .collect::<SelectResult<Vec<_>>>()?;

        if let Some(predicate) = &predicate {
            tracing::trace!(%predicate, "normalized predicate");
        }
        Ok(Parsed {
            document: matches!(request.what, Projection::Document),
            what,
            predicate,
            order_by,
        })
    }
}

/// Per-request state shared by the branches of one statement.
#[derive(Clone, Copy)]
struct Layout<'a> {
    compiler: &'a Compiler,
    base: &'a str,
    parsed: &'a Parsed,
    joins: &'a BTreeMap<String, JoinCondition>,
}

impl<'a> Layout<'a> {
    /// One side of a UNION. Ordering terms become aliased columns so the
    /// enclosing query can sort on them.
    fn branch(
        &self,
        predicate: Option<&Expr>,
        membership: Option<&Membership>,
    ) -> SelectResult<Select> {
        self.assemble(predicate, membership, true)
            .map(|(select, _)| select)
    }

    fn ordered_union(&self, union: bool) -> bool {
        union && !self.parsed.order_by.is_empty()
    }

    fn width(&self) -> usize {
        self.parsed.what.len().max(1)
    }

    fn union_columns(&self) -> Vec<String> {
        if !self.ordered_union(true) {
            return Vec::new();
        }
        (0..self.width())
            .map(|i| format!("{}{}", COLUMN_ALIAS, i))
            .collect()
    }

    fn union_order_by(&self) -> Option<String> {
        if !self.ordered_union(true) {
            return None;
        }
        let terms: Vec<String> = self
            .parsed
            .order_by
            .iter()
            .enumerate()
            .map(|(i, (_, descending))| {
                let direction = if *descending { " DESC" } else { "" };
                format!("{}{}{}", ORDER_ALIAS, i, direction)
            })
            .collect();
        Some(terms.join(", "))
    }

    /// Lay out one SELECT and return it with the evaluator it was compiled by.
    fn assemble<'m>(
        &self,
        predicate: Option<&Expr>,
        membership: Option<&'m Membership>,
        union: bool,
    ) -> SelectResult<(Select, Evaluator<'m>)>
    where
        'a: 'm,
    {
        let plain = self.compiler.evaluator(self.base);
        let mut expansions = Vec::new();

        if let Some(membership) = membership {
            let array = plain.qualified(true).field_path(&membership.array)?;
            expansions.push(Expansion {
                var: membership.var.clone(),
                array,
            });
        }

        let comprehension = match self.parsed.what.as_slice() {
            [single] => detect::projection_comprehension(single)?,
            _ => None,
        };
        if let Some(comprehension) = &comprehension {
            let array = plain.qualified(true).field_path(&comprehension.array)?;
            match expansions.first() {
                Some(existing) if existing.var == comprehension.var && existing.array == array => {}
                Some(existing) => {
                    return Err(SelectError::unsupported(
                        comprehension.var.as_str(),
                        format!("a second array iteration next to '{}'", existing.var),
                    ));
                }
                None => expansions.push(Expansion {
                    var: comprehension.var.clone(),
                    array,
                }),
            }
        }

        let qualify = union || !self.joins.is_empty() || !expansions.is_empty();
        let iteration: Option<&'m str> = match (membership, self.parsed.what.as_slice()) {
            (Some(membership), _) => Some(membership.var.as_str()),
            (None, [single]) => iteration_var(single),
            _ => None,
        };
        let evaluator = Evaluator::new(self.base, &self.compiler.env, &self.compiler.tables)
            .qualified(qualify)
            .iterating(iteration)
            .excluding(membership);

        let mut columns = self.projection(&evaluator, comprehension.as_ref())?;
        let ordering = if self.ordered_union(union) {
            for (i, column) in columns.iter_mut().enumerate() {
                column.push_str(&format!(" AS {}{}", COLUMN_ALIAS, i));
            }
            self.order_terms(&evaluator)?
        } else {
            Vec::new()
        };

        let mut conditions = Vec::new();
        if let Some(predicate) = predicate {
            conditions.extend(evaluator.compile_predicate(predicate)?);
        }
        if let Some(condition) = comprehension.as_ref().and_then(|c| c.condition.as_ref()) {
            conditions.extend(evaluator.compile_predicate(condition)?);
        }
        let predicate = match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(format!("({})", conditions.join(" AND "))),
        };

        let mut from = self.base.to_string();
        for expansion in &expansions {
            from.push_str(", ");
            from.push_str(&expansion.array.expansion_sql(&expansion.var));
        }
        for (table, join) in self.joins {
            from.push(' ');
            from.push_str(&join.to_sql(table));
        }

        Ok((
            Select {
                projection: columns.join(", "),
                from,
                predicate,
                ordering,
            },
            evaluator,
        ))
    }

    fn projection(
        &self,
        evaluator: &Evaluator<'_>,
        comprehension: Option<&ProjectionComprehension>,
    ) -> SelectResult<Vec<String>> {
        if self.parsed.document {
            return Ok(vec![evaluator.document()]);
        }
        if let Some(comprehension) = comprehension {
            return Ok(vec![evaluator.compile(&comprehension.element)?]);
        }
        self.parsed
            .what
            .iter()
            .map(|expr| evaluator.compile(expr))
            .collect()
    }

    /// Ordering expressions without direction.
    fn order_terms(&self, evaluator: &Evaluator<'_>) -> SelectResult<Vec<String>> {
        self.parsed
            .order_by
            .iter()
            .map(|(expr, _)| {
                let term = evaluator.compile(expr)?;
                if term == DOCUMENT_COLUMN && !self.joins.is_empty() {
                    return Ok(format!("{}.{}", self.base, DOCUMENT_COLUMN));
                }
                Ok(term)
            })
            .collect()
    }

    fn order_by(&self, evaluator: &Evaluator<'_>) -> SelectResult<Option<String>> {
        if self.parsed.order_by.is_empty() {
            return Ok(None);
        }
        let terms = self.order_terms(evaluator)?;
        let terms: Vec<String> = terms
            .into_iter()
            .zip(&self.parsed.order_by)
            .map(|(term, (_, descending))| if *descending { term + " DESC" } else { term })
            .collect();
        Ok(Some(terms.join(", ")))
    }
}

/// Iteration variable of a projection comprehension.
fn iteration_var(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::ListComp { generators, .. } | Expr::GeneratorExp { generators, .. } => {
            generators.first().map(|g| g.target.as_str())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn sql(request: SelectRequest) -> String {
        Compiler::genealogy().compile(&request).unwrap().to_string()
    }

    #[test]
    fn test_whole_document() {
        assert_eq!(
            sql(SelectRequest::new("person")),
            "SELECT json_data FROM person;"
        );
    }

    #[test]
    fn test_projection_list_and_order() {
        let request = SelectRequest::new("person")
            .what_many(["person.gramps_id", "person.gender"])
            .filter("person.gender != Person.UNKNOWN")
            .order_by("-person.gramps_id")
            .order_by("person.handle");
        assert_eq!(
            sql(request),
            "SELECT json_extract(json_data, '$.gramps_id'), json_extract(json_data, '$.gender') \
             FROM person WHERE (json_extract(json_data, '$.gender') != 2) \
             ORDER BY json_extract(json_data, '$.gramps_id') DESC, \
             json_extract(json_data, '$.handle');"
        );
    }

    #[test]
    fn test_order_spec_parse() {
        let spec = OrderSpec::parse("-person.gramps_id");
        assert!(spec.descending);
        assert_eq!(spec.source, Source::from("person.gramps_id"));
        assert!(!OrderSpec::parse("person.gramps_id").descending);
    }

    #[test]
    fn test_lambda_text_is_unwrapped() {
        let request = SelectRequest::new("person").filter("lambda: person.gender == 1");
        assert_eq!(
            sql(request),
            "SELECT json_data FROM person WHERE (json_extract(json_data, '$.gender') = 1);"
        );

        let request = SelectRequest::new("person").filter("lambda p: p.gender == 1");
        let err = Compiler::genealogy().compile(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterizedClosure);
    }

    #[test]
    fn test_closure_source() {
        let closure = Closure::compile("lambda: person.gender == 1 and len(person.media_list) > 0")
            .unwrap();
        let request = SelectRequest::new("person").filter(closure);
        assert_eq!(
            sql(request),
            "SELECT json_data FROM person WHERE ((json_extract(json_data, '$.gender') = 1) \
             AND (json_array_length(json_data, '$.media_list') > 0));"
        );
    }

    #[test]
    fn test_unknown_table() {
        let err = Compiler::genealogy()
            .compile(&SelectRequest::new("nowhere"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        assert_eq!(err.fragment(), Some("nowhere"));
    }

    #[test]
    fn test_join_qualifies_order_by_document() {
        let request = SelectRequest::new("person")
            .filter("family.father_handle == person.handle and family.type == 0")
            .order_by("json_data");
        assert_eq!(
            sql(request),
            "SELECT person.json_data FROM person INNER JOIN family ON \
             json_extract(family.json_data, '$.father_handle') = \
             json_extract(person.json_data, '$.handle') \
             WHERE (json_extract(family.json_data, '$.type') = 0) \
             ORDER BY person.json_data;"
        );
    }

    #[test]
    fn test_referenced_table_without_join() {
        let request = SelectRequest::new("person").filter("family.type == person.gender");
        assert_eq!(
            sql(request),
            "SELECT json_data FROM person WHERE (json_extract(family.json_data, '$.type') = \
             json_extract(json_data, '$.gender'));"
        );
    }

    #[test]
    fn test_projection_comprehension() {
        let request = SelectRequest::new("person")
            .what("[e.role for e in person.event_ref_list if e.role > 1]")
            .filter("person.gender == 1");
        assert_eq!(
            sql(request),
            "SELECT json_extract(e.value, '$.role') FROM person, \
             json_each(person.json_data, '$.event_ref_list') AS e \
             WHERE ((json_extract(person.json_data, '$.gender') = 1) AND \
             (json_extract(e.value, '$.role') > 1));"
        );
    }

    #[test]
    fn test_existential_in_predicate() {
        let request =
            SelectRequest::new("person").filter("any(e.role == 1 for e in person.event_ref_list)");
        assert_eq!(
            sql(request),
            "SELECT json_data FROM person WHERE EXISTS (SELECT 1 FROM \
             json_each(json_data, '$.event_ref_list') AS e \
             WHERE (json_extract(e.value, '$.role') = 1));"
        );
    }

    #[test]
    fn test_union_order_by_once() {
        let request = SelectRequest::new("person")
            .filter("person.gender == 1 or item in person.event_ref_list")
            .order_by("person.gramps_id");
        let query = Compiler::genealogy().compile(&request).unwrap();
        assert!(query.is_union());
        assert_eq!(
            query.to_string(),
            "SELECT _col_0 FROM (SELECT person.json_data AS _col_0, \
             json_extract(person.json_data, '$.gramps_id') AS _order_0 FROM person \
             WHERE (json_extract(person.json_data, '$.gender') = 1) \
             UNION SELECT person.json_data AS _col_0, \
             json_extract(person.json_data, '$.gramps_id') AS _order_0 FROM person, \
             json_each(person.json_data, '$.event_ref_list') AS item) \
             ORDER BY _order_0;"
        );
    }

    #[test]
    fn test_union_order_by_with_projection_and_join() {
        let request = SelectRequest::new("person")
            .what_many(["person.gramps_id", "family.type"])
            .filter(
                "family.father_handle == person.handle and \
                 (person.gender == 1 or item in person.event_ref_list)",
            )
            .order_by("-family.type")
            .order_by("person.gramps_id");
        let query = Compiler::genealogy().compile(&request).unwrap();
        assert_eq!(query.columns, vec!["_col_0", "_col_1"]);
        assert_eq!(query.order_by.as_deref(), Some("_order_0 DESC, _order_1"));
        for branch in &query.branches {
            assert_eq!(
                branch.ordering,
                vec![
                    "json_extract(family.json_data, '$.type')",
                    "json_extract(person.json_data, '$.gramps_id')",
                ]
            );
            assert!(branch.projection.ends_with("AS _col_1"));
        }
        assert!(query.to_string().starts_with("SELECT _col_0, _col_1 FROM (SELECT "));
    }

    #[test]
    fn test_unsupported_count() {
        let request = SelectRequest::new("person").what("person.media_list.count()");
        let err = Compiler::genealogy().compile(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.fragment(), Some("count"));
    }
}
