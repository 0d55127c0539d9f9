//! Join inference from handle equalities.
//!
//! Only top-level conjuncts of the form `table_a.x_handle == table_b.y_handle`
//! become joins. The stripper is a pure transform: it returns a new tree, or
//! `None` when nothing is left of the predicate.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{BoolOp, CmpOp, Expr};
use crate::env::Tables;

use super::value::{AttributeNode, Root};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
}

impl JoinKind {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
        }
    }
}

/// `left_table.left_attr == right_table.right_attr` between two known tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    pub left_table: String,
    pub left_attr: String,
    pub right_table: String,
    pub right_attr: String,
    pub kind: JoinKind,
}

impl JoinCondition {
    pub fn involves(&self, table: &str) -> bool {
        self.left_table == table || self.right_table == table
    }

    /// `INNER JOIN <table> ON <left> = <right>`.
    pub fn to_sql(&self, table: &str) -> String {
        let left = AttributeNode::new(Root::table(&self.left_table, true)).field(&self.left_attr);
        let right =
            AttributeNode::new(Root::table(&self.right_table, true)).field(&self.right_attr);
        format!(
            "{} {} ON {} = {}",
            self.kind.keyword(),
            table,
            left.field_sql(),
            right.field_sql()
        )
    }
}

/// A field holding a record identifier: `handle`, `ref`, or `*_handle`.
pub fn is_handle_field(attr: &str) -> bool {
    attr == "handle" || attr == "ref" || attr.ends_with("_handle")
}

/// `table.attr` with a known table and a single attribute.
fn table_field<'e>(expr: &'e Expr, tables: &Tables) -> Option<(&'e str, &'e str)> {
    match expr.attribute_chain() {
        Some((table, attrs)) if attrs.len() == 1 && tables.contains(table) => {
            Some((table, attrs[0]))
        }
        _ => None,
    }
}

/// Recognize one join comparison.
pub fn join_condition(expr: &Expr, tables: &Tables) -> Option<JoinCondition> {
    let Expr::Compare {
        left,
        ops,
        comparators,
    } = expr
    else {
        return None;
    };
    if ops.len() != 1 || ops[0] != CmpOp::Eq {
        return None;
    }
    let (left_table, left_attr) = table_field(left, tables)?;
    let (right_table, right_attr) = table_field(comparators.first()?, tables)?;
    if left_table == right_table || !is_handle_field(left_attr) || !is_handle_field(right_attr) {
        return None;
    }
    Some(JoinCondition {
        left_table: left_table.to_string(),
        left_attr: left_attr.to_string(),
        right_table: right_table.to_string(),
        right_attr: right_attr.to_string(),
        kind: JoinKind::Inner,
    })
}

fn conjuncts(expr: &Expr) -> &[Expr] {
    match expr {
        Expr::BoolOp {
            op: BoolOp::And,
            values,
        } => values,
        other => std::slice::from_ref(other),
    }
}

/// One join per referenced table, first matching condition wins.
/// Referenced tables without a condition get no entry.
pub fn extract_joins(
    predicate: &Expr,
    referenced: &BTreeSet<String>,
    tables: &Tables,
) -> BTreeMap<String, JoinCondition> {
    let conditions: Vec<JoinCondition> = conjuncts(predicate)
        .iter()
        .filter_map(|c| join_condition(c, tables))
        .collect();

    referenced
        .iter()
        .filter_map(|table| {
            conditions
                .iter()
                .find(|c| c.involves(table))
                .map(|c| (table.clone(), c.clone()))
        })
        .collect()
}

/// Remove the comparisons consumed by joins from a predicate.
pub fn strip_joins<'j>(
    predicate: &Expr,
    used: impl IntoIterator<Item = &'j JoinCondition> + Clone,
    tables: &Tables,
) -> Option<Expr> {
    let consumed = |expr: &Expr| {
        join_condition(expr, tables)
            .is_some_and(|found| used.clone().into_iter().any(|u| *u == found))
    };
    match predicate {
        Expr::BoolOp {
            op: BoolOp::And,
            values,
        } => Expr::bool_op(
            BoolOp::And,
            values.iter().filter(|v| !consumed(*v)).cloned().collect(),
        ),
        other if consumed(other) => None,
        other => Some(other.clone()),
    }
}
