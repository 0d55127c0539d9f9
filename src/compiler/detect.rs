//! Pattern detectors.
//!
//! These run before general compilation because they reshape the surrounding
//! query (FROM clause, UNION branches) instead of a single sub-expression.

use std::collections::BTreeSet;

use crate::ast::{BoolOp, CmpOp, Comprehension, Expr, UnaryOp};
use crate::env::{Resolved, Scope, Tables};
use crate::error::{SelectError, SelectResult};

/// Name of the existential quantifier callee.
pub const QUANTIFIER: &str = "any";

/// Visit every node of a tree, parents before children.
pub fn visit<'e>(expr: &'e Expr, f: &mut impl FnMut(&'e Expr)) {
    f(expr);
    match expr {
        Expr::Lambda { body, .. } => visit(body, f),
        Expr::Literal(_) | Expr::Name(_) | Expr::Opaque(_) => {}
        Expr::Attribute { value, .. } | Expr::Starred(value) => visit(value, f),
        Expr::BinOp { left, right, .. } => {
            visit(left, f);
            visit(right, f);
        }
        Expr::UnaryOp { operand, .. } => visit(operand, f),
        Expr::Compare {
            left, comparators, ..
        } => {
            visit(left, f);
            comparators.iter().for_each(|c| visit(c, f));
        }
        Expr::BoolOp { values, .. } | Expr::List(values) | Expr::Tuple(values) => {
            values.iter().for_each(|v| visit(v, f))
        }
        Expr::IfExp { test, body, orelse } => {
            visit(test, f);
            visit(body, f);
            visit(orelse, f);
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            visit(func, f);
            args.iter().for_each(|a| visit(a, f));
            keywords.iter().for_each(|k| visit(&k.value, f));
        }
        Expr::Subscript { value, slice } => {
            visit(value, f);
            visit(slice, f);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visit(part, f);
            }
        }
        Expr::ListComp { elt, generators } | Expr::GeneratorExp { elt, generators } => {
            visit(elt, f);
            for generator in generators {
                visit(&generator.iter, f);
                generator.ifs.iter().for_each(|c| visit(c, f));
            }
        }
    }
}

/// Every known table other than `base` used as `table.attr`.
pub fn referenced_tables(expr: &Expr, base: &str, tables: &Tables) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    visit(expr, &mut |node| {
        if let Expr::Attribute { value, .. } = node {
            if let Some(name) = value.as_name() {
                if name != base && tables.contains(name) {
                    found.insert(name.to_string());
                }
            }
        }
    });
    found
}

/// `var in base.array` whose truth an array expansion can guarantee.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub var: String,
    pub array: Expr,
}

impl Membership {
    /// True for the comparison this membership was detected from.
    pub fn matches(&self, expr: &Expr) -> bool {
        membership_parts(expr).is_some_and(|(var, array)| var == self.var && *array == self.array)
    }
}

fn membership_parts(expr: &Expr) -> Option<(&str, &Expr)> {
    match expr {
        Expr::Compare {
            left,
            ops,
            comparators,
        } if ops.len() == 1 && ops[0] == CmpOp::In => {
            let array = comparators.first()?;
            array.attribute_chain()?;
            Some((left.as_name()?, array))
        }
        _ => None,
    }
}

/// Find `var in base.array` at the top level or among the operands of
/// (nested) boolean operations. `var` must not resolve to anything else.
pub fn membership(expr: &Expr, base: &str, scope: &Scope<'_>) -> Option<Membership> {
    if let Some((var, array)) = membership_parts(expr) {
        let rooted_at_base = array
            .attribute_chain()
            .is_some_and(|(root, _)| root == base);
        if rooted_at_base && scope.resolve(var) == Resolved::Unbound {
            return Some(Membership {
                var: var.to_string(),
                array: array.clone(),
            });
        }
    }
    match expr {
        Expr::BoolOp { values, .. } => values.iter().find_map(|v| membership(v, base, scope)),
        _ => None,
    }
}

fn contains_membership(expr: &Expr, membership: &Membership) -> bool {
    let mut found = false;
    visit(expr, &mut |node| found |= membership.matches(node));
    found
}

/// Partition a top-level disjunction into the disjuncts without and with the
/// membership test. Only returns when both halves are non-empty.
pub fn split_on_membership(expr: &Expr, membership: &Membership) -> Option<(Expr, Expr)> {
    let Expr::BoolOp {
        op: BoolOp::Or,
        values,
    } = expr
    else {
        return None;
    };
    let (with, without): (Vec<Expr>, Vec<Expr>) = values
        .iter()
        .cloned()
        .partition(|v| contains_membership(v, membership));
    let without = Expr::bool_op(BoolOp::Or, without)?;
    let with = Expr::bool_op(BoolOp::Or, with)?;
    Some((without, with))
}

fn single_generator<'e>(
    generators: &'e [Comprehension],
    fragment: &Expr,
) -> SelectResult<&'e Comprehension> {
    match generators {
        [generator] => Ok(generator),
        _ => Err(SelectError::unsupported(
            fragment.to_string(),
            "only single-generator comprehensions are supported",
        )),
    }
}

/// `[element for var in base.array if condition]` used as a projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionComprehension {
    pub var: String,
    pub array: Expr,
    pub element: Expr,
    pub condition: Option<Expr>,
}

pub fn projection_comprehension(expr: &Expr) -> SelectResult<Option<ProjectionComprehension>> {
    let (elt, generators) = match expr {
        Expr::ListComp { elt, generators } | Expr::GeneratorExp { elt, generators } => {
            (elt, generators)
        }
        _ => return Ok(None),
    };
    let generator = single_generator(generators, expr)?;
    if generator.iter.attribute_chain().is_none() {
        return Err(SelectError::shape(
            generator.iter.to_string(),
            "comprehension must iterate over a field path",
        ));
    }
    Ok(Some(ProjectionComprehension {
        var: generator.target.clone(),
        array: generator.iter.clone(),
        element: elt.as_ref().clone(),
        condition: Expr::bool_op(BoolOp::And, generator.ifs.clone()),
    }))
}

/// `any(element for var in array if ...)`, optionally negated.
#[derive(Debug, Clone, PartialEq)]
pub struct Existential<'e> {
    pub var: &'e str,
    pub array: &'e Expr,
    /// Conjunction of the element expression (unless it is the variable
    /// itself) and the generator filters.
    pub condition: Option<Expr>,
    pub negated: bool,
}

pub fn existential(expr: &Expr) -> Option<Existential<'_>> {
    let (inner, negated) = match expr {
        Expr::UnaryOp {
            op: UnaryOp::Not,
            operand,
        } => (operand.as_ref(), true),
        other => (other, false),
    };
    let Expr::Call {
        func,
        args,
        keywords,
    } = inner
    else {
        return None;
    };
    if func.as_name() != Some(QUANTIFIER) || !keywords.is_empty() {
        return None;
    }
    let (elt, generator) = match args.as_slice() {
        [Expr::GeneratorExp { elt, generators } | Expr::ListComp { elt, generators }] => {
            match generators.as_slice() {
                [generator] => (elt, generator),
                _ => return None,
            }
        }
        _ => return None,
    };
    generator.iter.attribute_chain()?;

    let mut conditions = Vec::new();
    if elt.as_name() != Some(generator.target.as_str()) {
        conditions.push(elt.as_ref().clone());
    }
    conditions.extend(generator.ifs.iter().cloned());
    Some(Existential {
        var: &generator.target,
        array: &generator.iter,
        condition: Expr::bool_op(BoolOp::And, conditions),
        negated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn tables() -> Tables {
        Tables::default()
    }

    #[test]
    fn test_referenced_tables() {
        let expr = parse("family.father_handle == person.handle and event.type == 1").unwrap();
        let found = referenced_tables(&expr, "person", &tables());
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["event".to_string(), "family".to_string()]
        );
        let expr = parse("person.gender == Person.MALE").unwrap();
        assert!(referenced_tables(&expr, "person", &tables()).is_empty());
    }

    #[test]
    fn test_membership_positions() {
        let env = Environment::genealogy();
        let tables = tables();
        let scope = Scope::new(&env, &tables);

        let top = parse("item in person.event_ref_list").unwrap();
        let found = membership(&top, "person", &scope).unwrap();
        assert_eq!(found.var, "item");
        assert_eq!(found.array.to_string(), "person.event_ref_list");

        let conjunct = parse("item in person.event_ref_list and item.role == 1").unwrap();
        assert!(membership(&conjunct, "person", &scope).is_some());

        let disjunct = parse("person.gender == 1 or item in person.event_ref_list").unwrap();
        assert!(membership(&disjunct, "person", &scope).is_some());

        // rooted at another table, or a literal on the left
        let other = parse("item in family.child_ref_list").unwrap();
        assert!(membership(&other, "person", &scope).is_none());
        let literal = parse("'A' in person.nickname").unwrap();
        assert!(membership(&literal, "person", &scope).is_none());
        // negation hides it
        let negated = parse("not item in person.event_ref_list").unwrap();
        assert!(membership(&negated, "person", &scope).is_none());
    }

    #[test]
    fn test_split_on_membership() {
        let env = Environment::genealogy();
        let tables = tables();
        let scope = Scope::new(&env, &tables);
        let expr = parse(
            "(person.gender == 1) or (item in person.event_ref_list) or (person.gender == 2)",
        )
        .unwrap();
        let found = membership(&expr, "person", &scope).unwrap();
        let (without, with) = split_on_membership(&expr, &found).unwrap();
        assert_eq!(
            without.to_string(),
            "((person.gender == 1) or (person.gender == 2))"
        );
        assert_eq!(with.to_string(), "(item in person.event_ref_list)");

        let all = parse("item in person.event_ref_list or item in person.event_ref_list").unwrap();
        assert_eq!(split_on_membership(&all, &found), None);
        let conjunction = parse("item in person.event_ref_list and item.role == 1").unwrap();
        assert_eq!(split_on_membership(&conjunction, &found), None);
    }

    #[test]
    fn test_projection_comprehension() {
        let expr = parse("[e.role for e in person.event_ref_list if e.role > 1 if e.ref]").unwrap();
        let found = projection_comprehension(&expr).unwrap().unwrap();
        assert_eq!(found.var, "e");
        assert_eq!(found.array.to_string(), "person.event_ref_list");
        assert_eq!(found.element.to_string(), "e.role");
        assert_eq!(
            found.condition.unwrap().to_string(),
            "((e.role > 1) and e.ref)"
        );

        assert_eq!(projection_comprehension(&parse("person.gender").unwrap()).unwrap(), None);

        let nested = parse("[a for a in person.x for b in person.y]").unwrap();
        assert_eq!(
            projection_comprehension(&nested).unwrap_err().kind(),
            crate::error::ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_existential() {
        let expr = parse("any(e.role == 1 for e in person.event_ref_list)").unwrap();
        let found = existential(&expr).unwrap();
        assert_eq!(found.var, "e");
        assert!(!found.negated);
        assert_eq!(found.condition.unwrap().to_string(), "(e.role == 1)");

        let expr = parse("not any(e for e in person.event_ref_list if e.private)").unwrap();
        let found = existential(&expr).unwrap();
        assert!(found.negated);
        assert_eq!(found.condition.unwrap().to_string(), "e.private");

        let bare = parse("any(e for e in person.event_ref_list)").unwrap();
        assert_eq!(existential(&bare).unwrap().condition, None);

        assert!(existential(&parse("all(e for e in person.x)").unwrap()).is_none());
    }
}
