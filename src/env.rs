//! Name resolution for compiled expressions.
//!
//! Three independent lookups, consulted in fixed priority order by [`Scope`]:
//! 1. the array-iteration variable currently in scope,
//! 2. domain constants and constant-holding classes ([`Environment`]),
//! 3. known table identifiers ([`Tables`]).

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::Literal;

/// The built-in table identifiers of the genealogy store.
pub const GENEALOGY_TABLES: &[&str] = &[
    "person",
    "family",
    "event",
    "place",
    "source",
    "citation",
    "repository",
    "media",
    "note",
    "tag",
];

/// A value bound in the environment.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainValue {
    Constant(Literal),
    /// A class or namespace holding further values.
    Namespace {
        name: String,
        members: BTreeMap<String, DomainValue>,
    },
}

impl DomainValue {
    /// Ordinary attribute lookup on a namespace.
    pub fn attribute(&self, attr: &str) -> Option<&DomainValue> {
        match self {
            DomainValue::Namespace { members, .. } => members.get(attr),
            DomainValue::Constant(_) => None,
        }
    }
}

/// Read-only name → value map built from the domain model's constant holders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    names: BTreeMap<String, DomainValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a class (namespace) with its constants. Constants are merged
    /// into an existing class of the same name.
    pub fn with_class<I, S>(mut self, class: &str, constants: I) -> Self
    where
        I: IntoIterator<Item = (S, Literal)>,
        S: Into<String>,
    {
        let entry = self
            .names
            .entry(class.to_string())
            .or_insert_with(|| DomainValue::Namespace {
                name: class.to_string(),
                members: BTreeMap::new(),
            });
        if let DomainValue::Constant(_) = entry {
            *entry = DomainValue::Namespace {
                name: class.to_string(),
                members: BTreeMap::new(),
            };
        }
        if let DomainValue::Namespace { members, .. } = entry {
            members.extend(
                constants
                    .into_iter()
                    .map(|(name, value)| (name.into(), DomainValue::Constant(value))),
            );
        }
        self
    }

    /// Bind an arbitrary value under a top-level name.
    pub fn bind(&mut self, name: impl Into<String>, value: DomainValue) {
        self.names.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&DomainValue> {
        self.names.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DomainValue)> {
        self.names.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Constants of the genealogy domain model.
    pub fn genealogy() -> Self {
        fn ints(pairs: &[(&str, i64)]) -> Vec<(String, Literal)> {
            pairs
                .iter()
                .map(|(name, n)| (name.to_string(), Literal::Int(*n)))
                .collect()
        }

        Self::new()
            .with_class("Person", ints(&[("FEMALE", 0), ("MALE", 1), ("UNKNOWN", 2)]))
            .with_class(
                "EventType",
                ints(&[
                    ("UNKNOWN", -1),
                    ("CUSTOM", 0),
                    ("MARRIAGE", 1),
                    ("ENGAGEMENT", 6),
                    ("DIVORCE", 7),
                    ("ADOPT", 11),
                    ("BIRTH", 12),
                    ("DEATH", 13),
                    ("BAPTISM", 15),
                    ("BURIAL", 19),
                ]),
            )
            .with_class(
                "EventRoleType",
                ints(&[
                    ("UNKNOWN", -1),
                    ("CUSTOM", 0),
                    ("PRIMARY", 1),
                    ("CLERGY", 2),
                    ("CELEBRANT", 3),
                    ("AIDE", 4),
                    ("BRIDE", 5),
                    ("GROOM", 6),
                    ("WITNESS", 7),
                    ("FAMILY", 8),
                    ("INFORMANT", 9),
                ]),
            )
            .with_class(
                "FamilyRelType",
                ints(&[
                    ("MARRIED", 0),
                    ("UNMARRIED", 1),
                    ("CIVIL_UNION", 2),
                    ("UNKNOWN", 3),
                    ("CUSTOM", 4),
                ]),
            )
            .with_class(
                "ChildRefType",
                ints(&[
                    ("NONE", 0),
                    ("BIRTH", 1),
                    ("ADOPTED", 2),
                    ("STEPCHILD", 3),
                    ("SPONSORED", 4),
                    ("FOSTER", 5),
                    ("UNKNOWN", 6),
                    ("CUSTOM", 7),
                ]),
            )
            .with_class(
                "NameType",
                ints(&[("UNKNOWN", -1), ("CUSTOM", 0), ("AKA", 1), ("BIRTH", 2), ("MARRIED", 3)]),
            )
    }
}

/// The closed set of lower-case table identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables(BTreeSet<String>);

impl Tables {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| n.into().to_lowercase()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self::new(GENEALOGY_TABLES.iter().copied())
    }
}

/// What a bare name resolves to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    /// The array-iteration variable: one expanded array element.
    Element,
    Bound(&'a DomainValue),
    Table,
    Unbound,
}

/// Name resolution context of one evaluator.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub iteration: Option<&'a str>,
    pub env: &'a Environment,
    pub tables: &'a Tables,
}

impl<'a> Scope<'a> {
    pub fn new(env: &'a Environment, tables: &'a Tables) -> Self {
        Self {
            iteration: None,
            env,
            tables,
        }
    }

    pub fn with_iteration(self, var: Option<&'a str>) -> Self {
        Self {
            iteration: var,
            ..self
        }
    }

    pub fn lookup_iteration(&self, name: &str) -> bool {
        self.iteration == Some(name)
    }

    pub fn lookup_constant(&self, name: &str) -> Option<&'a DomainValue> {
        self.env.lookup(name)
    }

    pub fn lookup_table(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    /// Resolve a bare name through the three lookups in priority order.
    pub fn resolve(&self, name: &str) -> Resolved<'a> {
        if self.lookup_iteration(name) {
            return Resolved::Element;
        }
        if let Some(value) = self.lookup_constant(name) {
            return Resolved::Bound(value);
        }
        if self.lookup_table(name) {
            return Resolved::Table;
        }
        Resolved::Unbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genealogy_constants() {
        let env = Environment::genealogy();
        let person = env.lookup("Person").unwrap();
        assert_eq!(
            person.attribute("MALE"),
            Some(&DomainValue::Constant(Literal::Int(1)))
        );
        assert_eq!(person.attribute("NOPE"), None);
        assert!(env.lookup("person").is_none());
    }

    #[test]
    fn test_with_class_merges() {
        let env = Environment::genealogy().with_class("Person", [("OTHER", Literal::Int(9))]);
        let person = env.lookup("Person").unwrap();
        assert_eq!(
            person.attribute("OTHER"),
            Some(&DomainValue::Constant(Literal::Int(9)))
        );
        assert!(person.attribute("MALE").is_some());
    }

    #[test]
    fn test_tables_are_lowercase() {
        let tables = Tables::new(["Person", "family"]);
        assert!(tables.contains("person"));
        assert!(!tables.contains("Person"));
        assert!(Tables::default().contains("citation"));
    }

    #[test]
    fn test_resolution_priority() {
        let mut env = Environment::genealogy();
        // a constant shadowing a table name
        env.bind("event", DomainValue::Constant(Literal::Int(3)));
        let tables = Tables::default();
        let scope = Scope::new(&env, &tables);

        assert!(matches!(scope.resolve("event"), Resolved::Bound(_)));
        assert_eq!(scope.resolve("family"), Resolved::Table);
        assert_eq!(scope.resolve("item"), Resolved::Unbound);

        let scoped = scope.with_iteration(Some("event"));
        assert_eq!(scoped.resolve("event"), Resolved::Element);
        assert!(!scoped.lookup_iteration("item"));
    }
}
