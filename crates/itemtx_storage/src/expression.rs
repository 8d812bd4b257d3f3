//! Typed condition and update expressions.
//!
//! Conditions are evaluated against the current image of one item (or its
//! absence). They are a small AST rather than expression strings with
//! placeholders, so a caller can never smuggle a clause past validation.

use crate::error::{StoreError, StoreResult};
use itemtx_codec::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};

/// A condition on one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// The attribute is present.
    AttributeExists(String),
    /// The attribute is absent (or the whole item is).
    AttributeNotExists(String),
    /// The attribute is present and equal to the value.
    Equals(String, AttributeValue),
    /// The attribute is absent or differs from the value.
    NotEquals(String, AttributeValue),
    /// Every clause holds. An empty list holds.
    And(Vec<Condition>),
    /// At least one clause holds. An empty list does not hold.
    Or(Vec<Condition>),
    /// The clause does not hold.
    Not(Box<Condition>),
}

impl Condition {
    /// `attribute_exists(name)`.
    pub fn exists(name: impl Into<String>) -> Self {
        Self::AttributeExists(name.into())
    }

    /// `attribute_not_exists(name)`.
    pub fn not_exists(name: impl Into<String>) -> Self {
        Self::AttributeNotExists(name.into())
    }

    /// `name = value`.
    pub fn equals(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::Equals(name.into(), value.into())
    }

    /// `name <> value`.
    pub fn not_equals(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::NotEquals(name.into(), value.into())
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Condition) -> Self {
        let mut clauses = match self {
            Self::And(clauses) => clauses,
            single => vec![single],
        };
        match other {
            Self::And(more) => clauses.extend(more),
            single => clauses.push(single),
        }
        Self::And(clauses)
    }

    /// Disjunction of `self` and `other`, flattening nested `Or`s.
    #[must_use]
    pub fn or(self, other: Condition) -> Self {
        let mut clauses = match self {
            Self::Or(clauses) => clauses,
            single => vec![single],
        };
        match other {
            Self::Or(more) => clauses.extend(more),
            single => clauses.push(single),
        }
        Self::Or(clauses)
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Returns true for `And`, `Or` and `Not`.
    #[must_use]
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::And(_) | Self::Or(_) | Self::Not(_))
    }

    /// Every attribute name this condition refers to.
    #[must_use]
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::AttributeExists(name)
            | Self::AttributeNotExists(name)
            | Self::Equals(name, _)
            | Self::NotEquals(name, _) => out.push(name),
            Self::And(clauses) | Self::Or(clauses) => {
                for clause in clauses {
                    clause.collect_names(out);
                }
            }
            Self::Not(inner) => inner.collect_names(out),
        }
    }

    /// Evaluates this condition against an item image (`None` = item absent).
    #[must_use]
    pub fn evaluate(&self, item: Option<&Attributes>) -> bool {
        let get = |name: &str| item.and_then(|attrs| attrs.get(name));
        match self {
            Self::AttributeExists(name) => get(name).is_some(),
            Self::AttributeNotExists(name) => get(name).is_none(),
            Self::Equals(name, value) => get(name) == Some(value),
            Self::NotEquals(name, value) => get(name) != Some(value),
            Self::And(clauses) => clauses.iter().all(|c| c.evaluate(item)),
            Self::Or(clauses) => clauses.iter().any(|c| c.evaluate(item)),
            Self::Not(inner) => !inner.evaluate(item),
        }
    }
}

/// One change to an item's attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    /// Set the attribute to the value.
    Set(String, AttributeValue),
    /// Remove the attribute if present.
    Remove(String),
    /// Append values to a list attribute, creating it if absent.
    Append(String, Vec<AttributeValue>),
}

impl UpdateAction {
    /// `SET name = value`.
    pub fn set(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::Set(name.into(), value.into())
    }

    /// `REMOVE name`.
    pub fn remove(name: impl Into<String>) -> Self {
        Self::Remove(name.into())
    }

    /// The attribute this action writes.
    #[must_use]
    pub fn attribute_name(&self) -> &str {
        match self {
            Self::Set(name, _) | Self::Remove(name) | Self::Append(name, _) => name,
        }
    }

    /// Applies this action to `item` in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when appending to a non-list attribute.
    pub fn apply(&self, item: &mut Attributes) -> StoreResult<()> {
        match self {
            Self::Set(name, value) => {
                item.insert(name.clone(), value.clone());
            }
            Self::Remove(name) => {
                item.remove(name);
            }
            Self::Append(name, values) => match item.get_mut(name) {
                Some(AttributeValue::L(list)) => list.extend(values.iter().cloned()),
                Some(other) => {
                    return Err(StoreError::validation(format!(
                        "cannot append to {name}: attribute has type {}",
                        other.type_name()
                    )));
                }
                None => {
                    item.insert(name.clone(), AttributeValue::L(values.clone()));
                }
            },
        }
        Ok(())
    }
}

/// Applies each action to `item` in order.
///
/// # Errors
///
/// Returns the first action's error; `item` may then be partially updated, so
/// callers apply to a copy.
pub fn apply_updates(item: &mut Attributes, actions: &[UpdateAction]) -> StoreResult<()> {
    actions.iter().try_for_each(|action| action.apply(item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_codec::attributes;

    fn item() -> Attributes {
        attributes([
            ("pk", AttributeValue::s("a")),
            ("n", AttributeValue::number(5)),
        ])
    }

    #[test]
    fn exists_on_missing_item() {
        assert!(!Condition::exists("pk").evaluate(None));
        assert!(Condition::not_exists("pk").evaluate(None));
        assert!(!Condition::equals("pk", "a").evaluate(None));
        assert!(Condition::not_equals("pk", "a").evaluate(None));
    }

    #[test]
    fn equality() {
        let item = item();
        assert!(Condition::equals("n", AttributeValue::number(5)).evaluate(Some(&item)));
        assert!(!Condition::equals("n", AttributeValue::s("5")).evaluate(Some(&item)));
        assert!(Condition::not_equals("n", AttributeValue::number(6)).evaluate(Some(&item)));
    }

    #[test]
    fn compound() {
        let item = item();
        let cond = Condition::exists("pk").and(Condition::not_exists("x"));
        assert!(cond.evaluate(Some(&item)));
        assert!(cond.is_compound());

        let cond = Condition::not_exists("pk").or(Condition::equals("n", AttributeValue::number(5)));
        assert!(cond.evaluate(Some(&item)));
        assert!(!cond.clone().negate().evaluate(Some(&item)));
        assert!(!Condition::Or(Vec::new()).evaluate(Some(&item)));
        assert!(Condition::And(Vec::new()).evaluate(Some(&item)));
    }

    #[test]
    fn and_flattens() {
        let cond = Condition::exists("a")
            .and(Condition::exists("b"))
            .and(Condition::exists("c").and(Condition::exists("d")));
        match cond {
            Condition::And(clauses) => assert_eq!(clauses.len(), 4),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn attribute_names_are_collected() {
        let cond = Condition::exists("a")
            .and(Condition::equals("b", 1i64).or(Condition::not_exists("c").negate()));
        assert_eq!(cond.attribute_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn update_actions() {
        let mut item = item();
        apply_updates(
            &mut item,
            &[
                UpdateAction::set("name", "x"),
                UpdateAction::remove("n"),
                UpdateAction::Append("log".into(), vec![AttributeValue::number(1)]),
                UpdateAction::Append("log".into(), vec![AttributeValue::number(2)]),
            ],
        )
        .unwrap();
        assert_eq!(item.get("name"), Some(&AttributeValue::s("x")));
        assert!(!item.contains_key("n"));
        assert_eq!(
            item.get("log"),
            Some(&AttributeValue::L(vec![AttributeValue::number(1), AttributeValue::number(2)]))
        );
    }

    #[test]
    fn append_to_scalar_fails() {
        let mut item = item();
        let result = UpdateAction::Append("pk".into(), vec![]).apply(&mut item);
        assert!(matches!(result, Err(StoreError::Validation { .. })));
    }
}
