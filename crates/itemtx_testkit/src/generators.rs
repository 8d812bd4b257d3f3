//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small pool so generated operations collide often
//! enough to exercise locking.

use crate::fixtures::{ITEMS_KEY, ITEMS_TABLE};
use itemtx_codec::{AttributeValue, Attributes};
use itemtx_core::Request;
use itemtx_storage::{DeleteItem, GetItem, PutItem, UpdateAction, UpdateItem};
use proptest::prelude::*;

/// Non-key attribute names generated items use.
pub const ATTRIBUTE_NAMES: [&str; 3] = ["a", "b", "c"];

/// Strategy for partition key values from a pool of `pool` keys.
pub fn pk_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("k{i}"))
}

/// Strategy for scalar attribute values.
pub fn scalar_value_strategy() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        "[a-z]{0,8}".prop_map(AttributeValue::S),
        any::<i64>().prop_map(AttributeValue::number),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(AttributeValue::B),
        any::<bool>().prop_map(AttributeValue::Bool),
        prop::collection::btree_set("[a-z]{1,4}", 1..4).prop_map(AttributeValue::Ss),
    ]
}

/// Strategy for attribute values, nested lists and maps included.
pub fn attribute_value_strategy() -> impl Strategy<Value = AttributeValue> {
    scalar_value_strategy().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(AttributeValue::L),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(AttributeValue::M),
        ]
    })
}

/// Strategy for a full item of the fixture items table.
pub fn item_strategy(pool: usize) -> impl Strategy<Value = Attributes> {
    (
        pk_strategy(pool),
        prop::collection::btree_map(
            prop::sample::select(ATTRIBUTE_NAMES.to_vec()),
            attribute_value_strategy(),
            0..3,
        ),
    )
        .prop_map(|(pk, attrs)| {
            let mut item: Attributes = attrs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect();
            item.insert(ITEMS_KEY.to_string(), AttributeValue::S(pk));
            item
        })
}

/// Strategy for update actions on non-key attributes.
pub fn update_action_strategy() -> impl Strategy<Value = UpdateAction> {
    let name = prop::sample::select(ATTRIBUTE_NAMES.to_vec());
    prop_oneof![
        3 => (name.clone(), attribute_value_strategy())
            .prop_map(|(name, value)| UpdateAction::set(name, value)),
        1 => name.prop_map(|name| UpdateAction::remove(name)),
    ]
}

/// One operation against the fixture items table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOperation {
    /// Write a whole item.
    Put {
        /// The item, key included.
        item: Attributes,
    },
    /// Change attributes of an item, creating it if absent.
    Update {
        /// Partition key value.
        pk: String,
        /// The changes.
        actions: Vec<UpdateAction>,
    },
    /// Remove an item.
    Delete {
        /// Partition key value.
        pk: String,
    },
    /// Read an item.
    Get {
        /// Partition key value.
        pk: String,
    },
}

impl ItemOperation {
    /// The partition key the operation targets.
    pub fn pk(&self) -> &str {
        match self {
            Self::Put { item } => item.get(ITEMS_KEY).and_then(AttributeValue::as_s).unwrap_or(""),
            Self::Update { pk, .. } | Self::Delete { pk } | Self::Get { pk } => pk,
        }
    }

    /// The operation as a transaction request.
    pub fn to_request(&self) -> Request {
        let key = |pk: &str| {
            let mut key = Attributes::new();
            key.insert(ITEMS_KEY.to_string(), AttributeValue::s(pk));
            key
        };
        match self {
            Self::Put { item } => Request::Put(PutItem::new(ITEMS_TABLE, item.clone())),
            Self::Update { pk, actions } => {
                Request::Update(UpdateItem::new(ITEMS_TABLE, key(pk), actions.clone()))
            }
            Self::Delete { pk } => Request::Delete(DeleteItem::new(ITEMS_TABLE, key(pk))),
            Self::Get { pk } => Request::Get(GetItem::new(ITEMS_TABLE, key(pk))),
        }
    }
}

/// Strategy for operations over a pool of `pool` keys.
pub fn item_operation_strategy(pool: usize) -> impl Strategy<Value = ItemOperation> {
    prop_oneof![
        3 => item_strategy(pool).prop_map(|item| ItemOperation::Put { item }),
        3 => (pk_strategy(pool), prop::collection::vec(update_action_strategy(), 1..3))
            .prop_map(|(pk, actions)| ItemOperation::Update { pk, actions }),
        1 => pk_strategy(pool).prop_map(|pk| ItemOperation::Delete { pk }),
        2 => pk_strategy(pool).prop_map(|pk| ItemOperation::Get { pk }),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(
    pool: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ItemOperation>> {
    prop::collection::vec(item_operation_strategy(pool), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_core::is_lock_attribute;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn pk_is_in_pool(pk in pk_strategy(4)) {
            prop_assert!(["k0", "k1", "k2", "k3"].contains(&pk.as_str()));
        }

        #[test]
        fn items_have_key_and_no_lock_attributes(item in item_strategy(4)) {
            prop_assert!(item.get(ITEMS_KEY).and_then(AttributeValue::as_s).is_some());
            prop_assert!(!item.keys().any(|name| is_lock_attribute(name)));
        }

        #[test]
        fn operations_target_their_key(op in item_operation_strategy(4)) {
            let request = op.to_request();
            prop_assert_eq!(request.is_read_only(), matches!(op, ItemOperation::Get { .. }));
            prop_assert!(op.pk().starts_with('k'));
        }
    }
}
