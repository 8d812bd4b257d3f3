//! Requests a transaction can carry.

use itemtx_codec::Attributes;
use itemtx_storage::{DeleteItem, GetItem, PutItem, TransactWriteItem, UpdateItem};
use serde::{Deserialize, Serialize};

/// One storage request inside a transaction.
///
/// Exactly one payload per case; the set of shapes is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Read one item.
    Get(GetItem),
    /// Write a whole item.
    Put(PutItem),
    /// Modify attributes of one item.
    Update(UpdateItem),
    /// Remove one item.
    Delete(DeleteItem),
    /// Read several items.
    TransactGet(Vec<GetItem>),
    /// Write several items.
    TransactWrite(Vec<TransactWriteItem>),
}

impl Request {
    /// Short name of the request shape, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get(_) => "Get",
            Self::Put(_) => "Put",
            Self::Update(_) => "Update",
            Self::Delete(_) => "Delete",
            Self::TransactGet(_) => "TransactGet",
            Self::TransactWrite(_) => "TransactWrite",
        }
    }

    /// Returns true if the request never mutates an item.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        match self {
            Self::Get(_) | Self::TransactGet(_) => true,
            Self::TransactWrite(items) => items
                .iter()
                .all(|item| matches!(item, TransactWriteItem::ConditionCheck(_))),
            Self::Put(_) | Self::Update(_) | Self::Delete(_) => false,
        }
    }
}

impl From<GetItem> for Request {
    fn from(request: GetItem) -> Self {
        Self::Get(request)
    }
}

impl From<PutItem> for Request {
    fn from(request: PutItem) -> Self {
        Self::Put(request)
    }
}

impl From<UpdateItem> for Request {
    fn from(request: UpdateItem) -> Self {
        Self::Update(request)
    }
}

impl From<DeleteItem> for Request {
    fn from(request: DeleteItem) -> Self {
        Self::Delete(request)
    }
}

/// A request appended to a transaction's log.
///
/// `id` is the record version right after the append, so the first request of
/// a fresh transaction gets id 2. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Position of this request; doubles as its image key suffix.
    pub id: u64,
    /// The request.
    pub request: Request,
}

/// What a request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A single read; `None` if the item does not exist.
    Item(Option<Attributes>),
    /// A multi-item read, in request order.
    Items(Vec<Option<Attributes>>),
    /// A single write, with the image its `ReturnValues` asked for.
    Written {
        /// Old or new image, or `None`.
        attributes: Option<Attributes>,
    },
    /// A multi-item write.
    TransactWritten,
}

impl RequestOutcome {
    /// The single item read or returned by a write, if any.
    #[must_use]
    pub fn item(&self) -> Option<&Attributes> {
        match self {
            Self::Item(item) => item.as_ref(),
            Self::Written { attributes } => attributes.as_ref(),
            Self::Items(_) | Self::TransactWritten => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_codec::{attributes, from_cbor, to_cbor, AttributeValue};
    use itemtx_storage::{Condition, ConditionCheck};

    fn key() -> Attributes {
        attributes([("pk", AttributeValue::s("a"))])
    }

    #[test]
    fn read_only_shapes() {
        assert!(Request::Get(GetItem::new("t", key())).is_read_only());
        assert!(!Request::Delete(DeleteItem::new("t", key())).is_read_only());
        let checks = Request::TransactWrite(vec![TransactWriteItem::ConditionCheck(
            ConditionCheck::new("t", key(), Condition::exists("pk")),
        )]);
        assert!(checks.is_read_only());
        assert_eq!(checks.kind(), "TransactWrite");
    }

    #[test]
    fn record_survives_cbor() {
        let record = RequestRecord {
            id: 2,
            request: PutItem::new("t", key())
                .with_condition(Condition::not_exists("pk"))
                .into(),
        };
        let bytes = to_cbor(&record).unwrap();
        assert_eq!(from_cbor::<RequestRecord>(&bytes).unwrap(), record);
    }
}
