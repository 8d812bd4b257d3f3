//! Core type definitions and reserved attribute names.

use itemtx_codec::Attributes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Owner of an item lock; also the transaction record's key.
pub const ATTR_TXID: &str = "TXID";
/// Last write time, in milliseconds since the Unix epoch.
pub const ATTR_DATE: &str = "DATE";
/// Logged requests of a transaction record.
pub const ATTR_REQUESTS: &str = "REQUESTS";
/// Persisted state of a transaction record.
pub const ATTR_STATE: &str = "STATE";
/// Optimistic-concurrency version of a transaction record.
pub const ATTR_VERSION: &str = "VERSION";
/// Whether a transaction record reached its terminal state.
pub const ATTR_FINALIZED: &str = "FINALIZED";
/// Marks an item that did not exist before its owner locked it.
pub const ATTR_TRANSIENT: &str = "TRANSIENT";
/// Marks an item whose owner's mutation has been written.
pub const ATTR_APPLIED: &str = "APPLIED";
/// Key of an image record.
pub const ATTR_IMAGE_ID: &str = "ImageId";
/// Encoded snapshot held by an image record.
pub const ATTR_IMAGE_VALUE: &str = "ImageValue";

/// Attributes written onto ordinary items while they are locked.
pub const LOCK_ATTRIBUTES: [&str; 4] = [ATTR_TXID, ATTR_DATE, ATTR_TRANSIENT, ATTR_APPLIED];

/// Returns true if `name` is a lock attribute callers may not use.
#[must_use]
pub fn is_lock_attribute(name: &str) -> bool {
    LOCK_ATTRIBUTES.contains(&name)
}

/// Removes every lock attribute from an item.
pub fn strip_lock_attributes(item: &mut Attributes) {
    for name in LOCK_ATTRIBUTES {
        item.remove(name);
    }
}

/// Returns a copy of `item` without lock attributes.
#[must_use]
pub fn stripped(item: &Attributes) -> Attributes {
    let mut item = item.clone();
    strip_lock_attributes(&mut item);
    item
}

/// Unique identifier for a transaction.
///
/// Opaque string; freshly generated ids are random UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generates a new random transaction ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of wall-clock time for record timestamps and grace periods.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `millis`.
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemtx_codec::{attributes, AttributeValue};

    #[test]
    fn generated_ids_are_unique() {
        let a = TransactionId::generate();
        let b = TransactionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn strip_removes_only_lock_attributes() {
        let item = attributes([
            ("pk", AttributeValue::s("a")),
            (ATTR_TXID, AttributeValue::s("t1")),
            (ATTR_DATE, AttributeValue::number(1)),
            (ATTR_TRANSIENT, AttributeValue::Bool(true)),
            (ATTR_APPLIED, AttributeValue::Bool(true)),
            (ATTR_STATE, AttributeValue::s("kept")),
        ]);
        let clean = stripped(&item);
        assert_eq!(clean.len(), 2);
        assert!(clean.contains_key("pk"));
        assert!(clean.contains_key(ATTR_STATE));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);
        assert!(SystemClock.now_millis() > 0);
    }

    #[test]
    fn lock_attribute_names() {
        assert!(is_lock_attribute("TXID"));
        assert!(is_lock_attribute("APPLIED"));
        assert!(!is_lock_attribute("VERSION"));
    }
}
