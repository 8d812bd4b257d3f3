//! Per-item locks kept in reserved attributes on the items themselves.

mod classifier;
mod coordinator;
mod item_state;

pub use classifier::{ClassifiedItem, RequestClassifier};
pub use coordinator::{ItemLockCoordinator, LockedItem};
pub use item_state::{ItemTransactionState, LockAction, LockStatus, LockedItemRequestAction};
