//! # itemtx testkit
//!
//! Test utilities for itemtx.
//!
//! This crate provides:
//! - Stores with the protocol tables and an `Items` table ready to use
//! - A fault-injecting store wrapper and a crash recovery harness
//! - Property-based test generators using proptest
//! - A model-checking harness for transactions
//! - Contention stress tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use itemtx_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_test_store(|store| {
//!         store.seed(counter("a", 1));
//!         // ... run transactions through `store`
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
