//! # brickkit-test-utils
//!
//! In-memory catalog and SQL backends with operation tracing, failure
//! injection, and fixture builders for engine tests. The two fakes share
//! one store so SQL DDL is visible to control-plane reads, mirroring how
//! the real backends converge on a single metastore.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod fixtures;
pub mod sql;
pub mod store;

pub use catalog::{CatalogOp, FailKind, InMemoryCatalog};
pub use fixtures::{analytics_tree, FakeBackend};
pub use sql::InMemorySql;
pub use store::CatalogStore;
