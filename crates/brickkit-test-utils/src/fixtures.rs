//! Fixture builders for engine tests.

use std::sync::Arc;

use brickkit_core::{Environment, NodeId, Principal, Resource, ResourceTree, TableSpec};

use crate::catalog::InMemoryCatalog;
use crate::sql::InMemorySql;
use crate::store::CatalogStore;

/// A paired in-memory backend sharing one store.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    /// Shared record store.
    pub store: CatalogStore,
    /// Control-plane fake.
    pub catalog: Arc<InMemoryCatalog>,
    /// Warehouse fake.
    pub sql: Arc<InMemorySql>,
}

impl FakeBackend {
    /// Creates an empty backend pair.
    #[must_use]
    pub fn new() -> Self {
        let store = CatalogStore::new();
        Self {
            catalog: Arc::new(InMemoryCatalog::new(store.clone())),
            sql: Arc::new(InMemorySql::new(store.clone())),
            store,
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A catalog → schema → table tree used across scenario tests.
///
/// Returns the tree plus the three node ids, root first.
#[must_use]
pub fn analytics_tree(env: Environment) -> (ResourceTree, NodeId, NodeId, NodeId) {
    let mut tree = ResourceTree::new();
    let catalog = tree
        .add_root(
            Resource::catalog("analytics").with_owner(Principal::group("data_owners")),
            env,
        )
        .unwrap_or_else(|e| panic!("fixture catalog: {e}"));
    let schema = tree
        .attach_child(catalog, Resource::schema("customers"), env)
        .unwrap_or_else(|e| panic!("fixture schema: {e}"));
    let table = tree
        .attach_child(schema, Resource::table("orders", TableSpec::default()), env)
        .unwrap_or_else(|e| panic!("fixture table: {e}"));
    (tree, catalog, schema, table)
}
