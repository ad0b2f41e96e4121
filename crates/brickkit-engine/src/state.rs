//! Observed-state reading with a per-run cache.
//!
//! The reader fetches observed state from the catalog client and, for
//! fields the control plane does not expose (row filters, column masks,
//! function bodies), from the SQL backend. Records are normalized into
//! [`StateRecord`]s comparable to declared state.
//!
//! The cache is populated lazily per resource key; a singleflight guard
//! (one `OnceCell` per key) ensures at most one concurrent read per key.
//! The reader never mutates backend state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use brickkit_core::{Error, Result, SecurableType};

use crate::backend::{CatalogClient, SqlExecutor, StateRecord};
use crate::retry::RetryPolicy;

type CacheCell = Arc<OnceCell<Option<StateRecord>>>;

/// Cached, singleflight-guarded observed-state reader.
pub struct StateReader {
    client: Arc<dyn CatalogClient>,
    sql: Arc<dyn SqlExecutor>,
    retry: RetryPolicy,
    cache: Mutex<HashMap<String, CacheCell>>,
}

impl std::fmt::Debug for StateReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateReader")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl StateReader {
    /// Creates a reader over the two backends.
    #[must_use]
    pub fn new(
        client: Arc<dyn CatalogClient>,
        sql: Arc<dyn SqlExecutor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            sql,
            retry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Reads observed state for one securable; `None` when absent.
    ///
    /// Concurrent reads of the same key share a single backend fetch.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure. Not-found is
    /// absence, not an error.
    pub async fn read(
        &self,
        securable_type: SecurableType,
        full_name: &str,
    ) -> Result<Option<StateRecord>> {
        let cell = self.cell(full_name);
        let record = cell
            .get_or_try_init(|| self.fetch(securable_type, full_name))
            .await?;
        Ok(record.clone())
    }

    /// Lists observed children of a container, for drift detection and
    /// discovery of unmanaged resources.
    ///
    /// # Errors
    ///
    /// Returns a structured [`Error`] on backend failure.
    pub async fn read_children(
        &self,
        child_type: SecurableType,
        parent_full_name: &str,
    ) -> Result<Vec<StateRecord>> {
        let client = self.client.clone();
        self.retry
            .run("list_children", self.retry.sdk_timeout, || {
                let client = client.clone();
                let parent = parent_full_name.to_string();
                async move { client.list_children(child_type, &parent).await }
            })
            .await
    }

    /// Drops the cached record for a key, forcing a refetch on next read.
    /// Executors call this after mutating a securable.
    pub fn invalidate(&self, full_name: &str) {
        self.lock_cache().remove(full_name);
    }

    fn cell(&self, full_name: &str) -> CacheCell {
        self.lock_cache()
            .entry(full_name.to_string())
            .or_default()
            .clone()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheCell>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn fetch(
        &self,
        securable_type: SecurableType,
        full_name: &str,
    ) -> Result<Option<StateRecord>> {
        let client = self.client.clone();
        let record = self
            .retry
            .run("get", self.retry.sdk_timeout, || {
                let client = client.clone();
                let full_name = full_name.to_string();
                async move { client.get(securable_type, &full_name).await }
            })
            .await?;
        let Some(mut record) = record else {
            return Ok(None);
        };

        match securable_type {
            SecurableType::Table => self.augment_table(full_name, &mut record).await?,
            SecurableType::Function => self.augment_function(full_name, &mut record).await?,
            _ => {}
        }
        Ok(Some(record))
    }

    /// Row filters and column masks are only visible through
    /// `DESCRIBE TABLE EXTENDED`.
    async fn augment_table(&self, full_name: &str, record: &mut StateRecord) -> Result<()> {
        let sql = self.sql.clone();
        let result = self
            .retry
            .run("describe_table_extended", self.retry.sql_timeout, || {
                let sql = sql.clone();
                let full_name = full_name.to_string();
                async move { sql.describe_table_extended(&full_name).await }
            })
            .await;
        match result {
            Ok(extended) => {
                record.row_filter = extended.row_filter;
                record.column_masks = extended.column_masks;
                record.properties.extend(extended.properties);
                Ok(())
            }
            Err(Error::NotFound { .. }) => Ok(()),
            Err(Error::PermissionDenied { message }) => {
                tracing::warn!(
                    table = full_name,
                    message,
                    "cannot describe table, returning partial record"
                );
                record.partial = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Function bodies are only visible through `DESCRIBE FUNCTION`.
    async fn augment_function(&self, full_name: &str, record: &mut StateRecord) -> Result<()> {
        let sql = self.sql.clone();
        let result = self
            .retry
            .run("describe_function", self.retry.sql_timeout, || {
                let sql = sql.clone();
                let full_name = full_name.to_string();
                async move { sql.describe_function(&full_name).await }
            })
            .await;
        match result {
            Ok(info) => {
                record
                    .properties
                    .insert("language".to_string(), info.language);
                record
                    .properties
                    .insert("return_type".to_string(), info.return_type);
                record.properties.insert("body".to_string(), info.body);
                Ok(())
            }
            Err(Error::NotFound { .. }) => Ok(()),
            Err(Error::PermissionDenied { message }) => {
                tracing::warn!(
                    function = full_name,
                    message,
                    "cannot describe function, returning partial record"
                );
                record.partial = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
