//! In-memory SQL executor with statement tracing.
//!
//! Interprets the statement shapes the engine emits (table/function DDL,
//! row filter and column mask ALTERs) against the shared store, so SQL
//! mutations are visible to control-plane reads in the same test run.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use brickkit_core::{ColumnMaskSpec, Error, Result, RowFilterSpec, SecurableType};
use brickkit_engine::{FunctionInfo, Row, SqlExecutor, StateRecord, TableExtendedInfo};

use crate::store::CatalogStore;

/// In-memory [`SqlExecutor`] over the shared store.
#[derive(Debug, Clone)]
pub struct InMemorySql {
    store: CatalogStore,
    statements: Arc<Mutex<Vec<String>>>,
    fail_next: Arc<Mutex<u32>>,
}

impl InMemorySql {
    /// Creates an executor over a shared store.
    #[must_use]
    pub fn new(store: CatalogStore) -> Self {
        Self {
            store,
            statements: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(0)),
        }
    }

    /// Returns every executed statement in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    /// Fails the next `times` statements with a transient SQL error.
    pub fn inject_transient_failures(&self, times: u32) {
        *lock(&self.fail_next) = times;
    }

    fn maybe_fail(&self) -> Result<()> {
        let mut remaining = lock(&self.fail_next);
        if *remaining > 0 {
            *remaining -= 1;
            return Err(Error::sql("08006", "injected connection failure"));
        }
        Ok(())
    }

    fn unquote(ident: &str) -> String {
        ident
            .split('.')
            .map(|segment| segment.trim_matches('`').replace("``", "`"))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn apply(&self, statement: &str) -> Result<()> {
        if let Some(rest) = statement.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let end = rest
                .find(" (")
                .or_else(|| rest.find(" USING"))
                .unwrap_or(rest.len());
            let full_name = Self::unquote(&rest[..end]);
            if !self.store.contains(&full_name) {
                self.store
                    .put(StateRecord::named(SecurableType::Table, full_name));
            }
            return Ok(());
        }
        if let Some(rest) = statement.strip_prefix("CREATE OR REPLACE VIEW ") {
            let end = rest.find(" AS ").unwrap_or(rest.len());
            let full_name = Self::unquote(&rest[..end]);
            self.store
                .put(StateRecord::named(SecurableType::Table, full_name));
            return Ok(());
        }
        if let Some(rest) = statement.strip_prefix("CREATE OR REPLACE FUNCTION ") {
            let end = rest.find(" (").unwrap_or(rest.len());
            let full_name = Self::unquote(&rest[..end]);
            let mut record = StateRecord::named(SecurableType::Function, full_name);
            record
                .properties
                .insert("body".to_string(), statement.to_string());
            self.store.put(record);
            return Ok(());
        }
        if let Some(rest) = statement.strip_prefix("ALTER TABLE ") {
            return self.apply_alter(rest);
        }
        // Other statements (policies via SQL, ad-hoc queries) are recorded
        // but have no in-memory interpretation.
        Ok(())
    }

    fn apply_alter(&self, rest: &str) -> Result<()> {
        if let Some((table, action)) = rest.split_once(" SET ROW FILTER ") {
            let full_name = Self::unquote(table);
            let (function, columns) = action.split_once(" ON (").unwrap_or((action, ""));
            let filter = RowFilterSpec {
                function: Self::unquote(function),
                input_columns: columns
                    .trim_end_matches(')')
                    .split(", ")
                    .filter(|c| !c.is_empty())
                    .map(|c| c.trim_matches('`').to_string())
                    .collect(),
            };
            if !self.store.update(&full_name, |record| {
                record.row_filter = Some(filter.clone());
            }) {
                return Err(Error::not_found("TABLE", full_name));
            }
            return Ok(());
        }
        if let Some((table, _)) = rest.split_once(" DROP ROW FILTER") {
            let full_name = Self::unquote(table);
            if !self.store.update(&full_name, |record| {
                record.row_filter = None;
            }) {
                return Err(Error::not_found("TABLE", full_name));
            }
            return Ok(());
        }
        if let Some((table, action)) = rest.split_once(" ALTER COLUMN ") {
            let full_name = Self::unquote(table);
            if let Some((column, mask)) = action.split_once(" SET MASK ") {
                let column = column.trim_matches('`').to_string();
                let (function, using) = mask.split_once(" USING COLUMNS (").unwrap_or((mask, ""));
                let mask = ColumnMaskSpec {
                    column: column.clone(),
                    function: Self::unquote(function),
                    using_columns: using
                        .trim_end_matches(')')
                        .split(", ")
                        .filter(|c| !c.is_empty())
                        .map(|c| c.trim_matches('`').to_string())
                        .collect(),
                };
                if !self.store.update(&full_name, |record| {
                    record.column_masks.retain(|m| m.column != column);
                    record.column_masks.push(mask.clone());
                }) {
                    return Err(Error::not_found("TABLE", full_name));
                }
                return Ok(());
            }
            if let Some((column, _)) = action.split_once(" DROP MASK") {
                let column = column.trim_matches('`').to_string();
                if !self.store.update(&full_name, |record| {
                    record.column_masks.retain(|m| m.column != column);
                }) {
                    return Err(Error::not_found("TABLE", full_name));
                }
                return Ok(());
            }
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl SqlExecutor for InMemorySql {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        lock(&self.statements).push(sql.to_string());
        self.maybe_fail()?;
        self.apply(sql)?;
        Ok(Vec::new())
    }

    async fn describe_table_extended(&self, full_name: &str) -> Result<TableExtendedInfo> {
        self.maybe_fail()?;
        let record = self
            .store
            .get(full_name)
            .ok_or_else(|| Error::not_found("TABLE", full_name))?;
        Ok(TableExtendedInfo {
            row_filter: record.row_filter,
            column_masks: record.column_masks,
            properties: record.properties,
        })
    }

    async fn describe_function(&self, full_name: &str) -> Result<FunctionInfo> {
        self.maybe_fail()?;
        let record = self
            .store
            .get(full_name)
            .ok_or_else(|| Error::not_found("FUNCTION", full_name))?;
        Ok(FunctionInfo {
            language: record
                .properties
                .get("language")
                .cloned()
                .unwrap_or_else(|| "SQL".to_string()),
            return_type: record
                .properties
                .get("return_type")
                .cloned()
                .unwrap_or_else(|| "BOOLEAN".to_string()),
            parameters: Vec::new(),
            body: record.properties.get("body").cloned().unwrap_or_default(),
        })
    }
}
