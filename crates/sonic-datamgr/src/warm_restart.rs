//! Warm restart sequencing for persisted tables.
//!
//! Every store goes through the same per-table lifecycle:
//!
//! 1. **ColdInit**: memory starts zeroed, an empty runtime table is created.
//! 2. **WarmLoad**: the table is created with "load existing rows", rows are
//!    read in key order until exhausted or the expected count is reached,
//!    then the table is dropped and an empty runtime table recreated.
//! 3. **Flush** or **Discard** at shutdown: either the table is recreated
//!    and every live record rewritten, or nothing touches the backend.
//!
//! The boot mode is chosen once at start and the shutdown mode once at
//! stop. Table creation failures while starting are fatal; a row count that
//! disagrees with the expected count is logged and loading continues.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::backend::{
    IndexedTableSpec, PersistenceBackend, TableCursor, TableFlags, TableHandle,
};
use crate::error::{DmError, DmResult};
use crate::schema::{RowLayout, SchemaBlob};

/// How the process came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootMode {
    Cold,
    Warm,
}

impl std::fmt::Display for BootMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootMode::Cold => write!(f, "cold"),
            BootMode::Warm => write!(f, "warm"),
        }
    }
}

/// What happens to in-memory state at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownMode {
    /// Rewrite every live record for the next warm start.
    Flush,
    /// Drop state without touching the backend.
    Discard,
}

/// Per-table lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    ColdInit,
    WarmLoad,
    Flush,
    Discard,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::ColdInit => write!(f, "ColdInit"),
            LifecycleState::WarmLoad => write!(f, "WarmLoad"),
            LifecycleState::Flush => write!(f, "Flush"),
            LifecycleState::Discard => write!(f, "Discard"),
        }
    }
}

/// Warm restart counters for one process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmRestartMetrics {
    /// Tables created empty at cold init
    pub tables_initialized: u64,
    /// Tables read during warm load
    pub tables_loaded: u64,
    /// Rows read during warm load
    pub rows_loaded: u64,
    /// Loads whose row count disagreed with the expected count
    pub count_mismatches: u64,
    /// Rows skipped because they failed to decode or install
    pub rows_rejected: u64,
    pub tables_flushed: u64,
    pub rows_flushed: u64,
    /// Tables whose flush failed
    pub flush_failures: u64,
    /// Parent counts corrected after a list reload
    pub anchors_corrected: u64,
}

impl WarmRestartMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_loaded(&mut self, rows: usize) {
        self.tables_loaded += 1;
        self.rows_loaded += rows as u64;
    }

    pub fn record_flushed(&mut self, rows: usize) {
        self.tables_flushed += 1;
        self.rows_flushed += rows as u64;
    }

    pub fn record_rejected_row(&mut self) {
        self.rows_rejected += 1;
    }

    pub fn record_flush_failure(&mut self) {
        self.flush_failures += 1;
    }

    pub fn record_anchor_corrected(&mut self) {
        self.anchors_corrected += 1;
    }
}

/// Drives table creation, warm load and flush against a backend.
#[derive(Debug)]
pub struct WarmRestartOrchestrator {
    boot_mode: BootMode,
    schema_limit: usize,
    tables: BTreeMap<String, TableHandle>,
    states: BTreeMap<String, LifecycleState>,
    metrics: WarmRestartMetrics,
}

impl WarmRestartOrchestrator {
    pub fn new(boot_mode: BootMode, schema_limit: usize) -> Self {
        Self {
            boot_mode,
            schema_limit,
            tables: BTreeMap::new(),
            states: BTreeMap::new(),
            metrics: WarmRestartMetrics::new(),
        }
    }

    pub fn boot_mode(&self) -> BootMode {
        self.boot_mode
    }

    pub fn is_warm(&self) -> bool {
        self.boot_mode == BootMode::Warm
    }

    pub fn metrics(&self) -> &WarmRestartMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut WarmRestartMetrics {
        &mut self.metrics
    }

    /// Lifecycle state last recorded for a table.
    pub fn state(&self, table: &str) -> Option<LifecycleState> {
        self.states.get(table).copied()
    }

    /// Handle of the runtime table with this name, if one is open.
    pub fn handle(&self, table: &str) -> Option<TableHandle> {
        self.tables.get(table).copied()
    }

    fn set_state(&mut self, table: &str, state: LifecycleState) {
        self.states.insert(table.to_string(), state);
    }

    /// Builds the backend schema for a layout, bounded by the schema buffer.
    pub fn schema<B: PersistenceBackend>(
        &self,
        backend: &mut B,
        layout: &RowLayout,
        version: u32,
    ) -> DmResult<SchemaBlob> {
        let blob = backend.create_schema(
            layout.table(),
            version,
            &layout.fields(),
            layout.key_fields(),
            layout.record_size(),
        )?;
        if blob.len() > self.schema_limit {
            return Err(DmError::SchemaTooLarge {
                table: layout.table().to_string(),
                size: blob.len(),
                limit: self.schema_limit,
            });
        }
        Ok(blob)
    }

    fn create_runtime_table<B: PersistenceBackend>(
        &mut self,
        backend: &mut B,
        layout: &RowLayout,
        version: u32,
        capacity: usize,
        schema: &SchemaBlob,
    ) -> DmResult<TableHandle> {
        let spec = IndexedTableSpec::from_layout(layout, version, capacity, TableFlags::PERSIST);
        let handle = backend.create_indexed_table(&spec, schema)?;
        self.tables.insert(layout.table().to_string(), handle);
        Ok(handle)
    }

    /// Opens an indexed table for this boot and returns the rows to install.
    ///
    /// Cold boots return no rows. Warm boots read up to `expected` rows, or
    /// every row when `expected` is `None`.
    pub fn load_table<B: PersistenceBackend>(
        &mut self,
        backend: &mut B,
        layout: &RowLayout,
        version: u32,
        capacity: usize,
        expected: Option<usize>,
    ) -> DmResult<Vec<Vec<u8>>> {
        let table = layout.table();
        let schema = self.schema(backend, layout, version)?;

        if self.boot_mode == BootMode::Cold {
            self.create_runtime_table(backend, layout, version, capacity, &schema)?;
            self.set_state(table, LifecycleState::ColdInit);
            self.metrics.tables_initialized += 1;
            debug!("{}: cold init", table);
            return Ok(Vec::new());
        }

        let spec =
            IndexedTableSpec::from_layout(layout, version, capacity, TableFlags::PERSIST_AND_LOAD);
        let handle = backend.create_indexed_table(&spec, &schema)?;

        let mut rows = Vec::new();
        let mut cursor = TableCursor::new();
        let mut buf = vec![0u8; layout.record_size()];
        while expected.map_or(true, |n| rows.len() < n) {
            match backend.get_next_row(handle, &mut buf, &mut cursor) {
                Ok(true) => rows.push(buf.clone()),
                Ok(false) => break,
                Err(e) => {
                    error!("{}: warm load read failed after {} rows: {}", table, rows.len(), e);
                    break;
                }
            }
        }

        if let Some(expected) = expected {
            if rows.len() != expected {
                error!(
                    "{}: expected {} rows, loaded {}",
                    table,
                    expected,
                    rows.len()
                );
                self.metrics.count_mismatches += 1;
            }
        }

        backend.delete_table(handle)?;
        self.create_runtime_table(backend, layout, version, capacity, &schema)?;
        self.set_state(table, LifecycleState::WarmLoad);
        self.metrics.record_loaded(rows.len());
        info!("{}: warm loaded {} rows", table, rows.len());
        Ok(rows)
    }

    /// Opens the single-record table and returns its record on warm boots.
    pub fn load_single<B: PersistenceBackend>(
        &mut self,
        backend: &mut B,
        layout: &RowLayout,
        version: u32,
    ) -> DmResult<Option<Vec<u8>>> {
        let table = layout.table();
        let schema = self.schema(backend, layout, version)?;

        let flags = match self.boot_mode {
            BootMode::Cold => TableFlags::PERSIST,
            BootMode::Warm => TableFlags::PERSIST_AND_LOAD,
        };
        let handle = backend.create_single_record_table(
            table,
            version,
            layout.record_size(),
            flags,
            &schema,
        )?;
        self.tables.insert(table.to_string(), handle);

        if self.boot_mode == BootMode::Cold {
            self.set_state(table, LifecycleState::ColdInit);
            self.metrics.tables_initialized += 1;
            return Ok(None);
        }

        let mut buf = vec![0u8; layout.record_size()];
        let found = backend.get_record(handle, &mut buf, 0)?;
        self.set_state(table, LifecycleState::WarmLoad);
        if found {
            self.metrics.record_loaded(1);
            info!("{}: warm loaded", table);
            Ok(Some(buf))
        } else {
            warn!("{}: no persisted record, starting from defaults", table);
            self.metrics.record_loaded(0);
            Ok(None)
        }
    }

    /// Replaces one row of an open runtime table.
    pub fn upsert_row<B: PersistenceBackend>(
        &mut self,
        backend: &mut B,
        layout: &RowLayout,
        row: &[u8],
    ) -> DmResult<()> {
        let table = layout.table();
        let handle = self
            .handle(table)
            .ok_or_else(|| DmError::not_found(format!("runtime table {}", table)))?;
        backend.delete_row(handle, layout.key_of(row))?;
        backend.insert_row(handle, row)?;
        Ok(())
    }

    /// Drops every runtime table this orchestrator opened.
    ///
    /// Called once before flushing so that stores whose contents vanished
    /// leave no table behind.
    pub fn drop_runtime_tables<B: PersistenceBackend>(&mut self, backend: &mut B) {
        for (name, handle) in std::mem::take(&mut self.tables) {
            if let Err(e) = backend.delete_table(handle) {
                warn!("{}: failed to drop runtime table: {}", name, e);
            }
        }
    }

    /// Recreates an indexed table and writes `rows` in order.
    pub fn flush_table<B: PersistenceBackend>(
        &mut self,
        backend: &mut B,
        layout: &RowLayout,
        version: u32,
        capacity: usize,
        rows: &[Vec<u8>],
    ) -> DmResult<usize> {
        let table = layout.table();
        if let Some(handle) = self.tables.remove(table) {
            backend.delete_table(handle)?;
        }
        let schema = self.schema(backend, layout, version)?;
        let handle = self.create_runtime_table(backend, layout, version, capacity, &schema)?;
        for row in rows {
            backend.insert_row(handle, row)?;
        }
        self.set_state(table, LifecycleState::Flush);
        self.metrics.record_flushed(rows.len());
        debug!("{}: flushed {} rows", table, rows.len());
        Ok(rows.len())
    }

    /// Recreates the single-record table holding `row`.
    pub fn flush_single<B: PersistenceBackend>(
        &mut self,
        backend: &mut B,
        layout: &RowLayout,
        version: u32,
        row: &[u8],
    ) -> DmResult<()> {
        let table = layout.table();
        if let Some(handle) = self.tables.remove(table) {
            backend.delete_table(handle)?;
        }
        let schema = self.schema(backend, layout, version)?;
        let handle = backend.create_single_record_table(
            table,
            version,
            layout.record_size(),
            TableFlags::PERSIST,
            &schema,
        )?;
        self.tables.insert(table.to_string(), handle);
        backend.insert_row(handle, row)?;
        self.set_state(table, LifecycleState::Flush);
        self.metrics.record_flushed(1);
        Ok(())
    }

    /// Marks every known table as discarded.
    pub fn discard_all(&mut self) {
        for state in self.states.values_mut() {
            *state = LifecycleState::Discard;
        }
    }

    /// Logs and counts a failed flush. Shutdown continues.
    pub fn flush_failed(&mut self, table: &str, err: &DmError) {
        error!("{}: flush failed: {}", table, err);
        self.metrics.record_flush_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::schema::{FieldDescriptor, DEFAULT_SCHEMA_BUFFER_SIZE};

    const FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::uint("id", 4),
        FieldDescriptor::uint("value", 4),
    ];

    fn layout() -> RowLayout {
        RowLayout::new("dm_test", FIELDS, 1).unwrap()
    }

    fn row(id: u32, value: u32) -> Vec<u8> {
        let mut r = id.to_be_bytes().to_vec();
        r.extend_from_slice(&value.to_be_bytes());
        r
    }

    fn flushed_backend(rows: &[Vec<u8>]) -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        let mut orch = WarmRestartOrchestrator::new(BootMode::Cold, DEFAULT_SCHEMA_BUFFER_SIZE);
        orch.load_table(&mut backend, &layout(), 1, 16, None).unwrap();
        orch.drop_runtime_tables(&mut backend);
        orch.flush_table(&mut backend, &layout(), 1, 16, rows).unwrap();
        backend.flush_all_to_nonvolatile(false).unwrap();
        backend.restart();
        backend
    }

    #[test]
    fn test_cold_init_creates_empty_runtime_table() {
        let mut backend = MemoryBackend::new();
        let mut orch = WarmRestartOrchestrator::new(BootMode::Cold, DEFAULT_SCHEMA_BUFFER_SIZE);
        let rows = orch.load_table(&mut backend, &layout(), 1, 16, Some(0)).unwrap();
        assert!(rows.is_empty());
        assert_eq!(orch.state("dm_test"), Some(LifecycleState::ColdInit));
        let handle = orch.handle("dm_test").unwrap();
        assert_eq!(backend.row_count(handle).unwrap(), 0);
    }

    #[test]
    fn test_warm_load_reads_rows_and_recreates_table() {
        let mut backend = flushed_backend(&[row(1, 10), row(2, 20)]);
        let mut orch = WarmRestartOrchestrator::new(BootMode::Warm, DEFAULT_SCHEMA_BUFFER_SIZE);
        let rows = orch.load_table(&mut backend, &layout(), 1, 16, Some(2)).unwrap();
        assert_eq!(rows, vec![row(1, 10), row(2, 20)]);
        assert_eq!(orch.state("dm_test"), Some(LifecycleState::WarmLoad));
        assert_eq!(orch.metrics().rows_loaded, 2);
        assert_eq!(orch.metrics().count_mismatches, 0);

        let handle = orch.handle("dm_test").unwrap();
        assert_eq!(backend.row_count(handle).unwrap(), 0);
    }

    #[test]
    fn test_warm_load_stops_at_expected_count() {
        let mut backend = flushed_backend(&[row(1, 10), row(2, 20), row(3, 30)]);
        let mut orch = WarmRestartOrchestrator::new(BootMode::Warm, DEFAULT_SCHEMA_BUFFER_SIZE);
        let rows = orch.load_table(&mut backend, &layout(), 1, 16, Some(2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(orch.metrics().count_mismatches, 0);
    }

    #[test]
    fn test_warm_load_count_mismatch_is_not_fatal() {
        let mut backend = flushed_backend(&[row(1, 10)]);
        let mut orch = WarmRestartOrchestrator::new(BootMode::Warm, DEFAULT_SCHEMA_BUFFER_SIZE);
        let rows = orch.load_table(&mut backend, &layout(), 1, 16, Some(3)).unwrap();
        assert_eq!(rows, vec![row(1, 10)]);
        assert_eq!(orch.metrics().count_mismatches, 1);
    }

    #[test]
    fn test_schema_over_limit_is_fatal() {
        let mut backend = MemoryBackend::new();
        let mut orch = WarmRestartOrchestrator::new(BootMode::Cold, 16);
        let err = orch.load_table(&mut backend, &layout(), 1, 16, None).unwrap_err();
        assert!(matches!(err, DmError::SchemaTooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_single_record_round_trip() {
        let single = RowLayout::new("dm_single", FIELDS, 0).unwrap();
        let mut backend = MemoryBackend::new();
        let mut orch = WarmRestartOrchestrator::new(BootMode::Cold, DEFAULT_SCHEMA_BUFFER_SIZE);
        assert!(orch.load_single(&mut backend, &single, 1).unwrap().is_none());
        orch.flush_single(&mut backend, &single, 1, &row(0, 7)).unwrap();
        backend.flush_all_to_nonvolatile(false).unwrap();
        backend.restart();

        let mut orch = WarmRestartOrchestrator::new(BootMode::Warm, DEFAULT_SCHEMA_BUFFER_SIZE);
        let loaded = orch.load_single(&mut backend, &single, 1).unwrap();
        assert_eq!(loaded, Some(row(0, 7)));
    }

    #[test]
    fn test_upsert_row_replaces_existing_key() {
        let mut backend = MemoryBackend::new();
        let mut orch = WarmRestartOrchestrator::new(BootMode::Cold, DEFAULT_SCHEMA_BUFFER_SIZE);
        orch.load_table(&mut backend, &layout(), 1, 16, None).unwrap();
        orch.upsert_row(&mut backend, &layout(), &row(4, 1)).unwrap();
        orch.upsert_row(&mut backend, &layout(), &row(4, 2)).unwrap();
        let handle = orch.handle("dm_test").unwrap();
        assert_eq!(backend.row_count(handle).unwrap(), 1);
    }
}
