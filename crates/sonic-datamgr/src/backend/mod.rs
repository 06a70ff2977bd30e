//! Persistence backend contract.
//!
//! The data manager is a client of a versioned, schema-typed table store.
//! The store may live in another process; every call on
//! [`PersistenceBackend`] is a synchronous request and may block. The
//! [`memory`] module provides a reference implementation that keeps tables
//! in memory and snapshots them to a file.

pub mod memory;

use std::fmt;
use thiserror::Error;

use crate::schema::{FieldDescriptor, RowLayout, SchemaBlob};

pub use memory::{MemoryBackend, Snapshot, SnapshotTable};

/// Errors reported by a persistence backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Table name already exists: {0}")]
    DuplicateName(String),

    #[error("Unknown table handle: {0}")]
    UnknownTable(TableHandle),

    #[error("Table {table}: all-zero keys are reserved")]
    ZeroKey { table: String },

    #[error("Table {table}: duplicate key")]
    DuplicateKey { table: String },

    #[error("Table {table}: row is {actual} bytes, expected {expected}")]
    RecordSize {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Table {table} is full ({capacity} rows)")]
    TableFull { table: String, capacity: usize },

    #[error("Table {table}: operation requires a {expected} table")]
    WrongKind { table: String, expected: &'static str },

    #[error("Schema for {table} is {size} bytes, exceeds buffer of {limit} bytes")]
    SchemaTooLarge {
        table: String,
        size: usize,
        limit: usize,
    },

    #[error("Schema rejected: {0}")]
    Schema(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a live backend table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableHandle(pub u32);

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Table creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableFlags {
    /// Include the table in non-volatile snapshots.
    pub persistent: bool,
    /// Populate the table from the prior snapshot's rows of the same name.
    pub load_existing: bool,
}

impl TableFlags {
    /// Persistent table starting empty.
    pub const PERSIST: TableFlags = TableFlags {
        persistent: true,
        load_existing: false,
    };

    /// Persistent table populated from the prior snapshot.
    pub const PERSIST_AND_LOAD: TableFlags = TableFlags {
        persistent: true,
        load_existing: true,
    };
}

/// Parameters of an indexed (ordered-by-key) table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTableSpec {
    pub name: String,
    pub version: u32,
    pub capacity: usize,
    pub record_size: usize,
    pub key_size: usize,
    pub flags: TableFlags,
}

impl IndexedTableSpec {
    /// Builds a table spec from a row layout.
    pub fn from_layout(layout: &RowLayout, version: u32, capacity: usize, flags: TableFlags) -> Self {
        Self {
            name: layout.table().to_string(),
            version,
            capacity,
            record_size: layout.record_size(),
            key_size: layout.key_size(),
            flags,
        }
    }
}

/// Cursor for `get_next_row` iteration. Starts before the first row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCursor {
    last_key: Option<Vec<u8>>,
}

impl TableCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn last_key(&self) -> Option<&[u8]> {
        self.last_key.as_deref()
    }

    pub(crate) fn advance_to(&mut self, key: &[u8]) {
        self.last_key = Some(key.to_vec());
    }
}

/// Client interface to the persisted table store.
pub trait PersistenceBackend {
    /// Builds the backend column schema for a field list.
    fn create_schema(
        &mut self,
        table: &str,
        version: u32,
        fields: &[FieldDescriptor],
        key_fields: usize,
        record_size: usize,
    ) -> BackendResult<SchemaBlob>;

    /// Creates an indexed table keyed by the leading `key_size` bytes of each row.
    fn create_indexed_table(
        &mut self,
        spec: &IndexedTableSpec,
        schema: &SchemaBlob,
    ) -> BackendResult<TableHandle>;

    /// Creates a table holding exactly one record.
    fn create_single_record_table(
        &mut self,
        name: &str,
        version: u32,
        record_size: usize,
        flags: TableFlags,
        schema: &SchemaBlob,
    ) -> BackendResult<TableHandle>;

    /// Reads the single record of a single-record table starting at `offset`.
    ///
    /// Returns false if the table holds no record.
    fn get_record(
        &self,
        table: TableHandle,
        out: &mut [u8],
        offset: usize,
    ) -> BackendResult<bool>;

    /// Reads the row after `cursor` in key order.
    ///
    /// Returns false once the table is exhausted.
    fn get_next_row(
        &self,
        table: TableHandle,
        out: &mut [u8],
        cursor: &mut TableCursor,
    ) -> BackendResult<bool>;

    /// Inserts a row. For single-record tables the record is replaced.
    fn insert_row(&mut self, table: TableHandle, row: &[u8]) -> BackendResult<()>;

    /// Deletes the row with the given key. Returns false if absent.
    fn delete_row(&mut self, table: TableHandle, key: &[u8]) -> BackendResult<bool>;

    /// Drops a table and all its rows.
    fn delete_table(&mut self, table: TableHandle) -> BackendResult<()>;

    /// Writes every persistent table to non-volatile storage.
    fn flush_all_to_nonvolatile(&mut self, checkpoint: bool) -> BackendResult<()>;
}
