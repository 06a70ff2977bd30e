//! In-memory persistence backend with file snapshots.
//!
//! Tables live in ordered maps keyed by the leading key bytes of each row.
//! Persistent tables are captured into a [`Snapshot`] on
//! `flush_all_to_nonvolatile`; the snapshot is what a later process sees
//! when it creates a table with `load_existing` set.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use super::{
    BackendError, BackendResult, IndexedTableSpec, PersistenceBackend, TableCursor, TableFlags,
    TableHandle,
};
use crate::error::DmError;
use crate::schema::{build_schema, FieldDescriptor, RowLayout, SchemaBlob, DEFAULT_SCHEMA_BUFFER_SIZE};

/// Snapshot file format version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Table shape recorded in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTableKind {
    Indexed,
    SingleRecord,
}

/// One persisted table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub name: String,
    pub version: u32,
    pub kind: SnapshotTableKind,
    pub record_size: usize,
    pub key_size: usize,
    pub schema: String,
    /// Rows in key order.
    pub rows: Vec<Vec<u8>>,
}

/// Non-volatile image of every persistent table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub saved_at: u64,
    pub tables: Vec<SnapshotTable>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at: 0,
            tables: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&SnapshotTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Reads a snapshot file.
    pub fn read_from_file(path: &Path) -> BackendResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            BackendError::Snapshot(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&json).map_err(|e| {
            BackendError::Snapshot(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(BackendError::Snapshot(format!(
                "{}: unsupported format version {}",
                path.display(),
                snapshot.format_version
            )));
        }
        Ok(snapshot)
    }

    /// Writes the snapshot through a temp file and rename.
    pub fn write_to_file(&self, path: &Path) -> BackendResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BackendError::Snapshot(format!("Failed to serialize snapshot: {}", e)))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[derive(Debug)]
enum TableRows {
    Indexed {
        key_size: usize,
        capacity: usize,
        rows: BTreeMap<Vec<u8>, Vec<u8>>,
    },
    Single(Option<Vec<u8>>),
}

#[derive(Debug)]
struct MemTable {
    name: String,
    version: u32,
    record_size: usize,
    flags: TableFlags,
    schema: String,
    rows: TableRows,
}

impl MemTable {
    fn check_size(&self, actual: usize) -> BackendResult<()> {
        if actual != self.record_size {
            return Err(BackendError::RecordSize {
                table: self.name.clone(),
                expected: self.record_size,
                actual,
            });
        }
        Ok(())
    }

    fn to_snapshot(&self) -> SnapshotTable {
        let (kind, key_size, rows) = match &self.rows {
            TableRows::Indexed { key_size, rows, .. } => (
                SnapshotTableKind::Indexed,
                *key_size,
                rows.values().cloned().collect(),
            ),
            TableRows::Single(record) => (
                SnapshotTableKind::SingleRecord,
                0,
                record.iter().cloned().collect(),
            ),
        };
        SnapshotTable {
            name: self.name.clone(),
            version: self.version,
            kind,
            record_size: self.record_size,
            key_size,
            schema: self.schema.clone(),
            rows,
        }
    }
}

/// Reference [`PersistenceBackend`] holding tables in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    snapshot_path: Option<PathBuf>,
    snapshot: Snapshot,
    tables: HashMap<TableHandle, MemTable>,
    names: HashMap<String, TableHandle>,
    next_handle: u32,
    schema_limit: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a volatile backend with no snapshot file.
    pub fn new() -> Self {
        Self {
            snapshot_path: None,
            snapshot: Snapshot::default(),
            tables: HashMap::new(),
            names: HashMap::new(),
            next_handle: 1,
            schema_limit: DEFAULT_SCHEMA_BUFFER_SIZE,
        }
    }

    /// Creates a backend bound to a snapshot file, loading it if present.
    pub fn open(path: impl Into<PathBuf>) -> BackendResult<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let snapshot = Snapshot::read_from_file(&path)?;
            info!(
                "Loaded backend snapshot {} ({} tables)",
                path.display(),
                snapshot.tables.len()
            );
            snapshot
        } else {
            info!("No backend snapshot at {}, starting empty", path.display());
            Snapshot::default()
        };

        Ok(Self {
            snapshot_path: Some(path),
            snapshot,
            ..Self::new()
        })
    }

    /// Sets the schema buffer bound used by `create_schema`.
    pub fn with_schema_limit(mut self, limit: usize) -> Self {
        self.schema_limit = limit;
        self
    }

    /// Drops every live table, keeping the last captured snapshot.
    pub fn restart(&mut self) {
        debug!("Backend restart: dropping {} live tables", self.tables.len());
        self.tables.clear();
        self.names.clear();
    }

    /// Returns the last captured snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Returns the handle of a live table.
    pub fn handle_of(&self, name: &str) -> Option<TableHandle> {
        self.names.get(name).copied()
    }

    /// Number of rows in a live table.
    pub fn row_count(&self, table: TableHandle) -> BackendResult<usize> {
        let table = self.table(table)?;
        Ok(match &table.rows {
            TableRows::Indexed { rows, .. } => rows.len(),
            TableRows::Single(record) => usize::from(record.is_some()),
        })
    }

    /// Names of live tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.keys().cloned().collect();
        names.sort();
        names
    }

    fn table(&self, handle: TableHandle) -> BackendResult<&MemTable> {
        self.tables
            .get(&handle)
            .ok_or(BackendError::UnknownTable(handle))
    }

    fn table_mut(&mut self, handle: TableHandle) -> BackendResult<&mut MemTable> {
        self.tables
            .get_mut(&handle)
            .ok_or(BackendError::UnknownTable(handle))
    }

    fn check_schema(
        name: &str,
        schema: &SchemaBlob,
        record_size: usize,
        key_size: usize,
    ) -> BackendResult<()> {
        let doc = schema
            .document()
            .map_err(|e| BackendError::Schema(format!("{}: {}", name, e)))?;
        if doc.record_size != record_size || doc.key_size != key_size {
            return Err(BackendError::Schema(format!(
                "{}: schema describes {}-byte rows with {}-byte keys, table declares {} and {}",
                name, doc.record_size, doc.key_size, record_size, key_size
            )));
        }
        Ok(())
    }

    /// Returns prior rows for `name` when they match the new table's shape.
    fn prior_rows(
        &self,
        name: &str,
        version: u32,
        kind: SnapshotTableKind,
        record_size: usize,
    ) -> Vec<Vec<u8>> {
        let Some(prior) = self.snapshot.table(name) else {
            debug!("{}: no prior rows to load", name);
            return Vec::new();
        };
        if prior.version != version {
            warn!(
                "{}: snapshot version {} does not match {}, dropping {} rows",
                name,
                prior.version,
                version,
                prior.rows.len()
            );
            return Vec::new();
        }
        if prior.kind != kind || prior.record_size != record_size {
            warn!(
                "{}: snapshot table shape changed ({:?}/{} bytes), dropping {} rows",
                name,
                prior.kind,
                prior.record_size,
                prior.rows.len()
            );
            return Vec::new();
        }
        let (rows, malformed): (Vec<_>, Vec<_>) = prior
            .rows
            .iter()
            .cloned()
            .partition(|row| row.len() == record_size);
        if !malformed.is_empty() {
            warn!(
                "{}: dropping {} snapshot rows not {} bytes long",
                name,
                malformed.len(),
                record_size
            );
        }
        rows
    }

    fn register(&mut self, table: MemTable) -> TableHandle {
        let handle = TableHandle(self.next_handle);
        self.next_handle += 1;
        self.names.insert(table.name.clone(), handle);
        self.tables.insert(handle, table);
        handle
    }
}

impl PersistenceBackend for MemoryBackend {
    fn create_schema(
        &mut self,
        table: &str,
        version: u32,
        fields: &[FieldDescriptor],
        key_fields: usize,
        record_size: usize,
    ) -> BackendResult<SchemaBlob> {
        let layout = RowLayout::new(table, fields, key_fields)
            .map_err(|e| BackendError::Schema(e.to_string()))?;
        build_schema(&layout, version, record_size, self.schema_limit).map_err(|e| match e {
            DmError::SchemaTooLarge { table, size, limit } => {
                BackendError::SchemaTooLarge { table, size, limit }
            }
            other => BackendError::Schema(other.to_string()),
        })
    }

    fn create_indexed_table(
        &mut self,
        spec: &IndexedTableSpec,
        schema: &SchemaBlob,
    ) -> BackendResult<TableHandle> {
        if self.names.contains_key(&spec.name) {
            return Err(BackendError::DuplicateName(spec.name.clone()));
        }
        Self::check_schema(&spec.name, schema, spec.record_size, spec.key_size)?;

        let mut rows = BTreeMap::new();
        if spec.flags.load_existing {
            for row in self.prior_rows(
                &spec.name,
                spec.version,
                SnapshotTableKind::Indexed,
                spec.record_size,
            ) {
                rows.insert(row[..spec.key_size].to_vec(), row);
            }
        }
        debug!(
            "Created indexed table {} (capacity {}, {} rows loaded)",
            spec.name,
            spec.capacity,
            rows.len()
        );

        Ok(self.register(MemTable {
            name: spec.name.clone(),
            version: spec.version,
            record_size: spec.record_size,
            flags: spec.flags,
            schema: schema.as_str().to_string(),
            rows: TableRows::Indexed {
                key_size: spec.key_size,
                capacity: spec.capacity,
                rows,
            },
        }))
    }

    fn create_single_record_table(
        &mut self,
        name: &str,
        version: u32,
        record_size: usize,
        flags: TableFlags,
        schema: &SchemaBlob,
    ) -> BackendResult<TableHandle> {
        if self.names.contains_key(name) {
            return Err(BackendError::DuplicateName(name.to_string()));
        }
        Self::check_schema(name, schema, record_size, 0)?;

        let record = if flags.load_existing {
            self.prior_rows(name, version, SnapshotTableKind::SingleRecord, record_size)
                .into_iter()
                .next()
        } else {
            None
        };
        debug!(
            "Created single-record table {} (record loaded: {})",
            name,
            record.is_some()
        );

        Ok(self.register(MemTable {
            name: name.to_string(),
            version,
            record_size,
            flags,
            schema: schema.as_str().to_string(),
            rows: TableRows::Single(record),
        }))
    }

    fn get_record(&self, table: TableHandle, out: &mut [u8], offset: usize) -> BackendResult<bool> {
        let t = self.table(table)?;
        let TableRows::Single(record) = &t.rows else {
            return Err(BackendError::WrongKind {
                table: t.name.clone(),
                expected: "single-record",
            });
        };
        let Some(record) = record else {
            return Ok(false);
        };
        let end = offset + out.len();
        if end > record.len() {
            return Err(BackendError::RecordSize {
                table: t.name.clone(),
                expected: record.len(),
                actual: end,
            });
        }
        out.copy_from_slice(&record[offset..end]);
        Ok(true)
    }

    fn get_next_row(
        &self,
        table: TableHandle,
        out: &mut [u8],
        cursor: &mut TableCursor,
    ) -> BackendResult<bool> {
        let t = self.table(table)?;
        t.check_size(out.len())?;
        let TableRows::Indexed { rows, .. } = &t.rows else {
            return Err(BackendError::WrongKind {
                table: t.name.clone(),
                expected: "indexed",
            });
        };

        let next = match cursor.last_key() {
            Some(last) => rows
                .range::<[u8], _>((Bound::Excluded(last), Bound::Unbounded))
                .next(),
            None => rows.iter().next(),
        };
        match next {
            Some((key, row)) => {
                out.copy_from_slice(row);
                cursor.advance_to(key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_row(&mut self, table: TableHandle, row: &[u8]) -> BackendResult<()> {
        let t = self.table_mut(table)?;
        t.check_size(row.len())?;
        let name = &t.name;
        match &mut t.rows {
            TableRows::Indexed {
                key_size,
                capacity,
                rows,
            } => {
                let key = &row[..*key_size];
                if key.iter().all(|b| *b == 0) {
                    return Err(BackendError::ZeroKey {
                        table: name.clone(),
                    });
                }
                if rows.contains_key(key) {
                    return Err(BackendError::DuplicateKey {
                        table: name.clone(),
                    });
                }
                if rows.len() >= *capacity {
                    return Err(BackendError::TableFull {
                        table: name.clone(),
                        capacity: *capacity,
                    });
                }
                rows.insert(key.to_vec(), row.to_vec());
            }
            TableRows::Single(record) => {
                *record = Some(row.to_vec());
            }
        }
        Ok(())
    }

    fn delete_row(&mut self, table: TableHandle, key: &[u8]) -> BackendResult<bool> {
        let t = self.table_mut(table)?;
        Ok(match &mut t.rows {
            TableRows::Indexed { rows, .. } => rows.remove(key).is_some(),
            TableRows::Single(record) => record.take().is_some(),
        })
    }

    fn delete_table(&mut self, table: TableHandle) -> BackendResult<()> {
        let t = self
            .tables
            .remove(&table)
            .ok_or(BackendError::UnknownTable(table))?;
        self.names.remove(&t.name);
        debug!("Deleted table {}", t.name);
        Ok(())
    }

    fn flush_all_to_nonvolatile(&mut self, checkpoint: bool) -> BackendResult<()> {
        let mut tables: Vec<SnapshotTable> = self
            .tables
            .values()
            .filter(|t| t.flags.persistent)
            .map(MemTable::to_snapshot)
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));

        self.snapshot = Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at: current_timestamp(),
            tables,
        };

        if checkpoint {
            if let Some(path) = &self.snapshot_path {
                self.snapshot.write_to_file(path)?;
                info!(
                    "Wrote backend snapshot {} ({} tables)",
                    path.display(),
                    self.snapshot.tables.len()
                );
            }
        }
        Ok(())
    }
}

/// Get current Unix timestamp in seconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::uint("id", 4),
        FieldDescriptor::uint("value", 4),
    ];

    fn row(id: u32, value: u32) -> Vec<u8> {
        let mut r = id.to_be_bytes().to_vec();
        r.extend_from_slice(&value.to_be_bytes());
        r
    }

    fn indexed(backend: &mut MemoryBackend, name: &str, flags: TableFlags) -> TableHandle {
        let schema = backend.create_schema(name, 1, FIELDS, 1, 8).unwrap();
        let spec = IndexedTableSpec {
            name: name.to_string(),
            version: 1,
            capacity: 4,
            record_size: 8,
            key_size: 4,
            flags,
        };
        backend.create_indexed_table(&spec, &schema).unwrap()
    }

    fn drain(backend: &MemoryBackend, handle: TableHandle) -> Vec<Vec<u8>> {
        let mut cursor = TableCursor::new();
        let mut out = vec![0u8; 8];
        let mut rows = Vec::new();
        while backend.get_next_row(handle, &mut out, &mut cursor).unwrap() {
            rows.push(out.clone());
        }
        rows
    }

    #[test]
    fn test_rows_iterate_in_key_order() {
        let mut backend = MemoryBackend::new();
        let t = indexed(&mut backend, "t", TableFlags::PERSIST);
        backend.insert_row(t, &row(300, 3)).unwrap();
        backend.insert_row(t, &row(2, 1)).unwrap();
        backend.insert_row(t, &row(17, 2)).unwrap();
        assert_eq!(drain(&backend, t), vec![row(2, 1), row(17, 2), row(300, 3)]);
    }

    #[test]
    fn test_insert_rejections() {
        let mut backend = MemoryBackend::new();
        let t = indexed(&mut backend, "t", TableFlags::PERSIST);

        assert!(matches!(
            backend.insert_row(t, &row(0, 1)),
            Err(BackendError::ZeroKey { .. })
        ));
        backend.insert_row(t, &row(1, 1)).unwrap();
        assert!(matches!(
            backend.insert_row(t, &row(1, 2)),
            Err(BackendError::DuplicateKey { .. })
        ));
        assert!(matches!(
            backend.insert_row(t, &[0, 0, 0, 9]),
            Err(BackendError::RecordSize { .. })
        ));
        for id in 2..=4 {
            backend.insert_row(t, &row(id, 0)).unwrap();
        }
        assert!(matches!(
            backend.insert_row(t, &row(5, 0)),
            Err(BackendError::TableFull { capacity: 4, .. })
        ));
    }

    #[test]
    fn test_duplicate_table_name() {
        let mut backend = MemoryBackend::new();
        indexed(&mut backend, "t", TableFlags::PERSIST);
        let schema = backend.create_schema("t", 1, FIELDS, 1, 8).unwrap();
        let spec = IndexedTableSpec {
            name: "t".to_string(),
            version: 1,
            capacity: 4,
            record_size: 8,
            key_size: 4,
            flags: TableFlags::PERSIST,
        };
        assert!(matches!(
            backend.create_indexed_table(&spec, &schema),
            Err(BackendError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_schema_limit_is_enforced() {
        let mut backend = MemoryBackend::new().with_schema_limit(32);
        let err = backend.create_schema("t", 1, FIELDS, 1, 8).unwrap_err();
        assert!(matches!(err, BackendError::SchemaTooLarge { limit: 32, .. }));
    }

    #[test]
    fn test_delete_row_and_table() {
        let mut backend = MemoryBackend::new();
        let t = indexed(&mut backend, "t", TableFlags::PERSIST);
        backend.insert_row(t, &row(1, 1)).unwrap();
        assert!(backend.delete_row(t, &1u32.to_be_bytes()).unwrap());
        assert!(!backend.delete_row(t, &1u32.to_be_bytes()).unwrap());

        backend.delete_table(t).unwrap();
        assert!(backend.handle_of("t").is_none());
        assert!(matches!(
            backend.insert_row(t, &row(1, 1)),
            Err(BackendError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_single_record_table() {
        let mut backend = MemoryBackend::new();
        let schema = backend.create_schema("g", 1, FIELDS, 0, 8).unwrap();
        let t = backend
            .create_single_record_table("g", 1, 8, TableFlags::PERSIST, &schema)
            .unwrap();

        let mut out = [0u8; 4];
        assert!(!backend.get_record(t, &mut out, 0).unwrap());

        backend.insert_row(t, &row(0, 42)).unwrap();
        backend.insert_row(t, &row(0, 43)).unwrap();
        assert!(backend.get_record(t, &mut out, 4).unwrap());
        assert_eq!(u32::from_be_bytes(out), 43);
        assert_eq!(backend.row_count(t).unwrap(), 1);
    }

    #[test]
    fn test_load_existing_after_restart() {
        let mut backend = MemoryBackend::new();
        let t = indexed(&mut backend, "t", TableFlags::PERSIST);
        backend.insert_row(t, &row(5, 50)).unwrap();
        let scratch = indexed(&mut backend, "scratch", TableFlags::default());
        backend.insert_row(scratch, &row(1, 1)).unwrap();
        backend.flush_all_to_nonvolatile(false).unwrap();

        backend.restart();
        assert!(backend.table_names().is_empty());
        assert!(backend.snapshot().table("scratch").is_none());

        let t = indexed(&mut backend, "t", TableFlags::PERSIST_AND_LOAD);
        assert_eq!(drain(&backend, t), vec![row(5, 50)]);
    }

    #[test]
    fn test_load_existing_drops_version_mismatch() {
        let mut backend = MemoryBackend::new();
        let t = indexed(&mut backend, "t", TableFlags::PERSIST);
        backend.insert_row(t, &row(5, 50)).unwrap();
        backend.flush_all_to_nonvolatile(false).unwrap();
        backend.restart();

        let schema = backend.create_schema("t", 2, FIELDS, 1, 8).unwrap();
        let spec = IndexedTableSpec {
            name: "t".to_string(),
            version: 2,
            capacity: 4,
            record_size: 8,
            key_size: 4,
            flags: TableFlags::PERSIST_AND_LOAD,
        };
        let t = backend.create_indexed_table(&spec, &schema).unwrap();
        assert!(drain(&backend, t).is_empty());
    }

    #[test]
    fn test_snapshot_file_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dm_snapshot.json");

        let mut backend = MemoryBackend::open(&path).unwrap();
        let t = indexed(&mut backend, "t", TableFlags::PERSIST);
        backend.insert_row(t, &row(9, 90)).unwrap();
        backend.flush_all_to_nonvolatile(true).unwrap();
        assert!(path.exists());

        let mut reopened = MemoryBackend::open(&path).unwrap();
        let t = indexed(&mut reopened, "t", TableFlags::PERSIST_AND_LOAD);
        assert_eq!(drain(&reopened, t), vec![row(9, 90)]);
    }

    #[test]
    fn test_short_snapshot_rows_are_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dm_snapshot.json");

        let mut backend = MemoryBackend::open(&path).unwrap();
        let t = indexed(&mut backend, "t", TableFlags::PERSIST);
        backend.insert_row(t, &row(1, 10)).unwrap();
        backend.insert_row(t, &row(2, 20)).unwrap();
        backend.flush_all_to_nonvolatile(true).unwrap();

        let mut snapshot = Snapshot::read_from_file(&path).unwrap();
        snapshot.tables[0].rows[0] = vec![1];
        snapshot.tables[0].rows.push(vec![0; 3]);
        snapshot.write_to_file(&path).unwrap();

        let mut reopened = MemoryBackend::open(&path).unwrap();
        let t = indexed(&mut reopened, "t", TableFlags::PERSIST_AND_LOAD);
        assert_eq!(drain(&reopened, t), vec![row(2, 20)]);
    }

    #[test]
    fn test_schema_shape_mismatch_rejected() {
        let mut backend = MemoryBackend::new();
        let schema = backend.create_schema("t", 1, FIELDS, 1, 8).unwrap();
        let spec = IndexedTableSpec {
            name: "t".to_string(),
            version: 1,
            capacity: 4,
            record_size: 8,
            key_size: 8,
            flags: TableFlags::PERSIST,
        };
        assert!(matches!(
            backend.create_indexed_table(&spec, &schema),
            Err(BackendError::Schema(_))
        ));
    }
}
