//! Switch Driver Data Manager
//!
//! Keeps the switch driver's control-plane records in fixed-capacity indexed
//! arrays and linked record lists, and persists them across warm restarts
//! through a pluggable table store. On a warm boot every store is rebuilt
//! from the previous run's snapshot before hardware logic resumes; on a
//! clean shutdown every live record is flushed back.
//!
//! The [`DataManager`] context owns all state. Hardware-logic callers
//! address records by [`RecordTag`] plus an index, index pair or key.

pub mod allocator;
pub mod archive;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod global;
pub mod indexed;
pub mod list;
pub mod manager;
pub mod record;
pub mod schema;
pub mod warm_restart;

pub use archive::{ArchiveMember, WarmArchive};
pub use backend::{
    BackendError, MemoryBackend, PersistenceBackend, Snapshot, TableCursor, TableFlags,
    TableHandle,
};
pub use catalog::*;
pub use config::DataManagerConfig;
pub use error::*;
pub use global::{Bump, GlobalField, GlobalRecord, GlobalValue};
pub use indexed::{IndexedArray, IndexedArray2};
pub use list::{AnchorKey, AnchoredLists, ListLinks, MacVlanKey, NodeId, RecordList};
pub use manager::{ArrayMember, ArrayStores, DataManager, ShutdownReport};
pub use record::{
    HasRefCount, IndexedRecord, KeyTransform, ListAnchor, ListRecord, Record, VacancyField,
};
pub use schema::{build_schema, FieldDescriptor, FieldKind, RowLayout, SchemaBlob};
pub use warm_restart::{
    BootMode, LifecycleState, ShutdownMode, WarmRestartMetrics, WarmRestartOrchestrator,
};
