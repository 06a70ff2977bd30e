//! Data manager error types and status handling.
//!
//! Every fallible data manager operation returns a [`DmResult`]. The
//! hardware-facing API layer converts errors into the switch abstraction
//! status codes through [`DmError::status`], so the numeric values of
//! [`DmStatus`] match `sai_status_t`.

use std::fmt;
use thiserror::Error;

use crate::backend::BackendError;

/// Status codes returned upward to hardware-logic callers.
///
/// The values correspond to the `SAI_STATUS_*` constants.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmStatus {
    Success = 0,
    Failure = -1,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemNotFound = -7,
    ObjectInUse = -17,
}

impl DmStatus {
    /// Creates a DmStatus from a raw i32 value.
    ///
    /// Unknown codes collapse to [`DmStatus::Failure`].
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => DmStatus::Success,
            -3 => DmStatus::NoMemory,
            -4 => DmStatus::InsufficientResources,
            -5 => DmStatus::InvalidParameter,
            -7 => DmStatus::ItemNotFound,
            -17 => DmStatus::ObjectInUse,
            _ => DmStatus::Failure,
        }
    }

    /// Returns the raw status code.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == DmStatus::Success
    }

    /// Converts to a Result, with `Ok(())` for success.
    pub fn into_result(self) -> Result<(), DmStatus> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for DmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DmStatus::Success => "SAI_STATUS_SUCCESS",
            DmStatus::Failure => "SAI_STATUS_FAILURE",
            DmStatus::NoMemory => "SAI_STATUS_NO_MEMORY",
            DmStatus::InsufficientResources => "SAI_STATUS_INSUFFICIENT_RESOURCES",
            DmStatus::InvalidParameter => "SAI_STATUS_INVALID_PARAMETER",
            DmStatus::ItemNotFound => "SAI_STATUS_ITEM_NOT_FOUND",
            DmStatus::ObjectInUse => "SAI_STATUS_OBJECT_IN_USE",
        };
        write!(f, "{}", s)
    }
}

/// Error type for data manager operations.
#[derive(Debug, Error)]
pub enum DmError {
    /// Record storage could not be allocated. Fatal during startup.
    #[error("Out of memory allocating {what} ({requested} records)")]
    OutOfMemory { what: String, requested: usize },

    /// No free slot in the requested reservation range.
    #[error("No free {table} slot in range [{start}, {end}]")]
    ResourceExhausted {
        table: String,
        start: usize,
        end: usize,
    },

    /// Unknown record tag, unknown field, or malformed argument.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Record or list node lookup miss.
    #[error("Item not found: {item}")]
    ItemNotFound { item: String },

    /// Removal refused because the object is still referenced.
    #[error("Object in use: {object} (ref_count={ref_count})")]
    ObjectInUse { object: String, ref_count: u32 },

    /// Generated schema blob does not fit the schema buffer.
    #[error("Schema for {table} is {size} bytes, exceeds buffer of {limit} bytes")]
    SchemaTooLarge {
        table: String,
        size: usize,
        limit: usize,
    },

    /// Schema definition or row codec mismatch.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Error propagated from the persistence backend.
    #[error("Backend error: {0}")]
    Backend(BackendError),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Warm-boot archive is malformed.
    #[error("Archive error: {message}")]
    Archive { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DmError {
    /// Creates an out of memory error.
    pub fn out_of_memory(what: impl Into<String>, requested: usize) -> Self {
        DmError::OutOfMemory {
            what: what.into(),
            requested,
        }
    }

    /// Creates a resource exhausted error for a reservation range.
    pub fn exhausted(table: impl Into<String>, start: usize, end: usize) -> Self {
        DmError::ResourceExhausted {
            table: table.into(),
            start,
            end,
        }
    }

    /// Creates an invalid parameter error with a message.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        DmError::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a not found error with an item description.
    pub fn not_found(item: impl Into<String>) -> Self {
        DmError::ItemNotFound { item: item.into() }
    }

    /// Creates an object in use error.
    pub fn in_use(object: impl Into<String>, ref_count: u32) -> Self {
        DmError::ObjectInUse {
            object: object.into(),
            ref_count,
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        DmError::Schema {
            message: message.into(),
        }
    }

    /// Creates an archive error.
    pub fn archive(message: impl Into<String>) -> Self {
        DmError::Archive {
            message: message.into(),
        }
    }

    /// Returns the status code reported to hardware-logic callers.
    pub fn status(&self) -> DmStatus {
        match self {
            DmError::OutOfMemory { .. } => DmStatus::NoMemory,
            DmError::ResourceExhausted { .. } => DmStatus::InsufficientResources,
            DmError::InvalidParameter { .. } => DmStatus::InvalidParameter,
            DmError::ItemNotFound { .. } => DmStatus::ItemNotFound,
            DmError::ObjectInUse { .. } => DmStatus::ObjectInUse,
            DmError::SchemaTooLarge { .. }
            | DmError::Schema { .. }
            | DmError::Backend(_)
            | DmError::Config(_)
            | DmError::Archive { .. }
            | DmError::Io(_) => DmStatus::Failure,
        }
    }

    /// Returns true if the caller can continue after this error.
    ///
    /// Recoverable errors are normal runtime outcomes (a full range, a
    /// missing key, a referenced object). Everything else aborts startup.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DmError::ResourceExhausted { .. }
                | DmError::ItemNotFound { .. }
                | DmError::ObjectInUse { .. }
        )
    }
}

impl From<BackendError> for DmError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::SchemaTooLarge { table, size, limit } => {
                DmError::SchemaTooLarge { table, size, limit }
            }
            other => DmError::Backend(other),
        }
    }
}

/// Result type for data manager operations.
pub type DmResult<T> = Result<T, DmError>;

/// Extension trait for reporting results as status codes.
pub trait DmResultExt {
    /// Converts this result to a status code.
    fn to_status(&self) -> DmStatus;
}

impl<T> DmResultExt for DmResult<T> {
    fn to_status(&self) -> DmStatus {
        match self {
            Ok(_) => DmStatus::Success,
            Err(e) => e.status(),
        }
    }
}
