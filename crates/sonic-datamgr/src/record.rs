//! Record traits shared by the stores.
//!
//! A record type describes its persisted columns once ([`Record::FIELDS`])
//! and encodes/decodes itself against that layout. Indexed-array members
//! additionally declare how a slot reads as vacant ([`VacancyField`]) and
//! how their slot key is mapped at the backend boundary ([`KeyTransform`]).
//! List members declare their lookup key.

use std::fmt;

use crate::error::DmResult;
use crate::list::NodeId;
use crate::schema::{FieldDescriptor, RowReader, RowWriter};

/// Backend stand-in for a key that is legitimately zero.
pub const ZERO_INDEX_SENTINEL: i32 = -1;

/// A persisted record type.
pub trait Record: Clone + Default + fmt::Debug + PartialEq {
    /// Backend table name (list tables append an anchor suffix).
    const TABLE: &'static str;

    /// Persisted schema version.
    const VERSION: u32 = 1;

    /// Record columns in persisted order, excluding store-managed key columns.
    const FIELDS: &'static [FieldDescriptor];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()>;

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self>;
}

/// How a record's slot key is presented to the backend.
///
/// Backend tables reject all-zero keys, so types whose slot 0 is
/// legitimately used map it to a non-zero stand-in on the way out and back
/// on the way in. Callers only ever observe the original value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransform {
    Identity,
    ZeroAs(i32),
}

impl KeyTransform {
    pub fn to_backend(self, key: i32) -> i32 {
        match self {
            KeyTransform::ZeroAs(sentinel) if key == 0 => sentinel,
            _ => key,
        }
    }

    pub fn from_backend(self, key: i32) -> i32 {
        match self {
            KeyTransform::ZeroAs(sentinel) if key == sentinel => 0,
            _ => key,
        }
    }
}

/// Accessor for the field that marks a slot live or free.
pub struct VacancyField<T> {
    pub name: &'static str,
    pub read: fn(&T) -> i64,
    pub write: fn(&mut T, i64),
    /// Value meaning "slot free".
    pub free: i64,
}

impl<T> Clone for VacancyField<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for VacancyField<T> {}

impl<T> fmt::Debug for VacancyField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VacancyField")
            .field("name", &self.name)
            .field("free", &self.free)
            .finish()
    }
}

impl<T> VacancyField<T> {
    pub fn is_free(&self, record: &T) -> bool {
        (self.read)(record) == self.free
    }

    pub fn is_live(&self, record: &T) -> bool {
        !self.is_free(record)
    }

    pub fn stamp(&self, record: &mut T, value: i64) {
        (self.write)(record, value);
    }

    pub fn clear(&self, record: &mut T) {
        (self.write)(record, self.free);
    }
}

/// A record held in an indexed array.
pub trait IndexedRecord: Record {
    const VACANCY: VacancyField<Self>;

    const KEY_TRANSFORM: KeyTransform = KeyTransform::ZeroAs(ZERO_INDEX_SENTINEL);

    /// Resets ancillary fields when the slot is released.
    fn on_release(&mut self) {}
}

/// A record held in a linked list.
pub trait ListRecord: Record {
    type Key: Copy + PartialEq + fmt::Debug;

    fn key(&self) -> Self::Key;

    /// Embedded reference count. Removal is refused while non-zero.
    fn in_use_count(&self) -> u32 {
        0
    }

    /// Records the owning parent slot on lists that keep a back-reference.
    fn set_anchor(&mut self, _slot: u32) {}
}

/// A parent row whose count field anchors a sub-list.
pub trait ListAnchor {
    fn member_count(&self) -> u32;

    fn set_member_count(&mut self, count: u32);

    /// Parents that mirror the list head in their own row override this.
    fn set_list_head(&mut self, _head: Option<NodeId>) {}
}

/// Trait for values that carry an embedded reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value.
    ///
    /// Returns `None` if the count would underflow.
    fn decrement_ref(&mut self) -> Option<u32>;

    /// Returns the current reference count.
    fn ref_count(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Slot {
        valid: bool,
    }

    const VALID: VacancyField<Slot> = VacancyField {
        name: "valid",
        read: |s| i64::from(s.valid),
        write: |s, v| s.valid = v != 0,
        free: 0,
    };

    #[test]
    fn test_zero_key_transform_is_symmetric() {
        let t = KeyTransform::ZeroAs(ZERO_INDEX_SENTINEL);
        assert_eq!(t.to_backend(0), -1);
        assert_eq!(t.from_backend(-1), 0);
        assert_eq!(t.to_backend(5), 5);
        assert_eq!(t.from_backend(t.to_backend(0)), 0);
    }

    #[test]
    fn test_identity_transform() {
        let t = KeyTransform::Identity;
        assert_eq!(t.to_backend(0), 0);
        assert_eq!(t.from_backend(-1), -1);
    }

    #[test]
    fn test_vacancy_field() {
        let mut slot = Slot::default();
        assert!(VALID.is_free(&slot));
        VALID.stamp(&mut slot, -1);
        assert!(VALID.is_live(&slot));
        VALID.clear(&mut slot);
        assert!(VALID.is_free(&slot));
    }
}
