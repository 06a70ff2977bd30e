//! Fixed-capacity indexed record arrays.
//!
//! Index `i` always names the same logical slot. A slot is live while its
//! vacancy field differs from the free value. Persisted rows carry the slot
//! index in leading `int32` key columns, mapped through the record type's
//! [`KeyTransform`](crate::record::KeyTransform) so that slot 0 never
//! produces an all-zero backend key.

use log::{debug, error};

use crate::allocator::{release_slot, reserve_in_range};
use crate::backend::PersistenceBackend;
use crate::error::{DmError, DmResult};
use crate::record::IndexedRecord;
use crate::schema::{FieldDescriptor, RowLayout, RowReader, RowWriter};
use crate::warm_restart::WarmRestartOrchestrator;

const SLOT_COLUMN: FieldDescriptor = FieldDescriptor::int("slot", 4);
const SUB_SLOT_COLUMN: FieldDescriptor = FieldDescriptor::int("sub_slot", 4);

fn allocate<T: Default>(table: &str, capacity: usize) -> DmResult<Vec<T>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(capacity)
        .map_err(|_| DmError::out_of_memory(table, capacity))?;
    slots.resize_with(capacity, T::default);
    Ok(slots)
}

fn slot_key(index: usize) -> DmResult<i32> {
    i32::try_from(index)
        .map_err(|_| DmError::invalid_parameter(format!("slot {} exceeds key range", index)))
}

/// One-dimensional indexed array.
#[derive(Debug)]
pub struct IndexedArray<T> {
    slots: Vec<T>,
    layout: RowLayout,
}

impl<T: IndexedRecord> IndexedArray<T> {
    /// Persisted row layout: slot column followed by the record fields.
    pub fn row_layout() -> DmResult<RowLayout> {
        RowLayout::with_key_prefix(T::TABLE, &[SLOT_COLUMN], T::FIELDS)
    }

    /// Allocates `capacity` zero-filled slots.
    pub fn new(capacity: usize) -> DmResult<Self> {
        Ok(Self {
            slots: allocate(T::TABLE, capacity)?,
            layout: Self::row_layout()?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Returns the record at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get(&self, index: usize) -> &T {
        &self.slots[index]
    }

    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self.slots[index]
    }

    /// Overwrites the whole record at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set(&mut self, index: usize, value: T) {
        self.slots[index] = value;
    }

    pub fn try_get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)
    }

    pub fn is_live(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map_or(false, |slot| T::VACANCY.is_live(slot))
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| T::VACANCY.is_live(s)).count()
    }

    /// Live slots in index order.
    pub fn iter_live(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| T::VACANCY.is_live(s))
    }

    pub fn reserve(&mut self, start: usize, end: usize, value: i64) -> DmResult<usize> {
        reserve_in_range(T::TABLE, &mut self.slots, start, end, &T::VACANCY, value)
    }

    /// Frees a slot. Returns whether it was live.
    pub fn release(&mut self, index: usize) -> DmResult<bool> {
        release_slot(T::TABLE, &mut self.slots, index)
    }

    /// Encodes the row for one slot.
    pub fn encode_row(&self, index: usize) -> DmResult<Vec<u8>> {
        let record = self
            .slots
            .get(index)
            .ok_or_else(|| DmError::not_found(format!("{} slot {}", T::TABLE, index)))?;
        let mut w = RowWriter::new(&self.layout);
        w.put_i32(T::KEY_TRANSFORM.to_backend(slot_key(index)?))?;
        record.encode(&mut w)?;
        w.finish()
    }

    /// Decodes a persisted row into its slot index and record.
    pub fn decode_row(&self, row: &[u8]) -> DmResult<(usize, T)> {
        let mut r = RowReader::new(&self.layout, row)?;
        let key = T::KEY_TRANSFORM.from_backend(r.get_i32()?);
        let record = T::decode(&mut r)?;
        r.finish()?;
        let index = usize::try_from(key)
            .map_err(|_| DmError::schema(format!("{}: negative slot key {}", T::TABLE, key)))?;
        Ok((index, record))
    }

    fn install_rows(&mut self, orch: &mut WarmRestartOrchestrator, rows: &[Vec<u8>]) -> usize {
        let mut installed = 0;
        for row in rows {
            match self.decode_row(row) {
                Ok((index, record)) if index < self.slots.len() => {
                    self.slots[index] = record;
                    installed += 1;
                }
                Ok((index, _)) => {
                    error!(
                        "{}: persisted slot {} outside capacity {}",
                        T::TABLE,
                        index,
                        self.slots.len()
                    );
                    orch.metrics_mut().record_rejected_row();
                }
                Err(e) => {
                    error!("{}: dropping undecodable row: {}", T::TABLE, e);
                    orch.metrics_mut().record_rejected_row();
                }
            }
        }
        installed
    }

    /// Opens the backing table for this boot, installing persisted rows on
    /// a warm boot. `expected` is the live count from the global record.
    pub fn open<B: PersistenceBackend>(
        &mut self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
        expected: usize,
    ) -> DmResult<usize> {
        let rows = orch.load_table(
            backend,
            &self.layout,
            T::VERSION,
            self.slots.len(),
            Some(expected),
        )?;
        let installed = self.install_rows(orch, &rows);
        debug!("{}: {} slots installed", T::TABLE, installed);
        Ok(installed)
    }

    /// Rewrites one slot in the runtime table.
    pub fn persist_slot<B: PersistenceBackend>(
        &self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
        index: usize,
    ) -> DmResult<()> {
        let row = self.encode_row(index)?;
        orch.upsert_row(backend, &self.layout, &row)
    }

    /// Recreates the table and writes every live slot.
    pub fn flush<B: PersistenceBackend>(
        &self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
    ) -> DmResult<usize> {
        let rows = self
            .iter_live()
            .map(|(index, _)| self.encode_row(index))
            .collect::<DmResult<Vec<_>>>()?;
        orch.flush_table(backend, &self.layout, T::VERSION, self.slots.len(), &rows)
    }

    /// Releases the array, flushing every live slot first when requested.
    pub fn free_all<B: PersistenceBackend>(
        self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
        flush: bool,
    ) -> DmResult<usize> {
        if flush {
            self.flush(orch, backend)
        } else {
            Ok(0)
        }
    }
}

/// Two-dimensional indexed array addressed by `(i1, i2)`.
#[derive(Debug)]
pub struct IndexedArray2<T> {
    slots: Vec<T>,
    rows: usize,
    cols: usize,
    layout: RowLayout,
}

impl<T: IndexedRecord> IndexedArray2<T> {
    pub fn row_layout() -> DmResult<RowLayout> {
        RowLayout::with_key_prefix(T::TABLE, &[SLOT_COLUMN, SUB_SLOT_COLUMN], T::FIELDS)
    }

    /// Allocates `n1 * n2` zero-filled slots.
    pub fn new(n1: usize, n2: usize) -> DmResult<Self> {
        let capacity = n1
            .checked_mul(n2)
            .ok_or_else(|| DmError::out_of_memory(T::TABLE, usize::MAX))?;
        Ok(Self {
            slots: allocate(T::TABLE, capacity)?,
            rows: n1,
            cols: n2,
            layout: Self::row_layout()?,
        })
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    fn offset(&self, i1: usize, i2: usize) -> usize {
        assert!(
            i1 < self.rows && i2 < self.cols,
            "{}: index ({}, {}) out of range ({}, {})",
            T::TABLE,
            i1,
            i2,
            self.rows,
            self.cols
        );
        i1 * self.cols + i2
    }

    fn check(&self, i1: usize) -> DmResult<()> {
        if i1 >= self.rows {
            return Err(DmError::invalid_parameter(format!(
                "{}: row {} out of range {}",
                T::TABLE,
                i1,
                self.rows
            )));
        }
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn get2(&self, i1: usize, i2: usize) -> &T {
        &self.slots[self.offset(i1, i2)]
    }

    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn get2_mut(&mut self, i1: usize, i2: usize) -> &mut T {
        let offset = self.offset(i1, i2);
        &mut self.slots[offset]
    }

    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn set2(&mut self, i1: usize, i2: usize, value: T) {
        let offset = self.offset(i1, i2);
        self.slots[offset] = value;
    }

    pub fn is_live(&self, i1: usize, i2: usize) -> bool {
        i1 < self.rows && i2 < self.cols && T::VACANCY.is_live(&self.slots[i1 * self.cols + i2])
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| T::VACANCY.is_live(s)).count()
    }

    /// Live slots in `(i1, i2)` order.
    pub fn iter_live(&self) -> impl Iterator<Item = ((usize, usize), &T)> {
        let cols = self.cols;
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| T::VACANCY.is_live(s))
            .map(move |(n, s)| ((n / cols, n % cols), s))
    }

    /// Reserves the first free `i2` in `start..=end` within row `i1`.
    pub fn reserve2(&mut self, i1: usize, start: usize, end: usize, value: i64) -> DmResult<usize> {
        self.check(i1)?;
        let base = i1 * self.cols;
        let row = &mut self.slots[base..base + self.cols];
        reserve_in_range(T::TABLE, row, start, end, &T::VACANCY, value)
    }

    /// Frees `(i1, i2)`. Returns whether it was live.
    pub fn release2(&mut self, i1: usize, i2: usize) -> DmResult<bool> {
        self.check(i1)?;
        let base = i1 * self.cols;
        release_slot(T::TABLE, &mut self.slots[base..base + self.cols], i2)
    }

    pub fn encode_row(&self, i1: usize, i2: usize) -> DmResult<Vec<u8>> {
        let record = self.get2(i1, i2);
        let mut w = RowWriter::new(&self.layout);
        w.put_i32(T::KEY_TRANSFORM.to_backend(slot_key(i1)?))?;
        w.put_i32(slot_key(i2)?)?;
        record.encode(&mut w)?;
        w.finish()
    }

    pub fn decode_row(&self, row: &[u8]) -> DmResult<((usize, usize), T)> {
        let mut r = RowReader::new(&self.layout, row)?;
        let k1 = T::KEY_TRANSFORM.from_backend(r.get_i32()?);
        let k2 = r.get_i32()?;
        let record = T::decode(&mut r)?;
        r.finish()?;
        let negative = || DmError::schema(format!("{}: negative slot key ({}, {})", T::TABLE, k1, k2));
        let i1 = usize::try_from(k1).map_err(|_| negative())?;
        let i2 = usize::try_from(k2).map_err(|_| negative())?;
        Ok(((i1, i2), record))
    }

    pub fn open<B: PersistenceBackend>(
        &mut self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
        expected: usize,
    ) -> DmResult<usize> {
        let rows = orch.load_table(
            backend,
            &self.layout,
            T::VERSION,
            self.slots.len(),
            Some(expected),
        )?;
        let mut installed = 0;
        for row in &rows {
            match self.decode_row(row) {
                Ok(((i1, i2), record)) if i1 < self.rows && i2 < self.cols => {
                    self.set2(i1, i2, record);
                    installed += 1;
                }
                Ok(((i1, i2), _)) => {
                    error!(
                        "{}: persisted slot ({}, {}) outside ({}, {})",
                        T::TABLE,
                        i1,
                        i2,
                        self.rows,
                        self.cols
                    );
                    orch.metrics_mut().record_rejected_row();
                }
                Err(e) => {
                    error!("{}: dropping undecodable row: {}", T::TABLE, e);
                    orch.metrics_mut().record_rejected_row();
                }
            }
        }
        Ok(installed)
    }

    pub fn flush<B: PersistenceBackend>(
        &self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
    ) -> DmResult<usize> {
        let rows = self
            .iter_live()
            .map(|((i1, i2), _)| self.encode_row(i1, i2))
            .collect::<DmResult<Vec<_>>>()?;
        orch.flush_table(backend, &self.layout, T::VERSION, self.slots.len(), &rows)
    }

    pub fn free_all<B: PersistenceBackend>(
        self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
        flush: bool,
    ) -> DmResult<usize> {
        if flush {
            self.flush(orch, backend)
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::record::{KeyTransform, Record, VacancyField};
    use crate::schema::DEFAULT_SCHEMA_BUFFER_SIZE;
    use crate::warm_restart::BootMode;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        valid: bool,
        hits: u64,
    }

    impl Record for Counter {
        const TABLE: &'static str = "dm_counter";
        const FIELDS: &'static [FieldDescriptor] = &[
            FieldDescriptor::boolean("valid"),
            FieldDescriptor::uint("hits", 8),
        ];

        fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
            w.put_bool(self.valid)?;
            w.put_u64(self.hits)
        }

        fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
            Ok(Self {
                valid: r.get_bool()?,
                hits: r.get_u64()?,
            })
        }
    }

    impl IndexedRecord for Counter {
        const VACANCY: VacancyField<Self> = VacancyField {
            name: "valid",
            read: |c| i64::from(c.valid),
            write: |c, v| c.valid = v != 0,
            free: 0,
        };

        fn on_release(&mut self) {
            self.hits = 0;
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Plain {
        refs: u32,
    }

    impl Record for Plain {
        const TABLE: &'static str = "dm_plain";
        const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::uint("refs", 4)];

        fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
            w.put_u32(self.refs)
        }

        fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
            Ok(Self { refs: r.get_u32()? })
        }
    }

    impl IndexedRecord for Plain {
        const VACANCY: VacancyField<Self> = VacancyField {
            name: "refs",
            read: |p| i64::from(p.refs),
            write: |p, v| p.refs = v.unsigned_abs().min(u64::from(u32::MAX)) as u32,
            free: 0,
        };
        const KEY_TRANSFORM: KeyTransform = KeyTransform::Identity;
    }

    fn cold() -> (MemoryBackend, WarmRestartOrchestrator) {
        (
            MemoryBackend::new(),
            WarmRestartOrchestrator::new(BootMode::Cold, DEFAULT_SCHEMA_BUFFER_SIZE),
        )
    }

    fn reboot(
        mut backend: MemoryBackend,
        mut orch: WarmRestartOrchestrator,
    ) -> (MemoryBackend, WarmRestartOrchestrator) {
        backend.flush_all_to_nonvolatile(false).unwrap();
        orch.drop_runtime_tables(&mut backend);
        backend.restart();
        (
            backend,
            WarmRestartOrchestrator::new(BootMode::Warm, DEFAULT_SCHEMA_BUFFER_SIZE),
        )
    }

    #[test]
    fn test_reserve_index_zero_reads_live() {
        let mut array: IndexedArray<Counter> = IndexedArray::new(64).unwrap();
        assert_eq!(array.reserve(0, 63, 0).unwrap(), 0);
        assert!(array.get(0).valid);
        assert!(array.is_live(0));
    }

    #[test]
    fn test_reserve_full_range_then_exhausted() {
        let mut array: IndexedArray<Counter> = IndexedArray::new(64).unwrap();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..64 {
            seen.insert(array.reserve(0, 63, 0).unwrap());
        }
        assert_eq!(seen.len(), 64);
        assert!(matches!(
            array.reserve(0, 63, 0),
            Err(DmError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn test_release_resets_ancillary_fields() {
        let mut array: IndexedArray<Counter> = IndexedArray::new(4).unwrap();
        let i = array.reserve(0, 3, 0).unwrap();
        array.get_mut(i).hits = 12;
        assert!(array.release(i).unwrap());
        assert_eq!(array.get(i), &Counter::default());
        assert!(!array.release(i).unwrap());
    }

    #[test]
    #[should_panic]
    fn test_get_out_of_range_panics() {
        let array: IndexedArray<Counter> = IndexedArray::new(4).unwrap();
        let _ = array.get(4);
    }

    #[test]
    fn test_out_of_memory() {
        let err = IndexedArray::<Counter>::new(usize::MAX).unwrap_err();
        assert!(matches!(err, DmError::OutOfMemory { .. }));
    }

    #[test]
    fn test_slot_zero_persists_and_reloads_at_zero() {
        let (mut backend, mut orch) = cold();
        let mut array: IndexedArray<Counter> = IndexedArray::new(8).unwrap();
        array.open(&mut orch, &mut backend, 0).unwrap();

        array.reserve(0, 7, 0).unwrap();
        array.get_mut(0).hits = 5;
        let row = array.encode_row(0).unwrap();
        assert_eq!(array.layout().key_of(&row), &(-1i32).to_be_bytes());

        orch.drop_runtime_tables(&mut backend);
        array.free_all(&mut orch, &mut backend, true).unwrap();
        let (mut backend, mut orch) = reboot(backend, orch);

        let mut array: IndexedArray<Counter> = IndexedArray::new(8).unwrap();
        assert_eq!(array.open(&mut orch, &mut backend, 1).unwrap(), 1);
        assert_eq!(
            array.get(0),
            &Counter {
                valid: true,
                hits: 5
            }
        );
    }

    #[test]
    fn test_round_trip_preserves_indices() {
        let (mut backend, mut orch) = cold();
        let mut array: IndexedArray<Plain> = IndexedArray::new(16).unwrap();
        array.open(&mut orch, &mut backend, 0).unwrap();
        array.reserve(1, 15, 0).unwrap();
        array.reserve(1, 15, 0).unwrap();
        array.set(9, Plain { refs: 3 });
        orch.drop_runtime_tables(&mut backend);
        assert_eq!(array.flush(&mut orch, &mut backend).unwrap(), 3);

        let before: Vec<(usize, Plain)> = array.iter_live().map(|(i, p)| (i, p.clone())).collect();
        let (mut backend, mut orch) = reboot(backend, orch);
        let mut reloaded: IndexedArray<Plain> = IndexedArray::new(16).unwrap();
        reloaded.open(&mut orch, &mut backend, 3).unwrap();
        let after: Vec<(usize, Plain)> =
            reloaded.iter_live().map(|(i, p)| (i, p.clone())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_identity_transform_rejects_live_slot_zero_at_flush() {
        let (mut backend, mut orch) = cold();
        let mut array: IndexedArray<Plain> = IndexedArray::new(4).unwrap();
        array.set(0, Plain { refs: 1 });
        let err = array.flush(&mut orch, &mut backend).unwrap_err();
        assert!(matches!(err, DmError::Backend(_)));
    }

    #[test]
    fn test_2d_reserve_and_round_trip() {
        let (mut backend, mut orch) = cold();
        let mut array: IndexedArray2<Counter> = IndexedArray2::new(4, 8).unwrap();
        array.open(&mut orch, &mut backend, 0).unwrap();

        assert_eq!(array.reserve2(0, 0, 7, 0).unwrap(), 0);
        assert_eq!(array.reserve2(0, 0, 7, 0).unwrap(), 1);
        assert_eq!(array.reserve2(3, 2, 7, 0).unwrap(), 2);
        array.get2_mut(3, 2).hits = 77;
        assert!(!array.is_live(1, 0));
        assert_eq!(array.live_count(), 3);

        orch.drop_runtime_tables(&mut backend);
        array.free_all(&mut orch, &mut backend, true).unwrap();
        let (mut backend, mut orch) = reboot(backend, orch);

        let mut reloaded: IndexedArray2<Counter> = IndexedArray2::new(4, 8).unwrap();
        assert_eq!(reloaded.open(&mut orch, &mut backend, 3).unwrap(), 3);
        assert!(reloaded.is_live(0, 0));
        assert!(reloaded.is_live(0, 1));
        assert_eq!(reloaded.get2(3, 2).hits, 77);
    }

    #[test]
    fn test_2d_release() {
        let mut array: IndexedArray2<Counter> = IndexedArray2::new(2, 2).unwrap();
        array.reserve2(1, 0, 1, 0).unwrap();
        assert!(array.release2(1, 0).unwrap());
        assert!(!array.is_live(1, 0));
        assert!(array.release2(2, 0).is_err());
    }
}
