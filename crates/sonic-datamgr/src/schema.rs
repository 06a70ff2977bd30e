//! Record schema descriptors and the fixed-width row codec.
//!
//! Each record type declares its persisted columns as a static list of
//! [`FieldDescriptor`]s. At startup the list is laid out into a
//! [`RowLayout`] (offsets assigned in declaration order, packed) and turned
//! into a JSON [`SchemaBlob`] that the persistence backend uses as the
//! table's column schema.
//!
//! Rows are encoded with [`RowWriter`] and decoded with [`RowReader`]. Both
//! walk the layout column by column, so a record's codec cannot drift from
//! its declared schema without failing loudly. Integers are written
//! big-endian so that integer keys sort numerically in ordered tables.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::error::{DmError, DmResult};

/// Default bound on a generated schema blob, in bytes.
pub const DEFAULT_SCHEMA_BUFFER_SIZE: usize = 8192;

/// Persisted column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Signed integer of 1, 2, 4 or 8 bytes.
    Int,
    /// Unsigned integer of 1, 2, 4 or 8 bytes.
    Uint,
    /// Fixed-size byte array.
    Bytes,
}

/// Static description of one persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub size: usize,
    pub default: i64,
}

impl FieldDescriptor {
    /// Signed integer column.
    pub const fn int(name: &'static str, size: usize) -> Self {
        Self {
            name,
            kind: FieldKind::Int,
            size,
            default: 0,
        }
    }

    /// Unsigned integer column.
    pub const fn uint(name: &'static str, size: usize) -> Self {
        Self {
            name,
            kind: FieldKind::Uint,
            size,
            default: 0,
        }
    }

    /// Boolean column, persisted as a one-byte unsigned integer.
    pub const fn boolean(name: &'static str) -> Self {
        Self::uint(name, 1)
    }

    /// Fixed-size byte array column.
    pub const fn bytes(name: &'static str, len: usize) -> Self {
        Self {
            name,
            kind: FieldKind::Bytes,
            size: len,
            default: 0,
        }
    }

    /// Sets the column default recorded in the schema.
    pub const fn with_default(mut self, default: i64) -> Self {
        self.default = default;
        self
    }

    /// Returns the backend type name, e.g. `uint32` or `bytes[6]`.
    pub fn type_name(&self) -> String {
        match self.kind {
            FieldKind::Int => format!("int{}", self.size * 8),
            FieldKind::Uint => format!("uint{}", self.size * 8),
            FieldKind::Bytes => format!("bytes[{}]", self.size),
        }
    }

    fn validate(&self) -> DmResult<()> {
        match self.kind {
            FieldKind::Int | FieldKind::Uint => {
                if !matches!(self.size, 1 | 2 | 4 | 8) {
                    return Err(DmError::schema(format!(
                        "integer field {} has unsupported width {}",
                        self.name, self.size
                    )));
                }
            }
            FieldKind::Bytes => {
                if self.size == 0 {
                    return Err(DmError::schema(format!(
                        "byte field {} has zero length",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A field placed at its byte offset within the persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub field: FieldDescriptor,
    pub offset: usize,
}

/// Packed row layout for one backend table.
///
/// The leading `key_size` bytes of a row are the table key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    table: String,
    columns: Vec<Column>,
    record_size: usize,
    key_fields: usize,
    key_size: usize,
}

impl RowLayout {
    /// Lays out `fields` in order. The first `key_fields` columns form the key.
    pub fn new(
        table: impl Into<String>,
        fields: &[FieldDescriptor],
        key_fields: usize,
    ) -> DmResult<Self> {
        let table = table.into();
        if fields.is_empty() {
            return Err(DmError::schema(format!("{} declares no fields", table)));
        }
        if key_fields > fields.len() {
            return Err(DmError::schema(format!(
                "{} declares {} key fields but only {} fields",
                table,
                key_fields,
                fields.len()
            )));
        }

        let mut columns = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut key_size = 0;
        for (i, field) in fields.iter().enumerate() {
            field.validate()?;
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(DmError::schema(format!(
                    "{} declares field {} twice",
                    table, field.name
                )));
            }
            columns.push(Column {
                field: *field,
                offset,
            });
            offset += field.size;
            if i < key_fields {
                key_size = offset;
            }
        }

        Ok(Self {
            table,
            columns,
            record_size: offset,
            key_fields,
            key_size,
        })
    }

    /// Lays out store-managed key columns followed by a record's own fields.
    pub fn with_key_prefix(
        table: impl Into<String>,
        prefix: &[FieldDescriptor],
        fields: &[FieldDescriptor],
    ) -> DmResult<Self> {
        let mut all = Vec::with_capacity(prefix.len() + fields.len());
        all.extend_from_slice(prefix);
        all.extend_from_slice(fields);
        Self::new(table, &all, prefix.len())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Total persisted row size in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Field descriptors in column order.
    pub fn fields(&self) -> Vec<FieldDescriptor> {
        self.columns.iter().map(|c| c.field).collect()
    }

    /// Number of leading columns forming the key.
    pub fn key_fields(&self) -> usize {
        self.key_fields
    }

    /// Size of the leading key in bytes.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Returns the key bytes of an encoded row.
    pub fn key_of<'r>(&self, row: &'r [u8]) -> &'r [u8] {
        &row[..self.key_size]
    }
}

/// Column entry of the serialized schema document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub offset: usize,
    pub size: usize,
    pub default: i64,
}

/// Serialized schema handed to the persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub table: String,
    pub version: u32,
    pub record_size: usize,
    pub key_size: usize,
    pub columns: Vec<ColumnDocument>,
}

/// Opaque schema blob, bounded by the schema buffer size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaBlob {
    json: String,
}

impl SchemaBlob {
    pub fn as_str(&self) -> &str {
        &self.json
    }

    pub fn len(&self) -> usize {
        self.json.len()
    }

    pub fn is_empty(&self) -> bool {
        self.json.is_empty()
    }

    /// Parses the blob back into its document form.
    pub fn document(&self) -> DmResult<SchemaDocument> {
        serde_json::from_str(&self.json)
            .map_err(|e| DmError::schema(format!("malformed schema blob: {}", e)))
    }
}

/// Builds the backend schema blob for a layout.
///
/// `record_size` must match the layout's packed size. Fails with
/// [`DmError::SchemaTooLarge`] if the JSON document exceeds `limit` bytes.
pub fn build_schema(
    layout: &RowLayout,
    version: u32,
    record_size: usize,
    limit: usize,
) -> DmResult<SchemaBlob> {
    if record_size != layout.record_size() {
        return Err(DmError::schema(format!(
            "{}: record size {} does not match field layout of {} bytes",
            layout.table(),
            record_size,
            layout.record_size()
        )));
    }

    let document = SchemaDocument {
        table: layout.table().to_string(),
        version,
        record_size,
        key_size: layout.key_size(),
        columns: layout
            .columns()
            .iter()
            .map(|c| ColumnDocument {
                name: c.field.name.to_string(),
                type_name: c.field.type_name(),
                offset: c.offset,
                size: c.field.size,
                default: c.field.default,
            })
            .collect(),
    };

    let json = serde_json::to_string(&document)
        .map_err(|e| DmError::schema(format!("{}: {}", layout.table(), e)))?;

    if json.len() > limit {
        return Err(DmError::SchemaTooLarge {
            table: layout.table().to_string(),
            size: json.len(),
            limit,
        });
    }

    Ok(SchemaBlob { json })
}

fn uint_fits(value: u64, size: usize) -> bool {
    size >= 8 || value < (1u64 << (size * 8))
}

fn int_fits(value: i64, size: usize) -> bool {
    if size >= 8 {
        return true;
    }
    let bits = (size * 8) as u32;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    (min..=max).contains(&value)
}

/// Encodes one row column by column in layout order.
pub struct RowWriter<'a> {
    layout: &'a RowLayout,
    buf: Vec<u8>,
    next: usize,
}

impl<'a> RowWriter<'a> {
    pub fn new(layout: &'a RowLayout) -> Self {
        Self {
            layout,
            buf: vec![0; layout.record_size()],
            next: 0,
        }
    }

    fn advance(&mut self, kind: FieldKind) -> DmResult<Column> {
        let column = *self.layout.columns().get(self.next).ok_or_else(|| {
            DmError::schema(format!(
                "{}: row writer ran past {} columns",
                self.layout.table(),
                self.layout.columns().len()
            ))
        })?;
        if column.field.kind != kind {
            return Err(DmError::schema(format!(
                "{}: column {} is {}, written as {:?}",
                self.layout.table(),
                column.field.name,
                column.field.type_name(),
                kind
            )));
        }
        self.next += 1;
        Ok(column)
    }

    pub fn put_uint(&mut self, value: u64) -> DmResult<()> {
        let column = self.advance(FieldKind::Uint)?;
        let size = column.field.size;
        if !uint_fits(value, size) {
            return Err(DmError::schema(format!(
                "{}: value {} overflows column {}",
                self.layout.table(),
                value,
                column.field.name
            )));
        }
        BigEndian::write_uint(
            &mut self.buf[column.offset..column.offset + size],
            value,
            size,
        );
        Ok(())
    }

    pub fn put_int(&mut self, value: i64) -> DmResult<()> {
        let column = self.advance(FieldKind::Int)?;
        let size = column.field.size;
        if !int_fits(value, size) {
            return Err(DmError::schema(format!(
                "{}: value {} overflows column {}",
                self.layout.table(),
                value,
                column.field.name
            )));
        }
        BigEndian::write_int(
            &mut self.buf[column.offset..column.offset + size],
            value,
            size,
        );
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> DmResult<()> {
        self.put_uint(u64::from(value))
    }

    pub fn put_u16(&mut self, value: u16) -> DmResult<()> {
        self.put_uint(u64::from(value))
    }

    pub fn put_u32(&mut self, value: u32) -> DmResult<()> {
        self.put_uint(u64::from(value))
    }

    pub fn put_u64(&mut self, value: u64) -> DmResult<()> {
        self.put_uint(value)
    }

    pub fn put_i32(&mut self, value: i32) -> DmResult<()> {
        self.put_int(i64::from(value))
    }

    pub fn put_bool(&mut self, value: bool) -> DmResult<()> {
        self.put_uint(u64::from(value))
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> DmResult<()> {
        let column = self.advance(FieldKind::Bytes)?;
        if value.len() != column.field.size {
            return Err(DmError::schema(format!(
                "{}: column {} holds {} bytes, got {}",
                self.layout.table(),
                column.field.name,
                column.field.size,
                value.len()
            )));
        }
        self.buf[column.offset..column.offset + value.len()].copy_from_slice(value);
        Ok(())
    }

    /// Returns the encoded row. Every column must have been written.
    pub fn finish(self) -> DmResult<Vec<u8>> {
        if self.next != self.layout.columns().len() {
            return Err(DmError::schema(format!(
                "{}: wrote {} of {} columns",
                self.layout.table(),
                self.next,
                self.layout.columns().len()
            )));
        }
        Ok(self.buf)
    }
}

/// Decodes one row column by column in layout order.
pub struct RowReader<'a> {
    layout: &'a RowLayout,
    buf: &'a [u8],
    next: usize,
}

impl<'a> RowReader<'a> {
    pub fn new(layout: &'a RowLayout, buf: &'a [u8]) -> DmResult<Self> {
        if buf.len() != layout.record_size() {
            return Err(DmError::schema(format!(
                "{}: row is {} bytes, layout expects {}",
                layout.table(),
                buf.len(),
                layout.record_size()
            )));
        }
        Ok(Self {
            layout,
            buf,
            next: 0,
        })
    }

    fn advance(&mut self, kind: FieldKind) -> DmResult<Column> {
        let column = *self.layout.columns().get(self.next).ok_or_else(|| {
            DmError::schema(format!(
                "{}: row reader ran past {} columns",
                self.layout.table(),
                self.layout.columns().len()
            ))
        })?;
        if column.field.kind != kind {
            return Err(DmError::schema(format!(
                "{}: column {} is {}, read as {:?}",
                self.layout.table(),
                column.field.name,
                column.field.type_name(),
                kind
            )));
        }
        self.next += 1;
        Ok(column)
    }

    fn narrow<T: TryFrom<u64>>(&self, value: u64) -> DmResult<T> {
        T::try_from(value).map_err(|_| {
            DmError::schema(format!(
                "{}: value {} does not fit the record field",
                self.layout.table(),
                value
            ))
        })
    }

    pub fn get_uint(&mut self) -> DmResult<u64> {
        let column = self.advance(FieldKind::Uint)?;
        let size = column.field.size;
        Ok(BigEndian::read_uint(
            &self.buf[column.offset..column.offset + size],
            size,
        ))
    }

    pub fn get_int(&mut self) -> DmResult<i64> {
        let column = self.advance(FieldKind::Int)?;
        let size = column.field.size;
        Ok(BigEndian::read_int(
            &self.buf[column.offset..column.offset + size],
            size,
        ))
    }

    pub fn get_u8(&mut self) -> DmResult<u8> {
        let v = self.get_uint()?;
        self.narrow(v)
    }

    pub fn get_u16(&mut self) -> DmResult<u16> {
        let v = self.get_uint()?;
        self.narrow(v)
    }

    pub fn get_u32(&mut self) -> DmResult<u32> {
        let v = self.get_uint()?;
        self.narrow(v)
    }

    pub fn get_u64(&mut self) -> DmResult<u64> {
        self.get_uint()
    }

    pub fn get_i32(&mut self) -> DmResult<i32> {
        let v = self.get_int()?;
        i32::try_from(v).map_err(|_| {
            DmError::schema(format!(
                "{}: value {} does not fit an i32 field",
                self.layout.table(),
                v
            ))
        })
    }

    pub fn get_bool(&mut self) -> DmResult<bool> {
        Ok(self.get_uint()? != 0)
    }

    pub fn get_bytes<const N: usize>(&mut self) -> DmResult<[u8; N]> {
        let column = self.advance(FieldKind::Bytes)?;
        if column.field.size != N {
            return Err(DmError::schema(format!(
                "{}: column {} holds {} bytes, read as {}",
                self.layout.table(),
                column.field.name,
                column.field.size,
                N
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[column.offset..column.offset + N]);
        Ok(out)
    }

    /// Checks that every column was consumed.
    pub fn finish(self) -> DmResult<()> {
        if self.next != self.layout.columns().len() {
            return Err(DmError::schema(format!(
                "{}: read {} of {} columns",
                self.layout.table(),
                self.next,
                self.layout.columns().len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::int("slot", 4),
        FieldDescriptor::uint("vr_id", 4),
        FieldDescriptor::boolean("v4_enabled").with_default(1),
        FieldDescriptor::bytes("src_mac", 6),
    ];

    #[test]
    fn test_layout_offsets_and_key() {
        let layout = RowLayout::new("dm_vr", FIELDS, 1).unwrap();
        let offsets: Vec<usize> = layout.columns().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 9]);
        assert_eq!(layout.record_size(), 15);
        assert_eq!(layout.key_size(), 4);
    }

    #[test]
    fn test_layout_rejects_bad_width_and_duplicates() {
        let bad = [FieldDescriptor::uint("x", 3)];
        assert!(RowLayout::new("t", &bad, 0).is_err());

        let dup = [FieldDescriptor::uint("x", 4), FieldDescriptor::int("x", 4)];
        assert!(RowLayout::new("t", &dup, 1).is_err());
    }

    #[test]
    fn test_build_schema_document() {
        let layout = RowLayout::new("dm_vr", FIELDS, 1).unwrap();
        let blob = build_schema(&layout, 2, 15, DEFAULT_SCHEMA_BUFFER_SIZE).unwrap();
        let doc = blob.document().unwrap();
        assert_eq!(doc.table, "dm_vr");
        assert_eq!(doc.version, 2);
        assert_eq!(doc.key_size, 4);
        assert_eq!(doc.columns[2].type_name, "uint8");
        assert_eq!(doc.columns[2].default, 1);
        assert_eq!(doc.columns[3].type_name, "bytes[6]");
    }

    #[test]
    fn test_build_schema_too_large() {
        let layout = RowLayout::new("dm_vr", FIELDS, 1).unwrap();
        let err = build_schema(&layout, 1, 15, 64).unwrap_err();
        assert!(matches!(err, DmError::SchemaTooLarge { limit: 64, .. }));
    }

    #[test]
    fn test_build_schema_size_mismatch() {
        let layout = RowLayout::new("dm_vr", FIELDS, 1).unwrap();
        assert!(build_schema(&layout, 1, 16, DEFAULT_SCHEMA_BUFFER_SIZE).is_err());
    }

    #[test]
    fn test_row_codec() {
        let layout = RowLayout::new("dm_vr", FIELDS, 1).unwrap();
        let mut w = RowWriter::new(&layout);
        w.put_i32(-1).unwrap();
        w.put_u32(7).unwrap();
        w.put_bool(true).unwrap();
        w.put_bytes(&[0, 1, 2, 3, 4, 5]).unwrap();
        let row = w.finish().unwrap();
        assert_eq!(layout.key_of(&row), &[0xff, 0xff, 0xff, 0xff]);

        let mut r = RowReader::new(&layout, &row).unwrap();
        assert_eq!(r.get_i32().unwrap(), -1);
        assert_eq!(r.get_u32().unwrap(), 7);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_bytes::<6>().unwrap(), [0, 1, 2, 3, 4, 5]);
        r.finish().unwrap();
    }

    #[test]
    fn test_writer_checks_kind_and_range() {
        let layout = RowLayout::new("dm_vr", FIELDS, 1).unwrap();
        let mut w = RowWriter::new(&layout);
        assert!(w.put_u32(1).is_err());

        let mut w = RowWriter::new(&layout);
        w.put_i32(0).unwrap();
        w.put_u32(0).unwrap();
        assert!(w.put_uint(256).is_err());
    }

    #[test]
    fn test_writer_requires_all_columns() {
        let layout = RowLayout::new("dm_vr", FIELDS, 1).unwrap();
        let mut w = RowWriter::new(&layout);
        w.put_i32(3).unwrap();
        assert!(w.finish().is_err());
    }

    #[test]
    fn test_integer_keys_sort_numerically() {
        let fields = [FieldDescriptor::uint("seq", 4)];
        let layout = RowLayout::new("t", &fields, 1).unwrap();
        let encode = |v: u32| {
            let mut w = RowWriter::new(&layout);
            w.put_u32(v).unwrap();
            w.finish().unwrap()
        };
        assert!(encode(2) < encode(256));
        assert!(encode(255) < encode(256));
    }
}
