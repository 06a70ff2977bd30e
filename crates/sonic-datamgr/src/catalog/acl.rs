//! ACL entry record.

use super::PacketAction;
use crate::error::DmResult;
use crate::record::{IndexedRecord, Record, VacancyField};
use crate::schema::{FieldDescriptor, RowReader, RowWriter};

/// ACL rule slot. Counters are cleared when the slot is released.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AclEntry {
    pub valid: bool,
    pub table_id: u32,
    pub priority: u32,
    pub action: PacketAction,
    pub redirect_port: u32,
    pub policer_id: u32,
    pub packet_count: u64,
    pub byte_count: u64,
}

impl Record for AclEntry {
    const TABLE: &'static str = "dm_acl";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::boolean("valid"),
        FieldDescriptor::uint("table_id", 4),
        FieldDescriptor::uint("priority", 4),
        FieldDescriptor::uint("action", 1).with_default(1),
        FieldDescriptor::uint("redirect_port", 4),
        FieldDescriptor::uint("policer_id", 4),
        FieldDescriptor::uint("packet_count", 8),
        FieldDescriptor::uint("byte_count", 8),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_bool(self.valid)?;
        w.put_u32(self.table_id)?;
        w.put_u32(self.priority)?;
        w.put_u8(self.action.as_raw())?;
        w.put_u32(self.redirect_port)?;
        w.put_u32(self.policer_id)?;
        w.put_u64(self.packet_count)?;
        w.put_u64(self.byte_count)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            valid: r.get_bool()?,
            table_id: r.get_u32()?,
            priority: r.get_u32()?,
            action: PacketAction::from_raw(r.get_u8()?)?,
            redirect_port: r.get_u32()?,
            policer_id: r.get_u32()?,
            packet_count: r.get_u64()?,
            byte_count: r.get_u64()?,
        })
    }
}

impl IndexedRecord for AclEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "valid",
        read: |e| i64::from(e.valid),
        write: |e, v| e.valid = v != 0,
        free: 0,
    };

    fn on_release(&mut self) {
        self.packet_count = 0;
        self.byte_count = 0;
    }
}
