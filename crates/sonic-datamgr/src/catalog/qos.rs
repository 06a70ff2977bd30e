//! QoS records: per-port queues and policer actions.

use log::warn;

use super::PacketAction;
use crate::error::{DmError, DmResult};
use crate::record::{HasRefCount, IndexedRecord, ListRecord, Record, VacancyField};
use crate::schema::{FieldDescriptor, RowReader, RowWriter};

/// Queue traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    #[default]
    All,
    Unicast,
    Multicast,
}

impl QueueType {
    pub fn from_raw(raw: u8) -> DmResult<Self> {
        match raw {
            0 => Ok(Self::All),
            1 => Ok(Self::Unicast),
            2 => Ok(Self::Multicast),
            _ => Err(DmError::schema(format!("unknown queue type {}", raw))),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::All => 0,
            Self::Unicast => 1,
            Self::Multicast => 2,
        }
    }
}

/// Queue of a port, addressed by `(port, queue)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueEntry {
    pub valid: bool,
    pub queue_type: QueueType,
    pub scheduler_id: u32,
    pub wred_id: u32,
    pub buffer_profile_id: u32,
}

impl Record for QueueEntry {
    const TABLE: &'static str = "dm_queue";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::boolean("valid"),
        FieldDescriptor::uint("queue_type", 1),
        FieldDescriptor::uint("scheduler_id", 4),
        FieldDescriptor::uint("wred_id", 4),
        FieldDescriptor::uint("buffer_profile_id", 4),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_bool(self.valid)?;
        w.put_u8(self.queue_type.as_raw())?;
        w.put_u32(self.scheduler_id)?;
        w.put_u32(self.wred_id)?;
        w.put_u32(self.buffer_profile_id)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            valid: r.get_bool()?,
            queue_type: QueueType::from_raw(r.get_u8()?)?,
            scheduler_id: r.get_u32()?,
            wred_id: r.get_u32()?,
            buffer_profile_id: r.get_u32()?,
        })
    }
}

impl IndexedRecord for QueueEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "valid",
        read: |e| i64::from(e.valid),
        write: |e, v| e.valid = v != 0,
        free: 0,
    };
}

/// Policer meter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MeterType {
    #[default]
    Packets,
    Bytes,
}

impl MeterType {
    pub fn from_raw(raw: u8) -> DmResult<Self> {
        match raw {
            0 => Ok(Self::Packets),
            1 => Ok(Self::Bytes),
            _ => Err(DmError::schema(format!("unknown meter type {}", raw))),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::Packets => 0,
            Self::Bytes => 1,
        }
    }
}

/// Policer action shared by ACL entries and ports.
///
/// Users take a reference through [`HasRefCount`]; removal is refused
/// while any reference is held.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicerAction {
    pub policer_id: u32,
    pub ref_count: u32,
    pub meter_type: MeterType,
    pub cir: u64,
    pub cbs: u64,
    pub pir: u64,
    pub pbs: u64,
    pub green_action: PacketAction,
    pub yellow_action: PacketAction,
    pub red_action: PacketAction,
}

impl Record for PolicerAction {
    const TABLE: &'static str = "dm_policer_action";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::uint("policer_id", 4),
        FieldDescriptor::uint("ref_count", 4),
        FieldDescriptor::uint("meter_type", 1),
        FieldDescriptor::uint("cir", 8),
        FieldDescriptor::uint("cbs", 8),
        FieldDescriptor::uint("pir", 8),
        FieldDescriptor::uint("pbs", 8),
        FieldDescriptor::uint("green_action", 1).with_default(1),
        FieldDescriptor::uint("yellow_action", 1).with_default(1),
        FieldDescriptor::uint("red_action", 1),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_u32(self.policer_id)?;
        w.put_u32(self.ref_count)?;
        w.put_u8(self.meter_type.as_raw())?;
        w.put_u64(self.cir)?;
        w.put_u64(self.cbs)?;
        w.put_u64(self.pir)?;
        w.put_u64(self.pbs)?;
        w.put_u8(self.green_action.as_raw())?;
        w.put_u8(self.yellow_action.as_raw())?;
        w.put_u8(self.red_action.as_raw())
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            policer_id: r.get_u32()?,
            ref_count: r.get_u32()?,
            meter_type: MeterType::from_raw(r.get_u8()?)?,
            cir: r.get_u64()?,
            cbs: r.get_u64()?,
            pir: r.get_u64()?,
            pbs: r.get_u64()?,
            green_action: PacketAction::from_raw(r.get_u8()?)?,
            yellow_action: PacketAction::from_raw(r.get_u8()?)?,
            red_action: PacketAction::from_raw(r.get_u8()?)?,
        })
    }
}

impl HasRefCount for PolicerAction {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        match self.ref_count.checked_sub(1) {
            Some(n) => {
                self.ref_count = n;
                Some(n)
            }
            None => {
                warn!("policer {} released with no references", self.policer_id);
                None
            }
        }
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

impl ListRecord for PolicerAction {
    type Key = u32;

    fn key(&self) -> u32 {
        self.policer_id
    }

    fn in_use_count(&self) -> u32 {
        self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policer_ref_count_saturates() {
        let mut policer = PolicerAction {
            policer_id: 3,
            ..Default::default()
        };
        assert_eq!(policer.increment_ref(), 1);
        assert_eq!(policer.decrement_ref(), Some(0));
        assert_eq!(policer.decrement_ref(), None);
        assert_eq!(policer.ref_count(), 0);
        assert_eq!(policer.in_use_count(), 0);
    }
}
