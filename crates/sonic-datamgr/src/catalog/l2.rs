//! Layer 2 records: VLANs and L2 multicast groups with their member lists.

use super::stamp_u16;
use crate::error::{DmError, DmResult};
use crate::list::MacVlanKey;
use crate::record::{IndexedRecord, ListAnchor, ListRecord, Record, VacancyField};
use crate::schema::{FieldDescriptor, RowReader, RowWriter};

/// VLAN entry, stored at the slot equal to its VLAN id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VlanEntry {
    pub vlan_id: u16,
    pub learn_disable: bool,
    pub stp_instance: u32,
    pub mtu: u32,
    pub member_count: u32,
}

impl Record for VlanEntry {
    const TABLE: &'static str = "dm_vlan";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::uint("vlan_id", 2),
        FieldDescriptor::boolean("learn_disable"),
        FieldDescriptor::uint("stp_instance", 4),
        FieldDescriptor::uint("mtu", 4).with_default(9100),
        FieldDescriptor::uint("member_count", 4),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_u16(self.vlan_id)?;
        w.put_bool(self.learn_disable)?;
        w.put_u32(self.stp_instance)?;
        w.put_u32(self.mtu)?;
        w.put_u32(self.member_count)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            vlan_id: r.get_u16()?,
            learn_disable: r.get_bool()?,
            stp_instance: r.get_u32()?,
            mtu: r.get_u32()?,
            member_count: r.get_u32()?,
        })
    }
}

impl IndexedRecord for VlanEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "vlan_id",
        read: |e| i64::from(e.vlan_id),
        write: |e, v| e.vlan_id = stamp_u16(v),
        free: 0,
    };

    fn on_release(&mut self) {
        self.member_count = 0;
    }
}

impl ListAnchor for VlanEntry {
    fn member_count(&self) -> u32 {
        self.member_count
    }

    fn set_member_count(&mut self, count: u32) {
        self.member_count = count;
    }
}

/// Member tagging mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaggingMode {
    #[default]
    Untagged,
    Tagged,
    PriorityTagged,
}

impl TaggingMode {
    pub fn from_raw(raw: u8) -> DmResult<Self> {
        match raw {
            0 => Ok(Self::Untagged),
            1 => Ok(Self::Tagged),
            2 => Ok(Self::PriorityTagged),
            _ => Err(DmError::schema(format!("unknown tagging mode {}", raw))),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::Untagged => 0,
            Self::Tagged => 1,
            Self::PriorityTagged => 2,
        }
    }

    /// Parses a tagging mode string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "untagged" => Some(Self::Untagged),
            "tagged" => Some(Self::Tagged),
            "priority_tagged" => Some(Self::PriorityTagged),
            _ => None,
        }
    }
}

/// VLAN member port.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VlanMember {
    pub port: u32,
    pub tagging: TaggingMode,
}

impl Record for VlanMember {
    const TABLE: &'static str = "vlan_members";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::uint("port", 4),
        FieldDescriptor::uint("tagging", 1),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_u32(self.port)?;
        w.put_u8(self.tagging.as_raw())
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            port: r.get_u32()?,
            tagging: TaggingMode::from_raw(r.get_u8()?)?,
        })
    }
}

impl ListRecord for VlanMember {
    type Key = u32;

    fn key(&self) -> u32 {
        self.port
    }
}

/// L2 multicast group, identified by MAC and VLAN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct L2mcGroupEntry {
    pub valid: bool,
    pub mac: [u8; 6],
    pub vlan: u16,
    pub member_count: u32,
}

impl L2mcGroupEntry {
    pub fn mac_vlan(&self) -> MacVlanKey {
        MacVlanKey {
            mac: self.mac,
            vlan: self.vlan,
        }
    }

    /// False until a MAC has been assigned. Groups without one hold no members.
    pub fn has_identity(&self) -> bool {
        self.mac != [0; 6]
    }
}

impl Record for L2mcGroupEntry {
    const TABLE: &'static str = "dm_l2mc_group";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::boolean("valid"),
        FieldDescriptor::bytes("mac", 6),
        FieldDescriptor::uint("vlan", 2),
        FieldDescriptor::uint("member_count", 4),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_bool(self.valid)?;
        w.put_bytes(&self.mac)?;
        w.put_u16(self.vlan)?;
        w.put_u32(self.member_count)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            valid: r.get_bool()?,
            mac: r.get_bytes::<6>()?,
            vlan: r.get_u16()?,
            member_count: r.get_u32()?,
        })
    }
}

impl IndexedRecord for L2mcGroupEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "valid",
        read: |e| i64::from(e.valid),
        write: |e, v| e.valid = v != 0,
        free: 0,
    };

    fn on_release(&mut self) {
        self.member_count = 0;
    }
}

impl ListAnchor for L2mcGroupEntry {
    fn member_count(&self) -> u32 {
        self.member_count
    }

    fn set_member_count(&mut self, count: u32) {
        self.member_count = count;
    }
}

/// L2 multicast group member port.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct L2mcMember {
    pub port: u32,
}

impl Record for L2mcMember {
    const TABLE: &'static str = "l2mc_members";
    const FIELDS: &'static [FieldDescriptor] = &[FieldDescriptor::uint("port", 4)];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_u32(self.port)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self { port: r.get_u32()? })
    }
}

impl ListRecord for L2mcMember {
    type Key = u32;

    fn key(&self) -> u32 {
        self.port
    }
}
