//! Routing records: virtual routers, router interfaces, routes and their
//! next-hop lists.

use super::{stamp_i32, PacketAction};
use crate::error::{DmError, DmResult};
use crate::list::NodeId;
use crate::record::{IndexedRecord, ListAnchor, ListRecord, Record, VacancyField};
use crate::schema::{FieldDescriptor, RowReader, RowWriter};

/// Virtual router. The slot is live while `vr_id` is non-zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualRouterEntry {
    pub vr_id: i32,
    pub v4_enabled: bool,
    pub v6_enabled: bool,
    pub src_mac: [u8; 6],
    pub ttl1_action: PacketAction,
    pub ip_options_action: PacketAction,
}

impl Record for VirtualRouterEntry {
    const TABLE: &'static str = "dm_vr";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::int("vr_id", 4),
        FieldDescriptor::boolean("v4_enabled").with_default(1),
        FieldDescriptor::boolean("v6_enabled").with_default(1),
        FieldDescriptor::bytes("src_mac", 6),
        FieldDescriptor::uint("ttl1_action", 1).with_default(3),
        FieldDescriptor::uint("ip_options_action", 1).with_default(3),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_i32(self.vr_id)?;
        w.put_bool(self.v4_enabled)?;
        w.put_bool(self.v6_enabled)?;
        w.put_bytes(&self.src_mac)?;
        w.put_u8(self.ttl1_action.as_raw())?;
        w.put_u8(self.ip_options_action.as_raw())
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            vr_id: r.get_i32()?,
            v4_enabled: r.get_bool()?,
            v6_enabled: r.get_bool()?,
            src_mac: r.get_bytes::<6>()?,
            ttl1_action: PacketAction::from_raw(r.get_u8()?)?,
            ip_options_action: PacketAction::from_raw(r.get_u8()?)?,
        })
    }
}

impl IndexedRecord for VirtualRouterEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "vr_id",
        read: |e| i64::from(e.vr_id),
        write: |e, v| e.vr_id = stamp_i32(v),
        free: 0,
    };
}

/// Router interface type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RifType {
    #[default]
    Port,
    Vlan,
    Loopback,
    SubPort,
}

impl RifType {
    pub fn from_raw(raw: u8) -> DmResult<Self> {
        match raw {
            0 => Ok(Self::Port),
            1 => Ok(Self::Vlan),
            2 => Ok(Self::Loopback),
            3 => Ok(Self::SubPort),
            _ => Err(DmError::schema(format!("unknown router interface type {}", raw))),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::Port => 0,
            Self::Vlan => 1,
            Self::Loopback => 2,
            Self::SubPort => 3,
        }
    }
}

/// Router interface. The slot is live while `if_index` is non-zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterInterfaceEntry {
    pub if_index: i32,
    pub vr_id: i32,
    pub rif_type: RifType,
    /// Port number or VLAN id depending on `rif_type`.
    pub port_or_vlan: u32,
    pub src_mac: [u8; 6],
    pub mtu: u32,
    pub admin_v4: bool,
    pub admin_v6: bool,
}

impl Record for RouterInterfaceEntry {
    const TABLE: &'static str = "dm_rif";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::int("if_index", 4),
        FieldDescriptor::int("vr_id", 4),
        FieldDescriptor::uint("rif_type", 1),
        FieldDescriptor::uint("port_or_vlan", 4),
        FieldDescriptor::bytes("src_mac", 6),
        FieldDescriptor::uint("mtu", 4).with_default(9100),
        FieldDescriptor::boolean("admin_v4").with_default(1),
        FieldDescriptor::boolean("admin_v6").with_default(1),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_i32(self.if_index)?;
        w.put_i32(self.vr_id)?;
        w.put_u8(self.rif_type.as_raw())?;
        w.put_u32(self.port_or_vlan)?;
        w.put_bytes(&self.src_mac)?;
        w.put_u32(self.mtu)?;
        w.put_bool(self.admin_v4)?;
        w.put_bool(self.admin_v6)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            if_index: r.get_i32()?,
            vr_id: r.get_i32()?,
            rif_type: RifType::from_raw(r.get_u8()?)?,
            port_or_vlan: r.get_u32()?,
            src_mac: r.get_bytes::<6>()?,
            mtu: r.get_u32()?,
            admin_v4: r.get_bool()?,
            admin_v6: r.get_bool()?,
        })
    }
}

impl IndexedRecord for RouterInterfaceEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "if_index",
        read: |e| i64::from(e.if_index),
        write: |e, v| e.if_index = stamp_i32(v),
        free: 0,
    };
}

/// Route entry. Anchors its next-hop list.
///
/// `nh_head` mirrors the head of the rebuilt next-hop list and is never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteEntry {
    pub valid: bool,
    pub vr_id: i32,
    pub prefix: [u8; 16],
    pub prefix_len: u8,
    pub is_v6: bool,
    pub action: PacketAction,
    pub nh_count: u32,
    pub nh_head: Option<NodeId>,
}

impl Record for RouteEntry {
    const TABLE: &'static str = "dm_route";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::boolean("valid"),
        FieldDescriptor::int("vr_id", 4),
        FieldDescriptor::bytes("prefix", 16),
        FieldDescriptor::uint("prefix_len", 1),
        FieldDescriptor::boolean("is_v6"),
        FieldDescriptor::uint("action", 1).with_default(1),
        FieldDescriptor::uint("nh_count", 4),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_bool(self.valid)?;
        w.put_i32(self.vr_id)?;
        w.put_bytes(&self.prefix)?;
        w.put_u8(self.prefix_len)?;
        w.put_bool(self.is_v6)?;
        w.put_u8(self.action.as_raw())?;
        w.put_u32(self.nh_count)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            valid: r.get_bool()?,
            vr_id: r.get_i32()?,
            prefix: r.get_bytes::<16>()?,
            prefix_len: r.get_u8()?,
            is_v6: r.get_bool()?,
            action: PacketAction::from_raw(r.get_u8()?)?,
            nh_count: r.get_u32()?,
            nh_head: None,
        })
    }
}

impl IndexedRecord for RouteEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "valid",
        read: |e| i64::from(e.valid),
        write: |e, v| e.valid = v != 0,
        free: 0,
    };

    fn on_release(&mut self) {
        self.nh_count = 0;
        self.nh_head = None;
    }
}

impl ListAnchor for RouteEntry {
    fn member_count(&self) -> u32 {
        self.nh_count
    }

    fn set_member_count(&mut self, count: u32) {
        self.nh_count = count;
    }

    fn set_list_head(&mut self, head: Option<NodeId>) {
        self.nh_head = head;
    }
}

/// Next hop of a route, with a back-reference to the owning route slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteNextHop {
    pub nh_id: u32,
    pub route_slot: u32,
    pub rif_id: u32,
    pub ip: [u8; 16],
    pub weight: u32,
}

impl Record for RouteNextHop {
    const TABLE: &'static str = "route_nh";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::uint("nh_id", 4),
        FieldDescriptor::uint("route_slot", 4),
        FieldDescriptor::uint("rif_id", 4),
        FieldDescriptor::bytes("ip", 16),
        FieldDescriptor::uint("weight", 4).with_default(1),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_u32(self.nh_id)?;
        w.put_u32(self.route_slot)?;
        w.put_u32(self.rif_id)?;
        w.put_bytes(&self.ip)?;
        w.put_u32(self.weight)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            nh_id: r.get_u32()?,
            route_slot: r.get_u32()?,
            rif_id: r.get_u32()?,
            ip: r.get_bytes::<16>()?,
            weight: r.get_u32()?,
        })
    }
}

impl ListRecord for RouteNextHop {
    type Key = u32;

    fn key(&self) -> u32 {
        self.nh_id
    }

    fn set_anchor(&mut self, slot: u32) {
        self.route_slot = slot;
    }
}
