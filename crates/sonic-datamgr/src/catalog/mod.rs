//! Record-type catalog.
//!
//! Every record type the data manager persists has a stable small-integer
//! [`RecordTag`]. Hardware-logic callers address records by tag plus an
//! index, index pair or key; they never touch array memory directly.

mod acl;
mod l2;
mod neighbor;
mod qos;
mod router;
mod tunnel;

pub use acl::AclEntry;
pub use l2::{L2mcGroupEntry, L2mcMember, TaggingMode, VlanEntry, VlanMember};
pub use neighbor::{NeighborEntry, NeighborKey};
pub use qos::{MeterType, PolicerAction, QueueEntry, QueueType};
pub use router::{RifType, RouteEntry, RouteNextHop, RouterInterfaceEntry, VirtualRouterEntry};
pub use tunnel::{TunnelEntry, TunnelType};

use std::fmt;

use crate::error::{DmError, DmResult};
use crate::global::GlobalField;
use crate::indexed::{IndexedArray, IndexedArray2};
use crate::list::{ListLinks, RecordList};
use crate::record::Record;
use crate::schema::RowLayout;

/// Stable tag of each persisted record type.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordTag {
    VirtualRouter = 1,
    RouterInterface = 2,
    Queue = 3,
    AclEntry = 4,
    Tunnel = 5,
    Vlan = 6,
    VlanMember = 7,
    Route = 8,
    RouteNextHop = 9,
    L2mcGroup = 10,
    L2mcMember = 11,
    PolicerAction = 12,
    Neighbor = 13,
}

/// Store shape behind a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Array,
    Array2,
    AnchoredList,
    GlobalList,
}

impl RecordTag {
    pub const ALL: [RecordTag; 13] = [
        RecordTag::VirtualRouter,
        RecordTag::RouterInterface,
        RecordTag::Queue,
        RecordTag::AclEntry,
        RecordTag::Tunnel,
        RecordTag::Vlan,
        RecordTag::VlanMember,
        RecordTag::Route,
        RecordTag::RouteNextHop,
        RecordTag::L2mcGroup,
        RecordTag::L2mcMember,
        RecordTag::PolicerAction,
        RecordTag::Neighbor,
    ];

    /// Creates a RecordTag from its raw value.
    pub fn from_raw(raw: u16) -> DmResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_raw() == raw)
            .ok_or_else(|| DmError::invalid_parameter(format!("unknown record tag {}", raw)))
    }

    pub fn as_raw(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordTag::VirtualRouter => "virtual_router",
            RecordTag::RouterInterface => "router_interface",
            RecordTag::Queue => "queue",
            RecordTag::AclEntry => "acl_entry",
            RecordTag::Tunnel => "tunnel",
            RecordTag::Vlan => "vlan",
            RecordTag::VlanMember => "vlan_member",
            RecordTag::Route => "route",
            RecordTag::RouteNextHop => "route_next_hop",
            RecordTag::L2mcGroup => "l2mc_group",
            RecordTag::L2mcMember => "l2mc_member",
            RecordTag::PolicerAction => "policer_action",
            RecordTag::Neighbor => "neighbor",
        }
    }

    pub fn store(self) -> StoreKind {
        match self {
            RecordTag::Queue => StoreKind::Array2,
            RecordTag::VlanMember | RecordTag::RouteNextHop | RecordTag::L2mcMember => {
                StoreKind::AnchoredList
            }
            RecordTag::PolicerAction | RecordTag::Neighbor => StoreKind::GlobalList,
            _ => StoreKind::Array,
        }
    }

    /// Backend table name, or the base name for anchored lists.
    pub fn table(self) -> &'static str {
        match self {
            RecordTag::VirtualRouter => VirtualRouterEntry::TABLE,
            RecordTag::RouterInterface => RouterInterfaceEntry::TABLE,
            RecordTag::Queue => QueueEntry::TABLE,
            RecordTag::AclEntry => AclEntry::TABLE,
            RecordTag::Tunnel => TunnelEntry::TABLE,
            RecordTag::Vlan => VlanEntry::TABLE,
            RecordTag::VlanMember => VlanMember::TABLE,
            RecordTag::Route => RouteEntry::TABLE,
            RecordTag::RouteNextHop => RouteNextHop::TABLE,
            RecordTag::L2mcGroup => L2mcGroupEntry::TABLE,
            RecordTag::L2mcMember => L2mcMember::TABLE,
            RecordTag::PolicerAction => PolicerAction::TABLE,
            RecordTag::Neighbor => NeighborEntry::TABLE,
        }
    }

    /// Global counter holding the live count, for types that have one.
    ///
    /// Anchored list members are counted by their parent row instead.
    pub fn count_field(self) -> Option<GlobalField> {
        match self {
            RecordTag::VirtualRouter => Some(GlobalField::VrCount),
            RecordTag::RouterInterface => Some(GlobalField::RifCount),
            RecordTag::Queue => Some(GlobalField::QueueCount),
            RecordTag::AclEntry => Some(GlobalField::AclEntryCount),
            RecordTag::Tunnel => Some(GlobalField::TunnelCount),
            RecordTag::Vlan => Some(GlobalField::VlanCount),
            RecordTag::Route => Some(GlobalField::RouteCount),
            RecordTag::L2mcGroup => Some(GlobalField::L2mcGroupCount),
            RecordTag::PolicerAction => Some(GlobalField::PolicerActionCount),
            RecordTag::Neighbor => Some(GlobalField::NeighborCount),
            RecordTag::VlanMember | RecordTag::RouteNextHop | RecordTag::L2mcMember => None,
        }
    }

    /// Persisted row layout of this type.
    pub fn row_layout(self) -> DmResult<RowLayout> {
        match self {
            RecordTag::VirtualRouter => IndexedArray::<VirtualRouterEntry>::row_layout(),
            RecordTag::RouterInterface => IndexedArray::<RouterInterfaceEntry>::row_layout(),
            RecordTag::Queue => IndexedArray2::<QueueEntry>::row_layout(),
            RecordTag::AclEntry => IndexedArray::<AclEntry>::row_layout(),
            RecordTag::Tunnel => IndexedArray::<TunnelEntry>::row_layout(),
            RecordTag::Vlan => IndexedArray::<VlanEntry>::row_layout(),
            RecordTag::Route => IndexedArray::<RouteEntry>::row_layout(),
            RecordTag::L2mcGroup => IndexedArray::<L2mcGroupEntry>::row_layout(),
            RecordTag::VlanMember => {
                RecordList::<VlanMember>::new(VlanMember::TABLE, ListLinks::Singly).row_layout()
            }
            RecordTag::RouteNextHop => {
                RecordList::<RouteNextHop>::new(RouteNextHop::TABLE, ListLinks::Singly)
                    .row_layout()
            }
            RecordTag::L2mcMember => {
                RecordList::<L2mcMember>::new(L2mcMember::TABLE, ListLinks::Singly).row_layout()
            }
            RecordTag::PolicerAction => {
                RecordList::<PolicerAction>::new(PolicerAction::TABLE, ListLinks::Singly)
                    .row_layout()
            }
            RecordTag::Neighbor => {
                RecordList::<NeighborEntry>::new(NeighborEntry::TABLE, ListLinks::Singly)
                    .row_layout()
            }
        }
    }

    /// Persisted schema version of this type.
    pub fn version(self) -> u32 {
        match self {
            RecordTag::VirtualRouter => VirtualRouterEntry::VERSION,
            RecordTag::RouterInterface => RouterInterfaceEntry::VERSION,
            RecordTag::Queue => QueueEntry::VERSION,
            RecordTag::AclEntry => AclEntry::VERSION,
            RecordTag::Tunnel => TunnelEntry::VERSION,
            RecordTag::Vlan => VlanEntry::VERSION,
            RecordTag::VlanMember => VlanMember::VERSION,
            RecordTag::Route => RouteEntry::VERSION,
            RecordTag::RouteNextHop => RouteNextHop::VERSION,
            RecordTag::L2mcGroup => L2mcGroupEntry::VERSION,
            RecordTag::L2mcMember => L2mcMember::VERSION,
            RecordTag::PolicerAction => PolicerAction::VERSION,
            RecordTag::Neighbor => NeighborEntry::VERSION,
        }
    }
}

impl fmt::Display for RecordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Forwarding action stored in route, ACL and policer records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketAction {
    Drop,
    #[default]
    Forward,
    Copy,
    Trap,
    Log,
}

impl PacketAction {
    pub fn from_raw(raw: u8) -> DmResult<Self> {
        match raw {
            0 => Ok(Self::Drop),
            1 => Ok(Self::Forward),
            2 => Ok(Self::Copy),
            3 => Ok(Self::Trap),
            4 => Ok(Self::Log),
            _ => Err(DmError::schema(format!("unknown packet action {}", raw))),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::Drop => 0,
            Self::Forward => 1,
            Self::Copy => 2,
            Self::Trap => 3,
            Self::Log => 4,
        }
    }

    /// Parses a packet action string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DROP" => Some(Self::Drop),
            "FORWARD" => Some(Self::Forward),
            "COPY" => Some(Self::Copy),
            "TRAP" => Some(Self::Trap),
            "LOG" => Some(Self::Log),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drop => "DROP",
            Self::Forward => "FORWARD",
            Self::Copy => "COPY",
            Self::Trap => "TRAP",
            Self::Log => "LOG",
        }
    }
}

/// Narrows a reservation stamp into an `i32` natural-id field.
pub(crate) fn stamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Narrows a reservation stamp into an unsigned field, keeping it non-zero
/// for the negative sentinel.
pub(crate) fn stamp_u32(value: i64) -> u32 {
    value.unsigned_abs().min(u64::from(u32::MAX)) as u32
}

pub(crate) fn stamp_u16(value: i64) -> u16 {
    value.unsigned_abs().min(u64::from(u16::MAX)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{build_schema, DEFAULT_SCHEMA_BUFFER_SIZE};

    #[test]
    fn test_tag_round_trip() {
        for tag in RecordTag::ALL {
            assert_eq!(RecordTag::from_raw(tag.as_raw()).unwrap(), tag);
        }
        assert!(matches!(
            RecordTag::from_raw(0),
            Err(DmError::InvalidParameter { .. })
        ));
        assert!(RecordTag::from_raw(14).is_err());
    }

    #[test]
    fn test_every_schema_fits() {
        for tag in RecordTag::ALL {
            let layout = tag.row_layout().unwrap();
            build_schema(
                &layout,
                tag.version(),
                layout.record_size(),
                DEFAULT_SCHEMA_BUFFER_SIZE,
            )
            .unwrap();
        }
    }

    #[test]
    fn test_table_names_unique() {
        let mut names: Vec<&str> = RecordTag::ALL.iter().map(|t| t.table()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), RecordTag::ALL.len());
    }

    #[test]
    fn test_stamp_helpers() {
        assert_eq!(stamp_i32(-1), -1);
        assert_eq!(stamp_u32(-1), 1);
        assert_eq!(stamp_u16(70_000), u16::MAX);
        assert_eq!(PacketAction::from_raw(3).unwrap(), PacketAction::Trap);
        assert_eq!(PacketAction::parse("drop"), Some(PacketAction::Drop));
        assert!(PacketAction::from_raw(9).is_err());
    }
}
