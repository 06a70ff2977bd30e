//! Switch-wide scalar record.
//!
//! One struct of counters, flags, scalars, the system MAC and timer arrays,
//! persisted as a single record under [`GLOBAL_TABLE`]. Counters are the
//! source of truth for how many records of each type exist and drive the
//! expected counts of warm load.

use log::warn;
use std::fmt;

use crate::error::{DmError, DmResult};
use crate::schema::{FieldDescriptor, RowLayout, RowReader, RowWriter};

/// Single-record table holding the global record.
pub const GLOBAL_TABLE: &str = "dm_global";

/// Persisted version of the global record.
pub const GLOBAL_VERSION: u32 = 1;

pub const COUNTER_POLL_SLOTS: usize = 8;
pub const LINK_TIMER_SLOTS: usize = 4;

const COUNTERS: usize = 29;
const FLAGS: usize = 10;
const SCALARS: usize = 7;

/// Storage class of a global field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Counter,
    Flag,
    Scalar,
    Mac,
}

/// Named fields of the global record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GlobalField {
    // Counters
    VrCount,
    RifCount,
    QueueCount,
    AclEntryCount,
    TunnelCount,
    VlanCount,
    RouteCount,
    L2mcGroupCount,
    PolicerActionCount,
    NeighborCount,
    PortCount,
    LagCount,
    LagMemberCount,
    NextHopCount,
    NextHopGroupCount,
    FdbEntryCount,
    MirrorSessionCount,
    SchedulerCount,
    WredProfileCount,
    BufferPoolCount,
    BufferProfileCount,
    HostifCount,
    HostifTrapGroupCount,
    StpInstanceCount,
    UdfCount,
    HashCount,
    SamplePacketCount,
    IsolationGroupCount,
    BfdSessionCount,
    // Flags
    SwitchInitialized,
    WarmBootCapable,
    EcmpHashConfigured,
    LagHashConfigured,
    FdbLearningEnabled,
    IpmcEnabled,
    L2mcEnabled,
    StormControlEnabled,
    CutThroughEnabled,
    MplsEnabled,
    // Scalars
    SwitchId,
    DefaultVrId,
    DefaultVlanId,
    CpuPort,
    MaxPorts,
    FdbAgingTime,
    EcmpMaxPaths,
    // MAC
    SystemMac,
}

impl GlobalField {
    /// Every field in persisted order.
    pub const ALL: [GlobalField; COUNTERS + FLAGS + SCALARS + 1] = [
        GlobalField::VrCount,
        GlobalField::RifCount,
        GlobalField::QueueCount,
        GlobalField::AclEntryCount,
        GlobalField::TunnelCount,
        GlobalField::VlanCount,
        GlobalField::RouteCount,
        GlobalField::L2mcGroupCount,
        GlobalField::PolicerActionCount,
        GlobalField::NeighborCount,
        GlobalField::PortCount,
        GlobalField::LagCount,
        GlobalField::LagMemberCount,
        GlobalField::NextHopCount,
        GlobalField::NextHopGroupCount,
        GlobalField::FdbEntryCount,
        GlobalField::MirrorSessionCount,
        GlobalField::SchedulerCount,
        GlobalField::WredProfileCount,
        GlobalField::BufferPoolCount,
        GlobalField::BufferProfileCount,
        GlobalField::HostifCount,
        GlobalField::HostifTrapGroupCount,
        GlobalField::StpInstanceCount,
        GlobalField::UdfCount,
        GlobalField::HashCount,
        GlobalField::SamplePacketCount,
        GlobalField::IsolationGroupCount,
        GlobalField::BfdSessionCount,
        GlobalField::SwitchInitialized,
        GlobalField::WarmBootCapable,
        GlobalField::EcmpHashConfigured,
        GlobalField::LagHashConfigured,
        GlobalField::FdbLearningEnabled,
        GlobalField::IpmcEnabled,
        GlobalField::L2mcEnabled,
        GlobalField::StormControlEnabled,
        GlobalField::CutThroughEnabled,
        GlobalField::MplsEnabled,
        GlobalField::SwitchId,
        GlobalField::DefaultVrId,
        GlobalField::DefaultVlanId,
        GlobalField::CpuPort,
        GlobalField::MaxPorts,
        GlobalField::FdbAgingTime,
        GlobalField::EcmpMaxPaths,
        GlobalField::SystemMac,
    ];

    /// Looks up a field by its position in [`GlobalField::ALL`].
    pub fn from_raw(raw: u32) -> DmResult<Self> {
        Self::ALL
            .get(raw as usize)
            .copied()
            .ok_or_else(|| DmError::invalid_parameter(format!("unknown global field {}", raw)))
    }

    /// Looks up a field by its persisted column name.
    pub fn from_name(name: &str) -> DmResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == name)
            .ok_or_else(|| DmError::invalid_parameter(format!("unknown global field {}", name)))
    }

    fn position(self) -> usize {
        self as usize
    }

    pub fn kind(self) -> GlobalKind {
        let pos = self.position();
        if pos < COUNTERS {
            GlobalKind::Counter
        } else if pos < COUNTERS + FLAGS {
            GlobalKind::Flag
        } else if pos < COUNTERS + FLAGS + SCALARS {
            GlobalKind::Scalar
        } else {
            GlobalKind::Mac
        }
    }

    /// Index of this field within its storage class.
    fn slot(self) -> usize {
        let pos = self.position();
        match self.kind() {
            GlobalKind::Counter => pos,
            GlobalKind::Flag => pos - COUNTERS,
            GlobalKind::Scalar => pos - COUNTERS - FLAGS,
            GlobalKind::Mac => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GlobalField::VrCount => "vr_count",
            GlobalField::RifCount => "rif_count",
            GlobalField::QueueCount => "queue_count",
            GlobalField::AclEntryCount => "acl_entry_count",
            GlobalField::TunnelCount => "tunnel_count",
            GlobalField::VlanCount => "vlan_count",
            GlobalField::RouteCount => "route_count",
            GlobalField::L2mcGroupCount => "l2mc_group_count",
            GlobalField::PolicerActionCount => "policer_action_count",
            GlobalField::NeighborCount => "neighbor_count",
            GlobalField::PortCount => "port_count",
            GlobalField::LagCount => "lag_count",
            GlobalField::LagMemberCount => "lag_member_count",
            GlobalField::NextHopCount => "next_hop_count",
            GlobalField::NextHopGroupCount => "next_hop_group_count",
            GlobalField::FdbEntryCount => "fdb_entry_count",
            GlobalField::MirrorSessionCount => "mirror_session_count",
            GlobalField::SchedulerCount => "scheduler_count",
            GlobalField::WredProfileCount => "wred_profile_count",
            GlobalField::BufferPoolCount => "buffer_pool_count",
            GlobalField::BufferProfileCount => "buffer_profile_count",
            GlobalField::HostifCount => "hostif_count",
            GlobalField::HostifTrapGroupCount => "hostif_trap_group_count",
            GlobalField::StpInstanceCount => "stp_instance_count",
            GlobalField::UdfCount => "udf_count",
            GlobalField::HashCount => "hash_count",
            GlobalField::SamplePacketCount => "sample_packet_count",
            GlobalField::IsolationGroupCount => "isolation_group_count",
            GlobalField::BfdSessionCount => "bfd_session_count",
            GlobalField::SwitchInitialized => "switch_initialized",
            GlobalField::WarmBootCapable => "warm_boot_capable",
            GlobalField::EcmpHashConfigured => "ecmp_hash_configured",
            GlobalField::LagHashConfigured => "lag_hash_configured",
            GlobalField::FdbLearningEnabled => "fdb_learning_enabled",
            GlobalField::IpmcEnabled => "ipmc_enabled",
            GlobalField::L2mcEnabled => "l2mc_enabled",
            GlobalField::StormControlEnabled => "storm_control_enabled",
            GlobalField::CutThroughEnabled => "cut_through_enabled",
            GlobalField::MplsEnabled => "mpls_enabled",
            GlobalField::SwitchId => "switch_id",
            GlobalField::DefaultVrId => "default_vr_id",
            GlobalField::DefaultVlanId => "default_vlan_id",
            GlobalField::CpuPort => "cpu_port",
            GlobalField::MaxPorts => "max_ports",
            GlobalField::FdbAgingTime => "fdb_aging_time",
            GlobalField::EcmpMaxPaths => "ecmp_max_paths",
            GlobalField::SystemMac => "system_mac",
        }
    }

    fn descriptor(self) -> FieldDescriptor {
        match self.kind() {
            GlobalKind::Counter | GlobalKind::Scalar => FieldDescriptor::uint(self.name(), 4),
            GlobalKind::Flag => FieldDescriptor::boolean(self.name()),
            GlobalKind::Mac => FieldDescriptor::bytes(self.name(), 6),
        }
    }
}

impl fmt::Display for GlobalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Value of a global field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalValue {
    Uint(u32),
    Flag(bool),
    Mac([u8; 6]),
}

/// Direction of a counter bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bump {
    Increment,
    Decrement,
}

/// The global scalar record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalRecord {
    counters: [u32; COUNTERS],
    flags: [bool; FLAGS],
    scalars: [u32; SCALARS],
    system_mac: [u8; 6],
    /// Counter polling intervals in milliseconds, per counter group.
    pub counter_poll_intervals: [u32; COUNTER_POLL_SLOTS],
    /// Link scan timers in milliseconds.
    pub link_timers: [u32; LINK_TIMER_SLOTS],
}

impl GlobalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: GlobalField) -> GlobalValue {
        let slot = field.slot();
        match field.kind() {
            GlobalKind::Counter => GlobalValue::Uint(self.counters[slot]),
            GlobalKind::Flag => GlobalValue::Flag(self.flags[slot]),
            GlobalKind::Scalar => GlobalValue::Uint(self.scalars[slot]),
            GlobalKind::Mac => GlobalValue::Mac(self.system_mac),
        }
    }

    /// Sets a field. The value must match the field's kind.
    pub fn set(&mut self, field: GlobalField, value: GlobalValue) -> DmResult<()> {
        let slot = field.slot();
        match (field.kind(), value) {
            (GlobalKind::Counter, GlobalValue::Uint(v)) => self.counters[slot] = v,
            (GlobalKind::Scalar, GlobalValue::Uint(v)) => self.scalars[slot] = v,
            (GlobalKind::Flag, GlobalValue::Flag(v)) => self.flags[slot] = v,
            (GlobalKind::Mac, GlobalValue::Mac(v)) => self.system_mac = v,
            (kind, value) => {
                return Err(DmError::invalid_parameter(format!(
                    "{} is a {:?} field, got {:?}",
                    field, kind, value
                )))
            }
        }
        Ok(())
    }

    /// Returns a counter value.
    pub fn counter(&self, field: GlobalField) -> DmResult<u32> {
        match field.kind() {
            GlobalKind::Counter => Ok(self.counters[field.slot()]),
            _ => Err(DmError::invalid_parameter(format!(
                "{} is not a counter",
                field
            ))),
        }
    }

    pub fn flag(&self, field: GlobalField) -> DmResult<bool> {
        match self.get(field) {
            GlobalValue::Flag(v) => Ok(v),
            _ => Err(DmError::invalid_parameter(format!("{} is not a flag", field))),
        }
    }

    pub fn system_mac(&self) -> [u8; 6] {
        self.system_mac
    }

    /// Increments or decrements a counter and returns the new value.
    ///
    /// Decrementing a zero counter leaves it at zero and logs a warning.
    pub fn bump(&mut self, field: GlobalField, bump: Bump) -> DmResult<u32> {
        if field.kind() != GlobalKind::Counter {
            return Err(DmError::invalid_parameter(format!(
                "{} is not a counter",
                field
            )));
        }
        let counter = &mut self.counters[field.slot()];
        match bump {
            Bump::Increment => *counter = counter.saturating_add(1),
            Bump::Decrement => {
                if *counter == 0 {
                    warn!("{} decremented below zero, holding at 0", field);
                } else {
                    *counter -= 1;
                }
            }
        }
        Ok(*counter)
    }

    /// Persisted layout of the record.
    pub fn row_layout() -> DmResult<RowLayout> {
        let mut fields: Vec<FieldDescriptor> =
            GlobalField::ALL.iter().map(|f| f.descriptor()).collect();
        fields.push(FieldDescriptor::bytes(
            "counter_poll_intervals",
            COUNTER_POLL_SLOTS * 4,
        ));
        fields.push(FieldDescriptor::bytes("link_timers", LINK_TIMER_SLOTS * 4));
        RowLayout::new(GLOBAL_TABLE, &fields, 0)
    }

    pub fn encode(&self, layout: &RowLayout) -> DmResult<Vec<u8>> {
        let mut w = RowWriter::new(layout);
        for field in GlobalField::ALL {
            match self.get(field) {
                GlobalValue::Uint(v) => w.put_u32(v)?,
                GlobalValue::Flag(v) => w.put_bool(v)?,
                GlobalValue::Mac(v) => w.put_bytes(&v)?,
            }
        }
        w.put_bytes(&pack_timers(&self.counter_poll_intervals))?;
        w.put_bytes(&pack_timers(&self.link_timers))?;
        w.finish()
    }

    pub fn decode(layout: &RowLayout, row: &[u8]) -> DmResult<Self> {
        let mut r = RowReader::new(layout, row)?;
        let mut record = Self::default();
        for field in GlobalField::ALL {
            let value = match field.kind() {
                GlobalKind::Counter | GlobalKind::Scalar => GlobalValue::Uint(r.get_u32()?),
                GlobalKind::Flag => GlobalValue::Flag(r.get_bool()?),
                GlobalKind::Mac => GlobalValue::Mac(r.get_bytes::<6>()?),
            };
            record.set(field, value)?;
        }
        record.counter_poll_intervals =
            unpack_timers(&r.get_bytes::<{ COUNTER_POLL_SLOTS * 4 }>()?);
        record.link_timers = unpack_timers(&r.get_bytes::<{ LINK_TIMER_SLOTS * 4 }>()?);
        r.finish()?;
        Ok(record)
    }
}

fn pack_timers<const N: usize>(timers: &[u32; N]) -> Vec<u8> {
    timers.iter().flat_map(|t| t.to_be_bytes()).collect()
}

fn unpack_timers<const N: usize>(bytes: &[u8]) -> [u32; N] {
    let mut out = [0u32; N];
    for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *slot = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}
