//! Tunnel record.

use super::stamp_u32;
use crate::error::{DmError, DmResult};
use crate::record::{IndexedRecord, KeyTransform, Record, VacancyField};
use crate::schema::{FieldDescriptor, RowReader, RowWriter};

/// Tunnel encapsulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TunnelType {
    #[default]
    IpInIp,
    Vxlan,
    Gre,
}

impl TunnelType {
    pub fn from_raw(raw: u8) -> DmResult<Self> {
        match raw {
            0 => Ok(Self::IpInIp),
            1 => Ok(Self::Vxlan),
            2 => Ok(Self::Gre),
            _ => Err(DmError::schema(format!("unknown tunnel type {}", raw))),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::IpInIp => 0,
            Self::Vxlan => 1,
            Self::Gre => 2,
        }
    }
}

/// Tunnel slot, live while referenced.
///
/// Slot 0 is never handed out, so the slot key needs no zero stand-in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TunnelEntry {
    pub ref_count: u32,
    pub tunnel_type: TunnelType,
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub encap_ttl: u8,
    pub decap_vr_id: i32,
}

impl Record for TunnelEntry {
    const TABLE: &'static str = "dm_tunnel";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::uint("ref_count", 4),
        FieldDescriptor::uint("tunnel_type", 1),
        FieldDescriptor::bytes("src_ip", 16),
        FieldDescriptor::bytes("dst_ip", 16),
        FieldDescriptor::uint("encap_ttl", 1).with_default(64),
        FieldDescriptor::int("decap_vr_id", 4),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_u32(self.ref_count)?;
        w.put_u8(self.tunnel_type.as_raw())?;
        w.put_bytes(&self.src_ip)?;
        w.put_bytes(&self.dst_ip)?;
        w.put_u8(self.encap_ttl)?;
        w.put_i32(self.decap_vr_id)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            ref_count: r.get_u32()?,
            tunnel_type: TunnelType::from_raw(r.get_u8()?)?,
            src_ip: r.get_bytes::<16>()?,
            dst_ip: r.get_bytes::<16>()?,
            encap_ttl: r.get_u8()?,
            decap_vr_id: r.get_i32()?,
        })
    }
}

impl IndexedRecord for TunnelEntry {
    const VACANCY: VacancyField<Self> = VacancyField {
        name: "ref_count",
        read: |e| i64::from(e.ref_count),
        write: |e, v| e.ref_count = stamp_u32(v),
        free: 0,
    };
    const KEY_TRANSFORM: KeyTransform = KeyTransform::Identity;
}
