//! Neighbor record, keyed by IP address and router interface.

use std::fmt;

use crate::error::DmResult;
use crate::record::{ListRecord, Record};
use crate::schema::{FieldDescriptor, RowReader, RowWriter};

/// Byte-string neighbor key. IPv4 addresses occupy the first four bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NeighborKey {
    pub ip: [u8; 16],
    pub rif_id: u32,
}

impl NeighborKey {
    pub fn v4(addr: [u8; 4], rif_id: u32) -> Self {
        let mut ip = [0u8; 16];
        ip[..4].copy_from_slice(&addr);
        Self { ip, rif_id }
    }

    pub fn v6(ip: [u8; 16], rif_id: u32) -> Self {
        Self { ip, rif_id }
    }
}

impl fmt::Debug for NeighborKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NeighborKey(")?;
        for b in self.ip {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "@rif{})", self.rif_id)
    }
}

/// Resolved neighbor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborEntry {
    pub key: NeighborKey,
    pub is_v6: bool,
    pub mac: [u8; 6],
    pub no_host_route: bool,
}

impl Record for NeighborEntry {
    const TABLE: &'static str = "dm_neighbor";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::bytes("ip", 16),
        FieldDescriptor::uint("rif_id", 4),
        FieldDescriptor::boolean("is_v6"),
        FieldDescriptor::bytes("mac", 6),
        FieldDescriptor::boolean("no_host_route"),
    ];

    fn encode(&self, w: &mut RowWriter<'_>) -> DmResult<()> {
        w.put_bytes(&self.key.ip)?;
        w.put_u32(self.key.rif_id)?;
        w.put_bool(self.is_v6)?;
        w.put_bytes(&self.mac)?;
        w.put_bool(self.no_host_route)
    }

    fn decode(r: &mut RowReader<'_>) -> DmResult<Self> {
        Ok(Self {
            key: NeighborKey {
                ip: r.get_bytes::<16>()?,
                rif_id: r.get_u32()?,
            },
            is_v6: r.get_bool()?,
            mac: r.get_bytes::<6>()?,
            no_host_route: r.get_bool()?,
        })
    }
}

impl ListRecord for NeighborEntry {
    type Key = NeighborKey;

    fn key(&self) -> NeighborKey {
        self.key
    }
}
