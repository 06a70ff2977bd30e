//! Integration tests for warm restart
//!
//! Each "process lifetime" opens a fresh file-backed MemoryBackend on the
//! same snapshot path, so everything that survives has gone through the
//! snapshot file.

use pretty_assertions::assert_eq;
use sonic_datamgr::{
    AclEntry, BootMode, DataManager, DataManagerConfig, DmError, GlobalField, GlobalValue,
    L2mcGroupEntry, L2mcMember, MemoryBackend, NeighborEntry, NeighborKey, PolicerAction,
    QueueEntry, QueueType, RecordTag, RouteEntry, RouteNextHop, ShutdownMode, Snapshot,
    TaggingMode, TunnelEntry, VirtualRouterEntry, VlanEntry, VlanMember,
};
use std::path::Path;
use tempfile::TempDir;

fn config(dir: &Path) -> DataManagerConfig {
    let mut config = DataManagerConfig::default();
    config.snapshot.directory = dir.to_path_buf();
    let cap = &mut config.capacity;
    cap.virtual_routers = 8;
    cap.router_interfaces = 16;
    cap.ports = 8;
    cap.queues_per_port = 8;
    cap.acl_entries = 64;
    cap.tunnels = 8;
    cap.vlans = 128;
    cap.routes = 32;
    cap.l2mc_groups = 8;
    config
}

fn start(config: &DataManagerConfig, boot: BootMode) -> DataManager<MemoryBackend> {
    let backend = MemoryBackend::open(config.snapshot_path()).unwrap();
    DataManager::start(config.clone(), backend, boot).unwrap()
}

fn stop(dm: DataManager<MemoryBackend>, mode: ShutdownMode) {
    let (_, report) = dm.shutdown(mode);
    assert!(report.is_clean());
}

fn vlan_ports(dm: &DataManager<MemoryBackend>, vlan: u16) -> Vec<u32> {
    dm.vlan_members(vlan).map(|m| m.port).collect()
}

#[test]
fn test_cold_start_has_no_state() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let dm = start(&config, BootMode::Cold);

    for tag in RecordTag::ALL {
        assert_eq!(dm.live_count_by_tag(tag), 0, "{}", tag);
    }
    assert_eq!(dm.global().counter(GlobalField::VrCount).unwrap(), 0);
    assert_eq!(dm.metrics().tables_loaded, 0);
    assert!(dm.metrics().tables_initialized > 0);
}

#[test]
fn test_full_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);

    // Slot 0 holds a legitimately-zero key.
    assert_eq!(dm.reserve::<VirtualRouterEntry>(0, 7, 0).unwrap(), 0);
    let mut vr = dm.get::<VirtualRouterEntry>(0).unwrap().clone();
    vr.src_mac = [0, 0xaa, 0xbb, 0xcc, 0xdd, 0xee];
    vr.v4_enabled = true;
    dm.set(0, vr.clone()).unwrap();

    let acl = dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    dm.set(
        acl,
        AclEntry {
            valid: true,
            table_id: 2,
            priority: 100,
            redirect_port: 7,
            packet_count: 12345,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(dm.reserve::<TunnelEntry>(0, 7, 0).unwrap(), 1);

    dm.set_queue(
        3,
        2,
        QueueEntry {
            valid: true,
            queue_type: QueueType::Unicast,
            scheduler_id: 4,
            ..Default::default()
        },
    )
    .unwrap();

    dm.reserve::<VlanEntry>(100, 100, 100).unwrap();
    for port in [4, 8, 12] {
        dm.add_vlan_member(
            100,
            VlanMember {
                port,
                tagging: TaggingMode::Tagged,
            },
        )
        .unwrap();
    }

    let route = dm.reserve::<RouteEntry>(0, 31, 0).unwrap();
    assert_eq!(route, 0);
    for nh_id in [11, 12, 13] {
        dm.add_route_next_hop(
            route,
            RouteNextHop {
                nh_id,
                rif_id: 2,
                weight: 1,
                ..Default::default()
            },
        )
        .unwrap();
    }

    let group = dm.reserve::<L2mcGroupEntry>(0, 7, 0).unwrap();
    let mut entry = dm.get::<L2mcGroupEntry>(group).unwrap().clone();
    entry.mac = [0x01, 0x00, 0x5e, 0x00, 0x00, 0x01];
    entry.vlan = 100;
    dm.set(group, entry).unwrap();
    dm.add_l2mc_member(group, L2mcMember { port: 4 }).unwrap();
    dm.add_l2mc_member(group, L2mcMember { port: 8 }).unwrap();

    dm.add_policer_action(PolicerAction {
        policer_id: 9,
        cir: 1_000_000,
        ..Default::default()
    })
    .unwrap();
    dm.acquire_policer_action(9).unwrap();

    let key = NeighborKey::v4([192, 168, 1, 1], 2);
    dm.add_neighbor(NeighborEntry {
        key,
        mac: [2, 0, 0, 0, 0, 9],
        ..Default::default()
    })
    .unwrap();

    dm.global_mut()
        .set(GlobalField::SystemMac, GlobalValue::Mac([2, 0, 0, 0, 0, 1]))
        .unwrap();

    stop(dm, ShutdownMode::Flush);
    assert!(config.snapshot_path().exists());

    let mut dm = start(&config, BootMode::Warm);
    assert_eq!(dm.metrics().count_mismatches, 0);

    assert_eq!(dm.get::<VirtualRouterEntry>(0).unwrap(), &vr);
    assert_eq!(dm.get::<AclEntry>(acl).unwrap().packet_count, 12345);
    assert!(dm.array::<TunnelEntry>().is_live(1));
    assert!(!dm.array::<TunnelEntry>().is_live(0));
    assert_eq!(dm.get_queue(3, 2).unwrap().scheduler_id, 4);

    assert_eq!(vlan_ports(&dm, 100), vec![4, 8, 12]);
    assert_eq!(dm.get::<VlanEntry>(100).unwrap().member_count, 3);

    let hops: Vec<(u32, u32)> = dm
        .route_next_hops(route)
        .map(|n| (n.nh_id, n.route_slot))
        .collect();
    assert_eq!(hops, vec![(11, 0), (12, 0), (13, 0)]);
    assert!(dm.get::<RouteEntry>(route).unwrap().nh_head.is_some());

    let ports: Vec<u32> = dm.l2mc_members(group).map(|m| m.port).collect();
    assert_eq!(ports, vec![4, 8]);

    assert_eq!(dm.find_policer_action(9).unwrap().ref_count, 1);
    assert!(matches!(
        dm.remove_policer_action(9),
        Err(DmError::ObjectInUse { .. })
    ));
    assert_eq!(dm.find_neighbor(key).unwrap().mac, [2, 0, 0, 0, 0, 9]);

    let global = dm.global();
    assert_eq!(global.system_mac(), [2, 0, 0, 0, 0, 1]);
    assert_eq!(global.counter(GlobalField::VrCount).unwrap(), 1);
    assert_eq!(global.counter(GlobalField::QueueCount).unwrap(), 1);
    assert_eq!(global.counter(GlobalField::VlanCount).unwrap(), 1);
    assert_eq!(global.counter(GlobalField::NeighborCount).unwrap(), 1);
    stop(dm, ShutdownMode::Flush);
}

#[test]
fn test_second_warm_restart_is_stable() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    dm.reserve::<VlanEntry>(10, 10, 10).unwrap();
    dm.add_vlan_member(10, VlanMember { port: 1, ..Default::default() })
        .unwrap();
    stop(dm, ShutdownMode::Flush);

    let mut dm = start(&config, BootMode::Warm);
    dm.add_vlan_member(10, VlanMember { port: 2, ..Default::default() })
        .unwrap();
    stop(dm, ShutdownMode::Flush);

    let dm = start(&config, BootMode::Warm);
    assert_eq!(vlan_ports(&dm, 10), vec![1, 2]);
    assert_eq!(dm.get::<VlanEntry>(10).unwrap().member_count, 2);
}

#[test]
fn test_discard_keeps_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    stop(dm, ShutdownMode::Flush);

    let mut dm = start(&config, BootMode::Warm);
    dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    assert_eq!(dm.live_count::<AclEntry>(), 3);
    stop(dm, ShutdownMode::Discard);

    let dm = start(&config, BootMode::Warm);
    assert_eq!(dm.live_count::<AclEntry>(), 1);
}

#[test]
fn test_released_records_do_not_come_back() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    dm.reserve::<VlanEntry>(20, 20, 20).unwrap();
    dm.add_vlan_member(20, VlanMember { port: 3, ..Default::default() })
        .unwrap();
    dm.reserve::<VlanEntry>(21, 21, 21).unwrap();
    stop(dm, ShutdownMode::Flush);

    let mut dm = start(&config, BootMode::Warm);
    assert!(dm.release::<VlanEntry>(20).unwrap());
    stop(dm, ShutdownMode::Flush);

    let snapshot = Snapshot::read_from_file(&config.snapshot_path()).unwrap();
    assert!(snapshot.table("vlan_members_20").is_none());

    let dm = start(&config, BootMode::Warm);
    assert!(!dm.array::<VlanEntry>().is_live(20));
    assert!(dm.array::<VlanEntry>().is_live(21));
    assert_eq!(vlan_ports(&dm, 20), Vec::<u32>::new());
    assert_eq!(dm.global().counter(GlobalField::VlanCount).unwrap(), 1);
}

#[test]
fn test_short_member_table_corrects_parent_count() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    dm.reserve::<VlanEntry>(30, 30, 30).unwrap();
    for port in [1, 2, 3] {
        dm.add_vlan_member(30, VlanMember { port, ..Default::default() })
            .unwrap();
    }
    stop(dm, ShutdownMode::Flush);

    let path = config.snapshot_path();
    let mut snapshot = Snapshot::read_from_file(&path).unwrap();
    let members = snapshot
        .tables
        .iter_mut()
        .find(|t| t.name == "vlan_members_30")
        .unwrap();
    members.rows.pop();
    snapshot.write_to_file(&path).unwrap();

    let dm = start(&config, BootMode::Warm);
    assert_eq!(vlan_ports(&dm, 30), vec![1, 2]);
    assert_eq!(dm.get::<VlanEntry>(30).unwrap().member_count, 2);
    assert_eq!(dm.metrics().count_mismatches, 1);
    assert_eq!(dm.metrics().anchors_corrected, 1);
}

#[test]
fn test_missing_rows_reconcile_global_counter() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    stop(dm, ShutdownMode::Flush);

    let path = config.snapshot_path();
    let mut snapshot = Snapshot::read_from_file(&path).unwrap();
    let acls = snapshot
        .tables
        .iter_mut()
        .find(|t| t.name == "dm_acl")
        .unwrap();
    assert_eq!(acls.rows.len(), 2);
    acls.rows.truncate(1);
    snapshot.write_to_file(&path).unwrap();

    let dm = start(&config, BootMode::Warm);
    assert_eq!(dm.live_count::<AclEntry>(), 1);
    assert_eq!(dm.global().counter(GlobalField::AclEntryCount).unwrap(), 1);
    assert_eq!(dm.metrics().count_mismatches, 1);
}

#[test]
fn test_out_of_range_row_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    dm.reserve::<AclEntry>(5, 5, 0).unwrap();
    stop(dm, ShutdownMode::Flush);

    // Shrink the array so the persisted slot no longer fits.
    let mut smaller = config.clone();
    smaller.capacity.acl_entries = 4;
    let dm = start(&smaller, BootMode::Warm);
    assert_eq!(dm.live_count::<AclEntry>(), 0);
    assert_eq!(dm.metrics().rows_rejected, 1);
    assert_eq!(dm.global().counter(GlobalField::AclEntryCount).unwrap(), 0);
}

#[test]
fn test_counter_scenario_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    for _ in 0..5 {
        dm.reserve::<VirtualRouterEntry>(0, 7, 0).unwrap();
    }
    dm.release::<VirtualRouterEntry>(1).unwrap();
    dm.release::<VirtualRouterEntry>(2).unwrap();
    assert_eq!(dm.global().counter(GlobalField::VrCount).unwrap(), 3);
    stop(dm, ShutdownMode::Flush);

    let dm = start(&config, BootMode::Warm);
    assert_eq!(dm.global().counter(GlobalField::VrCount).unwrap(), 3);
    let live: Vec<usize> = dm
        .array::<VirtualRouterEntry>()
        .iter_live()
        .map(|(i, _)| i)
        .collect();
    assert_eq!(live, vec![0, 3, 4]);
}

#[test]
fn test_malformed_snapshot_row_is_skipped() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    dm.reserve::<AclEntry>(0, 63, 0).unwrap();
    stop(dm, ShutdownMode::Flush);

    let path = config.snapshot_path();
    let mut snapshot = Snapshot::read_from_file(&path).unwrap();
    let acls = snapshot
        .tables
        .iter_mut()
        .find(|t| t.name == "dm_acl")
        .unwrap();
    acls.rows[0] = vec![1];
    snapshot.write_to_file(&path).unwrap();

    let dm = start(&config, BootMode::Warm);
    assert_eq!(dm.live_count::<AclEntry>(), 1);
    assert_eq!(dm.global().counter(GlobalField::AclEntryCount).unwrap(), 1);
    assert_eq!(dm.metrics().count_mismatches, 1);
}

#[test]
fn test_route_row_survives_matching_reload() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut dm = start(&config, BootMode::Cold);
    let route = dm.reserve::<RouteEntry>(4, 31, 0).unwrap();
    dm.add_route_next_hop(route, RouteNextHop { nh_id: 1, ..Default::default() })
        .unwrap();
    stop(dm, ShutdownMode::Flush);

    let dm = start(&config, BootMode::Warm);
    let entry = dm.get::<RouteEntry>(route).unwrap();
    assert_eq!(entry.nh_count, 1);
    assert!(entry.nh_head.is_some());
    assert_eq!(dm.metrics().anchors_corrected, 0);
    stop(dm, ShutdownMode::Flush);

    let dm = start(&config, BootMode::Warm);
    let hops: Vec<u32> = dm.route_next_hops(route).map(|n| n.nh_id).collect();
    assert_eq!(hops, vec![1]);
}
