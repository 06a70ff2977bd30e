//! Warm reboot through the archive
//!
//! Flush, pack the snapshot together with the SDK state cache, wipe the
//! snapshot directory, unpack, and warm start from the restored files.

use pretty_assertions::assert_eq;
use sonic_datamgr::{
    BootMode, DataManager, DataManagerConfig, GlobalField, MemoryBackend, ShutdownMode,
    VlanEntry, VlanMember, WarmArchive,
};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_warm_reboot_through_archive() {
    let state_dir = TempDir::new().unwrap();
    let archive_dir = TempDir::new().unwrap();

    let mut config = DataManagerConfig::default();
    config.snapshot.directory = state_dir.path().to_path_buf();
    config.capacity.vlans = 64;

    {
        let backend = MemoryBackend::open(config.snapshot_path()).unwrap();
        let mut dm = DataManager::start(config.clone(), backend, BootMode::Cold).unwrap();
        dm.reserve::<VlanEntry>(42, 42, 42).unwrap();
        dm.add_vlan_member(42, VlanMember { port: 5, ..Default::default() })
            .unwrap();
        let (_, report) = dm.shutdown(ShutdownMode::Flush);
        assert!(report.is_clean());
    }
    fs::write(config.sdk_cache_path(), b"sdk-cache").unwrap();

    let archive = WarmArchive::new(archive_dir.path().join(&config.snapshot.archive_name));
    let packed = archive
        .pack(&[
            (config.snapshot.sdk_cache_file.as_str(), config.sdk_cache_path()),
            (config.snapshot.file_name.as_str(), config.snapshot_path()),
        ])
        .unwrap();
    assert_eq!(packed, 2);

    fs::remove_file(config.snapshot_path()).unwrap();
    fs::remove_file(config.sdk_cache_path()).unwrap();

    let names = archive.unpack(&config.snapshot.directory).unwrap();
    assert_eq!(
        names,
        vec![
            config.snapshot.sdk_cache_file.clone(),
            config.snapshot.file_name.clone()
        ]
    );
    assert_eq!(fs::read(config.sdk_cache_path()).unwrap(), b"sdk-cache".to_vec());

    let backend = MemoryBackend::open(config.snapshot_path()).unwrap();
    let dm = DataManager::start(config.clone(), backend, BootMode::Warm).unwrap();
    let ports: Vec<u32> = dm.vlan_members(42).map(|m| m.port).collect();
    assert_eq!(ports, vec![5]);
    assert_eq!(dm.global().counter(GlobalField::VlanCount).unwrap(), 1);
}

#[test]
fn test_unpack_missing_archive_fails() {
    let dir = TempDir::new().unwrap();
    let archive = WarmArchive::new(dir.path().join("absent.sdma"));
    assert!(archive.unpack(dir.path()).is_err());
}
