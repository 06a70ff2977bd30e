//! Data manager configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial file (or
//! none at all) yields a usable configuration.
//! Default location: /etc/sonic/datamgr.toml

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DmError, DmResult};
use crate::schema::DEFAULT_SCHEMA_BUFFER_SIZE;

/// Largest VLAN capacity: one slot per 12-bit VLAN id.
pub const MAX_VLAN_CAPACITY: usize = 4096;

/// Smallest accepted schema buffer.
pub const MIN_SCHEMA_BUFFER_SIZE: usize = 256;

/// Warm-boot artifact locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding the snapshot, SDK cache and archive
    #[serde(default = "default_snapshot_directory")]
    pub directory: PathBuf,

    /// Backend snapshot file name
    #[serde(default = "default_snapshot_file")]
    pub file_name: String,

    /// Hardware SDK state cache file name
    #[serde(default = "default_sdk_cache_file")]
    pub sdk_cache_file: String,

    /// Warm-boot archive file name
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
}

/// Record store capacities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(default = "default_virtual_routers")]
    pub virtual_routers: usize,

    #[serde(default = "default_router_interfaces")]
    pub router_interfaces: usize,

    #[serde(default = "default_ports")]
    pub ports: usize,

    #[serde(default = "default_queues_per_port")]
    pub queues_per_port: usize,

    #[serde(default = "default_acl_entries")]
    pub acl_entries: usize,

    #[serde(default = "default_tunnels")]
    pub tunnels: usize,

    /// VLAN slots, indexed by VLAN id
    #[serde(default = "default_vlans")]
    pub vlans: usize,

    #[serde(default = "default_routes")]
    pub routes: usize,

    #[serde(default = "default_l2mc_groups")]
    pub l2mc_groups: usize,
}

/// Schema generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Upper bound on a generated schema blob in bytes
    #[serde(default = "default_schema_buffer_size")]
    pub buffer_size: usize,
}

/// Complete data manager configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataManagerConfig {
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub capacity: CapacityConfig,

    #[serde(default)]
    pub schema: SchemaConfig,
}

// Default functions
fn default_snapshot_directory() -> PathBuf {
    PathBuf::from("/host/warmboot")
}

fn default_snapshot_file() -> String {
    "datamgr_snapshot.json".to_string()
}

fn default_sdk_cache_file() -> String {
    "sdk_state_cache.bin".to_string()
}

fn default_archive_name() -> String {
    "warmboot.sdma".to_string()
}

fn default_virtual_routers() -> usize {
    64
}

fn default_router_interfaces() -> usize {
    1024
}

fn default_ports() -> usize {
    256
}

fn default_queues_per_port() -> usize {
    16
}

fn default_acl_entries() -> usize {
    4096
}

fn default_tunnels() -> usize {
    256
}

fn default_vlans() -> usize {
    MAX_VLAN_CAPACITY
}

fn default_routes() -> usize {
    16384
}

fn default_l2mc_groups() -> usize {
    512
}

fn default_schema_buffer_size() -> usize {
    DEFAULT_SCHEMA_BUFFER_SIZE
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: default_snapshot_directory(),
            file_name: default_snapshot_file(),
            sdk_cache_file: default_sdk_cache_file(),
            archive_name: default_archive_name(),
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            virtual_routers: default_virtual_routers(),
            router_interfaces: default_router_interfaces(),
            ports: default_ports(),
            queues_per_port: default_queues_per_port(),
            acl_entries: default_acl_entries(),
            tunnels: default_tunnels(),
            vlans: default_vlans(),
            routes: default_routes(),
            l2mc_groups: default_l2mc_groups(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_schema_buffer_size(),
        }
    }
}

impl DataManagerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> DmResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                DmError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(DmError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> DmResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DmError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Path of the backend snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot.directory.join(&self.snapshot.file_name)
    }

    /// Path of the hardware SDK state cache
    pub fn sdk_cache_path(&self) -> PathBuf {
        self.snapshot.directory.join(&self.snapshot.sdk_cache_file)
    }

    /// Path of the warm-boot archive
    pub fn archive_path(&self) -> PathBuf {
        self.snapshot.directory.join(&self.snapshot.archive_name)
    }

    /// Validate configuration
    pub fn validate(&self) -> DmResult<()> {
        let c = &self.capacity;
        let capacities = [
            ("virtual_routers", c.virtual_routers),
            ("router_interfaces", c.router_interfaces),
            ("ports", c.ports),
            ("queues_per_port", c.queues_per_port),
            ("acl_entries", c.acl_entries),
            ("tunnels", c.tunnels),
            ("vlans", c.vlans),
            ("routes", c.routes),
            ("l2mc_groups", c.l2mc_groups),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(DmError::Config(format!("capacity.{} must be > 0", name)));
            }
        }

        if c.vlans > MAX_VLAN_CAPACITY {
            return Err(DmError::Config(format!(
                "capacity.vlans must be <= {}",
                MAX_VLAN_CAPACITY
            )));
        }

        // Slot 0 of the tunnel table is never handed out.
        if c.tunnels < 2 {
            return Err(DmError::Config("capacity.tunnels must be >= 2".to_string()));
        }

        if self.schema.buffer_size < MIN_SCHEMA_BUFFER_SIZE {
            return Err(DmError::Config(format!(
                "schema.buffer_size must be >= {}",
                MIN_SCHEMA_BUFFER_SIZE
            )));
        }

        for (name, value) in [
            ("snapshot.file_name", &self.snapshot.file_name),
            ("snapshot.sdk_cache_file", &self.snapshot.sdk_cache_file),
            ("snapshot.archive_name", &self.snapshot.archive_name),
        ] {
            if value.is_empty() || value.contains('/') {
                return Err(DmError::Config(format!(
                    "{} must be a plain file name",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DataManagerConfig::default();
        assert_eq!(config.capacity.vlans, 4096);
        assert_eq!(config.schema.buffer_size, DEFAULT_SCHEMA_BUFFER_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_helpers() {
        let mut config = DataManagerConfig::default();
        config.snapshot.directory = PathBuf::from("/tmp/wb");
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/tmp/wb/datamgr_snapshot.json")
        );
        assert_eq!(
            config.archive_path(),
            PathBuf::from("/tmp/wb/warmboot.sdma")
        );
        assert_eq!(
            config.sdk_cache_path(),
            PathBuf::from("/tmp/wb/sdk_state_cache.bin")
        );
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = DataManagerConfig::default();
        config.capacity.routes = 0;
        assert!(matches!(config.validate(), Err(DmError::Config(_))));
    }

    #[test]
    fn test_validate_vlan_limit() {
        let mut config = DataManagerConfig::default();
        config.capacity.vlans = 4097;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_schema_buffer() {
        let mut config = DataManagerConfig::default();
        config.schema.buffer_size = 128;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_file_names() {
        let mut config = DataManagerConfig::default();
        config.snapshot.archive_name = "../escape".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[snapshot]
directory = "/var/warmboot"

[capacity]
routes = 128
vlans = 100
"#;
        let config: DataManagerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.snapshot.directory, PathBuf::from("/var/warmboot"));
        assert_eq!(config.capacity.routes, 128);
        assert_eq!(config.capacity.vlans, 100);
        // Unspecified values should use defaults
        assert_eq!(config.capacity.tunnels, 256);
        assert_eq!(config.snapshot.file_name, "datamgr_snapshot.json");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datamgr.toml");
        let mut config = DataManagerConfig::default();
        config.capacity.acl_entries = 77;
        config.save(&path).unwrap();

        let loaded = DataManagerConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = DataManagerConfig::load_or_default("/nonexistent/datamgr.toml").unwrap();
        assert_eq!(config, DataManagerConfig::default());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datamgr.toml");
        fs::write(&path, "[capacity\nroutes = ").unwrap();
        assert!(matches!(
            DataManagerConfig::load_or_default(&path),
            Err(DmError::Config(_))
        ));
    }
}
