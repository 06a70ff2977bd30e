//! The data manager context.
//!
//! [`DataManager`] owns every record store, the global record, the warm
//! restart orchestrator and the persistence backend. It is created once at
//! process start with the boot mode and consumed at shutdown with the
//! shutdown mode. All mutation goes through `&mut self`; there is exactly
//! one writer.
//!
//! Startup order:
//! 1. the global record, whose counters give the expected row counts
//! 2. every indexed array
//! 3. the global lists (policer actions, neighbors)
//! 4. the anchored lists of every live parent
//!
//! Global counters are reconciled against the stores after loading and
//! again before the global record is flushed.

use log::{debug, error, info, warn};
use std::collections::HashSet;

use crate::backend::PersistenceBackend;
use crate::catalog::{
    AclEntry, L2mcGroupEntry, L2mcMember, NeighborEntry, NeighborKey, PolicerAction,
    QueueEntry, RecordTag, RouteEntry, RouteNextHop, RouterInterfaceEntry, StoreKind,
    TunnelEntry, VirtualRouterEntry, VlanEntry, VlanMember,
};
use crate::config::DataManagerConfig;
use crate::error::{DmError, DmResult};
use crate::global::{Bump, GlobalField, GlobalRecord, GlobalValue, GLOBAL_VERSION};
use crate::indexed::{IndexedArray, IndexedArray2};
use crate::list::{AnchorKey, AnchoredLists, ListLinks, MacVlanKey, NodeId, RecordList};
use crate::record::{HasRefCount, IndexedRecord, Record};
use crate::schema::RowLayout;
use crate::warm_restart::{
    BootMode, LifecycleState, ShutdownMode, WarmRestartMetrics, WarmRestartOrchestrator,
};

/// The one-dimensional arrays, one per record type.
#[derive(Debug)]
pub struct ArrayStores {
    vrs: IndexedArray<VirtualRouterEntry>,
    rifs: IndexedArray<RouterInterfaceEntry>,
    acls: IndexedArray<AclEntry>,
    tunnels: IndexedArray<TunnelEntry>,
    vlans: IndexedArray<VlanEntry>,
    routes: IndexedArray<RouteEntry>,
    l2mc_groups: IndexedArray<L2mcGroupEntry>,
}

impl ArrayStores {
    fn new(config: &DataManagerConfig) -> DmResult<Self> {
        let cap = &config.capacity;
        Ok(Self {
            vrs: IndexedArray::new(cap.virtual_routers)?,
            rifs: IndexedArray::new(cap.router_interfaces)?,
            acls: IndexedArray::new(cap.acl_entries)?,
            tunnels: IndexedArray::new(cap.tunnels)?,
            vlans: IndexedArray::new(cap.vlans)?,
            routes: IndexedArray::new(cap.routes)?,
            l2mc_groups: IndexedArray::new(cap.l2mc_groups)?,
        })
    }
}

/// A record type held in a one-dimensional array of the data manager.
pub trait ArrayMember: IndexedRecord {
    const TAG: RecordTag;

    /// Lowest slot reservations hand out.
    const FIRST_SLOT: usize = 0;

    fn store(stores: &ArrayStores) -> &IndexedArray<Self>;

    fn store_mut(stores: &mut ArrayStores) -> &mut IndexedArray<Self>;

    /// Carries store-managed fields from the record being overwritten.
    fn carry_over(&mut self, _previous: &Self) -> DmResult<()> {
        Ok(())
    }

    /// Rejects a live value that collides with another live slot.
    fn check_unique(_stores: &ArrayStores, _index: usize, _value: &Self) -> DmResult<()> {
        Ok(())
    }
}

macro_rules! array_member {
    ($ty:ty, $tag:ident, $field:ident) => {
        array_member!($ty, $tag, $field, 0);
    };
    ($ty:ty, $tag:ident, $field:ident, $first:expr) => {
        impl ArrayMember for $ty {
            const TAG: RecordTag = RecordTag::$tag;
            const FIRST_SLOT: usize = $first;

            fn store(stores: &ArrayStores) -> &IndexedArray<Self> {
                &stores.$field
            }

            fn store_mut(stores: &mut ArrayStores) -> &mut IndexedArray<Self> {
                &mut stores.$field
            }
        }
    };
}

array_member!(VirtualRouterEntry, VirtualRouter, vrs);
array_member!(RouterInterfaceEntry, RouterInterface, rifs);
array_member!(AclEntry, AclEntry, acls);
array_member!(TunnelEntry, Tunnel, tunnels, 1);

impl ArrayMember for VlanEntry {
    const TAG: RecordTag = RecordTag::Vlan;

    fn store(stores: &ArrayStores) -> &IndexedArray<Self> {
        &stores.vlans
    }

    fn store_mut(stores: &mut ArrayStores) -> &mut IndexedArray<Self> {
        &mut stores.vlans
    }

    fn carry_over(&mut self, previous: &Self) -> DmResult<()> {
        self.member_count = previous.member_count;
        Ok(())
    }
}

impl ArrayMember for RouteEntry {
    const TAG: RecordTag = RecordTag::Route;

    fn store(stores: &ArrayStores) -> &IndexedArray<Self> {
        &stores.routes
    }

    fn store_mut(stores: &mut ArrayStores) -> &mut IndexedArray<Self> {
        &mut stores.routes
    }

    fn carry_over(&mut self, previous: &Self) -> DmResult<()> {
        self.nh_count = previous.nh_count;
        self.nh_head = previous.nh_head;
        Ok(())
    }
}

impl ArrayMember for L2mcGroupEntry {
    const TAG: RecordTag = RecordTag::L2mcGroup;

    fn store(stores: &ArrayStores) -> &IndexedArray<Self> {
        &stores.l2mc_groups
    }

    fn store_mut(stores: &mut ArrayStores) -> &mut IndexedArray<Self> {
        &mut stores.l2mc_groups
    }

    /// The MAC+VLAN identity names the member list and cannot change while
    /// members exist.
    fn carry_over(&mut self, previous: &Self) -> DmResult<()> {
        if previous.member_count > 0 && self.mac_vlan() != previous.mac_vlan() {
            return Err(DmError::invalid_parameter(format!(
                "l2mc group {} has {} members, identity cannot change",
                previous.mac_vlan(),
                previous.member_count
            )));
        }
        self.member_count = previous.member_count;
        Ok(())
    }

    /// A MAC+VLAN names one member list, so at most one live group owns it.
    fn check_unique(stores: &ArrayStores, index: usize, value: &Self) -> DmResult<()> {
        if !value.has_identity() {
            return Ok(());
        }
        let key = value.mac_vlan();
        match stores
            .l2mc_groups
            .iter_live()
            .find(|(i, g)| *i != index && g.mac_vlan() == key)
        {
            Some((owner, _)) => Err(DmError::invalid_parameter(format!(
                "l2mc group {} is already owned by slot {}",
                key, owner
            ))),
            None => Ok(()),
        }
    }
}

/// Expands `$body` once per one-dimensional array tag with `$t` bound to
/// the record type.
macro_rules! for_array_tag {
    ($tag:expr, $t:ident => $body:expr, _ => $fallback:expr) => {
        match $tag {
            RecordTag::VirtualRouter => {
                type $t = VirtualRouterEntry;
                $body
            }
            RecordTag::RouterInterface => {
                type $t = RouterInterfaceEntry;
                $body
            }
            RecordTag::AclEntry => {
                type $t = AclEntry;
                $body
            }
            RecordTag::Tunnel => {
                type $t = TunnelEntry;
                $body
            }
            RecordTag::Vlan => {
                type $t = VlanEntry;
                $body
            }
            RecordTag::Route => {
                type $t = RouteEntry;
                $body
            }
            RecordTag::L2mcGroup => {
                type $t = L2mcGroupEntry;
                $body
            }
            _ => $fallback,
        }
    };
}

fn not_an_array(tag: RecordTag) -> DmError {
    DmError::invalid_parameter(format!(
        "{} is stored as {:?}, not a one-dimensional array",
        tag,
        tag.store()
    ))
}

fn anchor_id(index: usize) -> DmResult<AnchorKey> {
    u32::try_from(index)
        .map(AnchorKey::Id)
        .map_err(|_| DmError::invalid_parameter(format!("anchor slot {} out of range", index)))
}

fn live_parent<T: IndexedRecord>(array: &mut IndexedArray<T>, index: usize) -> DmResult<&mut T> {
    if !array.is_live(index) {
        return Err(DmError::not_found(format!("{} slot {}", T::TABLE, index)));
    }
    Ok(array.get_mut(index))
}

fn already_present(what: &str, key: impl std::fmt::Debug) -> DmError {
    DmError::invalid_parameter(format!("{} {:?} already present", what, key))
}

/// Outcome of [`DataManager::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub mode: ShutdownMode,
    /// Rows written across all tables, including the global record
    pub rows_flushed: usize,
    /// Global counters that disagreed with the stores and were corrected
    pub counters_reconciled: usize,
    pub metrics: WarmRestartMetrics,
}

impl ShutdownReport {
    /// True when every table flushed without error.
    pub fn is_clean(&self) -> bool {
        self.metrics.flush_failures == 0
    }
}

/// Owner of all persisted switch state.
#[derive(Debug)]
pub struct DataManager<B: PersistenceBackend> {
    config: DataManagerConfig,
    backend: B,
    orch: WarmRestartOrchestrator,
    global: GlobalRecord,
    global_layout: RowLayout,
    stores: ArrayStores,
    queues: IndexedArray2<QueueEntry>,
    vlan_members: AnchoredLists<VlanMember>,
    route_nhs: AnchoredLists<RouteNextHop>,
    l2mc_members: AnchoredLists<L2mcMember>,
    policers: RecordList<PolicerAction>,
    neighbors: RecordList<NeighborEntry>,
}

impl<B: PersistenceBackend> DataManager<B> {
    /// Allocates every store and, on a warm boot, reloads it from `backend`.
    ///
    /// Allocation, schema and table-creation failures abort startup.
    pub fn start(config: DataManagerConfig, mut backend: B, boot_mode: BootMode) -> DmResult<Self> {
        config.validate()?;
        info!("Starting data manager ({} boot)", boot_mode);

        let mut orch = WarmRestartOrchestrator::new(boot_mode, config.schema.buffer_size);
        let global_layout = GlobalRecord::row_layout()?;
        let global = match orch.load_single(&mut backend, &global_layout, GLOBAL_VERSION)? {
            Some(row) => GlobalRecord::decode(&global_layout, &row)?,
            None => {
                let mut global = GlobalRecord::new();
                let ports = u32::try_from(config.capacity.ports).unwrap_or(u32::MAX);
                global.set(GlobalField::MaxPorts, GlobalValue::Uint(ports))?;
                global
            }
        };

        let stores = ArrayStores::new(&config)?;
        let queues = IndexedArray2::new(config.capacity.ports, config.capacity.queues_per_port)?;

        let mut dm = Self {
            config,
            backend,
            orch,
            global,
            global_layout,
            stores,
            queues,
            vlan_members: AnchoredLists::new(ListLinks::SinglyWithTail),
            route_nhs: AnchoredLists::new(ListLinks::Doubly),
            l2mc_members: AnchoredLists::new(ListLinks::SinglyWithTail),
            policers: RecordList::new(PolicerAction::TABLE, ListLinks::Doubly),
            neighbors: RecordList::new(NeighborEntry::TABLE, ListLinks::SinglyWithTail),
        };

        dm.open_arrays()?;
        dm.load_global_lists()?;
        dm.load_anchored_lists()?;
        let corrected = dm.reconcile_counters();

        let metrics = dm.orch.metrics();
        info!(
            "Data manager started ({} boot): {} tables loaded, {} rows, {} counters reconciled",
            boot_mode, metrics.tables_loaded, metrics.rows_loaded, corrected
        );
        Ok(dm)
    }

    fn expected_count(&self, tag: RecordTag) -> DmResult<usize> {
        match tag.count_field() {
            Some(field) => Ok(self.global.counter(field)? as usize),
            None => Ok(0),
        }
    }

    fn open_array<T: ArrayMember>(&mut self) -> DmResult<usize> {
        let expected = self.expected_count(T::TAG)?;
        T::store_mut(&mut self.stores).open(&mut self.orch, &mut self.backend, expected)
    }

    fn open_arrays(&mut self) -> DmResult<()> {
        self.open_array::<VirtualRouterEntry>()?;
        self.open_array::<RouterInterfaceEntry>()?;
        let expected = self.expected_count(RecordTag::Queue)?;
        self.queues
            .open(&mut self.orch, &mut self.backend, expected)?;
        self.open_array::<AclEntry>()?;
        self.open_array::<TunnelEntry>()?;
        self.open_array::<VlanEntry>()?;
        self.open_array::<RouteEntry>()?;
        self.open_array::<L2mcGroupEntry>()?;
        Ok(())
    }

    fn load_global_lists(&mut self) -> DmResult<()> {
        let hint = self.expected_count(RecordTag::PolicerAction)?;
        self.policers
            .warm_load(&mut self.orch, &mut self.backend, hint)?;
        let hint = self.expected_count(RecordTag::Neighbor)?;
        self.neighbors
            .warm_load(&mut self.orch, &mut self.backend, hint)?;
        Ok(())
    }

    fn load_anchored_lists(&mut self) -> DmResult<()> {
        let Self {
            orch,
            backend,
            stores,
            vlan_members,
            route_nhs,
            l2mc_members,
            ..
        } = self;

        let live: Vec<usize> = stores.vlans.iter_live().map(|(i, _)| i).collect();
        for index in live {
            let anchor = anchor_id(index)?;
            vlan_members.warm_load(orch, backend, anchor, stores.vlans.get_mut(index))?;
        }

        let live: Vec<usize> = stores.routes.iter_live().map(|(i, _)| i).collect();
        for index in live {
            let anchor = anchor_id(index)?;
            route_nhs.warm_load(orch, backend, anchor, stores.routes.get_mut(index))?;
            // Head and count were patched in place.
            stores.routes.persist_slot(orch, backend, index)?;
        }

        let live: Vec<(usize, MacVlanKey, bool)> = stores
            .l2mc_groups
            .iter_live()
            .map(|(i, g)| (i, g.mac_vlan(), g.has_identity()))
            .collect();
        let mut owned = HashSet::new();
        for (index, key, has_identity) in live {
            let group = stores.l2mc_groups.get_mut(index);
            if !has_identity || !owned.insert(key) {
                if group.member_count > 0 {
                    error!(
                        "{} slot {}: {} members under MAC+VLAN {} it does not own, dropping",
                        L2mcGroupEntry::TABLE,
                        index,
                        group.member_count,
                        key
                    );
                    group.member_count = 0;
                    orch.metrics_mut().record_anchor_corrected();
                }
                continue;
            }
            l2mc_members.warm_load(orch, backend, AnchorKey::MacVlan(key), group)?;
        }
        Ok(())
    }

    /// Forces every global counter to the live count of its store.
    ///
    /// Returns how many counters were corrected.
    fn reconcile_counters(&mut self) -> usize {
        let mut corrected = 0;
        for tag in RecordTag::ALL {
            let Some(field) = tag.count_field() else {
                continue;
            };
            let live = u32::try_from(self.live_count_by_tag(tag)).unwrap_or(u32::MAX);
            let recorded = match self.global.get(field) {
                GlobalValue::Uint(v) => v,
                _ => continue,
            };
            if recorded != live {
                warn!(
                    "{} is {} but {} {} records are live, correcting",
                    field, recorded, live, tag
                );
                // Counter fields always accept a Uint.
                if self.global.set(field, GlobalValue::Uint(live)).is_ok() {
                    corrected += 1;
                }
            }
        }
        corrected
    }

    fn bump(&mut self, tag: RecordTag, bump: Bump) {
        if let Some(field) = tag.count_field() {
            if let Err(e) = self.global.bump(field, bump) {
                warn!("{}: counter update failed: {}", tag, e);
            }
        }
    }

    pub fn config(&self) -> &DataManagerConfig {
        &self.config
    }

    pub fn boot_mode(&self) -> BootMode {
        self.orch.boot_mode()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn metrics(&self) -> &WarmRestartMetrics {
        self.orch.metrics()
    }

    /// Lifecycle state of the table backing a record type.
    ///
    /// Anchored lists have one table per parent and report `None`.
    pub fn state(&self, tag: RecordTag) -> Option<LifecycleState> {
        self.orch.state(tag.table())
    }

    pub fn global(&self) -> &GlobalRecord {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut GlobalRecord {
        &mut self.global
    }

    // ---- typed array access ----

    /// The whole array of a record type.
    pub fn array<T: ArrayMember>(&self) -> &IndexedArray<T> {
        T::store(&self.stores)
    }

    pub fn get<T: ArrayMember>(&self, index: usize) -> DmResult<&T> {
        T::store(&self.stores).try_get(index).ok_or_else(|| {
            DmError::invalid_parameter(format!("{} slot {} out of range", T::TABLE, index))
        })
    }

    /// Overwrites a slot. Store-managed fields (list counts and heads) are
    /// kept from the previous record.
    ///
    /// Writing a vacant record frees the slot the way [`release`] does,
    /// including the list anchored on it.
    ///
    /// [`release`]: DataManager::release
    pub fn set<T: ArrayMember>(&mut self, index: usize, mut value: T) -> DmResult<()> {
        if index < T::FIRST_SLOT {
            return Err(DmError::invalid_parameter(format!(
                "{} slot {} is reserved",
                T::TABLE,
                index
            )));
        }
        let previous = T::store(&self.stores).try_get(index).ok_or_else(|| {
            DmError::invalid_parameter(format!("{} slot {} out of range", T::TABLE, index))
        })?;
        let was_live = T::VACANCY.is_live(previous);
        let is_live = T::VACANCY.is_live(&value);
        if is_live {
            value.carry_over(previous)?;
            T::check_unique(&self.stores, index, &value)?;
        } else {
            value.on_release();
        }
        let orphaned = if was_live && !is_live {
            self.anchor_of(T::TAG, index)?
        } else {
            None
        };
        T::store_mut(&mut self.stores).set(index, value);

        match (was_live, is_live) {
            (false, true) => self.bump(T::TAG, Bump::Increment),
            (true, false) => self.bump(T::TAG, Bump::Decrement),
            _ => {}
        }
        if let Some(anchor) = orphaned {
            self.drop_children(T::TAG, anchor);
        }
        Ok(())
    }

    /// Reserves the first free slot in `start..=end` and counts it.
    pub fn reserve<T: ArrayMember>(&mut self, start: usize, end: usize, value: i64) -> DmResult<usize> {
        let start = start.max(T::FIRST_SLOT);
        let index = T::store_mut(&mut self.stores).reserve(start, end, value)?;
        self.bump(T::TAG, Bump::Increment);
        Ok(index)
    }

    /// Frees a slot. Any list anchored on it is dropped with it.
    ///
    /// Returns whether the slot was live.
    pub fn release<T: ArrayMember>(&mut self, index: usize) -> DmResult<bool> {
        let anchor = T::store(&self.stores)
            .try_get(index)
            .map(|_| self.anchor_of(T::TAG, index))
            .transpose()?
            .flatten();
        let was_live = T::store_mut(&mut self.stores).release(index)?;
        if was_live {
            self.bump(T::TAG, Bump::Decrement);
            if let Some(anchor) = anchor {
                self.drop_children(T::TAG, anchor);
            }
        }
        Ok(was_live)
    }

    pub fn live_count<T: ArrayMember>(&self) -> usize {
        T::store(&self.stores).live_count()
    }

    fn anchor_of(&self, tag: RecordTag, index: usize) -> DmResult<Option<AnchorKey>> {
        match tag {
            RecordTag::Vlan | RecordTag::Route => anchor_id(index).map(Some),
            RecordTag::L2mcGroup => Ok(self
                .stores
                .l2mc_groups
                .try_get(index)
                .map(|g| AnchorKey::MacVlan(g.mac_vlan()))),
            _ => Ok(None),
        }
    }

    fn drop_children(&mut self, tag: RecordTag, anchor: AnchorKey) {
        let dropped = match tag {
            RecordTag::Vlan => self.vlan_members.drop_anchor(anchor),
            RecordTag::Route => self.route_nhs.drop_anchor(anchor),
            RecordTag::L2mcGroup => self.l2mc_members.drop_anchor(anchor),
            _ => 0,
        };
        if dropped > 0 {
            debug!("{} {}: dropped {} members with parent", tag, anchor, dropped);
        }
    }

    // ---- queues ----

    fn check_queue(&self, port: usize, queue: usize) -> DmResult<()> {
        let (ports, queues) = self.queues.dimensions();
        if port >= ports || queue >= queues {
            return Err(DmError::invalid_parameter(format!(
                "queue ({}, {}) outside ({}, {})",
                port, queue, ports, queues
            )));
        }
        Ok(())
    }

    pub fn queues(&self) -> &IndexedArray2<QueueEntry> {
        &self.queues
    }

    pub fn get_queue(&self, port: usize, queue: usize) -> DmResult<&QueueEntry> {
        self.check_queue(port, queue)?;
        Ok(self.queues.get2(port, queue))
    }

    pub fn set_queue(&mut self, port: usize, queue: usize, value: QueueEntry) -> DmResult<()> {
        self.check_queue(port, queue)?;
        let was_live = self.queues.is_live(port, queue);
        let is_live = value.valid;
        self.queues.set2(port, queue, value);
        match (was_live, is_live) {
            (false, true) => self.bump(RecordTag::Queue, Bump::Increment),
            (true, false) => self.bump(RecordTag::Queue, Bump::Decrement),
            _ => {}
        }
        Ok(())
    }

    /// Reserves the first free queue in `start..=end` of `port`.
    pub fn reserve_queue(&mut self, port: usize, start: usize, end: usize) -> DmResult<usize> {
        let queue = self.queues.reserve2(port, start, end, 0)?;
        self.bump(RecordTag::Queue, Bump::Increment);
        Ok(queue)
    }

    pub fn release_queue(&mut self, port: usize, queue: usize) -> DmResult<bool> {
        let was_live = self.queues.release2(port, queue)?;
        if was_live {
            self.bump(RecordTag::Queue, Bump::Decrement);
        }
        Ok(was_live)
    }

    // ---- tag-based access ----

    /// Reserves a slot of a one-dimensional array type by tag.
    pub fn reserve_by_tag(
        &mut self,
        tag: RecordTag,
        start: usize,
        end: usize,
        value: i64,
    ) -> DmResult<usize> {
        for_array_tag!(tag, T => self.reserve::<T>(start, end, value), _ => Err(not_an_array(tag)))
    }

    pub fn release_by_tag(&mut self, tag: RecordTag, index: usize) -> DmResult<bool> {
        for_array_tag!(tag, T => self.release::<T>(index), _ => Err(not_an_array(tag)))
    }

    pub fn is_live_by_tag(&self, tag: RecordTag, index: usize) -> DmResult<bool> {
        for_array_tag!(tag, T => Ok(self.array::<T>().is_live(index)), _ => Err(not_an_array(tag)))
    }

    /// Live records of any type: live slots for arrays, nodes for lists.
    pub fn live_count_by_tag(&self, tag: RecordTag) -> usize {
        match tag.store() {
            StoreKind::Array => {
                for_array_tag!(tag, T => self.live_count::<T>(), _ => 0)
            }
            StoreKind::Array2 => self.queues.live_count(),
            StoreKind::AnchoredList | StoreKind::GlobalList => match tag {
                RecordTag::VlanMember => self.vlan_members.total_len(),
                RecordTag::RouteNextHop => self.route_nhs.total_len(),
                RecordTag::L2mcMember => self.l2mc_members.total_len(),
                RecordTag::PolicerAction => self.policers.len(),
                RecordTag::Neighbor => self.neighbors.len(),
                _ => 0,
            },
        }
    }

    // ---- VLAN members ----

    /// Adds a member port to a live VLAN.
    pub fn add_vlan_member(&mut self, vlan_id: u16, member: VlanMember) -> DmResult<NodeId> {
        let index = usize::from(vlan_id);
        let anchor = anchor_id(index)?;
        if self.vlan_members.find(anchor, member.port).is_ok() {
            return Err(already_present("vlan member", member.port));
        }
        let parent = live_parent(&mut self.stores.vlans, index)?;
        Ok(self.vlan_members.append(anchor, parent, member))
    }

    pub fn find_vlan_member(&self, vlan_id: u16, port: u32) -> DmResult<&VlanMember> {
        let anchor = anchor_id(usize::from(vlan_id))?;
        let id = self.vlan_members.find(anchor, port)?;
        self.vlan_members
            .get(anchor, id)
            .ok_or_else(|| DmError::not_found(format!("vlan {} member {}", vlan_id, port)))
    }

    pub fn remove_vlan_member(&mut self, vlan_id: u16, port: u32) -> DmResult<VlanMember> {
        let index = usize::from(vlan_id);
        let anchor = anchor_id(index)?;
        let parent = live_parent(&mut self.stores.vlans, index)?;
        self.vlan_members.remove(anchor, parent, port)
    }

    /// Members of a VLAN in insertion order.
    pub fn vlan_members(&self, vlan_id: u16) -> impl Iterator<Item = &VlanMember> + '_ {
        self.vlan_members
            .list(AnchorKey::Id(u32::from(vlan_id)))
            .into_iter()
            .flat_map(|l| l.iter())
    }

    // ---- route next hops ----

    pub fn add_route_next_hop(&mut self, route: usize, nh: RouteNextHop) -> DmResult<NodeId> {
        let anchor = anchor_id(route)?;
        if self.route_nhs.find(anchor, nh.nh_id).is_ok() {
            return Err(already_present("route next hop", nh.nh_id));
        }
        let parent = live_parent(&mut self.stores.routes, route)?;
        Ok(self.route_nhs.append(anchor, parent, nh))
    }

    pub fn remove_route_next_hop(&mut self, route: usize, nh_id: u32) -> DmResult<RouteNextHop> {
        let anchor = anchor_id(route)?;
        let parent = live_parent(&mut self.stores.routes, route)?;
        self.route_nhs.remove(anchor, parent, nh_id)
    }

    /// Next hops of a route, starting at the route's `nh_head`.
    pub fn route_next_hops(&self, route: usize) -> impl Iterator<Item = &RouteNextHop> + '_ {
        let anchor = u32::try_from(route).ok().map(AnchorKey::Id);
        let head = self.stores.routes.try_get(route).and_then(|r| r.nh_head);
        std::iter::successors(head, move |id| {
            anchor.and_then(|a| self.route_nhs.next(a, Some(*id)))
        })
        .filter_map(move |id| anchor.and_then(|a| self.route_nhs.get(a, id)))
    }

    // ---- L2 multicast members ----

    fn l2mc_anchor(&self, group: usize) -> DmResult<AnchorKey> {
        if !self.stores.l2mc_groups.is_live(group) {
            return Err(DmError::not_found(format!(
                "{} slot {}",
                L2mcGroupEntry::TABLE,
                group
            )));
        }
        Ok(AnchorKey::MacVlan(self.stores.l2mc_groups.get(group).mac_vlan()))
    }

    /// Adds a member port to a live group. The group must have been given
    /// its MAC+VLAN first.
    pub fn add_l2mc_member(&mut self, group: usize, member: L2mcMember) -> DmResult<NodeId> {
        let anchor = self.l2mc_anchor(group)?;
        if !self.stores.l2mc_groups.get(group).has_identity() {
            return Err(DmError::invalid_parameter(format!(
                "{} slot {} has no MAC+VLAN",
                L2mcGroupEntry::TABLE,
                group
            )));
        }
        if self.l2mc_members.find(anchor, member.port).is_ok() {
            return Err(already_present("l2mc member", member.port));
        }
        let parent = self.stores.l2mc_groups.get_mut(group);
        Ok(self.l2mc_members.append(anchor, parent, member))
    }

    pub fn remove_l2mc_member(&mut self, group: usize, port: u32) -> DmResult<L2mcMember> {
        let anchor = self.l2mc_anchor(group)?;
        let parent = self.stores.l2mc_groups.get_mut(group);
        self.l2mc_members.remove(anchor, parent, port)
    }

    pub fn l2mc_members(&self, group: usize) -> impl Iterator<Item = &L2mcMember> + '_ {
        self.l2mc_anchor(group)
            .ok()
            .and_then(|anchor| self.l2mc_members.list(anchor))
            .into_iter()
            .flat_map(|l| l.iter())
    }

    // ---- policer actions ----

    pub fn add_policer_action(&mut self, policer: PolicerAction) -> DmResult<NodeId> {
        if self.policers.find(policer.policer_id).is_some() {
            return Err(already_present("policer", policer.policer_id));
        }
        let id = self.policers.append(policer);
        self.bump(RecordTag::PolicerAction, Bump::Increment);
        Ok(id)
    }

    fn policer_node(&self, policer_id: u32) -> DmResult<NodeId> {
        self.policers
            .find(policer_id)
            .ok_or_else(|| DmError::not_found(format!("policer {}", policer_id)))
    }

    pub fn find_policer_action(&self, policer_id: u32) -> DmResult<&PolicerAction> {
        let id = self.policer_node(policer_id)?;
        self.policers
            .get(id)
            .ok_or_else(|| DmError::not_found(format!("policer {}", policer_id)))
    }

    /// Takes a reference on a policer and returns the new count.
    pub fn acquire_policer_action(&mut self, policer_id: u32) -> DmResult<u32> {
        let id = self.policer_node(policer_id)?;
        self.policers
            .get_mut(id)
            .map(|p| p.increment_ref())
            .ok_or_else(|| DmError::not_found(format!("policer {}", policer_id)))
    }

    /// Drops a reference on a policer and returns the new count.
    ///
    /// Releasing an unreferenced policer leaves the count at zero.
    pub fn release_policer_action(&mut self, policer_id: u32) -> DmResult<u32> {
        let id = self.policer_node(policer_id)?;
        self.policers
            .get_mut(id)
            .map(|p| p.decrement_ref().unwrap_or(0))
            .ok_or_else(|| DmError::not_found(format!("policer {}", policer_id)))
    }

    /// Removes an unreferenced policer.
    pub fn remove_policer_action(&mut self, policer_id: u32) -> DmResult<PolicerAction> {
        let removed = self.policers.remove(policer_id)?;
        self.bump(RecordTag::PolicerAction, Bump::Decrement);
        Ok(removed)
    }

    pub fn first_policer_action(&self) -> Option<&PolicerAction> {
        self.policers.next(None).and_then(|id| self.policers.get(id))
    }

    /// The policer after `policer_id` in insertion order.
    pub fn next_policer_action(&self, policer_id: u32) -> DmResult<Option<&PolicerAction>> {
        let id = self.policer_node(policer_id)?;
        Ok(self
            .policers
            .next(Some(id))
            .and_then(|next| self.policers.get(next)))
    }

    // ---- neighbors ----

    pub fn add_neighbor(&mut self, neighbor: NeighborEntry) -> DmResult<NodeId> {
        if self.neighbors.find(neighbor.key).is_some() {
            return Err(already_present("neighbor", neighbor.key));
        }
        let id = self.neighbors.append(neighbor);
        self.bump(RecordTag::Neighbor, Bump::Increment);
        Ok(id)
    }

    pub fn find_neighbor(&self, key: NeighborKey) -> DmResult<&NeighborEntry> {
        self.neighbors
            .find(key)
            .and_then(|id| self.neighbors.get(id))
            .ok_or_else(|| DmError::not_found(format!("neighbor {:?}", key)))
    }

    pub fn remove_neighbor(&mut self, key: NeighborKey) -> DmResult<NeighborEntry> {
        let removed = self.neighbors.remove(key)?;
        self.bump(RecordTag::Neighbor, Bump::Decrement);
        Ok(removed)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &NeighborEntry> + '_ {
        self.neighbors.iter()
    }

    // ---- shutdown ----

    /// Tears the data manager down and hands the backend back.
    ///
    /// With [`ShutdownMode::Flush`] every store is rewritten and the backend
    /// flushed to non-volatile storage; failures are logged and shutdown
    /// continues. With [`ShutdownMode::Discard`] the backend is not touched.
    pub fn shutdown(mut self, mode: ShutdownMode) -> (B, ShutdownReport) {
        let flush = mode == ShutdownMode::Flush;
        info!("Stopping data manager ({:?})", mode);

        let counters_reconciled = if flush { self.reconcile_counters() } else { 0 };

        let Self {
            mut backend,
            mut orch,
            global,
            global_layout,
            stores,
            queues,
            vlan_members,
            route_nhs,
            l2mc_members,
            policers,
            neighbors,
            ..
        } = self;

        if !flush {
            orch.discard_all();
            let report = ShutdownReport {
                mode,
                rows_flushed: 0,
                counters_reconciled,
                metrics: orch.metrics().clone(),
            };
            info!("Data manager state discarded");
            return (backend, report);
        }

        orch.drop_runtime_tables(&mut backend);

        let mut rows = 0;
        rows += free_array(stores.vrs, &mut orch, &mut backend);
        rows += free_array(stores.rifs, &mut orch, &mut backend);
        match queues.free_all(&mut orch, &mut backend, true) {
            Ok(n) => rows += n,
            Err(e) => orch.flush_failed(QueueEntry::TABLE, &e),
        }
        rows += free_array(stores.acls, &mut orch, &mut backend);
        rows += free_array(stores.tunnels, &mut orch, &mut backend);
        rows += free_array(stores.vlans, &mut orch, &mut backend);
        rows += free_array(stores.routes, &mut orch, &mut backend);
        rows += free_array(stores.l2mc_groups, &mut orch, &mut backend);

        for result in [
            policers.flush(&mut orch, &mut backend),
            neighbors.flush(&mut orch, &mut backend),
        ] {
            match result {
                Ok(n) => rows += n,
                Err(e) => orch.flush_failed("global list", &e),
            }
        }
        rows += vlan_members.flush_all(&mut orch, &mut backend);
        rows += route_nhs.flush_all(&mut orch, &mut backend);
        rows += l2mc_members.flush_all(&mut orch, &mut backend);

        match global
            .encode(&global_layout)
            .and_then(|row| orch.flush_single(&mut backend, &global_layout, GLOBAL_VERSION, &row))
        {
            Ok(()) => rows += 1,
            Err(e) => orch.flush_failed(global_layout.table(), &e),
        }

        if let Err(e) = backend.flush_all_to_nonvolatile(true) {
            orch.flush_failed("non-volatile checkpoint", &DmError::from(e));
        }

        let report = ShutdownReport {
            mode,
            rows_flushed: rows,
            counters_reconciled,
            metrics: orch.metrics().clone(),
        };
        info!(
            "Data manager flushed {} rows into {} tables ({} failures)",
            report.rows_flushed, report.metrics.tables_flushed, report.metrics.flush_failures
        );
        (backend, report)
    }
}

fn free_array<T: IndexedRecord, B: PersistenceBackend>(
    array: IndexedArray<T>,
    orch: &mut WarmRestartOrchestrator,
    backend: &mut B,
) -> usize {
    match array.free_all(orch, backend, true) {
        Ok(n) => n,
        Err(e) => {
            orch.flush_failed(T::TABLE, &e);
            0
        }
    }
}
