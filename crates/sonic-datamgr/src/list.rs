//! Linked record lists.
//!
//! Nodes live in an arena owned by the list and are addressed by opaque
//! [`NodeId`]s carrying a generation, so a stale handle never aliases a
//! reused node. Links are purely in-memory: a list persists as rows with a
//! leading 1-based `seq` key column written in traversal order, and reload
//! chains the i-th row read after the (i-1)-th.
//!
//! Global lists hang off a single [`RecordList`]. Anchored lists hang off a
//! parent row through [`AnchoredLists`], which keeps the parent's member
//! count equal to the list length on every mutation.

use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::fmt;

use crate::backend::PersistenceBackend;
use crate::error::{DmError, DmResult};
use crate::record::{ListAnchor, ListRecord};
use crate::schema::{FieldDescriptor, RowLayout, RowReader, RowWriter};
use crate::warm_restart::WarmRestartOrchestrator;

const SEQ_COLUMN: FieldDescriptor = FieldDescriptor::uint("seq", 4);

/// Opaque handle to a list node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    slot: u32,
    generation: u32,
}

/// Which links a list maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListLinks {
    /// Head only: append and removal walk the chain.
    Singly,
    /// Head and tail: O(1) append.
    SinglyWithTail,
    /// Head, tail and per-node `prev`: O(1) append and unlink.
    Doubly,
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    next: Option<NodeId>,
    prev: Option<NodeId>,
}

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// A chain of records in insertion order.
#[derive(Debug)]
pub struct RecordList<T> {
    name: String,
    links: ListLinks,
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<T: ListRecord> RecordList<T> {
    /// Creates an empty list persisted under table `name`.
    pub fn new(name: impl Into<String>, links: ListLinks) -> Self {
        Self {
            name: name.into(),
            links,
            entries: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn links(&self) -> ListLinks {
        self.links
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.entries
            .get(id.slot as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.entries
            .get_mut(id.slot as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.node.as_mut())
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.node(id).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.node_mut(id).map(|n| &mut n.value)
    }

    fn alloc(&mut self, node: Node<T>) -> NodeId {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.entries[slot as usize];
            entry.node = Some(node);
            NodeId {
                slot,
                generation: entry.generation,
            }
        } else {
            let slot = self.entries.len() as u32;
            self.entries.push(Entry {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                slot,
                generation: 0,
            }
        }
    }

    fn last(&self) -> Option<NodeId> {
        if self.links != ListLinks::Singly {
            return self.tail;
        }
        let mut cur = self.head?;
        while let Some(next) = self.node(cur).and_then(|n| n.next) {
            cur = next;
        }
        Some(cur)
    }

    /// Appends a record and returns its handle.
    pub fn append(&mut self, value: T) -> NodeId {
        let last = self.last();
        let prev = if self.links == ListLinks::Doubly {
            last
        } else {
            None
        };
        let id = self.alloc(Node {
            value,
            next: None,
            prev,
        });

        match last.and_then(|l| self.node_mut(l)) {
            Some(node) => node.next = Some(id),
            None => self.head = Some(id),
        }
        if self.links != ListLinks::Singly {
            self.tail = Some(id);
        }
        self.len += 1;
        id
    }

    /// Finds the first node whose key equals `key`.
    pub fn find(&self, key: T::Key) -> Option<NodeId> {
        self.ids().find(|id| self.get(*id).map_or(false, |v| v.key() == key))
    }

    /// Returns the node after `current`, or the head when `current` is `None`.
    pub fn next(&self, current: Option<NodeId>) -> Option<NodeId> {
        match current {
            None => self.head,
            Some(id) => self.node(id).and_then(|n| n.next),
        }
    }

    fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        if self.links == ListLinks::Doubly {
            return self.node(id).and_then(|n| n.prev);
        }
        self.ids().find(|p| self.node(*p).and_then(|n| n.next) == Some(id))
    }

    fn unlink(&mut self, id: NodeId) -> Option<T> {
        self.node(id)?;
        let links = self.links;
        let prev = self.predecessor(id);
        let entry = &mut self.entries[id.slot as usize];
        let node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);

        match prev.and_then(|p| self.node_mut(p)) {
            Some(p) => p.next = node.next,
            None => self.head = node.next,
        }
        if let Some(next) = node.next {
            if let Some(n) = self.node_mut(next) {
                n.prev = if links == ListLinks::Doubly { prev } else { None };
            }
        }
        if self.tail == Some(id) {
            self.tail = if links == ListLinks::Singly { None } else { prev };
        }
        self.len -= 1;
        Some(node.value)
    }

    /// Removes the node with `key`.
    ///
    /// Fails with `ItemNotFound` when absent and `ObjectInUse` while the
    /// node's embedded count is non-zero.
    pub fn remove(&mut self, key: T::Key) -> DmResult<T> {
        let id = self
            .find(key)
            .ok_or_else(|| DmError::not_found(format!("{} {:?}", self.name, key)))?;
        self.remove_node(id)
    }

    /// Removes a node by handle, honouring the in-use check.
    pub fn remove_node(&mut self, id: NodeId) -> DmResult<T> {
        let value = self
            .get(id)
            .ok_or_else(|| DmError::not_found(format!("{} node", self.name)))?;
        let refs = value.in_use_count();
        if refs > 0 {
            return Err(DmError::in_use(
                format!("{} {:?}", self.name, value.key()),
                refs,
            ));
        }
        self.unlink(id)
            .ok_or_else(|| DmError::not_found(format!("{} node", self.name)))
    }

    /// Handles in traversal order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.head, move |id| self.node(*id).and_then(|n| n.next))
    }

    /// Records in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.ids().filter_map(move |id| self.get(id))
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    pub fn row_layout(&self) -> DmResult<RowLayout> {
        RowLayout::with_key_prefix(self.name.clone(), &[SEQ_COLUMN], T::FIELDS)
    }

    /// Encodes every node in traversal order.
    pub fn encode_rows(&self) -> DmResult<Vec<Vec<u8>>> {
        let layout = self.row_layout()?;
        let mut rows = Vec::with_capacity(self.len);
        for (seq, value) in (1u32..).zip(self.iter()) {
            let mut w = RowWriter::new(&layout);
            w.put_u32(seq)?;
            value.encode(&mut w)?;
            rows.push(w.finish()?);
        }
        Ok(rows)
    }

    /// Rebuilds the list from persisted rows, chaining them in read order.
    ///
    /// `hint` is the expected node count; 0 skips the backend entirely.
    /// Returns the number of nodes rebuilt.
    pub fn warm_load<B: PersistenceBackend>(
        &mut self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
        hint: usize,
    ) -> DmResult<usize> {
        if hint == 0 {
            return Ok(0);
        }
        let layout = self.row_layout()?;
        let rows = orch.load_table(backend, &layout, T::VERSION, hint, Some(hint))?;
        let mut rebuilt = 0;
        for row in &rows {
            match decode_row::<T>(&layout, row) {
                Ok(value) => {
                    self.append(value);
                    rebuilt += 1;
                }
                Err(e) => {
                    error!("{}: dropping undecodable row: {}", self.name, e);
                    orch.metrics_mut().record_rejected_row();
                }
            }
        }
        debug!("{}: rebuilt {} nodes", self.name, rebuilt);
        Ok(rebuilt)
    }

    /// Recreates the list table and writes every node in order.
    ///
    /// An empty list writes no table.
    pub fn flush<B: PersistenceBackend>(
        &self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
    ) -> DmResult<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let layout = self.row_layout()?;
        let rows = self.encode_rows()?;
        orch.flush_table(backend, &layout, T::VERSION, rows.len(), &rows)
    }
}

fn decode_row<T: ListRecord>(layout: &RowLayout, row: &[u8]) -> DmResult<T> {
    let mut r = RowReader::new(layout, row)?;
    let _seq = r.get_u32()?;
    let value = T::decode(&mut r)?;
    r.finish()?;
    Ok(value)
}

/// Identity of an L2 multicast group: MAC plus VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacVlanKey {
    pub mac: [u8; 6],
    pub vlan: u16,
}

impl fmt::Display for MacVlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mac;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}_{}",
            m[0], m[1], m[2], m[3], m[4], m[5], self.vlan
        )
    }
}

/// Identity of the parent row an anchored list hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnchorKey {
    /// Parent slot index, rendered in decimal.
    Id(u32),
    /// MAC+VLAN parent, rendered as hex MAC and decimal VLAN.
    MacVlan(MacVlanKey),
}

impl AnchorKey {
    /// Table name for the list under `base`.
    pub fn table_name(&self, base: &str) -> String {
        format!("{}_{}", base, self)
    }
}

impl fmt::Display for AnchorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorKey::Id(id) => write!(f, "{}", id),
            AnchorKey::MacVlan(key) => write!(f, "{}", key),
        }
    }
}

/// Sub-lists keyed by their parent row.
#[derive(Debug)]
pub struct AnchoredLists<T> {
    links: ListLinks,
    lists: BTreeMap<AnchorKey, RecordList<T>>,
}

impl<T: ListRecord> AnchoredLists<T> {
    pub fn new(links: ListLinks) -> Self {
        Self {
            links,
            lists: BTreeMap::new(),
        }
    }

    pub fn list(&self, anchor: AnchorKey) -> Option<&RecordList<T>> {
        self.lists.get(&anchor)
    }

    pub fn list_mut(&mut self, anchor: AnchorKey) -> Option<&mut RecordList<T>> {
        self.lists.get_mut(&anchor)
    }

    /// Anchors with at least one node.
    pub fn anchors(&self) -> impl Iterator<Item = AnchorKey> + '_ {
        self.lists
            .iter()
            .filter(|(_, l)| !l.is_empty())
            .map(|(k, _)| *k)
    }

    /// Total nodes across all anchors.
    pub fn total_len(&self) -> usize {
        self.lists.values().map(RecordList::len).sum()
    }

    fn sync_parent<A: ListAnchor>(list: &RecordList<T>, parent: &mut A) {
        parent.set_member_count(list.len() as u32);
        parent.set_list_head(list.head());
    }

    /// Appends under `anchor` and updates the parent's count.
    pub fn append<A: ListAnchor>(
        &mut self,
        anchor: AnchorKey,
        parent: &mut A,
        mut value: T,
    ) -> NodeId {
        if let AnchorKey::Id(slot) = anchor {
            value.set_anchor(slot);
        }
        let links = self.links;
        let list = self
            .lists
            .entry(anchor)
            .or_insert_with(|| RecordList::new(anchor.table_name(T::TABLE), links));
        let id = list.append(value);
        Self::sync_parent(list, parent);
        id
    }

    pub fn find(&self, anchor: AnchorKey, key: T::Key) -> DmResult<NodeId> {
        self.lists
            .get(&anchor)
            .and_then(|l| l.find(key))
            .ok_or_else(|| DmError::not_found(format!("{} {:?}", anchor.table_name(T::TABLE), key)))
    }

    pub fn get(&self, anchor: AnchorKey, id: NodeId) -> Option<&T> {
        self.lists.get(&anchor).and_then(|l| l.get(id))
    }

    /// Removes `key` under `anchor` and updates the parent's count.
    pub fn remove<A: ListAnchor>(
        &mut self,
        anchor: AnchorKey,
        parent: &mut A,
        key: T::Key,
    ) -> DmResult<T> {
        let list = self.lists.get_mut(&anchor).ok_or_else(|| {
            DmError::not_found(format!("{} {:?}", anchor.table_name(T::TABLE), key))
        })?;
        let value = list.remove(key)?;
        Self::sync_parent(list, parent);
        if list.is_empty() {
            self.lists.remove(&anchor);
        }
        Ok(value)
    }

    pub fn next(&self, anchor: AnchorKey, current: Option<NodeId>) -> Option<NodeId> {
        self.lists.get(&anchor).and_then(|l| l.next(current))
    }

    /// Drops the list under `anchor`, returning how many nodes it held.
    pub fn drop_anchor(&mut self, anchor: AnchorKey) -> usize {
        self.lists.remove(&anchor).map_or(0, |l| l.len())
    }

    /// Rebuilds the list under `anchor` using the parent's count as hint.
    ///
    /// When the rebuilt length differs from the hint, the parent count is
    /// corrected to the rebuilt length.
    pub fn warm_load<A: ListAnchor, B: PersistenceBackend>(
        &mut self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
        anchor: AnchorKey,
        parent: &mut A,
    ) -> DmResult<usize> {
        let hint = parent.member_count() as usize;
        if hint == 0 {
            return Ok(0);
        }
        let mut list = RecordList::<T>::new(anchor.table_name(T::TABLE), self.links);
        let rebuilt = list.warm_load(orch, backend, hint)?;
        if let AnchorKey::Id(slot) = anchor {
            for id in list.ids().collect::<Vec<_>>() {
                if let Some(value) = list.get_mut(id) {
                    value.set_anchor(slot);
                }
            }
        }
        if rebuilt != hint {
            warn!(
                "{}: parent count {} corrected to {}",
                list.name(),
                hint,
                rebuilt
            );
            orch.metrics_mut().record_anchor_corrected();
        }
        Self::sync_parent(&list, parent);
        if !list.is_empty() {
            self.lists.insert(anchor, list);
        }
        Ok(rebuilt)
    }

    /// Flushes every non-empty list. Failures are logged and skipped.
    pub fn flush_all<B: PersistenceBackend>(
        &self,
        orch: &mut WarmRestartOrchestrator,
        backend: &mut B,
    ) -> usize {
        let mut total = 0;
        for list in self.lists.values() {
            match list.flush(orch, backend) {
                Ok(n) => total += n,
                Err(e) => orch.flush_failed(list.name(), &e),
            }
        }
        total
    }
}
