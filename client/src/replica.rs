//! Local copies of remote peers, built from snapshot frames.
//!
//! The sync loop owns a [`ReplicaSet`] and feeds it every decoded frame. New
//! ids produce a handle from the [`SyncCollaborator`]; known ids get their
//! target transform refreshed; ids missing from the snapshot are dropped and
//! handed back to the collaborator.

use shared::{PeerRecord, SessionId, Transform};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Host-side hooks the sync loop drives.
///
/// Implementations usually forward into whatever owns the scene; `Handle`
/// is the host's reference to the remote peer's representation.
pub trait SyncCollaborator: Send + 'static {
    type Handle: Send + 'static;

    /// Current pose of the local peer, sent to the server every tick.
    fn local_transform(&self) -> Transform;

    fn local_name(&self) -> String;

    /// A peer appeared for the first time.
    fn on_peer_seen(&mut self, id: SessionId, name: &str, transform: Transform) -> Self::Handle;

    /// New target pose for a known peer.
    fn on_peer_updated(&mut self, handle: &mut Self::Handle, transform: Transform);

    /// A peer is gone from the server's snapshot, or the link dropped.
    fn on_peer_left(&mut self, _id: SessionId, _handle: Self::Handle) {}
}

/// One remote peer as the client knows it.
#[derive(Debug)]
pub struct PeerReplica<H> {
    pub name: String,
    /// Latest transform reported by the server
    pub target: Transform,
    pub handle: H,
}

/// Changes made by one [`ReplicaSet::apply`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Debug)]
pub struct ReplicaSet<H> {
    peers: HashMap<SessionId, PeerReplica<H>>,
}

impl<H> Default for ReplicaSet<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ReplicaSet<H> {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, id: SessionId) -> Option<&PeerReplica<H>> {
        self.peers.get(&id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.peers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Applies one snapshot, skipping the local session's own record.
    ///
    /// The snapshot is the full peer list, so every replica it does not
    /// mention is removed.
    pub fn apply<C>(
        &mut self,
        local_id: SessionId,
        records: &[PeerRecord],
        collaborator: &mut C,
    ) -> ApplyReport
    where
        C: SyncCollaborator<Handle = H>,
    {
        let mut report = ApplyReport::default();

        for record in records.iter().filter(|r| r.id != local_id) {
            match self.peers.entry(record.id) {
                Entry::Occupied(mut entry) => {
                    let replica = entry.get_mut();
                    replica.target = record.transform;
                    collaborator.on_peer_updated(&mut replica.handle, record.transform);
                    report.updated += 1;
                }
                Entry::Vacant(entry) => {
                    let mut handle =
                        collaborator.on_peer_seen(record.id, &record.name, record.transform);
                    collaborator.on_peer_updated(&mut handle, record.transform);
                    entry.insert(PeerReplica {
                        name: record.name.clone(),
                        target: record.transform,
                        handle,
                    });
                    report.created += 1;
                }
            }
        }

        let present: HashSet<SessionId> = records.iter().map(|r| r.id).collect();
        let departed: Vec<SessionId> = self
            .peers
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in departed {
            if let Some(replica) = self.peers.remove(&id) {
                collaborator.on_peer_left(id, replica.handle);
                report.removed += 1;
            }
        }

        report
    }

    /// Drops every replica, reporting each to the collaborator.
    pub fn clear<C>(&mut self, collaborator: &mut C) -> usize
    where
        C: SyncCollaborator<Handle = H>,
    {
        let count = self.peers.len();
        for (id, replica) in self.peers.drain() {
            collaborator.on_peer_left(id, replica.handle);
        }
        count
    }
}
