//! Server-side slot table: one fixed-capacity entry per potential client.
//!
//! Slots are allocated from the first free (Disconnected) entry on a fresh
//! connect request and fully reset on removal, which is what frees them.
//! The `client_id` a peer is told is its slot index and stays stable for
//! the life of the connection. All of this state is owned exclusively by
//! the session loop; nothing here is shared across threads.

use log::{debug, info};
use shared::{
    is_packet_id_greater, ConnectionState, NetPlayerInput, RejectReason, Salt, INPUT_QUEUE_MAX,
    SALT_LEN,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Everything the server tracks about one peer.
#[derive(Debug, Clone)]
pub struct ClientSlot {
    /// Slot index; doubles as the peer's public client id.
    pub client_id: usize,
    pub addr: Option<SocketAddr>,
    pub state: ConnectionState,
    /// Highest sequence id seen from this peer, once one has arrived.
    pub remote_latest_packet_id: Option<u16>,
    /// Wall clock of the last authenticated packet.
    pub last_packet_at: Option<Instant>,
    pub client_salt: Salt,
    pub server_salt: Salt,
    pub xor_salts: Salt,
    pub last_reject_reason: Option<RejectReason>,
    pub name: String,
    /// Inputs awaiting simulation, bounded by [`INPUT_QUEUE_MAX`].
    pub pending_inputs: Vec<NetPlayerInput>,
}

impl ClientSlot {
    fn new(client_id: usize) -> Self {
        Self {
            client_id,
            addr: None,
            state: ConnectionState::Disconnected,
            remote_latest_packet_id: None,
            last_packet_at: None,
            client_salt: [0; SALT_LEN],
            server_salt: [0; SALT_LEN],
            xor_salts: [0; SALT_LEN],
            last_reject_reason: None,
            name: String::new(),
            pending_inputs: Vec::new(),
        }
    }

    /// A slot is eligible for reassignment exactly when disconnected.
    pub fn is_free(&self) -> bool {
        self.state == ConnectionState::Disconnected
    }

    /// Accepts `id` only if it is strictly newer than the high-water mark,
    /// with wraparound. Returns false for replays and reorderings.
    pub fn accept_packet_id(&mut self, id: u16) -> bool {
        match self.remote_latest_packet_id {
            Some(latest) if id == latest || !is_packet_id_greater(id, latest) => false,
            _ => {
                self.remote_latest_packet_id = Some(id);
                true
            }
        }
    }

    /// Buffers one input record. Overflow drops the newest arrival: the
    /// queued entries are the ones the simulation still owes.
    pub fn push_input(&mut self, input: NetPlayerInput) -> bool {
        if self.pending_inputs.len() >= INPUT_QUEUE_MAX {
            debug!(
                "client {} input queue full ({}), dropping newest",
                self.client_id, INPUT_QUEUE_MAX
            );
            return false;
        }
        self.pending_inputs.push(input);
        true
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        match self.last_packet_at {
            Some(at) => now.duration_since(at) >= timeout,
            None => false,
        }
    }

    /// Zeroes everything but the slot index, freeing the slot. The last
    /// rejection reason is kept as a diagnostic breadcrumb until the slot
    /// is reassigned.
    fn reset(&mut self) {
        let last_reject_reason = self.last_reject_reason;
        *self = Self::new(self.client_id);
        self.last_reject_reason = last_reject_reason;
    }
}

/// Fixed-capacity arena of client slots, owned by the session loop.
pub struct ClientManager {
    slots: Vec<ClientSlot>,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            slots: (0..max_clients).map(ClientSlot::new).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in any non-disconnected state.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }

    pub fn connected_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == ConnectionState::Connected)
            .count()
    }

    /// Looks up the active slot bound to `addr` (full address+port match).
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .find(|s| !s.is_free() && s.addr == Some(addr))
            .map(|s| s.client_id)
    }

    /// Claims the first free slot for `addr`. Returns the slot index, or
    /// `None` when the server is full.
    pub fn allocate(&mut self, addr: SocketAddr) -> Option<usize> {
        let slot = self.slots.iter_mut().find(|s| s.is_free())?;
        slot.reset();
        slot.last_reject_reason = None;
        slot.addr = Some(addr);
        slot.state = ConnectionState::SendingConnectionRequest;
        info!("Assigning new client {} to {}", slot.client_id, addr);
        Some(slot.client_id)
    }

    pub fn get(&self, client_id: usize) -> Option<&ClientSlot> {
        self.slots.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: usize) -> Option<&mut ClientSlot> {
        self.slots.get_mut(client_id)
    }

    /// Frees a slot. The reset is what makes it reassignable.
    pub fn remove(&mut self, client_id: usize) {
        if let Some(slot) = self.slots.get_mut(client_id) {
            if !slot.is_free() {
                info!("Remove client: {}", client_id);
            }
            slot.reset();
        }
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &ClientSlot> {
        self.slots.iter().filter(|s| !s.is_free())
    }

    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = &mut ClientSlot> {
        self.slots.iter_mut().filter(|s| !s.is_free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn allocates_first_free_slot() {
        let mut mgr = ClientManager::new(3);
        assert_eq!(mgr.allocate(addr(1000)), Some(0));
        assert_eq!(mgr.allocate(addr(1001)), Some(1));
        assert_eq!(mgr.active_count(), 2);
    }

    #[test]
    fn allocation_fails_when_full() {
        let mut mgr = ClientManager::new(1);
        assert_eq!(mgr.allocate(addr(1000)), Some(0));
        assert_eq!(mgr.allocate(addr(1001)), None);
        assert_eq!(mgr.active_count(), 1);
    }

    #[test]
    fn removed_slot_is_immediately_reusable() {
        let mut mgr = ClientManager::new(2);
        let id = mgr.allocate(addr(1000)).unwrap();
        mgr.get_mut(id).unwrap().state = ConnectionState::Connected;
        mgr.remove(id);
        assert_eq!(mgr.active_count(), 0);
        // Same slot comes back for the next request.
        assert_eq!(mgr.allocate(addr(2000)), Some(id));
    }

    #[test]
    fn reset_clears_salt_material_and_inputs() {
        let mut mgr = ClientManager::new(1);
        let id = mgr.allocate(addr(1000)).unwrap();
        {
            let slot = mgr.get_mut(id).unwrap();
            slot.xor_salts = [0xAB; 8];
            slot.pending_inputs.push(NetPlayerInput::new(1, 0.016));
            slot.remote_latest_packet_id = Some(99);
        }
        mgr.remove(id);
        let slot = mgr.get(id).unwrap();
        assert_eq!(slot.xor_salts, [0; 8]);
        assert!(slot.pending_inputs.is_empty());
        assert_eq!(slot.remote_latest_packet_id, None);
        assert_eq!(slot.state, ConnectionState::Disconnected);
    }

    #[test]
    fn reject_reason_outlives_removal_until_reassignment() {
        let mut mgr = ClientManager::new(1);
        let id = mgr.allocate(addr(1000)).unwrap();
        mgr.get_mut(id).unwrap().last_reject_reason = Some(RejectReason::FailedChallenge);
        mgr.remove(id);

        // Freed, but the reason is still readable for diagnostics.
        let slot = mgr.get(id).unwrap();
        assert!(slot.is_free());
        assert_eq!(slot.last_reject_reason, Some(RejectReason::FailedChallenge));

        // Reassignment starts with a clean record.
        let id = mgr.allocate(addr(2000)).unwrap();
        assert_eq!(mgr.get(id).unwrap().last_reject_reason, None);
    }

    #[test]
    fn find_by_addr_is_port_inclusive() {
        let mut mgr = ClientManager::new(2);
        let id = mgr.allocate(addr(1000)).unwrap();
        assert_eq!(mgr.find_by_addr(addr(1000)), Some(id));
        assert_eq!(mgr.find_by_addr(addr(1001)), None);
    }

    #[test]
    fn find_ignores_free_slots() {
        let mut mgr = ClientManager::new(2);
        let id = mgr.allocate(addr(1000)).unwrap();
        mgr.remove(id);
        assert_eq!(mgr.find_by_addr(addr(1000)), None);
    }

    #[test]
    fn input_queue_is_bounded_drop_newest() {
        let mut mgr = ClientManager::new(1);
        let id = mgr.allocate(addr(1000)).unwrap();
        let slot = mgr.get_mut(id).unwrap();
        for i in 0..INPUT_QUEUE_MAX {
            assert!(slot.push_input(NetPlayerInput::new(i as u32, 0.016)));
        }
        // Queue full: the newest record is the one refused.
        assert!(!slot.push_input(NetPlayerInput::new(999, 0.016)));
        assert_eq!(slot.pending_inputs.len(), INPUT_QUEUE_MAX);
        assert_eq!(slot.pending_inputs[0].keys, 0);
    }

    #[test]
    fn packet_id_acceptance_rejects_replays() {
        let mut mgr = ClientManager::new(1);
        let id = mgr.allocate(addr(1000)).unwrap();
        let slot = mgr.get_mut(id).unwrap();
        assert!(slot.accept_packet_id(0)); // first packet always lands
        assert!(!slot.accept_packet_id(0)); // exact replay
        assert!(slot.accept_packet_id(1));
        assert!(!slot.accept_packet_id(1));
        assert!(!slot.accept_packet_id(0)); // older
        assert!(slot.accept_packet_id(2));
    }

    #[test]
    fn packet_id_acceptance_wraps() {
        let mut mgr = ClientManager::new(1);
        let id = mgr.allocate(addr(1000)).unwrap();
        let slot = mgr.get_mut(id).unwrap();
        assert!(slot.accept_packet_id(65000));
        assert!(slot.accept_packet_id(1)); // wrapped forward
        assert!(!slot.accept_packet_id(65000));
    }

    #[test]
    fn timeout_requires_a_seen_packet() {
        let mut mgr = ClientManager::new(1);
        let id = mgr.allocate(addr(1000)).unwrap();
        let now = Instant::now();
        let timeout = Duration::from_secs(7);
        let slot = mgr.get_mut(id).unwrap();
        assert!(!slot.is_timed_out(timeout, now));
        slot.last_packet_at = Some(now - Duration::from_secs(10));
        assert!(slot.is_timed_out(timeout, now));
        slot.last_packet_at = Some(now);
        assert!(!slot.is_timed_out(timeout, now));
    }
}
