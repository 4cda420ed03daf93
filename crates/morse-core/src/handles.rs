//! Handle registry: stable small integers for peers, per namespace.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::peer::{PeerId, PeerKind};

/// Middleware handle. `0` is never a valid handle.
pub type Handle = u32;

/// Handle reserved for the local account in the contact namespace.
pub const SELF_HANDLE: Handle = 1;

/// Middleware handle type, with the middleware's numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleType {
    None = 0,
    Contact = 1,
    Room = 2,
}

impl HandleType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(HandleType::None),
            1 => Some(HandleType::Contact),
            2 => Some(HandleType::Room),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Decides which namespace a peer lives in.
///
/// Users are always contacts and basic group chats are always rooms.
/// Channels (broadcasts and supergroups) are rooms unless
/// `broadcast_channels_as_contacts` flattens them into the contact list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerClassifier {
    pub broadcast_channels_as_contacts: bool,
}

impl PeerClassifier {
    pub fn handle_type(&self, peer: &PeerId) -> HandleType {
        match peer.kind() {
            Some(PeerKind::User) => HandleType::Contact,
            Some(PeerKind::Chat) => HandleType::Room,
            Some(PeerKind::Channel) if self.broadcast_channels_as_contacts => HandleType::Contact,
            Some(PeerKind::Channel) => HandleType::Room,
            None => HandleType::None,
        }
    }
}

/// One append-only bijection `Handle <-> PeerId`.
#[derive(Debug, Default)]
struct HandleTable {
    by_handle: BTreeMap<Handle, PeerId>,
    by_peer: HashMap<PeerId, Handle>,
    last: Handle,
}

impl HandleTable {
    fn ensure(&mut self, peer: PeerId) -> Handle {
        if let Some(&h) = self.by_peer.get(&peer) {
            return h;
        }
        // 0 is never a valid handle, so it doubles as "none left".
        let Some(handle) = self.last.checked_add(1) else {
            warn!(%peer, "handle space exhausted");
            return 0;
        };
        self.last = handle;
        self.by_handle.insert(handle, peer);
        self.by_peer.insert(peer, handle);
        handle
    }

    fn lookup(&self, handle: Handle) -> Option<PeerId> {
        self.by_handle.get(&handle).copied()
    }

    fn reverse(&self, peer: &PeerId) -> Option<Handle> {
        self.by_peer.get(peer).copied()
    }

    /// Skip `handle` in the numbering without mapping it yet.
    fn reserve(&mut self, handle: Handle) {
        self.last = self.last.max(handle);
    }

    /// Point a reserved handle at `peer`.
    ///
    /// If `peer` already had another handle, that handle is retired: it stops
    /// resolving and is never handed out again.
    fn bind(&mut self, handle: Handle, peer: PeerId) {
        if let Some(old) = self.by_peer.get(&peer).copied() {
            if old == handle {
                return;
            }
            warn!(%peer, old, new = handle, "peer rebound to reserved handle");
            self.by_handle.remove(&old);
        }
        if let Some(prev) = self.by_handle.insert(handle, peer) {
            self.by_peer.remove(&prev);
        }
        self.by_peer.insert(peer, handle);
        self.last = self.last.max(handle);
    }

    fn contains(&self, handle: Handle) -> bool {
        self.by_handle.contains_key(&handle)
    }
}

/// Contact and room handle tables for one connection.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    contacts: HandleTable,
    rooms: HandleTable,
    classifier: PeerClassifier,
}

impl HandleRegistry {
    pub fn new(classifier: PeerClassifier) -> Self {
        Self {
            classifier,
            ..Self::default()
        }
    }

    /// Registry with contact handle 1 set aside for the local account.
    pub fn with_reserved_self(classifier: PeerClassifier) -> Self {
        let mut reg = Self::new(classifier);
        reg.contacts.reserve(SELF_HANDLE);
        reg
    }

    pub fn classifier(&self) -> PeerClassifier {
        self.classifier
    }

    pub fn ensure_contact(&mut self, peer: PeerId) -> Handle {
        self.contacts.ensure(peer)
    }

    pub fn ensure_chat(&mut self, peer: PeerId) -> Handle {
        self.rooms.ensure(peer)
    }

    /// Ensure `peer` in whichever namespace the classifier puts it.
    pub fn ensure_handle(&mut self, peer: PeerId) -> (HandleType, Handle) {
        match self.classifier.handle_type(&peer) {
            HandleType::Room => (HandleType::Room, self.ensure_chat(peer)),
            _ => (HandleType::Contact, self.ensure_contact(peer)),
        }
    }

    pub fn lookup(&self, handle: Handle, ty: HandleType) -> Option<PeerId> {
        match ty {
            HandleType::Contact => self.contacts.lookup(handle),
            HandleType::Room => self.rooms.lookup(handle),
            HandleType::None => None,
        }
    }

    pub fn reverse_lookup(&self, peer: &PeerId, ty: HandleType) -> Option<Handle> {
        match ty {
            HandleType::Contact => self.contacts.reverse(peer),
            HandleType::Room => self.rooms.reverse(peer),
            HandleType::None => None,
        }
    }

    pub fn contains(&self, handle: Handle, ty: HandleType) -> bool {
        match ty {
            HandleType::Contact => self.contacts.contains(handle),
            HandleType::Room => self.rooms.contains(handle),
            HandleType::None => false,
        }
    }

    pub fn bind_self(&mut self, peer: PeerId) {
        self.contacts.bind(SELF_HANDLE, peer);
    }

    pub fn self_peer(&self) -> Option<PeerId> {
        self.contacts.lookup(SELF_HANDLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HandleRegistry {
        HandleRegistry::new(PeerClassifier::default())
    }

    #[test]
    fn first_contact_add() {
        let mut reg = registry();
        assert_eq!(reg.ensure_contact(PeerId::user(42)), 1);
        assert_eq!(reg.ensure_contact(PeerId::user(42)), 1);
        assert_eq!(reg.ensure_contact(PeerId::user(43)), 2);
    }

    #[test]
    fn room_and_contact_numbering_are_independent() {
        let mut reg = registry();
        assert_eq!(reg.ensure_chat(PeerId::chat(5)), 1);
        assert_eq!(reg.ensure_contact(PeerId::user(5)), 1);
        assert_eq!(reg.lookup(1, HandleType::Room), Some(PeerId::chat(5)));
        assert_eq!(reg.lookup(1, HandleType::Contact), Some(PeerId::user(5)));
    }

    #[test]
    fn ensure_is_a_bijection() {
        let mut reg = registry();
        let peers: Vec<PeerId> = (1..=50)
            .map(PeerId::user)
            .chain((1..=10).map(PeerId::channel))
            .collect();
        let handles: Vec<Handle> = peers.iter().map(|p| reg.ensure_contact(*p)).collect();

        let mut unique = handles.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), peers.len());

        for (p, h) in peers.iter().zip(&handles) {
            assert_eq!(reg.ensure_contact(*p), *h);
            assert_eq!(reg.reverse_lookup(p, HandleType::Contact), Some(*h));
            assert_eq!(reg.lookup(*h, HandleType::Contact), Some(*p));
        }
    }

    #[test]
    fn lookups_are_pure() {
        let reg = registry();
        assert_eq!(reg.lookup(1, HandleType::Contact), None);
        assert_eq!(reg.reverse_lookup(&PeerId::user(1), HandleType::Contact), None);
        assert_eq!(reg.lookup(1, HandleType::None), None);
    }

    #[test]
    fn ensure_handle_follows_classifier() {
        let mut reg = registry();
        assert_eq!(reg.ensure_handle(PeerId::user(7)), (HandleType::Contact, 1));
        assert_eq!(reg.ensure_handle(PeerId::chat(7)), (HandleType::Room, 1));
        assert_eq!(reg.ensure_handle(PeerId::channel(7)), (HandleType::Room, 2));

        let mut flat = HandleRegistry::new(PeerClassifier {
            broadcast_channels_as_contacts: true,
        });
        assert_eq!(flat.ensure_handle(PeerId::channel(7)), (HandleType::Contact, 1));
        assert_eq!(flat.ensure_handle(PeerId::chat(7)), (HandleType::Room, 1));
    }

    #[test]
    fn reserved_self_handle_is_skipped_then_bound() {
        let mut reg = HandleRegistry::with_reserved_self(PeerClassifier::default());
        assert_eq!(reg.self_peer(), None);
        assert_eq!(reg.ensure_contact(PeerId::user(10)), 2);

        reg.bind_self(PeerId::user(99));
        assert_eq!(reg.self_peer(), Some(PeerId::user(99)));
        assert_eq!(reg.ensure_contact(PeerId::user(99)), SELF_HANDLE);
        assert_eq!(reg.ensure_contact(PeerId::user(11)), 3);
    }

    #[test]
    fn binding_self_retires_an_earlier_handle() {
        let mut reg = HandleRegistry::with_reserved_self(PeerClassifier::default());
        assert_eq!(reg.ensure_contact(PeerId::user(99)), 2);
        reg.bind_self(PeerId::user(99));
        assert_eq!(reg.lookup(2, HandleType::Contact), None);
        assert_eq!(reg.reverse_lookup(&PeerId::user(99), HandleType::Contact), Some(1));
        assert_eq!(reg.ensure_contact(PeerId::user(100)), 3);
    }

    #[test]
    fn exhausted_numbering_hands_out_no_handle() {
        let mut reg = registry();
        assert_eq!(reg.ensure_contact(PeerId::user(1)), 1);
        reg.contacts.reserve(Handle::MAX);
        assert_eq!(reg.ensure_contact(PeerId::user(2)), 0);
        assert_eq!(reg.reverse_lookup(&PeerId::user(2), HandleType::Contact), None);
        assert_eq!(reg.ensure_contact(PeerId::user(1)), 1);
        assert_eq!(reg.ensure_chat(PeerId::chat(3)), 1);
    }
}
