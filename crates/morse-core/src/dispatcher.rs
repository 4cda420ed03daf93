//! Channel dispatcher: one text channel per `(handle, handle type)`, and
//! routing of library events into them.

use std::collections::{BTreeMap, HashMap};

use serde_json::json;
use tracing::{debug, warn};

use crate::{
    channel::{
        file_transfer::FileTransferChannel,
        room_list::RoomListChannel,
        search::SearchChannel,
        text::{typing_state, TextChannel},
        ChannelDetails, ChannelKey, ChannelKind, ChannelPaths, ChannelRequest,
    },
    errors::Error,
    handles::{Handle, HandleRegistry, HandleType},
    peer::PeerId,
    ports::MiddlewarePort,
    telegram::types::IncomingMessage,
    Result,
};

const IFACE_MESSAGES: &str = "org.freedesktop.Telepathy.Channel.Interface.Messages";
const IFACE_CHAT_STATE: &str = "org.freedesktop.Telepathy.Channel.Interface.ChatState";
const IFACE_GROUP: &str = "org.freedesktop.Telepathy.Channel.Interface.Group";
const IFACE_ROOM: &str = "org.freedesktop.Telepathy.Channel.Interface.Room2";

/// Delivery reporting: receive successes | receive read.
const DELIVERY_REPORTING_SUPPORT: u32 = 2 | 4;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Who a text channel is for and who opened it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextTarget {
    pub key: ChannelKey,
    pub peer: PeerId,
    pub initiator: Handle,
    pub initiator_id: String,
    pub requested: bool,
}

#[derive(Debug)]
pub struct Dispatcher {
    paths: ChannelPaths,
    text: BTreeMap<ChannelKey, TextChannel>,
    text_paths: HashMap<String, ChannelKey>,
    room_lists: HashMap<String, RoomListChannel>,
    searches: HashMap<String, SearchChannel>,
    transfers: HashMap<String, FileTransferChannel>,
}

impl Dispatcher {
    pub fn new(connection_path: &str) -> Self {
        Self {
            paths: ChannelPaths::new(connection_path),
            text: BTreeMap::new(),
            text_paths: HashMap::new(),
            room_lists: HashMap::new(),
            searches: HashMap::new(),
            transfers: HashMap::new(),
        }
    }

    pub fn allocate_path(&mut self, kind: ChannelKind) -> String {
        self.paths.allocate(kind)
    }

    pub fn text_channel(&self, key: &ChannelKey) -> Option<&TextChannel> {
        self.text.get(key)
    }

    pub fn text_channel_mut(&mut self, key: &ChannelKey) -> Option<&mut TextChannel> {
        self.text.get_mut(key)
    }

    pub fn text_by_path_mut(&mut self, path: &str) -> Result<&mut TextChannel> {
        self.text_paths
            .get(path)
            .and_then(|key| self.text.get_mut(key))
            .ok_or_else(|| Error::InvalidArgument(format!("no text channel at {path}")))
    }

    pub fn text_channels(&self) -> impl Iterator<Item = &TextChannel> + '_ {
        self.text.values()
    }

    /// Get or create the text channel for `target`. New channels are
    /// announced first and only kept if the middleware accepts them.
    /// Returns the channel path and whether it was created by this call.
    pub fn ensure_text(
        &mut self,
        target: TextTarget,
        self_handle: Handle,
        bus: &dyn MiddlewarePort,
    ) -> Result<(String, bool)> {
        if let Some(existing) = self.text.get(&target.key) {
            return Ok((existing.path().to_string(), false));
        }

        let path = self.paths.allocate(ChannelKind::Text);
        let mut interfaces = vec![IFACE_MESSAGES, IFACE_CHAT_STATE];
        if target.key.handle_type == HandleType::Room {
            interfaces.extend([IFACE_GROUP, IFACE_ROOM]);
        }

        let mut details = ChannelDetails {
            path: path.clone(),
            kind: ChannelKind::Text,
            target_handle_type: target.key.handle_type,
            target_handle: target.key.handle,
            target_id: target.peer.to_string(),
            initiator_handle: target.initiator,
            initiator_id: target.initiator_id,
            requested: target.requested,
            extra: Default::default(),
        };
        details.extra.insert(
            "org.freedesktop.Telepathy.Channel.Interfaces".into(),
            json!(interfaces),
        );
        details.extra.insert(
            format!("{IFACE_MESSAGES}.SupportedContentTypes"),
            json!(["text/plain"]),
        );
        details.extra.insert(format!("{IFACE_MESSAGES}.MessageTypes"), json!([0]));
        details.extra.insert(
            format!("{IFACE_MESSAGES}.DeliveryReportingSupport"),
            json!(DELIVERY_REPORTING_SUPPORT),
        );
        if target.key.handle_type == HandleType::Room {
            details.extra.insert(
                format!("{IFACE_ROOM}.RoomName"),
                json!(target.peer.to_string()),
            );
        }

        bus.new_channel(&details)?;
        debug!(path = %path, target = %target.peer, "text channel created");

        self.text_paths.insert(path.clone(), target.key);
        self.text
            .insert(target.key, TextChannel::new(details, target.peer, self_handle));
        Ok((path, true))
    }

    /// Deliver one inbound message, creating handles and channel as needed.
    /// Returns `false` when the channel was refused and the message dropped.
    pub fn deliver(
        &mut self,
        registry: &mut HandleRegistry,
        self_handle: Handle,
        bus: &dyn MiddlewarePort,
        message: &IncomingMessage,
    ) -> bool {
        // Only a contact-namespace author can be a message sender. A channel
        // post classified as a room has none.
        let sender = match registry.classifier().handle_type(&message.from) {
            HandleType::Contact => Some((registry.ensure_handle(message.from).1, message.from)),
            _ => None,
        };
        let (handle_type, handle) = registry.ensure_handle(message.peer);

        // The initiator should be the group creator; sender/self stands in for it.
        let (initiator, initiator_id) = if message.flags.out {
            (
                self_handle,
                registry.self_peer().unwrap_or_default().to_string(),
            )
        } else {
            match sender {
                Some((h, peer)) => (h, peer.to_string()),
                None => (0, String::new()),
            }
        };

        let target = TextTarget {
            key: ChannelKey {
                handle_type,
                handle,
            },
            peer: message.peer,
            initiator,
            initiator_id,
            requested: false,
        };

        let path = match self.ensure_text(target, self_handle, bus) {
            Ok((path, _)) => path,
            Err(e) => {
                warn!(peer = %message.peer, error = %e, "channel refused, message dropped");
                return false;
            }
        };

        let Some(channel) = self.text_paths.get(&path).and_then(|k| self.text.get_mut(k)) else {
            return false;
        };
        let sender_id = sender.map(|(_, peer)| peer.to_string());
        let parts = channel.receive(
            message,
            sender.map(|(h, _)| h).zip(sender_id.as_deref()),
            now(),
        );
        bus.message_received(&path, &parts);
        true
    }

    /// Typing notification; only existing channels are told.
    pub fn typing(
        &mut self,
        registry: &mut HandleRegistry,
        bus: &dyn MiddlewarePort,
        peer: PeerId,
        user_id: u32,
        typing: bool,
    ) {
        let Some(key) = channel_key(registry, &peer) else {
            return;
        };
        let Some(channel) = self.text.get(&key) else {
            return;
        };
        let contact = registry.ensure_contact(PeerId::user(user_id));
        bus.chat_state_changed(channel.path(), contact, typing_state(typing));
    }

    /// Read receipt. Outbox reads turn into `read` delivery reports; inbox
    /// reads drop the matching pending messages.
    pub fn message_read(
        &mut self,
        registry: &HandleRegistry,
        bus: &dyn MiddlewarePort,
        peer: PeerId,
        message_id: u32,
        outbox: bool,
    ) {
        let Some(key) = channel_key(registry, &peer) else {
            return;
        };
        let Some(channel) = self.text.get_mut(&key) else {
            return;
        };
        if outbox {
            for report in channel.outbox_read(message_id, now()) {
                bus.message_received(channel.path(), &report);
            }
        } else {
            let removed = channel.inbox_read(message_id);
            if !removed.is_empty() {
                bus.pending_messages_removed(channel.path(), &removed);
            }
        }
    }

    /// The server assigned an id to a message we sent.
    pub fn sent_resolved(&mut self, bus: &dyn MiddlewarePort, random_id: u64, message_id: u32) {
        let Some(channel) = self.text.values_mut().find(|c| c.has_sent(random_id)) else {
            debug!(random_id, "resolved id for an unknown sent message");
            return;
        };
        if let Some(report) = channel.resolve_sent(random_id, message_id, now()) {
            bus.message_received(channel.path(), &report);
        }
    }

    /// A message we sent was refused or lost before the server took it.
    pub fn sent_failed(&mut self, bus: &dyn MiddlewarePort, random_id: u64) {
        let Some(channel) = self.text.values_mut().find(|c| c.has_sent(random_id)) else {
            debug!(random_id, "failure for an unknown sent message");
            return;
        };
        if let Some(report) = channel.fail_sent(random_id, now()) {
            bus.message_received(channel.path(), &report);
        }
    }

    /// Replace a room channel's member list and signal the difference.
    pub fn update_members(&mut self, bus: &dyn MiddlewarePort, key: &ChannelKey, members: Vec<Handle>) {
        let Some(channel) = self.text.get_mut(key) else {
            return;
        };
        let (added, removed) = channel.set_members(members);
        if !added.is_empty() || !removed.is_empty() {
            bus.members_changed(channel.path(), &added, &removed);
        }
    }

    pub fn create_room_list(&mut self, bus: &dyn MiddlewarePort) -> Result<ChannelDetails> {
        let channel = RoomListChannel::new(self.paths.allocate(ChannelKind::RoomList));
        let details = channel.details().clone();
        bus.new_channel(&details)?;
        self.room_lists.insert(details.path.clone(), channel);
        Ok(details)
    }

    pub fn create_search(&mut self, bus: &dyn MiddlewarePort, request: &ChannelRequest) -> Result<ChannelDetails> {
        let channel = SearchChannel::new(
            self.paths.allocate(ChannelKind::ContactSearch),
            request.search_limit,
        );
        let details = channel.details().clone();
        bus.new_channel(&details)?;
        self.searches.insert(details.path.clone(), channel);
        Ok(details)
    }

    pub fn create_transfer(&mut self, bus: &dyn MiddlewarePort, request: &ChannelRequest) -> Result<ChannelDetails> {
        let channel = FileTransferChannel::from_request(
            self.paths.allocate(ChannelKind::FileTransfer),
            request,
        )?;
        let details = channel.details().clone();
        bus.new_channel(&details)?;
        self.transfers.insert(details.path.clone(), channel);
        Ok(details)
    }

    pub fn room_list_mut(&mut self, path: &str) -> Result<&mut RoomListChannel> {
        self.room_lists
            .get_mut(path)
            .ok_or_else(|| Error::InvalidArgument(format!("no room list channel at {path}")))
    }

    pub fn search_mut(&mut self, path: &str) -> Result<&mut SearchChannel> {
        self.searches
            .get_mut(path)
            .ok_or_else(|| Error::InvalidArgument(format!("no contact search channel at {path}")))
    }

    pub fn searches_mut(&mut self) -> impl Iterator<Item = (&String, &mut SearchChannel)> + '_ {
        self.searches.iter_mut()
    }

    pub fn transfer_mut(&mut self, path: &str) -> Result<&mut FileTransferChannel> {
        self.transfers
            .get_mut(path)
            .ok_or_else(|| Error::InvalidArgument(format!("no file transfer channel at {path}")))
    }

    pub fn transfers_for(&mut self, file_id: &str) -> impl Iterator<Item = (&String, &mut FileTransferChannel)> + '_ {
        let file_id = file_id.to_string();
        self.transfers
            .iter_mut()
            .filter(move |(_, t)| t.file_id() == file_id)
    }

    /// Forget a channel closed by the middleware.
    pub fn close(&mut self, bus: &dyn MiddlewarePort, path: &str) -> Result<()> {
        let found = if let Some(key) = self.text_paths.remove(path) {
            self.text.remove(&key).is_some()
        } else {
            self.room_lists.remove(path).is_some()
                || self.searches.remove(path).is_some()
                || self.transfers.remove(path).is_some()
        };
        if !found {
            return Err(Error::InvalidArgument(format!("no channel at {path}")));
        }
        bus.channel_closed(path);
        Ok(())
    }

    /// Drop everything (connection teardown).
    pub fn close_all(&mut self, bus: &dyn MiddlewarePort) {
        let paths: Vec<String> = self
            .text_paths
            .keys()
            .chain(self.room_lists.keys())
            .chain(self.searches.keys())
            .chain(self.transfers.keys())
            .cloned()
            .collect();
        for path in paths {
            let _ = self.close(bus, &path);
        }
    }
}

/// Existing-handle lookup in the namespace the classifier assigns.
fn channel_key(registry: &HandleRegistry, peer: &PeerId) -> Option<ChannelKey> {
    let handle_type = registry.classifier().handle_type(peer);
    let handle = registry.reverse_lookup(peer, handle_type)?;
    Some(ChannelKey {
        handle_type,
        handle,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::{
        channel::{
            auth::SaslStatus, file_transfer::FileTransferState, room_list::RoomInfo,
            search::SearchState, text::ChatState, MessagePart, TYPE_CONTACT_SEARCH,
        },
        contact_info::ContactInfoField,
        handles::PeerClassifier,
        ports::{ConnectionStatus, StatusReason, VariantMap},
        presence::SimplePresence,
        roster::{ContactListState, ContactsChanged},
        telegram::types::MessageFlags,
    };

    /// Records every signal as a short string; optionally refuses channels.
    #[derive(Default)]
    pub(crate) struct RecordingBus {
        pub events: Mutex<Vec<String>>,
        pub channels: Mutex<Vec<ChannelDetails>>,
        pub messages: Mutex<Vec<(String, Vec<MessagePart>)>>,
        pub presences: Mutex<Vec<BTreeMap<Handle, SimplePresence>>>,
        pub contacts: Mutex<Vec<ContactsChanged>>,
        pub refuse_channels: Mutex<bool>,
    }

    impl RecordingBus {
        pub fn refusing() -> Self {
            let bus = Self::default();
            *bus.refuse_channels.lock().unwrap() = true;
            bus
        }

        fn push(&self, s: String) {
            self.events.lock().unwrap().push(s);
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        pub fn has(&self, prefix: &str) -> bool {
            self.events().iter().any(|e| e.starts_with(prefix))
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.events().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    impl MiddlewarePort for RecordingBus {
        fn status_changed(&self, status: ConnectionStatus, reason: StatusReason) {
            self.push(format!("status {status:?} {reason:?}"));
        }
        fn self_contact_changed(&self, handle: Handle, identifier: &str) {
            self.push(format!("self {handle} {identifier}"));
        }
        fn presences_changed(&self, presences: &BTreeMap<Handle, SimplePresence>) {
            self.presences.lock().unwrap().push(presences.clone());
            self.push(format!("presences {}", presences.len()));
        }
        fn contacts_changed(&self, delta: &ContactsChanged) {
            self.contacts.lock().unwrap().push(delta.clone());
            self.push(format!("contacts +{} -{}", delta.changes.len(), delta.removals.len()));
        }
        fn contact_list_state_changed(&self, state: ContactListState) {
            self.push(format!("list {state:?}"));
        }
        fn avatar_retrieved(&self, contact: Handle, token: &str, _data: &[u8], _mime: &str) {
            self.push(format!("avatar {contact} {token}"));
        }
        fn new_channel(&self, channel: &ChannelDetails) -> Result<()> {
            if *self.refuse_channels.lock().unwrap() {
                self.push("refused".to_string());
                return Err(Error::NotImplemented("refused".to_string()));
            }
            self.channels.lock().unwrap().push(channel.clone());
            self.push(format!("channel {:?} {}", channel.kind, channel.path));
            Ok(())
        }
        fn channel_closed(&self, path: &str) {
            self.push(format!("closed {path}"));
        }
        fn message_received(&self, channel: &str, parts: &[MessagePart]) {
            self.messages
                .lock()
                .unwrap()
                .push((channel.to_string(), parts.to_vec()));
            self.push(format!("message {channel}"));
        }
        fn pending_messages_removed(&self, channel: &str, ids: &[u32]) {
            self.push(format!("removed {channel} {ids:?}"));
        }
        fn chat_state_changed(&self, channel: &str, contact: Handle, state: ChatState) {
            self.push(format!("chatstate {channel} {contact} {state:?}"));
        }
        fn members_changed(&self, channel: &str, added: &[Handle], removed: &[Handle]) {
            self.push(format!("members {channel} {added:?} {removed:?}"));
        }
        fn sasl_status_changed(&self, channel: &str, status: SaslStatus, reason: &str, details: &VariantMap) {
            let msg = details
                .get("server-message")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            self.push(format!("sasl {channel} {status:?} {reason} {msg}"));
        }
        fn rooms_received(&self, channel: &str, rooms: &[RoomInfo]) {
            self.push(format!("rooms {channel} {}", rooms.len()));
        }
        fn listing_rooms(&self, channel: &str, listing: bool) {
            self.push(format!("listing {channel} {listing}"));
        }
        fn search_state_changed(&self, channel: &str, state: SearchState, _error: &str) {
            self.push(format!("searchstate {channel} {state:?}"));
        }
        fn search_result_received(&self, channel: &str, result: &BTreeMap<String, Vec<ContactInfoField>>) {
            let keys: Vec<&String> = result.keys().collect();
            self.push(format!("searchresult {channel} {keys:?}"));
        }
        fn file_transfer_state_changed(&self, channel: &str, state: FileTransferState, data: Option<&[u8]>) {
            self.push(format!("transfer {channel} {state:?} {}", data.map_or(0, <[u8]>::len)));
        }
    }

    fn message(peer: PeerId, from: u32, id: u32) -> IncomingMessage {
        IncomingMessage {
            peer,
            from: PeerId::user(from),
            id,
            timestamp: 1_700_000_000,
            text: "hello".to_string(),
            flags: MessageFlags::default(),
            media: None,
        }
    }

    fn setup() -> (Dispatcher, HandleRegistry) {
        let mut registry = HandleRegistry::with_reserved_self(PeerClassifier::default());
        registry.bind_self(PeerId::user(1000));
        (Dispatcher::new("/conn"), registry)
    }

    #[test]
    fn one_channel_per_target() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::default();

        assert!(d.deliver(&mut reg, 1, &bus, &message(PeerId::user(42), 42, 1)));
        assert!(d.deliver(&mut reg, 1, &bus, &message(PeerId::user(42), 42, 2)));

        assert_eq!(bus.count("channel Text"), 1);
        assert_eq!(bus.count("message "), 2);

        let ch = &bus.channels.lock().unwrap()[0];
        assert_eq!(ch.target_handle_type, HandleType::Contact);
        assert_eq!(ch.target_id, "user42");
        assert_eq!(ch.initiator_handle, ch.target_handle);
        assert!(!ch.requested);
    }

    #[test]
    fn room_message_initiator_is_sender() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::default();

        assert!(d.deliver(&mut reg, 1, &bus, &message(PeerId::chat(5), 42, 1)));
        let ch = bus.channels.lock().unwrap()[0].clone();
        assert_eq!(ch.target_handle_type, HandleType::Room);
        assert_eq!(ch.target_handle, 1);
        assert_eq!(ch.initiator_id, "user42");
        assert_eq!(Some(ch.initiator_handle), reg.reverse_lookup(&PeerId::user(42), HandleType::Contact));

        let (_, parts) = bus.messages.lock().unwrap()[0].clone();
        assert_eq!(parts[0]["message-sender-id"], json!("user42"));
    }

    fn channel_post(id: u32) -> IncomingMessage {
        IncomingMessage {
            from: PeerId::channel(9),
            ..message(PeerId::channel(9), 0, id)
        }
    }

    #[test]
    fn channel_post_in_a_room_has_no_sender() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::default();

        assert!(d.deliver(&mut reg, 1, &bus, &channel_post(1)));
        assert!(reg.reverse_lookup(&PeerId::user(9), HandleType::Contact).is_none());
        assert!(reg.reverse_lookup(&PeerId::channel(9), HandleType::Contact).is_none());

        let ch = bus.channels.lock().unwrap()[0].clone();
        assert_eq!(ch.target_handle_type, HandleType::Room);
        assert_eq!(ch.initiator_handle, 0);
        assert_eq!(ch.initiator_id, "");

        let (_, parts) = bus.messages.lock().unwrap()[0].clone();
        assert!(parts[0].get("message-sender").is_none());
        assert!(parts[0].get("message-sender-id").is_none());
    }

    #[test]
    fn channel_post_as_contact_is_sent_by_the_channel() {
        let mut reg = HandleRegistry::with_reserved_self(PeerClassifier {
            broadcast_channels_as_contacts: true,
        });
        reg.bind_self(PeerId::user(1000));
        let mut d = Dispatcher::new("/conn");
        let bus = RecordingBus::default();

        assert!(d.deliver(&mut reg, 1, &bus, &channel_post(1)));
        assert!(reg.reverse_lookup(&PeerId::user(9), HandleType::Contact).is_none());
        let handle = reg
            .reverse_lookup(&PeerId::channel(9), HandleType::Contact)
            .unwrap();

        let (_, parts) = bus.messages.lock().unwrap()[0].clone();
        assert_eq!(parts[0]["message-sender"], json!(handle));
        assert_eq!(parts[0]["message-sender-id"], json!("channel9"));
    }

    #[test]
    fn outgoing_copy_is_initiated_by_self() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::default();
        let mut msg = message(PeerId::user(42), 1000, 1);
        msg.flags.out = true;
        assert!(d.deliver(&mut reg, 1, &bus, &msg));
        let ch = bus.channels.lock().unwrap()[0].clone();
        assert_eq!(ch.initiator_handle, 1);
        assert_eq!(ch.initiator_id, "user1000");
    }

    #[test]
    fn refused_channel_drops_the_message() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::refusing();

        assert!(!d.deliver(&mut reg, 1, &bus, &message(PeerId::user(42), 42, 1)));
        assert_eq!(bus.count("message "), 0);
        assert!(d.text_channels().next().is_none());

        // Handles were still created.
        assert!(reg.reverse_lookup(&PeerId::user(42), HandleType::Contact).is_some());
    }

    #[test]
    fn typing_only_reaches_existing_channels() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::default();

        d.typing(&mut reg, &bus, PeerId::user(42), 42, true);
        assert!(!bus.has("chatstate"));

        d.deliver(&mut reg, 1, &bus, &message(PeerId::user(42), 42, 1));
        d.typing(&mut reg, &bus, PeerId::user(42), 42, true);
        d.typing(&mut reg, &bus, PeerId::user(42), 42, false);
        let events = bus.events();
        assert!(events.iter().any(|e| e.ends_with("Composing")));
        assert!(events.iter().any(|e| e.ends_with("Active")));
    }

    #[test]
    fn read_receipts_and_resolution() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::default();
        d.deliver(&mut reg, 1, &bus, &message(PeerId::user(42), 42, 7));

        let key = ChannelKey {
            handle_type: HandleType::Contact,
            handle: reg.reverse_lookup(&PeerId::user(42), HandleType::Contact).unwrap(),
        };
        d.text_channel_mut(&key).unwrap().track_sent(555);

        d.sent_resolved(&bus, 555, 8);
        d.message_read(&reg, &bus, PeerId::user(42), 8, true);
        let reports: Vec<u64> = bus
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, p)| p[0].get("delivery-status").and_then(|v| v.as_u64()))
            .collect();
        assert_eq!(reports, vec![4, 5]);

        d.message_read(&reg, &bus, PeerId::user(42), 7, false);
        assert!(bus.has("removed"));
    }

    #[test]
    fn aux_channels_open_and_close() {
        let (mut d, _) = setup();
        let bus = RecordingBus::default();

        let rl = d.create_room_list(&bus).unwrap();
        let request = ChannelRequest {
            channel_type: TYPE_CONTACT_SEARCH.to_string(),
            search_limit: Some(5),
            requested: true,
            ..ChannelRequest::default()
        };
        let search = d.create_search(&bus, &request).unwrap();
        assert_eq!(d.search_mut(&search.path).unwrap().limit(), 5);

        d.close(&bus, &rl.path).unwrap();
        assert!(d.room_list_mut(&rl.path).is_err());
        assert!(d.close(&bus, &rl.path).is_err());

        d.close_all(&bus);
        assert!(d.search_mut(&search.path).is_err());
        assert_eq!(bus.count("closed"), 2);
    }

    #[test]
    fn members_are_diffed() {
        let (mut d, mut reg) = setup();
        let bus = RecordingBus::default();
        d.deliver(&mut reg, 1, &bus, &message(PeerId::chat(5), 42, 1));
        let key = ChannelKey {
            handle_type: HandleType::Room,
            handle: 1,
        };
        d.update_members(&bus, &key, vec![2, 3]);
        d.update_members(&bus, &key, vec![2, 3]);
        assert_eq!(bus.count("members"), 1);
    }
}
