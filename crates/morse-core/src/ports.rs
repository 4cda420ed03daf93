use std::collections::BTreeMap;

use crate::{
    channel::{
        auth::SaslStatus, file_transfer::FileTransferState, room_list::RoomInfo,
        search::SearchState, text::ChatState, ChannelDetails, MessagePart,
    },
    contact_info::ContactInfoField,
    handles::Handle,
    presence::SimplePresence,
    roster::{ContactListState, ContactsChanged},
    Result,
};

/// D-Bus `a{sv}` property map.
pub type VariantMap = BTreeMap<String, serde_json::Value>;

/// Middleware connection status, with the middleware's numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Connected = 0,
    Connecting = 1,
    Disconnected = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusReason {
    NoneSpecified = 0,
    Requested = 1,
    NetworkError = 2,
    AuthenticationFailed = 3,
}

/// Signals the connection emits towards the IM middleware.
///
/// Calls happen on the connection task, in event order. Implementations must
/// not block; the stdio bus adapter queues each call as a notification.
pub trait MiddlewarePort: Send + Sync {
    fn status_changed(&self, status: ConnectionStatus, reason: StatusReason);
    fn self_contact_changed(&self, handle: Handle, identifier: &str);

    fn presences_changed(&self, presences: &BTreeMap<Handle, SimplePresence>);
    fn contacts_changed(&self, delta: &ContactsChanged);
    fn contact_list_state_changed(&self, state: ContactListState);
    fn avatar_retrieved(&self, contact: Handle, token: &str, data: &[u8], mime_type: &str);

    /// Announce a channel. An error means the middleware refused it.
    fn new_channel(&self, channel: &ChannelDetails) -> Result<()>;
    fn channel_closed(&self, path: &str);

    fn message_received(&self, channel: &str, parts: &[MessagePart]);
    fn pending_messages_removed(&self, channel: &str, ids: &[u32]);
    fn chat_state_changed(&self, channel: &str, contact: Handle, state: ChatState);
    fn members_changed(&self, channel: &str, added: &[Handle], removed: &[Handle]);

    fn sasl_status_changed(&self, channel: &str, status: SaslStatus, reason: &str, details: &VariantMap);

    fn rooms_received(&self, channel: &str, rooms: &[RoomInfo]);
    fn listing_rooms(&self, channel: &str, listing: bool);

    fn search_state_changed(&self, channel: &str, state: SearchState, error: &str);
    fn search_result_received(&self, channel: &str, result: &BTreeMap<String, Vec<ContactInfoField>>);

    fn file_transfer_state_changed(&self, channel: &str, state: FileTransferState, data: Option<&[u8]>);
}
