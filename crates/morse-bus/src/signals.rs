//! [`MiddlewarePort`] as JSON-RPC notifications on a line channel.
//!
//! Every signal and every response goes through the same channel so that
//! one writer task owns stdout.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, warn};

use morse_core::{
    channel::{
        auth::SaslStatus, file_transfer::FileTransferState, room_list::RoomInfo,
        search::SearchState, text::ChatState, ChannelDetails, MessagePart,
    },
    contact_info::ContactInfoField,
    handles::Handle,
    ports::{ConnectionStatus, MiddlewarePort, StatusReason, VariantMap},
    presence::SimplePresence,
    roster::{ContactListState, ContactsChanged},
    Result,
};

use crate::rpc::{RpcNotification, RpcResponse};

pub type LineSender = mpsc::UnboundedSender<String>;

#[derive(Clone, Debug)]
pub struct StdioBus {
    out: LineSender,
}

impl StdioBus {
    pub fn new(out: LineSender) -> Self {
        Self { out }
    }

    fn send_line(&self, value: &impl Serialize) {
        match serde_json::to_string(value) {
            Ok(line) => {
                if self.out.send(line).is_err() {
                    debug!("output closed");
                }
            }
            Err(e) => warn!(error = %e, "unable to encode message"),
        }
    }

    fn signal(&self, method: &str, params: Value) {
        self.send_line(&RpcNotification::new(method, params));
    }

    pub fn respond(&self, response: &RpcResponse) {
        self.send_line(response);
    }
}

fn field_values(fields: &[ContactInfoField]) -> Vec<Value> {
    fields.iter().map(ContactInfoField::to_value).collect()
}

impl MiddlewarePort for StdioBus {
    fn status_changed(&self, status: ConnectionStatus, reason: StatusReason) {
        self.signal(
            "Connection.StatusChanged",
            json!({ "status": status as u32, "reason": reason as u32 }),
        );
    }

    fn self_contact_changed(&self, handle: Handle, identifier: &str) {
        self.signal(
            "Connection.SelfContactChanged",
            json!({ "handle": handle, "identifier": identifier }),
        );
    }

    fn presences_changed(&self, presences: &BTreeMap<Handle, SimplePresence>) {
        let presences: BTreeMap<Handle, Value> = presences
            .iter()
            .map(|(h, p)| (*h, p.to_value()))
            .collect();
        self.signal("SimplePresence.PresencesChanged", json!({ "presences": presences }));
    }

    fn contacts_changed(&self, delta: &ContactsChanged) {
        let changes: BTreeMap<Handle, Value> = delta
            .changes
            .iter()
            .map(|(h, s)| (*h, s.to_value()))
            .collect();
        self.signal(
            "ContactList.ContactsChangedWithID",
            json!({
                "changes": changes,
                "identifiers": delta.identifiers,
                "removals": delta.removals,
            }),
        );
    }

    fn contact_list_state_changed(&self, state: ContactListState) {
        self.signal(
            "ContactList.ContactListStateChanged",
            json!({ "state": state as u32 }),
        );
    }

    fn avatar_retrieved(&self, contact: Handle, token: &str, data: &[u8], mime_type: &str) {
        self.signal(
            "Avatars.AvatarRetrieved",
            json!({ "contact": contact, "token": token, "avatar": data, "type": mime_type }),
        );
    }

    fn new_channel(&self, channel: &ChannelDetails) -> Result<()> {
        self.signal(
            "Requests.NewChannels",
            json!({ "channels": [[channel.path, channel.properties()]] }),
        );
        Ok(())
    }

    fn channel_closed(&self, path: &str) {
        self.signal("Requests.ChannelClosed", json!({ "channel": path }));
    }

    fn message_received(&self, channel: &str, parts: &[MessagePart]) {
        self.signal(
            "Messages.MessageReceived",
            json!({ "channel": channel, "message": parts }),
        );
    }

    fn pending_messages_removed(&self, channel: &str, ids: &[u32]) {
        self.signal(
            "Messages.PendingMessagesRemoved",
            json!({ "channel": channel, "ids": ids }),
        );
    }

    fn chat_state_changed(&self, channel: &str, contact: Handle, state: ChatState) {
        self.signal(
            "ChatState.ChatStateChanged",
            json!({ "channel": channel, "contact": contact, "state": state as u32 }),
        );
    }

    fn members_changed(&self, channel: &str, added: &[Handle], removed: &[Handle]) {
        self.signal(
            "Group.MembersChanged",
            json!({ "channel": channel, "added": added, "removed": removed }),
        );
    }

    fn sasl_status_changed(&self, channel: &str, status: SaslStatus, reason: &str, details: &VariantMap) {
        self.signal(
            "SASLAuthentication.SASLStatusChanged",
            json!({
                "channel": channel,
                "status": status as u32,
                "reason": reason,
                "details": details,
            }),
        );
    }

    fn rooms_received(&self, channel: &str, rooms: &[RoomInfo]) {
        let rooms: Vec<Value> = rooms.iter().map(RoomInfo::to_value).collect();
        self.signal("RoomList.GotRooms", json!({ "channel": channel, "rooms": rooms }));
    }

    fn listing_rooms(&self, channel: &str, listing: bool) {
        self.signal(
            "RoomList.ListingRooms",
            json!({ "channel": channel, "listing": listing }),
        );
    }

    fn search_state_changed(&self, channel: &str, state: SearchState, error: &str) {
        self.signal(
            "ContactSearch.SearchStateChanged",
            json!({ "channel": channel, "state": state as u32, "error": error }),
        );
    }

    fn search_result_received(&self, channel: &str, result: &BTreeMap<String, Vec<ContactInfoField>>) {
        let result: BTreeMap<&String, Vec<Value>> = result
            .iter()
            .map(|(id, fields)| (id, field_values(fields)))
            .collect();
        self.signal(
            "ContactSearch.SearchResultReceived",
            json!({ "channel": channel, "result": result }),
        );
    }

    fn file_transfer_state_changed(&self, channel: &str, state: FileTransferState, data: Option<&[u8]>) {
        self.signal(
            "FileTransfer.FileTransferStateChanged",
            json!({ "channel": channel, "state": state as u32, "data": data }),
        );
    }
}

/// Drain `lines` into `writer`, one per line, until every sender is gone.
pub async fn write_lines<W>(mut lines: mpsc::UnboundedReceiver<String>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use morse_core::channel::ChannelKind;

    use super::*;

    fn bus() -> (StdioBus, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StdioBus::new(tx), rx)
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn status_is_a_notification() {
        let (bus, mut rx) = bus();
        bus.status_changed(ConnectionStatus::Disconnected, StatusReason::NetworkError);
        let v = next(&mut rx);
        assert_eq!(v["jsonrpc"], json!("2.0"));
        assert!(v.get("id").is_none());
        assert_eq!(v["method"], json!("Connection.StatusChanged"));
        assert_eq!(v["params"], json!({ "status": 2, "reason": 2 }));
    }

    #[test]
    fn new_channel_carries_immutable_properties() {
        let (bus, mut rx) = bus();
        let details = ChannelDetails::untargeted("/c/RoomListChannel1".to_string(), ChannelKind::RoomList, true);
        bus.new_channel(&details).unwrap();
        let v = next(&mut rx);
        let entry = &v["params"]["channels"][0];
        assert_eq!(entry[0], json!("/c/RoomListChannel1"));
        assert_eq!(
            entry[1]["org.freedesktop.Telepathy.Channel.ChannelType"],
            json!("org.freedesktop.Telepathy.Channel.Type.RoomList")
        );
    }

    #[test]
    fn presence_maps_are_keyed_by_handle() {
        let (bus, mut rx) = bus();
        let mut presences = BTreeMap::new();
        presences.insert(5, SimplePresence::offline());
        bus.presences_changed(&presences);
        let v = next(&mut rx);
        assert_eq!(v["params"]["presences"]["5"], json!([1, "offline", ""]));
    }

    #[tokio::test]
    async fn writer_frames_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("a".to_string()).unwrap();
        tx.send("b".to_string()).unwrap();
        drop(tx);
        let mut out = Vec::new();
        write_lines(rx, &mut out).await.unwrap();
        assert_eq!(out, b"a\nb\n");
    }
}
