//! Text channels: message-part translation, pending queue, delivery reports,
//! chat states and room membership.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::json;
use tracing::debug;

use crate::{
    errors::Error,
    handles::{Handle, HandleType},
    peer::PeerId,
    telegram::types::IncomingMessage,
    Result,
};

use super::{ChannelDetails, ChannelKey, MessagePart};

pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Message type values of the middleware.
pub const MESSAGE_TYPE_NORMAL: u32 = 0;
pub const MESSAGE_TYPE_DELIVERY_REPORT: u32 = 4;

/// Sent messages remembered for delivery reports, per channel. The oldest
/// is forgotten first; clients without read receipts never retire them.
pub const SENT_LIMIT: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    PermanentlyFailed = 3,
    Accepted = 4,
    Read = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatState {
    Gone = 0,
    Inactive = 1,
    Active = 2,
    Paused = 3,
    Composing = 4,
}

impl ChatState {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(ChatState::Gone),
            1 => Some(ChatState::Inactive),
            2 => Some(ChatState::Active),
            3 => Some(ChatState::Paused),
            4 => Some(ChatState::Composing),
            _ => None,
        }
    }
}

/// A message we sent, before and after the server assigned its id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SentMessage {
    random_id: u64,
    id: Option<u32>,
}

#[derive(Debug)]
pub struct TextChannel {
    details: ChannelDetails,
    target: PeerId,
    self_handle: Handle,
    members: BTreeSet<Handle>,
    sent: VecDeque<SentMessage>,
    /// pending-message-id -> Telegram message id (0 for delivery reports).
    pending: BTreeMap<u32, u32>,
    next_pending_id: u32,
}

impl TextChannel {
    pub fn new(details: ChannelDetails, target: PeerId, self_handle: Handle) -> Self {
        Self {
            details,
            target,
            self_handle,
            members: BTreeSet::new(),
            sent: VecDeque::new(),
            pending: BTreeMap::new(),
            next_pending_id: 0,
        }
    }

    pub fn details(&self) -> &ChannelDetails {
        &self.details
    }

    pub fn path(&self) -> &str {
        &self.details.path
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            handle_type: self.details.target_handle_type,
            handle: self.details.target_handle,
        }
    }

    pub fn target(&self) -> PeerId {
        self.target
    }

    pub fn is_room(&self) -> bool {
        self.details.target_handle_type == HandleType::Room
    }

    fn push_pending(&mut self, message_id: u32) -> u32 {
        self.next_pending_id += 1;
        self.pending.insert(self.next_pending_id, message_id);
        self.next_pending_id
    }

    /// Translate an inbound message into a middleware part list and queue it.
    pub fn receive(
        &mut self,
        message: &IncomingMessage,
        sender: Option<(Handle, &str)>,
        received: i64,
    ) -> Vec<MessagePart> {
        let pending_id = self.push_pending(message.id);

        let mut header = MessagePart::new();
        header.insert("message-token".into(), json!(message.id.to_string()));
        header.insert("message-type".into(), json!(MESSAGE_TYPE_NORMAL));
        header.insert("message-sent".into(), json!(message.timestamp));
        header.insert("message-received".into(), json!(received));
        header.insert("pending-message-id".into(), json!(pending_id));
        if message.flags.out {
            header.insert("message-sender".into(), json!(self.self_handle));
        } else if let Some((sender, sender_id)) = sender {
            header.insert("message-sender".into(), json!(sender));
            header.insert("message-sender-id".into(), json!(sender_id));
        }
        if message.flags.read {
            header.insert("scrollback".into(), json!(true));
        }

        let mut parts = vec![header];

        if !message.text.is_empty() {
            let mut body = MessagePart::new();
            body.insert("content-type".into(), json!(CONTENT_TYPE_TEXT));
            body.insert("content".into(), json!(message.text));
            parts.push(body);
        }

        if let Some(media) = &message.media {
            let mut attachment = MessagePart::new();
            attachment.insert("content-type".into(), json!(media.mime_type));
            attachment.insert("identifier".into(), json!(media.file_id));
            attachment.insert("needs-retrieval".into(), json!(true));
            attachment.insert("size".into(), json!(media.size));
            if let Some(name) = &media.file_name {
                attachment.insert("filename".into(), json!(name));
            }
            parts.push(attachment);
        }

        parts
    }

    /// Extract the text to send: the first `text/plain` body part.
    pub fn outgoing_text(parts: &[MessagePart]) -> Result<String> {
        parts
            .iter()
            .skip(1)
            .find(|p| {
                p.get("content-type").and_then(|v| v.as_str()) == Some(CONTENT_TYPE_TEXT)
                    && p.contains_key("content")
            })
            .and_then(|p| p.get("content"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidArgument("message has no text/plain part".to_string()))
    }

    /// Remember a sent message; returns its middleware token.
    pub fn track_sent(&mut self, random_id: u64) -> String {
        if self.sent.len() >= SENT_LIMIT {
            if let Some(old) = self.sent.pop_front() {
                debug!(random_id = old.random_id, "forgetting oldest sent message");
            }
        }
        self.sent.push_back(SentMessage {
            random_id,
            id: None,
        });
        random_id.to_string()
    }

    pub fn has_sent(&self, random_id: u64) -> bool {
        self.sent.iter().any(|s| s.random_id == random_id)
    }

    /// Server accepted a sent message. Returns the `accepted` report.
    pub fn resolve_sent(&mut self, random_id: u64, message_id: u32, received: i64) -> Option<Vec<MessagePart>> {
        let entry = self.sent.iter_mut().find(|s| s.random_id == random_id)?;
        entry.id = Some(message_id);
        Some(self.delivery_report(random_id, DeliveryStatus::Accepted, received))
    }

    /// The send never reached the server. Returns the failure report and
    /// forgets the message.
    pub fn fail_sent(&mut self, random_id: u64, received: i64) -> Option<Vec<MessagePart>> {
        let pos = self.sent.iter().position(|s| s.random_id == random_id)?;
        self.sent.remove(pos);
        Some(self.delivery_report(random_id, DeliveryStatus::PermanentlyFailed, received))
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    /// Remote side read our messages up to `up_to`. Returns one `read`
    /// report per affected message and forgets them.
    pub fn outbox_read(&mut self, up_to: u32, received: i64) -> Vec<Vec<MessagePart>> {
        let (read, keep): (Vec<SentMessage>, Vec<SentMessage>) = self
            .sent
            .iter()
            .copied()
            .partition(|s| matches!(s.id, Some(id) if id <= up_to));
        self.sent = keep.into();
        read.into_iter()
            .map(|s| self.delivery_report(s.random_id, DeliveryStatus::Read, received))
            .collect()
    }

    fn delivery_report(&mut self, random_id: u64, status: DeliveryStatus, received: i64) -> Vec<MessagePart> {
        let pending_id = self.push_pending(0);

        let mut header = MessagePart::new();
        header.insert("message-type".into(), json!(MESSAGE_TYPE_DELIVERY_REPORT));
        header.insert("message-sender".into(), json!(self.details.target_handle));
        header.insert("message-sender-id".into(), json!(self.details.target_id));
        header.insert("message-received".into(), json!(received));
        header.insert("pending-message-id".into(), json!(pending_id));
        header.insert("delivery-status".into(), json!(status as u32));
        header.insert("delivery-token".into(), json!(random_id.to_string()));
        vec![header]
    }

    /// Drop acknowledged messages. Returns the newest Telegram message id
    /// among them, if any were real messages.
    pub fn acknowledge(&mut self, ids: &[u32]) -> Result<Option<u32>> {
        if let Some(unknown) = ids.iter().find(|id| !self.pending.contains_key(*id)) {
            return Err(Error::InvalidArgument(format!(
                "unknown pending message id {unknown}"
            )));
        }
        let newest = ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .filter(|m| *m != 0)
            .max();
        Ok(newest)
    }

    /// Our inbox was read elsewhere: drop pending messages up to `up_to`.
    pub fn inbox_read(&mut self, up_to: u32) -> Vec<u32> {
        let ids: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, m)| **m != 0 && **m <= up_to)
            .map(|(p, _)| *p)
            .collect();
        for id in &ids {
            self.pending.remove(id);
        }
        ids
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Replace the room member list. Returns `(added, removed)`.
    pub fn set_members(&mut self, members: impl IntoIterator<Item = Handle>) -> (Vec<Handle>, Vec<Handle>) {
        let next: BTreeSet<Handle> = members.into_iter().collect();
        let added = next.difference(&self.members).copied().collect();
        let removed = self.members.difference(&next).copied().collect();
        self.members = next;
        (added, removed)
    }

    pub fn members(&self) -> impl Iterator<Item = Handle> + '_ {
        self.members.iter().copied()
    }
}

pub fn typing_state(typing: bool) -> ChatState {
    if typing {
        ChatState::Composing
    } else {
        ChatState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use crate::telegram::types::{MediaInfo, MessageFlags};

    fn channel() -> TextChannel {
        let details = ChannelDetails {
            path: "/conn/TextChannel1".to_string(),
            kind: ChannelKind::Text,
            target_handle_type: HandleType::Contact,
            target_handle: 2,
            target_id: "user42".to_string(),
            initiator_handle: 2,
            initiator_id: "user42".to_string(),
            requested: false,
            extra: Default::default(),
        };
        TextChannel::new(details, PeerId::user(42), 1)
    }

    fn incoming(id: u32, text: &str) -> IncomingMessage {
        IncomingMessage {
            peer: PeerId::user(42),
            from: PeerId::user(42),
            id,
            timestamp: 1_700_000_000,
            text: text.to_string(),
            flags: MessageFlags::default(),
            media: None,
        }
    }

    #[test]
    fn incoming_text_becomes_header_and_body() {
        let mut ch = channel();
        let parts = ch.receive(&incoming(10, "hi"), Some((2, "user42")), 1_700_000_005);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["message-token"], json!("10"));
        assert_eq!(parts[0]["message-sender"], json!(2));
        assert_eq!(parts[0]["message-sender-id"], json!("user42"));
        assert_eq!(parts[0]["pending-message-id"], json!(1));
        assert_eq!(parts[1]["content-type"], json!("text/plain"));
        assert_eq!(parts[1]["content"], json!("hi"));
        assert_eq!(ch.pending_count(), 1);
    }

    #[test]
    fn outgoing_copy_is_attributed_to_self() {
        let mut ch = channel();
        let mut msg = incoming(11, "from phone");
        msg.flags.out = true;
        let parts = ch.receive(&msg, Some((2, "user42")), 0);
        assert_eq!(parts[0]["message-sender"], json!(1));
        assert!(!parts[0].contains_key("message-sender-id"));
    }

    #[test]
    fn media_becomes_attachment_part() {
        let mut ch = channel();
        let mut msg = incoming(12, "");
        msg.media = Some(MediaInfo {
            file_id: "AgAD".to_string(),
            file_name: Some("cat.jpg".to_string()),
            mime_type: "image/jpeg".to_string(),
            size: 2048,
        });
        let parts = ch.receive(&msg, Some((2, "user42")), 0);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["identifier"], json!("AgAD"));
        assert_eq!(parts[1]["filename"], json!("cat.jpg"));
    }

    #[test]
    fn outgoing_text_takes_first_plain_part() {
        let mut header = MessagePart::new();
        header.insert("message-type".into(), json!(0));
        let mut html = MessagePart::new();
        html.insert("content-type".into(), json!("text/html"));
        html.insert("content".into(), json!("<b>x</b>"));
        let mut plain = MessagePart::new();
        plain.insert("content-type".into(), json!("text/plain"));
        plain.insert("content".into(), json!("x"));

        let text = TextChannel::outgoing_text(&[header.clone(), html, plain]).unwrap();
        assert_eq!(text, "x");
        assert!(TextChannel::outgoing_text(&[header]).is_err());
    }

    #[test]
    fn delivery_reports_follow_resolution_and_read() {
        let mut ch = channel();
        assert_eq!(ch.track_sent(777), "777");
        ch.track_sent(778);

        let accepted = ch.resolve_sent(777, 50, 0).unwrap();
        assert_eq!(accepted[0]["delivery-status"], json!(4));
        assert_eq!(accepted[0]["delivery-token"], json!("777"));
        assert!(ch.resolve_sent(1, 51, 0).is_none());

        // 778 is unresolved, so only 777 is read.
        let read = ch.outbox_read(60, 0);
        assert_eq!(read.len(), 1);
        assert_eq!(read[0][0]["delivery-status"], json!(5));
        assert!(!ch.has_sent(777));
        assert!(ch.has_sent(778));
    }

    #[test]
    fn failed_send_is_reported_and_forgotten() {
        let mut ch = channel();
        ch.track_sent(777);
        let failed = ch.fail_sent(777, 0).unwrap();
        assert_eq!(failed[0]["delivery-status"], json!(3));
        assert_eq!(failed[0]["delivery-token"], json!("777"));
        assert!(!ch.has_sent(777));
        assert!(ch.fail_sent(777, 0).is_none());
    }

    #[test]
    fn sent_messages_are_bounded() {
        let mut ch = channel();
        for random_id in 0..SENT_LIMIT as u64 + 10 {
            ch.track_sent(random_id);
            ch.resolve_sent(random_id, u32::try_from(random_id).unwrap() + 1, 0);
        }
        assert_eq!(ch.sent_count(), SENT_LIMIT);
        assert!(!ch.has_sent(0));
        assert!(!ch.has_sent(9));
        assert!(ch.has_sent(10));
        assert!(ch.has_sent(SENT_LIMIT as u64 + 9));
    }

    #[test]
    fn acknowledge_reports_newest_message() {
        let mut ch = channel();
        ch.receive(&incoming(10, "a"), Some((2, "user42")), 0);
        ch.receive(&incoming(14, "b"), Some((2, "user42")), 0);
        assert!(ch.acknowledge(&[9]).is_err());
        assert_eq!(ch.acknowledge(&[1, 2]).unwrap(), Some(14));
        assert_eq!(ch.pending_count(), 0);
    }

    #[test]
    fn inbox_read_drops_seen_messages() {
        let mut ch = channel();
        ch.receive(&incoming(10, "a"), Some((2, "user42")), 0);
        ch.receive(&incoming(20, "b"), Some((2, "user42")), 0);
        assert_eq!(ch.inbox_read(15), vec![1]);
        assert_eq!(ch.pending_count(), 1);
    }

    #[test]
    fn member_diff() {
        let mut ch = channel();
        assert_eq!(ch.set_members([3, 4]), (vec![3, 4], vec![]));
        assert_eq!(ch.set_members([4, 5]), (vec![5], vec![3]));
        assert_eq!(ch.members().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn typing_maps_to_composing_or_active() {
        assert_eq!(typing_state(true), ChatState::Composing);
        assert_eq!(typing_state(false), ChatState::Active);
        assert_eq!(ChatState::from_u32(4), Some(ChatState::Composing));
        assert_eq!(ChatState::from_u32(9), None);
    }
}
