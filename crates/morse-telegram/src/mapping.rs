//! Bot API identifiers and messages translated to core types.
//!
//! Bot API chat ids encode the peer kind: users are positive, basic groups
//! are negated, supergroups and channels are offset by `-10^12`. Ids that
//! do not fit the 32-bit peer space are dropped.

use teloxide::types::{ChatId, Message, User};

use morse_core::{
    peer::{PeerId, PeerKind},
    telegram::types::{ChatInfo, IncomingMessage, MediaInfo, MessageFlags, UserInfo},
};

pub const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

const DEFAULT_MIME: &str = "application/octet-stream";

pub fn peer_from_chat_id(raw: i64) -> Option<PeerId> {
    if raw > 0 {
        return u32::try_from(raw).ok().map(PeerId::user);
    }
    if raw <= -CHANNEL_ID_OFFSET {
        return u32::try_from(-raw - CHANNEL_ID_OFFSET).ok().map(PeerId::channel);
    }
    u32::try_from(-raw).ok().filter(|id| *id != 0).map(PeerId::chat)
}

pub fn chat_id(peer: PeerId) -> Option<ChatId> {
    let id = i64::from(peer.id());
    match peer.kind()? {
        PeerKind::User => Some(ChatId(id)),
        PeerKind::Chat => Some(ChatId(-id)),
        PeerKind::Channel => Some(ChatId(-CHANNEL_ID_OFFSET - id)),
    }
}

pub fn user_info(user: &User) -> Option<UserInfo> {
    Some(UserInfo {
        id: u32::try_from(user.id.0).ok()?,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone().unwrap_or_default(),
        username: user.username.clone().unwrap_or_default(),
        ..UserInfo::default()
    })
}

pub fn chat_info(msg: &Message) -> Option<ChatInfo> {
    Some(ChatInfo {
        peer: peer_from_chat_id(msg.chat.id.0)?,
        title: msg.chat.title().unwrap_or_default().to_string(),
        participants_count: 0,
    })
}

/// The downloadable attachment of a message, if any.
pub fn media(msg: &Message) -> Option<MediaInfo> {
    if let Some(doc) = msg.document() {
        return Some(MediaInfo {
            file_id: doc.file.id.clone(),
            file_name: doc.file_name.clone(),
            mime_type: doc
                .mime_type
                .as_ref()
                .map_or_else(|| DEFAULT_MIME.to_string(), ToString::to_string),
            size: u64::from(doc.file.size),
        });
    }
    if let Some(best) = msg.photo().and_then(<[_]>::last) {
        return Some(MediaInfo {
            file_id: best.file.id.clone(),
            file_name: None,
            mime_type: "image/jpeg".to_string(),
            size: u64::from(best.file.size),
        });
    }
    if let Some(voice) = msg.voice() {
        return Some(MediaInfo {
            file_id: voice.file.id.clone(),
            file_name: None,
            mime_type: voice
                .mime_type
                .as_ref()
                .map_or_else(|| "audio/ogg".to_string(), ToString::to_string),
            size: u64::from(voice.file.size),
        });
    }
    None
}

/// Translate a Bot API message. `self_id` marks messages the bot sent.
pub fn incoming(msg: &Message, self_id: u32) -> Option<IncomingMessage> {
    let peer = peer_from_chat_id(msg.chat.id.0)?;
    let from = match msg.from() {
        Some(user) => PeerId::user(u32::try_from(user.id.0).ok()?),
        // Channel posts carry no author; attribute them to the channel.
        None => peer,
    };
    Some(IncomingMessage {
        peer,
        from,
        id: u32::try_from(msg.id.0).ok()?,
        timestamp: u32::try_from(msg.date.timestamp()).unwrap_or_default(),
        text: msg
            .text()
            .or_else(|| msg.caption())
            .unwrap_or_default()
            .to_string(),
        flags: MessageFlags {
            out: from == PeerId::user(self_id),
            read: false,
        },
        media: media(msg),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn chat_ids_map_to_peers() {
        assert_eq!(peer_from_chat_id(42), Some(PeerId::user(42)));
        assert_eq!(peer_from_chat_id(-5), Some(PeerId::chat(5)));
        assert_eq!(peer_from_chat_id(-1_000_000_000_009), Some(PeerId::channel(9)));
        assert_eq!(peer_from_chat_id(0), None);
        assert_eq!(peer_from_chat_id(i64::from(u32::MAX) + 1), None);

        assert_eq!(chat_id(PeerId::channel(9)), Some(ChatId(-1_000_000_000_009)));
        assert_eq!(chat_id(PeerId::chat(5)), Some(ChatId(-5)));
        assert_eq!(chat_id(PeerId::default()), None);
    }

    #[test]
    fn private_text_message() {
        let msg = message(json!({
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": {"id": 42, "type": "private", "first_name": "Ada"},
            "from": {"id": 42, "is_bot": false, "first_name": "Ada", "username": "ada"},
            "text": "hello"
        }));
        let m = incoming(&msg, 1000).unwrap();
        assert_eq!(m.peer, PeerId::user(42));
        assert_eq!(m.from, PeerId::user(42));
        assert_eq!(m.id, 7);
        assert_eq!(m.timestamp, 1_700_000_000);
        assert_eq!(m.text, "hello");
        assert!(!m.flags.out);
        assert!(m.media.is_none());

        let user = user_info(msg.from().unwrap()).unwrap();
        assert_eq!(user.username, "ada");
        assert!(user.last_name.is_empty());
    }

    #[test]
    fn group_document_with_caption() {
        let msg = message(json!({
            "message_id": 8,
            "date": 1_700_000_000,
            "chat": {"id": -5, "type": "group", "title": "Friends"},
            "from": {"id": 1000, "is_bot": true, "first_name": "morse"},
            "caption": "notes",
            "document": {
                "file_id": "AgAD",
                "file_unique_id": "u1",
                "file_size": 10,
                "file_name": "notes.txt",
                "mime_type": "text/plain"
            }
        }));
        let m = incoming(&msg, 1000).unwrap();
        assert_eq!(m.peer, PeerId::chat(5));
        assert!(m.flags.out);
        assert_eq!(m.text, "notes");
        let media = m.media.unwrap();
        assert_eq!(media.file_id, "AgAD");
        assert_eq!(media.file_name.as_deref(), Some("notes.txt"));
        assert_eq!(media.mime_type, "text/plain");
        assert_eq!(media.size, 10);

        assert_eq!(chat_info(&msg).unwrap().title, "Friends");
    }

    #[test]
    fn channel_post_is_authored_by_the_channel() {
        let msg = message(json!({
            "message_id": 4,
            "date": 1_700_000_000,
            "chat": {"id": -1_000_000_000_009i64, "type": "channel", "title": "News"},
            "text": "breaking"
        }));
        let m = incoming(&msg, 9).unwrap();
        assert_eq!(m.peer, PeerId::channel(9));
        assert_eq!(m.from, PeerId::channel(9));
        assert_ne!(m.from, PeerId::user(9));
        assert!(!m.flags.out);
    }
}
