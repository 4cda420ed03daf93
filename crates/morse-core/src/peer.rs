use std::fmt;

use serde::{Deserialize, Serialize};

const USER_PREFIX: &str = "user";
const CHAT_PREFIX: &str = "chat";
const CHANNEL_PREFIX: &str = "channel";

/// Telegram peer namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

impl PeerKind {
    fn prefix(self) -> &'static str {
        match self {
            PeerKind::User => USER_PREFIX,
            PeerKind::Chat => CHAT_PREFIX,
            PeerKind::Channel => CHANNEL_PREFIX,
        }
    }
}

/// A user, group chat or broadcast channel, as seen by the Telegram client.
///
/// The default value is the null identifier: no kind, id 0. It is what
/// [`PeerId::parse`] returns for anything it does not understand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct PeerId {
    kind: Option<PeerKind>,
    id: u32,
}

impl PeerId {
    pub fn user(id: u32) -> Self {
        Self {
            kind: Some(PeerKind::User),
            id,
        }
    }

    pub fn chat(id: u32) -> Self {
        Self {
            kind: Some(PeerKind::Chat),
            id,
        }
    }

    pub fn channel(id: u32) -> Self {
        Self {
            kind: Some(PeerKind::Channel),
            id,
        }
    }

    pub fn new(kind: PeerKind, id: u32) -> Self {
        Self {
            kind: Some(kind),
            id,
        }
    }

    pub fn kind(&self) -> Option<PeerKind> {
        self.kind
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.kind.is_some() && self.id != 0
    }

    pub fn is_user(&self) -> bool {
        self.kind == Some(PeerKind::User)
    }

    /// User id if this is a valid user peer.
    pub fn user_id(&self) -> Option<u32> {
        (self.is_user() && self.id != 0).then_some(self.id)
    }

    /// Parse `user<id>`, `chat<id>` or `channel<id>`.
    ///
    /// Never fails: anything else yields the null identifier.
    pub fn parse(s: &str) -> Self {
        for kind in [PeerKind::Channel, PeerKind::Chat, PeerKind::User] {
            let Some(digits) = s.strip_prefix(kind.prefix()) else {
                continue;
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Self::default();
            }
            return match digits.parse::<u32>() {
                Ok(id) => Self::new(kind, id),
                Err(_) => Self::default(),
            };
        }
        Self::default()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{}{}", kind.prefix(), self.id),
            None => Ok(()),
        }
    }
}

impl From<PeerId> for String {
    fn from(p: PeerId) -> Self {
        p.to_string()
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId::parse(&s)
    }
}
