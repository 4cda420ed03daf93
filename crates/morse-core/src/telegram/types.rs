use serde::{Deserialize, Serialize};

use crate::peer::PeerId;
use crate::presence::ContactStatus;

/// Default production DC used for a fresh login.
pub const DEFAULT_DC_ADDRESS: &str = "149.154.175.50";
pub const DEFAULT_DC_PORT: u16 = 443;

/// Connection state of the wrapped client, in the order it normally advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    AuthRequired,
    Authenticated,
    Ready,
}

impl ClientState {
    pub fn is_authenticated(self) -> bool {
        self >= ClientState::Authenticated
    }
}

/// Server endpoint for `init_connection`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DcOption {
    pub address: String,
    pub port: u16,
}

impl Default for DcOption {
    fn default() -> Self {
        Self {
            address: DEFAULT_DC_ADDRESS.to_string(),
            port: DEFAULT_DC_PORT,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: u32,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub phone: String,
    pub status: ContactStatus,
    pub avatar_token: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub peer: PeerId,
    pub title: String,
    pub participants_count: u32,
}

/// Why the server refused the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnauthorizedError {
    SessionPasswordNeeded,
    Other,
}

/// Why a sign-in attempt (code or password) was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthSignError {
    PhoneCodeExpired,
    PhoneCodeInvalid,
    PasswordHashInvalid,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageFlags {
    /// Sent by the local account (possibly from another device).
    pub out: bool,
    pub read: bool,
}

/// Downloadable attachment of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaInfo {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Conversation the message belongs to.
    pub peer: PeerId,
    /// Author: a user, or the channel itself for channel posts.
    pub from: PeerId,
    pub id: u32,
    /// Unix seconds.
    pub timestamp: u32,
    pub text: String,
    pub flags: MessageFlags,
    pub media: Option<MediaInfo>,
}

/// Opaque session blobs owned by the client library.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionBlobs {
    /// Credentials / auth key material.
    pub account: Vec<u8>,
    /// Dialog and update state.
    pub state: Vec<u8>,
}

impl SessionBlobs {
    pub fn is_empty(&self) -> bool {
        self.account.is_empty()
    }
}

/// Everything the client library can tell us, in delivery order.
#[derive(Clone, Debug, PartialEq)]
pub enum TelegramEvent {
    ConnectionStateChanged(ClientState),
    SelfUserAvailable(u32),
    PhoneCodeRequired,
    AuthorizationError {
        kind: UnauthorizedError,
        message: String,
    },
    PasswordInfoReceived {
        hint: String,
    },
    AuthSignError {
        kind: AuthSignError,
        message: String,
    },
    ContactListChanged,
    MessageReceived(IncomingMessage),
    ChatChanged(PeerId),
    ContactStatusChanged {
        user_id: u32,
        status: ContactStatus,
    },
    TypingStatusChanged {
        peer: PeerId,
        user_id: u32,
        typing: bool,
    },
    MessageRead {
        peer: PeerId,
        message_id: u32,
        /// `true`: the remote side read our messages.
        outbox: bool,
    },
    SentMessageResolved {
        random_id: u64,
        message_id: u32,
    },
    SentMessageFailed {
        random_id: u64,
    },
    AvatarReceived {
        user_id: u32,
        data: Vec<u8>,
        mime_type: String,
        token: String,
    },
    SearchComplete {
        query: String,
        peers: Vec<PeerId>,
    },
    FileDownloadFinished {
        file_id: String,
        result: Result<Vec<u8>, String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_covers_ready() {
        assert!(!ClientState::AuthRequired.is_authenticated());
        assert!(ClientState::Authenticated.is_authenticated());
        assert!(ClientState::Ready.is_authenticated());
    }
}
