//! Middleware channel objects and the request maps that create them.

pub mod auth;
pub mod file_transfer;
pub mod room_list;
pub mod search;
pub mod text;

use serde_json::{json, Value};

use crate::{
    errors::Error,
    handles::{Handle, HandleType},
    ports::VariantMap,
    Result,
};

pub const IFACE_CHANNEL: &str = "org.freedesktop.Telepathy.Channel";
pub const TYPE_TEXT: &str = "org.freedesktop.Telepathy.Channel.Type.Text";
pub const TYPE_ROOM_LIST: &str = "org.freedesktop.Telepathy.Channel.Type.RoomList";
pub const TYPE_CONTACT_SEARCH: &str = "org.freedesktop.Telepathy.Channel.Type.ContactSearch";
pub const TYPE_SERVER_AUTHENTICATION: &str =
    "org.freedesktop.Telepathy.Channel.Type.ServerAuthentication";
pub const TYPE_FILE_TRANSFER: &str = "org.freedesktop.Telepathy.Channel.Type.FileTransfer";

pub const PROP_CHANNEL_TYPE: &str = "org.freedesktop.Telepathy.Channel.ChannelType";
pub const PROP_TARGET_HANDLE_TYPE: &str = "org.freedesktop.Telepathy.Channel.TargetHandleType";
pub const PROP_TARGET_HANDLE: &str = "org.freedesktop.Telepathy.Channel.TargetHandle";
pub const PROP_TARGET_ID: &str = "org.freedesktop.Telepathy.Channel.TargetID";
pub const PROP_INITIATOR_HANDLE: &str = "org.freedesktop.Telepathy.Channel.InitiatorHandle";
pub const PROP_INITIATOR_ID: &str = "org.freedesktop.Telepathy.Channel.InitiatorID";
pub const PROP_REQUESTED: &str = "org.freedesktop.Telepathy.Channel.Requested";
pub const PROP_SEARCH_LIMIT: &str = "org.freedesktop.Telepathy.Channel.Type.ContactSearch.Limit";
pub const PROP_FILE_ID: &str = "org.freedesktop.Telepathy.Channel.Type.FileTransfer.FileId";

/// One part of a middleware message (`a{sv}`); part 0 is the header.
pub type MessagePart = VariantMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Text,
    RoomList,
    ContactSearch,
    ServerAuthentication,
    FileTransfer,
}

impl ChannelKind {
    pub fn from_type(s: &str) -> Option<Self> {
        match s {
            TYPE_TEXT => Some(ChannelKind::Text),
            TYPE_ROOM_LIST => Some(ChannelKind::RoomList),
            TYPE_CONTACT_SEARCH => Some(ChannelKind::ContactSearch),
            TYPE_SERVER_AUTHENTICATION => Some(ChannelKind::ServerAuthentication),
            TYPE_FILE_TRANSFER => Some(ChannelKind::FileTransfer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Text => TYPE_TEXT,
            ChannelKind::RoomList => TYPE_ROOM_LIST,
            ChannelKind::ContactSearch => TYPE_CONTACT_SEARCH,
            ChannelKind::ServerAuthentication => TYPE_SERVER_AUTHENTICATION,
            ChannelKind::FileTransfer => TYPE_FILE_TRANSFER,
        }
    }
}

/// Identity of a text channel: one per target for the connection lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub handle_type: HandleType,
    pub handle: Handle,
}

/// Immutable properties of an announced channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelDetails {
    pub path: String,
    pub kind: ChannelKind,
    pub target_handle_type: HandleType,
    pub target_handle: Handle,
    pub target_id: String,
    pub initiator_handle: Handle,
    pub initiator_id: String,
    pub requested: bool,
    /// Type-specific immutable properties.
    pub extra: VariantMap,
}

impl ChannelDetails {
    pub fn untargeted(path: String, kind: ChannelKind, requested: bool) -> Self {
        Self {
            path,
            kind,
            target_handle_type: HandleType::None,
            target_handle: 0,
            target_id: String::new(),
            initiator_handle: 0,
            initiator_id: String::new(),
            requested,
            extra: VariantMap::new(),
        }
    }

    pub fn properties(&self) -> VariantMap {
        let mut props = self.extra.clone();
        props.insert(PROP_CHANNEL_TYPE.into(), json!(self.kind.as_str()));
        props.insert(
            PROP_TARGET_HANDLE_TYPE.into(),
            json!(self.target_handle_type.as_u32()),
        );
        props.insert(PROP_TARGET_HANDLE.into(), json!(self.target_handle));
        props.insert(PROP_TARGET_ID.into(), json!(self.target_id));
        props.insert(PROP_INITIATOR_HANDLE.into(), json!(self.initiator_handle));
        props.insert(PROP_INITIATOR_ID.into(), json!(self.initiator_id));
        props.insert(PROP_REQUESTED.into(), json!(self.requested));
        props
    }
}

/// A `CreateChannel`/`EnsureChannel` request map, decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelRequest {
    pub channel_type: String,
    /// Raw value; validated by the caller against the channel type.
    pub target_handle_type: Option<u32>,
    pub target_handle: Option<Handle>,
    pub target_id: Option<String>,
    pub initiator_handle: Option<Handle>,
    pub requested: bool,
    pub search_limit: Option<u32>,
    pub file_id: Option<String>,
}

impl ChannelRequest {
    pub fn from_map(map: &VariantMap) -> Result<Self> {
        let channel_type = opt_str(map, PROP_CHANNEL_TYPE)?.ok_or_else(|| {
            Error::InvalidArgument("ChannelType is missing from the request".to_string())
        })?;

        Ok(Self {
            channel_type,
            target_handle_type: opt_u32(map, PROP_TARGET_HANDLE_TYPE)?,
            target_handle: opt_u32(map, PROP_TARGET_HANDLE)?,
            target_id: opt_str(map, PROP_TARGET_ID)?,
            initiator_handle: opt_u32(map, PROP_INITIATOR_HANDLE)?,
            // A request coming over the bus is a local request unless it says otherwise.
            requested: opt_bool(map, PROP_REQUESTED)?.unwrap_or(true),
            search_limit: opt_u32(map, PROP_SEARCH_LIMIT)?,
            file_id: opt_str(map, PROP_FILE_ID)?,
        })
    }

    pub fn kind(&self) -> Option<ChannelKind> {
        ChannelKind::from_type(&self.channel_type)
    }
}

fn opt_str(map: &VariantMap, key: &str) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::InvalidArgument(format!("{key} must be a string"))),
    }
}

fn opt_u32(map: &VariantMap, key: &str) -> Result<Option<u32>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument(format!("{key} must be an unsigned 32-bit integer"))),
    }
}

fn opt_bool(map: &VariantMap, key: &str) -> Result<Option<bool>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::InvalidArgument(format!("{key} must be a boolean"))),
    }
}

/// Allocates unique object paths below the connection's path.
#[derive(Debug)]
pub struct ChannelPaths {
    base: String,
    next: u32,
}

impl ChannelPaths {
    pub fn new(connection_path: &str) -> Self {
        Self {
            base: connection_path.to_string(),
            next: 0,
        }
    }

    pub fn allocate(&mut self, kind: ChannelKind) -> String {
        self.next += 1;
        let prefix = match kind {
            ChannelKind::Text => "TextChannel",
            ChannelKind::RoomList => "RoomListChannel",
            ChannelKind::ContactSearch => "ContactSearchChannel",
            ChannelKind::ServerAuthentication => "ServerAuthChannel",
            ChannelKind::FileTransfer => "FileTransferChannel",
        };
        format!("{}/{}{}", self.base, prefix, self.next)
    }
}
