use serde_json::json;

use crate::{handles::Handle, ports::VariantMap};

use super::{ChannelDetails, ChannelKind, TYPE_TEXT};

/// One `RoomInfo` entry of a room listing.
#[derive(Clone, Debug, PartialEq)]
pub struct RoomInfo {
    pub handle: Handle,
    pub channel_type: String,
    pub info: VariantMap,
}

impl RoomInfo {
    pub fn new(handle: Handle, identifier: &str, title: Option<&str>, members: Option<u32>) -> Self {
        let mut info = VariantMap::new();
        info.insert("handle-name".into(), json!(identifier));
        info.insert("members-only".into(), json!(true));
        info.insert("invite-only".into(), json!(true));
        info.insert("password".into(), json!(false));
        if let Some(title) = title {
            info.insert("name".into(), json!(title));
        }
        if let Some(members) = members {
            info.insert("members".into(), json!(members));
        }
        Self {
            handle,
            channel_type: TYPE_TEXT.to_string(),
            info,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        json!([self.handle, self.channel_type, self.info])
    }
}

#[derive(Debug)]
pub struct RoomListChannel {
    details: ChannelDetails,
    listing: bool,
}

impl RoomListChannel {
    pub fn new(path: String) -> Self {
        let mut details = ChannelDetails::untargeted(path, ChannelKind::RoomList, true);
        details.extra.insert(
            "org.freedesktop.Telepathy.Channel.Type.RoomList.Server".into(),
            json!(""),
        );
        Self {
            details,
            listing: false,
        }
    }

    pub fn details(&self) -> &ChannelDetails {
        &self.details
    }

    pub fn listing(&self) -> bool {
        self.listing
    }

    /// Returns `true` when the listing state changed.
    pub fn set_listing(&mut self, listing: bool) -> bool {
        std::mem::replace(&mut self.listing, listing) != listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_info_fields() {
        let info = RoomInfo::new(3, "chat5", Some("Friends"), Some(4));
        assert_eq!(info.info["handle-name"], json!("chat5"));
        assert_eq!(info.info["name"], json!("Friends"));
        assert_eq!(info.info["members"], json!(4));
        assert_eq!(info.to_value()[0], json!(3));

        let bare = RoomInfo::new(4, "chat6", None, None);
        assert!(!bare.info.contains_key("name"));
    }

    #[test]
    fn listing_toggles() {
        let mut ch = RoomListChannel::new("/c/RoomListChannel1".into());
        assert!(ch.set_listing(true));
        assert!(!ch.set_listing(true));
        assert!(ch.listing());
        assert!(ch.set_listing(false));
    }
}
