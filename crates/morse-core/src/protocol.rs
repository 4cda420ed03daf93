//! Static description of the `telegram` protocol served by the `morse`
//! manager, plus account and contact normalisation.

use serde_json::{json, Value};

use crate::{
    channel::{
        PROP_CHANNEL_TYPE, PROP_TARGET_HANDLE_TYPE, TYPE_CONTACT_SEARCH, TYPE_ROOM_LIST, TYPE_TEXT,
    },
    config::*,
    errors::Error,
    handles::HandleType,
    peer::PeerId,
    ports::VariantMap,
    presence::STATUS_SPECS,
    Result,
};

pub const MANAGER_NAME: &str = "morse";
pub const PROTOCOL_NAME: &str = "telegram";
pub const ENGLISH_NAME: &str = "Telegram";
pub const ICON: &str = "telegram";
pub const VCARD_FIELD: &str = "tel";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamFlags {
    Required = 1,
    Secret = 4,
    HasDefault = 8,
    None = 0,
}

/// One connection-manager parameter: `(name, flags, D-Bus signature, default)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub flags: ParamFlags,
    pub signature: &'static str,
    pub default: Option<Value>,
}

impl ParamSpec {
    fn new(name: &'static str, flags: ParamFlags, signature: &'static str) -> Self {
        Self {
            name,
            flags,
            signature,
            default: None,
        }
    }

    pub fn to_value(&self) -> Value {
        json!([self.name, self.flags as u32, self.signature, self.default])
    }
}

pub fn parameters() -> Vec<ParamSpec> {
    let mut keepalive = ParamSpec::new(PARAM_KEEPALIVE_INTERVAL, ParamFlags::HasDefault, "u");
    keepalive.default = Some(json!(DEFAULT_KEEPALIVE_SECS));
    let mut broadcast = ParamSpec::new(PARAM_BROADCAST_AS_CONTACTS, ParamFlags::HasDefault, "b");
    broadcast.default = Some(json!(false));

    vec![
        ParamSpec::new(PARAM_ACCOUNT, ParamFlags::Required, "s"),
        ParamSpec::new(PARAM_SERVER_ADDRESS, ParamFlags::None, "s"),
        ParamSpec::new(PARAM_SERVER_PORT, ParamFlags::None, "q"),
        ParamSpec::new(PARAM_SERVER_KEY, ParamFlags::None, "s"),
        ParamSpec::new(PARAM_PROXY_TYPE, ParamFlags::None, "s"),
        ParamSpec::new(PARAM_PROXY_ADDRESS, ParamFlags::None, "s"),
        ParamSpec::new(PARAM_PROXY_PORT, ParamFlags::None, "q"),
        ParamSpec::new(PARAM_PROXY_USERNAME, ParamFlags::None, "s"),
        ParamSpec::new(PARAM_PROXY_PASSWORD, ParamFlags::Secret, "s"),
        keepalive,
        broadcast,
    ]
}

/// Channel classes clients may request: `(fixed properties, allowed properties)`.
pub fn requestable_channel_classes() -> Vec<(VariantMap, Vec<&'static str>)> {
    let class = |ty: &str, handle_type: HandleType| {
        let mut fixed = VariantMap::new();
        fixed.insert(PROP_CHANNEL_TYPE.into(), json!(ty));
        if handle_type != HandleType::None {
            fixed.insert(PROP_TARGET_HANDLE_TYPE.into(), json!(handle_type.as_u32()));
        }
        fixed
    };
    let targeted = vec![
        "org.freedesktop.Telepathy.Channel.TargetHandle",
        "org.freedesktop.Telepathy.Channel.TargetID",
    ];
    vec![
        (class(TYPE_TEXT, HandleType::Contact), targeted.clone()),
        (class(TYPE_TEXT, HandleType::Room), targeted),
        (class(TYPE_ROOM_LIST, HandleType::None), vec![]),
        (
            class(TYPE_CONTACT_SEARCH, HandleType::None),
            vec!["org.freedesktop.Telepathy.Channel.Type.ContactSearch.Limit"],
        ),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AvatarSpec {
    pub mime_types: &'static [&'static str],
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_bytes: u32,
}

pub const AVATAR_SPEC: AvatarSpec = AvatarSpec {
    mime_types: &["image/jpeg"],
    max_width: 160,
    max_height: 160,
    recommended_width: 160,
    recommended_height: 160,
    max_bytes: 10240,
};

/// Full protocol description, as served to the account manager.
pub fn describe() -> Value {
    let statuses: serde_json::Map<String, Value> = STATUS_SPECS
        .iter()
        .map(|s| {
            (
                s.name.to_string(),
                json!([s.kind as u32, s.may_set_on_self, s.can_have_message]),
            )
        })
        .collect();

    json!({
        "manager": MANAGER_NAME,
        "protocol": PROTOCOL_NAME,
        "english-name": ENGLISH_NAME,
        "icon": ICON,
        "vcard-field": VCARD_FIELD,
        "parameters": parameters().iter().map(ParamSpec::to_value).collect::<Vec<_>>(),
        "requestable-channel-classes": requestable_channel_classes()
            .into_iter()
            .map(|(fixed, allowed)| json!([fixed, allowed]))
            .collect::<Vec<_>>(),
        "statuses": statuses,
        "avatars": {
            "supported-mime-types": AVATAR_SPEC.mime_types,
            "max-width": AVATAR_SPEC.max_width,
            "max-height": AVATAR_SPEC.max_height,
            "recommended-width": AVATAR_SPEC.recommended_width,
            "recommended-height": AVATAR_SPEC.recommended_height,
            "max-bytes": AVATAR_SPEC.max_bytes,
        },
    })
}

/// Unique account name derived from the parameters.
pub fn identify_account(parameters: &VariantMap) -> Result<String> {
    ConnectionParams::from_parameters(parameters).map(|p| p.account.trim().to_string())
}

/// Canonical form of a contact identifier.
pub fn normalize_contact(contact_id: &str) -> Result<String> {
    let peer = PeerId::parse(contact_id.trim());
    if !peer.is_valid() {
        return Err(Error::InvalidHandle(format!(
            "'{contact_id}' is not a valid contact identifier"
        )));
    }
    Ok(peer.to_string())
}

/// Object path of a connection for `account`.
pub fn connection_object_path(account: &str) -> String {
    let escaped: String = account
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("/org/freedesktop/Telepathy/Connection/{MANAGER_NAME}/{PROTOCOL_NAME}/_{escaped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_is_the_only_required_parameter() {
        let params = parameters();
        let required: Vec<&str> = params
            .iter()
            .filter(|p| p.flags == ParamFlags::Required)
            .map(|p| p.name)
            .collect();
        assert_eq!(required, vec!["account"]);
        assert_eq!(params.len(), 11);
        let password = params.iter().find(|p| p.name == PARAM_PROXY_PASSWORD).unwrap();
        assert_eq!(password.flags, ParamFlags::Secret);
    }

    #[test]
    fn description_carries_avatar_and_statuses() {
        let d = describe();
        assert_eq!(d["avatars"]["max-bytes"], json!(10240));
        assert_eq!(d["avatars"]["supported-mime-types"], json!(["image/jpeg"]));
        assert_eq!(d["statuses"]["available"], json!([2, true, false]));
        assert_eq!(d["statuses"]["unknown"][1], json!(false));
        assert_eq!(d["requestable-channel-classes"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn normalize_and_identify() {
        assert_eq!(normalize_contact(" user42 ").unwrap(), "user42");
        assert!(normalize_contact("bob").is_err());

        let mut map = VariantMap::new();
        map.insert("account".into(), json!(" +79991234567 "));
        assert_eq!(identify_account(&map).unwrap(), "+79991234567");
        assert!(identify_account(&VariantMap::new()).is_err());
    }

    #[test]
    fn object_path_is_escaped() {
        assert_eq!(
            connection_object_path("+7999"),
            "/org/freedesktop/Telepathy/Connection/morse/telegram/__7999"
        );
    }
}
