use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde_json::{json, Value};

use crate::{
    errors::Error,
    handles::PeerClassifier,
    ports::VariantMap,
    telegram::types::DcOption,
    Result,
};

pub const PARAM_ACCOUNT: &str = "account";
pub const PARAM_SERVER_ADDRESS: &str = "server-address";
pub const PARAM_SERVER_PORT: &str = "server-port";
pub const PARAM_SERVER_KEY: &str = "server-key";
pub const PARAM_PROXY_TYPE: &str = "proxy-type";
pub const PARAM_PROXY_ADDRESS: &str = "proxy-address";
pub const PARAM_PROXY_PORT: &str = "proxy-port";
pub const PARAM_PROXY_USERNAME: &str = "proxy-username";
pub const PARAM_PROXY_PASSWORD: &str = "proxy-password";
pub const PARAM_KEEPALIVE_INTERVAL: &str = "keepalive-interval";
pub const PARAM_BROADCAST_AS_CONTACTS: &str = "broadcast-channels-as-contacts";

pub const DEFAULT_KEEPALIVE_SECS: u32 = 15;
pub const DEFAULT_SERVER_PORT: u16 = 443;
pub const PROXY_TYPE_SOCKS5: &str = "socks5";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    pub address: String,
    pub port: u16,
    /// Public RSA key file of the custom server.
    pub key_file: Option<PathBuf>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySettings")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connection parameters, as handed over by the middleware's account manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    pub account: String,
    pub server: Option<ServerSettings>,
    pub proxy: Option<ProxySettings>,
    pub keepalive_interval: Duration,
    pub broadcast_channels_as_contacts: bool,
}

impl ConnectionParams {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            server: None,
            proxy: None,
            keepalive_interval: Duration::from_secs(u64::from(DEFAULT_KEEPALIVE_SECS)),
            broadcast_channels_as_contacts: false,
        }
    }

    pub fn from_parameters(map: &VariantMap) -> Result<Self> {
        let account = param_str(map, PARAM_ACCOUNT)?
            .and_then(non_empty)
            .ok_or_else(|| Error::Config(format!("'{PARAM_ACCOUNT}' parameter is required")))?;

        let server = match param_str(map, PARAM_SERVER_ADDRESS)?.and_then(non_empty) {
            Some(address) => Some(ServerSettings {
                address,
                port: param_port(map, PARAM_SERVER_PORT)?.unwrap_or(DEFAULT_SERVER_PORT),
                key_file: param_str(map, PARAM_SERVER_KEY)?
                    .and_then(non_empty)
                    .map(PathBuf::from),
            }),
            None => None,
        };

        let proxy = match param_str(map, PARAM_PROXY_ADDRESS)?.and_then(non_empty) {
            Some(address) => {
                let kind = param_str(map, PARAM_PROXY_TYPE)?.unwrap_or_default();
                if !kind.trim().eq_ignore_ascii_case(PROXY_TYPE_SOCKS5) {
                    return Err(Error::Config(format!(
                        "unsupported proxy type '{kind}' (only '{PROXY_TYPE_SOCKS5}')"
                    )));
                }
                let port = param_port(map, PARAM_PROXY_PORT)?.ok_or_else(|| {
                    Error::Config(format!("'{PARAM_PROXY_PORT}' is required with a proxy"))
                })?;
                Some(ProxySettings {
                    address,
                    port,
                    username: param_str(map, PARAM_PROXY_USERNAME)?.and_then(non_empty),
                    password: param_str(map, PARAM_PROXY_PASSWORD)?.and_then(non_empty),
                })
            }
            None => None,
        };

        let keepalive = match map.get(PARAM_KEEPALIVE_INTERVAL) {
            None | Some(Value::Null) => DEFAULT_KEEPALIVE_SECS,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    Error::Config(format!("'{PARAM_KEEPALIVE_INTERVAL}' must be a number of seconds"))
                })?,
        };

        let broadcast_channels_as_contacts = match map.get(PARAM_BROADCAST_AS_CONTACTS) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(Error::Config(format!(
                    "'{PARAM_BROADCAST_AS_CONTACTS}' must be a boolean"
                )))
            }
        };

        Ok(Self {
            account,
            server,
            proxy,
            keepalive_interval: Duration::from_secs(u64::from(keepalive)),
            broadcast_channels_as_contacts,
        })
    }

    /// Directory name for a custom server; `None` for the official one.
    pub fn server_identifier(&self) -> Option<String> {
        self.server
            .as_ref()
            .map(|s| format!("{}_{}", s.address, s.port))
    }

    pub fn dc_option(&self) -> DcOption {
        match &self.server {
            Some(s) => DcOption {
                address: s.address.clone(),
                port: s.port,
            },
            None => DcOption::default(),
        }
    }

    pub fn classifier(&self) -> PeerClassifier {
        PeerClassifier {
            broadcast_channels_as_contacts: self.broadcast_channels_as_contacts,
        }
    }
}

/// Process configuration for the standalone binary.
#[derive(Clone, Debug)]
pub struct Config {
    pub params: ConnectionParams,
    pub data_dir: PathBuf,
    /// Credential for the Bot API client adapter.
    pub telegram_bot_token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let mut map = VariantMap::new();
        if let Some(account) = env_str("MORSE_ACCOUNT") {
            map.insert(PARAM_ACCOUNT.into(), json!(account));
        }
        for (key, param) in [
            ("MORSE_SERVER_ADDRESS", PARAM_SERVER_ADDRESS),
            ("MORSE_SERVER_KEY", PARAM_SERVER_KEY),
            ("MORSE_PROXY_TYPE", PARAM_PROXY_TYPE),
            ("MORSE_PROXY_ADDRESS", PARAM_PROXY_ADDRESS),
            ("MORSE_PROXY_USERNAME", PARAM_PROXY_USERNAME),
            ("MORSE_PROXY_PASSWORD", PARAM_PROXY_PASSWORD),
        ] {
            if let Some(v) = env_str(key) {
                map.insert(param.into(), json!(v));
            }
        }
        for (key, param) in [
            ("MORSE_SERVER_PORT", PARAM_SERVER_PORT),
            ("MORSE_PROXY_PORT", PARAM_PROXY_PORT),
            ("MORSE_KEEPALIVE_INTERVAL", PARAM_KEEPALIVE_INTERVAL),
        ] {
            if let Some(v) = env_u64_strict(key)? {
                map.insert(param.into(), json!(v));
            }
        }
        if let Some(b) = env_bool("MORSE_BROADCAST_AS_CONTACTS") {
            map.insert(PARAM_BROADCAST_AS_CONTACTS.into(), json!(b));
        }

        let params = ConnectionParams::from_parameters(&map)?;

        let data_dir = env_path("MORSE_DATA_DIR")
            .or_else(dirs::data_dir)
            .ok_or_else(|| {
                Error::Config("no data directory; set MORSE_DATA_DIR".to_string())
            })?;

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty);

        Ok(Self {
            params,
            data_dir,
            telegram_bot_token,
        })
    }
}

fn param_str(map: &VariantMap, key: &str) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::Config(format!("'{key}' must be a string"))),
    }
}

fn param_port(map: &VariantMap, key: &str) -> Result<Option<u16>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .filter(|p| *p != 0)
            .map(Some)
            .ok_or_else(|| Error::Config(format!("'{key}' must be a port number"))),
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Unlike the lenient helpers, a present-but-garbled number is an error.
fn env_u64_strict(key: &str) -> Result<Option<u64>> {
    match env_str(key).and_then(non_empty) {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a number, got '{s}'"))),
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> Result<ConnectionParams> {
        let map: VariantMap = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ConnectionParams::from_parameters(&map)
    }

    #[test]
    fn account_is_required() {
        assert!(matches!(params(&[]), Err(Error::Config(_))));
        assert!(matches!(
            params(&[(PARAM_ACCOUNT, json!("  "))]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn defaults() {
        let p = params(&[(PARAM_ACCOUNT, json!("+79991234567"))]).unwrap();
        assert_eq!(p, ConnectionParams::new("+79991234567"));
        assert_eq!(p.keepalive_interval, Duration::from_secs(15));
        assert_eq!(p.server_identifier(), None);
        assert_eq!(p.dc_option(), DcOption::default());
        assert!(!p.classifier().broadcast_channels_as_contacts);
    }

    #[test]
    fn custom_server() {
        let p = params(&[
            (PARAM_ACCOUNT, json!("acc")),
            (PARAM_SERVER_ADDRESS, json!("10.0.0.1")),
            (PARAM_SERVER_PORT, json!(8443)),
            (PARAM_SERVER_KEY, json!("/etc/morse/key.pem")),
        ])
        .unwrap();
        assert_eq!(p.server_identifier().as_deref(), Some("10.0.0.1_8443"));
        assert_eq!(p.dc_option().port, 8443);
        assert_eq!(
            p.server.unwrap().key_file,
            Some(PathBuf::from("/etc/morse/key.pem"))
        );

        let default_port = params(&[
            (PARAM_ACCOUNT, json!("acc")),
            (PARAM_SERVER_ADDRESS, json!("10.0.0.1")),
        ])
        .unwrap();
        assert_eq!(default_port.server_identifier().as_deref(), Some("10.0.0.1_443"));
    }

    #[test]
    fn bad_ports_are_rejected() {
        for port in [json!(0), json!(70000), json!("443")] {
            let r = params(&[
                (PARAM_ACCOUNT, json!("acc")),
                (PARAM_SERVER_ADDRESS, json!("h")),
                (PARAM_SERVER_PORT, port),
            ]);
            assert!(matches!(r, Err(Error::Config(_))));
        }
    }

    #[test]
    fn proxy_must_be_socks5() {
        let ok = params(&[
            (PARAM_ACCOUNT, json!("acc")),
            (PARAM_PROXY_TYPE, json!("SOCKS5")),
            (PARAM_PROXY_ADDRESS, json!("127.0.0.1")),
            (PARAM_PROXY_PORT, json!(1080)),
            (PARAM_PROXY_PASSWORD, json!("hunter2")),
        ])
        .unwrap();
        let proxy = ok.proxy.unwrap();
        assert_eq!(proxy.port, 1080);
        assert!(!format!("{proxy:?}").contains("hunter2"));

        let http = params(&[
            (PARAM_ACCOUNT, json!("acc")),
            (PARAM_PROXY_TYPE, json!("http")),
            (PARAM_PROXY_ADDRESS, json!("127.0.0.1")),
            (PARAM_PROXY_PORT, json!(1080)),
        ]);
        assert!(matches!(http, Err(Error::Config(_))));

        let no_port = params(&[
            (PARAM_ACCOUNT, json!("acc")),
            (PARAM_PROXY_TYPE, json!("socks5")),
            (PARAM_PROXY_ADDRESS, json!("127.0.0.1")),
        ]);
        assert!(matches!(no_port, Err(Error::Config(_))));
    }

    #[test]
    fn flags_and_keepalive() {
        let p = params(&[
            (PARAM_ACCOUNT, json!("acc")),
            (PARAM_KEEPALIVE_INTERVAL, json!(60)),
            (PARAM_BROADCAST_AS_CONTACTS, json!(true)),
        ])
        .unwrap();
        assert_eq!(p.keepalive_interval, Duration::from_secs(60));
        assert!(p.classifier().broadcast_channels_as_contacts);

        assert!(params(&[
            (PARAM_ACCOUNT, json!("acc")),
            (PARAM_BROADCAST_AS_CONTACTS, json!("yes")),
        ])
        .is_err());
    }
}
