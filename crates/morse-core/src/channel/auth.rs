//! Server-authentication channels carrying the SASL challenge for the login
//! code and the cloud password.

use serde_json::json;

use crate::{errors::Error, Result};

use super::{ChannelDetails, ChannelKind};

pub const MECHANISM_PASSWORD: &str = "X-TELEPATHY-PASSWORD";
pub const IFACE_SASL: &str =
    "org.freedesktop.Telepathy.Channel.Interface.SASLAuthentication";
pub const ERROR_AUTHENTICATION_FAILED: &str =
    "org.freedesktop.Telepathy.Error.AuthenticationFailed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslStatus {
    NotStarted = 0,
    InProgress = 1,
    ServerSucceeded = 2,
    ClientAccepted = 3,
    Succeeded = 4,
    ServerFailed = 5,
    ClientFailed = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeKind {
    /// The login code sent by Telegram.
    AuthCode,
    /// The two-step verification password.
    Password,
}

#[derive(Debug)]
pub struct AuthChallenge {
    details: ChannelDetails,
    kind: ChallengeKind,
    status: SaslStatus,
}

impl AuthChallenge {
    pub fn new(path: String, kind: ChallengeKind, account: &str, password_hint: Option<&str>) -> Self {
        let mut details = ChannelDetails::untargeted(path, ChannelKind::ServerAuthentication, false);
        let prefix = IFACE_SASL;
        details.extra.insert(
            "org.freedesktop.Telepathy.Channel.Type.ServerAuthentication.AuthenticationMethod".into(),
            json!(IFACE_SASL),
        );
        details.extra.insert(format!("{prefix}.AvailableMechanisms"), json!([MECHANISM_PASSWORD]));
        details.extra.insert(format!("{prefix}.HasInitialData"), json!(true));
        details.extra.insert(format!("{prefix}.CanTryAgain"), json!(true));
        details.extra.insert(format!("{prefix}.AuthorizationIdentity"), json!(account));
        details.extra.insert(
            format!("{prefix}.MaySaveResponse"),
            json!(kind == ChallengeKind::Password),
        );
        if let Some(hint) = password_hint.filter(|h| !h.is_empty()) {
            details.extra.insert(format!("{prefix}.SASLContext"), json!({ "password-hint": hint }));
        }
        Self {
            details,
            kind,
            status: SaslStatus::NotStarted,
        }
    }

    pub fn details(&self) -> &ChannelDetails {
        &self.details
    }

    pub fn path(&self) -> &str {
        &self.details.path
    }

    pub fn kind(&self) -> ChallengeKind {
        self.kind
    }

    pub fn status(&self) -> SaslStatus {
        self.status
    }

    /// Validate a `StartMechanismWithData` call and move to InProgress.
    pub fn start(&mut self, mechanism: &str) -> Result<()> {
        if mechanism != MECHANISM_PASSWORD {
            return Err(Error::NotImplemented(format!(
                "Given SASL mechanism \"{mechanism}\" is not implemented"
            )));
        }
        self.status = SaslStatus::InProgress;
        Ok(())
    }

    /// Set the status; returns `false` when it did not change.
    pub fn set_status(&mut self, status: SaslStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }
}
