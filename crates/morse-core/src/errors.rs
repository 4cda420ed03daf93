use std::path::PathBuf;

/// Core error type for the connection manager.
///
/// The first four variants are the middleware's own typed errors and are
/// surfaced to the caller unchanged. Adapter crates map their specific
/// failures into `External`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// D-Bus error name the middleware expects for this failure.
    pub fn dbus_name(&self) -> &'static str {
        match self {
            Error::InvalidHandle(_) => "org.freedesktop.Telepathy.Error.InvalidHandle",
            Error::InvalidArgument(_) | Error::Config(_) | Error::InvalidPath { .. } => {
                "org.freedesktop.Telepathy.Error.InvalidArgument"
            }
            Error::Disconnected(_) => "org.freedesktop.Telepathy.Error.Disconnected",
            Error::NotImplemented(_) => "org.freedesktop.Telepathy.Error.NotImplemented",
            Error::Io(_) | Error::Json(_) | Error::External(_) => {
                "org.freedesktop.Telepathy.Error.NetworkError"
            }
        }
    }

    /// The bare message, without the variant prefix used by `Display`.
    pub fn message(&self) -> String {
        match self {
            Error::InvalidHandle(m)
            | Error::InvalidArgument(m)
            | Error::Disconnected(m)
            | Error::NotImplemented(m)
            | Error::Config(m)
            | Error::External(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middleware_errors_map_to_telepathy_names() {
        assert_eq!(
            Error::InvalidHandle("x".into()).dbus_name(),
            "org.freedesktop.Telepathy.Error.InvalidHandle"
        );
        assert_eq!(
            Error::NotImplemented("x".into()).dbus_name(),
            "org.freedesktop.Telepathy.Error.NotImplemented"
        );
        assert_eq!(Error::Disconnected("gone".into()).message(), "gone");
    }
}
