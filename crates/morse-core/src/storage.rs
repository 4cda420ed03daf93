//! Per-account session files. Blob contents belong to the client library.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{errors::Error, logging::mask_phone, telegram::types::SessionBlobs, Result};

pub const ACCOUNTS_SUBDIR: &str = "telepathy/morse";
pub const OFFICIAL_SERVER_ID: &str = "official";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobKind {
    /// Credentials blob.
    Account,
    /// Dialog/update state blob.
    State,
}

impl BlobKind {
    pub fn file_name(self) -> &'static str {
        match self {
            BlobKind::Account => "account.bin",
            BlobKind::State => "telegram-state.bin",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionStore {
    dir: PathBuf,
    account: String,
}

impl SessionStore {
    /// `<data_dir>/telepathy/morse/<server_id | official>/<account>/`
    pub fn new(data_dir: &Path, server_id: Option<&str>, account: &str) -> Result<Self> {
        let server = server_id.filter(|s| !s.is_empty()).unwrap_or(OFFICIAL_SERVER_ID);
        for segment in [server, account] {
            check_segment(segment)?;
        }
        Ok(Self {
            dir: data_dir.join(ACCOUNTS_SUBDIR).join(server).join(account),
            account: account.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read one blob. Missing or unreadable files give an empty blob.
    pub fn load(&self, kind: BlobKind) -> Vec<u8> {
        let path = self.dir.join(kind.file_name());
        match fs::read(&path) {
            Ok(bytes) => {
                debug!(
                    account = %mask_phone(&self.account),
                    file = kind.file_name(),
                    bytes = bytes.len(),
                    "session blob loaded"
                );
                bytes
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no session blob");
                Vec::new()
            }
        }
    }

    /// Write one blob, creating the directory. Failures are logged only.
    pub fn save(&self, kind: BlobKind, bytes: &[u8]) -> bool {
        let path = self.dir.join(kind.file_name());
        let result = fs::create_dir_all(&self.dir).and_then(|()| {
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &path)
        });
        match result {
            Ok(()) => {
                debug!(path = %path.display(), bytes = bytes.len(), "session blob saved");
                true
            }
            Err(e) => {
                warn!(
                    account = %mask_phone(&self.account),
                    path = %path.display(),
                    error = %e,
                    "unable to save session blob"
                );
                false
            }
        }
    }

    pub fn load_session(&self) -> SessionBlobs {
        SessionBlobs {
            account: self.load(BlobKind::Account),
            state: self.load(BlobKind::State),
        }
    }

    /// Save both blobs; `true` only when both were written.
    pub fn save_session(&self, session: &SessionBlobs) -> bool {
        let account = self.save(BlobKind::Account, &session.account);
        let state = self.save(BlobKind::State, &session.state);
        account && state
    }
}

fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidPath {
            path: PathBuf::from(segment),
            reason: "not usable as a directory name".to_string(),
        });
    }
    Ok(())
}
