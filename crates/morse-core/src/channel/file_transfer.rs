use serde_json::json;

use crate::{errors::Error, Result};

use super::{ChannelDetails, ChannelKind, ChannelRequest, PROP_FILE_ID};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileTransferState {
    None = 0,
    Pending = 1,
    Accepted = 2,
    Open = 3,
    Completed = 4,
    Cancelled = 5,
}

/// Download of a message attachment, requested by file id.
#[derive(Debug)]
pub struct FileTransferChannel {
    details: ChannelDetails,
    file_id: String,
    state: FileTransferState,
}

impl FileTransferChannel {
    /// Transfers are only ever created on request and must name a file.
    pub fn from_request(path: String, request: &ChannelRequest) -> Result<Self> {
        if !request.requested {
            return Err(Error::InvalidArgument(
                "All Transfer channels must be requested".to_string(),
            ));
        }
        let file_id = request
            .file_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::InvalidArgument("No file identifier provided".to_string()))?;

        let mut details = ChannelDetails::untargeted(path, ChannelKind::FileTransfer, true);
        details.extra.insert(PROP_FILE_ID.into(), json!(file_id));
        Ok(Self {
            details,
            file_id: file_id.to_string(),
            state: FileTransferState::Pending,
        })
    }

    pub fn details(&self) -> &ChannelDetails {
        &self.details
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn state(&self) -> FileTransferState {
        self.state
    }

    pub fn set_state(&mut self, state: FileTransferState) {
        self.state = state;
    }
}
