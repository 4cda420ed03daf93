use std::collections::BTreeMap;

use serde_json::json;

use crate::{errors::Error, Result};

use super::{ChannelDetails, ChannelKind};

pub const DEFAULT_SEARCH_LIMIT: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    NotStarted = 0,
    InProgress = 1,
    MoreAvailable = 2,
    Completed = 3,
    Failed = 4,
}

#[derive(Debug)]
pub struct SearchChannel {
    details: ChannelDetails,
    limit: u32,
    query: Option<String>,
    state: SearchState,
}

impl SearchChannel {
    pub fn new(path: String, limit: Option<u32>) -> Self {
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_SEARCH_LIMIT);
        let prefix = "org.freedesktop.Telepathy.Channel.Type.ContactSearch";
        let mut details = ChannelDetails::untargeted(path, ChannelKind::ContactSearch, true);
        details.extra.insert(format!("{prefix}.Limit"), json!(limit));
        details.extra.insert(format!("{prefix}.AvailableSearchKeys"), json!([""]));
        details.extra.insert(format!("{prefix}.Server"), json!(""));
        Self {
            details,
            limit,
            query: None,
            state: SearchState::NotStarted,
        }
    }

    pub fn details(&self) -> &ChannelDetails {
        &self.details
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Validate the terms (a single empty key, non-empty value) and start.
    pub fn start(&mut self, terms: &BTreeMap<String, String>) -> Result<String> {
        if terms.len() != 1 {
            return Err(Error::InvalidArgument("Unsupported search terms".to_string()));
        }
        let Some((key, value)) = terms.iter().next() else {
            return Err(Error::InvalidArgument("Unsupported search terms".to_string()));
        };
        if !key.is_empty() {
            return Err(Error::InvalidArgument("Invalid search key".to_string()));
        }
        if value.trim().is_empty() {
            return Err(Error::InvalidArgument("Empty search term".to_string()));
        }
        self.query = Some(value.clone());
        self.state = SearchState::InProgress;
        Ok(value.clone())
    }

    /// Whether a completed search belongs to this channel.
    pub fn matches(&self, query: &str) -> bool {
        self.state == SearchState::InProgress && self.query.as_deref() == Some(query)
    }

    pub fn complete(&mut self) {
        self.state = SearchState::Completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn limit_defaults_to_thirty() {
        assert_eq!(SearchChannel::new("/s".into(), None).limit(), 30);
        assert_eq!(SearchChannel::new("/s".into(), Some(0)).limit(), 30);
        assert_eq!(SearchChannel::new("/s".into(), Some(5)).limit(), 5);
    }

    #[test]
    fn terms_are_validated() {
        let mut ch = SearchChannel::new("/s".into(), None);
        assert!(ch.start(&terms(&[])).is_err());
        assert!(ch.start(&terms(&[("fn", "bob")])).is_err());
        assert!(ch.start(&terms(&[("", " ")])).is_err());
        assert!(ch.start(&terms(&[("", "a"), ("x", "b")])).is_err());
        assert_eq!(ch.state(), SearchState::NotStarted);

        assert_eq!(ch.start(&terms(&[("", "bob")])).unwrap(), "bob");
        assert_eq!(ch.state(), SearchState::InProgress);
        assert!(ch.matches("bob"));
        assert!(!ch.matches("alice"));

        ch.complete();
        assert!(!ch.matches("bob"));
    }
}
