//! Contact list membership and subscription state.

use std::collections::{BTreeMap, HashMap};

use serde_json::json;

use crate::handles::Handle;
use crate::peer::PeerId;

/// Middleware subscription state, with the middleware's numbering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    #[default]
    Unknown = 0,
    /// A subscription request is pending.
    Ask = 3,
    Yes = 4,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactSubscriptions {
    pub subscribe: SubscriptionState,
    pub publish: SubscriptionState,
    pub publish_request: String,
}

impl ContactSubscriptions {
    pub fn to_value(&self) -> serde_json::Value {
        json!([self.subscribe as u32, self.publish as u32, self.publish_request])
    }
}

/// One `ContactsChangedWithID` batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContactsChanged {
    pub changes: BTreeMap<Handle, ContactSubscriptions>,
    pub identifiers: BTreeMap<Handle, String>,
    pub removals: BTreeMap<Handle, String>,
}

impl ContactsChanged {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.removals.is_empty()
    }
}

/// Middleware contact list state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactListState {
    None = 0,
    Waiting = 1,
    Failure = 2,
    Success = 3,
}

#[derive(Debug, Default)]
pub struct Roster {
    members: BTreeMap<Handle, PeerId>,
    subscription: HashMap<Handle, SubscriptionState>,
}

impl Roster {
    /// Replace the membership with `members` and describe the delta.
    pub fn sync(&mut self, members: impl IntoIterator<Item = (Handle, PeerId)>) -> ContactsChanged {
        let next: BTreeMap<Handle, PeerId> = members.into_iter().collect();
        let mut delta = ContactsChanged::default();

        for (handle, peer) in &next {
            if self.members.contains_key(handle) {
                continue;
            }
            delta.changes.insert(
                *handle,
                ContactSubscriptions {
                    subscribe: SubscriptionState::Yes,
                    publish: SubscriptionState::Yes,
                    publish_request: String::new(),
                },
            );
            delta.identifiers.insert(*handle, peer.to_string());
            self.subscription.insert(*handle, SubscriptionState::Yes);
        }

        for (handle, peer) in &self.members {
            if !next.contains_key(handle) {
                delta.removals.insert(*handle, peer.to_string());
                self.subscription.remove(handle);
            }
        }

        self.members = next;
        delta
    }

    /// Record pending subscription requests for peers not yet on the list.
    /// Returns the `subscribe = Ask` delta to announce.
    pub fn mark_requested(&mut self, requested: &[(Handle, PeerId)]) -> ContactsChanged {
        let mut delta = ContactsChanged::default();
        for (handle, peer) in requested {
            if self.members.contains_key(handle) {
                continue;
            }
            self.subscription.insert(*handle, SubscriptionState::Ask);
            delta.changes.insert(
                *handle,
                ContactSubscriptions {
                    subscribe: SubscriptionState::Ask,
                    publish: SubscriptionState::Unknown,
                    publish_request: String::new(),
                },
            );
            delta.identifiers.insert(*handle, peer.to_string());
        }
        delta
    }

    pub fn subscription(&self, handle: Handle) -> SubscriptionState {
        self.subscription.get(&handle).copied().unwrap_or_default()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.members.contains_key(&handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.members.keys().copied()
    }
}
