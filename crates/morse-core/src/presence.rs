//! Presence vocabulary: Telegram's three contact states projected onto the
//! middleware's simple-presence statuses.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::handles::Handle;

pub const STATUS_AVAILABLE: &str = "available";
pub const STATUS_OFFLINE: &str = "offline";
pub const STATUS_HIDDEN: &str = "hidden";
pub const STATUS_UNKNOWN: &str = "unknown";

/// Contact status as reported by the Telegram client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactStatus {
    #[default]
    Unknown,
    Offline,
    Online,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 3] = [
        ContactStatus::Unknown,
        ContactStatus::Offline,
        ContactStatus::Online,
    ];
}

/// Middleware presence type, with the middleware's numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresenceType {
    Unset = 0,
    Offline = 1,
    Available = 2,
    Hidden = 5,
    Unknown = 7,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimplePresence {
    pub kind: PresenceType,
    pub status: String,
    pub message: String,
}

impl SimplePresence {
    fn new(kind: PresenceType, status: &str) -> Self {
        Self {
            kind,
            status: status.to_string(),
            message: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(PresenceType::Unknown, STATUS_UNKNOWN)
    }

    pub fn offline() -> Self {
        Self::new(PresenceType::Offline, STATUS_OFFLINE)
    }

    /// Wire form: `(type, status, message)`.
    pub fn to_value(&self) -> serde_json::Value {
        json!([self.kind as u32, self.status, self.message])
    }
}

/// One entry of the status table advertised to the middleware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSpec {
    pub name: &'static str,
    pub kind: PresenceType,
    pub may_set_on_self: bool,
    pub can_have_message: bool,
}

pub const STATUS_SPECS: [StatusSpec; 4] = [
    StatusSpec {
        name: STATUS_OFFLINE,
        kind: PresenceType::Offline,
        may_set_on_self: true,
        can_have_message: false,
    },
    StatusSpec {
        name: STATUS_AVAILABLE,
        kind: PresenceType::Available,
        may_set_on_self: true,
        can_have_message: false,
    },
    StatusSpec {
        name: STATUS_HIDDEN,
        kind: PresenceType::Hidden,
        may_set_on_self: true,
        can_have_message: false,
    },
    StatusSpec {
        name: STATUS_UNKNOWN,
        kind: PresenceType::Unknown,
        may_set_on_self: false,
        can_have_message: false,
    },
];

pub fn status_spec(name: &str) -> Option<&'static StatusSpec> {
    STATUS_SPECS.iter().find(|s| s.name == name)
}

/// Project a Telegram contact status onto a middleware presence.
pub fn project(status: ContactStatus) -> SimplePresence {
    match status {
        ContactStatus::Online => SimplePresence::new(PresenceType::Available, STATUS_AVAILABLE),
        ContactStatus::Offline => SimplePresence::offline(),
        ContactStatus::Unknown => SimplePresence::unknown(),
    }
}

/// Presence for a settable status name (used for the local account).
pub fn for_status(name: &str) -> Option<SimplePresence> {
    status_spec(name).map(|s| SimplePresence::new(s.kind, s.name))
}

/// Last published presence per contact handle.
#[derive(Debug, Default)]
pub struct PresenceBook {
    presences: HashMap<Handle, SimplePresence>,
}

impl PresenceBook {
    pub fn get(&self, handle: Handle) -> SimplePresence {
        self.presences
            .get(&handle)
            .cloned()
            .unwrap_or_else(SimplePresence::unknown)
    }

    /// Record `batch` and return the entries that actually changed.
    pub fn apply(
        &mut self,
        batch: BTreeMap<Handle, SimplePresence>,
    ) -> BTreeMap<Handle, SimplePresence> {
        let mut changed = BTreeMap::new();
        for (handle, presence) in batch {
            if self.presences.get(&handle) == Some(&presence) {
                continue;
            }
            self.presences.insert(handle, presence.clone());
            changed.insert(handle, presence);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_source_status_is_mapped() {
        let expected = [
            (ContactStatus::Unknown, "unknown", PresenceType::Unknown),
            (ContactStatus::Offline, "offline", PresenceType::Offline),
            (ContactStatus::Online, "available", PresenceType::Available),
        ];
        for status in ContactStatus::ALL {
            let p = project(status);
            let (_, name, kind) = expected.iter().find(|(s, _, _)| *s == status).unwrap();
            assert_eq!(p.status, *name);
            assert_eq!(p.kind, *kind);
            assert!(p.message.is_empty());
            assert!(status_spec(&p.status).is_some());
        }
    }

    #[test]
    fn unknown_status_is_not_settable() {
        assert!(!status_spec("unknown").unwrap().may_set_on_self);
        assert!(status_spec("hidden").unwrap().may_set_on_self);
        assert!(status_spec("busy").is_none());
        assert_eq!(for_status("hidden").unwrap().kind, PresenceType::Hidden);
    }

    #[test]
    fn book_reports_only_changes() {
        let mut book = PresenceBook::default();
        assert_eq!(book.get(3), SimplePresence::unknown());

        let mut batch = BTreeMap::new();
        batch.insert(3, project(ContactStatus::Online));
        batch.insert(4, project(ContactStatus::Offline));
        assert_eq!(book.apply(batch.clone()).len(), 2);
        assert!(book.apply(batch).is_empty());

        let mut again = BTreeMap::new();
        again.insert(3, project(ContactStatus::Offline));
        let changed = book.apply(again);
        assert_eq!(changed.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(book.get(3).status, "offline");
    }

    #[test]
    fn wire_form_is_a_triple() {
        assert_eq!(
            project(ContactStatus::Online).to_value(),
            json!([2, "available", ""])
        );
    }
}
