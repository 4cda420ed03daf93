//! What the bot has learned about users and chats. Persisted as the
//! session's state blob, since the Bot API has no dialog list to re-fetch.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use morse_core::{
    peer::PeerId,
    telegram::types::{ChatInfo, UserInfo},
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub users: BTreeMap<u32, UserInfo>,
    pub chats: BTreeMap<PeerId, ChatInfo>,
    pub participants: BTreeMap<PeerId, BTreeSet<u32>>,
    pub contacts: BTreeSet<u32>,
    pub avatar_tokens: BTreeMap<u32, String>,
}

/// What changed after recording one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Observed {
    pub new_contact: bool,
    pub members_changed: bool,
}

impl Cache {
    pub fn from_blob(blob: &[u8]) -> serde_json::Result<Self> {
        if blob.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(blob)
    }

    pub fn to_blob(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Record the author and conversation of a message. Users who write to
    /// the bot privately become contacts.
    pub fn observe(&mut self, sender: Option<UserInfo>, chat: ChatInfo) -> Observed {
        let mut observed = Observed::default();
        let peer = chat.peer;

        if let Some(user) = sender {
            let id = user.id;
            self.users
                .entry(id)
                .and_modify(|known| {
                    known.first_name = user.first_name.clone();
                    known.last_name = user.last_name.clone();
                    known.username = user.username.clone();
                })
                .or_insert(user);

            if peer == PeerId::user(id) {
                observed.new_contact = self.contacts.insert(id);
            } else {
                observed.members_changed = self.participants.entry(peer).or_default().insert(id);
            }
        }

        if peer.user_id().is_none() {
            let count = self.participants.get(&peer).map_or(0, |p| p.len() as u32);
            let entry = self.chats.entry(peer).or_insert_with(|| chat.clone());
            if !chat.title.is_empty() {
                entry.title = chat.title;
            }
            entry.participants_count = entry.participants_count.max(count);
        }
        observed
    }

    /// Returns `true` when the contact set changed.
    pub fn add_contacts(&mut self, ids: impl IntoIterator<Item = u32>) -> bool {
        let mut changed = false;
        for id in ids {
            self.users.entry(id).or_insert_with(|| UserInfo {
                id,
                ..UserInfo::default()
            });
            changed |= self.contacts.insert(id);
        }
        changed
    }

    pub fn delete_contacts(&mut self, ids: &[u32]) -> bool {
        let mut changed = false;
        for id in ids {
            changed |= self.contacts.remove(id);
        }
        changed
    }

    /// Known users whose name, username or phone contains `query`,
    /// case-insensitively.
    pub fn search(&self, query: &str, limit: u32) -> Vec<PeerId> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.users
            .values()
            .filter(|u| {
                [&u.first_name, &u.last_name, &u.username, &u.phone]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .take(limit as usize)
            .map(|u| PeerId::user(u.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u32, first: &str, username: &str) -> UserInfo {
        UserInfo {
            id,
            first_name: first.to_string(),
            username: username.to_string(),
            ..UserInfo::default()
        }
    }

    fn chat(peer: PeerId, title: &str) -> ChatInfo {
        ChatInfo {
            peer,
            title: title.to_string(),
            participants_count: 0,
        }
    }

    #[test]
    fn private_senders_become_contacts() {
        let mut cache = Cache::default();
        let seen = cache.observe(Some(user(42, "Ada", "ada")), chat(PeerId::user(42), ""));
        assert!(seen.new_contact);
        assert!(!seen.members_changed);
        assert!(cache.chats.is_empty());

        let again = cache.observe(Some(user(42, "Ada L.", "ada")), chat(PeerId::user(42), ""));
        assert!(!again.new_contact);
        assert_eq!(cache.users[&42].first_name, "Ada L.");
    }

    #[test]
    fn group_senders_become_participants() {
        let mut cache = Cache::default();
        let room = PeerId::chat(5);
        assert!(cache.observe(Some(user(42, "Ada", "")), chat(room, "Friends")).members_changed);
        assert!(cache.observe(Some(user(43, "Bob", "")), chat(room, "")).members_changed);
        assert!(!cache.observe(Some(user(43, "Bob", "")), chat(room, "")).members_changed);

        assert!(cache.contacts.is_empty());
        assert_eq!(cache.chats[&room].title, "Friends");
        assert_eq!(cache.chats[&room].participants_count, 2);
    }

    #[test]
    fn contact_edits_report_changes() {
        let mut cache = Cache::default();
        assert!(cache.add_contacts([7, 8]));
        assert!(!cache.add_contacts([7]));
        assert!(cache.users.contains_key(&8));
        assert!(cache.delete_contacts(&[8, 9]));
        assert!(!cache.delete_contacts(&[9]));
        assert_eq!(cache.contacts.iter().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn search_matches_names_and_usernames() {
        let mut cache = Cache::default();
        cache.users.insert(1, user(1, "Ada", "lovelace"));
        cache.users.insert(2, user(2, "Bob", "builder"));
        cache.users.insert(3, user(3, "Adam", ""));

        assert_eq!(cache.search("ADA", 10), vec![PeerId::user(1), PeerId::user(3)]);
        assert_eq!(cache.search("love", 10), vec![PeerId::user(1)]);
        assert_eq!(cache.search("ada", 1).len(), 1);
        assert!(cache.search("  ", 10).is_empty());
    }

    #[test]
    fn blob_survives_a_restart() {
        let mut cache = Cache::default();
        cache.observe(Some(user(42, "Ada", "")), chat(PeerId::channel(9), "News"));
        cache.avatar_tokens.insert(42, "tok".to_string());

        let restored = Cache::from_blob(&cache.to_blob()).unwrap();
        assert_eq!(restored, cache);
        assert_eq!(Cache::from_blob(b"").unwrap(), Cache::default());
        assert!(Cache::from_blob(b"{not json").is_err());
    }
}
