use skald_proto::{CaseMapping, User};
use std::collections::{BTreeSet, HashMap};

/// A channel as tracked by the roster: canonical name, optional service
/// id, topic, channel modes, and the member set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    pub name: String,
    pub id: Option<String>,
    pub topic: String,
    pub modes: BTreeSet<char>,
    members: HashMap<String, Member>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Member {
    pub nickname: String,
    pub modes: BTreeSet<char>,
}

impl Channel {
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, nick: &str, cm: CaseMapping) -> Option<&Member> {
        self.members.get(cm.lower(nick).as_ref())
    }

    pub fn has_member(&self, nick: &str, cm: CaseMapping) -> bool {
        self.members.contains_key(cm.lower(nick).as_ref())
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// The shared cache of users and channels on the current connection.
///
/// Single-owner by contract: only the connection loop and the
/// postprocessor's awareness handling write to it; plugins read through
/// lookups.  All keys are folded through the case-mapping passed to each
/// operation, so a CASEMAPPING change mid-connection cannot leave stale
/// keys behind (names are re-folded per call, not cached).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Roster {
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
}

impl Roster {
    pub fn new() -> Roster {
        Roster::default()
    }

    /// Record a sighting of a user, melding new identity fields into any
    /// existing record.
    pub fn upsert_user(&mut self, user: User, cm: CaseMapping) {
        if user.nickname.is_empty() {
            return;
        }
        let key = cm.lower(&user.nickname).into_owned();
        match self.users.get_mut(&key) {
            Some(existing) => existing.meld(&user),
            None => {
                self.users.insert(key, user);
            }
        }
    }

    pub fn forget_user(&mut self, nick: &str, cm: CaseMapping) {
        let key = cm.lower(nick).into_owned();
        self.users.remove(&key);
        for channel in self.channels.values_mut() {
            channel.members.remove(&key);
        }
    }

    /// Rekey a user and every channel membership from `old` to `new`.
    /// After this returns, no lookup observes the old nickname.
    pub fn rename_user(&mut self, old: &str, new: &str, cm: CaseMapping) -> bool {
        let old_key = cm.lower(old).into_owned();
        let new_key = cm.lower(new).into_owned();
        let Some(mut user) = self.users.remove(&old_key) else {
            return false;
        };
        user.nickname = new.to_owned();
        self.users.insert(new_key.clone(), user);
        for channel in self.channels.values_mut() {
            if let Some(mut member) = channel.members.remove(&old_key) {
                member.nickname = new.to_owned();
                channel.members.insert(new_key.clone(), member);
            }
        }
        true
    }

    /// Start tracking a channel (the bot joined it).
    pub fn add_channel(&mut self, name: &str, cm: CaseMapping) -> &mut Channel {
        let key = cm.lower(name).into_owned();
        self.channels.entry(key).or_insert_with(|| Channel {
            name: name.to_owned(),
            ..Channel::default()
        })
    }

    /// Drop a channel and evict users that are no longer seen anywhere.
    pub fn remove_channel(&mut self, name: &str, cm: CaseMapping) {
        let key = cm.lower(name).into_owned();
        if let Some(channel) = self.channels.remove(&key) {
            for member_key in channel.members.keys() {
                if !self
                    .channels
                    .values()
                    .any(|c| c.members.contains_key(member_key))
                {
                    self.users.remove(member_key);
                }
            }
        }
    }

    pub fn enter_channel(&mut self, chan: &str, nick: &str, cm: CaseMapping) {
        let nick_key = cm.lower(nick).into_owned();
        self.users
            .entry(nick_key.clone())
            .or_insert_with(|| User::from_nickname(nick));
        let channel = self.add_channel(chan, cm);
        channel.members.entry(nick_key).or_insert_with(|| Member {
            nickname: nick.to_owned(),
            ..Member::default()
        });
    }

    /// Remove a member from a channel; a user gone from every channel is
    /// evicted from the user cache.
    pub fn leave_channel(&mut self, chan: &str, nick: &str, cm: CaseMapping) {
        let chan_key = cm.lower(chan).into_owned();
        let nick_key = cm.lower(nick).into_owned();
        if let Some(channel) = self.channels.get_mut(&chan_key) {
            channel.members.remove(&nick_key);
        }
        if !self
            .channels
            .values()
            .any(|c| c.members.contains_key(&nick_key))
        {
            self.users.remove(&nick_key);
        }
    }

    pub fn set_topic(&mut self, chan: &str, topic: &str, cm: CaseMapping) {
        if let Some(channel) = self.lookup_channel_mut(chan, cm) {
            channel.topic = topic.to_owned();
        }
    }

    /// Apply one mode change.  With a member nickname the mode is a
    /// membership mode (`+o alice`); without one it is a channel mode.
    pub fn set_mode(&mut self, chan: &str, mode: char, adding: bool, member: Option<&str>, cm: CaseMapping) {
        let Some(channel) = self.lookup_channel_mut(chan, cm) else {
            return;
        };
        match member {
            Some(nick) => {
                let nick_key = cm.lower(nick).into_owned();
                if let Some(member) = channel.members.get_mut(&nick_key) {
                    if adding {
                        member.modes.insert(mode);
                    } else {
                        member.modes.remove(&mode);
                    }
                }
            }
            None => {
                if adding {
                    channel.modes.insert(mode);
                } else {
                    channel.modes.remove(&mode);
                }
            }
        }
    }

    pub fn lookup_user(&self, nick: &str, cm: CaseMapping) -> Option<&User> {
        self.users.get(cm.lower(nick).as_ref())
    }

    pub fn lookup_user_mut(&mut self, nick: &str, cm: CaseMapping) -> Option<&mut User> {
        self.users.get_mut(cm.lower(nick).as_ref())
    }

    pub fn lookup_channel(&self, name: &str, cm: CaseMapping) -> Option<&Channel> {
        self.channels.get(cm.lower(name).as_ref())
    }

    pub fn lookup_channel_mut(&mut self, name: &str, cm: CaseMapping) -> Option<&mut Channel> {
        self.channels.get_mut(cm.lower(name).as_ref())
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Forget everything; called on disconnect.
    pub fn clear(&mut self) {
        self.users.clear();
        self.channels.clear();
    }
}
