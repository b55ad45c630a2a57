use crate::source::Prefix;
use std::fmt;

/// Permission class of a user, as far as the bot is concerned.
///
/// Classes form a total order and permission checks compare with `>=`;
/// `Blacklist` sorts below everything so a blacklisted user passes no
/// gate at all.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum UserClass {
    Blacklist,
    #[default]
    Anyone,
    Registered,
    Whitelist,
    Operator,
    Staff,
}

/// A user as seen on events and in the roster.
///
/// `nickname` is the protocol identity; `display_name` may differ from it
/// on Twitch.  `account` is the services identity and is only non-empty
/// once authentication has been observed.  A server source is modelled as
/// `is_server` with an empty nickname and the server name in `address`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct User {
    pub nickname: String,
    pub ident: String,
    pub address: String,
    pub account: String,
    pub display_name: String,
    pub class: UserClass,
    /// Opaque badge string (Twitch `badges` tag, verbatim).
    pub badges: String,
    /// Opaque `#RRGGBB` colour, or empty.
    pub colour: String,
    pub is_server: bool,
}

impl User {
    pub fn from_nickname(nickname: impl Into<String>) -> User {
        User {
            nickname: nickname.into(),
            ..User::default()
        }
    }

    pub fn server(address: impl Into<String>) -> User {
        User {
            address: address.into(),
            is_server: true,
            ..User::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.is_server && self.nickname.is_empty() && self.address.is_empty()
    }

    /// The name to show a human: the display name when set, otherwise the
    /// nickname.
    pub fn shown_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.nickname
        } else {
            &self.display_name
        }
    }

    /// Fill in fields this record is missing from another sighting of the
    /// same user.  Existing values win; class is upgraded only from the
    /// default.
    pub fn meld(&mut self, other: &User) {
        if self.ident.is_empty() {
            self.ident.clone_from(&other.ident);
        }
        if self.address.is_empty() {
            self.address.clone_from(&other.address);
        }
        if self.account.is_empty() {
            self.account.clone_from(&other.account);
        }
        if self.display_name.is_empty() {
            self.display_name.clone_from(&other.display_name);
        }
        if self.badges.is_empty() {
            self.badges.clone_from(&other.badges);
        }
        if self.colour.is_empty() {
            self.colour.clone_from(&other.colour);
        }
        if self.class == UserClass::default() {
            self.class = other.class;
        }
    }
}

impl From<&Prefix> for User {
    fn from(prefix: &Prefix) -> User {
        match prefix {
            Prefix::Server(name) => User::server(name.clone()),
            Prefix::Client {
                nickname,
                ident,
                host,
            } => User {
                nickname: nickname.clone(),
                ident: ident.clone().unwrap_or_default(),
                address: host.clone().unwrap_or_default(),
                ..User::default()
            },
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_server {
            f.write_str(&self.address)
        } else {
            f.write_str(&self.nickname)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_order() {
        assert!(UserClass::Blacklist < UserClass::Anyone);
        assert!(UserClass::Anyone < UserClass::Registered);
        assert!(UserClass::Registered < UserClass::Whitelist);
        assert!(UserClass::Whitelist < UserClass::Operator);
        assert!(UserClass::Operator < UserClass::Staff);
    }

    #[test]
    fn server_invariant() {
        let u = User::server("irc.example.com");
        assert!(u.is_server);
        assert!(u.nickname.is_empty());
    }

    #[test]
    fn meld_keeps_existing() {
        let mut a = User::from_nickname("alice");
        a.ident = "~a".to_owned();
        let mut b = User::from_nickname("alice");
        b.ident = "other".to_owned();
        b.account = "alice".to_owned();
        b.class = UserClass::Operator;
        a.meld(&b);
        assert_eq!(a.ident, "~a");
        assert_eq!(a.account, "alice");
        assert_eq!(a.class, UserClass::Operator);
    }

    #[test]
    fn from_prefix() {
        let u = User::from(&Prefix::parse("alice!~a@host"));
        assert_eq!(u.nickname, "alice");
        assert_eq!(u.ident, "~a");
        assert_eq!(u.address, "host");
        assert!(!u.is_server);
    }
}
