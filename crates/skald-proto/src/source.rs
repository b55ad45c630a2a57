use std::fmt;

/// The source prefix of an inbound line: either a server name or a
/// `nick!ident@host` client triple (ident and host optional).
///
/// Prefixes are not validated beyond their shape; RFC 1459 hosts in the
/// wild contain all manner of characters and modern-irc advises against
/// rejecting them.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Prefix {
    Server(String),
    Client {
        nickname: String,
        ident: Option<String>,
        host: Option<String>,
    },
}

impl Prefix {
    pub fn parse(s: &str) -> Prefix {
        // A dotted name without a `!` or `@` is a server, not a nickname.
        if !s.contains(['!', '@']) && s.contains('.') {
            return Prefix::Server(s.to_owned());
        }
        let mut rest = s;
        let host = rest.rsplit_once('@').map(|(pre, h)| {
            rest = pre;
            h.to_owned()
        });
        let ident = rest.rsplit_once('!').map(|(pre, u)| {
            rest = pre;
            u.to_owned()
        });
        Prefix::Client {
            nickname: rest.to_owned(),
            ident,
            host,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Prefix::Server(_))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => f.write_str(name),
            Prefix::Client {
                nickname,
                ident,
                host,
            } => {
                f.write_str(nickname)?;
                if let Some(ident) = ident {
                    write!(f, "!{ident}")?;
                }
                if let Some(host) = host {
                    write!(f, "@{host}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn server() {
        assert_matches!(Prefix::parse("irc.example.com"), Prefix::Server(name) => {
            assert_eq!(name, "irc.example.com");
        });
    }

    #[test]
    fn full_client() {
        assert_matches!(
            Prefix::parse("alice!~a@host.example.net"),
            Prefix::Client { nickname, ident, host } => {
                assert_eq!(nickname, "alice");
                assert_eq!(ident.as_deref(), Some("~a"));
                assert_eq!(host.as_deref(), Some("host.example.net"));
            }
        );
    }

    #[test]
    fn bare_nick() {
        assert_matches!(Prefix::parse("alice"), Prefix::Client { nickname, ident: None, host: None } => {
            assert_eq!(nickname, "alice");
        });
    }

    #[test]
    fn nick_with_host_only() {
        assert_matches!(Prefix::parse("alice@tmi.twitch.tv"), Prefix::Client { nickname, ident: None, host } => {
            assert_eq!(nickname, "alice");
            assert_eq!(host.as_deref(), Some("tmi.twitch.tv"));
        });
    }

    #[test]
    fn display_round_trip() {
        for s in ["irc.example.com", "alice!~a@host", "alice"] {
            assert_eq!(Prefix::parse(s).to_string(), s);
        }
    }
}
