use crate::casemap::CaseMapping;
use crate::isupport::ISupportToken;
use std::collections::{BTreeMap, BTreeSet};

/// The server implementation at the far end of the connection, as far as
/// quirk handling cares.  Detected from the server address and
/// `RPL_MYINFO`; anything unrecognised stays [`Daemon::Generic`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Daemon {
    #[default]
    Generic,
    Solanum,
    Inspircd,
    Unrealircd,
    Ergo,
    Twitch,
}

/// Everything the bot knows about the server it is talking to.
///
/// Emptied on disconnect, repopulated during registration, and updated by
/// the postprocessor as ISUPPORT and CAP traffic arrives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerProfile {
    pub daemon: Daemon,
    /// NETWORK ISUPPORT value, or empty before it is seen.
    pub network: String,
    /// The address we connected to (not the server-advertised name).
    pub address: String,
    /// Raw ISUPPORT tokens: key → value (`None` for bare flags).
    pub isupport: BTreeMap<String, Option<String>>,
    /// Channel-prefix characters, from CHANTYPES.
    pub chantypes: String,
    pub casemapping: CaseMapping,
    /// Membership prefixes from `PREFIX=(modes)symbols`, in advertised
    /// order (highest rank first): `(mode char, symbol char)`.
    pub prefixes: Vec<(char, char)>,
    /// Capabilities the server acknowledged for us.
    pub caps: BTreeSet<String>,
    /// Version string from RPL_MYINFO.
    pub version: String,
}

impl ServerProfile {
    pub fn new(address: impl Into<String>) -> ServerProfile {
        let address = address.into();
        let mut profile = ServerProfile {
            address,
            chantypes: "#&".to_owned(),
            prefixes: vec![('o', '@'), ('v', '+')],
            ..ServerProfile::default()
        };
        if profile.address.ends_with("twitch.tv") {
            profile.daemon = Daemon::Twitch;
        }
        profile
    }

    pub fn is_twitch(&self) -> bool {
        self.daemon == Daemon::Twitch
    }

    /// Whether `name` is a channel name under the current CHANTYPES.
    pub fn is_channel_name(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|ch| self.chantypes.contains(ch))
    }

    /// Membership symbol (`@`, `+`, …) for a mode char, if advertised.
    pub fn prefix_symbol(&self, mode: char) -> Option<char> {
        self.prefixes
            .iter()
            .find_map(|&(m, s)| (m == mode).then_some(s))
    }

    /// Mode char for a membership symbol.
    pub fn prefix_mode(&self, symbol: char) -> Option<char> {
        self.prefixes
            .iter()
            .find_map(|&(m, s)| (s == symbol).then_some(m))
    }

    /// Strip leading membership symbols from a NAMES-style nickname.
    pub fn strip_prefix_symbols<'a>(&self, nick: &'a str) -> (&'a str, Vec<char>) {
        let mut modes = Vec::new();
        let mut rest = nick;
        while let Some(ch) = rest.chars().next()
            && let Some(mode) = self.prefix_mode(ch)
        {
            modes.push(mode);
            rest = &rest[ch.len_utf8()..];
        }
        (rest, modes)
    }

    /// Fold ISUPPORT tokens into the profile.  Case-mapping and channel
    /// prefixes are recomputed in the same pass so no caller can observe
    /// one updated without the other.
    pub fn apply_isupport(&mut self, tokens: &[ISupportToken]) {
        for token in tokens {
            match token {
                ISupportToken::Set(key) => {
                    self.isupport.insert(key.clone(), None);
                }
                ISupportToken::Unset(key) => {
                    self.isupport.remove(key);
                }
                ISupportToken::Eq(key, value) => {
                    self.isupport.insert(key.clone(), Some(value.clone()));
                    match key.as_str() {
                        "CASEMAPPING" => {
                            if let Ok(cm) = value.parse::<CaseMapping>() {
                                self.casemapping = cm;
                            }
                        }
                        "CHANTYPES" => {
                            self.chantypes.clone_from(value);
                        }
                        "NETWORK" => {
                            self.network.clone_from(value);
                        }
                        "PREFIX" => {
                            if let Some(prefixes) = parse_prefix(value) {
                                self.prefixes = prefixes;
                            }
                        }
                        _ => (),
                    }
                }
            }
        }
    }

    /// Reset everything learned from the connection; called on disconnect.
    pub fn reset(&mut self) {
        let address = std::mem::take(&mut self.address);
        *self = ServerProfile::new(address);
    }
}

/// `(ov)@+` → `[('o', '@'), ('v', '+')]`
fn parse_prefix(value: &str) -> Option<Vec<(char, char)>> {
    let rest = value.strip_prefix('(')?;
    let (modes, symbols) = rest.split_once(')')?;
    if modes.chars().count() != symbols.chars().count() {
        return None;
    }
    Some(std::iter::zip(modes.chars(), symbols.chars()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twitch_detected_from_address() {
        assert!(ServerProfile::new("irc.chat.twitch.tv").is_twitch());
        assert!(!ServerProfile::new("irc.libera.chat").is_twitch());
    }

    #[test]
    fn isupport_updates_casemapping_and_prefixes() {
        let mut profile = ServerProfile::new("irc.example.com");
        profile.apply_isupport(&crate::isupport::parse_isupport_tokens([
            "CASEMAPPING=ascii",
            "CHANTYPES=#",
            "PREFIX=(qaohv)~&@%+",
            "NETWORK=ExampleNet",
        ]));
        assert_eq!(profile.casemapping, CaseMapping::Ascii);
        assert_eq!(profile.chantypes, "#");
        assert_eq!(profile.prefix_symbol('q'), Some('~'));
        assert_eq!(profile.prefix_mode('%'), Some('h'));
        assert_eq!(profile.network, "ExampleNet");
    }

    #[test]
    fn strip_prefix_symbols() {
        let profile = ServerProfile::new("irc.example.com");
        let (nick, modes) = profile.strip_prefix_symbols("@+alice");
        assert_eq!(nick, "alice");
        assert_eq!(modes, ['o', 'v']);
    }

    #[test]
    fn unset_removes_token() {
        let mut profile = ServerProfile::new("irc.example.com");
        profile.apply_isupport(&crate::isupport::parse_isupport_tokens(["EXCEPTS"]));
        assert!(profile.isupport.contains_key("EXCEPTS"));
        profile.apply_isupport(&crate::isupport::parse_isupport_tokens(["-EXCEPTS"]));
        assert!(!profile.isupport.contains_key("EXCEPTS"));
    }

    #[test]
    fn reset_keeps_address_and_daemon_detection() {
        let mut profile = ServerProfile::new("irc.chat.twitch.tv");
        profile.network = "Twitch".to_owned();
        profile.reset();
        assert_eq!(profile.address, "irc.chat.twitch.tv");
        assert!(profile.is_twitch());
        assert!(profile.network.is_empty());
    }
}
