use crate::config::Config;
use crate::roster::Roster;
use skald_net::SaslPlain;
use skald_proto::{CaseMapping, Outbound, ServerProfile};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;

/// Who the bot is on the network right now.  `nickname` tracks server
/// truth (it changes on forced renames), the config keeps what was asked
/// for.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientIdentity {
    pub nickname: String,
    pub ident: String,
    pub realname: String,
    /// Services account, filled once RPL_LOGGEDIN is seen.
    pub account: String,
}

/// Progress of the registration handshake on the current connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RegState {
    /// Nothing sent yet.
    #[default]
    Start,
    /// CAP LS sent; `offered` accumulates multiline capability lists.
    CapLs { offered: Vec<String> },
    /// CAP REQ sent, waiting for ACK/NAK.
    CapReq,
    /// AUTHENTICATE in flight.
    Sasl(SaslPlain),
    /// CAP END sent, waiting for RPL_WELCOME.
    AwaitingWelcome,
    Registered,
}

/// The state record every plugin sees; one instance per bot, shared
/// single-threaded behind `Rc<RefCell>`.
#[derive(Debug)]
pub struct CoreState {
    pub config: Config,
    pub profile: ServerProfile,
    pub roster: Roster,
    pub client: ClientIdentity,
    pub registration: RegState,
    /// Root under which each plugin gets its resource directory.
    pub resource_root: PathBuf,
    outbound: VecDeque<Outbound>,
}

pub type SharedState = Rc<RefCell<CoreState>>;

impl CoreState {
    pub fn new(config: Config, resource_root: PathBuf) -> CoreState {
        let profile = ServerProfile::new(config.server.address.clone());
        let client = ClientIdentity {
            nickname: config.bot.nickname.clone(),
            ident: config.bot.ident.clone(),
            realname: config.bot.realname.clone(),
            account: String::new(),
        };
        CoreState {
            config,
            profile,
            roster: Roster::new(),
            client,
            registration: RegState::default(),
            resource_root,
            outbound: VecDeque::new(),
        }
    }

    pub fn shared(config: Config, resource_root: PathBuf) -> SharedState {
        Rc::new(RefCell::new(CoreState::new(config, resource_root)))
    }

    pub fn case(&self) -> CaseMapping {
        self.profile.casemapping
    }

    /// Whether `nick` is the bot itself, under the current case-mapping.
    pub fn is_me(&self, nick: &str) -> bool {
        !nick.is_empty() && self.case().eq_ignore_case(nick, &self.client.nickname)
    }

    pub fn is_home(&self, channel: &str) -> bool {
        let cm = self.case();
        self.config
            .bot
            .homes
            .iter()
            .any(|home| cm.eq_ignore_case(home, channel))
    }

    /// Queue an outgoing message; the connection loop flushes the queue
    /// in enqueue order.
    pub fn send(&mut self, message: Outbound) {
        self.outbound.push_back(message);
    }

    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        self.outbound.pop_front()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Wipe per-connection state after a disconnect.  Settings, identity
    /// wishes, and resource paths survive; the roster, server profile,
    /// and registration progress do not.
    pub fn reset_connection(&mut self) {
        self.roster.clear();
        self.profile.reset();
        self.registration = RegState::default();
        self.client.nickname = self.config.bot.nickname.clone();
        self.client.account.clear();
        self.outbound.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CoreState {
        let mut config = Config::default();
        config.bot.nickname = "skald".to_owned();
        config.bot.homes = vec!["#hall".to_owned()];
        CoreState::new(config, PathBuf::from("/tmp/skald-test"))
    }

    #[test]
    fn is_me_respects_casemapping() {
        let state = state();
        assert!(state.is_me("SKALD"));
        assert!(!state.is_me("skald2"));
        assert!(!state.is_me(""));
    }

    #[test]
    fn home_detection() {
        let state = state();
        assert!(state.is_home("#HALL"));
        assert!(!state.is_home("#elsewhere"));
    }

    #[test]
    fn outbound_preserves_order() {
        let mut state = state();
        state.send(Outbound::raw("FIRST"));
        state.send(Outbound::raw("SECOND"));
        assert_eq!(state.pop_outbound(), Some(Outbound::raw("FIRST")));
        assert_eq!(state.pop_outbound(), Some(Outbound::raw("SECOND")));
        assert_eq!(state.pop_outbound(), None);
    }

    #[test]
    fn reset_clears_connection_state() {
        let mut state = state();
        state.client.nickname = "skald_".to_owned();
        state.registration = RegState::AwaitingWelcome;
        state.send(Outbound::raw("PING :x"));
        state.reset_connection();
        assert_eq!(state.client.nickname, "skald");
        assert_eq!(state.registration, RegState::Start);
        assert_eq!(state.outbound_len(), 0);
    }
}
