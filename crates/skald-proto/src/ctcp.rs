use crate::event::EventKind;

/// CTCP message framing, per
/// <https://datatracker.ietf.org/doc/html/draft-oakley-irc-ctcp-02>.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CtcpKind {
    Action,
    Version,
    Ping,
    Time,
    ClientInfo,
    Source,
    UserInfo,
    Finger,
    Other,
}

impl CtcpKind {
    fn from_command(cmd: &str) -> CtcpKind {
        if cmd.eq_ignore_ascii_case("ACTION") {
            CtcpKind::Action
        } else if cmd.eq_ignore_ascii_case("VERSION") {
            CtcpKind::Version
        } else if cmd.eq_ignore_ascii_case("PING") {
            CtcpKind::Ping
        } else if cmd.eq_ignore_ascii_case("TIME") {
            CtcpKind::Time
        } else if cmd.eq_ignore_ascii_case("CLIENTINFO") {
            CtcpKind::ClientInfo
        } else if cmd.eq_ignore_ascii_case("SOURCE") {
            CtcpKind::Source
        } else if cmd.eq_ignore_ascii_case("USERINFO") {
            CtcpKind::UserInfo
        } else if cmd.eq_ignore_ascii_case("FINGER") {
            CtcpKind::Finger
        } else {
            CtcpKind::Other
        }
    }

    /// Event kind for a CTCP query of this kind arriving over PRIVMSG.
    pub fn query_event(self) -> EventKind {
        match self {
            CtcpKind::Action => EventKind::Emote,
            CtcpKind::Version => EventKind::CtcpVersion,
            CtcpKind::Ping => EventKind::CtcpPing,
            CtcpKind::Time => EventKind::CtcpTime,
            CtcpKind::ClientInfo => EventKind::CtcpClientinfo,
            CtcpKind::Source => EventKind::CtcpSource,
            CtcpKind::UserInfo => EventKind::CtcpUserinfo,
            CtcpKind::Finger => EventKind::CtcpFinger,
            CtcpKind::Other => EventKind::CtcpQuery,
        }
    }
}

/// Split a PRIVMSG/NOTICE payload into a CTCP command and its parameters.
/// Returns `None` for plain text.  The closing `\x01` is optional in the
/// wild and tolerated here.
pub fn ctcp_split(text: &str) -> Option<(CtcpKind, &str, &str)> {
    let body = text.strip_prefix('\x01')?;
    let body = body.strip_suffix('\x01').unwrap_or(body);
    let (cmd, params) = match body.split_once(' ') {
        Some((cmd, params)) => (cmd, params),
        None => (body, ""),
    };
    if cmd.is_empty() {
        return None;
    }
    Some((CtcpKind::from_command(cmd), cmd, params))
}

/// Frame a CTCP command and parameters for transmission.
pub fn ctcp_wrap(cmd: &str, params: &str) -> String {
    if params.is_empty() {
        format!("\x01{cmd}\x01")
    } else {
        format!("\x01{cmd} {params}\x01")
    }
}
