use crate::event::EventKind;

/// Map a command verb to its event kind.  `PRIVMSG` is mapped to
/// [`EventKind::Chan`] here and refined to `Query`/`Emote`/CTCP kinds by
/// the parser once the target and payload are known.  Unknown verbs map
/// to `None`; the parser surfaces them as [`EventKind::Unset`].
pub(crate) fn verb_kind(verb: &str) -> Option<EventKind> {
    let kind = match verb.to_ascii_uppercase().as_str() {
        "PRIVMSG" => EventKind::Chan,
        "NOTICE" => EventKind::Notice,
        "JOIN" => EventKind::Join,
        "PART" => EventKind::Part,
        "QUIT" => EventKind::Quit,
        "NICK" => EventKind::Nick,
        "MODE" => EventKind::Mode,
        "TOPIC" => EventKind::Topic,
        "KICK" => EventKind::Kick,
        "INVITE" => EventKind::Invite,
        "PING" => EventKind::Ping,
        "PONG" => EventKind::Pong,
        "ERROR" => EventKind::Error,
        "AWAY" => EventKind::Away,
        "ACCOUNT" => EventKind::Account,
        "WALLOPS" => EventKind::Wallops,
        "CAP" => EventKind::Cap,
        "AUTHENTICATE" => EventKind::SaslAuthenticate,
        // Twitch verbs (tag-driven refinement happens in postprocessing)
        "USERNOTICE" => EventKind::TwitchSub,
        "CLEARCHAT" => EventKind::ClearChat,
        "CLEARMSG" => EventKind::ClearMsg,
        "WHISPER" => EventKind::Whisper,
        "ROOMSTATE" => EventKind::RoomState,
        "USERSTATE" => EventKind::UserState,
        "GLOBALUSERSTATE" => EventKind::GlobalUserState,
        "RECONNECT" => EventKind::Reconnect,
        "HOSTTARGET" => EventKind::HostTarget,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_verbs_map() {
        for (verb, kind) in [
            ("PRIVMSG", EventKind::Chan),
            ("NOTICE", EventKind::Notice),
            ("JOIN", EventKind::Join),
            ("NICK", EventKind::Nick),
            ("CAP", EventKind::Cap),
            ("AUTHENTICATE", EventKind::SaslAuthenticate),
            ("USERNOTICE", EventKind::TwitchSub),
            ("CLEARCHAT", EventKind::ClearChat),
        ] {
            assert_eq!(verb_kind(verb), Some(kind));
        }
    }

    #[test]
    fn verb_lookup_is_case_insensitive() {
        assert_eq!(verb_kind("privmsg"), Some(EventKind::Chan));
    }

    #[test]
    fn unknown_verb() {
        assert_eq!(verb_kind("FLUMMOX"), None);
    }
}
