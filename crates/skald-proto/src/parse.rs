use crate::ctcp::{CtcpKind, ctcp_split};
use crate::event::{AUX_FIELDS, ChannelRef, Event, EventKind};
use crate::numerics::reply_kind;
use crate::profile::ServerProfile;
use crate::raw::RawLine;
use crate::user::User;
use crate::verbs::verb_kind;

/// Turn one framed line (without CR LF) into an [`Event`].
///
/// The function never fails: lines the codec cannot make sense of come
/// back as [`EventKind::Unset`] with `errors` describing what was
/// unrecognised and the raw line retained, so they still flow through
/// dispatch and reach the logging plugins.
pub fn parse_event(line: &str, profile: &ServerProfile, now: i64) -> Event {
    let mut event = Event {
        raw: line.to_owned(),
        time: now,
        ..Event::default()
    };
    let raw = match line.parse::<RawLine>() {
        Ok(raw) => raw,
        Err(e) => {
            event.note_error(e.to_string());
            return event;
        }
    };
    event.tags = raw.tags.clone();
    if let Some(prefix) = raw.prefix.as_ref() {
        event.sender = User::from(prefix);
    }
    if let Some(code) = raw.numeric() {
        event.num = Some(code);
        event.kind = reply_kind(code);
        apply_numeric_params(&mut event, &raw, profile);
    } else {
        match verb_kind(&raw.verb) {
            Some(kind) => {
                event.kind = kind;
                apply_verb_params(&mut event, &raw, profile);
            }
            None => {
                event.note_error(format!("unknown verb {:?}", raw.verb));
            }
        }
    }
    event
}

/// Interpret the parameters of a named verb.
fn apply_verb_params(event: &mut Event, raw: &RawLine, profile: &ServerProfile) {
    let params = raw.params.as_slice();
    match event.kind {
        EventKind::Chan => {
            // PRIVMSG: channel message, private query, or CTCP.
            let target = params.first().map(String::as_str).unwrap_or_default();
            if profile.is_channel_name(target) {
                event.channel = Some(ChannelRef::new(target));
            } else {
                event.kind = EventKind::Query;
                event.target = User::from_nickname(target);
            }
            event.content = params.get(1).cloned().unwrap_or_default();
            if let Some((kind, cmd, ctcp_params)) = ctcp_split(&event.content) {
                event.kind = kind.query_event();
                if kind == CtcpKind::Other {
                    event.aux[0] = Some(cmd.to_owned());
                }
                event.content = ctcp_params.to_owned();
            }
        }
        EventKind::Notice => {
            let target = params.first().map(String::as_str).unwrap_or_default();
            if profile.is_channel_name(target) {
                event.channel = Some(ChannelRef::new(target));
            } else {
                event.target = User::from_nickname(target);
            }
            event.content = params.get(1).cloned().unwrap_or_default();
            if let Some((_, cmd, ctcp_params)) = ctcp_split(&event.content) {
                event.kind = EventKind::CtcpReply;
                event.aux[0] = Some(cmd.to_owned());
                event.content = ctcp_params.to_owned();
            }
        }
        EventKind::Join | EventKind::Part => {
            if let Some(chan) = params.first() {
                event.channel = Some(ChannelRef::new(chan.clone()));
            } else {
                event.note_error("missing channel parameter");
            }
            event.content = params.get(1).cloned().unwrap_or_default();
        }
        EventKind::Quit => {
            event.content = params.first().cloned().unwrap_or_default();
        }
        EventKind::Nick => {
            let new_nick = params.first().cloned().unwrap_or_default();
            if new_nick.is_empty() {
                event.note_error("NICK without a nickname");
            }
            event.target = User::from_nickname(new_nick.clone());
            event.content = new_nick;
        }
        EventKind::Mode => {
            let target = params.first().map(String::as_str).unwrap_or_default();
            if profile.is_channel_name(target) {
                event.channel = Some(ChannelRef::new(target));
            } else {
                event.target = User::from_nickname(target);
            }
            event.aux[0] = params.get(1).cloned();
            event.content = params.get(2..).unwrap_or_default().join(" ");
        }
        EventKind::Topic => {
            if let Some(chan) = params.first() {
                event.channel = Some(ChannelRef::new(chan.clone()));
            }
            event.content = params.get(1).cloned().unwrap_or_default();
        }
        EventKind::Kick => {
            if let Some(chan) = params.first() {
                event.channel = Some(ChannelRef::new(chan.clone()));
            }
            event.target = User::from_nickname(params.get(1).cloned().unwrap_or_default());
            event.content = params.get(2).cloned().unwrap_or_default();
        }
        EventKind::Invite => {
            event.target = User::from_nickname(params.first().cloned().unwrap_or_default());
            if let Some(chan) = params.get(1) {
                event.channel = Some(ChannelRef::new(chan.clone()));
            }
        }
        EventKind::Ping | EventKind::Pong | EventKind::Error | EventKind::Wallops => {
            event.content = raw.last_param().unwrap_or_default().to_owned();
        }
        EventKind::Away => {
            match params.first() {
                Some(reason) => event.content.clone_from(reason),
                None => event.kind = EventKind::Back,
            }
        }
        EventKind::Account => {
            event.content = params.first().cloned().unwrap_or_default();
        }
        EventKind::Cap => {
            // `<nick|*> <subcommand> [*] :<caps>`
            event.aux[0] = params.get(1).map(|s| s.to_ascii_uppercase());
            event.content = raw.last_param().unwrap_or_default().to_owned();
            if params.get(2).is_some_and(|p| p == "*") {
                // Multiline CAP LS continues.
                event.aux[1] = Some("*".to_owned());
            }
        }
        EventKind::SaslAuthenticate => {
            event.content = params.first().cloned().unwrap_or_default();
        }
        EventKind::TwitchSub
        | EventKind::ClearChat
        | EventKind::ClearMsg
        | EventKind::RoomState
        | EventKind::UserState => {
            if let Some(chan) = params.first() {
                event.channel = Some(ChannelRef::new(chan.clone()));
            }
            if params.len() > 1 {
                event.content = raw.last_param().unwrap_or_default().to_owned();
            }
        }
        EventKind::Whisper => {
            event.target = User::from_nickname(params.first().cloned().unwrap_or_default());
            event.content = params.get(1).cloned().unwrap_or_default();
        }
        EventKind::HostTarget => {
            if let Some(chan) = params.first() {
                event.channel = Some(ChannelRef::new(chan.clone()));
            }
            event.content = raw.last_param().unwrap_or_default().to_owned();
        }
        EventKind::GlobalUserState | EventKind::Reconnect => (),
        _ => {
            event.content = raw.last_param().unwrap_or_default().to_owned();
        }
    }
}

/// Generic parameter interpretation for numeric replies: the first
/// parameter is the recipient (us), a channel parameter is recognised by
/// its prefix, the trailing parameter becomes the content, and remaining
/// middles land in `aux` (and `count`, where they parse as integers).
fn apply_numeric_params(event: &mut Event, raw: &RawLine, profile: &ServerProfile) {
    let params = raw.params.as_slice();
    let Some((recipient, rest)) = params.split_first() else {
        return;
    };
    event.target = User::from_nickname(recipient.clone());

    let trailing_idx = raw.trailing.then(|| params.len() - 1);

    if event.kind == EventKind::ISupport {
        // Tokens stay in content for the postprocessor; the trailing
        // "are supported by this server" is cosmetic.
        let end = trailing_idx.unwrap_or(params.len());
        event.content = params.get(1..end).unwrap_or_default().join(" ");
        event.alt_content = raw.last_param().unwrap_or_default().to_owned();
        return;
    }

    let mut aux_at = 0;
    let mut count_at = 0;
    for (i, param) in rest.iter().enumerate() {
        let param_idx = i + 1;
        if Some(param_idx) == trailing_idx {
            event.content.clone_from(param);
            continue;
        }
        if event.channel.is_none() && profile.is_channel_name(param) {
            event.channel = Some(ChannelRef::new(param.clone()));
            continue;
        }
        if let Ok(n) = param.parse::<i64>() {
            if count_at < event.count.len() {
                event.count[count_at] = Some(n);
                count_at += 1;
            }
            continue;
        }
        if aux_at < AUX_FIELDS {
            event.aux[aux_at] = Some(param.clone());
            aux_at += 1;
        }
    }
}
