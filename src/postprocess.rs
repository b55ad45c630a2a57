//! The stage between the wire codec and the dispatcher.
//!
//! Every parsed event passes through here exactly once.  The
//! postprocessor advances the registration state machine (CAP, SASL,
//! NICK retries, welcome), folds ISUPPORT into the server profile,
//! applies daemon quirks, keeps the roster in sync with what the server
//! says (the "awareness" updates plugins are not allowed to do
//! themselves), resolves event users against the roster, and clears a
//! target that is merely "us" for kinds where that carries no meaning.

use crate::state::{CoreState, RegState};
use crate::twitch;
use skald_net::{SaslOutcome, SaslPlain};
use skald_proto::{
    Daemon, Event, EventKind, Outbound, User, UserClass, parse_isupport_tokens,
};

/// Capabilities requested from any server that offers them.
const DESIRED_CAPS: &[&str] = &[
    "account-notify",
    "away-notify",
    "chghost",
    "extended-join",
    "multi-prefix",
    "sasl",
];

/// Capabilities requested from Twitch on top of the generic set.
const TWITCH_CAPS: &[&str] = &[
    "twitch.tv/tags",
    "twitch.tv/commands",
    "twitch.tv/membership",
];

/// Kinds for which a target equal to the bot itself is information and
/// must survive; everywhere else it is cleared before dispatch.
const KEEP_SELF_TARGET: &[EventKind] = &[
    EventKind::Mode,
    EventKind::Query,
    EventKind::SelfNick,
    EventKind::Welcome,
    EventKind::ClearChat,
    EventKind::ClearMsg,
    EventKind::TwitchBan,
    EventKind::TwitchGiftChain,
    EventKind::TwitchGiftReceived,
    EventKind::TwitchSubGift,
    EventKind::TwitchTimeout,
    EventKind::Chan,
    EventKind::Emote,
];

pub fn postprocess(event: &mut Event, state: &mut CoreState) {
    if state.profile.is_twitch() {
        twitch::refine(event);
    }
    validate_channel(event, state);
    registration(event, state);
    awareness(event, state);
    resolve_users(event, state);
    clear_self_target(event, state);
}

/// Enforce the channel-name invariant: a non-empty channel must start
/// with an advertised channel-prefix character.
fn validate_channel(event: &mut Event, state: &CoreState) {
    let bad = event
        .channel
        .as_ref()
        .is_some_and(|c| !state.profile.is_channel_name(&c.name));
    if bad && let Some(channel) = event.channel.take() {
        event.note_error(format!("{:?} is not a channel name here", channel.name));
    }
}

fn registration(event: &mut Event, state: &mut CoreState) {
    match event.kind {
        EventKind::Cap => handle_cap(event, state),
        EventKind::SaslAuthenticate => {
            let RegState::Sasl(flow) = &mut state.registration else {
                return;
            };
            match flow.step(&event.content) {
                SaslOutcome::Respond(chunks) => {
                    for chunk in chunks {
                        state.send(Outbound::raw(format!("AUTHENTICATE {chunk}")));
                    }
                }
                SaslOutcome::Abort => {
                    state.send(Outbound::raw("AUTHENTICATE *"));
                    end_cap(state);
                }
            }
        }
        EventKind::SaslSuccess => {
            if matches!(state.registration, RegState::Sasl(_)) {
                end_cap(state);
            }
        }
        EventKind::SaslFailure => {
            if matches!(state.registration, RegState::Sasl(_)) {
                tracing::warn!("SASL authentication failed; continuing unauthenticated");
                end_cap(state);
            }
        }
        EventKind::LoggedIn => {
            if let Some(account) = event.aux.iter().flatten().next_back() {
                state.client.account.clone_from(account);
            }
        }
        EventKind::NicknameInUse => {
            if state.registration != RegState::Registered {
                state.client.nickname.push('_');
                let nickname = state.client.nickname.clone();
                tracing::info!(nickname, "Nickname in use; trying alternative");
                state.send(Outbound::Nick { nickname });
            }
        }
        EventKind::Welcome => {
            state.registration = RegState::Registered;
            if !event.target.nickname.is_empty() {
                state.client.nickname = event.target.nickname.clone();
            }
            tracing::info!(nickname = state.client.nickname, "Registered with server");
        }
        EventKind::ISupport => {
            let tokens = parse_isupport_tokens(event.content.split(' '));
            state.profile.apply_isupport(&tokens);
        }
        EventKind::MyInfo => {
            if let Some(version) = event.aux.get(1).and_then(Option::as_deref) {
                state.profile.version = version.to_owned();
                state.profile.daemon = detect_daemon(version, state.profile.daemon);
            }
        }
        EventKind::EndOfMotd => {
            // Safe point to start joining; servers reject JOIN before it.
            let chans = state
                .config
                .bot
                .homes
                .iter()
                .chain(&state.config.bot.channels)
                .cloned()
                .collect::<Vec<_>>();
            for channel in chans {
                state.send(Outbound::Join { channel, key: None });
            }
        }
        _ => (),
    }
}

fn handle_cap(event: &mut Event, state: &mut CoreState) {
    let subcmd = event.aux[0].as_deref().unwrap_or_default();
    match subcmd {
        "LS" => {
            let offered: Vec<String> =
                event.content.split_whitespace().map(str::to_owned).collect();
            let more_coming = event.aux[1].as_deref() == Some("*");
            let collected = if let RegState::CapLs { offered: seen } = &mut state.registration {
                seen.extend(offered);
                if more_coming {
                    return;
                }
                std::mem::take(seen)
            } else if more_coming {
                state.registration = RegState::CapLs { offered };
                return;
            } else {
                offered
            };
            // The sasl token may carry a mechanism list value.
            let offered_has = |cap: &str| {
                collected
                    .iter()
                    .any(|o| o == cap || o.strip_prefix(cap).is_some_and(|r| r.starts_with('=')))
            };
            let mut wanted: Vec<&str> = DESIRED_CAPS
                .iter()
                .copied()
                .filter(|cap| *cap != "sasl" || !state.config.bot.auth_password.is_empty())
                .filter(|cap| offered_has(cap))
                .collect();
            if state.profile.is_twitch() {
                wanted.extend(TWITCH_CAPS.iter().copied().filter(|cap| offered_has(cap)));
            }
            if wanted.is_empty() {
                end_cap(state);
            } else {
                state.send(Outbound::raw(format!("CAP REQ :{}", wanted.join(" "))));
                state.registration = RegState::CapReq;
            }
        }
        "ACK" => {
            let acked: Vec<String> =
                event.content.split_whitespace().map(str::to_owned).collect();
            for cap in &acked {
                state.profile.caps.insert(cap.clone());
            }
            if acked.iter().any(|c| c == "sasl") && !state.config.bot.auth_password.is_empty() {
                let flow = SaslPlain::new(
                    &state.config.bot.nickname,
                    &state.config.bot.auth_password,
                );
                state.send(Outbound::raw(format!("AUTHENTICATE {}", flow.mechanism())));
                state.registration = RegState::Sasl(flow);
            } else if state.registration != RegState::Registered {
                end_cap(state);
            }
        }
        "NAK" => {
            if state.registration != RegState::Registered {
                end_cap(state);
            }
        }
        "NEW" => {
            for cap in event.content.split_whitespace() {
                state.profile.caps.insert(cap.to_owned());
            }
        }
        "DEL" => {
            for cap in event.content.split_whitespace() {
                state.profile.caps.remove(cap);
            }
        }
        _ => event.note_error(format!("unknown CAP subcommand {subcmd:?}")),
    }
}

fn end_cap(state: &mut CoreState) {
    state.send(Outbound::raw("CAP END"));
    state.registration = RegState::AwaitingWelcome;
}

fn detect_daemon(version: &str, current: Daemon) -> Daemon {
    let lower = version.to_ascii_lowercase();
    if lower.contains("solanum") {
        Daemon::Solanum
    } else if lower.contains("inspircd") {
        Daemon::Inspircd
    } else if lower.contains("unreal") {
        Daemon::Unrealircd
    } else if lower.contains("ergo") {
        Daemon::Ergo
    } else {
        current
    }
}

/// Keep the roster in step with what the server reports.  This is the
/// only place (besides disconnect teardown) that mutates the roster.
fn awareness(event: &mut Event, state: &mut CoreState) {
    let cm = state.case();
    match event.kind {
        EventKind::Join => {
            let Some(chan) = event.channel_name().map(str::to_owned) else {
                return;
            };
            if state.is_me(&event.sender.nickname) {
                state.roster.add_channel(&chan, cm);
            }
            state.roster.enter_channel(&chan, &event.sender.nickname, cm);
            // extended-join carries the account as the first middle param.
            if state.profile.caps.contains("extended-join")
                && let Some(account) = event.aux[0].as_deref()
                && account != "*"
            {
                event.sender.account = account.to_owned();
            }
        }
        EventKind::Part | EventKind::Kick => {
            let Some(chan) = event.channel_name().map(str::to_owned) else {
                return;
            };
            let parting = if event.kind == EventKind::Kick {
                event.target.nickname.clone()
            } else {
                event.sender.nickname.clone()
            };
            if state.is_me(&parting) {
                state.roster.remove_channel(&chan, cm);
            } else {
                state.roster.leave_channel(&chan, &parting, cm);
            }
        }
        EventKind::Quit => {
            state.roster.forget_user(&event.sender.nickname, cm);
        }
        EventKind::Nick => {
            let old = event.sender.nickname.clone();
            let new = event.target.nickname.clone();
            state.roster.rename_user(&old, &new, cm);
            if state.is_me(&old) {
                event.kind = EventKind::SelfNick;
                state.client.nickname = new;
            }
        }
        EventKind::Mode => {
            if let Some(chan) = event.channel_name().map(str::to_owned)
                && let Some(modestring) = event.aux[0].clone()
            {
                apply_mode_string(state, &chan, &modestring, &event.content);
            }
        }
        EventKind::Topic => {
            if let Some(chan) = event.channel_name().map(str::to_owned) {
                state.roster.set_topic(&chan, &event.content, cm);
            }
        }
        EventKind::TopicReply => {
            if let Some(chan) = event.channel_name().map(str::to_owned) {
                state.roster.set_topic(&chan, &event.content, cm);
            }
        }
        EventKind::NamesReply => {
            let Some(chan) = event.channel_name().map(str::to_owned) else {
                return;
            };
            let names = event.content.clone();
            for name in names.split_whitespace() {
                let (nick, modes) = state.profile.strip_prefix_symbols(name);
                let nick = nick.to_owned();
                state.roster.enter_channel(&chan, &nick, cm);
                for mode in modes {
                    state.roster.set_mode(&chan, mode, true, Some(&nick), cm);
                }
            }
        }
        EventKind::WhoReply => {
            // 352: ident, host, server, nick land in aux in that order.
            if let (Some(ident), Some(host), Some(nick)) = (
                event.aux[0].clone(),
                event.aux[1].clone(),
                event.aux[3].clone(),
            ) {
                let mut user = User::from_nickname(nick);
                user.ident = ident;
                user.address = host;
                state.roster.upsert_user(user, cm);
            }
        }
        EventKind::Account => {
            let account = if event.content == "*" {
                String::new()
            } else {
                event.content.clone()
            };
            event.sender.account = account;
        }
        EventKind::Chan | EventKind::Emote if state.profile.is_twitch() => {
            // Twitch JOINs are unreliable; speaking in a channel is proof
            // enough of being in it.
            if let Some(chan) = event.channel_name().map(str::to_owned)
                && !event.sender.nickname.is_empty()
            {
                state.roster.enter_channel(&chan, &event.sender.nickname, cm);
            }
        }
        _ => (),
    }
}

/// Walk `+ov-b alice bob mask` style mode strings, consuming arguments
/// for membership and list/key/limit modes.
fn apply_mode_string(state: &mut CoreState, chan: &str, modestring: &str, args: &str) {
    let cm = state.case();
    let mut args = args.split_whitespace();
    let mut adding = true;
    for ch in modestring.chars() {
        match ch {
            '+' => adding = true,
            '-' => adding = false,
            ch if state.profile.prefix_symbol(ch).is_some() => {
                if let Some(nick) = args.next() {
                    state.roster.set_mode(chan, ch, adding, Some(nick), cm);
                }
            }
            // List modes and key/limit always (or when setting) take an
            // argument that is not a member.
            'b' | 'e' | 'I' | 'q' | 'k' => {
                let _ = args.next();
                state.roster.set_mode(chan, ch, adding, None, cm);
            }
            'l' => {
                if adding {
                    let _ = args.next();
                }
                state.roster.set_mode(chan, ch, adding, None, cm);
            }
            ch => state.roster.set_mode(chan, ch, adding, None, cm),
        }
    }
}

/// Meld roster knowledge into the event's users and record new
/// sightings back into the roster.
fn resolve_users(event: &mut Event, state: &mut CoreState) {
    let cm = state.case();
    for user in [&mut event.sender, &mut event.target] {
        if user.nickname.is_empty() || user.is_server {
            continue;
        }
        if let Some(known) = state.roster.lookup_user(&user.nickname, cm) {
            user.meld(known);
        }
        if !user.account.is_empty() && user.class == UserClass::Anyone {
            user.class = UserClass::Registered;
        }
        if is_admin(state, user) {
            user.class = user.class.max(UserClass::Operator);
        }
        state.roster.upsert_user(user.clone(), cm);
        if let Some(known) = state.roster.lookup_user_mut(&user.nickname, cm) {
            // Propagate upgrades (class, account) into the cache too.
            known.meld(user);
            if user.class > known.class {
                known.class = user.class;
            }
        }
    }
    // WHOIS replies are about the nick in the first aux slot, not about
    // us.
    if event.kind.is_whois_reply()
        && let Some(nick) = event.aux[0].clone()
    {
        event.target = state
            .roster
            .lookup_user(&nick, cm)
            .cloned()
            .unwrap_or_else(|| User::from_nickname(nick));
    }
}

fn is_admin(state: &CoreState, user: &User) -> bool {
    let cm = state.case();
    state.config.bot.admins.iter().any(|admin| {
        (!user.account.is_empty() && cm.eq_ignore_case(admin, &user.account))
            || cm.eq_ignore_case(admin, &user.nickname)
    })
}

/// §"target is us": outside the keep-list, a target naming the bot is
/// noise and is emptied before plugins see it.
fn clear_self_target(event: &mut Event, state: &CoreState) {
    if !event.target.nickname.is_empty()
        && state.is_me(&event.target.nickname)
        && !KEEP_SELF_TARGET.contains(&event.kind)
        && !event.kind.is_whois_reply()
    {
        event.target = User::default();
    }
}
