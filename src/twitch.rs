//! Twitch-specific event refinement.
//!
//! Twitch folds almost all of its chat semantics into IRCv3 tags on a
//! handful of verbs: `USERNOTICE` fans out into subs, gifts, raids and
//! announcements by its `msg-id` tag, `CLEARCHAT` doubles as ban and
//! timeout, and user identity (display name, colour, badges) rides on
//! every message.  None of this is wire syntax, so it lives here as a
//! postprocessing step rather than in the codec.

use skald_proto::{Event, EventKind, User, UserClass};

/// Refine a parsed event using Twitch tag semantics.  Only called when
/// the server profile says the daemon is Twitch.
pub(crate) fn refine(event: &mut Event) {
    apply_identity_tags(&mut event.sender, &event.tags);
    if let Some(channel) = event.channel.as_mut()
        && channel.id.is_none()
        && let Some(room_id) = event.tags.get_nonempty("room-id")
    {
        channel.id = Some(room_id.to_owned());
    }
    match event.kind {
        EventKind::TwitchSub => refine_usernotice(event),
        EventKind::ClearChat => refine_clearchat(event),
        EventKind::ClearMsg => {
            if let Some(login) = event.tags.get_nonempty("login") {
                event.target = User::from_nickname(login);
            }
        }
        _ => (),
    }
}

/// Fill identity fields from the message tags.  Twitch users are always
/// authenticated, so the login doubles as the services account.
fn apply_identity_tags(user: &mut User, tags: &skald_proto::Tags) {
    if user.nickname.is_empty() || user.is_server {
        return;
    }
    if let Some(display) = tags.get_nonempty("display-name") {
        user.display_name = display.to_owned();
    }
    if let Some(colour) = tags.get_nonempty("color") {
        user.colour = colour.to_owned();
    }
    if let Some(badges) = tags.get_nonempty("badges") {
        user.badges = badges.to_owned();
    }
    if user.account.is_empty() {
        user.account = user.nickname.clone();
    }
    let class = class_from_badges(&user.badges);
    if class > user.class {
        user.class = class;
    }
}

fn class_from_badges(badges: &str) -> UserClass {
    let mut class = UserClass::Registered;
    for badge in badges.split(',') {
        let name = badge.split('/').next().unwrap_or_default();
        let badge_class = match name {
            "staff" | "admin" => UserClass::Staff,
            "broadcaster" | "moderator" => UserClass::Operator,
            "vip" => UserClass::Whitelist,
            _ => continue,
        };
        class = class.max(badge_class);
    }
    class
}

fn refine_usernotice(event: &mut Event) {
    let Some(msg_id) = event.tags.get_nonempty("msg-id") else {
        return;
    };
    event.kind = match msg_id {
        "sub" | "resub" => EventKind::TwitchSub,
        "subgift" | "anonsubgift" => EventKind::TwitchSubGift,
        "submysterygift" | "anonsubmysterygift" => EventKind::TwitchBulkGift,
        "giftpaidupgrade" | "anongiftpaidupgrade" => EventKind::TwitchGiftChain,
        "rewardgift" | "extendsub" => EventKind::TwitchGiftReceived,
        "primepaidupgrade" => EventKind::TwitchSubUpgrade,
        "raid" => EventKind::TwitchRaid,
        "unraid" => EventKind::TwitchUnraid,
        "ritual" => EventKind::TwitchRitual,
        "bitsbadgetier" => EventKind::TwitchBitsBadge,
        "announcement" => EventKind::TwitchAnnouncement,
        _ => {
            event.note_error(format!("unknown USERNOTICE msg-id {msg_id:?}"));
            EventKind::TwitchSub
        }
    };
    if let Some(system_msg) = event.tags.get_nonempty("system-msg") {
        event.alt_content = system_msg.to_owned();
    }
    if let Some(recipient) = event.tags.get_nonempty("msg-param-recipient-user-name") {
        event.target = User::from_nickname(recipient);
        if let Some(display) = event.tags.get_nonempty("msg-param-recipient-display-name") {
            event.target.display_name = display.to_owned();
        }
    }
    event.aux[0] = event
        .tags
        .get_nonempty("msg-param-sub-plan")
        .map(str::to_owned);
    event.count[0] = tag_i64(event, "msg-param-cumulative-months")
        .or_else(|| tag_i64(event, "msg-param-mass-gift-count"))
        .or_else(|| tag_i64(event, "msg-param-viewerCount"));
    event.count[1] = tag_i64(event, "msg-param-streak-months");
}

fn refine_clearchat(event: &mut Event) {
    if event.content.is_empty() {
        // Bare CLEARCHAT wipes the whole channel.
        return;
    }
    event.target = User::from_nickname(event.content.clone());
    event.content.clear();
    match event.tags.get_nonempty("ban-duration") {
        Some(duration) => {
            event.kind = EventKind::TwitchTimeout;
            event.count[0] = duration.parse().ok();
        }
        None => event.kind = EventKind::TwitchBan,
    }
}

fn tag_i64(event: &Event, key: &str) -> Option<i64> {
    event.tags.get_nonempty(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skald_proto::{ServerProfile, parse_event};

    fn twitch_parse(line: &str) -> Event {
        let profile = ServerProfile::new("irc.chat.twitch.tv");
        let mut ev = parse_event(line, &profile, 0);
        refine(&mut ev);
        ev
    }

    #[test]
    fn resub_with_months() {
        let ev = twitch_parse(
            "@msg-id=resub;msg-param-cumulative-months=13;msg-param-sub-plan=1000;display-name=Alice;color=#FF0000;badges=subscriber/12;system-msg=Alice\\ssubscribed\\sfor\\s13\\smonths. :alice!alice@alice.tmi.twitch.tv USERNOTICE #hall :still here",
        );
        assert_eq!(ev.kind, EventKind::TwitchSub);
        assert_eq!(ev.count[0], Some(13));
        assert_eq!(ev.aux[0].as_deref(), Some("1000"));
        assert_eq!(ev.alt_content, "Alice subscribed for 13 months.");
        assert_eq!(ev.sender.display_name, "Alice");
        assert_eq!(ev.sender.colour, "#FF0000");
        assert_eq!(ev.sender.account, "alice");
        assert_eq!(ev.content, "still here");
    }

    #[test]
    fn subgift_has_recipient() {
        let ev = twitch_parse(
            "@msg-id=subgift;msg-param-recipient-user-name=bob;msg-param-recipient-display-name=Bob :alice!alice@alice.tmi.twitch.tv USERNOTICE #hall",
        );
        assert_eq!(ev.kind, EventKind::TwitchSubGift);
        assert_eq!(ev.target.nickname, "bob");
        assert_eq!(ev.target.display_name, "Bob");
    }

    #[test]
    fn raid_viewer_count() {
        let ev = twitch_parse(
            "@msg-id=raid;msg-param-viewerCount=42 :tmi.twitch.tv USERNOTICE #hall",
        );
        assert_eq!(ev.kind, EventKind::TwitchRaid);
        assert_eq!(ev.count[0], Some(42));
    }

    #[test]
    fn clearchat_variants() {
        let ban = twitch_parse("@room-id=1 :tmi.twitch.tv CLEARCHAT #hall :troll");
        assert_eq!(ban.kind, EventKind::TwitchBan);
        assert_eq!(ban.target.nickname, "troll");
        assert!(ban.content.is_empty());

        let timeout =
            twitch_parse("@ban-duration=600 :tmi.twitch.tv CLEARCHAT #hall :troll");
        assert_eq!(timeout.kind, EventKind::TwitchTimeout);
        assert_eq!(timeout.count[0], Some(600));

        let wipe = twitch_parse(":tmi.twitch.tv CLEARCHAT #hall");
        assert_eq!(wipe.kind, EventKind::ClearChat);
        assert!(wipe.target.nickname.is_empty());
    }

    #[test]
    fn broadcaster_badge_grants_operator() {
        let ev = twitch_parse(
            "@badges=broadcaster/1;display-name=Host :host!host@host.tmi.twitch.tv PRIVMSG #hall :hi",
        );
        assert_eq!(ev.sender.class, UserClass::Operator);
    }

    #[test]
    fn room_id_becomes_channel_id() {
        let ev = twitch_parse("@room-id=12345 :tmi.twitch.tv ROOMSTATE #hall");
        assert_eq!(ev.channel.unwrap().id.as_deref(), Some("12345"));
    }
}
