use crate::tags::Tags;
use crate::user::User;
use std::fmt;

/// Number of auxiliary string slots on an [`Event`].
pub const AUX_FIELDS: usize = 8;

/// Number of auxiliary count slots on an [`Event`].
pub const COUNT_FIELDS: usize = 8;

/// Semantic category of an [`Event`].
///
/// Every inbound line maps to exactly one kind.  Verbs and numerics the
/// tables do not know degrade to [`EventKind::Unset`] and
/// [`EventKind::Numeric`] respectively; they are still dispatched so that
/// logging plugins can record them.  [`EventKind::Any`] never appears on an
/// event; it exists as a handler-subscription wildcard.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EventKind {
    Unset,
    Any,

    // Core traffic
    Chan,
    Query,
    Emote,
    Notice,
    Join,
    Part,
    Quit,
    Nick,
    SelfNick,
    Mode,
    Topic,
    Kick,
    Invite,
    Ping,
    Pong,
    Error,
    Away,
    Back,
    Account,
    Wallops,

    // Registration & capabilities
    Cap,
    SaslAuthenticate,
    SaslSuccess,
    SaslFailure,
    LoggedIn,
    Welcome,
    YourHost,
    ServerCreated,
    MyInfo,
    ISupport,
    MotdStart,
    Motd,
    EndOfMotd,

    // List replies
    NamesReply,
    EndOfNames,
    WhoReply,
    EndOfWho,
    ListStart,
    ListReply,
    ListEnd,
    BanList,
    EndOfBanList,

    // WHOIS family
    WhoisUser,
    WhoisServer,
    WhoisOperator,
    WhoisIdle,
    WhoisChannels,
    WhoisAccount,
    WhoisSecure,
    EndOfWhois,

    TopicReply,
    NoTopic,
    TopicWhoTime,
    ChannelModeIs,
    UserModeIs,
    NicknameInUse,
    ErroneousNickname,

    /// A numeric reply not covered by a more specific kind; `num` carries
    /// the code.
    Numeric,

    // CTCP
    CtcpVersion,
    CtcpPing,
    CtcpTime,
    CtcpClientinfo,
    CtcpSource,
    CtcpUserinfo,
    CtcpFinger,
    CtcpQuery,
    CtcpReply,

    // Twitch
    TwitchSub,
    TwitchSubGift,
    TwitchBulkGift,
    TwitchGiftChain,
    TwitchGiftReceived,
    TwitchSubUpgrade,
    TwitchRaid,
    TwitchUnraid,
    TwitchRitual,
    TwitchBitsBadge,
    TwitchAnnouncement,
    TwitchBan,
    TwitchTimeout,
    ClearChat,
    ClearMsg,
    Whisper,
    RoomState,
    UserState,
    GlobalUserState,
    Reconnect,
    HostTarget,
}

impl EventKind {
    pub fn is_numeric_reply(self) -> bool {
        matches!(
            self,
            EventKind::Welcome
                | EventKind::YourHost
                | EventKind::ServerCreated
                | EventKind::MyInfo
                | EventKind::ISupport
                | EventKind::MotdStart
                | EventKind::Motd
                | EventKind::EndOfMotd
                | EventKind::NamesReply
                | EventKind::EndOfNames
                | EventKind::WhoReply
                | EventKind::EndOfWho
                | EventKind::ListStart
                | EventKind::ListReply
                | EventKind::ListEnd
                | EventKind::BanList
                | EventKind::EndOfBanList
                | EventKind::WhoisUser
                | EventKind::WhoisServer
                | EventKind::WhoisOperator
                | EventKind::WhoisIdle
                | EventKind::WhoisChannels
                | EventKind::WhoisAccount
                | EventKind::WhoisSecure
                | EventKind::EndOfWhois
                | EventKind::TopicReply
                | EventKind::NoTopic
                | EventKind::TopicWhoTime
                | EventKind::ChannelModeIs
                | EventKind::UserModeIs
                | EventKind::NicknameInUse
                | EventKind::ErroneousNickname
                | EventKind::LoggedIn
                | EventKind::SaslSuccess
                | EventKind::SaslFailure
                | EventKind::Numeric
        )
    }

    /// Whether this kind belongs to the WHOIS reply family.
    pub fn is_whois_reply(self) -> bool {
        matches!(
            self,
            EventKind::WhoisUser
                | EventKind::WhoisServer
                | EventKind::WhoisOperator
                | EventKind::WhoisIdle
                | EventKind::WhoisChannels
                | EventKind::WhoisAccount
                | EventKind::WhoisSecure
                | EventKind::EndOfWhois
        )
    }
}

/// A channel named on an event.  Only the name and the service-assigned id
/// (Twitch room id) travel on events; membership and modes live in the
/// bot's roster.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ChannelRef {
    pub name: String,
    pub id: Option<String>,
}

impl ChannelRef {
    pub fn new(name: impl Into<String>) -> ChannelRef {
        ChannelRef {
            name: name.into(),
            id: None,
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A parsed, postprocessed unit derived from exactly one inbound line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub tags: Tags,
    pub sender: User,
    pub target: User,
    pub channel: Option<ChannelRef>,
    pub subchannel: Option<ChannelRef>,
    pub content: String,
    pub alt_content: String,
    pub aux: [Option<String>; AUX_FIELDS],
    pub count: [Option<i64>; COUNT_FIELDS],
    pub num: Option<u16>,
    /// Wall-clock receipt time, unix seconds.
    pub time: i64,
    /// The line as it came off the wire, always retained.
    pub raw: String,
    /// Parse/postprocess diagnostics; empty when the line was understood
    /// in full.
    pub errors: String,
}

impl Default for EventKind {
    fn default() -> EventKind {
        EventKind::Unset
    }
}

impl Event {
    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_ref().map(|c| c.name.as_str())
    }

    pub fn note_error(&mut self, msg: impl AsRef<str>) {
        if !self.errors.is_empty() {
            self.errors.push_str("; ");
        }
        self.errors.push_str(msg.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_screaming_snake() {
        assert_eq!(EventKind::Chan.to_string(), "CHAN");
        assert_eq!(EventKind::SelfNick.to_string(), "SELF_NICK");
        assert_eq!(EventKind::TwitchSubGift.to_string(), "TWITCH_SUB_GIFT");
        assert_eq!("CLEAR_CHAT".parse::<EventKind>().unwrap(), EventKind::ClearChat);
    }

    #[test]
    fn note_error_joins() {
        let mut ev = Event::default();
        ev.note_error("first");
        ev.note_error("second");
        assert_eq!(ev.errors, "first; second");
    }
}
