use crate::event::EventKind;

/// Numeric reply codes the bot refers to by name.
///
/// The set covers RFC 1459/2812, the ISUPPORT draft, and the IRCv3 SASL
/// range; it is deliberately not exhaustive, and codes without a constant
/// still parse and dispatch as [`EventKind::Numeric`].
pub mod num {
    pub const RPL_WELCOME: u16 = 1;
    pub const RPL_YOURHOST: u16 = 2;
    pub const RPL_CREATED: u16 = 3;
    pub const RPL_MYINFO: u16 = 4;
    pub const RPL_ISUPPORT: u16 = 5;
    pub const RPL_UMODEIS: u16 = 221;
    pub const RPL_AWAY: u16 = 301;
    pub const RPL_WHOISUSER: u16 = 311;
    pub const RPL_WHOISSERVER: u16 = 312;
    pub const RPL_WHOISOPERATOR: u16 = 313;
    pub const RPL_ENDOFWHO: u16 = 315;
    pub const RPL_WHOISIDLE: u16 = 317;
    pub const RPL_ENDOFWHOIS: u16 = 318;
    pub const RPL_WHOISCHANNELS: u16 = 319;
    pub const RPL_LISTSTART: u16 = 321;
    pub const RPL_LIST: u16 = 322;
    pub const RPL_LISTEND: u16 = 323;
    pub const RPL_CHANNELMODEIS: u16 = 324;
    pub const RPL_NOTOPIC: u16 = 331;
    pub const RPL_TOPIC: u16 = 332;
    pub const RPL_TOPICWHOTIME: u16 = 333;
    pub const RPL_WHOISACCOUNT: u16 = 330;
    pub const RPL_WHOREPLY: u16 = 352;
    pub const RPL_NAMREPLY: u16 = 353;
    pub const RPL_ENDOFNAMES: u16 = 366;
    pub const RPL_BANLIST: u16 = 367;
    pub const RPL_ENDOFBANLIST: u16 = 368;
    pub const RPL_MOTD: u16 = 372;
    pub const RPL_MOTDSTART: u16 = 375;
    pub const RPL_ENDOFMOTD: u16 = 376;
    pub const ERR_NOMOTD: u16 = 422;
    pub const ERR_ERRONEUSNICKNAME: u16 = 432;
    pub const ERR_NICKNAMEINUSE: u16 = 433;
    pub const RPL_WHOISSECURE: u16 = 671;
    pub const RPL_LOGGEDIN: u16 = 900;
    pub const RPL_SASLSUCCESS: u16 = 903;
    pub const ERR_SASLFAIL: u16 = 904;
    pub const ERR_SASLTOOLONG: u16 = 905;
    pub const ERR_SASLABORTED: u16 = 906;
    pub const ERR_SASLALREADY: u16 = 907;
}

/// Map a numeric reply code to its event kind.  Codes outside the table
/// come back as [`EventKind::Numeric`]; the code itself always travels in
/// `Event::num`.
pub fn reply_kind(code: u16) -> EventKind {
    use self::num::*;
    match code {
        RPL_WELCOME => EventKind::Welcome,
        RPL_YOURHOST => EventKind::YourHost,
        RPL_CREATED => EventKind::ServerCreated,
        RPL_MYINFO => EventKind::MyInfo,
        RPL_ISUPPORT => EventKind::ISupport,
        RPL_UMODEIS => EventKind::UserModeIs,
        RPL_WHOISUSER => EventKind::WhoisUser,
        RPL_WHOISSERVER => EventKind::WhoisServer,
        RPL_WHOISOPERATOR => EventKind::WhoisOperator,
        RPL_ENDOFWHO => EventKind::EndOfWho,
        RPL_WHOISIDLE => EventKind::WhoisIdle,
        RPL_ENDOFWHOIS => EventKind::EndOfWhois,
        RPL_WHOISCHANNELS => EventKind::WhoisChannels,
        RPL_WHOISACCOUNT => EventKind::WhoisAccount,
        RPL_WHOISSECURE => EventKind::WhoisSecure,
        RPL_LISTSTART => EventKind::ListStart,
        RPL_LIST => EventKind::ListReply,
        RPL_LISTEND => EventKind::ListEnd,
        RPL_CHANNELMODEIS => EventKind::ChannelModeIs,
        RPL_NOTOPIC => EventKind::NoTopic,
        RPL_TOPIC => EventKind::TopicReply,
        RPL_TOPICWHOTIME => EventKind::TopicWhoTime,
        RPL_WHOREPLY => EventKind::WhoReply,
        RPL_NAMREPLY => EventKind::NamesReply,
        RPL_ENDOFNAMES => EventKind::EndOfNames,
        RPL_BANLIST => EventKind::BanList,
        RPL_ENDOFBANLIST => EventKind::EndOfBanList,
        RPL_MOTDSTART => EventKind::MotdStart,
        RPL_MOTD => EventKind::Motd,
        RPL_ENDOFMOTD | ERR_NOMOTD => EventKind::EndOfMotd,
        ERR_ERRONEUSNICKNAME => EventKind::ErroneousNickname,
        ERR_NICKNAMEINUSE => EventKind::NicknameInUse,
        RPL_LOGGEDIN => EventKind::LoggedIn,
        RPL_SASLSUCCESS => EventKind::SaslSuccess,
        ERR_SASLFAIL | ERR_SASLTOOLONG | ERR_SASLABORTED | ERR_SASLALREADY => {
            EventKind::SaslFailure
        }
        _ => EventKind::Numeric,
    }
}
