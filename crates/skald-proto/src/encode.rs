use crate::ctcp::ctcp_wrap;
use crate::tags::Tags;

/// Maximum payload of an outgoing line, excluding the CR LF the transport
/// appends.
pub const MAX_LINE_PAYLOAD: usize = 510;

/// An outgoing message, rendered to a single wire line by
/// [`Outbound::render`].
///
/// Rendering is a pure function of the message; rate limiting and CR LF
/// framing are the transport's business.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outbound {
    Privmsg {
        target: String,
        text: String,
        /// When set, the message is a Twitch-style reply and a
        /// `reply-parent-msg-id` tag is attached.
        reply_parent: Option<String>,
    },
    Notice {
        target: String,
        text: String,
    },
    CtcpQuery {
        target: String,
        command: String,
        params: String,
    },
    CtcpReply {
        target: String,
        command: String,
        params: String,
    },
    Join {
        channel: String,
        key: Option<String>,
    },
    Part {
        channel: String,
        reason: Option<String>,
    },
    Quit {
        reason: Option<String>,
    },
    Nick {
        nickname: String,
    },
    Ping {
        payload: String,
    },
    Pong {
        payload: String,
    },
    /// An already-formed line, sent verbatim (still length-clamped).
    Raw(String),
}

impl Outbound {
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Outbound {
        Outbound::Privmsg {
            target: target.into(),
            text: text.into(),
            reply_parent: None,
        }
    }

    pub fn notice(target: impl Into<String>, text: impl Into<String>) -> Outbound {
        Outbound::Notice {
            target: target.into(),
            text: text.into(),
        }
    }

    pub fn raw(line: impl Into<String>) -> Outbound {
        Outbound::Raw(line.into())
    }

    pub fn render(&self) -> String {
        let line = match self {
            Outbound::Privmsg {
                target,
                text,
                reply_parent,
            } => {
                let mut line = String::new();
                if let Some(parent) = reply_parent {
                    let mut tags = Tags::new();
                    tags.push("reply-parent-msg-id", parent.clone());
                    line.push('@');
                    line.push_str(&tags.to_string());
                    line.push(' ');
                }
                line.push_str(&assemble("PRIVMSG", &[target], text));
                line
            }
            Outbound::Notice { target, text } => assemble("NOTICE", &[target], text),
            Outbound::CtcpQuery {
                target,
                command,
                params,
            } => assemble("PRIVMSG", &[target], &ctcp_wrap(command, params)),
            Outbound::CtcpReply {
                target,
                command,
                params,
            } => assemble("NOTICE", &[target], &ctcp_wrap(command, params)),
            Outbound::Join { channel, key } => match key {
                Some(key) => format!("JOIN {channel} {key}"),
                None => format!("JOIN {channel}"),
            },
            Outbound::Part { channel, reason } => match reason {
                Some(reason) => assemble("PART", &[channel], reason),
                None => format!("PART {channel}"),
            },
            Outbound::Quit { reason } => match reason {
                Some(reason) => assemble("QUIT", &[], reason),
                None => "QUIT".to_owned(),
            },
            Outbound::Nick { nickname } => format!("NICK {nickname}"),
            Outbound::Ping { payload } => format!("PING :{payload}"),
            Outbound::Pong { payload } => format!("PONG :{payload}"),
            Outbound::Raw(line) => line.clone(),
        };
        clamp_line(line)
    }
}

/// `VERB middles… :trailing`, applying the trailing-colon rule.
fn assemble(verb: &str, middles: &[&str], trailing: &str) -> String {
    let mut line = verb.to_owned();
    for p in middles {
        line.push(' ');
        line.push_str(p);
    }
    line.push(' ');
    if trailing.is_empty() || trailing.starts_with(':') || trailing.contains(' ') {
        line.push(':');
    }
    line.push_str(trailing);
    line
}

/// Truncate a line to [`MAX_LINE_PAYLOAD`] bytes on a char boundary.
pub fn clamp_line(mut line: String) -> String {
    if line.len() > MAX_LINE_PAYLOAD {
        let mut end = MAX_LINE_PAYLOAD;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line.truncate(end);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privmsg_with_spaces_gets_colon() {
        assert_eq!(
            Outbound::privmsg("#ch", "hello world").render(),
            "PRIVMSG #ch :hello world"
        );
    }

    #[test]
    fn single_word_skips_colon() {
        assert_eq!(Outbound::privmsg("#ch", "hi").render(), "PRIVMSG #ch hi");
    }

    #[test]
    fn empty_and_colon_leading_text() {
        assert_eq!(Outbound::privmsg("#ch", "").render(), "PRIVMSG #ch :");
        assert_eq!(Outbound::privmsg("#ch", ":)").render(), "PRIVMSG #ch ::)");
    }

    #[test]
    fn twitch_reply_tag() {
        let msg = Outbound::Privmsg {
            target: "#ch".to_owned(),
            text: "sure".to_owned(),
            reply_parent: Some("abc-123".to_owned()),
        };
        assert_eq!(
            msg.render(),
            "@reply-parent-msg-id=abc-123 PRIVMSG #ch sure"
        );
    }

    #[test]
    fn ctcp_reply() {
        let msg = Outbound::CtcpReply {
            target: "alice".to_owned(),
            command: "VERSION".to_owned(),
            params: "skald 0.1".to_owned(),
        };
        assert_eq!(msg.render(), "NOTICE alice :\x01VERSION skald 0.1\x01");
    }

    #[test]
    fn clamped_to_510_bytes() {
        let long = "x".repeat(600);
        let rendered = Outbound::privmsg("#ch", long).render();
        assert_eq!(rendered.len(), MAX_LINE_PAYLOAD);
    }

    #[test]
    fn clamp_respects_char_boundaries() {
        let mut line = "y".repeat(MAX_LINE_PAYLOAD - 1);
        line.push('é');
        let clamped = clamp_line(line);
        assert!(clamped.len() <= MAX_LINE_PAYLOAD);
        assert!(clamped.is_char_boundary(clamped.len()));
    }
}
