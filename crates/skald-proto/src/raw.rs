use crate::source::Prefix;
use crate::tags::Tags;
use std::fmt;
use thiserror::Error;

/// A wire line split into its syntactic pieces, before any semantic
/// interpretation: `@tags :prefix VERB params… :trailing`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawLine {
    pub tags: Tags,
    pub prefix: Option<Prefix>,
    pub verb: String,
    pub params: Vec<String>,
    /// Whether the final parameter was sent with a `:` marker.  Retained so
    /// that re-encoding reproduces the original line.
    pub trailing: bool,
}

impl RawLine {
    pub fn last_param(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// The numeric reply code, if the verb is a three-digit numeric.
    pub fn numeric(&self) -> Option<u16> {
        (self.verb.len() == 3 && self.verb.bytes().all(|b| b.is_ascii_digit()))
            .then(|| self.verb.parse().ok())
            .flatten()
    }
}

impl fmt::Display for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            write!(f, "@{} ", self.tags)?;
        }
        if let Some(prefix) = self.prefix.as_ref() {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.verb)?;
        if let [head @ .., last] = self.params.as_slice() {
            for p in head {
                write!(f, " {p}")?;
            }
            if self.trailing || last.is_empty() || last.starts_with(':') || last.contains(' ') {
                write!(f, " :{last}")?;
            } else {
                write!(f, " {last}")?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for RawLine {
    type Err = ParseRawLineError;

    // `s` may optionally end with LF, CR LF, or CR.
    fn from_str(s: &str) -> Result<RawLine, ParseRawLineError> {
        let mut s = s.strip_suffix('\n').unwrap_or(s);
        s = s.strip_suffix('\r').unwrap_or(s);
        let tags = if let Some(s2) = s.strip_prefix('@') {
            let (tag_str, rest) = split_word(s2);
            s = rest;
            Tags::parse(tag_str)
        } else {
            Tags::new()
        };
        let prefix = if let Some(s2) = s.strip_prefix(':') {
            let (prefix_str, rest) = split_word(s2);
            s = rest;
            if prefix_str.is_empty() {
                return Err(ParseRawLineError::EmptyPrefix);
            }
            Some(Prefix::parse(prefix_str))
        } else {
            None
        };
        let (verb, mut s) = split_word(s);
        if verb.is_empty() {
            return Err(ParseRawLineError::NoVerb);
        }
        if !verb
            .bytes()
            .all(|b| b.is_ascii_alphabetic() || b.is_ascii_digit())
        {
            return Err(ParseRawLineError::BadVerb(verb.to_owned()));
        }
        let mut params = Vec::new();
        let mut trailing = false;
        while !s.is_empty() {
            if let Some(rest) = s.strip_prefix(':') {
                params.push(rest.to_owned());
                trailing = true;
                break;
            }
            let (word, rest) = split_word(s);
            params.push(word.to_owned());
            s = rest;
        }
        Ok(RawLine {
            tags,
            prefix,
            verb: verb.to_owned(),
            params,
            trailing,
        })
    }
}

/// Split off the first space-delimited word, eating any run of spaces
/// after it.
pub(crate) fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(' ') {
        Some((s1, s2)) => (s1, s2.trim_start_matches(' ')),
        None => (s, ""),
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseRawLineError {
    #[error("line has no command verb")]
    NoVerb,
    #[error("command verb {0:?} is neither alphabetic nor a numeric")]
    BadVerb(String),
    #[error("line has an empty source prefix")]
    EmptyPrefix,
}

#[cfg(test)]
mod parser_tests {
    // Test cases from <https://github.com/ircdocs/parser-tests>' msg-split
    // corpus.
    use super::*;

    fn parse(s: &str) -> RawLine {
        s.parse::<RawLine>().unwrap()
    }

    #[test]
    fn simple() {
        let msg = parse("foo bar baz asdf");
        assert!(msg.tags.is_empty());
        assert!(msg.prefix.is_none());
        assert_eq!(msg.verb, "foo");
        assert_eq!(msg.params, ["bar", "baz", "asdf"]);
        assert!(!msg.trailing);
    }

    #[test]
    fn with_source() {
        let msg = parse(":coolguy foo bar baz asdf");
        assert_eq!(msg.prefix.unwrap().to_string(), "coolguy");
        assert_eq!(msg.verb, "foo");
        assert_eq!(msg.params, ["bar", "baz", "asdf"]);
    }

    #[test]
    fn with_trailing_param() {
        let msg = parse("foo bar baz :asdf quux");
        assert_eq!(msg.params, ["bar", "baz", "asdf quux"]);
        assert!(msg.trailing);
    }

    #[test]
    fn with_empty_trailing_param() {
        let msg = parse("foo bar baz :");
        assert_eq!(msg.params, ["bar", "baz", ""]);
        assert!(msg.trailing);
    }

    #[test]
    fn with_colon_in_trailing() {
        let msg = parse("foo bar baz ::asdf");
        assert_eq!(msg.params, ["bar", "baz", ":asdf"]);
    }

    #[test]
    fn trailing_whitespace_preserved() {
        let msg = parse(":coolguy foo bar baz :  asdf quux ");
        assert_eq!(msg.params, ["bar", "baz", "  asdf quux "]);
    }

    #[test]
    fn trailing_with_smiley() {
        let msg = parse(":coolguy PRIVMSG bar :lol :) ");
        assert_eq!(msg.verb, "PRIVMSG");
        assert_eq!(msg.params, ["bar", "lol :) "]);
    }

    #[test]
    fn with_tags_and_source() {
        let msg = parse("@c;h=;a=b :quux ab cd");
        assert_eq!(msg.tags.get("a"), Some("b"));
        assert_eq!(msg.tags.get("c"), Some(""));
        assert_eq!(msg.prefix.unwrap().to_string(), "quux");
        assert_eq!(msg.verb, "ab");
        assert_eq!(msg.params, ["cd"]);
    }

    #[test]
    fn last_param_with_and_without_colon() {
        assert_eq!(parse(":src JOIN #chan").params, ["#chan"]);
        assert_eq!(parse(":src JOIN :#chan").params, ["#chan"]);
    }

    #[test]
    fn no_params_trailing_space() {
        let msg = parse(":src AWAY ");
        assert_eq!(msg.verb, "AWAY");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn numeric_with_double_space() {
        let msg = parse(":gravel.mozilla.org 432  #momo :Erroneous Nickname: Illegal characters");
        assert_eq!(msg.numeric(), Some(432));
        assert_eq!(
            msg.params,
            ["#momo", "Erroneous Nickname: Illegal characters"]
        );
    }

    #[test]
    fn mode_trailing_space_stripped() {
        let msg = parse(":gravel.mozilla.org MODE #tckk +n ");
        assert_eq!(msg.params, ["#tckk", "+n"]);
    }

    #[test]
    fn vendor_tags() {
        let msg = parse(
            "@tag1=value1;tag2;vendor1/tag3=value2;vendor2/tag4= :irc.example.com COMMAND param1 param2 :param3 param3",
        );
        assert_eq!(msg.tags.get("vendor1/tag3"), Some("value2"));
        assert_eq!(msg.tags.get("vendor2/tag4"), Some(""));
        assert_eq!(msg.params, ["param1", "param2", "param3 param3"]);
    }

    #[test]
    fn just_command() {
        let msg = parse("COMMAND");
        assert!(msg.tags.is_empty());
        assert!(msg.prefix.is_none());
        assert_eq!(msg.verb, "COMMAND");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn rejects_missing_verb() {
        assert_eq!(
            ":prefix".parse::<RawLine>().unwrap_err(),
            ParseRawLineError::NoVerb
        );
        assert_eq!("".parse::<RawLine>().unwrap_err(), ParseRawLineError::NoVerb);
    }

    #[test]
    fn rejects_bad_verb() {
        assert_eq!(
            "PRIV!MSG #chan :hi".parse::<RawLine>().unwrap_err(),
            ParseRawLineError::BadVerb("PRIV!MSG".to_owned())
        );
    }

    #[test]
    fn display_round_trip() {
        for line in [
            "foo bar baz asdf",
            ":coolguy foo bar baz :asdf quux",
            "@a=b;c=32;k;rt=ql7 foo",
            "@a=b\\\\and\\nk;c=72\\s45;d=gh\\:764 foo",
            ":src JOIN #chan",
            ":coolguy PRIVMSG bar :lol :) ",
            "foo bar baz :",
        ] {
            assert_eq!(line.parse::<RawLine>().unwrap().to_string(), line);
        }
    }
}
