use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// The case-mapping in effect on a connection, as advertised by the
/// `CASEMAPPING` ISUPPORT token.  Defaults to `rfc1459`, which is what
/// servers that predate ISUPPORT use.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CaseMapping {
    Ascii,
    #[default]
    Rfc1459,
    Rfc1459Strict,
}

impl CaseMapping {
    pub fn lower_char(self, ch: char) -> char {
        match (self, ch) {
            (_, ch) if ch.is_ascii_alphabetic() => ch.to_ascii_lowercase(),
            (CaseMapping::Rfc1459 | CaseMapping::Rfc1459Strict, '[') => '{',
            (CaseMapping::Rfc1459 | CaseMapping::Rfc1459Strict, ']') => '}',
            (CaseMapping::Rfc1459 | CaseMapping::Rfc1459Strict, '\\') => '|',
            (CaseMapping::Rfc1459, '~') => '^',
            (_, ch) => ch,
        }
    }

    /// Lowercase `s`, borrowing when no character needs folding.
    pub fn lower<'a>(self, s: &'a str) -> Cow<'a, str> {
        if let Some(i) = s
            .char_indices()
            .find_map(|(i, ch)| (self.lower_char(ch) != ch).then_some(i))
        {
            let mut out = s[..i].to_owned();
            for ch in s[i..].chars() {
                out.push(self.lower_char(ch));
            }
            Cow::from(out)
        } else {
            Cow::from(s)
        }
    }

    pub fn eq_ignore_case(self, s1: &str, s2: &str) -> bool {
        s1.len() == s2.len()
            && std::iter::zip(s1.chars(), s2.chars())
                .all(|(c1, c2)| self.lower_char(c1) == self.lower_char(c2))
    }
}

impl fmt::Display for CaseMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaseMapping::Ascii => "ascii",
            CaseMapping::Rfc1459 => "rfc1459",
            CaseMapping::Rfc1459Strict => "rfc1459-strict",
        };
        f.pad(name)
    }
}

impl std::str::FromStr for CaseMapping {
    type Err = ParseCaseMappingError;

    fn from_str(s: &str) -> Result<CaseMapping, ParseCaseMappingError> {
        match s {
            "ascii" => Ok(CaseMapping::Ascii),
            "rfc1459" => Ok(CaseMapping::Rfc1459),
            "rfc1459-strict" => Ok(CaseMapping::Rfc1459Strict),
            _ => Err(ParseCaseMappingError),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
#[error("unknown/unrecognized CASEMAPPING name")]
pub struct ParseCaseMappingError;
