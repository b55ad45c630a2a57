use std::fmt;

/// IRCv3 message tags, kept in the order they appeared on the wire.
///
/// Tag values are stored unescaped; [`fmt::Display`] re-applies the escape
/// sequences from the message-tags specification.  Duplicate keys are kept
/// (the spec says the last occurrence wins; [`Tags::get`] honours that).
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    pub fn new() -> Tags {
        Tags(Vec::new())
    }

    /// Parse the body of a `@…` tag prefix (without the leading `@`).
    pub fn parse(s: &str) -> Tags {
        let mut tags = Vec::new();
        for part in s.split(';') {
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((key, value)) => tags.push((key.to_owned(), unescape_value(value))),
                None => tags.push((part.to_owned(), String::new())),
            }
        }
        Tags(tags)
    }

    /// Value of the last occurrence of `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }

    /// Like [`Tags::get`], but treats an empty value as absent.
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            f.write_str(key)?;
            if !value.is_empty() {
                write!(f, "={}", Escaped(value))?;
            }
        }
        Ok(())
    }
}

fn unescape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some(':') => out.push(';'),
                Some('s') => out.push(' '),
                Some('\\') => out.push('\\'),
                Some('r') => out.push('\r'),
                Some('n') => out.push('\n'),
                // A lone trailing backslash and unknown escapes drop the
                // backslash, per the message-tags spec.
                Some(c) => out.push(c),
                None => (),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in self.0.chars() {
            match ch {
                ';' => f.write_str("\\:")?,
                ' ' => f.write_str("\\s")?,
                '\\' => f.write_str("\\\\")?,
                '\r' => f.write_str("\\r")?,
                '\n' => f.write_str("\\n")?,
                ch => write!(f, "{ch}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic() {
        let tags = Tags::parse("a=b;c=32;k;rt=ql7");
        assert_eq!(
            tags.iter().collect::<Vec<_>>(),
            [("a", "b"), ("c", "32"), ("k", ""), ("rt", "ql7")]
        );
    }

    #[test]
    fn parse_escapes() {
        let tags = Tags::parse("a=b\\\\and\\nk;c=72\\s45;d=gh\\:764");
        assert_eq!(tags.get("a"), Some("b\\and\nk"));
        assert_eq!(tags.get("c"), Some("72 45"));
        assert_eq!(tags.get("d"), Some("gh;764"));
    }

    #[test]
    fn parse_dangling_backslash() {
        let tags = Tags::parse("tag1=value1\\");
        assert_eq!(tags.get("tag1"), Some("value1"));
    }

    #[test]
    fn parse_unknown_escape() {
        let tags = Tags::parse("tag1=value\\1");
        assert_eq!(tags.get("tag1"), Some("value1"));
    }

    #[test]
    fn duplicate_key_last_wins() {
        let tags = Tags::parse("tag1=1;tag2=3;tag1=5");
        assert_eq!(tags.get("tag1"), Some("5"));
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn display_round_trip() {
        let raw = "a=b\\\\and\\nk;c=72\\s45;d=gh\\:764;flag";
        let tags = Tags::parse(raw);
        assert_eq!(tags.to_string(), raw);
    }
}
