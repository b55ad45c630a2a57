use std::fmt;

/// One token of an `RPL_ISUPPORT` (005) parameter list.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ISupportToken {
    /// `KEY`, a bare flag.
    Set(String),
    /// `-KEY`, retracting an earlier advertisement.
    Unset(String),
    /// `KEY=value`.
    Eq(String, String),
}

impl ISupportToken {
    pub fn key(&self) -> &str {
        match self {
            ISupportToken::Set(key) | ISupportToken::Unset(key) | ISupportToken::Eq(key, _) => key,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            ISupportToken::Eq(_, value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ISupportToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ISupportToken::Set(key) => f.write_str(key),
            ISupportToken::Unset(key) => write!(f, "-{key}"),
            ISupportToken::Eq(key, value) => write!(f, "{key}={value}"),
        }
    }
}

/// Parse the middle parameters of an 005 reply (everything between the
/// client nickname and the trailing "are supported by this server").
///
/// Values may carry `\xHH` escapes; they are decoded here.  Tokens with
/// an invalid shape are skipped rather than failing the whole reply.
pub fn parse_isupport_tokens<'a, I>(params: I) -> Vec<ISupportToken>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tokens = Vec::new();
    for param in params {
        if param.is_empty() {
            continue;
        }
        if let Some((key, value)) = param.split_once('=') {
            if !valid_key(key) {
                continue;
            }
            tokens.push(ISupportToken::Eq(
                key.to_ascii_uppercase(),
                unescape_value(value),
            ));
        } else if let Some(key) = param.strip_prefix('-') {
            if valid_key(key) {
                tokens.push(ISupportToken::Unset(key.to_ascii_uppercase()));
            }
        } else if valid_key(param) {
            tokens.push(ISupportToken::Set(param.to_ascii_uppercase()));
        }
    }
    tokens
}

fn valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn unescape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(i) = rest.find("\\x") {
        out.push_str(&rest[..i]);
        let hex = rest.get(i + 2..i + 4);
        if let Some(hex) = hex
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            out.push(char::from(byte));
            rest = &rest[i + 4..];
        } else {
            out.push_str("\\x");
            rest = &rest[i + 2..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_tokens() {
        let tokens = parse_isupport_tokens([
            "CASEMAPPING=rfc1459",
            "CHANTYPES=#&",
            "EXCEPTS",
            "-KNOCK",
            "PREFIX=(ov)@+",
        ]);
        assert_eq!(
            tokens,
            [
                ISupportToken::Eq("CASEMAPPING".to_owned(), "rfc1459".to_owned()),
                ISupportToken::Eq("CHANTYPES".to_owned(), "#&".to_owned()),
                ISupportToken::Set("EXCEPTS".to_owned()),
                ISupportToken::Unset("KNOCK".to_owned()),
                ISupportToken::Eq("PREFIX".to_owned(), "(ov)@+".to_owned()),
            ]
        );
    }

    #[test]
    fn escaped_space() {
        let tokens = parse_isupport_tokens(["NETWORK=Some\\x20Net"]);
        assert_eq!(tokens[0].value(), Some("Some Net"));
    }

    #[test]
    fn bad_tokens_skipped() {
        let tokens = parse_isupport_tokens(["", "BAD KEY=x", "OK"]);
        assert_eq!(tokens, [ISupportToken::Set("OK".to_owned())]);
    }
}
