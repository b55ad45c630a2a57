use base64::{Engine, engine::general_purpose::STANDARD};

/// The SASL PLAIN exchange, driven by `AUTHENTICATE` traffic.
///
/// The flow is: we announce the mechanism, the server answers
/// `AUTHENTICATE +`, we send the base64 identity block, and the server
/// closes the exchange with a 903/904-series numeric (handled by the
/// registration machine, not here).  Payloads longer than 400 bytes are
/// split into chunks per the IRCv3 SASL specification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SaslPlain {
    authzid: String,
    authcid: String,
    password: String,
    responded: bool,
}

/// What to put on the wire in response to an `AUTHENTICATE` message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SaslOutcome {
    /// Send these `AUTHENTICATE <chunk>` payloads, in order.
    Respond(Vec<String>),
    /// The server said something the flow does not expect; abort with
    /// `AUTHENTICATE *`.
    Abort,
}

impl SaslPlain {
    pub fn new(account: &str, password: &str) -> SaslPlain {
        SaslPlain {
            authzid: account.to_owned(),
            authcid: account.to_owned(),
            password: password.to_owned(),
            responded: false,
        }
    }

    /// The mechanism announcement that opens the exchange.
    pub fn mechanism(&self) -> &'static str {
        "PLAIN"
    }

    /// Feed the parameter of a server `AUTHENTICATE` message.
    pub fn step(&mut self, param: &str) -> SaslOutcome {
        if param != "+" || self.responded {
            return SaslOutcome::Abort;
        }
        self.responded = true;
        let identity = format!("{}\0{}\0{}", self.authzid, self.authcid, self.password);
        let encoded = STANDARD.encode(identity.as_bytes());
        let mut chunks = encoded
            .as_bytes()
            .chunks(400)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>();
        if chunks.is_empty() {
            chunks.push("+".to_owned());
        } else if chunks.last().is_some_and(|c| c.len() == 400) {
            // A full final chunk needs an explicit empty continuation.
            chunks.push("+".to_owned());
        }
        SaslOutcome::Respond(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_exchange() {
        let mut flow = SaslPlain::new("skald", "hunter2");
        assert_eq!(flow.mechanism(), "PLAIN");
        let SaslOutcome::Respond(chunks) = flow.step("+") else {
            panic!("expected a response");
        };
        assert_eq!(chunks.len(), 1);
        let decoded = STANDARD.decode(&chunks[0]).unwrap();
        assert_eq!(decoded, b"skald\0skald\0hunter2");
    }

    #[test]
    fn unexpected_challenge_aborts() {
        let mut flow = SaslPlain::new("skald", "hunter2");
        assert_eq!(flow.step("bm90aGluZw=="), SaslOutcome::Abort);
    }

    #[test]
    fn double_plus_aborts() {
        let mut flow = SaslPlain::new("skald", "hunter2");
        let _ = flow.step("+");
        assert_eq!(flow.step("+"), SaslOutcome::Abort);
    }

    #[test]
    fn long_identity_is_chunked() {
        let mut flow = SaslPlain::new("a", &"p".repeat(600));
        let SaslOutcome::Respond(chunks) = flow.step("+") else {
            panic!("expected a response");
        };
        assert!(chunks.len() > 1);
        assert!(chunks[..chunks.len() - 1].iter().all(|c| c.len() == 400));
        let rejoined = chunks.concat();
        let rejoined = rejoined.trim_end_matches('+');
        let decoded = STANDARD.decode(rejoined).unwrap();
        assert!(decoded.ends_with(&b"p".repeat(600)));
    }
}
