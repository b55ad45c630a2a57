//! Transport plumbing for skald IRC connections: TCP/TLS establishment,
//! CR LF line framing, SASL PLAIN, and reconnect backoff.  Everything
//! above the line level (parsing, registration, dispatch) lives in the
//! application crate.

mod backoff;
mod codec;
mod connect;
mod sasl;

pub use crate::backoff::Backoff;
pub use crate::codec::{FrameError, IrcCodec};
pub use crate::connect::{ConnectError, Connection, IrcChannel, PLAIN_PORT, TLS_PORT, connect};
pub use crate::sasl::{SaslOutcome, SaslPlain};
