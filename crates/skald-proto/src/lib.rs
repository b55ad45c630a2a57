//! Parsing, typing & encoding of IRC traffic.
//!
//! The crate turns single wire lines (without their CR LF) into flat
//! [`Event`] records carrying a closed [`EventKind`] tag, and renders
//! outgoing traffic back into lines.  Server-dependent behaviour
//! (case-mapping, channel prefixes, daemon flavour) is captured in a
//! [`ServerProfile`] that both directions consult.

mod casemap;
mod ctcp;
mod encode;
mod event;
mod isupport;
mod numerics;
mod parse;
mod profile;
mod raw;
mod source;
mod tags;
mod user;
mod verbs;

pub use crate::casemap::CaseMapping;
pub use crate::ctcp::{CtcpKind, ctcp_split, ctcp_wrap};
pub use crate::encode::{MAX_LINE_PAYLOAD, Outbound, clamp_line};
pub use crate::event::{AUX_FIELDS, COUNT_FIELDS, ChannelRef, Event, EventKind};
pub use crate::isupport::{ISupportToken, parse_isupport_tokens};
pub use crate::numerics::{num, reply_kind};
pub use crate::parse::parse_event;
pub use crate::profile::{Daemon, ServerProfile};
pub use crate::raw::{ParseRawLineError, RawLine};
pub use crate::source::Prefix;
pub use crate::tags::Tags;
pub use crate::user::{User, UserClass};
