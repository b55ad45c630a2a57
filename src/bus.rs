//! The in-process message bus.
//!
//! Messages are a closed enum rather than string-headed blobs, so a
//! misaddressed message is a compile error.  Delivery is synchronous:
//! everything published while handling an event is fanned out to every
//! plugin before the tick moves on.

/// Control verbs understood by the printer plugin.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PrinterCtl {
    /// Suppress list-reply output for a channel/query key for the next
    /// few seconds (bulk-query noise gate).
    Squelch { key: String },
    /// Lift a squelch early.
    Unsquelch { key: String },
    /// Flush buffered log lines to disk now.
    Flush,
}

/// A message on the bus.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BusMessage {
    Printer(PrinterCtl),
    /// Ask a plugin to re-read its resources from disk.
    Reload { plugin: String },
}
