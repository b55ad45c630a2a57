//! The printer: terminal output and file logging for everything the
//! dispatcher sees.  It registers at priority −40 so it observes events
//! before any plugin that might consume them, and it is the subscriber
//! behind the bus squelch verbs that keep bulk-query replies (WHO
//! bursts and friends) from flooding the output.

use crate::bus::{BusMessage, PrinterCtl};
use crate::config::SettingDesc;
use crate::plugin::{Flow, HandlerResult, HandlerSpec, Plugin, PluginCtx};
use skald_proto::{Event, EventKind};
use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;

/// Seconds a squelch entry stays live after its last touch.
const SQUELCH_TIMEOUT: i64 = 5;

pub struct PrinterPlugin {
    /// squelch key (channel name, or `*`) → last-touched unix seconds.
    squelches: HashMap<String, i64>,
    /// Lines that could not be written yet, per file.
    buffers: HashMap<PathBuf, String>,
    /// Last `(year, month)` written per channel file, for datestamps.
    months: HashMap<PathBuf, (i16, i8)>,
    logdir: Option<PathBuf>,
    headless: bool,
    log_raw: bool,
    log_server: bool,
    logging_disabled: bool,
}

impl PrinterPlugin {
    pub fn new() -> PrinterPlugin {
        PrinterPlugin {
            squelches: HashMap::new(),
            buffers: HashMap::new(),
            months: HashMap::new(),
            logdir: None,
            headless: false,
            log_raw: false,
            log_server: true,
            logging_disabled: false,
        }
    }

    fn on_event(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        if self.squelched(event) {
            return Ok(Flow::Continue);
        }
        if !self.headless
            && let Some(line) = format_event(event)
        {
            println!("{line}");
        }
        self.log_event(ctx, event);
        Ok(Flow::Continue)
    }

    /// Whether this event is a list reply currently gated by a squelch.
    /// Entries are dropped once they have been stale for the timeout;
    /// events do not refresh them.
    fn squelched(&mut self, event: &Event) -> bool {
        if !is_list_reply(event.kind) {
            return false;
        }
        let now = event.time;
        self.squelches
            .retain(|_, touched| now - *touched < SQUELCH_TIMEOUT);
        match event.channel_name() {
            Some(chan) => {
                self.squelches.contains_key(&chan.to_ascii_lowercase())
                    || self.squelches.contains_key("*")
            }
            None => self.squelches.contains_key("*"),
        }
    }

    fn log_event(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) {
        let Some(logdir) = self.logdir.clone() else {
            return;
        };
        if self.logging_disabled {
            return;
        }
        let server = ctx.state.borrow().profile.address.clone();
        if self.log_raw {
            let path = logdir.join("raw.log");
            self.append(&path, &event.raw);
        }
        if !event.errors.is_empty() {
            let path = logdir.join("error.log");
            let line = format!("{} {:?}: {}", event.kind, event.raw, event.errors);
            self.append(&path, &line);
        }
        let Some(line) = format_event(event) else {
            return;
        };
        let stamped = format!("[{}] {line}", clock(event.time));
        match event.channel_name() {
            Some(chan) => {
                let (year, month) = year_month(event.time);
                let path =
                    crate::persist::channel_log_path(&logdir, chan, year, month);
                if self.months.get(&path) != Some(&(year, month)) {
                    let datestamp = format!("-- {year:04}-{month:02} --");
                    self.append(&path, &datestamp);
                    self.months.insert(path.clone(), (year, month));
                }
                self.append(&path, &stamped);
            }
            None if self.log_server => {
                let path = crate::persist::server_log_path(&logdir, &server);
                self.append(&path, &stamped);
            }
            None => (),
        }
    }

    /// Append a line to a log file, buffering it for retry when the
    /// write fails.  A log directory that cannot be created disables
    /// logging with a single warning.
    fn append(&mut self, path: &PathBuf, line: &str) {
        let buffer = self.buffers.entry(path.clone()).or_default();
        buffer.push_str(line);
        buffer.push('\n');
        if let Err(e) = flush_file(path, buffer) {
            if !path.parent().is_some_and(std::path::Path::exists) {
                tracing::warn!(error = %e, path = %path.display(), "Cannot create log directory; file logging disabled");
                self.logging_disabled = true;
                self.buffers.clear();
            }
            // Otherwise the lines stay buffered for the next attempt.
        } else {
            buffer.clear();
            if buffer.capacity() > 64 * 1024 {
                buffer.shrink_to_fit();
            }
        }
    }

    fn flush_all(&mut self) {
        let paths: Vec<PathBuf> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(p, _)| p.clone())
            .collect();
        for path in paths {
            if let Some(buffer) = self.buffers.get_mut(&path)
                && flush_file(&path, buffer).is_ok()
            {
                buffer.clear();
            }
        }
    }
}

fn flush_file(path: &PathBuf, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

impl Default for PrinterPlugin {
    fn default() -> Self {
        PrinterPlugin::new()
    }
}

impl Plugin for PrinterPlugin {
    fn name(&self) -> &'static str {
        "printer"
    }

    fn priority(&self) -> i32 {
        -40
    }

    fn handlers() -> Vec<HandlerSpec<Self>> {
        vec![HandlerSpec::on(&[EventKind::Any], PrinterPlugin::on_event)]
    }

    fn settings(&self) -> Vec<SettingDesc> {
        vec![
            SettingDesc::new("log_raw", false, "Log raw wire traffic to raw.log"),
            SettingDesc::new(
                "log_server",
                true,
                "Log channel-less server traffic to server.log",
            ),
        ]
    }

    fn configure(&mut self, section: &toml::Table) -> Result<(), crate::plugin::InitError> {
        if let Some(v) = section.get("log_raw").and_then(toml::Value::as_bool) {
            self.log_raw = v;
        }
        if let Some(v) = section.get("log_server").and_then(toml::Value::as_bool) {
            self.log_server = v;
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), crate::plugin::InitError> {
        let st = ctx.state.borrow();
        self.headless = st.config.core.headless;
        self.logdir = st.config.core.log_dir.clone();
        Ok(())
    }

    fn teardown(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), crate::plugin::InitError> {
        self.flush_all();
        Ok(())
    }

    fn on_bus(&mut self, _ctx: &mut PluginCtx<'_>, message: &BusMessage) {
        let BusMessage::Printer(ctl) = message else {
            return;
        };
        match ctl {
            PrinterCtl::Squelch { key } => {
                let now = jiff::Timestamp::now().as_second();
                self.squelches.insert(key.to_ascii_lowercase(), now);
            }
            PrinterCtl::Unsquelch { key } => {
                self.squelches.remove(&key.to_ascii_lowercase());
            }
            PrinterCtl::Flush => self.flush_all(),
        }
    }
}

/// Replies that arrive in bursts after bulk queries.
fn is_list_reply(kind: EventKind) -> bool {
    kind.is_whois_reply()
        || matches!(
            kind,
            EventKind::WhoReply
                | EventKind::EndOfWho
                | EventKind::NamesReply
                | EventKind::EndOfNames
                | EventKind::ListStart
                | EventKind::ListReply
                | EventKind::ListEnd
                | EventKind::BanList
                | EventKind::EndOfBanList
                | EventKind::ChannelModeIs
                | EventKind::TopicReply
                | EventKind::TopicWhoTime
        )
}

fn clock(unix: i64) -> String {
    match jiff::Timestamp::from_second(unix) {
        Ok(ts) => ts.strftime("%H:%M:%S").to_string(),
        Err(_) => "??:??:??".to_owned(),
    }
}

fn year_month(unix: i64) -> (i16, i8) {
    match jiff::Timestamp::from_second(unix) {
        Ok(ts) => {
            let date = ts.to_zoned(jiff::tz::TimeZone::UTC).date();
            (date.year(), date.month())
        }
        Err(_) => (1970, 1),
    }
}

/// Human-readable rendition of an event, or `None` for pure plumbing
/// traffic nobody wants to read.
fn format_event(event: &Event) -> Option<String> {
    let who = event.sender.shown_name();
    let place = event
        .channel_name()
        .map(str::to_owned)
        .unwrap_or_else(|| "*".to_owned());
    let line = match event.kind {
        EventKind::Ping | EventKind::Pong => return None,
        EventKind::Chan => format!("[{place}] <{who}> {}", event.content),
        EventKind::Query => format!("[query] <{who}> {}", event.content),
        EventKind::Emote => format!("[{place}] * {who} {}", event.content),
        EventKind::Notice => format!("[{place}] -{who}- {}", event.content),
        EventKind::Join => format!("[{place}] --> {who} joined"),
        EventKind::Part => format!("[{place}] <-- {who} left ({})", event.content),
        EventKind::Quit => format!("[*] <-- {who} quit ({})", event.content),
        EventKind::Nick | EventKind::SelfNick => {
            format!("[*] {who} is now known as {}", event.target.nickname)
        }
        EventKind::Mode => format!(
            "[{place}] {who} set mode {} {}",
            event.aux[0].as_deref().unwrap_or(""),
            event.content
        ),
        EventKind::Topic => format!("[{place}] {who} set the topic to: {}", event.content),
        EventKind::Kick => format!(
            "[{place}] {who} kicked {} ({})",
            event.target.nickname, event.content
        ),
        EventKind::Error => format!("[*] server error: {}", event.content),
        EventKind::TwitchSub => format!("[{place}] {}", event.alt_content),
        EventKind::TwitchSubGift | EventKind::TwitchBulkGift | EventKind::TwitchGiftChain => {
            format!("[{place}] {}", event.alt_content)
        }
        EventKind::TwitchAnnouncement => format!("[{place}] announcement: {}", event.content),
        EventKind::TwitchBan => format!("[{place}] {} was banned", event.target.nickname),
        EventKind::TwitchTimeout => format!(
            "[{place}] {} was timed out for {}s",
            event.target.nickname,
            event.count[0].unwrap_or(0)
        ),
        EventKind::Unset => format!("[?] {}", event.raw),
        kind if kind.is_numeric_reply() => {
            let num = event.num.unwrap_or(0);
            format!("[{num:03}] {}", event.content)
        }
        _ => format!("[{}] {}", event.kind, event.content),
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sched::Scheduler;
    use crate::state::CoreState;
    use skald_proto::{ChannelRef, User};

    fn event_at(kind: EventKind, chan: Option<&str>, time: i64) -> Event {
        Event {
            kind,
            channel: chan.map(ChannelRef::new),
            sender: User::from_nickname("alice"),
            content: "x".to_owned(),
            time,
            ..Event::default()
        }
    }

    fn plugin_with_squelch(key: &str, at: i64) -> PrinterPlugin {
        let mut plugin = PrinterPlugin::new();
        plugin.squelches.insert(key.to_owned(), at);
        plugin
    }

    #[test]
    fn squelch_gates_list_replies_for_five_seconds() {
        let now = 1_700_000_000;
        let mut plugin = plugin_with_squelch("#ch", now);
        for offset in [0, 1, 2, 4] {
            assert!(plugin.squelched(&event_at(EventKind::WhoReply, Some("#ch"), now + offset)));
        }
        // Expired: the sixth second is out of the window.
        assert!(!plugin.squelched(&event_at(EventKind::WhoReply, Some("#ch"), now + 6)));
        // And the expiry removed the entry entirely.
        assert!(plugin.squelches.is_empty());
    }

    #[test]
    fn squelch_only_applies_to_list_replies_and_matching_keys() {
        let now = 1_700_000_000;
        let mut plugin = plugin_with_squelch("#ch", now);
        assert!(!plugin.squelched(&event_at(EventKind::Chan, Some("#ch"), now)));
        assert!(!plugin.squelched(&event_at(EventKind::WhoReply, Some("#other"), now)));
        let mut plugin = plugin_with_squelch("*", now);
        assert!(plugin.squelched(&event_at(EventKind::WhoisUser, None, now)));
    }

    #[test]
    fn bus_messages_update_squelches() {
        let mut plugin = PrinterPlugin::new();
        let state = CoreState::shared(Config::default(), "/tmp/skald-test".into());
        let sched = Scheduler::new();
        let mut outbox = Vec::new();
        let mut ctx = PluginCtx::new(&state, &sched, "printer", &mut outbox);
        plugin.on_bus(
            &mut ctx,
            &BusMessage::Printer(PrinterCtl::Squelch {
                key: "#CH".to_owned(),
            }),
        );
        assert!(plugin.squelches.contains_key("#ch"));
        plugin.on_bus(
            &mut ctx,
            &BusMessage::Printer(PrinterCtl::Unsquelch {
                key: "#ch".to_owned(),
            }),
        );
        assert!(plugin.squelches.is_empty());
    }

    #[test]
    fn monthly_rotation_with_datestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = PrinterPlugin::new();
        plugin.logdir = Some(dir.path().to_owned());
        plugin.headless = true;
        let state = CoreState::shared(Config::default(), "/tmp/skald-test".into());
        let sched = Scheduler::new();
        let mut outbox = Vec::new();
        let mut ctx = PluginCtx::new(&state, &sched, "printer", &mut outbox);

        // 2024-01-31T23:59:55Z and 2024-02-01T00:00:01Z.
        let ev1 = event_at(EventKind::Chan, Some("#ch"), 1_706_745_595);
        let ev2 = event_at(EventKind::Chan, Some("#ch"), 1_706_745_601);
        plugin.log_event(&mut ctx, &ev1);
        plugin.log_event(&mut ctx, &ev2);

        let january = std::fs::read_to_string(dir.path().join("#ch/2024-01.log")).unwrap();
        let february = std::fs::read_to_string(dir.path().join("#ch/2024-02.log")).unwrap();
        assert!(january.starts_with("-- 2024-01 --\n"));
        assert!(january.contains("<alice> x"));
        assert!(february.starts_with("-- 2024-02 --\n"));
        assert!(february.contains("<alice> x"));
    }

    #[test]
    fn failed_writes_stay_buffered() {
        let mut plugin = PrinterPlugin::new();
        // A path whose parent exists but which is itself a directory
        // cannot be opened for append; the line must stay buffered.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_owned();
        plugin.append(&path, "kept");
        assert!(plugin.buffers.get(&path).is_some_and(|b| b.contains("kept")));
        assert!(!plugin.logging_disabled);
    }

    #[test]
    fn errors_logged_to_error_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = PrinterPlugin::new();
        plugin.logdir = Some(dir.path().to_owned());
        plugin.headless = true;
        let state = CoreState::shared(Config::default(), "/tmp/skald-test".into());
        let sched = Scheduler::new();
        let mut outbox = Vec::new();
        let mut ctx = PluginCtx::new(&state, &sched, "printer", &mut outbox);
        let mut ev = event_at(EventKind::Unset, None, 1_700_000_000);
        ev.raw = "BOGUS".to_owned();
        ev.note_error("unknown verb");
        plugin.log_event(&mut ctx, &ev);
        let errors = std::fs::read_to_string(dir.path().join("error.log")).unwrap();
        assert!(errors.contains("unknown verb"));
    }
}
