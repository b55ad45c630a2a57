//! The plugin contract and the registry that owns the plugins.
//!
//! A plugin declares its event subscriptions as a table of
//! [`HandlerSpec`]s: plain data plus a function pointer, registered
//! explicitly (there is no reflection).  The registry wraps each plugin
//! with its spec table behind the object-safe [`AnyPlugin`] so the
//! dispatcher can walk them uniformly in priority order.

use crate::bus::BusMessage;
use crate::config::SettingDesc;
use crate::sched::{FiberHandle, FiberId, Scheduler};
use crate::state::SharedState;
use skald_proto::{Event, EventKind, Outbound, UserClass};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Which channels a handler fires in.  Home channels are the configured
/// ones where the bot offers everything; guest is everywhere else.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChannelPolicy {
    #[default]
    Any,
    Home,
    Guest,
}

/// What a handler tells the dispatcher to do next.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Flow {
    /// Let the event continue to further handlers and plugins.
    #[default]
    Continue,
    /// The event is handled; stop all further propagation.
    Consumed,
}

pub type HandlerResult = Result<Flow, HandlerError>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("resource I/O failed")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    pub fn msg(text: impl Into<String>) -> HandlerError {
        HandlerError::Message(text.into())
    }
}

/// Typed failure from a lifecycle hook.
#[derive(Debug, Error)]
#[error("plugin {plugin}: {kind} failed{}", .filename.as_deref().map(|f| format!(" ({})", f.display())).unwrap_or_default())]
pub struct InitError {
    pub kind: InitErrorKind,
    pub plugin: &'static str,
    pub filename: Option<PathBuf>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum InitErrorKind {
    Settings,
    Resources,
    Setup,
    Start,
    Reload,
    Teardown,
    Selftest,
}

impl InitError {
    pub fn new(kind: InitErrorKind, plugin: &'static str) -> InitError {
        InitError {
            kind,
            plugin,
            filename: None,
            source: None,
        }
    }

    pub fn with_file(mut self, filename: impl Into<PathBuf>) -> InitError {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> InitError {
        self.source = Some(Box::new(source));
        self
    }
}

/// A command trigger bound to a handler, with the metadata `!help`
/// shows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub trigger: &'static str,
    pub syntax: &'static str,
    pub description: &'static str,
    pub hidden: bool,
}

impl CommandSpec {
    pub fn new(
        trigger: &'static str,
        syntax: &'static str,
        description: &'static str,
    ) -> CommandSpec {
        CommandSpec {
            trigger,
            syntax,
            description,
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> CommandSpec {
        self.hidden = true;
        self
    }
}

/// Runtime form of command metadata, as it travels in a [`CommandMap`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandMeta {
    pub syntax: String,
    pub description: String,
    pub hidden: bool,
}

impl From<&CommandSpec> for CommandMeta {
    fn from(spec: &CommandSpec) -> CommandMeta {
        CommandMeta {
            syntax: spec.syntax.to_owned(),
            description: spec.description.to_owned(),
            hidden: spec.hidden,
        }
    }
}

/// plugin name → trigger → metadata, as assembled for a deferred
/// request.
pub type CommandMap = BTreeMap<String, BTreeMap<String, CommandMeta>>;

/// One event subscription: the filter gates plus the handler function.
pub struct HandlerSpec<P: ?Sized> {
    pub kinds: Vec<EventKind>,
    pub policy: ChannelPolicy,
    pub permissions: UserClass,
    pub chainable: bool,
    pub commands: Vec<CommandSpec>,
    pub func: fn(&mut P, &mut PluginCtx<'_>, &Event) -> HandlerResult,
}

impl<P> HandlerSpec<P> {
    pub fn on(
        kinds: &[EventKind],
        func: fn(&mut P, &mut PluginCtx<'_>, &Event) -> HandlerResult,
    ) -> HandlerSpec<P> {
        HandlerSpec {
            kinds: kinds.to_vec(),
            policy: ChannelPolicy::Any,
            permissions: UserClass::Anyone,
            chainable: true,
            commands: Vec::new(),
            func,
        }
    }

    pub fn home(mut self) -> Self {
        self.policy = ChannelPolicy::Home;
        self
    }

    pub fn guest(mut self) -> Self {
        self.policy = ChannelPolicy::Guest;
        self
    }

    pub fn requires(mut self, class: UserClass) -> Self {
        self.permissions = class;
        self
    }

    /// Stop the event from reaching later handlers of this plugin.
    pub fn terminal(mut self) -> Self {
        self.chainable = false;
        self
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }
}

/// Borrowed view of a handler's gates, for the dispatcher.
pub struct HandlerMeta<'a> {
    pub kinds: &'a [EventKind],
    pub policy: ChannelPolicy,
    pub permissions: UserClass,
    pub chainable: bool,
    pub commands: &'a [CommandSpec],
}

/// What a handler (or lifecycle hook) can reach: the shared state, the
/// scheduler, and the bus.
pub struct PluginCtx<'a> {
    pub state: &'a SharedState,
    pub sched: &'a Scheduler,
    plugin: &'static str,
    bus_outbox: &'a mut Vec<BusMessage>,
}

impl<'a> PluginCtx<'a> {
    pub fn new(
        state: &'a SharedState,
        sched: &'a Scheduler,
        plugin: &'static str,
        bus_outbox: &'a mut Vec<BusMessage>,
    ) -> PluginCtx<'a> {
        PluginCtx {
            state,
            sched,
            plugin,
            bus_outbox,
        }
    }

    pub fn plugin_name(&self) -> &'static str {
        self.plugin
    }

    /// Queue an outgoing message.
    pub fn send(&self, message: Outbound) {
        self.state.borrow_mut().send(message);
    }

    /// Say something in a channel.
    pub fn say(&self, channel: &str, text: impl Into<String>) {
        self.send(Outbound::privmsg(channel, text));
    }

    /// Answer an event where it came from: its channel, or the sender's
    /// nick for queries.  On Twitch, channel answers are threaded as
    /// replies when the triggering message has an id.
    pub fn reply(&self, event: &Event, text: impl Into<String>) {
        match event.channel_name() {
            Some(channel) => {
                let reply_parent = self
                    .state
                    .borrow()
                    .profile
                    .is_twitch()
                    .then(|| event.tags.get_nonempty("id").map(str::to_owned))
                    .flatten();
                self.send(Outbound::Privmsg {
                    target: channel.to_owned(),
                    text: text.into(),
                    reply_parent,
                });
            }
            None if !event.sender.nickname.is_empty() => {
                self.send(Outbound::privmsg(&event.sender.nickname, text));
            }
            None => (),
        }
    }

    /// Publish a bus message; it is fanned out synchronously within the
    /// current tick, after the current handler returns.
    pub fn publish(&mut self, message: BusMessage) {
        self.bus_outbox.push(message);
    }

    /// Spawn a long-running fiber owned by this plugin.
    pub fn spawn<F, Fut>(&self, f: F) -> FiberId
    where
        F: FnOnce(FiberHandle) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.sched.spawn(self.plugin, f)
    }

    /// One-shot callback after `after`, outside any fiber.
    pub fn delay_call(&self, after: Duration, callback: Box<dyn FnOnce()>) {
        self.sched.delay_call(after, callback);
    }

    /// The plugin's resource directory.
    pub fn resource_dir(&self) -> PathBuf {
        self.state.borrow().resource_root.join(self.plugin)
    }
}

/// The behaviour contract.  All hooks default to no-ops so a minimal
/// plugin only implements `name` and whatever it actually uses.
pub trait Plugin: 'static {
    fn name(&self) -> &'static str;

    /// Dispatch order; negative runs earlier.  Ties keep registration
    /// order.
    fn priority(&self) -> i32 {
        0
    }

    /// An optional plugin that fails to initialise is disabled instead
    /// of aborting startup.
    fn optional(&self) -> bool {
        false
    }

    /// The subscription table.  Called once at registration.
    fn handlers() -> Vec<HandlerSpec<Self>>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// User-visible settings, for configuration-file generation.
    fn settings(&self) -> Vec<SettingDesc> {
        Vec::new()
    }

    /// Apply this plugin's section of the configuration file.
    fn configure(&mut self, _section: &toml::Table) -> Result<(), InitError> {
        Ok(())
    }

    /// Receive the resource directory before `init_resources`.
    fn assign_resource_dir(&mut self, _dir: &Path) {}

    /// Create or repair persistent files.
    fn init_resources(&mut self) -> Result<(), InitError> {
        Ok(())
    }

    /// Prepare in-memory state; may spawn long-running fibers.
    fn setup(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        Ok(())
    }

    /// Called once registration with the server succeeded.
    fn start(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        Ok(())
    }

    /// Re-read resources from disk.
    fn reload(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        Ok(())
    }

    /// Flush and persist; the last hook before fibers are dropped.
    fn teardown(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        Ok(())
    }

    /// Optional integration self-check.
    fn selftest(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        Ok(())
    }

    /// Commands in effect for a specific channel beyond the declared
    /// ones (e.g. runtime-defined triggers).
    fn channel_specific_commands(&self, _channel: &str) -> BTreeMap<String, CommandMeta> {
        BTreeMap::new()
    }

    fn on_bus(&mut self, _ctx: &mut PluginCtx<'_>, _message: &BusMessage) {}
}

/// Object-safe wrapper the registry stores.
pub trait AnyPlugin {
    fn name(&self) -> &'static str;
    fn priority(&self) -> i32;
    fn optional(&self) -> bool;
    fn handler_count(&self) -> usize;
    fn handler_meta(&self, idx: usize) -> HandlerMeta<'_>;
    fn invoke(&mut self, idx: usize, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult;
    fn settings(&self) -> Vec<SettingDesc>;
    fn configure(&mut self, section: &toml::Table) -> Result<(), InitError>;
    fn assign_resource_dir(&mut self, dir: &Path);
    fn init_resources(&mut self) -> Result<(), InitError>;
    fn setup(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError>;
    fn start(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError>;
    fn reload(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError>;
    fn teardown(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError>;
    fn selftest(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError>;
    fn global_commands(&self) -> BTreeMap<String, CommandMeta>;
    fn channel_specific_commands(&self, channel: &str) -> BTreeMap<String, CommandMeta>;
    fn on_bus(&mut self, ctx: &mut PluginCtx<'_>, message: &BusMessage);
}

struct Registered<P: Plugin> {
    plugin: P,
    handlers: Vec<HandlerSpec<P>>,
}

impl<P: Plugin> AnyPlugin for Registered<P> {
    fn name(&self) -> &'static str {
        self.plugin.name()
    }

    fn priority(&self) -> i32 {
        self.plugin.priority()
    }

    fn optional(&self) -> bool {
        self.plugin.optional()
    }

    fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn handler_meta(&self, idx: usize) -> HandlerMeta<'_> {
        let spec = &self.handlers[idx];
        HandlerMeta {
            kinds: &spec.kinds,
            policy: spec.policy,
            permissions: spec.permissions,
            chainable: spec.chainable,
            commands: &spec.commands,
        }
    }

    fn invoke(&mut self, idx: usize, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        (self.handlers[idx].func)(&mut self.plugin, ctx, event)
    }

    fn settings(&self) -> Vec<SettingDesc> {
        self.plugin.settings()
    }

    fn configure(&mut self, section: &toml::Table) -> Result<(), InitError> {
        self.plugin.configure(section)
    }

    fn assign_resource_dir(&mut self, dir: &Path) {
        self.plugin.assign_resource_dir(dir);
    }

    fn init_resources(&mut self) -> Result<(), InitError> {
        self.plugin.init_resources()
    }

    fn setup(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        self.plugin.setup(ctx)
    }

    fn start(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        self.plugin.start(ctx)
    }

    fn reload(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        self.plugin.reload(ctx)
    }

    fn teardown(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        self.plugin.teardown(ctx)
    }

    fn selftest(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        self.plugin.selftest(ctx)
    }

    fn global_commands(&self) -> BTreeMap<String, CommandMeta> {
        let mut map = BTreeMap::new();
        for spec in &self.handlers {
            for cmd in &spec.commands {
                map.insert(cmd.trigger.to_owned(), CommandMeta::from(cmd));
            }
        }
        map
    }

    fn channel_specific_commands(&self, channel: &str) -> BTreeMap<String, CommandMeta> {
        self.plugin.channel_specific_commands(channel)
    }

    fn on_bus(&mut self, ctx: &mut PluginCtx<'_>, message: &BusMessage) {
        self.plugin.on_bus(ctx, message);
    }
}

/// A registered plugin plus its dispatch bookkeeping.
pub struct PluginEntry {
    pub plugin: Box<dyn AnyPlugin>,
    pub enabled: bool,
    /// Consecutive handler failures; reset on any success.
    pub failures: u32,
}

/// The set of plugins, sorted by priority (stable, so registration
/// order breaks ties).
#[derive(Default)]
pub struct PluginSet {
    entries: Vec<PluginEntry>,
}

impl PluginSet {
    pub fn new() -> PluginSet {
        PluginSet::default()
    }

    pub fn register<P: Plugin>(&mut self, plugin: P) {
        self.entries.push(PluginEntry {
            plugin: Box::new(Registered {
                plugin,
                handlers: P::handlers(),
            }),
            enabled: true,
            failures: 0,
        });
        self.entries
            .sort_by_key(|entry| entry.plugin.priority());
    }

    pub fn entries_mut(&mut self) -> &mut [PluginEntry] {
        &mut self.entries
    }

    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut PluginEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.plugin.name() == name)
    }

    /// Compose the command map a deferred request resolves to.
    pub fn command_map(&self, channel: Option<&str>) -> CommandMap {
        let mut map = CommandMap::new();
        for entry in &self.entries {
            if !entry.enabled {
                continue;
            }
            let mut commands = entry.plugin.global_commands();
            if let Some(channel) = channel {
                commands.extend(entry.plugin.channel_specific_commands(channel));
            }
            if !commands.is_empty() {
                map.insert(entry.plugin.name().to_owned(), commands);
            }
        }
        map
    }

    /// Settings of every plugin, for configuration generation.
    pub fn all_settings(&self) -> Vec<(String, Vec<SettingDesc>)> {
        self.entries
            .iter()
            .map(|e| (e.plugin.name().to_owned(), e.plugin.settings()))
            .collect()
    }
}
