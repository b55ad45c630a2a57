//! The connection loop: drive the transport, the event pipeline, and the
//! scheduler, in that order, once per tick.

use crate::config::Config;
use crate::dispatch::dispatch_event;
use crate::persist;
use crate::plugin::{InitError, Plugin, PluginCtx, PluginSet};
use crate::postprocess::postprocess;
use crate::sched::Scheduler;
use crate::state::{CoreState, RegState, SharedState};
use futures_util::{FutureExt, SinkExt, StreamExt};
use skald_net::{Backoff, IrcChannel};
use skald_proto::{EventKind, Outbound, parse_event};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};

/// Upper bound on how long the loop blocks on the transport per tick.
const TICK: Duration = Duration::from_millis(250);

/// Fiber polls per pump before the loop goes back to I/O.
const PUMP_BUDGET: usize = 256;

/// Self-PING after this much silence from the server.
const IDLE_PING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Unanswered self-PINGs before the connection is declared dead.
const MAX_MISSED_PONGS: u32 = 3;

/// Outbound rate limit: at most this many lines per window.
const SEND_WINDOW: Duration = Duration::from_secs(10);
const SEND_WINDOW_MAX: usize = 20;

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Connect(#[from] skald_net::ConnectError),
    #[error("connection I/O failed")]
    Io(#[from] skald_net::FrameError),
    #[error(transparent)]
    Init(#[from] InitError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionEnd {
    /// Stop signal; do not reconnect.
    Stopped,
    /// Connection lost or server error; reconnect per configuration.
    Lost,
}

pub struct Bot {
    state: SharedState,
    sched: Scheduler,
    plugins: PluginSet,
    started: bool,
}

impl Bot {
    pub fn new(config: Config, resource_root: std::path::PathBuf) -> Bot {
        Bot {
            state: CoreState::shared(config, resource_root),
            sched: Scheduler::new(),
            plugins: PluginSet::new(),
            started: false,
        }
    }

    pub fn register<P: Plugin>(&mut self, plugin: P) {
        self.plugins.register(plugin);
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn plugins(&self) -> &PluginSet {
        &self.plugins
    }

    /// Run every plugin's configuration and resource hooks.  A failure
    /// aborts startup unless the plugin declares itself optional, in
    /// which case it is disabled and the bot carries on.
    pub fn init_plugins(&mut self) -> Result<(), InitError> {
        let resource_root = self.state.borrow().resource_root.clone();
        let mut bus_outbox = Vec::new();
        for entry in self.plugins.entries_mut() {
            let name = entry.plugin.name();
            let section = {
                let st = self.state.borrow();
                st.config.plugins.get(name).and_then(|v| v.as_table().cloned())
            };
            let outcome = (|| {
                if let Some(section) = &section {
                    entry.plugin.configure(section)?;
                }
                let dir = persist::plugin_resource_dir(&resource_root, name).map_err(|e| {
                    InitError::new(crate::plugin::InitErrorKind::Resources, name)
                        .with_file(resource_root.join(name))
                        .with_source(e)
                })?;
                entry.plugin.assign_resource_dir(&dir);
                entry.plugin.init_resources()?;
                let mut ctx = PluginCtx::new(&self.state, &self.sched, name, &mut bus_outbox);
                entry.plugin.setup(&mut ctx)
            })();
            if let Err(e) = outcome {
                if entry.plugin.optional() {
                    tracing::warn!(plugin = name, error = %e, "Optional plugin failed to initialise; disabled");
                    entry.enabled = false;
                } else {
                    return Err(e);
                }
            }
        }
        crate::dispatch::deliver_bus(&mut self.plugins, &self.state, &self.sched, bus_outbox);
        Ok(())
    }

    /// Run every plugin's selftest hook, reporting failures.
    pub fn selftest_plugins(&mut self) -> Result<(), InitError> {
        let mut bus_outbox = Vec::new();
        for entry in self.plugins.entries_mut() {
            let name = entry.plugin.name();
            let mut ctx = PluginCtx::new(&self.state, &self.sched, name, &mut bus_outbox);
            entry.plugin.selftest(&mut ctx)?;
        }
        Ok(())
    }

    /// Connect, run, reconnect.  Returns once a stop signal arrives or
    /// reconnecting is disabled.
    pub async fn run(&mut self) -> Result<(), BotError> {
        let mut backoff = Backoff::new();
        loop {
            match self.run_connection(&mut backoff).await {
                Ok(ConnectionEnd::Stopped) => return Ok(()),
                Ok(ConnectionEnd::Lost) => {
                    if !self.state.borrow().config.core.reconnect {
                        tracing::info!("Connection lost and reconnecting is disabled");
                        return Ok(());
                    }
                }
                Err(e) => {
                    if !self.state.borrow().config.core.reconnect {
                        return Err(e);
                    }
                    tracing::error!(error = %e, "Connection failed");
                }
            }
            let delay = backoff.next_delay();
            tracing::info!(delay_secs = delay.as_secs(), "Reconnecting after backoff");
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_connection(&mut self, backoff: &mut Backoff) -> Result<ConnectionEnd, BotError> {
        let (address, port, tls) = {
            let st = self.state.borrow();
            (
                st.config.server.address.clone(),
                st.config.server.port(),
                st.config.server.tls,
            )
        };
        let mut channel = skald_net::connect(&address, port, tls).await?;
        backoff.reset();
        self.kickoff_registration();

        let mut sent_times: VecDeque<Instant> = VecDeque::new();
        let mut last_rx = Instant::now();
        let mut last_ping = Instant::now();
        let mut missed_pongs = 0u32;

        let end = loop {
            // The scheduler always advances before the loop blocks on the
            // transport, so a delay whose deadline passed during the last
            // read runs before any new lines are parsed.
            self.sched.pump(PUMP_BUDGET);
            self.sched.run_due_timers(Instant::now());
            self.service_deferred();
            self.sched.pump(PUMP_BUDGET);
            self.maybe_start_plugins();

            if last_rx.elapsed() >= IDLE_PING_INTERVAL && last_ping.elapsed() >= IDLE_PING_INTERVAL
            {
                if missed_pongs >= MAX_MISSED_PONGS {
                    tracing::warn!("Server stopped answering PINGs; giving up on connection");
                    break ConnectionEnd::Lost;
                }
                missed_pongs += 1;
                last_ping = Instant::now();
                self.state.borrow_mut().send(Outbound::Ping {
                    payload: address.clone(),
                });
            }
            self.flush_outbound(&mut channel, &mut sent_times).await?;

            let mut deadline = Instant::now() + TICK;
            if let Some(timer) = self.sched.next_deadline() {
                deadline = deadline.min(timer.max(Instant::now()));
            }
            let stopped = tokio::select! {
                () = recv_stop_signal() => {
                    tracing::info!("Stop signal received; quitting");
                    self.state.borrow_mut().send(Outbound::Quit {
                        reason: Some("Terminated".to_owned()),
                    });
                    true
                }
                r = timeout_at(deadline, channel.next()) => match r {
                    Err(_) => false, // tick elapsed with no traffic
                    Ok(None) => {
                        tracing::info!("Server closed the connection");
                        break ConnectionEnd::Lost;
                    }
                    Ok(Some(Err(e))) => {
                        tracing::error!(error = %e, "Transport read failed");
                        break ConnectionEnd::Lost;
                    }
                    Ok(Some(Ok(line))) => {
                        last_rx = Instant::now();
                        missed_pongs = 0;
                        let mut lost = self.handle_line(&line);
                        // Drain whatever else the read buffer already
                        // holds before yielding back to timers.
                        while !lost
                            && let Some(Some(Ok(line))) = channel.next().now_or_never()
                        {
                            lost = self.handle_line(&line);
                        }
                        if lost {
                            break ConnectionEnd::Lost;
                        }
                        false
                    }
                }
            };
            // A PING answered in this tick goes out in this tick.
            self.flush_outbound(&mut channel, &mut sent_times).await?;
            if stopped {
                break ConnectionEnd::Stopped;
            }
        };
        self.teardown_connection();
        Ok(end)
    }

    /// Parse, postprocess, and dispatch one line.  Returns true when the
    /// line means the connection is over.
    fn handle_line(&mut self, line: &str) -> bool {
        tracing::trace!(line, "Received");
        let now = jiff::Timestamp::now().as_second();
        let mut event = {
            let st = self.state.borrow();
            parse_event(line, &st.profile, now)
        };
        {
            let mut st = self.state.borrow_mut();
            postprocess(&mut event, &mut st);
            if event.kind == EventKind::Ping {
                st.send(Outbound::Pong {
                    payload: event.content.clone(),
                });
            }
        }
        dispatch_event(&mut self.plugins, &event, &self.state, &self.sched);
        self.maybe_start_plugins();
        matches!(event.kind, EventKind::Error | EventKind::Reconnect)
    }

    fn kickoff_registration(&mut self) {
        let mut st = self.state.borrow_mut();
        st.registration = RegState::CapLs {
            offered: Vec::new(),
        };
        st.send(Outbound::raw("CAP LS 302"));
        let pass = st.config.bot.pass.clone();
        if !pass.is_empty() {
            st.send(Outbound::raw(format!("PASS {pass}")));
        }
        let nickname = st.client.nickname.clone();
        st.send(Outbound::Nick { nickname });
        let user = format!("USER {} 0 * :{}", st.client.ident, st.client.realname);
        st.send(Outbound::raw(user));
    }

    /// Send queued outbound lines, oldest first, under the rate limit.
    /// Lines that do not fit the window stay queued for the next tick.
    async fn flush_outbound(
        &mut self,
        channel: &mut IrcChannel,
        sent_times: &mut VecDeque<Instant>,
    ) -> Result<(), BotError> {
        loop {
            let now = Instant::now();
            while sent_times
                .front()
                .is_some_and(|&t| now.duration_since(t) > SEND_WINDOW)
            {
                sent_times.pop_front();
            }
            if sent_times.len() >= SEND_WINDOW_MAX {
                if self.state.borrow().outbound_len() > 0 {
                    tracing::debug!("Outbound rate limit hit; deferring remaining lines");
                }
                return Ok(());
            }
            let Some(message) = self.state.borrow_mut().pop_outbound() else {
                return Ok(());
            };
            let line = message.render();
            tracing::trace!(line, "Sending");
            channel.send(line).await?;
            sent_times.push_back(now);
        }
    }

    /// Resolve pending cross-plugin command-map requests.
    fn service_deferred(&mut self) {
        for request in self.sched.take_deferred() {
            let map = self.plugins.command_map(request.channel.as_deref());
            self.sched.fulfill_deferred(request.fiber, map);
        }
    }

    /// Once registration completes, give every plugin its `start` hook.
    fn maybe_start_plugins(&mut self) {
        if self.started || self.state.borrow().registration != RegState::Registered {
            return;
        }
        self.started = true;
        let mut bus_outbox = Vec::new();
        for entry in self.plugins.entries_mut() {
            if !entry.enabled {
                continue;
            }
            let name = entry.plugin.name();
            let mut ctx = PluginCtx::new(&self.state, &self.sched, name, &mut bus_outbox);
            if let Err(e) = entry.plugin.start(&mut ctx) {
                tracing::error!(plugin = name, error = %e, "Start hook failed; plugin disabled");
                entry.enabled = false;
                self.sched.cancel_owner(name);
            }
        }
        crate::dispatch::deliver_bus(&mut self.plugins, &self.state, &self.sched, bus_outbox);
    }

    /// Reverse-priority teardown, then drop all fibers and per-connection
    /// state.  Plugin settings and persisted resources survive.
    fn teardown_connection(&mut self) {
        let mut bus_outbox = Vec::new();
        for entry in self.plugins.entries_mut().iter_mut().rev() {
            if !entry.enabled {
                continue;
            }
            let name = entry.plugin.name();
            let mut ctx = PluginCtx::new(&self.state, &self.sched, name, &mut bus_outbox);
            if let Err(e) = entry.plugin.teardown(&mut ctx) {
                tracing::error!(plugin = name, error = %e, "Teardown failed");
            }
        }
        self.sched.cancel_all();
        self.state.borrow_mut().reset_connection();
        self.started = false;
        for entry in self.plugins.entries_mut() {
            entry.enabled = true;
            entry.failures = 0;
        }
    }
}

#[cfg(unix)]
async fn recv_stop_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    if let Ok(mut term) = signal(SignalKind::terminate()) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => (),
            _ = term.recv() => (),
        }
    } else {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(not(unix))]
async fn recv_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
