//! Fan events out to plugins under their declared gates.

use crate::bus::BusMessage;
use crate::plugin::{Flow, PluginCtx, PluginSet};
use crate::sched::Scheduler;
use crate::state::SharedState;
use skald_proto::{Event, EventKind};

/// After this many consecutive handler failures a plugin is disabled for
/// the rest of the connection.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Dispatch one postprocessed event: walk the plugins in priority order,
/// apply each handler's gates, invoke the matches, then offer the event
/// to the await table.  Bus traffic published by handlers is fanned out
/// before this returns.
pub fn dispatch_event(
    plugins: &mut PluginSet,
    event: &Event,
    state: &SharedState,
    sched: &Scheduler,
) {
    let mut bus_outbox = Vec::new();
    'plugins: for entry in plugins.entries_mut() {
        if !entry.enabled {
            continue;
        }
        let name = entry.plugin.name();
        for idx in 0..entry.plugin.handler_count() {
            // Work out whether this handler fires, and on what event,
            // before taking the mutable borrow the invocation needs.
            let decision = {
                let meta = entry.plugin.handler_meta(idx);
                if !meta.kinds.contains(&event.kind) && !meta.kinds.contains(&EventKind::Any) {
                    None
                } else if !policy_allows(meta.policy, event, state) {
                    None
                } else if event.sender.class < meta.permissions {
                    None
                } else if meta.commands.is_empty() {
                    Some((None, meta.chainable))
                } else {
                    match_command(event, meta.commands, state)
                        .map(|modified| (Some(modified), meta.chainable))
                }
            };
            let Some((modified, chainable)) = decision else {
                continue;
            };
            let result = {
                let mut ctx = PluginCtx::new(state, sched, name, &mut bus_outbox);
                let ev = modified.as_ref().unwrap_or(event);
                entry.plugin.invoke(idx, &mut ctx, ev)
            };
            match result {
                Ok(Flow::Consumed) => {
                    entry.failures = 0;
                    break 'plugins;
                }
                Ok(Flow::Continue) => {
                    entry.failures = 0;
                    if !chainable {
                        break;
                    }
                }
                Err(e) => {
                    entry.failures += 1;
                    tracing::error!(
                        plugin = name,
                        error = %e,
                        event = %digest(event),
                        failures = entry.failures,
                        "Handler failed"
                    );
                    if entry.failures >= MAX_CONSECUTIVE_FAILURES {
                        entry.enabled = false;
                        sched.cancel_owner(name);
                        tracing::warn!(
                            plugin = name,
                            "Too many consecutive failures; plugin disabled for this connection"
                        );
                    }
                    break;
                }
            }
        }
    }
    sched.deliver(event);
    deliver_bus(plugins, state, sched, bus_outbox);
}

fn policy_allows(
    policy: crate::plugin::ChannelPolicy,
    event: &Event,
    state: &SharedState,
) -> bool {
    use crate::plugin::ChannelPolicy;
    match policy {
        ChannelPolicy::Any => true,
        ChannelPolicy::Home => event
            .channel_name()
            .is_some_and(|c| state.borrow().is_home(c)),
        ChannelPolicy::Guest => !event
            .channel_name()
            .is_some_and(|c| state.borrow().is_home(c)),
    }
}

/// Match `prefix + trigger` at the head of the content, case-folded by
/// the server's case-mapping and delimited by end-of-string or
/// whitespace.  On a match, the returned event carries the trigger in
/// `aux[0]` and the remaining arguments as `content`.
fn match_command(
    event: &Event,
    commands: &[crate::plugin::CommandSpec],
    state: &SharedState,
) -> Option<Event> {
    let (prefix, cm) = {
        let st = state.borrow();
        (st.config.core.prefix.clone(), st.case())
    };
    let rest = event.content.strip_prefix(prefix.as_str())?;
    let (word, args) = match rest.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim_start()),
        None => (rest, ""),
    };
    if word.is_empty() {
        return None;
    }
    let trigger = commands
        .iter()
        .map(|c| c.trigger)
        .find(|t| cm.eq_ignore_case(t, word))?;
    let mut modified = event.clone();
    modified.aux[0] = Some(trigger.to_owned());
    modified.content = args.to_owned();
    Some(modified)
}

fn digest(event: &Event) -> String {
    let raw: String = event.raw.chars().take(96).collect();
    format!("{} {raw:?}", event.kind)
}

/// Fan bus messages out to every enabled plugin; messages published
/// while handling bus messages are delivered in follow-up rounds (with
/// a cap, so a ping-pong pair cannot wedge the tick).
pub fn deliver_bus(
    plugins: &mut PluginSet,
    state: &SharedState,
    sched: &Scheduler,
    mut queue: Vec<BusMessage>,
) {
    for _round in 0..8 {
        if queue.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut queue);
        for message in &batch {
            if let BusMessage::Reload { plugin } = message {
                reload_plugin(plugins, state, sched, plugin, &mut queue);
            }
            for entry in plugins.entries_mut() {
                if !entry.enabled {
                    continue;
                }
                let name = entry.plugin.name();
                let mut ctx = PluginCtx::new(state, sched, name, &mut queue);
                entry.plugin.on_bus(&mut ctx, message);
            }
        }
    }
    if !queue.is_empty() {
        tracing::warn!(dropped = queue.len(), "Bus message cascade cut off");
    }
}

fn reload_plugin(
    plugins: &mut PluginSet,
    state: &SharedState,
    sched: &Scheduler,
    name: &str,
    bus_outbox: &mut Vec<BusMessage>,
) {
    let Some(entry) = plugins.find_mut(name) else {
        tracing::warn!(plugin = name, "Reload requested for unknown plugin");
        return;
    };
    let plugin_name = entry.plugin.name();
    let mut ctx = PluginCtx::new(state, sched, plugin_name, bus_outbox);
    if let Err(e) = entry.plugin.reload(&mut ctx) {
        tracing::error!(plugin = plugin_name, error = %e, "Reload failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::plugin::{
        CommandSpec, HandlerError, HandlerResult, HandlerSpec, Plugin, PluginCtx,
    };
    use crate::state::CoreState;
    use skald_proto::{ChannelRef, User, UserClass};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Probe {
        log: Log,
        fail: bool,
        consume: bool,
    }

    impl Probe {
        fn on_chan(&mut self, _ctx: &mut PluginCtx<'_>, ev: &Event) -> HandlerResult {
            if self.fail {
                return Err(HandlerError::msg("boom"));
            }
            self.log.borrow_mut().push(format!("chan:{}", ev.content));
            if self.consume {
                Ok(Flow::Consumed)
            } else {
                Ok(Flow::Continue)
            }
        }

        fn on_cmd(&mut self, _ctx: &mut PluginCtx<'_>, ev: &Event) -> HandlerResult {
            self.log
                .borrow_mut()
                .push(format!("cmd:{}:{}", ev.aux[0].as_deref().unwrap_or(""), ev.content));
            Ok(Flow::Continue)
        }
    }

    impl Plugin for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn handlers() -> Vec<HandlerSpec<Self>> {
            vec![
                HandlerSpec::on(&[EventKind::Chan], Probe::on_chan).home(),
                HandlerSpec::on(&[EventKind::Chan], Probe::on_cmd)
                    .command(CommandSpec::new("say", "say <text>", "Repeat after me"))
                    .requires(UserClass::Anyone),
            ]
        }
    }

    struct Tail {
        log: Log,
    }

    impl Tail {
        fn on_any(&mut self, _ctx: &mut PluginCtx<'_>, ev: &Event) -> HandlerResult {
            self.log.borrow_mut().push(format!("tail:{}", ev.kind));
            Ok(Flow::Continue)
        }
    }

    impl Plugin for Tail {
        fn name(&self) -> &'static str {
            "tail"
        }

        fn priority(&self) -> i32 {
            10
        }

        fn handlers() -> Vec<HandlerSpec<Self>> {
            vec![HandlerSpec::on(&[EventKind::Any], Tail::on_any)]
        }
    }

    fn fixture() -> (SharedState, Scheduler, Log) {
        let mut config = Config::default();
        config.bot.nickname = "skald".to_owned();
        config.bot.homes = vec!["#hall".to_owned()];
        let state = CoreState::shared(config, PathBuf::from("/tmp/skald-test"));
        (state, Scheduler::new(), Rc::new(RefCell::new(Vec::new())))
    }

    fn chan_event(content: &str) -> Event {
        Event {
            kind: EventKind::Chan,
            sender: User::from_nickname("alice"),
            channel: Some(ChannelRef::new("#hall")),
            content: content.to_owned(),
            ..Event::default()
        }
    }

    #[test]
    fn home_policy_and_command_matching() {
        let (state, sched, log) = fixture();
        let mut plugins = PluginSet::new();
        plugins.register(Probe {
            log: Rc::clone(&log),
            fail: false,
            consume: false,
        });

        dispatch_event(&mut plugins, &chan_event("!say hello world"), &state, &sched);
        assert_eq!(
            *log.borrow(),
            ["chan:!say hello world", "cmd:say:hello world"]
        );

        // A guest channel: the home-gated handler stays quiet, and so
        // does the command handler (commands ride on the same event).
        log.borrow_mut().clear();
        let mut ev = chan_event("!say hi");
        ev.channel = Some(ChannelRef::new("#elsewhere"));
        dispatch_event(&mut plugins, &ev, &state, &sched);
        assert_eq!(*log.borrow(), ["cmd:say:hi"]);
    }

    #[test]
    fn command_requires_word_boundary() {
        let (state, sched, log) = fixture();
        let mut plugins = PluginSet::new();
        plugins.register(Probe {
            log: Rc::clone(&log),
            fail: false,
            consume: false,
        });
        dispatch_event(&mut plugins, &chan_event("!sayonara"), &state, &sched);
        assert_eq!(*log.borrow(), ["chan:!sayonara"]);
    }

    #[test]
    fn consumed_stops_later_plugins() {
        let (state, sched, log) = fixture();
        let mut plugins = PluginSet::new();
        plugins.register(Probe {
            log: Rc::clone(&log),
            fail: false,
            consume: true,
        });
        plugins.register(Tail {
            log: Rc::clone(&log),
        });
        dispatch_event(&mut plugins, &chan_event("hello"), &state, &sched);
        assert_eq!(*log.borrow(), ["chan:hello"]);
    }

    #[test]
    fn permission_gate_blocks_blacklist() {
        let (state, sched, log) = fixture();
        let mut plugins = PluginSet::new();
        plugins.register(Probe {
            log: Rc::clone(&log),
            fail: false,
            consume: false,
        });
        let mut ev = chan_event("hello");
        ev.sender.class = UserClass::Blacklist;
        dispatch_event(&mut plugins, &ev, &state, &sched);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn failing_plugin_is_disabled_after_threshold() {
        let (state, sched, log) = fixture();
        let mut plugins = PluginSet::new();
        plugins.register(Probe {
            log: Rc::clone(&log),
            fail: true,
            consume: false,
        });
        plugins.register(Tail {
            log: Rc::clone(&log),
        });
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            dispatch_event(&mut plugins, &chan_event("x"), &state, &sched);
        }
        assert!(!plugins.entries()[0].enabled);
        // The tail plugin saw every event despite the failures.
        assert_eq!(log.borrow().len(), MAX_CONSECUTIVE_FAILURES as usize);

        // Once disabled, the plugin sees nothing further, and the bot
        // carries on.
        log.borrow_mut().clear();
        dispatch_event(&mut plugins, &chan_event("y"), &state, &sched);
        assert_eq!(*log.borrow(), ["tail:CHAN"]);
    }

    #[test]
    fn events_reach_await_table_after_plugins() {
        let (state, sched, log) = fixture();
        let mut plugins = PluginSet::new();
        plugins.register(Tail {
            log: Rc::clone(&log),
        });
        let seen = Rc::new(RefCell::new(false));
        {
            let seen = Rc::clone(&seen);
            sched.spawn("test", move |fib| async move {
                let _ = fib.await_events(&[EventKind::Chan]).await;
                *seen.borrow_mut() = true;
            });
        }
        sched.pump(16);
        dispatch_event(&mut plugins, &chan_event("hi"), &state, &sched);
        sched.pump(16);
        assert!(*seen.borrow());
    }
}
