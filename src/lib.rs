//! skald, an extensible IRC bot.
//!
//! The core is three subsystems: the event pipeline (wire codec in
//! `skald-proto`, [`postprocess`], [`dispatch`]), the plugin framework
//! ([`plugin`], [`bus`]), and the single-threaded cooperative scheduler
//! ([`sched`]).  [`bot`] ties them to the transport from `skald-net`.

pub mod bot;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod persist;
pub mod plugin;
pub mod plugins;
pub mod postprocess;
pub mod roster;
pub mod sched;
pub mod state;
mod twitch;

pub use crate::bot::{Bot, BotError};
pub use crate::postprocess::postprocess;
pub use crate::bus::{BusMessage, PrinterCtl};
pub use crate::plugin::{
    ChannelPolicy, CommandMap, CommandMeta, CommandSpec, Flow, HandlerError, HandlerResult,
    HandlerSpec, InitError, InitErrorKind, Plugin, PluginCtx, PluginSet,
};
pub use crate::sched::{FiberHandle, FiberId, Scheduler};
pub use crate::state::{CoreState, RegState, SharedState};

#[cfg(test)]
mod pipeline_tests {
    //! End-to-end runs through parse → postprocess → dispatch with the
    //! bundled plugins, shy only of a real socket.

    use crate::config::Config;
    use crate::dispatch::dispatch_event;
    use crate::plugin::PluginSet;
    use crate::plugins::{help::HelpPlugin, oneliner::OnelinerPlugin, poll::PollPlugin};
    use crate::postprocess::postprocess;
    use crate::sched::Scheduler;
    use crate::state::{CoreState, SharedState};
    use pretty_assertions::assert_eq;
    use skald_proto::parse_event;

    struct Harness {
        state: SharedState,
        sched: Scheduler,
        plugins: PluginSet,
    }

    impl Harness {
        fn new() -> Harness {
            let mut config = Config::default();
            config.bot.nickname = "skald".to_owned();
            config.bot.homes = vec!["#ch".to_owned()];
            config.bot.admins = vec!["op".to_owned()];
            config.core.headless = true;
            let state = CoreState::shared(config, "/tmp/skald-test".into());
            let mut plugins = PluginSet::new();
            plugins.register(OnelinerPlugin::new());
            plugins.register(PollPlugin::new());
            plugins.register(HelpPlugin::new());
            Harness {
                state,
                sched: Scheduler::new(),
                plugins,
            }
        }

        fn feed(&mut self, line: &str) {
            let mut event = {
                let st = self.state.borrow();
                parse_event(line, &st.profile, 1_700_000_000)
            };
            postprocess(&mut event, &mut self.state.borrow_mut());
            dispatch_event(&mut self.plugins, &event, &self.state, &self.sched);
        }

        /// What the connection loop does between reads: pump fibers and
        /// service deferred command-map requests.
        fn settle(&mut self) {
            for _ in 0..4 {
                self.sched.pump(64);
                for request in self.sched.take_deferred() {
                    let map = self.plugins.command_map(request.channel.as_deref());
                    self.sched.fulfill_deferred(request.fiber, map);
                }
            }
        }

        fn drain(&mut self) -> Vec<String> {
            let mut st = self.state.borrow_mut();
            let mut out = Vec::new();
            while let Some(msg) = st.pop_outbound() {
                out.push(msg.render());
            }
            out
        }
    }

    #[test]
    fn channel_command_answers_with_substituted_args() {
        let mut h = Harness::new();
        h.feed(":op!o@h PRIVMSG #ch :!oneliner add say $args");
        let _ = h.drain();
        h.feed(":alice!a@h PRIVMSG #ch :!say hello world");
        assert_eq!(h.drain(), ["PRIVMSG #ch :hello world"]);
    }

    #[test]
    fn alias_resolution_end_to_end() {
        let mut h = Harness::new();
        h.feed(":op!o@h PRIVMSG #ch :!oneliner add foo A");
        h.feed(":op!o@h PRIVMSG #ch :!oneliner alias bar foo");
        let _ = h.drain();
        h.feed(":op!o@h PRIVMSG #ch :!bar");
        assert_eq!(h.drain(), ["PRIVMSG #ch A"]);
    }

    #[test]
    fn non_operators_cannot_manage_oneliners() {
        let mut h = Harness::new();
        h.feed(":alice!a@h PRIVMSG #ch :!oneliner add say $args");
        let _ = h.drain();
        h.feed(":alice!a@h PRIVMSG #ch :!say hi");
        assert_eq!(h.drain(), Vec::<String>::new());
    }

    #[test]
    fn help_lists_commands_via_deferred_request() {
        let mut h = Harness::new();
        h.feed(":op!o@h PRIVMSG #ch :!oneliner add lore A");
        let _ = h.drain();
        h.feed(":alice!a@h PRIVMSG #ch :!help");
        h.settle();
        let lines = h.drain();
        assert!(lines.iter().any(|l| l.contains("!poll")), "{lines:?}");
        assert!(lines.iter().any(|l| l.contains("!lore")), "{lines:?}");
    }

    #[test]
    fn commands_do_not_fire_in_guest_channels() {
        let mut h = Harness::new();
        h.feed(":op!o@h PRIVMSG #ch :!oneliner add say $args");
        let _ = h.drain();
        h.feed(":alice!a@h PRIVMSG #elsewhere :!say hi");
        assert_eq!(h.drain(), Vec::<String>::new());
    }
}
