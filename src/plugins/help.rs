//! `!help`: lists every command currently in effect, across all
//! plugins, via the scheduler's deferred command-map request, the only
//! sanctioned way to see another plugin's command surface.

use crate::plugin::{
    CommandSpec, Flow, HandlerResult, HandlerSpec, Plugin, PluginCtx,
};
use skald_proto::{Event, EventKind, Outbound};
use std::rc::Rc;

pub struct HelpPlugin;

impl HelpPlugin {
    pub fn new() -> HelpPlugin {
        HelpPlugin
    }

    fn on_help(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        let channel = event.channel_name().map(str::to_owned);
        let reply_to = match (&channel, event.sender.nickname.as_str()) {
            (Some(chan), _) => chan.clone(),
            (None, nick) if !nick.is_empty() => nick.to_owned(),
            _ => return Ok(Flow::Continue),
        };
        let wanted = event.content.trim().to_owned();
        let prefix = ctx.state.borrow().config.core.prefix.clone();
        let state = Rc::clone(ctx.state);
        ctx.spawn(move |fib| async move {
            let commands = fib.defer_commands(channel).await;
            let mut lines = Vec::new();
            if wanted.is_empty() {
                for (plugin, triggers) in &commands {
                    let visible: Vec<String> = triggers
                        .iter()
                        .filter(|(_, meta)| !meta.hidden)
                        .map(|(trigger, _)| format!("{prefix}{trigger}"))
                        .collect();
                    if !visible.is_empty() {
                        lines.push(format!("{plugin}: {}", visible.join(", ")));
                    }
                }
                if lines.is_empty() {
                    lines.push("no commands are available here".to_owned());
                }
            } else {
                let found = commands.iter().find_map(|(plugin, triggers)| {
                    triggers
                        .get(&wanted)
                        .map(|meta| (plugin.clone(), meta.clone()))
                });
                match found {
                    Some((plugin, meta)) => {
                        let description = if meta.description.is_empty() {
                            String::new()
                        } else {
                            format!(" - {}", meta.description)
                        };
                        lines.push(format!(
                            "[{plugin}] {prefix}{}{description}",
                            meta.syntax
                        ));
                    }
                    None => lines.push(format!("no such command: {wanted}")),
                }
            }
            let mut st = state.borrow_mut();
            for line in lines {
                st.send(Outbound::privmsg(&reply_to, line));
            }
        });
        Ok(Flow::Continue)
    }
}

impl Default for HelpPlugin {
    fn default() -> Self {
        HelpPlugin::new()
    }
}

impl Plugin for HelpPlugin {
    fn name(&self) -> &'static str {
        "help"
    }

    fn handlers() -> Vec<HandlerSpec<Self>> {
        vec![
            HandlerSpec::on(&[EventKind::Chan, EventKind::Query], HelpPlugin::on_help).command(
                CommandSpec::new("help", "help [command]", "List commands, or describe one"),
            ),
        ]
    }
}
