//! CTCP query responses: VERSION, PING, and TIME.

use crate::plugin::{Flow, HandlerResult, HandlerSpec, Plugin, PluginCtx};
use skald_proto::{Event, EventKind, Outbound};

pub struct CtcpPlugin {
    version: String,
}

impl CtcpPlugin {
    pub fn new() -> CtcpPlugin {
        CtcpPlugin {
            version: format!("skald {}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn ctcp_reply(ctx: &PluginCtx<'_>, event: &Event, command: &str, params: String) {
        if event.sender.nickname.is_empty() {
            return;
        }
        ctx.send(Outbound::CtcpReply {
            target: event.sender.nickname.clone(),
            command: command.to_owned(),
            params,
        });
    }

    fn on_version(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        Self::ctcp_reply(ctx, event, "VERSION", self.version.clone());
        Ok(Flow::Continue)
    }

    fn on_ping(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        // Echo the challenge back verbatim.
        Self::ctcp_reply(ctx, event, "PING", event.content.clone());
        Ok(Flow::Continue)
    }

    fn on_time(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        let now = jiff::Zoned::now().strftime("%a, %d %b %Y %H:%M:%S %z").to_string();
        Self::ctcp_reply(ctx, event, "TIME", now);
        Ok(Flow::Continue)
    }
}

impl Default for CtcpPlugin {
    fn default() -> Self {
        CtcpPlugin::new()
    }
}

impl Plugin for CtcpPlugin {
    fn name(&self) -> &'static str {
        "ctcp"
    }

    fn handlers() -> Vec<HandlerSpec<Self>> {
        vec![
            HandlerSpec::on(&[EventKind::CtcpVersion], CtcpPlugin::on_version),
            HandlerSpec::on(&[EventKind::CtcpPing], CtcpPlugin::on_ping),
            HandlerSpec::on(&[EventKind::CtcpTime], CtcpPlugin::on_time),
        ]
    }
}
