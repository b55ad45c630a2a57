//! Canned responses: `!<trigger>` replies from a user-editable table,
//! managed at runtime with the `!oneliner` command and persisted as a
//! TOML resource.

use crate::config::SettingDesc;
use crate::plugin::{
    CommandMeta, CommandSpec, Flow, HandlerResult, HandlerSpec, InitError, InitErrorKind, Plugin,
    PluginCtx,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use skald_proto::{Event, EventKind, UserClass};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const RESOURCE_FILE: &str = "oneliners.toml";

/// How responses are picked from a definition with several of them.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    #[default]
    Random,
    Ordered,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
enum Entry {
    Alias {
        alias: String,
    },
    Definition {
        #[serde(default)]
        kind: Selection,
        responses: Vec<String>,
    },
}

pub struct OnelinerPlugin {
    entries: BTreeMap<String, Entry>,
    /// Cursor per ordered trigger.
    cursors: BTreeMap<String, usize>,
    resource: Option<PathBuf>,
    /// Set when a save failed; the state stays in memory and the next
    /// save trigger retries.
    dirty: bool,
    answer: bool,
}

impl OnelinerPlugin {
    pub fn new() -> OnelinerPlugin {
        OnelinerPlugin {
            entries: BTreeMap::new(),
            cursors: BTreeMap::new(),
            resource: None,
            dirty: false,
            answer: true,
        }
    }

    /// `!oneliner add|alias|del|list …`
    fn on_manage(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        let (verb, rest) = match event.content.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (event.content.as_str(), ""),
        };
        match verb {
            "add" => {
                let Some((trigger, text)) = rest.split_once(char::is_whitespace) else {
                    ctx.reply(event, "usage: oneliner add <trigger> <response>");
                    return Ok(Flow::Continue);
                };
                let trigger = trigger.to_lowercase();
                let text = text.trim_start().to_owned();
                let entry = self.entries.entry(trigger.clone()).or_insert_with(|| {
                    Entry::Definition {
                        kind: Selection::Random,
                        responses: Vec::new(),
                    }
                });
                match entry {
                    Entry::Definition { responses, .. } => responses.push(text),
                    Entry::Alias { .. } => {
                        *entry = Entry::Definition {
                            kind: Selection::Random,
                            responses: vec![text],
                        };
                    }
                }
                self.save();
                ctx.reply(event, format!("oneliner {trigger} saved"));
            }
            "alias" => {
                let Some((new, target)) = rest.split_once(char::is_whitespace) else {
                    ctx.reply(event, "usage: oneliner alias <new> <existing>");
                    return Ok(Flow::Continue);
                };
                let new = new.to_lowercase();
                let target = target.trim_start().to_lowercase();
                if !matches!(self.entries.get(&target), Some(Entry::Definition { .. })) {
                    ctx.reply(event, format!("no such oneliner: {target}"));
                    return Ok(Flow::Continue);
                }
                self.entries.insert(new.clone(), Entry::Alias { alias: target });
                self.save();
                ctx.reply(event, format!("alias {new} saved"));
            }
            "del" => {
                let trigger = rest.to_lowercase();
                if self.entries.remove(&trigger).is_some() {
                    self.save();
                    ctx.reply(event, format!("oneliner {trigger} removed"));
                } else {
                    ctx.reply(event, format!("no such oneliner: {trigger}"));
                }
            }
            "list" => {
                let triggers: Vec<&str> = self.entries.keys().map(String::as_str).collect();
                if triggers.is_empty() {
                    ctx.reply(event, "no oneliners defined");
                } else {
                    ctx.reply(event, format!("oneliners: {}", triggers.join(", ")));
                }
            }
            _ => ctx.reply(event, "usage: oneliner add|alias|del|list"),
        }
        Ok(Flow::Continue)
    }

    /// Watch channel traffic for `!<trigger>` and answer from the table.
    fn on_chan(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        if !self.answer {
            return Ok(Flow::Continue);
        }
        let (prefix, cm, bot_nick) = {
            let st = ctx.state.borrow();
            (
                st.config.core.prefix.clone(),
                st.case(),
                st.client.nickname.clone(),
            )
        };
        let Some(rest) = event.content.strip_prefix(prefix.as_str()) else {
            return Ok(Flow::Continue);
        };
        let (word, args) = match rest.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim_start()),
            None => (rest, ""),
        };
        let folded = cm.lower(word).into_owned();
        let Some(response) = self.pick_response(&folded) else {
            return Ok(Flow::Continue);
        };
        let text = substitute(&response, event, args, &bot_nick);
        ctx.reply(event, text);
        Ok(Flow::Continue)
    }

    /// Resolve one level of aliasing and pick a response.
    fn pick_response(&mut self, trigger: &str) -> Option<String> {
        let resolved = match self.entries.get(trigger)? {
            Entry::Alias { alias } => alias.clone(),
            Entry::Definition { .. } => trigger.to_owned(),
        };
        let Entry::Definition { kind, responses } = self.entries.get(&resolved)? else {
            return None;
        };
        if responses.is_empty() {
            return None;
        }
        let idx = match kind {
            Selection::Random => rand::rng().random_range(0..responses.len()),
            Selection::Ordered => {
                let cursor = self.cursors.entry(resolved.clone()).or_insert(0);
                let idx = *cursor % responses.len();
                *cursor = (*cursor + 1) % responses.len();
                idx
            }
        };
        responses.get(idx).cloned()
    }

    fn save(&mut self) {
        self.dirty = true;
        let Some(path) = self.resource.clone() else {
            return;
        };
        match toml::to_string_pretty(&self.entries) {
            Ok(rendered) => match crate::persist::atomic_save(&path, &rendered) {
                Ok(()) => self.dirty = false,
                Err(e) => {
                    tracing::error!(error = %e, path = %path.display(), "Failed to save oneliners; keeping in memory");
                }
            },
            Err(e) => tracing::error!(error = %e, "Failed to serialise oneliners"),
        }
    }

    fn load(&mut self) -> Result<(), InitError> {
        let Some(path) = self.resource.clone() else {
            return Ok(());
        };
        let data = std::fs::read_to_string(&path).map_err(|e| {
            InitError::new(InitErrorKind::Reload, "oneliner")
                .with_file(&path)
                .with_source(e)
        })?;
        self.entries = toml::from_str(&data).map_err(|e| {
            InitError::new(InitErrorKind::Reload, "oneliner")
                .with_file(&path)
                .with_source(e)
        })?;
        self.cursors.clear();
        Ok(())
    }
}

/// `$args`, `$sender`, `$channel`, `$bot`, `$random` substitution.
fn substitute(template: &str, event: &Event, args: &str, bot_nick: &str) -> String {
    let channel = event.channel_name().unwrap_or_default();
    template
        .replace("$args", args)
        .replace("$sender", event.sender.shown_name())
        .replace("$channel", channel)
        .replace("$bot", bot_nick)
        .replace("$random", &rand::rng().random_range(0..100u32).to_string())
}

impl Default for OnelinerPlugin {
    fn default() -> Self {
        OnelinerPlugin::new()
    }
}

impl Plugin for OnelinerPlugin {
    fn name(&self) -> &'static str {
        "oneliner"
    }

    fn handlers() -> Vec<HandlerSpec<Self>> {
        vec![
            HandlerSpec::on(&[EventKind::Chan], OnelinerPlugin::on_manage)
                .home()
                .requires(UserClass::Operator)
                .command(CommandSpec::new(
                    "oneliner",
                    "oneliner add|alias|del|list [args]",
                    "Manage canned responses",
                )),
            HandlerSpec::on(&[EventKind::Chan], OnelinerPlugin::on_chan).home(),
        ]
    }

    fn settings(&self) -> Vec<SettingDesc> {
        vec![SettingDesc::new(
            "answer",
            true,
            "Answer canned-response triggers in home channels",
        )]
    }

    fn configure(&mut self, section: &toml::Table) -> Result<(), InitError> {
        if let Some(v) = section.get("answer").and_then(toml::Value::as_bool) {
            self.answer = v;
        }
        Ok(())
    }

    fn assign_resource_dir(&mut self, dir: &Path) {
        self.resource = Some(dir.join(RESOURCE_FILE));
    }

    fn init_resources(&mut self) -> Result<(), InitError> {
        let Some(path) = self.resource.clone() else {
            return Ok(());
        };
        if !path.exists() {
            crate::persist::atomic_save(&path, "").map_err(|e| {
                InitError::new(InitErrorKind::Resources, "oneliner")
                    .with_file(&path)
                    .with_source(e)
            })?;
        }
        Ok(())
    }

    fn setup(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        self.load()
    }

    fn reload(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        self.load()
    }

    fn teardown(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        if self.dirty {
            self.save();
        }
        Ok(())
    }

    fn channel_specific_commands(&self, _channel: &str) -> BTreeMap<String, CommandMeta> {
        self.entries
            .keys()
            .map(|trigger| {
                (
                    trigger.clone(),
                    CommandMeta {
                        syntax: trigger.clone(),
                        description: "Canned response".to_owned(),
                        hidden: false,
                    },
                )
            })
            .collect()
    }
}
