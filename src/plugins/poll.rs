//! Channel polls: `!poll <duration> <choice…>` opens a timed vote, a
//! fiber announces the tally at the deadline, and an open poll survives
//! a disconnect: it is serialised at teardown and resumes with its
//! original deadline.

use crate::config::SettingDesc;
use crate::plugin::{
    CommandSpec, Flow, HandlerResult, HandlerSpec, InitError, InitErrorKind, Plugin, PluginCtx,
};
use crate::state::SharedState;
use serde::{Deserialize, Serialize};
use skald_proto::{CaseMapping, Event, EventKind, Outbound, User};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

const RESOURCE_FILE: &str = "polls.toml";

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
enum PollState {
    Open,
    Ended,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Poll {
    channel: String,
    choices: Vec<String>,
    /// voter key (account, or nickname when unauthenticated) → choice
    /// index.
    votes: HashMap<String, usize>,
    /// Unix seconds; preserved across a disconnect so a resumed poll
    /// still ends at the original time.
    deadline: i64,
    state: PollState,
}

impl Poll {
    fn tally(&self) -> Vec<(String, usize)> {
        let mut counts = vec![0usize; self.choices.len()];
        for &idx in self.votes.values() {
            if let Some(slot) = counts.get_mut(idx) {
                *slot += 1;
            }
        }
        self.choices.iter().cloned().zip(counts).collect()
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct PollFile {
    polls: Vec<Poll>,
}

#[derive(Default)]
struct PollStore {
    /// Lowercased channel name → poll.
    polls: HashMap<String, Poll>,
}

pub struct PollPlugin {
    store: Rc<RefCell<PollStore>>,
    resource: Option<PathBuf>,
    max_choices: usize,
}

impl PollPlugin {
    pub fn new() -> PollPlugin {
        PollPlugin {
            store: Rc::new(RefCell::new(PollStore::default())),
            resource: None,
            max_choices: 10,
        }
    }

    /// `!poll <duration> <choice…>` or `!poll end`.
    fn on_poll(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        let Some(channel) = event.channel_name().map(str::to_owned) else {
            return Ok(Flow::Continue);
        };
        let cm = ctx.state.borrow().case();
        let key = cm.lower(&channel).into_owned();

        if event.content.trim() == "end" {
            let ended = {
                let mut store = self.store.borrow_mut();
                store.polls.remove(&key).map(|mut poll| {
                    poll.state = PollState::Ended;
                    poll
                })
            };
            match ended {
                Some(poll) => announce_results(ctx.state, &poll),
                None => ctx.reply(event, "no poll is running here"),
            }
            return Ok(Flow::Continue);
        }

        let (dur_word, choice_words) = match event.content.split_once(char::is_whitespace) {
            Some((d, rest)) => (d, rest.trim_start()),
            None => {
                ctx.reply(event, "usage: poll <duration> <choice> <choice…> | poll end");
                return Ok(Flow::Continue);
            }
        };
        let Some(duration) = parse_duration(dur_word) else {
            ctx.reply(event, format!("cannot make sense of duration {dur_word:?}"));
            return Ok(Flow::Continue);
        };
        let mut choices: Vec<String> = Vec::new();
        for word in choice_words.split_whitespace() {
            let folded = cm.lower(word).into_owned();
            if !choices.contains(&folded) {
                choices.push(folded);
            }
        }
        if choices.len() < 2 {
            ctx.reply(event, "a poll needs at least two distinct choices");
            return Ok(Flow::Continue);
        }
        if choices.len() > self.max_choices {
            ctx.reply(
                event,
                format!("too many choices (the limit is {})", self.max_choices),
            );
            return Ok(Flow::Continue);
        }
        if self.store.borrow().polls.contains_key(&key) {
            ctx.reply(event, "a poll is already running here");
            return Ok(Flow::Continue);
        }

        let deadline = event.time + i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
        let poll = Poll {
            channel: channel.clone(),
            choices: choices.clone(),
            votes: HashMap::new(),
            deadline,
            state: PollState::Open,
        };
        self.store.borrow_mut().polls.insert(key.clone(), poll);
        ctx.say(
            &channel,
            format!(
                "Poll open for {}: vote by saying one of: {}",
                dur_word,
                choices.join(", ")
            ),
        );
        spawn_deadline_fiber(ctx, Rc::clone(&self.store), key, duration);
        Ok(Flow::Continue)
    }

    /// Votes are plain channel messages matching a choice.
    fn on_chan(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        let Some(channel) = event.channel_name() else {
            return Ok(Flow::Continue);
        };
        let cm = ctx.state.borrow().case();
        let key = cm.lower(channel).into_owned();
        let word = cm.lower(event.content.trim()).into_owned();
        let mut store = self.store.borrow_mut();
        if let Some(poll) = store.polls.get_mut(&key)
            && poll.state == PollState::Open
            && let Some(idx) = poll.choices.iter().position(|c| *c == word)
        {
            poll.votes.insert(voter_key(&event.sender, cm), idx);
        }
        Ok(Flow::Continue)
    }

    /// A voter changing nick must not lose (or duplicate) their vote.
    fn on_nick(&mut self, ctx: &mut PluginCtx<'_>, event: &Event) -> HandlerResult {
        let cm = ctx.state.borrow().case();
        let old = format!("n:{}", cm.lower(&event.sender.nickname));
        let new = format!("n:{}", cm.lower(&event.target.nickname));
        let mut store = self.store.borrow_mut();
        for poll in store.polls.values_mut() {
            if let Some(idx) = poll.votes.remove(&old) {
                poll.votes.insert(new.clone(), idx);
            }
        }
        Ok(Flow::Continue)
    }
}

fn voter_key(user: &User, cm: CaseMapping) -> String {
    if user.account.is_empty() {
        format!("n:{}", cm.lower(&user.nickname))
    } else {
        format!("a:{}", user.account.to_lowercase())
    }
}

fn spawn_deadline_fiber(
    ctx: &PluginCtx<'_>,
    store: Rc<RefCell<PollStore>>,
    key: String,
    duration: Duration,
) {
    let state = Rc::clone(ctx.state);
    ctx.spawn(move |fib| async move {
        fib.sleep(duration).await;
        let ended = {
            let mut store = store.borrow_mut();
            match store.polls.get(&key) {
                // `!poll end` got there first (or the poll was dropped at
                // disconnect); nothing to announce.
                Some(poll) if poll.state == PollState::Open => store.polls.remove(&key),
                _ => None,
            }
        };
        if let Some(poll) = ended {
            announce_results(&state, &poll);
        }
    });
}

fn announce_results(state: &SharedState, poll: &Poll) {
    let total: usize = poll.tally().iter().map(|(_, n)| n).sum();
    let mut st = state.borrow_mut();
    if total == 0 {
        st.send(Outbound::privmsg(&poll.channel, "the poll ended with no votes"));
        return;
    }
    for (choice, count) in poll.tally() {
        let pct = 100.0 * count as f64 / total as f64;
        let noun = if count == 1 { "vote" } else { "votes" };
        st.send(Outbound::privmsg(
            &poll.channel,
            format!("{choice} : {count} {noun} ({pct:.1}%)"),
        ));
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let mut total = 0u64;
    let mut digits = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else {
            let n: u64 = digits.parse().ok()?;
            digits.clear();
            total += match ch {
                'h' => n * 3600,
                'm' => n * 60,
                's' => n,
                _ => return None,
            };
        }
    }
    if !digits.is_empty() {
        total += digits.parse::<u64>().ok()?;
    }
    (total > 0).then(|| Duration::from_secs(total))
}

impl Default for PollPlugin {
    fn default() -> Self {
        PollPlugin::new()
    }
}

impl Plugin for PollPlugin {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn handlers() -> Vec<HandlerSpec<Self>> {
        vec![
            HandlerSpec::on(&[EventKind::Chan], PollPlugin::on_poll)
                .home()
                .command(CommandSpec::new(
                    "poll",
                    "poll <duration> <choice> <choice…> | poll end",
                    "Run a timed vote in the channel",
                )),
            HandlerSpec::on(&[EventKind::Chan], PollPlugin::on_chan).home(),
            HandlerSpec::on(&[EventKind::Nick, EventKind::SelfNick], PollPlugin::on_nick),
        ]
    }

    fn settings(&self) -> Vec<SettingDesc> {
        vec![SettingDesc::new(
            "max_choices",
            10i64,
            "Maximum number of choices a poll may offer",
        )]
    }

    fn configure(&mut self, section: &toml::Table) -> Result<(), InitError> {
        if let Some(v) = section.get("max_choices").and_then(toml::Value::as_integer)
            && v > 1
        {
            self.max_choices = usize::try_from(v).unwrap_or(10);
        }
        Ok(())
    }

    fn assign_resource_dir(&mut self, dir: &Path) {
        self.resource = Some(dir.join(RESOURCE_FILE));
    }

    /// Resume any poll serialised at the last disconnect.  A poll whose
    /// deadline passed while the bot was away ends immediately.
    fn start(&mut self, ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        let Some(path) = self.resource.clone() else {
            return Ok(());
        };
        let Ok(data) = std::fs::read_to_string(&path) else {
            return Ok(());
        };
        let file: PollFile = toml::from_str(&data).map_err(|e| {
            InitError::new(InitErrorKind::Start, "poll")
                .with_file(&path)
                .with_source(e)
        })?;
        let _ = std::fs::remove_file(&path);
        let now = jiff::Timestamp::now().as_second();
        let cm = ctx.state.borrow().case();
        for poll in file.polls {
            if poll.state != PollState::Open {
                continue;
            }
            let key = cm.lower(&poll.channel).into_owned();
            let remaining = poll.deadline - now;
            if remaining <= 0 {
                announce_results(ctx.state, &poll);
                continue;
            }
            self.store.borrow_mut().polls.insert(key.clone(), poll);
            spawn_deadline_fiber(
                ctx,
                Rc::clone(&self.store),
                key,
                Duration::from_secs(remaining.unsigned_abs()),
            );
        }
        Ok(())
    }

    /// Serialise open polls so a reconnect can resume them.
    fn teardown(&mut self, _ctx: &mut PluginCtx<'_>) -> Result<(), InitError> {
        let Some(path) = self.resource.clone() else {
            return Ok(());
        };
        let polls: Vec<Poll> = self.store.borrow_mut().polls.drain().map(|(_, p)| p).collect();
        if polls.is_empty() {
            let _ = std::fs::remove_file(&path);
            return Ok(());
        }
        let file = PollFile { polls };
        let rendered = toml::to_string_pretty(&file).map_err(|e| {
            InitError::new(InitErrorKind::Teardown, "poll").with_source(e)
        })?;
        crate::persist::atomic_save(&path, &rendered).map_err(|e| {
            InitError::new(InitErrorKind::Teardown, "poll")
                .with_file(&path)
                .with_source(e)
        })
    }

    fn channel_specific_commands(
        &self,
        channel: &str,
    ) -> BTreeMap<String, crate::plugin::CommandMeta> {
        let mut map = BTreeMap::new();
        let store = self.store.borrow();
        if store.polls.contains_key(&channel.to_lowercase()) {
            map.insert(
                "poll end".to_owned(),
                crate::plugin::CommandMeta {
                    syntax: "poll end".to_owned(),
                    description: "End the running poll now".to_owned(),
                    hidden: false,
                },
            );
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sched::Scheduler;
    use crate::state::CoreState;
    use pretty_assertions::assert_eq;
    use skald_proto::ChannelRef;

    fn fixture() -> (SharedState, Scheduler) {
        let mut config = Config::default();
        config.bot.homes = vec!["#ch".to_owned()];
        (
            CoreState::shared(config, "/tmp/skald-test".into()),
            Scheduler::new(),
        )
    }

    fn chan_event(sender: &str, content: &str, time: i64) -> Event {
        Event {
            kind: EventKind::Chan,
            sender: User::from_nickname(sender),
            channel: Some(ChannelRef::new("#ch")),
            content: content.to_owned(),
            time,
            ..Event::default()
        }
    }

    fn sent_lines(state: &SharedState) -> Vec<String> {
        let mut st = state.borrow_mut();
        let mut out = Vec::new();
        while let Some(msg) = st.pop_outbound() {
            out.push(msg.render());
        }
        out
    }

    #[test]
    fn parse_durations() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("x"), None);
        assert_eq!(parse_duration("0s"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_lifecycle_counts_and_percentages() {
        let (state, sched) = fixture();
        let mut plugin = PollPlugin::new();
        let mut outbox = Vec::new();
        let mut ctx = PluginCtx::new(&state, &sched, "poll", &mut outbox);

        plugin
            .on_poll(&mut ctx, &chan_event("op", "5s yes no", 1_700_000_000))
            .unwrap();
        let _ = sent_lines(&state);

        for (user, vote) in [("u1", "yes"), ("u2", "yes"), ("u3", "yes"), ("u4", "no")] {
            plugin
                .on_chan(&mut ctx, &chan_event(user, vote, 1_700_000_001))
                .unwrap();
        }
        // A non-choice message is not a vote.
        plugin
            .on_chan(&mut ctx, &chan_event("u5", "maybe", 1_700_000_002))
            .unwrap();

        sched.pump(16);
        tokio::time::advance(Duration::from_secs(6)).await;
        sched.run_due_timers(tokio::time::Instant::now());
        sched.pump(16);

        assert_eq!(
            sent_lines(&state),
            [
                "PRIVMSG #ch :yes : 3 votes (75.0%)",
                "PRIVMSG #ch :no : 1 vote (25.0%)",
            ]
        );
        assert!(plugin.store.borrow().polls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn revoting_replaces_not_duplicates() {
        let (state, sched) = fixture();
        let mut plugin = PollPlugin::new();
        let mut outbox = Vec::new();
        let mut ctx = PluginCtx::new(&state, &sched, "poll", &mut outbox);
        plugin
            .on_poll(&mut ctx, &chan_event("op", "5s yes no", 0))
            .unwrap();
        let _ = sent_lines(&state);
        plugin.on_chan(&mut ctx, &chan_event("u1", "yes", 1)).unwrap();
        plugin.on_chan(&mut ctx, &chan_event("u1", "no", 2)).unwrap();
        plugin.on_poll(&mut ctx, &chan_event("op", "end", 3)).unwrap();
        assert_eq!(
            sent_lines(&state),
            [
                "PRIVMSG #ch :yes : 0 votes (0.0%)",
                "PRIVMSG #ch :no : 1 vote (100.0%)",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nick_change_preserves_single_vote() {
        let (state, sched) = fixture();
        let mut plugin = PollPlugin::new();
        let mut outbox = Vec::new();
        let mut ctx = PluginCtx::new(&state, &sched, "poll", &mut outbox);
        plugin
            .on_poll(&mut ctx, &chan_event("op", "5s yes no", 0))
            .unwrap();
        let _ = sent_lines(&state);
        plugin.on_chan(&mut ctx, &chan_event("u1", "yes", 1)).unwrap();

        let nick_event = Event {
            kind: EventKind::Nick,
            sender: User::from_nickname("u1"),
            target: User::from_nickname("u2"),
            ..Event::default()
        };
        plugin.on_nick(&mut ctx, &nick_event).unwrap();

        plugin.on_poll(&mut ctx, &chan_event("op", "end", 2)).unwrap();
        assert_eq!(
            sent_lines(&state),
            [
                "PRIVMSG #ch :yes : 1 vote (100.0%)",
                "PRIVMSG #ch :no : 0 votes (0.0%)",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poll_survives_teardown_and_resumes_with_original_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let (state, sched) = fixture();
        let mut plugin = PollPlugin::new();
        plugin.assign_resource_dir(dir.path());
        let mut outbox = Vec::new();
        let now = jiff::Timestamp::now().as_second();
        {
            let mut ctx = PluginCtx::new(&state, &sched, "poll", &mut outbox);
            plugin
                .on_poll(&mut ctx, &chan_event("op", "1h yes no", now))
                .unwrap();
            plugin.on_chan(&mut ctx, &chan_event("u1", "yes", now)).unwrap();
            let _ = sent_lines(&state);
            plugin.teardown(&mut ctx).unwrap();
        }
        assert!(dir.path().join(RESOURCE_FILE).exists());
        sched.cancel_all();

        // A fresh instance (fresh process) picks the poll back up.
        let mut revived = PollPlugin::new();
        revived.assign_resource_dir(dir.path());
        let mut outbox = Vec::new();
        let mut ctx = PluginCtx::new(&state, &sched, "poll", &mut outbox);
        revived.start(&mut ctx).unwrap();
        assert!(!dir.path().join(RESOURCE_FILE).exists());
        {
            let store = revived.store.borrow();
            let poll = store.polls.get("#ch").unwrap();
            assert_eq!(poll.deadline, now + 3600);
            assert_eq!(poll.votes.len(), 1);
        }
        // The revived fiber still fires.
        sched.pump(16);
        tokio::time::advance(Duration::from_secs(3601)).await;
        sched.run_due_timers(tokio::time::Instant::now());
        sched.pump(16);
        let lines = sent_lines(&state);
        assert!(lines.iter().any(|l| l.contains("yes : 1 vote")));
    }
}
