use anyhow::Context;
use clap::Parser;
use skald::config::{self, Config};
use skald::plugins::{
    ctcp::CtcpPlugin, help::HelpPlugin, oneliner::OnelinerPlugin, poll::PollPlugin,
    printer::PrinterPlugin,
};
use skald::Bot;
use std::io::{IsTerminal, stderr};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{filter::Targets, prelude::*};

#[derive(Clone, Debug, Eq, Parser, PartialEq)]
#[command(version, about = "Extensible IRC bot")]
struct Arguments {
    /// Write the current settings to the configuration file and exit
    #[arg(long)]
    writeconfig: bool,

    /// Path of the configuration file
    #[arg(long, default_value = "skald.toml")]
    configfile: PathBuf,

    /// Comma-separated home channels, overriding the configuration file
    #[arg(long, value_delimiter = ',')]
    homes: Vec<String>,

    /// Comma-separated guest channels, overriding the configuration file
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,

    /// Adapt colours to a bright terminal
    #[arg(long)]
    bright: bool,

    /// Suppress all terminal output
    #[arg(long)]
    headless: bool,

    /// Run every plugin's selftest and exit
    #[arg(long, hide = true)]
    selftest: bool,

    /// Emit log events for every line sent & received
    #[arg(long)]
    trace: bool,
}

fn init_logging(loglevel: Level, headless: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(!headless && stderr().is_terminal())
                .with_writer(stderr),
        )
        .with(
            Targets::new()
                .with_target(env!("CARGO_CRATE_NAME"), loglevel)
                .with_target("skald_net", loglevel)
                .with_default(if headless { Level::WARN } else { Level::INFO }),
        )
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    let loglevel = if args.trace {
        Level::TRACE
    } else {
        Level::INFO
    };
    init_logging(loglevel, args.headless);

    let mut config = if args.configfile.exists() {
        let (config, warnings) =
            config::load(&args.configfile).context("failed to load configuration")?;
        for warning in warnings {
            tracing::warn!(file = %args.configfile.display(), "{warning}");
        }
        config
    } else {
        tracing::info!(
            file = %args.configfile.display(),
            "No configuration file found; using defaults"
        );
        Config::default()
    };
    if !args.homes.is_empty() {
        config.bot.homes = args.homes.clone();
    }
    if !args.channels.is_empty() {
        config.bot.channels = args.channels.clone();
    }
    config.core.bright |= args.bright;
    config.core.headless |= args.headless;

    let resource_root = config
        .core
        .resource_dir
        .clone()
        .unwrap_or_else(config::default_resource_dir);

    let mut bot = Bot::new(config.clone(), resource_root);
    bot.register(PrinterPlugin::new());
    bot.register(OnelinerPlugin::new());
    bot.register(PollPlugin::new());
    bot.register(HelpPlugin::new());
    bot.register(CtcpPlugin::new());

    if args.writeconfig {
        let settings = bot.plugins().all_settings();
        config::write(&args.configfile, &config, &settings)
            .context("failed to write configuration")?;
        println!("Wrote configuration to {}", args.configfile.display());
        return Ok(());
    }

    bot.init_plugins().context("plugin initialisation failed")?;

    if args.selftest {
        bot.selftest_plugins().context("selftest failed")?;
        println!("All plugin selftests passed");
        return Ok(());
    }

    bot.run().await.context("bot terminated with an error")?;
    Ok(())
}
