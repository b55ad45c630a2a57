use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Everything read from the configuration file.  Per-plugin sections are
/// kept as raw TOML tables and handed to the owning plugin untouched.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub core: CoreSettings,
    pub bot: BotSettings,
    pub server: ServerSettings,
    pub plugins: toml::Table,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct CoreSettings {
    /// Character that introduces bot commands in channel messages.
    pub prefix: String,
    /// Root directory for plugin resources; defaults per platform.
    pub resource_dir: Option<PathBuf>,
    /// Directory for channel/server logs; logging is off when unset.
    pub log_dir: Option<PathBuf>,
    /// Suppress all terminal output.
    pub headless: bool,
    /// Adapt output colours to a bright terminal.
    pub bright: bool,
    /// Reconnect after a lost connection.
    pub reconnect: bool,
}

impl Default for CoreSettings {
    fn default() -> CoreSettings {
        CoreSettings {
            prefix: "!".to_owned(),
            resource_dir: None,
            log_dir: None,
            headless: false,
            bright: false,
            reconnect: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct BotSettings {
    pub nickname: String,
    pub ident: String,
    pub realname: String,
    /// Server password (`PASS`), sent before registration when set.
    pub pass: String,
    /// Services/SASL password; SASL PLAIN is attempted when non-empty.
    pub auth_password: String,
    /// Accounts or nicknames granted operator class with the bot.
    pub admins: Vec<String>,
    /// Channels where the bot offers its full functionality.
    pub homes: Vec<String>,
    /// Channels joined as a guest.
    pub channels: Vec<String>,
}

impl Default for BotSettings {
    fn default() -> BotSettings {
        BotSettings {
            nickname: "skald".to_owned(),
            ident: "skald".to_owned(),
            realname: "skald IRC bot".to_owned(),
            pass: String::new(),
            auth_password: String::new(),
            admins: Vec::new(),
            homes: Vec::new(),
            channels: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
    /// Defaults to 6697 with TLS, 6667 without.
    pub port: Option<u16>,
    pub tls: bool,
}

impl Default for ServerSettings {
    fn default() -> ServerSettings {
        ServerSettings {
            address: "irc.libera.chat".to_owned(),
            port: None,
            tls: true,
        }
    }
}

impl ServerSettings {
    pub fn port(&self) -> u16 {
        match (self.port, self.tls) {
            (Some(p), _) => p,
            (None, true) => skald_net::TLS_PORT,
            (None, false) => skald_net::PLAIN_PORT,
        }
    }
}

/// A user-visible plugin setting, for configuration-file generation.
/// Unsealed settings are readable from the file but left out of the
/// generated one.
#[derive(Clone, Debug, PartialEq)]
pub struct SettingDesc {
    pub key: &'static str,
    pub default: toml::Value,
    pub description: &'static str,
    pub sealed: bool,
}

impl SettingDesc {
    pub fn new(
        key: &'static str,
        default: impl Into<toml::Value>,
        description: &'static str,
    ) -> SettingDesc {
        SettingDesc {
            key,
            default: default.into(),
            description,
            sealed: true,
        }
    }

    pub fn unsealed(mut self) -> SettingDesc {
        self.sealed = false;
        self
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to write configuration file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load the configuration, returning it together with warnings about
/// keys the bot does not know.  Unknown keys are never fatal.
pub fn load(path: &Path) -> Result<(Config, Vec<String>), ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    let value = data
        .parse::<toml::Table>()
        .map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
    let warnings = unknown_key_warnings(&value);
    let config = Config::deserialize(toml::Value::Table(value)).map_err(|source| {
        ConfigError::Parse {
            path: path.to_owned(),
            source,
        }
    })?;
    Ok((config, warnings))
}

const CORE_KEYS: &[&str] = &[
    "prefix",
    "resource_dir",
    "log_dir",
    "headless",
    "bright",
    "reconnect",
];
const BOT_KEYS: &[&str] = &[
    "nickname",
    "ident",
    "realname",
    "pass",
    "auth_password",
    "admins",
    "homes",
    "channels",
];
const SERVER_KEYS: &[&str] = &["address", "port", "tls"];

fn unknown_key_warnings(value: &toml::Table) -> Vec<String> {
    let mut warnings = Vec::new();
    for (section, keys) in [("core", CORE_KEYS), ("bot", BOT_KEYS), ("server", SERVER_KEYS)] {
        if let Some(toml::Value::Table(table)) = value.get(section) {
            for key in table.keys() {
                if !keys.contains(&key.as_str()) {
                    warnings.push(format!("unknown key {key:?} in [{section}]"));
                }
            }
        }
    }
    for section in value.keys() {
        if !matches!(section.as_str(), "core" | "bot" | "server" | "plugins") {
            warnings.push(format!("unknown section [{section}]"));
        }
    }
    warnings
}

/// Render a fresh configuration file: current core/bot/server values plus
/// each plugin's sealed settings, with the descriptions as comments.
pub fn render(config: &Config, plugin_settings: &[(String, Vec<SettingDesc>)]) -> String {
    let mut out = String::new();
    out.push_str("# skald configuration\n\n");
    for (section, body) in [
        ("core", toml::Value::try_from(&config.core)),
        ("bot", toml::Value::try_from(&config.bot)),
        ("server", toml::Value::try_from(&config.server)),
    ] {
        let _ = writeln!(out, "[{section}]");
        if let Ok(toml::Value::Table(table)) = body {
            for (key, value) in &table {
                let _ = writeln!(out, "{key} = {value}");
            }
        }
        out.push('\n');
    }
    for (plugin, settings) in plugin_settings {
        let configured = config.plugins.get(plugin);
        let _ = writeln!(out, "[plugins.{plugin}]");
        for setting in settings {
            if !setting.sealed {
                continue;
            }
            let _ = writeln!(out, "# {}", setting.description);
            let value = configured
                .and_then(|t| t.get(setting.key))
                .unwrap_or(&setting.default);
            let _ = writeln!(out, "{} = {}", setting.key, value);
        }
        out.push('\n');
    }
    out
}

/// Write the rendered configuration to `path`.
pub fn write(
    path: &Path,
    config: &Config,
    plugin_settings: &[(String, Vec<SettingDesc>)],
) -> Result<(), ConfigError> {
    std::fs::write(path, render(config, plugin_settings)).map_err(|source| ConfigError::Write {
        path: path.to_owned(),
        source,
    })
}

/// Default resource root: `$APPDATA/skald` on Windows, `$HOME/.local/share/skald`
/// elsewhere, falling back to the working directory.
pub fn default_resource_dir() -> PathBuf {
    #[cfg(windows)]
    let base = std::env::var_os("APPDATA").map(PathBuf::from);
    #[cfg(not(windows))]
    let base = std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"));
    match base {
        Some(base) => base.join("skald"),
        None => PathBuf::from("skald-resources"),
    }
}
