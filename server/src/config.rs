use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use session::SessionConfig;
use tokio::sync::OnceCell;

pub const PROGNAME: &str = "playerd";
pub const CONFIG_NAME: &str = "config.toml";

static CONF: OnceCell<Config> = OnceCell::const_new();

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Config {
    session: SessionConfig,
    engine: EngineConfig,
}

/// Knobs of the simulated engine.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// How often time callbacks are sent while playing.
    pub tick_ms: u64,
    /// How long opening a media takes.
    pub buffering_ms: u64,
    /// Url schemes that open, everything else fails.
    pub schemes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            buffering_ms: 1000,
            schemes: vec!["http".into(), "https".into(), "file".into()],
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn buffering(&self) -> Duration {
        Duration::from_millis(self.buffering_ms)
    }
}

fn parse(conts: &str) -> anyhow::Result<Config> {
    let conf: Config = toml::from_str(conts).context("parsing config file as TOML")?;
    if conf.engine.schemes.is_empty() {
        anyhow::bail!("The engine must support at least one url scheme");
    }
    Ok(conf)
}

/// A missing default config file means defaults, an explicitly given one must
/// exist.
pub fn init_config(path: Option<&Path>) -> anyhow::Result<()> {
    let conf_file = match path {
        Some(p) => p.to_path_buf(),
        None => conf_dir()
            .context("could not get config dir")?
            .join(CONFIG_NAME),
    };

    let conf = match fs::read_to_string(&conf_file) {
        Ok(conts) => parse(&conts)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound && path.is_none() => {
            log::info!("No config file at {:?}, using defaults", conf_file);
            Config::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading config file at {:?}", conf_file))
        }
    };

    log::debug!("Config: {:?}", conf);
    CONF.set(conf).context("setting the global conf variable")?;
    Ok(())
}

fn get_instance() -> &'static Config {
    CONF.get().expect("Config was not initialized")
}

pub fn session() -> &'static SessionConfig {
    &get_instance().session
}

pub fn engine() -> &'static EngineConfig {
    &get_instance().engine
}

pub fn conf_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(PROGNAME))
}
