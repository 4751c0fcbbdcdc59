use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "sheetsort.conf";

// --- Layout Config ---
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Name prefix of the folder holding the contact sheets.
    pub marker_prefix: String,
    /// Appended to the full video filename to get its contact sheet name.
    pub image_suffix: String,
    /// Folder under the root that receives sorted pairs.
    pub keep_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            marker_prefix: "customScreens".to_string(),
            image_suffix: ".jpg".to_string(),
            keep_dir: "keep".to_string(),
        }
    }
}

// --- Pipeline Config ---
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: Option<usize>,
    pub queue_capacity: usize,
    pub drain_batch: usize,
    pub preload_ahead: usize,
    pub preload_behind: usize,
    pub cache_radius: usize,
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: 32,
            drain_batch: 8,
            preload_ahead: 10,
            preload_behind: 3,
            cache_radius: 15,
            poll_interval_ms: 50,
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(4)
            })
            .max(1)
    }
}

// --- Player Config ---
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PlayerConfig {
    /// Program used to play videos. Platform opener when unset.
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

// --- GUI Config ---
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GuiConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub font_scale: Option<f32>,
    pub resize_settle_ms: Option<u64>,
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            width: Some(1280),
            height: Some(800),
            font_scale: Some(1.0),
            resize_settle_ms: Some(150),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub gui: GuiConfig,
}

/// Process-wide context: logging is initialised here and the config is
/// loaded once, then handed to each component by reference.
pub struct AppContext {
    pub config: Config,
    config_path: Option<PathBuf>,
}

impl AppContext {
    /// Initialise logging and load (or create) the config file.
    pub fn init() -> Result<Self> {
        init_logging();

        let Some(config_dir) = dirs::config_dir() else {
            log::warn!("No config dir found, running with defaults");
            return Ok(Self { config: Config::default(), config_path: None });
        };
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("creating config dir {:?}", config_dir))?;

        Self::load_from(&config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load the config at `path`, writing defaults back for missing sections.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config {:?}", path))?;
            log::debug!("Loading config from {:?}", path);
            let cfg: Config = toml::from_str(&content)
                .map_err(|e| crate::error::SortError::Config(e.to_string()))
                .with_context(|| format!("parsing config {:?}", path))?;

            let raw: toml::Table = toml::from_str(&content).unwrap_or_default();
            let missing: Vec<&str> = ["layout", "pipeline", "player", "gui"]
                .into_iter()
                .filter(|section| !raw.contains_key(*section))
                .collect();
            if !missing.is_empty() {
                log::debug!("Writing back default sections {:?}", missing);
                fs::write(path, toml::to_string_pretty(&cfg)?)
                    .with_context(|| format!("updating config {:?}", path))?;
            }
            cfg
        } else {
            log::info!("Config file does not exist, creating {:?}", path);
            let cfg = Config::default();
            fs::write(path, toml::to_string_pretty(&cfg)?)
                .with_context(|| format!("writing config {:?}", path))?;
            cfg
        };

        Ok(Self { config, config_path: Some(path.to_path_buf()) })
    }

    /// Persist GUI geometry changes made during the session.
    pub fn save_gui_config(&self, gui: &GuiConfig) -> Result<()> {
        let Some(path) = &self.config_path else { return Ok(()) };
        let mut cfg = self.config.clone();
        cfg.gui = gui.clone();
        fs::write(path, toml::to_string_pretty(&cfg)?)
            .with_context(|| format!("saving config {:?}", path))?;
        Ok(())
    }

    /// Flush buffered log output. Call once before the process exits.
    pub fn shutdown(&self) {
        log::debug!("Shutting down");
        log::logger().flush();
    }
}

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    // A second init (e.g. from tests) keeps the first logger.
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();
}
