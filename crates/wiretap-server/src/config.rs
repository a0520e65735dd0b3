use serde::Deserialize;
use std::path::Path;
use wiretap_types::Vec3d;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default = "default_motd")]
    pub motd: String,
    /// Overrides `WIRETAP_SERVER_VERSION` when set.
    #[serde(default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub compression_threshold: Option<i32>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub log_packets: bool,
    #[serde(default)]
    pub blocked_words: Vec<String>,
    #[serde(default = "default_click_line_step")]
    pub click_line_step: f64,
    #[serde(default)]
    pub interact_targets: Vec<InteractTarget>,
}

/// A clickable stack of text lines bound to a client-side entity id.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractTarget {
    pub entity_id: i32,
    pub name: String,
    /// Base of the stack.
    pub position: Vec3d,
    pub lines: Vec<String>,
    #[serde(default = "default_line_distance")]
    pub line_distance: f64,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    25565
}

fn default_max_players() -> u32 {
    20
}

fn default_motd() -> String {
    "A Wiretap Server".into()
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_click_line_step() -> f64 {
    0.24
}

fn default_line_distance() -> f64 {
    0.25
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_players: default_max_players(),
            motd: default_motd(),
            server_version: None,
            compression_threshold: None,
            keep_alive_secs: default_keep_alive_secs(),
            log_packets: false,
            blocked_words: Vec::new(),
            click_line_step: default_click_line_step(),
            interact_targets: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ServerConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Ticks between keep-alives at 20 TPS.
    pub fn keep_alive_ticks(&self) -> u64 {
        self.keep_alive_secs.max(1) * 20
    }
}
