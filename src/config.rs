//! Application configuration, persisted as TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable configuration. Sections mirror the components they configure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bdi::{self, BdiModel, TransitionTable};
use crate::error::ConfigError;
use crate::paths::LeolaniPaths;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeolaniConfig {
    pub topics: TopicsConfig,
    pub bdi: BdiConfig,
    pub idresolution: IdResolutionConfig,
    pub init: InitConfig,
    pub chat: ChatConfig,
    pub context: ContextConfig,
    pub friends: FriendsConfig,
    pub monitoring: MonitoringConfig,
    pub objectloc: ObjectLocConfig,
    pub workers: WorkersConfig,
}

// ── Sections ────────────────────────────────────────────────────────────

/// Topic names on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub intention: String,
    pub desire: String,
    pub scenario: String,
    pub speaker: String,
    pub vector_id: String,
    pub object: String,
    pub image: String,
    pub knowledge: String,
    pub text_in: String,
    pub text_out: String,
    pub speaker_mention: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        let topic = |name: &str| format!("cltl.topic.{name}");
        Self {
            intention: topic("intention"),
            desire: topic("desire"),
            scenario: topic("scenario"),
            speaker: topic("speaker"),
            vector_id: topic("vector_id"),
            object: topic("object"),
            image: topic("image"),
            knowledge: topic("knowledge"),
            text_in: topic("text_in"),
            text_out: topic("text_out"),
            speaker_mention: topic("speaker_mention"),
        }
    }
}

impl TopicsConfig {
    fn all(&self) -> [(&'static str, &str); 11] {
        [
            ("intention", self.intention.as_str()),
            ("desire", self.desire.as_str()),
            ("scenario", self.scenario.as_str()),
            ("speaker", self.speaker.as_str()),
            ("vector_id", self.vector_id.as_str()),
            ("object", self.object.as_str()),
            ("image", self.image.as_str()),
            ("knowledge", self.knowledge.as_str()),
            ("text_in", self.text_in.as_str()),
            ("text_out", self.text_out.as_str()),
            ("speaker_mention", self.speaker_mention.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BdiConfig {
    /// Intentions at startup.
    pub initial: Vec<String>,
    /// `model.<intention>.<desire> = "<next>"` or a list of next intentions.
    pub model: TransitionTable,
}

impl Default for BdiConfig {
    fn default() -> Self {
        Self {
            initial: vec![bdi::INIT.to_string()],
            model: bdi::default_table(),
        }
    }
}

impl BdiConfig {
    pub fn build_model(&self) -> Result<BdiModel, crate::error::BdiError> {
        BdiModel::new(self.model.clone(), self.initial.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdResolutionConfig {
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for IdResolutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            retry_interval_ms: 500,
        }
    }
}

impl IdResolutionConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Appended to a random greeting when inviting someone to talk.
    pub greeting: String,
    /// Unanswered greetings are withdrawn after this long.
    pub timeout_ms: u64,
    pub tick_secs: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            greeting: "I am Leolani. Would you like to talk with me? Just say yes!".into(),
            timeout_ms: 120_000,
            tick_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Intention during which a conversation is running.
    pub intention: String,
    /// Re-introduce the speaker after this much silence.
    pub init_interval_ms: Option<u64>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            intention: bdi::CHAT.to_string(),
            init_interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Set to false to skip the lookup entirely (offline setups).
    pub geolocation: bool,
    pub geolocation_url: String,
    pub geolocation_timeout_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            geolocation: true,
            geolocation_url: crate::context::location::IPINFO_URL.to_string(),
            geolocation_timeout_ms: 3_000,
        }
    }
}

impl ContextConfig {
    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_millis(self.geolocation_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendBackend {
    #[default]
    Memory,
    Durable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FriendsConfig {
    pub backend: FriendBackend,
    /// Directory of the durable store; defaults to `$XDG_DATA_HOME/leolani/friends`.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

/// Object location: reports detected objects in recently seen images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectLocConfig {
    pub enabled: bool,
    /// Number of recent images kept for matching object detections.
    pub cache_size: usize,
}

impl Default for ObjectLocConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_size: crate::objectloc::DEFAULT_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub buffer_size: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            buffer_size: crate::bus::worker::DEFAULT_BUFFER_SIZE,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────────

impl LeolaniConfig {
    /// Load from `path`, or from the XDG config file if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let file = LeolaniPaths::resolve()?.config_file();
                if file.exists() {
                    Self::from_file(&file)
                } else {
                    tracing::debug!(path = %file.display(), "no config file, using defaults");
                    let config = Self::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::from_toml(&content, &path.display().to_string())?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML; `origin` names the source in errors.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("cannot serialize configuration: {e}"),
        })
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        for (name, topic) in self.topics.all() {
            if topic.trim().is_empty() {
                return invalid(format!("topics.{name} must not be empty"));
            }
        }
        if let Err(e) = self.bdi.build_model() {
            return invalid(format!("bdi.model: {e}"));
        }
        if !self.bdi.model.contains_key(&self.chat.intention) {
            return invalid(format!(
                "chat.intention \"{}\" is not an intention of bdi.model",
                self.chat.intention
            ));
        }
        if self.idresolution.max_attempts == 0 {
            return invalid("idresolution.max_attempts must be at least 1".into());
        }
        if self.init.timeout_ms == 0 || self.init.tick_secs == 0 {
            return invalid("init.timeout_ms and init.tick_secs must be positive".into());
        }
        if self.chat.init_interval_ms == Some(0) {
            return invalid("chat.init_interval_ms must be positive when set".into());
        }
        if self.objectloc.cache_size == 0 {
            return invalid("objectloc.cache_size must be at least 1".into());
        }
        if self.workers.buffer_size == 0 {
            return invalid("workers.buffer_size must be at least 1".into());
        }
        Ok(())
    }

    /// Directory for the durable friend store.
    pub fn friends_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.friends.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(LeolaniPaths::resolve()?.friends_dir()),
        }
    }
}
