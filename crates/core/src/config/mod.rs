use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::events::DEFAULT_KEY_EVENT_CHUNK_SIZE;
use crate::segment::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_MODEL_NAME: &str = "gemma3:27b";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_INTERFACE_FORMAT: &str = "ollama";
pub const DEFAULT_SUMMARY_LENGTH: usize = 75_000;
pub const DEFAULT_SAVE_SUMMARY: &str = "summary.txt";
pub const DEFAULT_NEW_CHAPTER: &str = "new_chapter.txt";
pub const DEFAULT_NUM_CTX: u32 = 128_000;
pub const DEFAULT_STOP_TOKENS: [&str; 3] = ["<|im_end|>", "<|end_of_text|>", "<|eot_id|>"];

fn default_temperature() -> f32 {
    1.0
}

fn default_timeout() -> u64 {
    0
}

fn default_num_ctx() -> u32 {
    DEFAULT_NUM_CTX
}

fn default_stop() -> Vec<String> {
    DEFAULT_STOP_TOKENS.iter().map(|s| s.to_string()).collect()
}

fn default_max_retries() -> usize {
    1
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_summary_length() -> usize {
    DEFAULT_SUMMARY_LENGTH
}

fn default_save_summary() -> PathBuf {
    PathBuf::from(DEFAULT_SAVE_SUMMARY)
}

fn default_new_chapter() -> PathBuf {
    PathBuf::from(DEFAULT_NEW_CHAPTER)
}

fn default_key_event_chunk_size() -> usize {
    DEFAULT_KEY_EVENT_CHUNK_SIZE
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
    #[error("key event chunk size must be greater than zero")]
    ZeroKeyEventChunkSize,
    #[error("summary length must be greater than zero")]
    ZeroSummaryLength,
    #[error("{field} must not be empty")]
    EmptyPath { field: &'static str },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated tokens. Zero leaves the output unbounded.
    #[serde(default)]
    pub max_tokens: u32,
    /// Per-request HTTP timeout in seconds. Zero waits indefinitely.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: 0,
            timeout: default_timeout(),
            num_ctx: default_num_ctx(),
            stop: default_stop(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    /// Local Ollama profile with the stock model.
    pub fn local_ollama() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            interface_format: DEFAULT_INTERFACE_FORMAT.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            ..Self::default()
        }
    }
}

/// Inputs, outputs and sizing for one story run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoryConfig {
    #[serde(default)]
    pub story_path: Option<PathBuf>,
    #[serde(default)]
    pub instructions_path: Option<PathBuf>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_summary_length")]
    pub summary_length: usize,
    #[serde(default = "default_save_summary")]
    pub save_summary: PathBuf,
    #[serde(default = "default_new_chapter")]
    pub new_chapter: PathBuf,
    #[serde(default = "default_key_event_chunk_size")]
    pub key_event_chunk_size: usize,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            story_path: None,
            instructions_path: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            summary_length: default_summary_length(),
            save_summary: default_save_summary(),
            new_chapter: default_new_chapter(),
            key_event_chunk_size: default_key_event_chunk_size(),
        }
    }
}

impl StoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        if self.key_event_chunk_size == 0 {
            return Err(ConfigError::ZeroKeyEventChunkSize);
        }
        if self.summary_length == 0 {
            return Err(ConfigError::ZeroSummaryLength);
        }
        if self.save_summary.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath {
                field: "save_summary",
            });
        }
        if self.new_chapter.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath {
                field: "new_chapter",
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub story: StoryConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub recent: RecentUsage,
}

impl Config {
    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    /// Opens `path`, falling back to defaults when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn ensure_recent_defaults(&mut self) {
        let known = self
            .config
            .recent
            .last_llm_interface
            .as_ref()
            .is_some_and(|name| self.config.llm_profiles.contains_key(name));
        if !known {
            self.config.recent.last_llm_interface =
                self.config.llm_profiles.keys().next().cloned();
        }
    }
}
