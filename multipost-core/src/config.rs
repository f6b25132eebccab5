use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::model::PayloadKind;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MultipostConfig {
    #[serde(default)]
    pub chromium: ChromiumSection,
    #[serde(default)]
    pub flags: FlagsSection,
    #[serde(default)]
    pub poller: PollerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub grouping: GroupingSection,
    #[serde(default)]
    pub media: MediaSection,
    #[serde(default)]
    pub timings: TimingsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_true")]
    pub sandbox: bool,
    #[serde(default)]
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
    /// Reusing a profile keeps platform logins between runs.
    pub user_data_dir: Option<String>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: true,
            disable_gpu: false,
            request_timeout_seconds: None,
            user_data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagsSection {
    pub lang: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerSection {
    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,
    #[serde(default = "default_elements_timeout_ms")]
    pub elements_timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            element_timeout_ms: default_element_timeout_ms(),
            elements_timeout_ms: default_elements_timeout_ms(),
            interval_ms: default_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupingSection {
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,
    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for GroupingSection {
    fn default() -> Self {
        Self {
            title_prefix: default_title_prefix(),
            color: default_color(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSection {
    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    pub user_agent: Option<String>,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingsSection {
    #[serde(default = "default_editor_settle_ms")]
    pub editor_settle_ms: u64,
    #[serde(default = "default_upload_settle_ms")]
    pub upload_settle_ms: u64,
    #[serde(default = "default_publish_settle_ms")]
    pub publish_settle_ms: u64,
    #[serde(default = "default_pre_publish_ms")]
    pub pre_publish_ms: u64,
}

impl Default for TimingsSection {
    fn default() -> Self {
        Self {
            editor_settle_ms: default_editor_settle_ms(),
            upload_settle_ms: default_upload_settle_ms(),
            publish_settle_ms: default_publish_settle_ms(),
            pre_publish_ms: default_pre_publish_ms(),
        }
    }
}

impl TimingsSection {
    pub fn editor_settle(&self) -> Duration {
        Duration::from_millis(self.editor_settle_ms)
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(self.upload_settle_ms)
    }

    pub fn publish_settle(&self) -> Duration {
        Duration::from_millis(self.publish_settle_ms)
    }

    pub fn pre_publish(&self) -> Duration {
        Duration::from_millis(self.pre_publish_ms)
    }
}

/// Platforms declared in `platforms.toml`, driven by the selector routine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default, rename = "platform")]
    pub platforms: Vec<PlatformEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformEntry {
    pub id: String,
    pub kind: PayloadKind,
    pub name: String,
    pub platform_name: String,
    pub home_url: String,
    pub inject_url: String,
    pub favicon_url: Option<String>,
    pub iconify_icon: Option<String>,
    #[serde(default = "default_publish_control")]
    pub publish_control: String,
    pub selectors: SelectorEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorEntry {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default = "default_body_mode")]
    pub body_mode: String,
    pub file_input: Option<String>,
    pub upload_done: Option<String>,
    pub publish: Option<String>,
    pub publish_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub multipost: MultipostConfig,
    pub platforms: PlatformsConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let multipost = load_multipost_config(dir.join("multipost.toml"))?;
        let platforms_path = dir.join("platforms.toml");
        let platforms = if platforms_path.exists() {
            load_platforms_config(platforms_path)?
        } else {
            PlatformsConfig::default()
        };
        Ok(Self {
            multipost,
            platforms,
        })
    }
}

pub fn load_multipost_config<P: AsRef<Path>>(path: P) -> Result<MultipostConfig> {
    let config: MultipostConfig = load_toml(path)?;
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid {
            field: "retry.max_attempts".into(),
            reason: "must be at least 1".into(),
        });
    }
    if config.poller.interval_ms == 0 {
        return Err(ConfigError::Invalid {
            field: "poller.interval_ms".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(config)
}

pub fn load_platforms_config<P: AsRef<Path>>(path: P) -> Result<PlatformsConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: PathBuf::from(path),
    })
}

fn default_true() -> bool {
    true
}

fn default_element_timeout_ms() -> u64 {
    10_000
}

fn default_elements_timeout_ms() -> u64 {
    30_000
}

fn default_interval_ms() -> u64 {
    100
}

fn default_max_attempts() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    2_000
}

fn default_title_prefix() -> String {
    "MultiPost".to_string()
}

fn default_color() -> String {
    "blue".to_string()
}

fn default_fetch_timeout_seconds() -> u64 {
    60
}

fn default_editor_settle_ms() -> u64 {
    5_000
}

fn default_upload_settle_ms() -> u64 {
    2_000
}

fn default_publish_settle_ms() -> u64 {
    3_000
}

fn default_pre_publish_ms() -> u64 {
    3_000
}

fn default_publish_control() -> String {
    "expected".to_string()
}

fn default_body_mode() -> String {
    "value".to_string()
}
