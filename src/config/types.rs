use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGISTRY_FILE: &str = ".tailbeat";
pub const DEFAULT_SPOOL_SIZE: usize = 1024;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IGNORE_OLDER: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_SCAN_FREQUENCY: Duration = Duration::from_secs(10);
pub const DEFAULT_HARVESTER_BUFFER_SIZE: usize = 16 << 10;
pub const DEFAULT_INPUT_TYPE: &str = "log";
pub const DEFAULT_DOCUMENT_TYPE: &str = "log";
pub const DEFAULT_ENCODING: &str = "utf-8";
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_PARTIAL_LINE_WAITING: Duration = Duration::from_secs(5);
pub const DEFAULT_OPEN_RETRY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tailbeat: TailbeatConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailbeatConfig {
    #[serde(default)]
    pub prospectors: Vec<ProspectorConfig>,
    #[serde(default = "default_spool_size")]
    pub spool_size: usize,
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,
    /// Directory of extra `*.yml` files whose prospectors are merged in
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

impl Default for TailbeatConfig {
    fn default() -> Self {
        Self {
            prospectors: Vec::new(),
            spool_size: DEFAULT_SPOOL_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            registry_file: default_registry_file(),
            config_dir: None,
        }
    }
}

fn default_spool_size() -> usize {
    DEFAULT_SPOOL_SIZE
}

fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

fn default_registry_file() -> PathBuf {
    PathBuf::from(DEFAULT_REGISTRY_FILE)
}

/// One group of glob patterns sharing harvester settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProspectorConfig {
    pub paths: Vec<String>,
    #[serde(default = "default_ignore_older", with = "humantime_serde")]
    pub ignore_older: Duration,
    #[serde(default = "default_scan_frequency", with = "humantime_serde")]
    pub scan_frequency: Duration,
    #[serde(flatten)]
    pub harvester: HarvesterConfig,
}

impl ProspectorConfig {
    pub fn new(paths: Vec<String>) -> Self {
        Self {
            paths,
            ignore_older: DEFAULT_IGNORE_OLDER,
            scan_frequency: DEFAULT_SCAN_FREQUENCY,
            harvester: HarvesterConfig::default(),
        }
    }
}

fn default_ignore_older() -> Duration {
    DEFAULT_IGNORE_OLDER
}

fn default_scan_frequency() -> Duration {
    DEFAULT_SCAN_FREQUENCY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvesterConfig {
    #[serde(default = "default_input_type")]
    pub input_type: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    #[serde(default)]
    pub fields_under_root: bool,
    #[serde(default = "default_buffer_size", rename = "harvester_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub tail_files: bool,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
    #[serde(default = "default_partial_line_waiting", with = "humantime_serde")]
    pub partial_line_waiting: Duration,
    #[serde(default)]
    pub force_close_files: bool,
    /// Delay between attempts to open a file that cannot be opened yet
    #[serde(default = "default_open_retry", with = "humantime_serde")]
    pub open_retry: Duration,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            input_type: default_input_type(),
            document_type: default_document_type(),
            fields: HashMap::new(),
            fields_under_root: false,
            buffer_size: DEFAULT_HARVESTER_BUFFER_SIZE,
            tail_files: false,
            encoding: default_encoding(),
            backoff: DEFAULT_BACKOFF,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_backoff: DEFAULT_MAX_BACKOFF,
            partial_line_waiting: DEFAULT_PARTIAL_LINE_WAITING,
            force_close_files: false,
            open_retry: DEFAULT_OPEN_RETRY,
        }
    }
}

fn default_input_type() -> String {
    DEFAULT_INPUT_TYPE.to_string()
}

fn default_document_type() -> String {
    DEFAULT_DOCUMENT_TYPE.to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_HARVESTER_BUFFER_SIZE
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

fn default_backoff() -> Duration {
    DEFAULT_BACKOFF
}

fn default_backoff_factor() -> u32 {
    DEFAULT_BACKOFF_FACTOR
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

fn default_partial_line_waiting() -> Duration {
    DEFAULT_PARTIAL_LINE_WAITING
}

fn default_open_retry() -> Duration {
    DEFAULT_OPEN_RETRY
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(flatten)]
    pub kind: OutputKind,
    #[serde(default)]
    pub publish_mode: PublishMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Console,
    File { path: PathBuf },
}

/// How the publisher waits on the sink before treating a batch as delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    Sync,
    FireAndForget,
}
