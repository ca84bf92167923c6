use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_FILE: &str = ".env";

pub const DEFAULT_CONFIG_FILE: &str = "watcher.toml";
pub const DEFAULT_LOG_FILE: &str = "logs/watcher.log";

const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL_SEC";
const ENV_LAST_N: &str = "LAST_N_CASTS";
const ENV_SEEN_FILE: &str = "SEEN_FILE";
const ENV_FID: &str = "WATCH_FID";
const ENV_NEYNAR_API_KEY: &str = "NEYNAR_API_KEY";
const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

/// Upper bound on the fetch window accepted by the Neynar casts endpoint.
pub const MAX_LAST_N: u32 = 100;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub neynar: NeynarConfig,
    pub telegram: TelegramConfig,
    pub retry: RetryConfig,
}

/// Which side of a delivery attempt an identifier is marked seen on.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MarkSeenPolicy {
    /// Mark the whole batch before delivering. A failed delivery is dropped.
    #[default]
    BeforeDelivery,
    /// Mark each cast after its delivery succeeds. Failed casts are retried
    /// while they stay inside the fetch window.
    AfterDelivery,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_s: u64,
    pub last_n: u32,
    pub seen_file: PathBuf,
    /// Pause after a connection/timeout failure.
    pub transport_backoff_ms: u64,
    /// Pause after an HTTP status or payload failure.
    pub protocol_backoff_ms: u64,
    pub delivery_pause_ms: u64,
    pub mark_seen: MarkSeenPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: 5,
            last_n: 2,
            seen_file: PathBuf::from("data/seen_casts.json"),
            transport_backoff_ms: 3000,
            protocol_backoff_ms: 5000,
            delivery_pause_ms: 500,
            mark_seen: MarkSeenPolicy::default(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }

    pub fn transport_backoff(&self) -> Duration {
        Duration::from_millis(self.transport_backoff_ms)
    }

    pub fn protocol_backoff(&self) -> Duration {
        Duration::from_millis(self.protocol_backoff_ms)
    }

    pub fn delivery_pause(&self) -> Duration {
        Duration::from_millis(self.delivery_pause_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NeynarConfig {
    pub api_base: String,
    pub request_timeout_ms: u64,
}

impl Default for NeynarConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.neynar.com".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub parse_mode: String,
    pub disable_web_page_preview: bool,
    pub disable_notification: bool,
    pub request_timeout_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            parse_mode: "HTML".to_string(),
            disable_web_page_preview: false,
            disable_notification: false,
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// API credentials. Values are opaque; only their presence is checked.
#[derive(Clone)]
pub struct Credentials {
    pub neynar_api_key: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("neynar_api_key", &"<redacted>")
            .field("telegram_bot_token", &"<redacted>")
            .field("telegram_chat_id", &self.telegram_chat_id)
            .finish()
    }
}

impl Credentials {
    /// Read all credentials, recording one error per missing value.
    pub fn from_lookup<L>(lookup: &L, errors: &mut Vec<String>) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut required = |key: &str| {
            let value = lookup(key).map(|v| sanitize_key(&v)).unwrap_or_default();
            if value.is_empty() {
                errors.push(format!("{} is not set or empty", key));
            }
            value
        };
        Self {
            neynar_api_key: required(ENV_NEYNAR_API_KEY),
            telegram_bot_token: required(ENV_TELEGRAM_BOT_TOKEN),
            telegram_chat_id: required(ENV_TELEGRAM_CHAT_ID),
        }
    }
}

/// Every validation problem found while resolving settings.
#[derive(Debug, thiserror::Error)]
#[error("{} configuration error(s)", .errors.len())]
pub struct ConfigError {
    errors: Vec<String>,
}

impl ConfigError {
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Fully validated startup settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub credentials: Credentials,
    /// `None` when neither `--fid` nor `WATCH_FID` was given; the caller prompts.
    pub fid: Option<u64>,
}

impl Settings {
    /// Layer the config file, environment overrides, credentials and CLI
    /// args, collecting every problem before failing.
    pub fn resolve<L>(config_path: &Path, args: &[String], lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut errors = Vec::new();

        let mut config = match Config::load(config_path) {
            Ok(c) => c,
            Err(e) => {
                errors.push(format!("{:#}", e));
                Config::default()
            }
        };
        config.apply_env_overrides(&lookup, &mut errors);
        errors.extend(config.validate());

        let credentials = Credentials::from_lookup(&lookup, &mut errors);

        let raw_fid = fid_from_args(args).or_else(|| {
            lookup(ENV_FID)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        });
        let fid = match raw_fid {
            Some(raw) => match parse_fid(&raw) {
                Ok(fid) => Some(fid),
                Err(msg) => {
                    errors.push(format!("invalid FID {:?} (--fid / {}): {}", raw, ENV_FID, msg));
                    None
                }
            },
            None => None,
        };

        if errors.is_empty() {
            Ok(Self { config, credentials, fid })
        } else {
            Err(ConfigError { errors })
        }
    }
}

impl Config {
    /// Parse the TOML config file. A missing file yields the built-in defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML: {}", path.display()))?;
        Ok(config)
    }

    /// Load .env file into process environment. Real env vars take precedence.
    pub fn load_env_file() {
        let path = Path::new(ENV_FILE);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        // Strip BOM if present (common on Windows-created files)
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        for (key, value) in parse_env_lines(content) {
            if std::env::var(&key).is_err() {
                std::env::set_var(key, value);
            }
        }
    }

    /// Apply `POLL_INTERVAL_SEC`, `LAST_N_CASTS` and `SEEN_FILE` on top of the file values.
    pub fn apply_env_overrides<L>(&mut self, lookup: &L, errors: &mut Vec<String>)
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env_number(lookup, ENV_POLL_INTERVAL, errors) {
            self.watch.poll_interval_s = v;
        }
        if let Some(v) = parse_env_number(lookup, ENV_LAST_N, errors) {
            self.watch.last_n = v;
        }
        if let Some(path) = lookup(ENV_SEEN_FILE) {
            self.watch.seen_file = PathBuf::from(path.trim());
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.watch.poll_interval_s < 1 {
            errors.push(format!(
                "{} must be >= 1, got {}",
                ENV_POLL_INTERVAL, self.watch.poll_interval_s
            ));
        }
        if !(1..=MAX_LAST_N).contains(&self.watch.last_n) {
            errors.push(format!(
                "{} must be between 1 and {}, got {}",
                ENV_LAST_N, MAX_LAST_N, self.watch.last_n
            ));
        }
        if self.watch.seen_file.as_os_str().is_empty() {
            errors.push(format!("{} must not be empty", ENV_SEEN_FILE));
        }
        // Protocol errors are not retried, so this is the only pause between requests
        for (name, ms) in [
            ("watch.transport_backoff_ms", self.watch.transport_backoff_ms),
            ("watch.protocol_backoff_ms", self.watch.protocol_backoff_ms),
        ] {
            if ms == 0 {
                errors.push(format!("{} must be >= 1", name));
            }
        }

        for (name, base) in [
            ("neynar.api_base", &self.neynar.api_base),
            ("telegram.api_base", &self.telegram.api_base),
        ] {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                errors.push(format!("{} must be an http(s) URL, got {:?}", name, base));
            }
        }
        if self.neynar.request_timeout_ms == 0 {
            errors.push("neynar.request_timeout_ms must be >= 1".to_string());
        }
        if self.telegram.request_timeout_ms == 0 {
            errors.push("telegram.request_timeout_ms must be >= 1".to_string());
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be >= 1".to_string());
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            errors.push(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            ));
        }

        errors
    }
}

/// Parse FID text the way the interactive prompt does.
pub fn parse_fid(raw: &str) -> Result<u64, String> {
    match raw.trim().parse::<i64>() {
        Ok(fid) if fid > 0 => Ok(fid as u64),
        Ok(_) => Err("FID must be a positive number.".to_string()),
        Err(_) => Err("Invalid FID, numeric expected.".to_string()),
    }
}

/// Ask for a FID until a valid one is entered.
/// Returns `None` on `q` or end of input.
pub fn prompt_fid<R: BufRead, W: Write>(mut input: R, mut output: W) -> io::Result<Option<u64>> {
    loop {
        write!(output, "Enter FID to watch (or 'q' to quit): ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        match parse_fid(line) {
            Ok(fid) => return Ok(Some(fid)),
            Err(msg) => writeln!(output, "{}", msg)?,
        }
    }
}

/// `--fid 3` or `--fid=3`.
fn fid_from_args(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--fid" {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix("--fid=") {
            return Some(value.to_string());
        }
    }
    None
}

fn parse_env_number<L, T>(lookup: &L, key: &str, errors: &mut Vec<String>) -> Option<T>
where
    L: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(format!("{} must be a non-negative integer, got {:?}", key, raw));
            None
        }
    }
}

fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(|line| line.trim().trim_matches('\r'))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// Strip carriage returns, BOM, and other invisible chars from a key value.
fn sanitize_key(raw: &str) -> String {
    raw.replace(['\r', '\u{feff}', '\u{200b}'], "")
        .trim()
        .to_string()
}
