//! Logging initialization and configuration.
//!
//! Built on `tracing`: an `EnvFilter`, a console fmt layer, an optional
//! non-blocking file layer and a duplicate-suppression layer that keeps a
//! noisy frame loop from flooding the log with identical lines.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level
    pub level: Level,
    /// Enable console output
    pub console_output: bool,
    /// File output path (optional)
    pub file_output: Option<PathBuf>,
    /// Enable colored output
    pub colored_output: bool,
    /// Window within which a repeated message is printed only once.
    /// Zero disables suppression.
    pub message_delay_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            console_output: true,
            file_output: None,
            colored_output: true,
            message_delay_ms: 5000,
        }
    }
}

/// Partial configuration used by the three override sources: the JSON
/// config file, environment variables and explicit host preferences.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingOverrides {
    pub level: Option<String>,
    pub console_output: Option<bool>,
    pub file_output: Option<PathBuf>,
    pub colored_output: Option<bool>,
    pub message_delay_ms: Option<u64>,
}

impl LoggingOverrides {
    fn apply(&self, config: &mut LoggingConfig) {
        if let Some(level) = self.level.as_deref() {
            match level.parse::<Level>() {
                Ok(level) => config.level = level,
                Err(_) => tracing::warn!("ignoring unknown log level override '{level}'"),
            }
        }
        if let Some(console) = self.console_output {
            config.console_output = console;
        }
        if let Some(path) = &self.file_output {
            config.file_output = Some(path.clone());
        }
        if let Some(colored) = self.colored_output {
            config.colored_output = colored;
        }
        if let Some(delay) = self.message_delay_ms {
            config.message_delay_ms = delay;
        }
    }

    fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self {
            level: var("FRAMEGRAFT_LOG_LEVEL"),
            console_output: var("FRAMEGRAFT_LOG_CONSOLE").map(|v| v != "0"),
            file_output: var("FRAMEGRAFT_LOG_FILE").map(PathBuf::from),
            colored_output: var("FRAMEGRAFT_LOG_COLOR").map(|v| v != "0"),
            message_delay_ms: var("FRAMEGRAFT_LOG_DELAY_MS").and_then(|v| v.parse().ok()),
        }
    }
}

impl LoggingConfig {
    /// Resolve the effective configuration. Precedence, lowest to highest:
    /// JSON config file, environment variables, explicit host preferences.
    pub fn resolve(config_file: Option<&Path>, host: &LoggingOverrides) -> Self {
        let mut config = LoggingConfig::default();
        if let Some(path) = config_file {
            match std::fs::read_to_string(path) {
                Ok(text) => match serde_json::from_str::<LoggingOverrides>(&text) {
                    Ok(overrides) => overrides.apply(&mut config),
                    Err(e) => eprintln!("framegraft: bad logging config {}: {e}", path.display()),
                },
                Err(_) => {} // absent file is the common case
            }
        }
        LoggingOverrides::from_env().apply(&mut config);
        host.apply(&mut config);
        if config.level == Level::TRACE {
            // Verbose runs want every repeat.
            config.message_delay_ms = 0;
        }
        config
    }
}

/// Keeps the non-blocking file writer alive; drop to flush and stop it.
pub struct LogGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the tracing logging system.
pub fn init_logging(config: LoggingConfig) -> Result<LogGuard, Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let suppress =
        SuppressRepeats::new(Duration::from_millis(config.message_delay_ms));

    let console_layer = config.console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(config.colored_output)
    });

    let (file_layer, file_guard) = match &config.file_output {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().map(PathBuf::from).unwrap_or_else(|| "framegraft.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(suppress)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("logging initialized at level {}", config.level);
    Ok(LogGuard { _file: file_guard })
}

/// Drops an event whose `(level, target, message)` was already emitted
/// within the configured window. The map is cleared if it ever grows past
/// 10 000 unique messages.
pub struct SuppressRepeats {
    delay: Duration,
    seen: Mutex<HashMap<u64, Instant>>,
}

const MAX_TRACKED_MESSAGES: usize = 10_000;

impl SuppressRepeats {
    pub fn new(delay: Duration) -> Self {
        Self { delay, seen: Mutex::new(HashMap::new()) }
    }

    fn admit(&self, key: u64) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        if seen.len() > MAX_TRACKED_MESSAGES {
            seen.clear();
        }
        match seen.get(&key) {
            Some(last) if now.duration_since(*last) < self.delay => false,
            _ => {
                seen.insert(key, now);
                true
            }
        }
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for SuppressRepeats {
    fn event_enabled(&self, event: &Event<'_>, _ctx: Context<'_, S>) -> bool {
        if self.delay.is_zero() {
            return true;
        }
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);

        let meta = event.metadata();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        meta.level().hash(&mut hasher);
        meta.target().hash(&mut hasher);
        visitor.0.hash(&mut hasher);
        self.admit(hasher.finish())
    }
}
