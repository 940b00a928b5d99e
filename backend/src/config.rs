use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use game_core::{Rules, Timings, DEFAULT_MAX_MISTAKES};
use tracing::warn;

use crate::telemetry::LogFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    pub persist_path: Option<PathBuf>,
    pub puzzles_path: Option<PathBuf>,
    pub max_mistakes: usize,
    pub timings: Timings,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            persist_path: None,
            puzzles_path: None,
            max_mistakes: DEFAULT_MAX_MISTAKES,
            timings: Timings::default(),
            log_format: LogFormat::Compact,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `lookup`, keeping the default for any variable
    /// that is unset or does not parse.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            parsed::<u64>(&lookup, key)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            persist_path: lookup("PERSIST_PATH").map(PathBuf::from),
            puzzles_path: lookup("PUZZLES_PATH").map(PathBuf::from),
            max_mistakes: parsed(&lookup, "MAX_MISTAKES").unwrap_or(defaults.max_mistakes),
            timings: Timings {
                feedback: millis("FEEDBACK_MS", defaults.timings.feedback),
                shake: millis("SHAKE_MS", defaults.timings.shake),
                reveal_surface: millis("REVEAL_SURFACE_MS", defaults.timings.reveal_surface),
                reveal_pause: millis("REVEAL_PAUSE_MS", defaults.timings.reveal_pause),
            },
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Compact,
            },
        }
    }

    pub fn rules(&self) -> Rules {
        Rules {
            max_mistakes: self.max_mistakes,
            timings: self.timings,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
