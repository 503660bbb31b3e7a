use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// Application-level constants
pub const APP_NAME: &str = "Careline";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "CARELINE_";

/// Get the application data directory
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("careline")
}

/// Default on-disk database location.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("careline.db")
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "careline_lib=info,warn"
}

/// Runtime configuration for the workflow core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Capacity of the in-process event notification channel.
    pub event_buffer: usize,
    /// Attempts per (event, subscriber) before the delivery is abandoned.
    pub max_delivery_attempts: u32,
    /// How often the dispatcher sweeps the outbox without a notification.
    pub dispatch_sweep_interval: Duration,
    pub insurance_message_delay: chrono::Duration,
    pub treatment_plan_message_delay: chrono::Duration,
    /// Sections a draft must fill before submission.
    pub required_plan_sections: Vec<String>,
    /// Sections compared against the favorite template for deviation.
    pub tracked_plan_sections: Vec<String>,
    /// SKUs that skip the charge step.
    pub zero_cost_skus: Vec<String>,
    /// Patients younger than this raise an alert on submission.
    pub minor_age: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            event_buffer: 256,
            max_delivery_attempts: 5,
            dispatch_sweep_interval: Duration::from_secs(30),
            insurance_message_delay: chrono::Duration::hours(1),
            treatment_plan_message_delay: chrono::Duration::zero(),
            required_plan_sections: vec!["treatments".into()],
            tracked_plan_sections: vec![
                "treatments".into(),
                "regimen".into(),
                "resource_guides".into(),
                "note".into(),
            ],
            zero_cost_skus: Vec::new(),
            minor_age: 18,
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by `CARELINE_*` environment variables.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(path) = get("DB_PATH") {
            config.database_path = match path.as_str() {
                ":memory:" => None,
                "" => Some(default_database_path()),
                other => Some(PathBuf::from(other)),
            };
        }
        if let Some(raw) = get("EVENT_BUFFER") {
            config.event_buffer = parse_number("EVENT_BUFFER", &raw)?;
            if config.event_buffer == 0 {
                return Err(CoreError::out_of_range("EVENT_BUFFER must be positive"));
            }
        }
        if let Some(raw) = get("MAX_DELIVERY_ATTEMPTS") {
            config.max_delivery_attempts = parse_number("MAX_DELIVERY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("DISPATCH_SWEEP_SECS") {
            config.dispatch_sweep_interval =
                Duration::from_secs(parse_number("DISPATCH_SWEEP_SECS", &raw)?);
        }
        if let Some(raw) = get("INSURANCE_MESSAGE_DELAY_MINS") {
            config.insurance_message_delay =
                chrono::Duration::minutes(parse_number("INSURANCE_MESSAGE_DELAY_MINS", &raw)?);
        }
        if let Some(raw) = get("ZERO_COST_SKUS") {
            config.zero_cost_skus = split_list(&raw);
        }
        if let Some(raw) = get("REQUIRED_PLAN_SECTIONS") {
            config.required_plan_sections = split_list(&raw);
        }
        if let Some(raw) = get("MINOR_AGE") {
            config.minor_age = parse_number("MINOR_AGE", &raw)?;
        }
        Ok(config)
    }

    pub fn is_zero_cost(&self, sku_type: &str) -> bool {
        self.zero_cost_skus.iter().any(|s| s == sku_type)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, CoreError> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::invalid(format!("{ENV_PREFIX}{name} is not a number: '{raw}'")))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
