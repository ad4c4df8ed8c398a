use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub whole_day_cascade_policy: String,
    pub shift_cascade_policy: String,
    pub token_sequence_width: usize,
    pub max_conflict_retries: u32,
    pub cascade_poll_interval_seconds: u64,
    pub cascade_job_timeout_seconds: u64,
    /// Swept in addition to every institution the tenant registry knows.
    pub cascade_institutions: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            redis_url: None,
            redis_key_prefix: "clinic".to_string(),
            whole_day_cascade_policy: "MANUAL_ALLOCATION".to_string(),
            shift_cascade_policy: "MANUAL_ALLOCATION".to_string(),
            token_sequence_width: 3,
            max_conflict_retries: 3,
            cascade_poll_interval_seconds: 30,
            cascade_job_timeout_seconds: 60,
            cascade_institutions: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| {
                    warn!("BIND_ADDRESS not set, using default");
                    defaults.bind_address.clone()
                }),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            redis_key_prefix: env::var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|_| defaults.redis_key_prefix.clone()),
            whole_day_cascade_policy: env::var("WHOLE_DAY_CASCADE_POLICY")
                .unwrap_or_else(|_| {
                    warn!("WHOLE_DAY_CASCADE_POLICY not set, using default");
                    defaults.whole_day_cascade_policy.clone()
                }),
            shift_cascade_policy: env::var("SHIFT_CASCADE_POLICY")
                .unwrap_or_else(|_| {
                    warn!("SHIFT_CASCADE_POLICY not set, using default");
                    defaults.shift_cascade_policy.clone()
                }),
            token_sequence_width: parse_or("TOKEN_SEQUENCE_WIDTH", defaults.token_sequence_width),
            max_conflict_retries: parse_or("MAX_CONFLICT_RETRIES", defaults.max_conflict_retries),
            cascade_poll_interval_seconds: parse_or(
                "CASCADE_POLL_INTERVAL_SECONDS",
                defaults.cascade_poll_interval_seconds,
            ),
            cascade_job_timeout_seconds: parse_or(
                "CASCADE_JOB_TIMEOUT_SECONDS",
                defaults.cascade_job_timeout_seconds,
            ),
            cascade_institutions: env::var("CASCADE_INSTITUTIONS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        if !config.is_redis_configured() {
            warn!("REDIS_URL not set - falling back to the in-memory store, data will not survive restarts");
        }

        config
    }

    pub fn is_redis_configured(&self) -> bool {
        self.redis_url.is_some()
    }
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
