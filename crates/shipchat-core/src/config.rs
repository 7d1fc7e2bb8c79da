use std::time::Duration;

use crate::error::ChatError;

/// Tunables for paging, presence, retention and moderation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Newest messages kept live per watched channel
    pub initial_page: u32,
    /// Older messages fetched per `load_more`
    pub load_more_page: u32,
    /// Channels visited per retention cycle
    pub cleanup_channels: u32,
    /// Stale messages deleted per channel per cycle
    pub cleanup_messages: u32,
    pub retention_age: Duration,
    pub cleanup_interval: Duration,
    pub heartbeat_interval: Duration,
    pub online_timeout: Duration,
    pub presence_tick: Duration,
    /// How long a cleanup notice stays visible
    pub notice_ttl: Duration,
    /// Distinct reporters needed to remove a profile
    pub report_threshold: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            initial_page: 50,
            load_more_page: 20,
            cleanup_channels: 10,
            cleanup_messages: 100,
            retention_age: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(60),
            online_timeout: Duration::from_secs(2 * 60),
            presence_tick: Duration::from_secs(30),
            notice_ttl: Duration::from_secs(5),
            report_threshold: 5,
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by `SHIPCHAT_*` environment variables.
    /// Durations are given in whole seconds.
    pub fn from_env() -> Result<Self, ChatError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("SHIPCHAT_PAGE_SIZE")? {
            config.initial_page = v;
        }
        if let Some(v) = env_parse::<u32>("SHIPCHAT_LOAD_MORE_SIZE")? {
            config.load_more_page = v;
        }
        if let Some(v) = env_parse::<u32>("SHIPCHAT_CLEANUP_CHANNELS")? {
            config.cleanup_channels = v;
        }
        if let Some(v) = env_parse::<u32>("SHIPCHAT_CLEANUP_MESSAGES")? {
            config.cleanup_messages = v;
        }
        if let Some(v) = env_parse::<u64>("SHIPCHAT_RETENTION_SECS")? {
            config.retention_age = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("SHIPCHAT_CLEANUP_INTERVAL_SECS")? {
            config.cleanup_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("SHIPCHAT_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("SHIPCHAT_ONLINE_TIMEOUT_SECS")? {
            config.online_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("SHIPCHAT_REPORT_THRESHOLD")? {
            config.report_threshold = v;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ChatError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ChatError::Config { key: key.to_string(), value }),
        Err(_) => Ok(None),
    }
}

/// Convert a std duration for timestamp arithmetic, saturating on overflow.
pub(crate) fn time_delta(d: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let c = ChatConfig::default();
        assert_eq!(c.initial_page, 50);
        assert_eq!(c.load_more_page, 20);
        assert_eq!(c.cleanup_channels, 10);
        assert_eq!(c.cleanup_messages, 100);
        assert_eq!(c.retention_age, Duration::from_secs(3600));
        assert_eq!(c.online_timeout, Duration::from_secs(120));
        assert_eq!(c.report_threshold, 5);
    }

    #[test]
    fn test_bad_env_value() {
        // Unique key so parallel tests don't interfere.
        let key = "SHIPCHAT_TEST_BAD_VALUE";
        unsafe { std::env::set_var(key, "soon") };
        let err = env_parse::<u64>(key).unwrap_err();
        assert!(matches!(err, ChatError::Config { .. }));
        unsafe { std::env::remove_var(key) };
    }
}
