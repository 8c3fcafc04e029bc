//! Runtime configuration with compiled defaults and environment overrides.

use std::borrow::Cow;
use std::time::Duration;

use crate::transform::identifiers::IdentifierKeys;

pub const BLOOMEO_BASE: &str = "https://api.app.bloomeo-app.com";
pub const BLOOMEO_BASE_ENV: &str = "BLOOMEO_API_BASE";
const TIMEOUT_ENV: &str = "BLOOMEO_TIMEOUT_SECS";
const MAX_RESPONSE_BYTES_ENV: &str = "BLOOMEO_MAX_RESPONSE_BYTES";
const SUBFETCH_CONCURRENCY_ENV: &str = "BLOOMEO_SUBFETCH_CONCURRENCY";
const GENOTYPE_KEYS_ENV: &str = "BLOOMEO_GENOTYPE_ID_KEYS";
const TRIAL_KEYS_ENV: &str = "BLOOMEO_TRIAL_ID_KEYS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 100_000;
const MIN_RESPONSE_BYTES: usize = 4_096;
const DEFAULT_SUBFETCH_CONCURRENCY: usize = 4;
const MAX_SUBFETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct BloomeoConfig {
    pub base_url: Cow<'static, str>,
    pub timeout: Duration,
    /// Hard ceiling on the serialized size of any tool response.
    pub max_response_bytes: usize,
    pub subfetch_concurrency: usize,
    pub identifier_keys: IdentifierKeys,
}

impl Default for BloomeoConfig {
    fn default() -> Self {
        Self {
            base_url: Cow::Borrowed(BLOOMEO_BASE),
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            subfetch_concurrency: DEFAULT_SUBFETCH_CONCURRENCY,
            identifier_keys: IdentifierKeys::default(),
        }
    }
}

impl BloomeoConfig {
    pub fn from_env() -> Self {
        let mut config = Self {
            base_url: crate::sources::env_base(BLOOMEO_BASE, BLOOMEO_BASE_ENV),
            ..Self::default()
        };
        if let Some(secs) = env_parse::<u64>(TIMEOUT_ENV).filter(|secs| *secs > 0) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_parse::<usize>(MAX_RESPONSE_BYTES_ENV) {
            config = config.with_max_response_bytes(bytes);
        }
        if let Some(limit) = env_parse::<usize>(SUBFETCH_CONCURRENCY_ENV) {
            config.subfetch_concurrency = limit.clamp(1, MAX_SUBFETCH_CONCURRENCY);
        }
        if let Some(keys) = env_list(GENOTYPE_KEYS_ENV) {
            config.identifier_keys.genotype = keys;
        }
        if let Some(keys) = env_list(TRIAL_KEYS_ENV) {
            config.identifier_keys.trial = keys;
        }
        config
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = Cow::Owned(base.into());
        self
    }

    pub fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes.max(MIN_RESPONSE_BYTES);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let values = split_key_list(&raw);
    (!values.is_empty()).then_some(values)
}

pub(crate) fn split_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_response_bytes_has_a_floor() {
        let config = BloomeoConfig::default().with_max_response_bytes(10);
        assert_eq!(config.max_response_bytes, MIN_RESPONSE_BYTES);
    }

    #[test]
    fn split_key_list_drops_blanks() {
        assert_eq!(
            split_key_list(" genotypeId, ,germplasmId ,"),
            vec!["genotypeId".to_string(), "germplasmId".to_string()]
        );
    }
}
