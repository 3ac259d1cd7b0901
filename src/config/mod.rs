/// Application configuration module
use chrono::{FixedOffset, Local, Offset};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_FLIGHTS_ENDPOINT: &str = "https://api.auterion.com/flights";
pub const DEFAULT_VEHICLES_ENDPOINT: &str = "https://api.auterion.com/vehicles";
pub const DEFAULT_GEOCODING_ENDPOINT: &str = "https://api.api-ninjas.com/v1/geocoding";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_token: Option<String>,
    pub flights_endpoint: String,
    pub vehicles_endpoint: String,
    pub geocoding_endpoint: String,
    pub geocoding_api_key: Option<String>,
    pub port: u16,
    pub fetch_all_page_size: u32,
    /// Total per-request timeout for outbound calls, none by default
    pub request_timeout: Option<Duration>,
    pub cache: CacheSettings,
    pub geocoding: GeocodingSettings,
    pub stats_offset: FixedOffset,
}

#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeocodingSettings {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub max_retries: u32,
}

impl Default for GeocodingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            chunk_delay: Duration::from_millis(1000),
            max_retries: 3,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_token = env_secret("AUTERION_API_TOKEN");

        let flights_endpoint =
            env::var("FLIGHTS_ENDPOINT").unwrap_or_else(|_| DEFAULT_FLIGHTS_ENDPOINT.to_string());
        let vehicles_endpoint =
            env::var("VEHICLES_ENDPOINT").unwrap_or_else(|_| DEFAULT_VEHICLES_ENDPOINT.to_string());
        let geocoding_endpoint = env::var("GEOCODING_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_GEOCODING_ENDPOINT.to_string());
        let geocoding_api_key = env_secret("GEOCODING_API_KEY");

        let cache = CacheSettings {
            ttl: Duration::from_secs(env_parse("CACHE_TTL_SECONDS", 300)),
            sweep_interval: Duration::from_secs(env_parse("CACHE_SWEEP_SECONDS", 60)),
        };

        let geocoding = GeocodingSettings {
            chunk_size: env_parse::<usize>("GEOCODE_CHUNK_SIZE", 10).max(1),
            chunk_delay: Duration::from_millis(env_parse("GEOCODE_CHUNK_DELAY_MS", 1000)),
            max_retries: env_parse("GEOCODE_MAX_RETRIES", 3),
        };

        let stats_offset = env::var("STATS_UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
            .unwrap_or_else(|| Local::now().offset().fix());

        Ok(Self {
            api_token,
            flights_endpoint,
            vehicles_endpoint,
            geocoding_endpoint,
            geocoding_api_key,
            port: env_parse("PORT", 5000),
            fetch_all_page_size: env_parse("FETCH_ALL_PAGE_SIZE", 100_000),
            request_timeout: request_timeout(env::var("UPSTREAM_TIMEOUT_SECONDS").ok().as_deref()),
            cache,
            geocoding,
            stats_offset,
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    parse_or(key, env::var(key).ok().as_deref(), default)
}

/// Parse into the target type, falling back when the value is out of range
fn parse_or<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> T {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = raw, "ignoring invalid setting, using default");
            default
        }
    }
}

/// Unset or zero means no timeout; the connect timeout still applies
fn request_timeout(raw: Option<&str>) -> Option<Duration> {
    match parse_or("UPSTREAM_TIMEOUT_SECONDS", raw, 0u64) {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

/// Read a credential, treating blank values as unset
fn env_secret(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_blank_trims_token() {
        assert_eq!(non_blank(Some("  abc \n".to_string())), Some("abc".to_string()));
    }

    #[test]
    fn test_non_blank_rejects_whitespace() {
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        assert_eq!(parse_or::<u16>("PORT", Some("70000"), 5000), 5000);
        assert_eq!(parse_or::<u16>("PORT", Some(" 8080 "), 5000), 8080);
        assert_eq!(parse_or::<u32>("GEOCODE_MAX_RETRIES", Some("-1"), 3), 3);
        assert_eq!(parse_or::<u32>("FETCH_ALL_PAGE_SIZE", None, 100_000), 100_000);
    }

    #[test]
    fn test_no_request_timeout_by_default() {
        assert_eq!(request_timeout(None), None);
        assert_eq!(request_timeout(Some("0")), None);
        assert_eq!(request_timeout(Some("soon")), None);
        assert_eq!(request_timeout(Some("120")), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_cache_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.ttl, Duration::from_secs(300));
        assert_eq!(settings.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_geocoding_defaults() {
        let settings = GeocodingSettings::default();
        assert_eq!(settings.chunk_size, 10);
        assert_eq!(settings.max_retries, 3);
    }
}
