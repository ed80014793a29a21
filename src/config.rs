use std::env;
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use zeroize::Zeroizing;

use crate::crypto::code::{CodeFormat, DEFAULT_ALPHABET, DEFAULT_CODE_LENGTH};
use crate::limiter::RateLimitConfig;
use crate::storage::{normalize_prefix, signer::Credentials};

/// Which session store to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Where rate-limit counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterBackend {
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown backend {:?}, expected memory or redis", other)),
        }
    }
}

impl FromStr for LimiterBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<StoreBackend>().map(|b| match b {
            StoreBackend::Memory => Self::Memory,
            StoreBackend::Redis => Self::Redis,
        })
    }
}

/// Bucket settings for the image side-channel.
#[derive(Clone, Debug)]
pub struct ObjectStorageConfig {
    pub region: String,
    pub bucket: String,
    /// Always ends in exactly one `/`.
    pub temp_prefix: String,
    /// Custom S3-compatible endpoint; enables path-style addressing.
    pub endpoint: Option<String>,
    pub credentials: Credentials,
}

/// The application's configuration.
///
/// Built once at startup and handed to every component; nothing below
/// `main` reads the environment.
#[derive(Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// The URL of the Redis server.
    pub redis_url: Option<String>,
    pub store_backend: StoreBackend,
    pub limiter_backend: LimiterBackend,
    /// How long a deposited session stays readable.
    pub session_ttl: Duration,
    pub store_sweep_interval: Duration,
    pub code_format: CodeFormat,
    /// Re-roll codes already held by a live session.
    pub unique_codes: bool,
    pub max_content_bytes: usize,
    pub allowed_origins: Vec<String>,
    pub blocked_ips: Vec<IpAddr>,
    /// Take the client IP from `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Number of reverse proxies in front of the server that append to
    /// `X-Forwarded-For`.
    pub proxy_hops: usize,
    pub rate_limits: RateLimitConfig,
    /// Shared secret for protected routes.
    pub access_key: Option<Zeroizing<String>>,
    pub object_storage: Option<ObjectStorageConfig>,
    /// Age after which swept objects are deleted.
    pub image_ttl: Duration,
    pub image_sweep_interval: Duration,
    pub upload_url_ttl: Duration,
    pub download_url_ttl: Duration,
    /// Applied to every outbound HTTP call.
    pub outbound_timeout: Duration,
    pub keepalive_url: Option<String>,
    pub keepalive_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let session_ttl = Duration::from_secs(120);
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            redis_url: None,
            store_backend: StoreBackend::Memory,
            limiter_backend: LimiterBackend::Memory,
            session_ttl,
            store_sweep_interval: Duration::from_secs(60),
            code_format: CodeFormat::default(),
            unique_codes: false,
            max_content_bytes: 1024 * 1024,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            blocked_ips: Vec::new(),
            trust_proxy: false,
            proxy_hops: 1,
            rate_limits: RateLimitConfig::default(),
            access_key: None,
            object_storage: None,
            image_ttl: session_ttl,
            image_sweep_interval: Duration::from_secs(300),
            upload_url_ttl: Duration::from_secs(300),
            download_url_ttl: Duration::from_secs(60),
            outbound_timeout: Duration::from_secs(10),
            keepalive_url: None,
            keepalive_interval: Duration::from_secs(1200),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {}: {}", key, e)),
        None => Ok(default),
    }
}

fn secs_or(key: &str, default: Duration) -> Result<Duration> {
    parse_or(key, default.as_secs()).map(Duration::from_secs)
}

/// Rejects a zero duration for `key`.
pub fn require_positive(key: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        anyhow::bail!("{} must be positive", key);
    }
    Ok(value)
}

fn positive_secs_or(key: &str, default: Duration) -> Result<Duration> {
    require_positive(key, secs_or(key, default)?)
}

/// Rejects a zero request budget for `key`.
pub fn require_budget(key: &str, value: u32) -> Result<u32> {
    if value == 0 {
        anyhow::bail!("{} must be at least 1", key);
    }
    Ok(value)
}

/// Splits a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a comma-separated list of IP addresses.
pub fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>> {
    split_list(raw)
        .iter()
        .map(|s| {
            s.parse::<IpAddr>()
                .map(|ip| ip.to_canonical())
                .with_context(|| format!("Invalid IP address in BLOCKED_IPS: {}", s))
        })
        .collect()
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let code_length = parse_or("CODE_LENGTH", DEFAULT_CODE_LENGTH)?;
        let alphabet = var("CODE_ALPHABET").unwrap_or_else(|| DEFAULT_ALPHABET.to_string());
        let code_format = CodeFormat::new(&alphabet, code_length)
            .context("CODE_ALPHABET / CODE_LENGTH")?;

        let session_ttl = positive_secs_or("SESSION_TTL_SECS", defaults.session_ttl)?;

        let rate_limits = RateLimitConfig {
            window: positive_secs_or("RATE_LIMIT_WINDOW_SECS", defaults.rate_limits.window)?,
            send: require_budget(
                "SEND_RATE_LIMIT",
                parse_or("SEND_RATE_LIMIT", defaults.rate_limits.send)?,
            )?,
            receive: require_budget(
                "RECEIVE_RATE_LIMIT",
                parse_or("RECEIVE_RATE_LIMIT", defaults.rate_limits.receive)?,
            )?,
            general: require_budget(
                "GENERAL_RATE_LIMIT",
                parse_or("GENERAL_RATE_LIMIT", defaults.rate_limits.general)?,
            )?,
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or(defaults.allowed_origins);

        let blocked_ips = match var("BLOCKED_IPS") {
            Some(raw) => parse_ip_list(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            host: parse_or("HOST", defaults.host)?,
            port: parse_or("PORT", defaults.port)?,
            redis_url: var("REDIS_URL"),
            store_backend: parse_or("STORE_BACKEND", StoreBackend::Redis)?,
            limiter_backend: parse_or("RATE_LIMIT_BACKEND", defaults.limiter_backend)?,
            session_ttl,
            store_sweep_interval: positive_secs_or(
                "STORE_SWEEP_INTERVAL_SECS",
                defaults.store_sweep_interval,
            )?,
            code_format,
            unique_codes: parse_or("UNIQUE_CODES", defaults.unique_codes)?,
            max_content_bytes: parse_or("MAX_CONTENT_BYTES", defaults.max_content_bytes)?,
            allowed_origins,
            blocked_ips,
            trust_proxy: parse_or("TRUST_PROXY", defaults.trust_proxy)?,
            proxy_hops: parse_or("TRUSTED_PROXY_HOPS", defaults.proxy_hops)?.max(1),
            rate_limits,
            access_key: var("ACCESS_KEY").map(Zeroizing::new),
            object_storage: Self::object_storage_from_env(),
            image_ttl: positive_secs_or("IMAGE_TTL_SECS", session_ttl)?,
            image_sweep_interval: positive_secs_or(
                "IMAGE_SWEEP_INTERVAL_SECS",
                defaults.image_sweep_interval,
            )?,
            upload_url_ttl: positive_secs_or("UPLOAD_URL_TTL_SECS", defaults.upload_url_ttl)?,
            download_url_ttl: positive_secs_or(
                "DOWNLOAD_URL_TTL_SECS",
                defaults.download_url_ttl,
            )?,
            outbound_timeout: positive_secs_or(
                "OUTBOUND_TIMEOUT_SECS",
                defaults.outbound_timeout,
            )?,
            keepalive_url: var("KEEPALIVE_URL"),
            keepalive_interval: positive_secs_or(
                "KEEPALIVE_INTERVAL_SECS",
                defaults.keepalive_interval,
            )?,
        })
    }

    /// Bucket settings, or `None` when any required piece is missing.
    ///
    /// A partial S3 setup is not fatal: the image routes report it per
    /// request instead.
    fn object_storage_from_env() -> Option<ObjectStorageConfig> {
        let region = var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION"));
        let bucket = var("S3_BUCKET_NAME").or_else(|| var("S3_BUCKET"));

        let (Some(region), Some(bucket)) = (region, bucket) else {
            tracing::warn!("⚠️ S3 region/bucket not set, image routes disabled");
            return None;
        };

        let (Some(access_key_id), Some(secret)) =
            (var("AWS_ACCESS_KEY_ID"), var("AWS_SECRET_ACCESS_KEY"))
        else {
            tracing::warn!("⚠️ AWS credentials not set, image routes disabled");
            return None;
        };

        Some(ObjectStorageConfig {
            region,
            bucket,
            temp_prefix: normalize_prefix(
                &var("S3_TEMP_PREFIX").unwrap_or_else(|| "temp/".to_string()),
            ),
            endpoint: var("S3_ENDPOINT"),
            credentials: Credentials {
                access_key_id,
                secret_access_key: Zeroizing::new(secret),
                session_token: var("AWS_SESSION_TOKEN"),
            },
        })
    }

    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl.as_secs()
    }

    /// How many `X-Forwarded-For` entries, counted from the right, were
    /// written by our own proxies. Zero when proxies are not trusted.
    pub fn forwarded_hops(&self) -> usize {
        if self.trust_proxy { self.proxy_hops } else { 0 }
    }
}
