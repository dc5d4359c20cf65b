use config::ConfigError;
use serde::Serialize;
use std::time::Duration;

/// Values accepted as boolean true
const TRUE: [&str; 4] = ["1", "on", "yes", "true"];

/// 2023-01-01T00:00:00Z
const DEFAULT_START_TIME: i64 = 1_672_531_200_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_address: String,
    pub log_level: String,
    pub network: String,
    pub blockchain: BlockchainConfig,
    pub earnings: EarningsConfig,
    pub funds: FundsConfig,
    pub payout: PayoutConfig,
    pub request: RequestConfig,
    pub start_time: i64,
    pub static_path: String,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct BlockchainConfig {
    pub hosts: Vec<String>,
    pub sync: JobConfig,
    pub batch_size: u64,
    pub page_size: u64,
}

#[derive(Debug, Clone)]
pub struct EarningsConfig {
    pub host: String,
    pub sync: JobConfig,
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundsConfig {
    pub distribution: Vec<u64>,
    #[serde(skip)]
    pub payer_address: String,
    #[serde(skip)]
    pub payer_private_key: String,
}

#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub confirm: JobConfig,
    pub grace_period: Duration,
    pub threshold: u64,
    pub submit: JobConfig,
    pub batch_size: u64,
    pub dry_run: bool,
    pub reconcile: JobConfig,
    pub reconcile_depth: u64,
}

#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout: Duration,
    pub retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let bind_address = match env.string("BIND_ADDRESS") {
            Some(addr) => addr,
            None => format!("0.0.0.0:{}", env.number("HTTP_PORT", 8777u16)?),
        };

        let hosts: Vec<String> = list(&env.string_or("BLOCKCHAIN_HOST", "https://xe1.test.network"))
            .map(str::to_string)
            .collect();

        let distribution = match env.string("FUNDS_DISTRIBUTION") {
            Some(raw) => parse_distribution(&raw)?,
            None => default_distribution(),
        };

        Ok(Self {
            database_url: env.string("DATABASE_URL"),
            bind_address,
            log_level: env.string_or("LOG_LEVEL", "warn"),
            network: env.string_or("NETWORK", "testnet"),
            blockchain: BlockchainConfig {
                hosts,
                sync: env.job("BLOCKCHAIN_SYNC", 60_000)?,
                batch_size: env.number("BLOCKCHAIN_SYNC_BATCH_SIZE", 10)?,
                page_size: env.number("BLOCKCHAIN_SYNC_PAGE_SIZE", 10)?,
            },
            earnings: EarningsConfig {
                host: env.string_or("EARNINGS_HOST", "https://earnings.test.network"),
                sync: env.job("EARNINGS_SYNC", 60_000)?,
                page_size: env.number("EARNINGS_SYNC_PAGE_SIZE", 100)?,
            },
            funds: FundsConfig {
                distribution,
                payer_address: env.string_or("FUNDS_PAYER_ADDRESS", ""),
                payer_private_key: env.string_or("FUNDS_PAYER_PRIVATE_KEY", ""),
            },
            payout: PayoutConfig {
                confirm: env.job("PAYOUT_CONFIRM", 60_000)?,
                grace_period: Duration::from_millis(env.number("PAYOUT_CONFIRM_GRACE_PERIOD", 900_000)?),
                threshold: env.number("PAYOUT_CONFIRM_THRESHOLD", 10)?,
                submit: env.job("PAYOUT_SUBMIT", 60_000)?,
                batch_size: env.number("PAYOUT_SUBMIT_BATCH_SIZE", 50)?,
                dry_run: env.flag("PAYOUT_SUBMIT_DRY_RUN", true),
                reconcile: env.job("PAYOUT_RECONCILE", 300_000)?,
                reconcile_depth: env.number("PAYOUT_RECONCILE_DEPTH", 10)?,
            },
            request: RequestConfig {
                timeout: Duration::from_millis(env.number("REQUEST_TIMEOUT", 10_000)?),
                retries: env.number("REQUEST_RETRIES", 2)?,
            },
            start_time: env.number("START_TIME", DEFAULT_START_TIME)?,
            static_path: env.string_or("STATIC_PATH", "web/dist"),
            cors_origins: list(&env.string_or("CORS_ORIGINS", "")).map(str::to_string).collect(),
        })
    }
}

/// 10,000 XE for first place and 1,000 XE for the next ten, in µXE
pub fn default_distribution() -> Vec<u64> {
    let mut distribution = vec![10_000_000_000];
    distribution.extend(std::iter::repeat(1_000_000_000).take(10));
    distribution
}

/// Parse a comma separated list of amounts, allowing exponent notation
pub fn parse_distribution(raw: &str) -> Result<Vec<u64>, ConfigError> {
    let amounts = list(raw)
        .map(|v| parse_amount(v).ok_or_else(|| invalid("FUNDS_DISTRIBUTION", v)))
        .collect::<Result<Vec<_>, _>>()?;
    if amounts.is_empty() {
        return Err(invalid("FUNDS_DISTRIBUTION", raw));
    }
    Ok(amounts)
}

fn parse_amount(value: &str) -> Option<u64> {
    if let Ok(n) = value.parse::<u64>() {
        return Some(n);
    }
    let f = value.parse::<f64>().ok()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

fn list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Message(format!("invalid value for {}: {:?}", key, value))
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn number<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            Some(v) => v.parse().map_err(|_| invalid(key, &v)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.string(key) {
            Some(v) => TRUE.contains(&v.to_lowercase().as_str()),
            None => default,
        }
    }

    fn job(&self, prefix: &str, interval_ms: u64) -> Result<JobConfig, ConfigError> {
        Ok(JobConfig {
            enabled: self.flag(&format!("{}_ENABLED", prefix), true),
            interval: Duration::from_millis(self.number(&format!("{}_INTERVAL", prefix), interval_ms)?),
        })
    }
}
