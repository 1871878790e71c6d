use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use config::{Config, File};
use serde::Deserialize;
use url::Url;

use crate::probe::ContentRules;

const DEFAULT_CONFIG_PATH: &str = "settings.yml";
const SETTINGS_PATH_ENV: &str = "SETTINGS_PATH";
const APP_PORT_ENV: &str = "APP_PORT";
const DATABASE_URL_ENV: &str = "DATABASE_URL";

pub struct Settings {
    pub port: u16,
    pub database_url: Url,
    pub checker: CheckerSettings,
}

/// Tuning of the check scheduler, prober and classifier
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckerSettings {
    /// Maximum number of checks queued by one scheduling pass
    pub batch_size: usize,
    /// Maximum number of checks against one registered domain per pass
    pub per_domain_cap: usize,
    /// Consecutive failures after which a URL is reported as invalid
    pub invalidation_threshold: i32,
    pub resource_recheck_interval_s: u64,
    /// Recheck interval for failing URLs below the invalidation threshold
    pub valid_recheck_interval_s: u64,
    /// Recheck interval for failing URLs at or above the invalidation threshold
    pub invalid_recheck_interval_s: u64,
    pub connect_timeout_s: u64,
    pub max_redirects: usize,
    pub content_limit_bytes: usize,
    pub verify_ssl: bool,
    pub user_agent: String,
    /// Wall-clock budget of a single record check before it yields
    pub task_time_budget_s: u64,
    /// A record check yields when less than this is left of its budget
    pub min_time_per_field_s: u64,
    pub retry_delay_s: u64,
    pub queued_delay_s: u64,
    pub idle_delay_s: u64,
    pub prune_interval_s: u64,
    pub content_rules: ContentRuleSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentRuleSettings {
    pub title_patterns: Vec<String>,
    pub body_patterns: Vec<String>,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            per_domain_cap: 3,
            invalidation_threshold: 4,
            resource_recheck_interval_s: SECONDS_IN_DAY,
            valid_recheck_interval_s: SECONDS_IN_DAY,
            invalid_recheck_interval_s: 7 * SECONDS_IN_DAY,
            connect_timeout_s: 5,
            max_redirects: 5,
            content_limit_bytes: 500 * 1024,
            verify_ssl: true,
            user_agent: format!("url-checker/{}", env!("CARGO_PKG_VERSION")),
            task_time_budget_s: 60,
            min_time_per_field_s: 10,
            retry_delay_s: 60,
            queued_delay_s: 5 * 60,
            idle_delay_s: 60 * 60,
            prune_interval_s: 60 * 60,
            content_rules: ContentRuleSettings::default(),
        }
    }
}

impl Default for ContentRuleSettings {
    fn default() -> Self {
        Self {
            title_patterns: ContentRules::DEFAULT_TITLE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            body_patterns: ContentRules::DEFAULT_BODY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

const SECONDS_IN_DAY: u64 = 24 * 60 * 60;

impl CheckerSettings {
    pub fn resource_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.resource_recheck_interval_s)
    }

    pub fn valid_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.valid_recheck_interval_s)
    }

    pub fn invalid_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.invalid_recheck_interval_s)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_s)
    }

    pub fn task_time_budget(&self) -> Duration {
        Duration::from_secs(self.task_time_budget_s)
    }

    pub fn min_time_per_field(&self) -> Duration {
        Duration::from_secs(self.min_time_per_field_s)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_s)
    }

    pub fn queued_delay(&self) -> Duration {
        Duration::from_secs(self.queued_delay_s)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_secs(self.idle_delay_s)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("checker.batch_size must be at least 1");
        }
        if self.per_domain_cap == 0 {
            bail!("checker.per_domain_cap must be at least 1");
        }
        if self.invalidation_threshold < 1 {
            bail!("checker.invalidation_threshold must be at least 1");
        }
        if self.min_time_per_field_s >= self.task_time_budget_s {
            bail!("checker.min_time_per_field_s must be below checker.task_time_budget_s");
        }
        ContentRules::new(
            &self.content_rules.title_patterns,
            &self.content_rules.body_patterns,
        )
        .context("Invalid checker.content_rules pattern")?;

        Ok(())
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    app_port: Option<u16>,
    db_name: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_user: Option<String>,
    db_pass: Option<String>,
    checker: CheckerSettings,
}

impl FileConfig {
    fn database_url(&self) -> Result<Url> {
        let (Some(name), Some(host), Some(user), Some(pass)) = (
            self.db_name.as_deref(),
            self.db_host.as_deref(),
            self.db_user.as_deref(),
            self.db_pass.as_deref(),
        ) else {
            bail!("{DATABASE_URL_ENV} is not set and the config file has no database section");
        };

        let url_str = format!(
            "postgres://{}:{}@{}:{}/{}",
            user,
            pass,
            host,
            self.db_port.unwrap_or(5432),
            name
        );
        Url::parse(&url_str).context("Failed to build database URL from config file")
    }
}

fn load_file_config(path: &str) -> Result<FileConfig> {
    let settings = Config::builder()
        .add_source(File::with_name(path).required(false))
        .build()
        .map_err(|e| anyhow!("Failed to read config file {path}: {e}"))?;

    settings
        .try_deserialize::<FileConfig>()
        .map_err(|e| anyhow!("Failed to deserialize config file {path}: {e}"))
}

#[cfg(test)]
fn parse_file_config(yaml: &str) -> Result<FileConfig> {
    use config::FileFormat;

    Config::builder()
        .add_source(File::from_str(yaml, FileFormat::Yaml))
        .build()?
        .try_deserialize::<FileConfig>()
        .map_err(|e| anyhow!("Failed to deserialize config: {e}"))
}

/// Try to parse env variable. If it's not set, return None. If it's invalid, treat it as an error.
fn try_from_env<T, F>(env_var: &str, f: F) -> Result<Option<T>>
where
    F: FnOnce(String) -> Result<T>,
{
    match std::env::var(env_var) {
        Ok(raw) => {
            let val = f(raw).map_err(|_| anyhow!("Failed to parse {}", env_var))?;
            Ok(Some(val))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(_) => bail!("Could not read {env_var} from env"),
    }
}

/// Load configuration from env with fallback to the config file
pub fn load() -> Result<Settings> {
    let path = std::env::var(SETTINGS_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let port_opt: Option<u16> = try_from_env(APP_PORT_ENV, |env_str| {
        env_str.parse::<u16>().map_err(|e| e.into())
    })?;

    let database_url_opt: Option<Url> = try_from_env(DATABASE_URL_ENV, |env_str| {
        Url::parse(&env_str).map_err(|e| e.into())
    })?;

    let file = load_file_config(&path)?;
    resolve(file, port_opt, database_url_opt, &path)
}

fn resolve(
    file: FileConfig,
    port_opt: Option<u16>,
    database_url_opt: Option<Url>,
    path: &str,
) -> Result<Settings> {
    let port = match port_opt {
        Some(val) => val,
        None => {
            tracing::warn!("{APP_PORT_ENV} is not set, using value from {path}");
            file.app_port.unwrap_or(3000)
        }
    };

    let database_url = match database_url_opt {
        Some(url) => url,
        None => {
            tracing::warn!("{DATABASE_URL_ENV} is not set, using value from {path}");
            file.database_url()?
        }
    };

    file.checker.validate()?;

    Ok(Settings {
        port,
        database_url,
        checker: file.checker,
    })
}
