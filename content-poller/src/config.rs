use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Optional only so `--dry-run` can start without a database.
    pub database_url: Option<String>,
    pub poll_interval_seconds: u64,
    pub http_timeout_seconds: u64,
    pub source: SourceConfig,
}

#[derive(Debug, Clone)]
pub enum SourceConfig {
    Api(ApiSourceConfig),
    Scrape(ScrapeSourceConfig),
}

#[derive(Debug, Clone)]
pub struct ApiSourceConfig {
    /// REST root, e.g. `https://lms.example.edu/learn/api/public/v1`
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub course_id: String,
}

#[derive(Debug, Clone)]
pub struct ScrapeSourceConfig {
    pub login_url: String,
    pub content_url: String,
    pub username: String,
    pub password: String,
    /// Text expected in the login response body when the login worked.
    pub success_marker: String,
    pub selectors: ScrapeSelectors,
}

/// CSS selectors describing how content blocks are laid out on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeSelectors {
    pub block: String,
    pub title: String,
    pub description: String,
    /// Element carrying the modification time in its `datetime` attribute.
    pub modified: String,
}

impl Default for ScrapeSelectors {
    fn default() -> Self {
        Self {
            block: "div.content-block".to_string(),
            title: "h3".to_string(),
            description: "p".to_string(),
            modified: "time".to_string(),
        }
    }
}

impl PollingConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };
        let or_default = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let source = match or_default("CONTENT_SOURCE", "api").to_ascii_lowercase().as_str() {
            "api" => SourceConfig::Api(ApiSourceConfig {
                base_url: required("API_BASE_URL")?.trim_end_matches('/').to_string(),
                client_id: required("API_CLIENT_ID")?,
                client_secret: required("API_CLIENT_SECRET")?,
                course_id: required("COURSE_ID")?,
            }),
            "scrape" => {
                let defaults = ScrapeSelectors::default();
                SourceConfig::Scrape(ScrapeSourceConfig {
                    login_url: required("SCRAPE_LOGIN_URL")?,
                    content_url: required("SCRAPE_CONTENT_URL")?,
                    username: required("SCRAPE_USERNAME")?,
                    password: required("SCRAPE_PASSWORD")?,
                    success_marker: or_default("LOGIN_SUCCESS_MARKER", "Welcome"),
                    selectors: ScrapeSelectors {
                        block: or_default("SCRAPE_BLOCK_SELECTOR", &defaults.block),
                        title: or_default("SCRAPE_TITLE_SELECTOR", &defaults.title),
                        description: or_default(
                            "SCRAPE_DESCRIPTION_SELECTOR",
                            &defaults.description,
                        ),
                        modified: or_default("SCRAPE_MODIFIED_SELECTOR", &defaults.modified),
                    },
                })
            }
            other => bail!("CONTENT_SOURCE must be 'api' or 'scrape', got '{}'", other),
        };

        let poll_interval_seconds: u64 = or_default("POLL_INTERVAL_SECONDS", "3600")
            .parse()
            .context("POLL_INTERVAL_SECONDS must be a valid number")?;
        if poll_interval_seconds == 0 {
            bail!("POLL_INTERVAL_SECONDS must be greater than zero");
        }

        let http_timeout_seconds: u64 = or_default("HTTP_TIMEOUT_SECONDS", "30")
            .parse()
            .context("HTTP_TIMEOUT_SECONDS must be a valid number")?;
        if http_timeout_seconds == 0 {
            bail!("HTTP_TIMEOUT_SECONDS must be greater than zero");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            poll_interval_seconds,
            http_timeout_seconds,
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set")
    }
}
