use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::api::{ApiClient, DashboardSource, HttpTokenRefresher};
use crate::error::ApiError;
use crate::mock::MockDashboardSource;
use crate::poller::{PollOptions, PollingCache};
use crate::session::token_store::session_path;
use crate::session::{FileTokenStore, SessionManager};
use crate::types::ClientConfig;

/// Overrides `apiBaseUrl` from the config file.
pub const API_URL_ENV: &str = "MANOBAL_API_URL";

/// Client state shared by every view: config, session and data source.
pub struct ClientState {
    pub config: RwLock<ClientConfig>,
    config_path: PathBuf,
    pub session: Arc<SessionManager>,
    pub api: Arc<ApiClient>,
    pub source: Arc<dyn DashboardSource>,
}

impl ClientState {
    /// Build from `~/.manobal/config.json`, falling back to defaults.
    pub fn new() -> Result<Self, ApiError> {
        let path = config_path()?;
        let config = load_config_from(&path)?;
        Self::from_config(config, path)
    }

    pub fn from_config(config: ClientConfig, config_path: PathBuf) -> Result<Self, ApiError> {
        let token_path = match &config.token_path {
            Some(path) => PathBuf::from(path),
            None => session_path()?,
        };
        let store = Arc::new(FileTokenStore::new(token_path));

        let refresh_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.refresh_timeout_secs))
            .build()?;
        let base_url = url::Url::parse(&config.api_base_url)
            .map_err(|e| ApiError::Config(format!("apiBaseUrl '{}': {}", config.api_base_url, e)))?;
        let refresher = Arc::new(HttpTokenRefresher::with_client(refresh_http, &base_url)?);

        let session = Arc::new(
            SessionManager::new(store, refresher)
                .with_refresh_timeout(Duration::from_secs(config.refresh_timeout_secs))
                .with_refresh_leeway(Duration::from_secs(config.refresh_leeway_secs)),
        );
        let api = Arc::new(ApiClient::from_config(&config, session.clone())?);

        let source: Arc<dyn DashboardSource> = if config.use_mock_data {
            log::info!("ClientState: serving mock dashboard data");
            Arc::new(MockDashboardSource::new())
        } else {
            api.clone()
        };

        log::info!(
            "ClientState: api {} (signed in: {})",
            config.api_base_url,
            session.is_authenticated()
        );

        Ok(Self {
            config: RwLock::new(config),
            config_path,
            session,
            api,
            source,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Start a polling cache with the configured interval and fetch timeout.
    pub fn poll<T, F, Fut>(&self, producer: F) -> PollingCache<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let options = PollOptions::from_config(&self.config.read());
        PollingCache::start_with(producer, options)
    }

    /// Apply `mutator` to the config and persist it atomically.
    ///
    /// Connection settings (base URL, timeouts, mock mode) apply to the next
    /// `ClientState` built from the file.
    pub fn create_or_update_config(
        &self,
        mutator: impl FnOnce(&mut ClientConfig),
    ) -> Result<ClientConfig, ApiError> {
        let mut guard = self.config.write();
        let mut config = guard.clone();
        mutator(&mut config);

        save_config_to(&self.config_path, &config)?;
        *guard = config.clone();
        Ok(config)
    }
}

/// Config file location (`~/.manobal/config.json`).
pub fn config_path() -> Result<PathBuf, ApiError> {
    let home = dirs::home_dir().ok_or_else(|| ApiError::Config("Could not find home directory".into()))?;
    Ok(home.join(".manobal").join("config.json"))
}

pub fn load_config() -> Result<ClientConfig, ApiError> {
    load_config_from(&config_path()?)
}

/// Read a config file. A missing file yields the defaults; the env override
/// applies either way.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ApiError> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ApiError::Config(format!("Failed to parse {}: {}", path.display(), e)))?
    } else {
        log::debug!("No config at {}, using defaults", path.display());
        ClientConfig::default()
    };

    let config = apply_overrides(config, std::env::var(API_URL_ENV).ok());
    validate(&config)?;
    Ok(config)
}

pub fn save_config_to(path: &Path, config: &ClientConfig) -> Result<(), ApiError> {
    validate(config)?;
    let content = serde_json::to_string_pretty(config)?;
    crate::util::atomic_write_str(path, &content)?;
    Ok(())
}

fn apply_overrides(mut config: ClientConfig, api_url: Option<String>) -> ClientConfig {
    if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
        log::info!("Using {} from {}", url, API_URL_ENV);
        config.api_base_url = url;
    }
    config
}

fn validate(config: &ClientConfig) -> Result<(), ApiError> {
    url::Url::parse(&config.api_base_url)
        .map_err(|e| ApiError::Config(format!("apiBaseUrl '{}': {}", config.api_base_url, e)))?;
    if config.poll_interval_ms == 0 {
        return Err(ApiError::Config("pollIntervalMs must be greater than zero".into()));
    }
    Ok(())
}
