use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use amai_chat::RetentionPolicy;
use amai_client::DEFAULT_BACKEND_HOST;
use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::poller::PollConfig;

pub const SETTINGS_DIRECTORY_NAME: &str = "amai";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "AMAI_";
pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;
pub const DEFAULT_POLL_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_backend_host")]
    pub backend_host: String,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    #[serde(default = "default_retain_error")]
    pub retain_error_on_empty_response: bool,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_host: default_backend_host(),
            poll_attempts: default_poll_attempts(),
            poll_delay_ms: default_poll_delay_ms(),
            retain_error_on_empty_response: default_retain_error(),
            download_dir: default_download_dir(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.backend_host = self.backend_host.trim().trim_end_matches('/').to_string();
        if self.backend_host.is_empty() {
            self.backend_host = default_backend_host();
        }
        if self.download_dir.as_os_str().is_empty() {
            self.download_dir = default_download_dir();
        }
        self
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            attempts: self.poll_attempts,
            delay: Duration::from_millis(self.poll_delay_ms),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retain_on_empty_error: self.retain_error_on_empty_response,
        }
    }
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain_error_on_empty_response: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".amai"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf, overrides: &SettingsOverrides) -> Self {
        let settings = Self::load_layers(&config_path, overrides);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load(overrides: &SettingsOverrides) -> Self {
        Self::new(Self::default_config_path(), overrides)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_layers(path: &Path, overrides: &SettingsOverrides) -> ClientSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to load settings, using defaults");
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        let encoded = serde_json::to_vec_pretty(settings).context(EncodeSnafu {
            stage: "encode-settings",
        })?;
        replace_file(&self.config_path, &encoded)?;
        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

/// Stages `contents` beside `path`, then renames it into place.
fn replace_file(path: &Path, contents: &[u8]) -> Result<(), SettingsError> {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(directory).context(PersistSnafu {
        stage: "create-settings-directory",
        path: directory.to_path_buf(),
    })?;

    let staged = path.with_extension("json.tmp");
    std::fs::write(&staged, contents).context(PersistSnafu {
        stage: "stage-settings-file",
        path: staged.clone(),
    })?;
    std::fs::rename(&staged, path).context(PersistSnafu {
        stage: "swap-settings-file",
        path: path.to_path_buf(),
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot encode settings on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("settings io failed for {path:?} on `{stage}`: {source}"))]
    Persist {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_backend_host() -> String {
    DEFAULT_BACKEND_HOST.to_string()
}

fn default_poll_attempts() -> u32 {
    DEFAULT_POLL_ATTEMPTS
}

fn default_poll_delay_ms() -> u64 {
    DEFAULT_POLL_DELAY_MS
}

fn default_retain_error() -> bool {
    true
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}
