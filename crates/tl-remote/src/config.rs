//! Client configuration: API location and access token.
//!
//! Values are layered, later sources overriding earlier ones:
//! defaults, `~/.tunelab`, `./.tunelab`, then the `TUNELAB_*` environment
//! variables. Callers apply explicit overrides on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use tl_types::{config_error, TlResult};

pub const DOTFILE_NAME: &str = ".tunelab";
pub const ENV_API_URL: &str = "TUNELAB_API_URL";
pub const ENV_ACCESS_TOKEN: &str = "TUNELAB_ACCESS_TOKEN";

const DEFAULT_API_URL: &str = "http://localhost:8000/api/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL every REST path is joined onto.
    pub api_url: String,
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Resolve configuration from the home dotfile, the working directory
    /// dotfile and the environment.
    pub fn load() -> TlResult<Self> {
        let mut files = Vec::new();
        if let Some(home) = dirs::home_dir() {
            files.push(home.join(DOTFILE_NAME));
        }
        files.push(PathBuf::from(DOTFILE_NAME));
        Self::from_sources(&files, |key| std::env::var(key).ok())
    }

    /// Layer the given dotfiles (missing ones are skipped) and then the
    /// environment lookup over the defaults.
    pub fn from_sources(
        files: &[PathBuf],
        env: impl Fn(&str) -> Option<String>,
    ) -> TlResult<Self> {
        let mut config = Self::default();
        for path in files {
            if path.is_file() {
                config.apply_dotfile(path)?;
            }
        }
        if let Some(url) = env(ENV_API_URL) {
            config.api_url = url;
        }
        if let Some(token) = env(ENV_ACCESS_TOKEN) {
            config.access_token = Some(token);
        }
        Ok(config)
    }

    /// Layer a TOML dotfile over the current values. Keys the file leaves
    /// out keep their current value.
    pub fn apply_dotfile(&mut self, path: &Path) -> TlResult<()> {
        let contents = std::fs::read_to_string(path)?;
        let file: DotFile = toml::from_str(&contents)
            .map_err(|e| config_error!("{}: {}", path.display(), e))?;
        debug!(path = %path.display(), "loaded dotfile");

        if let Some(url) = file.api_url {
            self.api_url = url;
        }
        if let Some(token) = file.access_token {
            self.access_token = Some(token);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        Ok(())
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn require_token(&self) -> TlResult<&str> {
        self.access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                config_error!(
                    "no access token: set {} or add access_token to {}",
                    ENV_ACCESS_TOKEN,
                    DOTFILE_NAME
                )
            })
    }
}

/// Contents of a `.tunelab` file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DotFile {
    api_url: Option<String>,
    access_token: Option<String>,
    request_timeout_secs: Option<u64>,
}
