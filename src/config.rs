// mxbulk - bulk configuration CLI for the SecureSphere MX REST API
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8083;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Full base URL; wins over host/port when set.
    pub base_url: Option<String>,
    /// Basic token sent on the login call.
    pub login_token: Option<String>,
    /// Basic token sent on every call after login.
    pub api_token: Option<String>,
    pub verify_tls: Option<bool>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    User,
}

#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum ConfigError {
    #[error("could not locate a writable config directory for the current user")]
    MissingConfigDir,
    #[error("MX host is required; set it with `mxbulk configure --host <ip>` or pass --host")]
    MissingHost,
    #[error(
        "login token is required; set it with `mxbulk configure --login-token <base64>` or MXBULK_LOGIN_TOKEN"
    )]
    MissingLoginToken,
    #[error(
        "API token is required for calls after login; set it with `mxbulk configure --api-token <base64>` or MXBULK_API_TOKEN (it may be the same value as the login token)"
    )]
    MissingApiToken,
}

/// Everything needed to talk to one MX, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub base_url: String,
    pub login_token: String,
    pub api_token: Option<String>,
    pub verify_tls: bool,
    pub timeout: Duration,
}

impl ConnectionSettings {
    pub fn api_token(&self) -> Result<&str> {
        Ok(self
            .api_token
            .as_deref()
            .ok_or(ConfigError::MissingApiToken)?)
    }
}

pub fn config_path(scope: Scope, cwd: &Path) -> Result<PathBuf> {
    match scope {
        Scope::Local => Ok(cwd.join(".mxbulk.yaml")),
        Scope::User => {
            if let Ok(custom) = env::var("MXBULK_CONFIG_DIR") {
                return Ok(PathBuf::from(custom).join("config.yaml"));
            }
            let base = config_dir().ok_or(ConfigError::MissingConfigDir)?;
            Ok(base.join("mxbulk").join("config.yaml"))
        }
    }
}

pub fn load(cwd: &Path) -> Result<Config> {
    let user = read_if_exists(&config_path(Scope::User, cwd)?)?.unwrap_or_default();
    let local = read_if_exists(&config_path(Scope::Local, cwd)?)?.unwrap_or_default();
    Ok(merge(user, local))
}

pub fn load_scope(scope: Scope, cwd: &Path) -> Result<Config> {
    Ok(read_if_exists(&config_path(scope, cwd)?)?.unwrap_or_default())
}

pub fn save(scope: Scope, config: &Config, cwd: &Path) -> Result<PathBuf> {
    let path = config_path(scope, cwd)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let serialized = serde_yaml::to_string(config).context("serializing config")?;
    fs::write(&path, serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// Merges the config files with command-line overrides and checks that a
/// login is possible.
pub fn resolve(cwd: &Path, overrides: Config) -> Result<ConnectionSettings> {
    let merged = merge(load(cwd)?, overrides);

    let base_url = match (merged.base_url, merged.host) {
        (Some(url), _) => url.trim_end_matches('/').to_string(),
        (None, Some(host)) => format!(
            "https://{}:{}",
            url_host(host.trim()),
            merged.port.unwrap_or(DEFAULT_PORT)
        ),
        (None, None) => return Err(ConfigError::MissingHost.into()),
    };

    let login_token = merged
        .login_token
        .ok_or(ConfigError::MissingLoginToken)
        .map(|t| strip_basic(&t))?;
    let api_token = merged.api_token.map(|t| strip_basic(&t));

    Ok(ConnectionSettings {
        base_url,
        login_token,
        api_token,
        verify_tls: merged.verify_tls.unwrap_or(false),
        timeout: Duration::from_secs(merged.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
    })
}

/// Returns a copy safe to print.
pub fn masked(config: &Config) -> Config {
    let mut masked = config.clone();
    if masked.login_token.is_some() {
        masked.login_token = Some("*****".into());
    }
    if masked.api_token.is_some() {
        masked.api_token = Some("*****".into());
    }
    masked
}

// IPv6 literals need brackets in a URL authority.
fn url_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

// Tokens are often pasted with the scheme already in front.
fn strip_basic(token: &str) -> String {
    let trimmed = token.trim();
    trimmed
        .strip_prefix("Basic ")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

fn read_if_exists(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let config = serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
    Ok(Some(config))
}

/// Fields set in `top` win over `base`.
pub fn merge(base: Config, top: Config) -> Config {
    Config {
        host: top.host.or(base.host),
        port: top.port.or(base.port),
        base_url: top.base_url.or(base.base_url),
        login_token: top.login_token.or(base.login_token),
        api_token: top.api_token.or(base.api_token),
        verify_tls: top.verify_tls.or(base.verify_tls),
        timeout_secs: top.timeout_secs.or(base.timeout_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::{env, fs};
    use tempfile::tempdir;

    static ENV_LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();

    fn isolate(cwd: &Path) {
        unsafe {
            env::set_var("MXBULK_CONFIG_DIR", cwd.join("config"));
        }
        fs::create_dir_all(cwd.join("config")).unwrap();
    }

    #[test]
    fn merges_user_and_local_and_overrides() {
        let _guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let cwd = tempdir().unwrap();
        isolate(cwd.path());

        let user_cfg = Config {
            host: Some("10.0.0.1".into()),
            port: Some(8443),
            login_token: Some("user-login".into()),
            api_token: Some("user-api".into()),
            timeout_secs: Some(5),
            ..Default::default()
        };
        save(Scope::User, &user_cfg, cwd.path()).unwrap();

        let local_cfg = Config {
            host: Some("10.0.0.2".into()),
            login_token: Some("Basic local-login".into()),
            verify_tls: Some(true),
            ..Default::default()
        };
        save(Scope::Local, &local_cfg, cwd.path()).unwrap();

        let settings = resolve(cwd.path(), Config::default()).unwrap();
        assert_eq!(settings.base_url, "https://10.0.0.2:8443");
        assert_eq!(settings.login_token, "local-login");
        assert_eq!(settings.api_token().unwrap(), "user-api");
        assert!(settings.verify_tls);
        assert_eq!(settings.timeout, Duration::from_secs(5));

        let overridden = resolve(
            cwd.path(),
            Config {
                base_url: Some("http://127.0.0.1:9000/".into()),
                api_token: Some("cli-api".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(overridden.base_url, "http://127.0.0.1:9000");
        assert_eq!(overridden.api_token().unwrap(), "cli-api");
        assert!(overridden.verify_tls);

        let unverified = resolve(
            cwd.path(),
            Config {
                verify_tls: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!unverified.verify_tls);
    }

    #[test]
    fn brackets_ipv6_hosts() {
        let _guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let cwd = tempdir().unwrap();
        isolate(cwd.path());

        let settings = resolve(
            cwd.path(),
            Config {
                host: Some("fd00::5".into()),
                login_token: Some("abc".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(settings.base_url, "https://[fd00::5]:8083");
        assert!(reqwest::Url::parse(&settings.base_url).is_ok());
        assert_eq!(url_host("[::1]"), "[::1]");
        assert_eq!(url_host("mx.lab"), "mx.lab");
    }

    #[test]
    fn defaults_port_and_timeout() {
        let _guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let cwd = tempdir().unwrap();
        isolate(cwd.path());

        let settings = resolve(
            cwd.path(),
            Config {
                host: Some("mx.lab".into()),
                login_token: Some("abc".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(settings.base_url, "https://mx.lab:8083");
        assert_eq!(settings.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(!settings.verify_tls);
        let err = settings.api_token().unwrap_err();
        assert!(err.to_string().contains("API token is required"));
    }

    #[test]
    fn errors_when_missing_host_or_token() {
        let _guard = ENV_LOCK
            .get_or_init(|| std::sync::Mutex::new(()))
            .lock()
            .unwrap();
        let cwd = tempdir().unwrap();
        isolate(cwd.path());

        let err = resolve(cwd.path(), Config::default()).unwrap_err();
        assert!(err.to_string().contains("MX host is required"));

        let err = resolve(
            cwd.path(),
            Config {
                host: Some("mx.lab".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("login token is required"));
    }

    #[test]
    fn masks_tokens() {
        let cfg = Config {
            host: Some("mx.lab".into()),
            login_token: Some("secret".into()),
            api_token: Some("secret2".into()),
            ..Default::default()
        };
        let shown = masked(&cfg);
        assert_eq!(shown.login_token.as_deref(), Some("*****"));
        assert_eq!(shown.api_token.as_deref(), Some("*****"));
        assert_eq!(shown.host.as_deref(), Some("mx.lab"));
    }
}
