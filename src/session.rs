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

//! Basic-Authorization login and the resulting session cookie pair.

use crate::client::{ApiClient, LoginResponse};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

pub const JSESSIONID: &str = "JSESSIONID";
pub const SSOSESSIONID: &str = "SSOSESSIONID";

/// Cookies issued by one successful login. Read-only for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub cookie_header: String,
    pub established_at: DateTime<Utc>,
}

impl Session {
    /// Cookie header with the values hidden, for display.
    pub fn masked_cookie(&self) -> String {
        self.cookie_header
            .split("; ")
            .map(|pair| match pair.split_once('=') {
                Some((name, value)) if !value.is_empty() => format!("{name}=*****"),
                Some((name, _)) => format!("{name}="),
                None => pair.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("login rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("login request failed: {0:#}")]
    Transport(anyhow::Error),
}

/// Logs in once. Anything but HTTP 200 is fatal for the run.
pub fn authenticate(client: &ApiClient, login_token: &str) -> Result<Session, AuthenticationError> {
    let response = client
        .login(login_token)
        .map_err(AuthenticationError::Transport)?;
    session_from_response(response)
}

fn session_from_response(response: LoginResponse) -> Result<Session, AuthenticationError> {
    if response.status != 200 {
        return Err(AuthenticationError::Rejected {
            status: response.status,
            body: response.body,
        });
    }

    let find = |name: &str| {
        let value = response
            .cookies
            .iter()
            .find(|(cookie, _)| cookie == name)
            .map(|(_, value)| value.as_str());
        if value.is_none() {
            warn!(cookie = name, "login response did not set cookie; sending it empty");
        }
        value
    };
    let cookie_header = compose_cookie(find(JSESSIONID), find(SSOSESSIONID));

    info!("logged in to MX");
    Ok(Session {
        cookie_header,
        established_at: Utc::now(),
    })
}

/// A missing cookie is kept as an empty value.
pub fn compose_cookie(jsessionid: Option<&str>, ssosessionid: Option<&str>) -> String {
    format!(
        "{JSESSIONID}={}; {SSOSESSIONID}={}",
        jsessionid.unwrap_or_default(),
        ssosessionid.unwrap_or_default()
    )
}
