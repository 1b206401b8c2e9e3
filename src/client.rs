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

use crate::config::ConnectionSettings;
use crate::operation::{HttpMethod, RequestTarget};
use crate::row::Body;
use crate::session::Session;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, USER_AGENT,
};
use reqwest::{Method, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const API_PREFIX: &str = "SecureSphere/api/v1/";
pub const LOGIN_PATH: &str = "/auth/session";

const USER_AGENT_VALUE: &str = "mxbulk/0.1";

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status: u16,
    pub body: String,
    pub json: Option<Value>,
}

/// Raw login reply: status, body text and every cookie the MX set.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub status: u16,
    pub body: String,
    pub cookies: Vec<(String, String)>,
}

/// The request never produced an HTTP status.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("building URL for `{path}`: {reason}")]
    Url { path: String, reason: String },
    #[error("{method} {url} failed: {source}")]
    Request {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    api_base: Url,
    http: Client,
    headers: HeaderMap,
}

impl ApiClient {
    /// Client without session headers; enough for the login call.
    pub fn new(settings: &ConnectionSettings) -> Result<Self> {
        let parsed = Url::parse(&format!("{}/", settings.base_url.trim_end_matches('/')))
            .context("parsing MX base URL")?;
        let api_base = parsed
            .join(API_PREFIX)
            .context("joining API prefix to base URL")?;

        if !settings.verify_tls {
            warn!(
                base_url = %settings.base_url,
                "TLS certificate verification is disabled; set verify_tls to enable it"
            );
        }

        let http = Client::builder()
            .danger_accept_invalid_certs(!settings.verify_tls)
            .user_agent(HeaderValue::from_static(USER_AGENT_VALUE))
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        Ok(Self {
            api_base,
            http,
            headers,
        })
    }

    /// Adds the headers every call after login carries.
    pub fn with_session(mut self, api_token: &str, session: &Session) -> Result<Self> {
        self.headers
            .insert(AUTHORIZATION, basic_header(api_token).context("API token")?);
        let mut cookie = HeaderValue::from_str(&session.cookie_header)
            .context("session cookie is not a valid header value")?;
        cookie.set_sensitive(true);
        self.headers.insert(COOKIE, cookie);
        Ok(self)
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// POSTs an empty body to the login endpoint with the given Basic token.
    pub fn login(&self, login_token: &str) -> Result<LoginResponse> {
        let target = RequestTarget::from_path(LOGIN_PATH);
        let url = self.url_for(&target)?;
        debug!(%url, "logging in");

        let response = self
            .http
            .post(url.clone())
            .header(AUTHORIZATION, basic_header(login_token).context("login token")?)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .map_err(|source| TransportError::Request {
                method: Method::POST,
                url: url.to_string(),
                source,
            })
            .context("sending login request")?;

        let status = response.status().as_u16();
        let cookies = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect::<Vec<_>>();
        debug!(
            status,
            cookie_names = ?cookies.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            "login response"
        );
        let body = response.text().context("reading login response body")?;

        Ok(LoginResponse {
            status,
            body,
            cookies,
        })
    }

    /// Issues one call. Non-2xx statuses are returned, not raised.
    pub fn request(
        &self,
        method: HttpMethod,
        target: &RequestTarget,
        body: Option<&Body>,
    ) -> Result<ResponseData, TransportError> {
        let url = self.url_for(target)?;
        let mut request = self
            .http
            .request(method.as_method(), url.clone())
            .headers(self.headers.clone());

        if let Some(body) = body.filter(|b| !b.is_empty()) {
            request = request.json(body);
        }

        debug!(%method, %url, "sending request");
        let send_err = |source| TransportError::Request {
            method: method.as_method(),
            url: url.to_string(),
            source,
        };
        let response = request.send().map_err(send_err)?;

        let status = response.status().as_u16();
        debug!(status, headers = ?response.headers(), "received response");
        let text = response.text().map_err(send_err)?;
        debug!(body = %text, "response body");
        let json = serde_json::from_str(&text).ok();

        Ok(ResponseData {
            status,
            body: text,
            json,
        })
    }

    pub fn url_for(&self, target: &RequestTarget) -> Result<Url, TransportError> {
        let mut url = self.api_base.clone();
        target
            .extend_url(&mut url)
            .map_err(|reason| TransportError::Url {
                path: target.to_string(),
                reason,
            })?;
        Ok(url)
    }
}

fn basic_header(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Basic {token}"))
        .context("token is not a valid header value")?;
    value.set_sensitive(true);
    Ok(value)
}
