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

//! Static descriptions of the MX endpoints driven by CSV rows.
//!
//! Templates use `{field}` placeholders named after CSV columns. A
//! placeholder must fill a whole path segment or a whole query value.

use crate::row::Row;
use reqwest::{Method, Url};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

/// Why a row could not be turned into a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("missing field {0}")]
    MissingField(String),
    #[error("invalid value for field {field}: {reason}")]
    InvalidSegment { field: String, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: &'static str,
    pub method: HttpMethod,
    pub url_template: &'static str,
    pub required_fields: &'static [&'static str],
    pub body_fields: &'static [&'static str],
    /// Column reported as the row's identifier.
    pub identifier_field: &'static str,
    /// Verb phrase used in status lines, e.g. "create database connection".
    pub action: &'static str,
}

pub const CREATE_DB_CONNECTION: OperationSpec = OperationSpec {
    name: "create-db-connection",
    method: HttpMethod::Post,
    url_template: "/conf/dbServices/{site}/{server_group_name}/{service_name}/dbConnections/{connection_name}",
    required_fields: &["site", "server_group_name", "service_name", "connection_name"],
    body_fields: &[
        "MX-IP",
        "MX-port",
        "site",
        "server_group_name",
        "service_name",
        "connection_name",
        "ip-address",
        "OS-type",
        "user-name",
        "password",
        "named-instance",
        "domain-name",
        "port",
    ],
    identifier_field: "connection_name",
    action: "create database connection",
};

pub const CREATE_PROTECTED_IP: OperationSpec = OperationSpec {
    name: "create-protected-ip",
    method: HttpMethod::Post,
    url_template: "/conf/serverGroups/{site}/{server_group_name}/protectedIPs/{ip-address}?gatewayGroup={gateway_group_name}",
    required_fields: &["site", "server_group_name", "ip-address", "gateway_group_name"],
    body_fields: &["comment"],
    identifier_field: "ip-address",
    action: "create protected and server group IP",
};

pub const UPDATE_SERVER_OS: OperationSpec = OperationSpec {
    name: "update-server-os",
    method: HttpMethod::Put,
    url_template: "/conf/serverGroups/{site}/{server_group_name}/servers/{ip-address}",
    required_fields: &["site", "server_group_name", "ip-address"],
    body_fields: &["OS-type"],
    identifier_field: "ip-address",
    action: "update OS for IP",
};

// The MX looks rules up with POST, not GET.
pub const GET_AGENT_MONITORING_RULE: OperationSpec = OperationSpec {
    name: "get-agent-monitoring-rule",
    method: HttpMethod::Post,
    url_template: "/conf/agentsMonitoringRules/{rule_name}",
    required_fields: &["rule_name"],
    body_fields: &[],
    identifier_field: "rule_name",
    action: "retrieve agent monitoring rule",
};

pub const AUDIT_REPORTS_PATH: &str = "/conf/jsonar/dbauditreports/";

/// A path below the API prefix plus query pairs, values already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl RequestTarget {
    /// Literal path with no placeholders.
    pub fn from_path(path: &str) -> Self {
        Self {
            segments: path
                .trim_start_matches('/')
                .split('/')
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
        }
    }

    /// Appends the segments and query pairs to `url`, which does the
    /// percent-encoding.
    pub fn extend_url(&self, url: &mut Url) -> Result<(), String> {
        url.path_segments_mut()
            .map_err(|()| "base URL cannot carry a path".to_string())?
            .pop_if_empty()
            .extend(&self.segments);
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(())
    }

    fn relative_url(&self) -> Option<Url> {
        let mut url = Url::parse("http://mx/").ok()?;
        self.extend_url(&mut url).ok()?;
        Some(url)
    }

    /// Encoded path, starting with `/`.
    pub fn path(&self) -> String {
        self.relative_url()
            .map(|url| url.path().to_string())
            .unwrap_or_default()
    }

    pub fn path_and_query(&self) -> String {
        match self.relative_url() {
            Some(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            None => String::new(),
        }
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_and_query())
    }
}

impl OperationSpec {
    pub fn missing_field(&self, row: &Row) -> Option<&'static str> {
        self.required_fields
            .iter()
            .copied()
            .find(|field| !row.contains(field))
    }

    pub fn identifier(&self, row: &Row) -> String {
        row.text(self.identifier_field).unwrap_or_default()
    }

    /// Fills the URL template from `row`.
    pub fn render(&self, row: &Row) -> Result<RequestTarget, RowError> {
        let (path, query) = match self.url_template.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.url_template, None),
        };

        let mut segments = Vec::new();
        for segment in path.trim_start_matches('/').split('/') {
            match placeholder(segment) {
                Some(field) => segments.push(segment_value(row, field)?),
                None => segments.push(segment.to_string()),
            }
        }

        let mut pairs = Vec::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = match placeholder(value) {
                Some(field) => query_value(row, field)?,
                None => value.to_string(),
            };
            pairs.push((key.to_string(), value));
        }

        Ok(RequestTarget {
            segments,
            query: pairs,
        })
    }
}

fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

fn query_value(row: &Row, field: &str) -> Result<String, RowError> {
    let value = row
        .text(field)
        .ok_or_else(|| RowError::MissingField(field.to_string()))?;
    if value.is_empty() {
        return Err(RowError::InvalidSegment {
            field: field.to_string(),
            reason: "value is empty",
        });
    }
    Ok(value)
}

fn segment_value(row: &Row, field: &str) -> Result<String, RowError> {
    let value = query_value(row, field)?;
    let reason = if value.contains('/') || value.contains('\\') {
        Some("contains a path separator")
    } else if value == "." || value == ".." {
        Some("is a relative path segment")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RowError::InvalidSegment {
            field: field.to_string(),
            reason,
        }),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_row() -> Row {
        Row::new()
            .with("site", "S1")
            .with("server_group_name", "SG1")
            .with("service_name", "SVC1")
            .with("connection_name", "CONN1")
    }

    #[test]
    fn renders_db_connection_path() {
        let target = CREATE_DB_CONNECTION.render(&connection_row()).unwrap();
        assert_eq!(target.path(), "/conf/dbServices/S1/SG1/SVC1/dbConnections/CONN1");
        assert_eq!(target.path_and_query(), target.path());
    }

    #[test]
    fn renders_gateway_group_as_query() {
        let row = Row::new()
            .with("site", "Default Site")
            .with("server_group_name", "SG1")
            .with("ip-address", "10.1.1.1")
            .with("gateway_group_name", "GW Group");
        let target = CREATE_PROTECTED_IP.render(&row).unwrap();
        assert_eq!(
            target.to_string(),
            "/conf/serverGroups/Default%20Site/SG1/protectedIPs/10.1.1.1?gatewayGroup=GW+Group"
        );
    }

    #[test]
    fn rejects_path_separators_and_dot_segments() {
        let row = connection_row().with("connection_name", "a/b");
        assert_eq!(
            CREATE_DB_CONNECTION.render(&row).unwrap_err(),
            RowError::InvalidSegment {
                field: "connection_name".into(),
                reason: "contains a path separator",
            }
        );

        let row = connection_row().with("site", "..");
        let err = CREATE_DB_CONNECTION.render(&row).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for field site: is a relative path segment"
        );
    }

    #[test]
    fn numeric_values_render_as_text() {
        let row = Row::new().with("rule_name", 42);
        let target = GET_AGENT_MONITORING_RULE.render(&row).unwrap();
        assert_eq!(target.path(), "/conf/agentsMonitoringRules/42");
    }

    #[test]
    fn reports_first_missing_required_field() {
        let row = Row::new().with("site", "S1").with("ip-address", "10.0.0.1");
        assert_eq!(
            UPDATE_SERVER_OS.missing_field(&row),
            Some("server_group_name")
        );
        assert_eq!(UPDATE_SERVER_OS.missing_field(&row.with("server_group_name", "SG")), None);
    }

    #[test]
    fn static_path_keeps_trailing_slash() {
        let target = RequestTarget::from_path(AUDIT_REPORTS_PATH);
        assert_eq!(target.path(), "/conf/jsonar/dbauditreports/");
    }

    #[test]
    fn extends_base_url_below_its_path() {
        let row = Row::new()
            .with("site", "S1")
            .with("server_group_name", "SG 1")
            .with("ip-address", "10.1.1.1")
            .with("gateway_group_name", "gw&1");
        let target = CREATE_PROTECTED_IP.render(&row).unwrap();
        let mut url = Url::parse("https://10.0.0.5:8083/SecureSphere/api/v1/").unwrap();
        target.extend_url(&mut url).unwrap();
        assert_eq!(
            url.as_str(),
            "https://10.0.0.5:8083/SecureSphere/api/v1/conf/serverGroups/S1/SG%201/protectedIPs/10.1.1.1?gatewayGroup=gw%261"
        );
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("gatewayGroup".to_string(), "gw&1".to_string())]);
    }

    #[test]
    fn method_names() {
        assert_eq!(UPDATE_SERVER_OS.method.to_string(), "PUT");
        assert_eq!(GET_AGENT_MONITORING_RULE.method.as_method(), Method::POST);
    }
}
