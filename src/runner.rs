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

//! Drives rows through one operation, strictly in input order.
//!
//! Later rows may depend on what earlier rows created on the MX (a server
//! group IP before a connection that references it), so rows are never
//! reordered or run in parallel. A bad row is recorded and skipped; it
//! never stops the batch.

use crate::client::{ApiClient, ResponseData, TransportError};
use crate::operation::{HttpMethod, OperationSpec, RequestTarget, RowError};
use crate::row::{Body, Row, project};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Anything that can carry one call to the MX.
pub trait Endpoint {
    fn send(
        &self,
        method: HttpMethod,
        target: &RequestTarget,
        body: Option<&Body>,
    ) -> Result<ResponseData, TransportError>;
}

impl Endpoint for ApiClient {
    fn send(
        &self,
        method: HttpMethod,
        target: &RequestTarget,
        body: Option<&Body>,
    ) -> Result<ResponseData, TransportError> {
        self.request(method, target, body)
    }
}

/// Result of one row. `status_code` is 0 when no HTTP exchange completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub row_index: usize,
    pub identifier: String,
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub operation: &'static str,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub target: RequestTarget,
    pub body: Body,
}

/// Validates a row and builds its request without sending anything.
pub fn prepare(spec: &OperationSpec, row: &Row) -> Result<PreparedRequest, RowError> {
    if let Some(field) = spec.missing_field(row) {
        return Err(RowError::MissingField(field.to_string()));
    }
    let body = project(row, spec.body_fields);
    let target = spec.render(row)?;
    Ok(PreparedRequest {
        method: spec.method,
        target,
        body,
    })
}

pub struct BulkRunner<'a, E: Endpoint> {
    endpoint: &'a E,
}

impl<'a, E: Endpoint> BulkRunner<'a, E> {
    pub fn new(endpoint: &'a E) -> Self {
        Self { endpoint }
    }

    pub fn run(&self, spec: &OperationSpec, rows: &[Row]) -> RunSummary {
        self.run_with(spec, rows, |_| {})
    }

    /// Like [`run`](Self::run), calling `observer` as soon as each row is done.
    pub fn run_with<F>(&self, spec: &OperationSpec, rows: &[Row], mut observer: F) -> RunSummary
    where
        F: FnMut(&Outcome),
    {
        let mut outcomes = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let outcome = self.apply(spec, idx + 1, row);
            observer(&outcome);
            outcomes.push(outcome);
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes.len() - succeeded;
        info!(
            operation = spec.name,
            succeeded, failed, "finished batch"
        );
        RunSummary {
            operation: spec.name,
            succeeded,
            failed,
            outcomes,
        }
    }

    fn apply(&self, spec: &OperationSpec, row_index: usize, row: &Row) -> Outcome {
        let identifier = spec.identifier(row);
        let failed = |status_code: u16, message: String| Outcome {
            row_index,
            identifier: identifier.clone(),
            success: false,
            status_code,
            message,
            data: None,
        };

        let prepared = match prepare(spec, row) {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(row = row_index, %err, "skipping row");
                return failed(0, err.to_string());
            }
        };

        let response = match self.endpoint.send(
            prepared.method,
            &prepared.target,
            Some(&prepared.body),
        ) {
            Ok(response) => response,
            Err(err) => {
                warn!(row = row_index, %err, "request failed");
                return failed(0, err.to_string());
            }
        };

        if response.status != 200 {
            warn!(
                row = row_index,
                identifier = %identifier,
                status = response.status,
                "MX rejected row"
            );
            return failed(response.status, response.body);
        }

        info!(row = row_index, identifier = %identifier, "row applied");
        Outcome {
            row_index,
            identifier,
            success: true,
            status_code: response.status,
            message: format!("{} succeeded", spec.action),
            data: response.json,
        }
    }
}
