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

use crate::client::ResponseData;
use crate::operation::OperationSpec;
use crate::row::scalar_to_string;
use crate::runner::{Outcome, PreparedRequest, RunSummary};
use anyhow::Result;
use clap::ValueEnum;
use serde_json::Value;
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
    Raw,
}

#[derive(Clone, Debug, Default)]
pub struct RenderOpts {
    pub sort_by: Option<String>,
    pub filter: Option<String>,
}

const SUMMARY_COLUMNS: &[&str] = &["row_index", "identifier", "success", "status_code"];

/// Human-readable status line for one row.
pub fn outcome_line(spec: &OperationSpec, outcome: &Outcome) -> String {
    if outcome.success {
        format!(
            "[row {}] {} succeeded: {}",
            outcome.row_index, spec.action, outcome.identifier
        )
    } else if outcome.status_code == 0 {
        format!(
            "[row {}] failed to {}: {} ({})",
            outcome.row_index, spec.action, display_id(&outcome.identifier), outcome.message
        )
    } else {
        format!(
            "[row {}] failed to {}: {} (HTTP {})\n  {}",
            outcome.row_index,
            spec.action,
            display_id(&outcome.identifier),
            outcome.status_code,
            outcome.message.trim()
        )
    }
}

fn display_id(identifier: &str) -> &str {
    if identifier.is_empty() {
        "<no identifier>"
    } else {
        identifier
    }
}

/// Called as each row finishes.
pub fn print_outcome(
    spec: &OperationSpec,
    outcome: &Outcome,
    output: OutputFormat,
    show_data: bool,
) -> Result<()> {
    match output {
        OutputFormat::Pretty => {
            println!("{}", outcome_line(spec, outcome));
            if show_data && let Some(data) = &outcome.data {
                println!("{}", serde_json::to_string_pretty(data)?);
            }
        }
        OutputFormat::Raw => println!("{}", serde_json::to_string(outcome)?),
        OutputFormat::Json => {}
    }
    Ok(())
}

pub fn print_summary(summary: &RunSummary, output: OutputFormat, opts: &RenderOpts) -> Result<()> {
    match output {
        OutputFormat::Pretty => {
            println!();
            let table = serde_json::to_value(&summary.outcomes)?;
            if let Some(rendered) = format_table(&table, Some(SUMMARY_COLUMNS), opts) {
                print!("{rendered}");
            }
            println!(
                "\n{}: {} succeeded, {} failed",
                summary.operation, summary.succeeded, summary.failed
            );
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        OutputFormat::Raw => {}
    }
    Ok(())
}

/// One planned request, for `--dry-run`.
pub fn plan_line(row_index: usize, prepared: &PreparedRequest) -> Result<String> {
    let mut line = format!(
        "[row {row_index}] {} {}",
        prepared.method, prepared.target
    );
    if !prepared.body.is_empty() {
        let mut body = prepared.body.clone();
        if body.contains_key("password") {
            body.insert("password".into(), Value::String("*****".into()));
        }
        write!(line, " {}", serde_json::to_string(&body)?)?;
    }
    Ok(line)
}

pub fn render_response(
    response: ResponseData,
    output: OutputFormat,
    opts: &RenderOpts,
    columns: Option<&[&str]>,
) -> Result<()> {
    match output {
        OutputFormat::Raw => {
            println!("{}", response.body);
        }
        OutputFormat::Json => {
            if let Some(json) = response.json {
                println!("{}", serde_json::to_string(&json)?);
            } else {
                println!("{}", response.body);
            }
        }
        OutputFormat::Pretty => {
            if let Some(json) = response.json {
                match format_table(&json, columns, opts) {
                    Some(table) => print!("{table}"),
                    None => println!("{}", serde_json::to_string_pretty(&json)?),
                }
            } else {
                println!("{}", response.body);
            }
        }
    }

    Ok(())
}

/// Lays out an array of objects (or an object wrapping one) as a text
/// table. `None` when the value has no tabular shape.
pub fn format_table(json: &Value, columns_hint: Option<&[&str]>, opts: &RenderOpts) -> Option<String> {
    let rows = match json {
        Value::Array(arr) => arr,
        Value::Object(map) => map.values().find_map(|v| v.as_array())?,
        _ => return None,
    };

    if rows.is_empty() {
        return Some("No resources found.\n".into());
    }

    let first_obj = rows[0].as_object()?;
    let has_value = |key: &str| {
        rows.iter()
            .any(|row| row.get(key).map(is_non_empty).unwrap_or(false))
    };

    let mut columns: Vec<String> = columns_hint
        .unwrap_or_default()
        .iter()
        .filter(|key| has_value(**key))
        .map(|key| (*key).to_string())
        .collect();

    if columns.is_empty() {
        // Up to 8 fields of the first object that carry a value somewhere.
        columns = first_obj
            .keys()
            .filter(|key| has_value(key.as_str()))
            .take(8)
            .cloned()
            .collect();
    }

    if columns.is_empty() {
        return None;
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let mut table: Vec<Vec<String>> = Vec::new();
    let needle = opts.filter.as_ref().map(|f| f.to_ascii_lowercase());

    for row in rows {
        let Value::Object(map) = row else { continue };
        let out_row: Vec<String> = columns
            .iter()
            .map(|col| scalar_to_string(map.get(col).unwrap_or(&Value::Null)))
            .collect();
        if let Some(needle) = &needle
            && !out_row
                .iter()
                .any(|cell| cell.to_ascii_lowercase().contains(needle))
        {
            continue;
        }
        for (idx, cell) in out_row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
        table.push(out_row);
    }

    if table.is_empty() {
        return Some("No resources found.\n".into());
    }

    if let Some(sort) = &opts.sort_by
        && let Some(idx) = columns.iter().position(|c| c == sort)
    {
        table.sort_by(|a, b| a[idx].cmp(&b[idx]));
    }

    let mut out = String::new();
    push_line(&mut out, &columns, &widths);
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, &separator, &widths);
    for row in &table {
        push_line(&mut out, row, &widths);
    }
    Some(out)
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(_) => true,
        Value::Number(_) => true,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
