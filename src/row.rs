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

//! CSV rows and the projection of a row onto a request body.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// JSON object sent as a request body.
pub type Body = Map<String, Value>;

/// Columns the MX expects as JSON numbers.
const NUMERIC_FIELDS: &[&str] = &["MX-port", "port"];

/// One input record: field name to scalar value. Empty cells are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Map<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field value as plain text, as it would appear in a URL.
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).map(scalar_to_string)
    }

    fn from_record(headers: &StringRecord, record: &StringRecord) -> Self {
        let mut fields = Map::new();
        for (name, cell) in headers.iter().zip(record.iter()) {
            if name.is_empty() || cell.is_empty() {
                continue;
            }
            let value = if NUMERIC_FIELDS.contains(&name) {
                cell.parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(cell.to_string()))
            } else {
                Value::String(cell.to_string())
            };
            fields.insert(name.to_string(), value);
        }
        Self { fields }
    }
}

/// Copies the fields of `row` that appear in `allowed`. Absent fields are
/// simply left out.
pub fn project(row: &Row, allowed: &[&str]) -> Body {
    allowed
        .iter()
        .filter_map(|name| row.get(name).map(|v| ((*name).to_string(), v.clone())))
        .collect()
}

pub fn read_csv(path: &Path) -> Result<Vec<Row>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    read_rows(file).with_context(|| format!("reading {}", path.display()))
}

pub fn read_rows<R: Read>(reader: R) -> Result<Vec<Row>> {
    // Short records keep their place; the missing cells are simply absent.
    let mut csv = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv.headers().context("reading CSV header")?.clone();

    let mut rows = Vec::new();
    for (idx, record) in csv.records().enumerate() {
        let record = record.with_context(|| format!("parsing CSV record {}", idx + 1))?;
        rows.push(Row::from_record(&headers, &record));
    }
    Ok(rows)
}

pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
MX-IP,MX-port,site,server_group_name,service_name,connection_name,ip-address,OS-type,port,comment
10.0.0.5,8083,Default Site,SG-Oracle,Oracle,conn-1,10.1.1.1,linux,1521,16-Jan-23
10.0.0.5,8083,Default Site,SG-Oracle,Oracle,conn-2,10.1.1.2,,01521,
";

    #[test]
    fn reads_rows_in_file_order() {
        let rows = read_rows(SAMPLE.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("connection_name").as_deref(), Some("conn-1"));
        assert_eq!(rows[1].text("connection_name").as_deref(), Some("conn-2"));
        assert_eq!(rows[0].get("site"), Some(&json!("Default Site")));
    }

    #[test]
    fn numeric_columns_become_numbers() {
        let rows = read_rows(SAMPLE.as_bytes()).unwrap();
        assert_eq!(rows[0].get("MX-port"), Some(&json!(8083)));
        assert_eq!(rows[0].get("port"), Some(&json!(1521)));
        // everything else stays text, even when it looks numeric
        assert_eq!(rows[0].get("MX-IP"), Some(&json!("10.0.0.5")));
    }

    #[test]
    fn empty_cells_are_absent() {
        let rows = read_rows(SAMPLE.as_bytes()).unwrap();
        assert!(!rows[1].contains("OS-type"));
        assert!(!rows[1].contains("comment"));
        assert!(rows[1].contains("ip-address"));
    }

    #[test]
    fn short_records_are_kept_with_missing_fields_absent() {
        let csv = "site,server_group_name,ip-address,OS-type\n\
                   S1,SG1,10.0.0.1,linux\n\
                   S1,SG1\n\
                   S1,SG1,10.0.0.3,linux\n";
        let rows = read_rows(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].contains("server_group_name"));
        assert!(!rows[1].contains("ip-address"));
        assert!(!rows[1].contains("OS-type"));
        assert_eq!(rows[2].text("ip-address").as_deref(), Some("10.0.0.3"));
    }

    #[test]
    fn reads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let rows = read_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_csv(Path::new("/nonexistent/input.csv")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/input.csv"));
    }

    #[test]
    fn projection_is_the_intersection() {
        let row = Row::new()
            .with("site", "S1")
            .with("comment", "hello")
            .with("password", "secret")
            .with("unrelated", "x");
        let allowed = ["site", "comment", "OS-type"];

        let body = project(&row, &allowed);

        let keys: BTreeSet<&str> = body.keys().map(String::as_str).collect();
        let expected: BTreeSet<&str> = allowed
            .iter()
            .copied()
            .filter(|k| row.contains(k))
            .collect();
        assert_eq!(keys, expected);
        assert_eq!(body["comment"], json!("hello"));
        // source row untouched
        assert!(row.contains("unrelated"));
    }

    #[test]
    fn projection_with_no_allowed_fields_is_empty() {
        let row = Row::new().with("rule_name", "r1");
        assert!(project(&row, &[]).is_empty());
    }
}
