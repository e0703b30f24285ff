//! Row transformation
//!
//! Turns one raw payload into flat, escaped rows:
//! - the payload is an object or an array of objects (records)
//! - each record yields a fixed prefix: identifier, date, then one cell per fixed column
//! - the first non-empty candidate array yields one row per element, extended
//!   with the expand fields of that element
//! - with no such array, the record yields exactly one row whose expand cells are empty
//!
//! Every record therefore produces at least one row.

mod format;
mod path;

pub use format::{escape_cell, format_value, join_cells};
pub use path::FieldPath;

use crate::config::SchemaConfig;
use crate::error::{Result, TransformError};
use crate::types::WorkItem;
use serde_json::Value;

/// One output row of escaped cells
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    cells: Vec<String>,
}

impl Row {
    /// Escaped cells in column order
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// Delimited line terminated by `\n`
    pub fn to_line(&self, delimiter: char) -> String {
        join_cells(&self.cells, delimiter)
    }
}

/// Compiled schema, shared read-only by all consumers
#[derive(Clone, Debug)]
pub struct RowTransformer {
    fixed: Vec<FieldPath>,
    expand_candidates: Vec<FieldPath>,
    expand_fields: Vec<FieldPath>,
    delimiter: char,
    header: String,
}

impl RowTransformer {
    /// Compile every path of `schema`
    pub fn new(schema: &SchemaConfig, delimiter: char) -> Result<Self> {
        let fixed = compile(schema.fixed.iter().map(|c| c.path.as_str()))?;
        let expand_candidates = compile(schema.expand_candidates.iter().map(String::as_str))?;
        let expand_fields = compile(schema.expand_fields.iter().map(String::as_str))?;

        let header_cells: Vec<String> = schema
            .header_cells()
            .iter()
            .map(|h| escape_cell(h))
            .collect();
        let header = join_cells(&header_cells, delimiter);

        Ok(Self {
            fixed,
            expand_candidates,
            expand_fields,
            delimiter,
            header,
        })
    }

    /// Header line (escaped, `\n`-terminated) written first in every partition file
    pub fn header_line(&self) -> &str {
        &self.header
    }

    /// Number of columns per row
    pub fn width(&self) -> usize {
        2 + self.fixed.len() + self.expand_fields.len()
    }

    /// Cell delimiter
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Transform one payload into rows, in emission order
    pub fn transform(
        &self,
        payload: &str,
        item: &WorkItem,
    ) -> std::result::Result<Vec<Row>, TransformError> {
        let document: Value = serde_json::from_str(payload)?;
        let records: Vec<&Value> = match &document {
            Value::Object(_) => vec![&document],
            Value::Array(elements) => {
                if let Some(bad) = elements.iter().find(|e| !e.is_object()) {
                    return Err(TransformError::UnexpectedShape(format!(
                        "array element is {}",
                        json_kind(bad)
                    )));
                }
                elements.iter().collect()
            }
            other => {
                return Err(TransformError::UnexpectedShape(format!(
                    "top-level value is {}",
                    json_kind(other)
                )));
            }
        };

        let mut rows = Vec::new();
        for record in records {
            self.record_rows(record, item, &mut rows);
        }
        Ok(rows)
    }

    /// Transform and append the delimited lines to `out`, returning the row count
    pub fn render_into(
        &self,
        payload: &str,
        item: &WorkItem,
        out: &mut String,
    ) -> std::result::Result<usize, TransformError> {
        let rows = self.transform(payload, item)?;
        for row in &rows {
            out.push_str(&row.to_line(self.delimiter));
        }
        Ok(rows.len())
    }

    fn record_rows(&self, record: &Value, item: &WorkItem, rows: &mut Vec<Row>) {
        let mut prefix = Vec::with_capacity(self.width());
        prefix.push(escape_cell(&item.identifier));
        prefix.push(escape_cell(&item.business_day.to_string()));
        prefix.extend(
            self.fixed
                .iter()
                .map(|p| escape_cell(&format_value(p.get(record)))),
        );

        let expandable = self
            .expand_candidates
            .iter()
            .filter_map(|p| p.get(record))
            .filter_map(Value::as_array)
            .find(|a| !a.is_empty());

        match expandable {
            Some(elements) => {
                for element in elements {
                    let mut cells = prefix.clone();
                    cells.extend(
                        self.expand_fields
                            .iter()
                            .map(|p| escape_cell(&format_value(p.get(element)))),
                    );
                    rows.push(Row { cells });
                }
            }
            None => {
                let mut cells = prefix;
                cells.extend(self.expand_fields.iter().map(|_| escape_cell("")));
                rows.push(Row { cells });
            }
        }
    }
}

fn compile<'a>(paths: impl IntoIterator<Item = &'a str>) -> Result<Vec<FieldPath>> {
    paths.into_iter().map(FieldPath::parse).collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnSpec;
    use chrono::NaiveDate;
    use serde_json::json;

    fn small_schema() -> SchemaConfig {
        SchemaConfig {
            fixed: vec![
                ColumnSpec::path("isin"),
                ColumnSpec::path("aggregatedHoldingData.simpleMovingAverage['30'].concentration"),
            ],
            expand_fields: vec!["transactionId".into(), "quantity".into()],
            ..SchemaConfig::default()
        }
    }

    fn item() -> WorkItem {
        WorkItem::new("XS0000000001", NaiveDate::from_ymd_opt(2024, 3, 28).unwrap())
    }

    fn unquote(cell: &str) -> &str {
        cell.strip_prefix('"').and_then(|c| c.strip_suffix('"')).unwrap()
    }

    #[test]
    fn record_without_expandable_array_yields_one_blank_filled_row() {
        let t = RowTransformer::new(&small_schema(), ';').unwrap();
        let payload = json!({"isin": "XS0000000001"}).to_string();

        let rows = t.transform(&payload, &item()).unwrap();

        assert_eq!(rows.len(), 1);
        let cells = rows[0].cells();
        assert_eq!(cells.len(), t.width());
        assert_eq!(&cells[..3], &["\"XS0000000001\"", "\"2024-03-28\"", "\"XS0000000001\""]);
        assert_eq!(cells[3], "\"\"", "missing fixed path gives an empty cell");
        assert!(cells[4..].iter().all(|c| c == "\"\""));
    }

    #[test]
    fn empty_expandable_array_counts_as_absent() {
        let t = RowTransformer::new(&small_schema(), ';').unwrap();
        let payload = json!({"isin": "A", "transactions": []}).to_string();

        let rows = t.transform(&payload, &item()).unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn expandable_array_yields_one_row_per_element_with_shared_prefix() {
        let t = RowTransformer::new(&small_schema(), ';').unwrap();
        let payload = json!({
            "isin": "A",
            "aggregatedHoldingData": {"simpleMovingAverage": {"30": {"concentration": 0.5}}},
            "transactions": [
                {"transactionId": "T1", "quantity": 100},
                {"transactionId": "T2"},
                {"transactionId": "T3", "quantity": 2.5}
            ]
        })
        .to_string();

        let rows = t.transform(&payload, &item()).unwrap();

        assert_eq!(rows.len(), 3);
        let prefix = &rows[0].cells()[..4];
        assert!(rows.iter().all(|r| &r.cells()[..4] == prefix));
        assert_eq!(prefix[3], "\"0.5\"");
        let ids: Vec<_> = rows.iter().map(|r| unquote(&r.cells()[4])).collect();
        assert_eq!(ids, vec!["T1", "T2", "T3"]);
        assert_eq!(rows[1].cells()[5], "\"\"");
        assert_eq!(rows[2].cells()[5], "\"2.5\"");
    }

    #[test]
    fn first_non_empty_candidate_wins() {
        let schema = SchemaConfig {
            expand_candidates: vec!["primary[*]".into(), "fallback".into()],
            ..small_schema()
        };
        let t = RowTransformer::new(&schema, ';').unwrap();
        let payload = json!({
            "primary": [],
            "fallback": [{"transactionId": "F1"}, {"transactionId": "F2"}]
        })
        .to_string();

        let rows = t.transform(&payload, &item()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells()[4], "\"F1\"");
    }

    #[test]
    fn array_payload_is_normalized_to_records() {
        let t = RowTransformer::new(&small_schema(), ';').unwrap();
        let payload = json!([
            {"isin": "A", "transactions": [{"transactionId": "T1"}, {"transactionId": "T2"}]},
            {"isin": "B"}
        ])
        .to_string();

        let rows = t.transform(&payload, &item()).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].cells()[2], "\"B\"");
    }

    #[test]
    fn invalid_payloads_are_transform_errors() {
        let t = RowTransformer::new(&small_schema(), ';').unwrap();
        assert!(matches!(
            t.transform("{not json", &item()),
            Err(TransformError::InvalidJson(_))
        ));
        assert!(matches!(
            t.transform("42", &item()),
            Err(TransformError::UnexpectedShape(_))
        ));
        assert!(matches!(
            t.transform(r#"[{"isin":"A"}, "x"]"#, &item()),
            Err(TransformError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn header_is_escaped_and_delimited() {
        let t = RowTransformer::new(&small_schema(), ';').unwrap();
        assert_eq!(
            t.header_line(),
            "\"RequestedISIN\";\"RequestedDate\";\"isin\";\
             \"aggregatedHoldingData.simpleMovingAverage['30'].concentration\";\
             \"transaction.transactionId\";\"transaction.quantity\"\n"
        );
    }

    #[test]
    fn render_into_appends_lines() {
        let t = RowTransformer::new(&small_schema(), ',').unwrap();
        let mut out = String::new();

        let n = t
            .render_into(
                r#"{"isin":"A","transactions":[{"transactionId":"x"},{"transactionId":"y"}]}"#,
                &item(),
                &mut out,
            )
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(out.lines().count(), 2);
        assert!(out.ends_with('\n'));
        assert!(out.starts_with("\"XS0000000001\",\"2024-03-28\","));
    }

    #[test]
    fn invalid_schema_path_fails_construction() {
        let schema = SchemaConfig {
            fixed: vec![ColumnSpec::path("a[")],
            ..SchemaConfig::default()
        };
        assert!(RowTransformer::new(&schema, ';').is_err());
    }

    #[test]
    fn default_schema_compiles() {
        let t = RowTransformer::new(&SchemaConfig::default(), ';').unwrap();
        assert_eq!(t.width(), 72);
    }
}
