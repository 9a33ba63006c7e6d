//! In-memory tabular results decoded from the query endpoint.

use crate::error::{ClientError, Result};
use serde_json::{Map, Value};
use std::io::{Read, Write};

/// Rows of a query result with a shared header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table from a header and rows of equal width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(ClientError::InvalidResponse(format!(
                "row {} has {} cells, expected {}",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Decode delimited text with a header line.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(infer_cell).collect());
        }

        Self::new(columns, rows)
    }

    /// Concatenate pages in order. All non-empty headers must match.
    pub fn concat(pages: impl IntoIterator<Item = Table>) -> Result<Self> {
        let mut out = Table::default();
        for page in pages {
            if out.columns.is_empty() {
                out.columns = page.columns;
            } else if !page.columns.is_empty() && page.columns != out.columns {
                return Err(ClientError::InvalidResponse(format!(
                    "page header {:?} does not match {:?}",
                    page.columns, out.columns
                )));
            }
            out.rows.extend(page.rows);
        }
        Ok(out)
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Single cell.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Rows as `column -> value` maps.
    ///
    /// Map keys come out sorted by name, not in column order, and when a
    /// header repeats a name the rightmost column wins. Use [`Table::columns`]
    /// with [`Table::rows`] where order or duplicates matter.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Write the table back out as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(cell_text))?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn infer_cell(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match text {
        "True" | "true" => Value::Bool(true),
        "False" | "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_csv_infers_cells() {
        let table = Table::from_csv(&b"id,text,score,flag,note\n1,text1,0.5,True,\n"[..]).unwrap();
        assert_eq!(table.columns(), ["id", "text", "score", "flag", "note"]);
        assert_eq!(
            table.rows()[0],
            vec![json!(1), json!("text1"), json!(0.5), json!(true), Value::Null]
        );
        assert_eq!(table.shape(), (1, 5));
    }

    #[test]
    fn test_concat_preserves_page_order() {
        let p1 = Table::from_csv(&b"id,text\n1,text1"[..]).unwrap();
        let p2 = Table::from_csv(&b"id,text\n2,text2\n3,text3"[..]).unwrap();
        let table = Table::concat([p1, p2]).unwrap();
        assert_eq!(table.column("id").unwrap(), vec![&json!(1), &json!(2), &json!(3)]);
        assert_eq!(table.get(2, "text"), Some(&json!("text3")));
    }

    #[test]
    fn test_concat_rejects_header_mismatch() {
        let p1 = Table::from_csv(&b"id,text\n1,a"[..]).unwrap();
        let p2 = Table::from_csv(&b"id,other\n2,b"[..]).unwrap();
        assert!(Table::concat([p1, p2]).is_err());
    }

    #[test]
    fn test_header_only_page() {
        let table = Table::from_csv(&b"col1,col2\n"[..]).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 2);
    }

    #[test]
    fn test_records_and_write_csv() {
        let table = Table::from_csv(&b"col1,col2\n1,2\n3,\n"[..]).unwrap();
        let records = table.records();
        assert_eq!(records[0]["col2"], json!(2));
        assert_eq!(records[1]["col2"], Value::Null);

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "col1,col2\n1,2\n3,\n");
    }

    #[test]
    fn test_records_with_duplicate_headers() {
        let table = Table::from_csv(&b"b,a,b\n1,2,3\n"[..]).unwrap();
        assert_eq!(table.columns(), ["b", "a", "b"]);
        assert_eq!(table.rows()[0], vec![json!(1), json!(2), json!(3)]);

        let record = &table.records()[0];
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(record["b"], json!(3));
    }
}
