//! CSV export and import helpers shared by the master-data services

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, AppResult};

/// Export data to CSV format
pub fn export_to_csv<T: Serialize>(data: &[T]) -> AppResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for record in data {
        wtr.serialize(record)
            .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
}

/// Row that could not be imported
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportRowError {
    /// 1-based line in the uploaded file (the header is line 1)
    pub line: u64,
    pub message: String,
}

/// Outcome of a CSV import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<ImportRowError>,
}

impl ImportSummary {
    pub fn reject(&mut self, line: u64, message: impl Into<String>) {
        self.errors.push(ImportRowError {
            line,
            message: message.into(),
        });
    }
}

/// Deserialize every data row, keeping per-row failures alongside their line
/// number. A missing or unreadable header fails the whole import.
pub fn read_csv_rows<T: DeserializeOwned>(data: &[u8]) -> AppResult<Vec<(u64, Result<T, String>)>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(AppError::ValidationError("CSV file has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let fallback_line = index as u64 + 2;
        match record {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);
                if record.iter().all(|field| field.is_empty()) {
                    continue;
                }
                let parsed = record
                    .deserialize::<T>(Some(&headers))
                    .map_err(|e| describe_csv_error(&e));
                rows.push((line, parsed));
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                rows.push((line, Err(describe_csv_error(&e))));
            }
        }
    }

    Ok(rows)
}

fn describe_csv_error(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => match err.field() {
            Some(field) => format!("column {}: {}", field + 1, err.kind()),
            None => err.kind().to_string(),
        },
        _ => err.to_string(),
    }
}

/// Empty CSV cells arrive as `Some("")`; treat them as absent
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        code: String,
        name: String,
        limit: Option<rust_decimal::Decimal>,
    }

    #[test]
    fn test_export_writes_header() {
        let csv = export_to_csv(&[Row {
            code: "C1".into(),
            name: "Acme Fuels".into(),
            limit: None,
        }])
        .unwrap();
        assert!(csv.starts_with("code,name,limit\n"));
        assert!(csv.contains("C1,Acme Fuels,"));
    }

    #[test]
    fn test_row_errors_carry_line_numbers() {
        let data = b"code,name,limit\nC1,Acme,1.5\nC2,Bad,abc\n\nC3,Ok,\n";
        let rows: Vec<(u64, Result<Row, String>)> = read_csv_rows(data).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, 2);
        assert!(rows[0].1.is_ok());
        assert_eq!(rows[1].0, 3);
        assert!(rows[1].1.is_err());
        assert_eq!(rows[2].0, 5);
        assert_eq!(rows[2].1.as_ref().unwrap().limit, None);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("x".into())), Some("x".into()));
    }
}
