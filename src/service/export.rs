use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::{CallExportRow, ExportFormat};
use crate::error::CallControlError;

/// Column order shared by the csv and txt renderings.
pub const COLUMNS: [&str; 13] = [
    "id",
    "created_at",
    "manager_name",
    "customer_name",
    "customer_phone",
    "file_name",
    "processing_status",
    "general_score",
    "user_satisfaction_index",
    "communication_score",
    "sales_score",
    "duration_seconds",
    "transcription",
];

/// Rendered export content plus the metadata the caller needs to store it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedExport {
    pub content: String,
    pub record_count: usize,
    pub format: ExportFormat,
}

impl GeneratedExport {
    pub fn file_name(&self, now: DateTime<Utc>) -> String {
        format!(
            "calls_export_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            self.format.extension()
        )
    }
}

/// Render `rows` in the requested format. Output depends only on the input.
pub fn generate(
    rows: &[CallExportRow],
    format: ExportFormat,
) -> Result<GeneratedExport, CallControlError> {
    let content = match format {
        ExportFormat::Json => serde_json::to_string_pretty(rows)?,
        ExportFormat::Csv => to_csv(rows)?,
        ExportFormat::Txt => to_txt(rows),
    };
    Ok(GeneratedExport {
        content,
        record_count: rows.len(),
        format,
    })
}

fn fields(row: &CallExportRow) -> [String; 13] {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let num = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_default();
    [
        row.id.clone(),
        row.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        opt(&row.manager_name),
        opt(&row.customer_name),
        opt(&row.customer_phone),
        opt(&row.file_name),
        status_str(row),
        num(row.general_score),
        num(row.user_satisfaction_index),
        num(row.communication_score),
        num(row.sales_score),
        row.duration_seconds.map(|d| d.to_string()).unwrap_or_default(),
        opt(&row.transcription),
    ]
}

fn status_str(row: &CallExportRow) -> String {
    serde_json::to_value(row.processing_status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn to_csv(rows: &[CallExportRow]) -> Result<String, CallControlError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(COLUMNS)?;
    for row in rows {
        wtr.write_record(fields(row))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| CallControlError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| CallControlError::validation(e.to_string()))
}

fn to_txt(rows: &[CallExportRow]) -> String {
    if rows.is_empty() {
        return "No calls".to_string();
    }
    rows.iter()
        .map(|row| {
            let values = fields(row);
            let mut block = format!("Call {}", row.id);
            for (key, value) in COLUMNS.iter().zip(values.iter()).skip(1) {
                if value.is_empty() {
                    continue;
                }
                block.push('\n');
                block.push_str(key);
                block.push_str(": ");
                block.push_str(value);
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ProcessingStatus;
    use chrono::TimeZone;

    fn rows() -> Vec<CallExportRow> {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        vec![
            CallExportRow {
                id: "c1".into(),
                created_at: at,
                manager_name: Some("Anna".into()),
                customer_name: Some("ACME, Ltd".into()),
                customer_phone: Some("+70000000001".into()),
                file_name: Some("a.mp3".into()),
                processing_status: ProcessingStatus::Completed,
                general_score: Some(87.5),
                user_satisfaction_index: None,
                communication_score: Some(90.0),
                sales_score: None,
                duration_seconds: Some(125),
                transcription: Some("hello".into()),
            },
            CallExportRow {
                id: "c2".into(),
                created_at: at,
                manager_name: None,
                customer_name: None,
                customer_phone: None,
                file_name: None,
                processing_status: ProcessingStatus::Pending,
                general_score: None,
                user_satisfaction_index: None,
                communication_score: None,
                sales_score: None,
                duration_seconds: None,
                transcription: None,
            },
        ]
    }

    #[test]
    fn json_is_an_array_of_rows() {
        let out = generate(&rows(), ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["manager_name"], "Anna");
        assert_eq!(parsed[1]["processing_status"], "pending");
        assert_eq!(out.record_count, 2);
    }

    #[test]
    fn csv_has_header_and_quotes_commas() {
        let out = generate(&rows(), ExportFormat::Csv).unwrap();
        let mut lines = out.content.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "c1,2024-05-01T09:30:00Z,Anna,\"ACME, Ltd\",+70000000001,a.mp3,completed,87.5,,90,,125,hello"
        );
        assert_eq!(lines.next().unwrap(), "c2,2024-05-01T09:30:00Z,,,,,pending,,,,,,");
        assert!(lines.next().is_none());
    }

    #[test]
    fn csv_of_nothing_is_just_the_header() {
        let out = generate(&[], ExportFormat::Csv).unwrap();
        assert_eq!(out.content.trim_end(), COLUMNS.join(","));
        assert_eq!(out.record_count, 0);
    }

    #[test]
    fn txt_blocks_skip_empty_fields() {
        let out = generate(&rows(), ExportFormat::Txt).unwrap();
        let blocks: Vec<&str> = out.content.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("Call c1\ncreated_at: 2024-05-01T09:30:00Z\nmanager_name: Anna"));
        assert_eq!(
            blocks[1],
            "Call c2\ncreated_at: 2024-05-01T09:30:00Z\nprocessing_status: pending"
        );
        assert_eq!(generate(&[], ExportFormat::Txt).unwrap().content, "No calls");
    }

    #[test]
    fn file_name_uses_format_extension() {
        let out = generate(&[], ExportFormat::Csv).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(out.file_name(now), "calls_export_20240501_093000.csv");
    }
}
