//! Export of extraction results, with a local CSV / spreadsheet fallback for
//! when the backend cannot render the file itself.

use bytes::Bytes;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::dto::ExportFormat;
use crate::api::{ApiClient, ApiError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Export failed: {0}")]
    Api(#[from] ApiError),
    #[error("No tabular data available for export")]
    NoTable,
}

#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub bytes: Bytes,
    pub filename: String,
    /// True when the file was rendered locally after the backend export failed.
    pub fallback: bool,
}

/// `extraction_{millis}.{ext}`. The local spreadsheet fallback is an HTML
/// table, so it is named `.xls` rather than `.xlsx`.
pub fn export_filename(format: ExportFormat, timestamp_millis: i64, fallback: bool) -> String {
    let extension = match (format, fallback) {
        (ExportFormat::Excel, true) => "xls",
        (format, _) => format.extension(),
    };
    format!("extraction_{}.{}", timestamp_millis, extension)
}

fn has_local_fallback(format: ExportFormat) -> bool {
    matches!(format, ExportFormat::Csv | ExportFormat::Excel)
}

struct Table<'a> {
    columns: Vec<&'a str>,
    rows: &'a [Value],
}

impl<'a> Table<'a> {
    /// First entry of `data.tables`, which is all the local renderers use.
    fn first(data: &'a Value) -> Option<Self> {
        let table = data.get("tables")?.as_array()?.first()?;
        let columns = table
            .get("columns")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        let rows = table
            .get("rows")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Some(Self { columns, rows })
    }

    fn cells<'r>(&'r self, row: &'r Value) -> impl Iterator<Item = String> + 'r {
        self.columns.iter().map(move |column| cell_text(row.get(*column)))
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Header line of bare column names, then one line per row with every cell quoted.
pub fn render_csv(data: &Value) -> Result<String, ExportError> {
    let table = Table::first(data).ok_or(ExportError::NoTable)?;

    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    lines.push(table.columns.join(","));
    for row in table.rows {
        let cells: Vec<String> = table
            .cells(row)
            .map(|cell| format!("\"{}\"", cell.replace('"', "\"\"")))
            .collect();
        lines.push(cells.join(","));
    }
    Ok(lines.join("\n"))
}

/// Plain `<table>` markup, which spreadsheet applications open directly.
pub fn render_html_table(data: &Value) -> Result<String, ExportError> {
    let table = Table::first(data).ok_or(ExportError::NoTable)?;

    let mut html = String::from("<table><tr>");
    for column in &table.columns {
        html.push_str(&format!("<th>{}</th>", escape_html(column)));
    }
    html.push_str("</tr>");
    for row in table.rows {
        html.push_str("<tr>");
        for cell in table.cells(row) {
            html.push_str(&format!("<td>{}</td>", escape_html(&cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    Ok(html)
}

/// Asks the backend to render `data`; for CSV and Excel a failed request falls
/// back to rendering the first table locally.
pub async fn export_with_fallback(
    client: &ApiClient,
    data: &Value,
    format: ExportFormat,
) -> Result<ExportedFile, ExportError> {
    let timestamp = chrono::Utc::now().timestamp_millis();

    let error = match client.export_raw(data, format).await {
        Ok(bytes) => {
            let filename = export_filename(format, timestamp, false);
            info!("Exported {} bytes as {}", bytes.len(), filename);
            return Ok(ExportedFile {
                bytes,
                filename,
                fallback: false,
            });
        }
        Err(e) => e,
    };

    if !has_local_fallback(format) {
        return Err(error.into());
    }
    warn!(
        "Server export to {} failed ({}); rendering locally",
        format.as_str(),
        error
    );

    let rendered = match format {
        ExportFormat::Csv => render_csv(data),
        _ => render_html_table(data),
    };
    let document = match rendered {
        Ok(document) => document,
        Err(e) => {
            warn!("Local export unavailable: {}", e);
            return Err(error.into());
        }
    };
    Ok(ExportedFile {
        bytes: Bytes::from(document),
        filename: export_filename(format, timestamp, true),
        fallback: true,
    })
}
