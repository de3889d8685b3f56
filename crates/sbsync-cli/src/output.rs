use atty::Stream;
use color_eyre::Result;
use sbsync_core::ExecutionOutcome;
use serde_json::{json, Value};

use crate::style::Style;

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub quiet: bool,
    pub json: bool,
    pub no_color: bool,
    pub table: bool,
}

pub fn emit_output(opts: &OutputOptions, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();

    if opts.json {
        let payload = to_json_response(outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let style = Style::new(opts.no_color, atty::is(Stream::Stdout));
    println!("{}", style.status(outcome.status, &outcome.message));
    if opts.quiet {
        return Ok(code);
    }
    if let Some(hint) = hint_from_details(&outcome.details) {
        let hint_line = format!("Hint: {hint}");
        println!("{}", style.info(&hint_line));
    }
    for violation in violations_from_details(&outcome.details) {
        println!("  {violation}");
    }
    if let Some(listing) = render_backups(&outcome.details) {
        println!("{listing}");
    }
    if opts.table {
        if let Some(table) = render_results_table(&style, &outcome.details) {
            println!("{table}");
        }
    }
    Ok(code)
}

pub fn to_json_response(outcome: &ExecutionOutcome) -> Value {
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": outcome.status.as_str(),
        "message": outcome.message,
        "details": details,
    })
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}

fn violations_from_details(details: &Value) -> Vec<String> {
    let Some(violations) = details.get("violations").and_then(Value::as_array) else {
        return Vec::new();
    };
    violations
        .iter()
        .filter_map(|violation| {
            let index = violation.get("index")?.as_u64()?;
            let kind = violation.get("kind")?.as_str()?;
            let field = violation.get("field").and_then(Value::as_str);
            Some(match field {
                Some(field) => format!("entry #{index}: {field} ({kind})"),
                None => format!("entry #{index}: {kind}"),
            })
        })
        .collect()
}

fn render_backups(details: &Value) -> Option<String> {
    let backups = details.get("backups")?.as_array()?;
    if backups.is_empty() {
        return None;
    }
    let lines: Vec<String> = backups
        .iter()
        .filter_map(|backup| {
            let name = backup.get("name")?.as_str()?;
            let bytes = backup.get("bytes")?.as_u64()?;
            Some(format!("  {name}  {bytes} bytes"))
        })
        .collect();
    Some(lines.join("\n"))
}

struct ResultRow {
    uid: String,
    name: String,
    current: String,
    latest: String,
    action: String,
    reason: String,
}

const ABSENT: &str = "-";

fn render_results_table(style: &Style, details: &Value) -> Option<String> {
    let results = details.get("report")?.get("results")?.as_array()?;
    if results.is_empty() {
        return None;
    }
    let text = |value: &Value, key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(ABSENT)
            .to_string()
    };
    let rows: Vec<ResultRow> = results
        .iter()
        .map(|result| ResultRow {
            uid: result
                .get("uid")
                .and_then(Value::as_u64)
                .map_or_else(|| ABSENT.to_string(), |uid| uid.to_string()),
            name: text(result, "name"),
            current: text(result, "declared_version"),
            latest: text(result, "latest_version"),
            action: text(result, "action"),
            reason: text(result, "reason"),
        })
        .collect();
    Some(format_results_table(style, &rows))
}

fn format_results_table(style: &Style, rows: &[ResultRow]) -> String {
    let headers = ["UID", "Name", "Current", "Latest", "Action", "Reason"];
    let mut widths = headers.map(str::len);
    for row in rows {
        widths[0] = widths[0].max(row.uid.chars().count());
        widths[1] = widths[1].max(row.name.chars().count());
        widths[2] = widths[2].max(row.current.chars().count());
        widths[3] = widths[3].max(row.latest.chars().count());
        widths[4] = widths[4].max(row.action.chars().count());
    }

    let header_line = format!(
        "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  {:<w4$}  {}",
        headers[0],
        headers[1],
        headers[2],
        headers[3],
        headers[4],
        headers[5],
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
        w3 = widths[3],
        w4 = widths[4],
    );

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(style.table_header(&header_line));
    lines.push(format!(
        "{:-<w0$}  {:-<w1$}  {:-<w2$}  {:-<w3$}  {:-<w4$}  {:-<w5$}",
        "",
        "",
        "",
        "",
        "",
        "",
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
        w3 = widths[3],
        w4 = widths[4],
        w5 = headers[5].len(),
    ));
    for row in rows {
        let action = format!("{:<w4$}", row.action, w4 = widths[4]);
        lines.push(format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  {}  {}",
            row.uid,
            row.name,
            row.current,
            row.latest,
            style.action(&row.action, &action),
            row.reason,
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        ));
    }
    lines.join("\n")
}
