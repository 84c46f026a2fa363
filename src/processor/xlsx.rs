//! Workbook processor rendering one sheet as CSV text.
//!
//! Compiled out without the `xlsx` cargo feature; the stub reports a missing
//! dependency through `flags.error` so service fallback can take over.

use crate::artifact::Artifact;
use crate::dsl::Options;

use super::Processor;

/// Converts spreadsheet bytes into a CSV rendering of one sheet.
pub struct XlsxProcessor;

impl Processor for XlsxProcessor {
    #[cfg(feature = "xlsx")]
    fn process(&self, data: &[u8], options: &Options) -> Artifact {
        enabled::process(data, options)
    }

    #[cfg(not(feature = "xlsx"))]
    fn process(&self, _data: &[u8], _options: &Options) -> Artifact {
        Artifact::processor_error(
            "workbook support requires calamine; rebuild with the 'xlsx' \
             feature enabled",
        )
    }

    fn capability(&self) -> Option<&'static str> {
        Some("xlsx")
    }
}

#[cfg(feature = "xlsx")]
mod enabled {
    use crate::artifact::Artifact;
    use crate::dsl::{OptionValue, Options};
    use calamine::{Reader, open_workbook_auto_from_rs};
    use serde_json::{Map, json};
    use std::io::Cursor;

    const DEFAULT_MAX_ROWS: usize = 200;

    pub(super) fn process(data: &[u8], options: &Options) -> Artifact {
        let mut workbook = match open_workbook_auto_from_rs(Cursor::new(data)) {
            Ok(workbook) => workbook,
            Err(err) => {
                return Artifact::processor_error(format!("failed to read workbook: {err}"));
            }
        };

        let names = workbook.sheet_names().to_vec();
        if names.is_empty() {
            return Artifact::processor_error("workbook contains no sheets");
        }
        let chosen = match pick_sheet(options, &names) {
            Ok(name) => name,
            Err(message) => return Artifact::processor_error(message),
        };

        let range = match workbook.worksheet_range(&chosen) {
            Ok(range) => range,
            Err(err) => {
                return Artifact::processor_error(format!(
                    "failed to read sheet '{chosen}': {err}"
                ));
            }
        };

        let max_rows = options
            .get("max_rows")
            .and_then(OptionValue::as_i64)
            .map(|v| v.max(0) as usize)
            .unwrap_or(DEFAULT_MAX_ROWS);

        let (total_rows, total_cols) = range.get_size();
        let mut lines = Vec::new();
        for row in range.rows().take(max_rows) {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| csv_escape(&cell.to_string()))
                .collect();
            lines.push(cells.join(","));
        }

        let mut flags = Map::new();
        flags.insert("kind".into(), json!("table"));
        flags.insert("rows".into(), json!(total_rows));
        flags.insert("cols".into(), json!(total_cols));
        flags.insert("rows_rendered".into(), json!(lines.len()));
        flags.insert("sheets".into(), json!(names));
        flags.insert("sheet_used".into(), json!(chosen));
        flags.insert("engine".into(), json!("calamine"));
        Artifact::text(lines.join("\n"), flags)
    }

    /// Select the sheet named or indexed by the `sheet` option, defaulting to
    /// the first sheet.
    fn pick_sheet(options: &Options, names: &[String]) -> Result<String, String> {
        match options.get("sheet") {
            None => Ok(names[0].clone()),
            Some(OptionValue::Int(index)) => {
                let index = *index;
                if index < 0 || index as usize >= names.len() {
                    Err(format!(
                        "sheet index {index} out of range (workbook has {})",
                        names.len()
                    ))
                } else {
                    Ok(names[index as usize].clone())
                }
            }
            Some(value) => {
                let wanted = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                names
                    .iter()
                    .find(|name| name.eq_ignore_ascii_case(&wanted))
                    .cloned()
                    .ok_or_else(|| format!("no sheet named '{wanted}'"))
            }
        }
    }

    fn csv_escape(cell: &str) -> String {
        if cell.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", cell.replace('"', "\"\""))
        } else {
            cell.to_string()
        }
    }

}
