//! Turns captured TQL output into tables.
//!
//! The local tool writes rows to stdout and the column header (plus the
//! echoed statement and diagnostics) to stderr. Over a PTY both streams arrive
//! merged, so the remote variant locates the header in the same line list as
//! the rows.

use crate::error::TqlError;
use crate::table::Table;
use crate::tokenizer::split_fields;

/// Substring TQL prints in diagnostics when a statement fails.
pub const ERROR_MARKER: &str = "error=";

/// Decoded stdout/stderr of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCapture {
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl RawCapture {
    pub fn from_bytes(stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            stdout_lines: decode_lines(stdout),
            stderr_lines: decode_lines(stderr),
        }
    }
}

/// Decode bytes as UTF-8, dropping invalid sequences.
pub fn decode_lenient(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

/// Decode and split into lines, trimming `\r` and one trailing empty line.
pub fn decode_lines(bytes: &[u8]) -> Vec<String> {
    let text = decode_lenient(bytes);
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Classify tool diagnostics.
///
/// TQL has no structured status channel; a failed statement is recognised
/// only by the `error=` marker in its diagnostic text.
pub fn classify_diagnostics(diagnostics: &str) -> crate::Result<()> {
    if diagnostics.contains(ERROR_MARKER) {
        Err(TqlError::ExternalTool(diagnostics.trim_end().to_string()))
    } else {
        Ok(())
    }
}

/// True when `line` is the tool echoing the submitted statement.
fn echoes_query(line: &str, query: &str) -> bool {
    let query = query.trim();
    !query.is_empty() && line.contains(query)
}

/// Build a table from separated local-tool output.
///
/// The header is the first stderr line holding the delimiter that is not the
/// echoed statement. Every stdout line becomes a row.
pub fn parse_local_capture(capture: &RawCapture, query: &str, delimiter: char) -> Table {
    let mut table = Table::new();

    if let Some(header_line) = capture
        .stderr_lines
        .iter()
        .find(|line| line.contains(delimiter) && !echoes_query(line, query))
    {
        table.set_header(split_fields(header_line, delimiter));
    }

    for line in &capture.stdout_lines {
        table.add_row(split_fields(line, delimiter));
    }

    table
}

/// Build a table from merged PTY output lines.
///
/// The header is the first non-echo line holding the delimiter; every later
/// non-empty line is a row. Without such a line every non-empty line is a
/// single-column row.
pub fn parse_merged_lines(lines: &[String], query: &str, delimiter: char) -> crate::Result<Table> {
    classify_diagnostics(&lines.join("\n"))?;

    let mut table = Table::new();
    let header_index = lines
        .iter()
        .position(|line| line.contains(delimiter) && !echoes_query(line, query));

    let body = match header_index {
        Some(index) => {
            table.set_header(split_fields(&lines[index], delimiter));
            &lines[index + 1..]
        }
        None => lines,
    };

    for line in body.iter().filter(|line| !line.trim().is_empty()) {
        if echoes_query(line, query) {
            continue;
        }
        table.add_row(split_fields(line, delimiter));
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_lines_strips_single_trailing_empty_line() {
        assert_eq!(decode_lines(b"a\nb\n"), lines(&["a", "b"]));
        assert_eq!(decode_lines(b"a\n\n"), lines(&["a", ""]));
        assert_eq!(decode_lines(b"a"), lines(&["a"]));
        assert!(decode_lines(b"").is_empty());
    }

    #[test]
    fn test_decode_lines_trims_carriage_returns() {
        assert_eq!(decode_lines(b"a\r\nb\r\n"), lines(&["a", "b"]));
    }

    #[test]
    fn test_decode_drops_invalid_utf8() {
        assert_eq!(decode_lenient(b"ab\xffcd"), "abcd");
        assert_eq!(decode_lenient("caf\u{e9}".as_bytes()), "caf\u{e9}");
    }

    #[test]
    fn test_local_header_and_rows() {
        let capture = RawCapture::from_bytes(
            b"1|value_1\n2|value_2\n3|value_3\n",
            b"SELECT * FROM foo;\ncol1|col2\n",
        );
        let table = parse_local_capture(&capture, "SELECT * FROM foo;", '|');
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows()[1], lines(&["2", "value_2"]));
    }

    #[test]
    fn test_local_header_skips_echoed_query_with_pipe() {
        let capture = RawCapture {
            stdout_lines: lines(&["x"]),
            stderr_lines: lines(&["select a || b from t;", "concat"]),
        };
        let table = parse_local_capture(&capture, "select a || b from t;", '|');
        assert!(table.header().is_none());
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_local_header_ignores_lines_without_delimiter() {
        let capture = RawCapture {
            stdout_lines: lines(&["1|a"]),
            stderr_lines: lines(&["Statement executed", "id|name", "other|line"]),
        };
        let table = parse_local_capture(&capture, "select * from t", '|');
        assert_eq!(table.header(), Some(&lines(&["id", "name"])[..]));
    }

    #[test]
    fn test_classify_diagnostics() {
        assert!(classify_diagnostics("Statement executed successfully.").is_ok());
        let err = classify_diagnostics("E0101 error=Table foo not found\n").unwrap_err();
        assert!(
            matches!(err, TqlError::ExternalTool(ref msg) if msg == "E0101 error=Table foo not found")
        );
    }

    #[test]
    fn test_merged_lines_with_header() {
        let output = lines(&["col1|col2", "1|value_1", "", "2|value_2", "3|value_3"]);
        let table = parse_merged_lines(&output, "select * from foo;", '|').unwrap();
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn test_merged_lines_without_header_are_single_column() {
        let output = lines(&["thoughtspot_internal", "thoughtspot_internal_stats"]);
        let table = parse_merged_lines(&output, "show databases;", '|').unwrap();
        assert!(table.header().is_none());
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[0], lines(&["thoughtspot_internal"]));
    }

    #[test]
    fn test_merged_lines_report_tool_errors() {
        let output = lines(&["TQL error=syntax error near 'form'"]);
        let result = parse_merged_lines(&output, "select * form foo;", '|');
        assert!(matches!(result, Err(TqlError::ExternalTool(_))));
    }
}
