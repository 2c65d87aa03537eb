//! Tabular query results.

use serde::Serialize;

use crate::tokenizer::join_fields;

/// Header plus rows parsed from TQL output.
///
/// Rows are not checked against the header width: TQL does not guarantee
/// they match, so a short or long row is stored as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    header: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the header, replacing any previous one.
    pub fn set_header(&mut self, fields: Vec<String>) {
        self.header = Some(fields);
    }

    pub fn add_row(&mut self, fields: Vec<String>) {
        self.rows.push(fields);
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of header columns, 0 when no header was found.
    pub fn column_count(&self) -> usize {
        self.header.as_ref().map_or(0, Vec::len)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.rows.is_empty()
    }

    /// Render back to delimited lines, header first when present.
    pub fn to_delimited_lines(&self, delimiter: char) -> Vec<String> {
        self.header
            .iter()
            .chain(self.rows.iter())
            .map(|fields| join_fields(fields, delimiter))
            .collect()
    }
}
