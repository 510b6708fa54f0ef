//! Rule-based reading of the client/bento order grid.
//!
//! The order sheet is a single ruled table: a header row carrying `園名`, then
//! one row per client. Column 0 holds the client ID above the client name, and
//! every other column holds a student count stacked above a teacher count.

use serde::Serialize;

use crate::counts::{is_digits, normalize_digits, parse_cell_counts};
use crate::pdf_text::first_page_grid;

pub const HEADER_TOKEN: &str = "園名";

/// Row index assumed to be the header when no row carries [`HEADER_TOKEN`].
pub const FALLBACK_HEADER_ROW: usize = 2;

/// Cell texts of one table, row by row. Blank cells are `None`; lines inside
/// a cell are joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableGrid {
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MealCounts {
    pub student: u32,
    pub teacher: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridClient {
    pub client_id: Option<String>,
    pub client_name: String,
    pub counts: Vec<MealCounts>,
}

impl GridClient {
    pub fn student_total(&self) -> u32 {
        self.counts.iter().fold(0, |sum, c| sum.saturating_add(c.student))
    }

    pub fn teacher_total(&self) -> u32 {
        self.counts.iter().fold(0, |sum, c| sum.saturating_add(c.teacher))
    }
}

impl TableGrid {
    pub fn new(rows: Vec<Vec<Option<String>>>) -> Self {
        Self { rows }
    }

    pub fn from_table(table: &pdfplumber::Table) -> Self {
        let rows = table
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| {
                        cell.text
                            .as_deref()
                            .map(str::trim)
                            .filter(|text| !text.is_empty())
                            .map(str::to_string)
                    })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn find_header_row(&self, token: &str) -> Option<usize> {
        self.rows.iter().position(|row| row_text(row).contains(token))
    }

    /// Bento column titles from the header row, the legacy source of bento names.
    pub fn bento_header_cells(&self) -> Vec<String> {
        let Some(header) = self.find_header_row(HEADER_TOKEN) else {
            return Vec::new();
        };
        self.rows[header]
            .iter()
            .skip(1)
            .flatten()
            .map(|cell| cell.replace('\n', "").trim().to_string())
            .filter(|cell| !cell.is_empty())
            .collect()
    }
}

pub fn is_junk_line(trimmed: &str) -> bool {
    if trimmed.is_empty() {
        return true;
    }
    trimmed.chars().all(|c| !c.is_alphanumeric())
}

fn row_text(row: &[Option<String>]) -> String {
    row.iter().flatten().map(String::as_str).collect()
}

/// Splits the first column into `(client_id, client_name)`.
///
/// Digit-only lines (full-width digits included) are the ID, stored in ASCII;
/// the last other line is the name.
pub fn split_id_and_name(cell: &str) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut name = None;
    for part in cell.split('\n').map(str::trim).filter(|p| !p.is_empty()) {
        let normalized = normalize_digits(part);
        if is_digits(normalized.trim()) {
            id.get_or_insert_with(|| normalized.trim().to_string());
        } else {
            name = Some(part.to_string());
        }
    }
    (id, name)
}

pub fn extract_client_table(grid: &TableGrid) -> Vec<GridClient> {
    let header = grid
        .find_header_row(HEADER_TOKEN)
        .unwrap_or(FALLBACK_HEADER_ROW);

    let mut clients = Vec::new();
    for row in grid.rows.iter().skip(header + 1) {
        if row.iter().all(Option::is_none) {
            continue;
        }
        let first = row.first().and_then(|cell| cell.as_deref()).unwrap_or_default();
        let (client_id, client_name) = split_id_and_name(first);
        // One row per client; a row without a name is not a client.
        let Some(client_name) = client_name else {
            continue;
        };

        let counts = row
            .iter()
            .skip(1)
            .map(|cell| {
                let (student, teacher) = parse_cell_counts(cell.as_deref());
                MealCounts { student, teacher }
            })
            .collect();

        clients.push(GridClient {
            client_id,
            client_name,
            counts,
        });
    }
    clients
}

pub fn extract_client_table_from_pdf(bytes: &[u8]) -> anyhow::Result<Vec<GridClient>> {
    let grid = first_page_grid(bytes)?;
    Ok(extract_client_table(&grid))
}
