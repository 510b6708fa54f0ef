//! PDF reading. Ruled tables come from `pdfplumber`, plain text from
//! `pdf-extract`.

use anyhow::{Context, anyhow};
use pdfplumber::{Pdf, TableSettings};
use tracing::warn;

use crate::table_extractor::{TableGrid, is_junk_line};

pub fn extract_text(bytes: &[u8]) -> anyhow::Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes).context("failed to read PDF text")?;
    Ok(text)
}

/// Tables of every page, in page order. The default settings find cells
/// from the drawn ruling lines.
pub fn page_tables(bytes: &[u8]) -> anyhow::Result<Vec<Vec<TableGrid>>> {
    let pdf = Pdf::open(bytes, None).map_err(|e| anyhow!("failed to open PDF: {e}"))?;
    let settings = TableSettings::default();

    let mut pages = Vec::new();
    for page in pdf.pages_iter() {
        let page = page.map_err(|e| anyhow!("failed to read PDF page: {e}"))?;
        let tables = page.find_tables(&settings);
        pages.push(tables.iter().map(TableGrid::from_table).collect());
    }
    Ok(pages)
}

/// The table with the most rows; the order grid is the main table of a page.
pub fn largest_table(tables: Vec<TableGrid>) -> TableGrid {
    tables
        .into_iter()
        .max_by_key(|table| table.rows.len())
        .unwrap_or_default()
}

pub fn first_page_grid(bytes: &[u8]) -> anyhow::Result<TableGrid> {
    let first_page = page_tables(bytes)?.into_iter().next().unwrap_or_default();
    Ok(largest_table(first_page))
}

/// Rows for the paste sheet: every table row of every page. A PDF without
/// ruled tables falls back to one row per text line.
pub fn paste_rows(bytes: &[u8]) -> anyhow::Result<Vec<Vec<String>>> {
    let rows = paste_rows_from_tables(&page_tables(bytes)?);
    if !rows.is_empty() {
        return Ok(rows);
    }
    warn!("no ruled tables found; pasting text lines instead");
    Ok(paste_rows_from_text(&extract_text(bytes)?))
}

pub fn paste_rows_from_tables(pages: &[Vec<TableGrid>]) -> Vec<Vec<String>> {
    pages
        .iter()
        .flatten()
        .flat_map(|table| &table.rows)
        .map(|row| row.iter().map(|cell| cell.clone().unwrap_or_default()).collect())
        .collect()
}

pub fn paste_rows_from_text(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !is_junk_line(line))
        .map(|line| vec![line.to_string()])
        .collect()
}
