//! Excel templates as editable, in-memory sheets.
//!
//! Templates are read with `calamine` (values and formulas, plus the VBA
//! project of `.xlsm` files) and written back out with `rust_xlsxwriter`.
//! Cell formatting of the template is not carried over.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use calamine::{Data, Reader, Xlsx, open_workbook_auto};
use rust_xlsxwriter::{Formula, Workbook};

const VBA_PROJECT_PART: &str = "xl/vbaProject.bin";

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Formula(String),
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<u32> for CellValue {
    fn from(value: u32) -> Self {
        CellValue::Number(f64::from(value))
    }
}

/// A header row plus data rows, written from the top-left of a sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    cells: BTreeMap<(u32, u16), CellValue>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn get(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.cells.get(&(row, col))
    }

    pub fn set(&mut self, row: u32, col: u16, value: CellValue) {
        self.cells.insert((row, col), value);
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn clear_rows_from(&mut self, first_row: u32) {
        self.cells.retain(|(row, _), _| *row < first_row);
    }

    pub fn max_row(&self) -> Option<u32> {
        self.cells.keys().map(|(row, _)| *row).max()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateWorkbook {
    sheets: Vec<Sheet>,
    vba_project: Option<Vec<u8>>,
}

impl TemplateWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| anyhow!("failed to open template {}: {e}", path.display()))?;
        let sheets = read_sheets(&mut workbook)?;

        let is_xlsm = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsm"));
        let vba_project = if is_xlsm {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            read_vba_project(file)?
        } else {
            None
        };

        Ok(Self { sheets, vba_project })
    }

    /// Reads an `.xlsx`/`.xlsm` workbook from memory.
    pub fn from_bytes(bytes: Vec<u8>) -> anyhow::Result<Self> {
        let vba_project = read_vba_project(Cursor::new(bytes.as_slice()))?;
        let mut workbook: Xlsx<_> =
            Xlsx::new(Cursor::new(bytes)).map_err(|e| anyhow!("failed to read workbook: {e}"))?;
        let sheets = read_sheets(&mut workbook)?;
        Ok(Self { sheets, vba_project })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name == name)
    }

    pub fn has_vba(&self) -> bool {
        self.vba_project.is_some()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    fn require_sheet(&mut self, name: &str) -> anyhow::Result<&mut Sheet> {
        self.sheet_mut(name)
            .ok_or_else(|| anyhow!("worksheet '{name}' not found in template"))
    }

    /// Returns the named sheet, inserting an empty one at `index` if missing.
    pub fn ensure_sheet(&mut self, name: &str, index: usize) -> &mut Sheet {
        let position = match self.sheets.iter().position(|s| s.name == name) {
            Some(position) => position,
            None => {
                let index = index.min(self.sheets.len());
                self.sheets.insert(index, Sheet::new(name));
                index
            }
        };
        &mut self.sheets[position]
    }

    pub fn cell(&self, sheet: &str, row: u32, col: u16) -> Option<&CellValue> {
        self.sheet(sheet).and_then(|s| s.get(row, col))
    }

    pub fn clear_sheet(&mut self, sheet: &str) -> anyhow::Result<()> {
        self.require_sheet(sheet)?.clear();
        Ok(())
    }

    pub fn clear_rows_from(&mut self, sheet: &str, first_row: u32) -> anyhow::Result<()> {
        self.require_sheet(sheet)?.clear_rows_from(first_row);
        Ok(())
    }

    pub fn write_cell(
        &mut self,
        sheet: &str,
        row: u32,
        col: u16,
        value: CellValue,
    ) -> anyhow::Result<()> {
        self.require_sheet(sheet)?.set(row, col, value);
        Ok(())
    }

    pub fn write_rows(
        &mut self,
        sheet: &str,
        first_row: u32,
        rows: &[Vec<CellValue>],
    ) -> anyhow::Result<()> {
        let target = self.require_sheet(sheet)?;
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                target.set(first_row + r as u32, c as u16, value.clone());
            }
        }
        Ok(())
    }

    /// Replaces the sheet's contents with a header row and the data rows below it.
    pub fn paste_table(&mut self, sheet: &str, data: &SheetData) -> anyhow::Result<()> {
        let target = self.require_sheet(sheet)?;
        target.clear();
        for (c, header) in data.headers.iter().enumerate() {
            target.set(0, c as u16, CellValue::Text(header.clone()));
        }
        self.write_rows(sheet, 1, &data.rows)
    }

    pub fn save_to_buffer(&self) -> anyhow::Result<Vec<u8>> {
        let mut workbook = Workbook::new();

        // Held until the workbook is written.
        let _vba_file = match &self.vba_project {
            Some(bytes) => {
                let mut file =
                    tempfile::NamedTempFile::new().context("failed to stage VBA project")?;
                file.write_all(bytes).context("failed to stage VBA project")?;
                workbook
                    .add_vba_project(file.path())
                    .context("failed to attach VBA project")?;
                Some(file)
            }
            None => None,
        };

        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet
                .set_name(&sheet.name)
                .with_context(|| format!("invalid worksheet name '{}'", sheet.name))?;
            for (&(row, col), value) in &sheet.cells {
                match value {
                    CellValue::Text(text) => worksheet.write_string(row, col, text),
                    CellValue::Number(number) => worksheet.write_number(row, col, *number),
                    CellValue::Bool(flag) => worksheet.write_boolean(row, col, *flag),
                    CellValue::Formula(formula) => {
                        worksheet.write_formula(row, col, Formula::new(formula.as_str()))
                    }
                }
                .with_context(|| {
                    format!("failed to write {}!R{}C{}", sheet.name, row + 1, col + 1)
                })?;
            }
        }
        if self.sheets.is_empty() {
            workbook.add_worksheet();
        }

        let buffer = workbook.save_to_buffer().context("failed to serialize workbook")?;
        Ok(buffer)
    }
}

fn read_sheets<RS, R>(workbook: &mut R) -> anyhow::Result<Vec<Sheet>>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let mut sheet = Sheet::new(name.clone());

        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| anyhow!("failed to read sheet '{name}': {e}"))?;
        let (row0, col0) = range.start().unwrap_or((0, 0));
        for (r, c, data) in range.used_cells() {
            if let Some(value) = cell_from_data(data) {
                sheet.set(row0 + r as u32, (col0 as usize + c) as u16, value);
            }
        }

        // Formulas take precedence over their cached values.
        if let Ok(formulas) = workbook.worksheet_formula(&name) {
            let (row0, col0) = formulas.start().unwrap_or((0, 0));
            for (r, c, formula) in formulas.used_cells() {
                sheet.set(
                    row0 + r as u32,
                    (col0 as usize + c) as u16,
                    CellValue::Formula(formula.clone()),
                );
            }
        }

        sheets.push(sheet);
    }
    Ok(sheets)
}

fn cell_from_data(data: &Data) -> Option<CellValue> {
    match data {
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(dt) => Some(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
        _ => None,
    }
}

fn read_vba_project<R: Read + Seek>(reader: R) -> anyhow::Result<Option<Vec<u8>>> {
    let Ok(mut archive) = zip::ZipArchive::new(reader) else {
        return Ok(None);
    };
    let Ok(mut part) = archive.by_name(VBA_PROJECT_PART) else {
        return Ok(None);
    };
    let mut bytes = Vec::new();
    part.read_to_end(&mut bytes).context("failed to read VBA project")?;
    Ok(Some(bytes))
}
