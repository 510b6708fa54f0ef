//! Product and customer master CSVs kept in the assets directory.
//!
//! The newest file matching a kind's pattern is the master in effect; an
//! upload replaces every older file of that kind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterKind {
    Product,
    Customer,
}

impl MasterKind {
    pub const ALL: [MasterKind; 2] = [MasterKind::Product, MasterKind::Customer];

    pub fn parse(value: &str) -> Result<Self, ApiError> {
        match value {
            "product" => Ok(MasterKind::Product),
            "customer" => Ok(MasterKind::Customer),
            _ => Err(ApiError::BadRequest(
                "Invalid type. Use 'product' or 'customer'.".to_string(),
            )),
        }
    }

    /// Substring every stored file of this kind carries; also the sheet name
    /// the master is pasted into.
    pub fn file_pattern(self) -> &'static str {
        match self {
            MasterKind::Product => "商品マスタ",
            MasterKind::Customer => "得意先マスタ",
        }
    }

    /// Substring an uploaded filename must carry.
    pub fn upload_marker(self) -> &'static str {
        match self {
            MasterKind::Product => "商品マスタ一覧",
            MasterKind::Customer => "得意先マスタ一覧",
        }
    }
}

/// A master CSV with every value kept as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub source: Option<String>,
}

impl MasterTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn value<'a>(&'a self, row: &'a [String], column: &str) -> Option<&'a str> {
        self.column(column).and_then(|idx| row.get(idx)).map(String::as_str)
    }
}

fn master_files(dir: &Path, kind: MasterKind) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        let is_master = path.is_file()
            && path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                name.contains(kind.file_pattern()) && name.to_lowercase().ends_with(".csv")
            });
        if is_master {
            files.push(path);
        }
    }
    Ok(files)
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

pub fn latest_master_file(dir: &Path, kind: MasterKind) -> anyhow::Result<Option<PathBuf>> {
    let files = master_files(dir, kind)?;
    Ok(files.into_iter().max_by_key(|path| modified(path)))
}

/// Loads the newest master of `kind`. A missing or unreadable file yields an
/// empty table.
pub fn load_master_csv(dir: &Path, kind: MasterKind) -> anyhow::Result<MasterTable> {
    let Some(path) = latest_master_file(dir, kind)? else {
        return Ok(MasterTable::default());
    };
    let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let text = decode_csv_bytes(&bytes);

    match parse_master_csv(&text) {
        Ok(mut table) if !table.is_empty() => {
            table.source = path.file_name().map(|n| n.to_string_lossy().into_owned());
            Ok(table)
        }
        Ok(_) => Ok(MasterTable::default()),
        Err(err) => {
            warn!(path = %path.display(), "unreadable master CSV: {err:#}");
            Ok(MasterTable::default())
        }
    }
}

/// UTF-8 (with or without BOM) first, then Shift_JIS / CP932.
pub fn decode_csv_bytes(bytes: &[u8]) -> String {
    let without_bom = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(without_bom) {
        return text.to_string();
    }
    let (text, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
    text.into_owned()
}

pub fn parse_master_csv(text: &str) -> anyhow::Result<MasterTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("master CSV has no header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("malformed master CSV row")?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(MasterTable {
        headers,
        rows,
        source: None,
    })
}

/// Stores an uploaded master, removing every previous file of the same kind.
pub fn save_master_file(
    dir: &Path,
    kind: MasterKind,
    filename: &str,
    content: &[u8],
) -> Result<PathBuf, ApiError> {
    let base_name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !base_name.contains(kind.upload_marker()) {
        return Err(ApiError::BadRequest(format!(
            "Filename must contain '{}'",
            kind.upload_marker()
        )));
    }
    if !base_name.to_lowercase().ends_with(".csv") {
        return Err(ApiError::BadRequest("Master files must be .csv".to_string()));
    }

    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for old in master_files(dir, kind)? {
        fs::remove_file(&old).with_context(|| format!("failed to remove {}", old.display()))?;
        info!(path = %old.display(), "removed previous master");
    }

    let path = dir.join(&base_name);
    fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), kind = kind.file_pattern(), "saved master");
    Ok(path)
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterInfo {
    #[serde(rename = "type")]
    pub kind: MasterKind,
    pub filename: Option<String>,
    pub rows: usize,
    pub updated_at: Option<DateTime<Local>>,
}

pub fn list_masters(dir: &Path) -> anyhow::Result<Vec<MasterInfo>> {
    MasterKind::ALL
        .into_iter()
        .map(|kind| -> anyhow::Result<MasterInfo> {
            let latest = latest_master_file(dir, kind)?;
            let rows = load_master_csv(dir, kind)?.rows.len();
            Ok(MasterInfo {
                kind,
                filename: latest
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned()),
                rows,
                updated_at: latest.as_deref().map(|p| DateTime::<Local>::from(modified(p))),
            })
        })
        .collect()
}
