//! Sticker-sheet ("seal") PDFs to an Excel roster.

use std::path::Path;

use anyhow::bail;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::GeminiClient;
use crate::workbook::{CellValue, TemplateWorkbook};

pub const SEAL_TEMPLATE: &str = "seal.xlsx";
pub const SEAL_DATA_SHEET: &str = "Gemini抽出データ";
pub const FALLBACK_SHEET: &str = "シールデータ";
pub const SEAL_HEADERS: [&str; 6] = ["クライアント名", "クラス名", "準備物", "弁当数", "日付", "学年"];

pub const SEAL_PROMPT: &str = r#"
このPDFはシール表です。横4つ × 縦5つ(合計約20個)のブロックで構成されています。
各ブロックには以下の情報が含まれています:
1. クライアント名 (最上部): 小学校名または幼稚園名 + 「様」
2. 準備物 (クライアント名のすぐ下): パン箱入数、ご飯150gなど
3. クラス名 (中央、大きめの文字): チューリップ、さくらなど
4. 弁当数 (クラス名の下): 数値(例: 35、35+1)
5. 日付 (ブロック左下): MM/DD形式
6. 学年 (ブロック右下): 年長、年中など

以下のJSON形式で、全てのブロック情報を抽出してください:
{
  "blocks": [
    {
      "client_name": "博多南衆参コース様",
      "preparations": ["パン箱入数", "ご飯150g"],
      "class_name": "チューリップ",
      "meal_count": "35",
      "date": "12/10",
      "grade": "年長"
    }
  ]
}
重要: 全てのブロックを抽出してください。完全で有効なJSONのみを返してください。
"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealBlock {
    #[serde(default, deserialize_with = "text_or_number")]
    pub client_name: String,
    #[serde(default, deserialize_with = "lenient_preparations")]
    pub preparations: Preparations,
    #[serde(default, deserialize_with = "text_or_number")]
    pub class_name: String,
    /// Kept as written (e.g. `"35+1"`); the sticker shows the literal text.
    #[serde(default, deserialize_with = "text_or_number")]
    pub meal_count: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub date: String,
    #[serde(default, deserialize_with = "text_or_number")]
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Preparations {
    List(Vec<String>),
    Text(String),
}

impl Default for Preparations {
    fn default() -> Self {
        Preparations::List(Vec::new())
    }
}

impl Preparations {
    pub fn joined(&self) -> String {
        match self {
            Preparations::List(items) => items.join(", "),
            Preparations::Text(text) => text.clone(),
        }
    }
}

impl SealBlock {
    fn row(&self) -> [String; 6] {
        [
            self.client_name.clone(),
            self.class_name.clone(),
            self.preparations.joined(),
            self.meal_count.clone(),
            self.date.clone(),
            self.grade.clone(),
        ]
    }
}

fn lenient_preparations<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Preparations, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Preparations::List(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
        ),
        Value::String(s) => Preparations::Text(s),
        Value::Number(n) => Preparations::Text(n.to_string()),
        _ => Preparations::default(),
    })
}

fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Accepts either a bare list of blocks or `{"blocks": [...]}`.
pub fn parse_seal_blocks(value: Value) -> anyhow::Result<Vec<SealBlock>> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("blocks") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => bail!("'blocks' is not a list"),
        },
        _ => bail!("seal response is neither a list nor an object"),
    };
    let blocks = list
        .into_iter()
        .map(serde_json::from_value::<SealBlock>)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(blocks)
}

pub async fn generate_seal_data(
    client: &GeminiClient,
    model: &str,
    pdf_bytes: &[u8],
) -> anyhow::Result<Vec<SealBlock>> {
    let value = client.generate_json(model, pdf_bytes, SEAL_PROMPT).await?;
    let blocks = parse_seal_blocks(value)?;
    info!(blocks = blocks.len(), "seal blocks extracted");
    Ok(blocks)
}

/// Writes the blocks into `seal.xlsx` when it exists, otherwise into a new
/// workbook.
pub fn create_seal_excel(assets_dir: &Path, blocks: &[SealBlock]) -> anyhow::Result<Vec<u8>> {
    let template_path = assets_dir.join(SEAL_TEMPLATE);
    if template_path.is_file() {
        match TemplateWorkbook::open(&template_path).and_then(|wb| fill_template(wb, blocks)) {
            Ok(bytes) => return Ok(bytes),
            Err(err) => warn!("seal template unusable, falling back to a new workbook: {err:#}"),
        }
    }

    let mut workbook = TemplateWorkbook::new();
    workbook.ensure_sheet(FALLBACK_SHEET, 0);
    write_blocks(&mut workbook, FALLBACK_SHEET, blocks)?;
    workbook.save_to_buffer()
}

fn fill_template(mut workbook: TemplateWorkbook, blocks: &[SealBlock]) -> anyhow::Result<Vec<u8>> {
    workbook.ensure_sheet(SEAL_DATA_SHEET, 0);
    workbook.clear_rows_from(SEAL_DATA_SHEET, 1)?;
    write_blocks(&mut workbook, SEAL_DATA_SHEET, blocks)?;
    workbook.save_to_buffer()
}

fn write_blocks(
    workbook: &mut TemplateWorkbook,
    sheet: &str,
    blocks: &[SealBlock],
) -> anyhow::Result<()> {
    let header: Vec<CellValue> = SEAL_HEADERS.iter().map(|h| (*h).into()).collect();
    workbook.write_rows(sheet, 0, &[header])?;
    let rows: Vec<Vec<CellValue>> = blocks
        .iter()
        .map(|block| block.row().into_iter().map(CellValue::Text).collect())
        .collect();
    workbook.write_rows(sheet, 1, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_xlsxwriter::Workbook;
    use serde_json::json;

    fn blocks() -> Vec<SealBlock> {
        parse_seal_blocks(json!({
            "blocks": [
                {
                    "client_name": "さくら幼稚園様",
                    "preparations": ["パン箱入数", "ご飯150g"],
                    "class_name": "チューリップ",
                    "meal_count": "35+1",
                    "date": "12/10",
                    "grade": "年長"
                },
                {"client_name": "ひまわり園様", "preparations": "ご飯150g", "meal_count": 20}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn blocks_accept_lists_strings_and_numbers() {
        let blocks = blocks();
        assert_eq!(blocks[0].preparations.joined(), "パン箱入数, ご飯150g");
        assert_eq!(blocks[1].preparations.joined(), "ご飯150g");
        assert_eq!(blocks[1].meal_count, "20");
        assert_eq!(blocks[1].grade, "");
    }

    #[test]
    fn bare_list_and_missing_blocks() {
        let list = parse_seal_blocks(json!([{"class_name": "さくら"}])).unwrap();
        assert_eq!(list[0].class_name, "さくら");
        assert!(parse_seal_blocks(json!({})).unwrap().is_empty());
        assert!(parse_seal_blocks(json!("text")).is_err());
    }

    #[test]
    fn null_fields_are_blank() {
        let blocks = parse_seal_blocks(json!({"blocks": [{
            "client_name": null,
            "preparations": null,
            "class_name": "ばら",
            "meal_count": null
        }, {
            "preparations": ["ご飯150g", null, 2]
        }]}))
        .unwrap();
        assert_eq!(blocks[0].client_name, "");
        assert_eq!(blocks[0].preparations.joined(), "");
        assert_eq!(blocks[0].meal_count, "");
        assert_eq!(blocks[1].preparations.joined(), "ご飯150g, 2");
        assert!(parse_seal_blocks(json!({"blocks": null})).unwrap().is_empty());
    }

    #[test]
    fn fallback_workbook_without_template() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = create_seal_excel(dir.path(), &blocks()).unwrap();
        let written = TemplateWorkbook::from_bytes(bytes).unwrap();
        assert_eq!(written.sheet_names(), vec![FALLBACK_SHEET]);
        assert_eq!(written.cell(FALLBACK_SHEET, 0, 2), Some(&CellValue::Text("準備物".into())));
        assert_eq!(written.cell(FALLBACK_SHEET, 1, 3), Some(&CellValue::Text("35+1".into())));
        assert_eq!(written.cell(FALLBACK_SHEET, 2, 0), Some(&CellValue::Text("ひまわり園様".into())));
    }

    #[test]
    fn template_data_sheet_is_cleared_and_refilled() {
        let dir = tempfile::tempdir().unwrap();
        let mut template = Workbook::new();
        let layout = template.add_worksheet();
        layout.set_name("印刷").unwrap();
        layout.write_string(0, 0, "layout").unwrap();
        let data = template.add_worksheet();
        data.set_name(SEAL_DATA_SHEET).unwrap();
        data.write_string(0, 0, "old header").unwrap();
        for row in 1..10 {
            data.write_string(row, 0, "stale").unwrap();
        }
        template.save(dir.path().join(SEAL_TEMPLATE)).unwrap();

        let bytes = create_seal_excel(dir.path(), &blocks()).unwrap();
        let written = TemplateWorkbook::from_bytes(bytes).unwrap();
        assert_eq!(written.sheet_names(), vec!["印刷", SEAL_DATA_SHEET]);
        assert_eq!(written.cell("印刷", 0, 0), Some(&CellValue::Text("layout".into())));
        assert_eq!(written.cell(SEAL_DATA_SHEET, 0, 0), Some(&CellValue::Text("クライアント名".into())));
        assert_eq!(written.cell(SEAL_DATA_SHEET, 1, 1), Some(&CellValue::Text("チューリップ".into())));
        assert_eq!(written.cell(SEAL_DATA_SHEET, 5, 0), None);
    }

    #[test]
    fn missing_data_sheet_is_created_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut template = Workbook::new();
        template.add_worksheet().set_name("印刷").unwrap();
        template.save(dir.path().join(SEAL_TEMPLATE)).unwrap();

        let bytes = create_seal_excel(dir.path(), &[]).unwrap();
        let written = TemplateWorkbook::from_bytes(bytes).unwrap();
        assert_eq!(written.sheet_names(), vec![SEAL_DATA_SHEET, "印刷"]);
    }
}
