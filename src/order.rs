//! LLM extraction of order PDFs and its cross-check against the table grid.

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::counts::{normalize_digits, parse_count};
use crate::llm::{GeminiClient, null_as_default};
use crate::table_extractor::GridClient;

pub const ORDER_PROMPT: &str = r#"
You are an expert data extraction assistant.
Analyze this PDF (Delivery Slip / Order Sheet) and extract the following information into a structured JSON format.

**Goal:** Extract client orders and bento (meal) details.

**Required JSON Structure:**
{
  "bento_headers": ["Bento column titles of the order table, left to right"],
  "clients": [
    {
      "client_name": "Name of the kindergarten/school (e.g., XX幼稚園, XX小学校)",
      "client_id": "Client ID if visible (e.g., 10001), else null",
      "orders": [
        {
          "type": "student",
          "count": 12
        }
      ]
    }
  ],
  "bentos": [
    {
        "name": "Name of the bento/item (e.g., 普通食, 調整食, etc.)",
        "count": 5
    }
  ]
}

**Rules:**
- "Client Name" is usually a facility name ending in 園 or 学校.
- "Orders" are counts of meals. "type" is "student" (園児) or "teacher" (先生/職員).
- If there is a table listing Bento types (e.g., ご飯あり, おかずのみ), extract them into "bentos" and their column titles into "bento_headers".
- Ignore page numbers or footer text.
- Normalize numbers (convert full-width to half-width).
- If a count is written like "35+1", calculate the sum (36).

Return ONLY valid JSON.
"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderExtraction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub clients: Vec<AiClient>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bentos: Vec<AiBento>,
    #[serde(default, deserialize_with = "deserialize_names")]
    pub bento_headers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiClient {
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_name: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub orders: Vec<AiOrder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiOrder {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: OrderKind,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum OrderKind {
    #[default]
    Student,
    Teacher,
}

impl From<String> for OrderKind {
    fn from(label: String) -> Self {
        let label = label.trim().to_lowercase();
        if label == "teacher" || label.contains('先') || label.contains("職員") {
            OrderKind::Teacher
        } else {
            OrderKind::Student
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiBento {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub count: u32,
}

impl AiClient {
    pub fn total(&self, kind: OrderKind) -> u32 {
        self.orders
            .iter()
            .filter(|order| order.kind == kind)
            .fold(0, |sum, order| sum.saturating_add(order.count))
    }
}

impl OrderExtraction {
    /// Bento column titles, falling back to the names in `bentos`.
    pub fn bento_names(&self) -> Vec<String> {
        if !self.bento_headers.is_empty() {
            return self.bento_headers.clone();
        }
        self.bentos
            .iter()
            .map(|b| b.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

pub async fn process_order_pdf_with_ai(
    client: &GeminiClient,
    model: &str,
    pdf_bytes: &[u8],
) -> anyhow::Result<OrderExtraction> {
    let value = client.generate_json(model, pdf_bytes, ORDER_PROMPT).await?;
    let extraction = parse_order_extraction(value)?;
    debug!(
        clients = extraction.clients.len(),
        bentos = extraction.bentos.len(),
        "AI order extraction finished"
    );
    Ok(extraction)
}

pub fn parse_order_extraction(value: Value) -> anyhow::Result<OrderExtraction> {
    serde_json::from_value(value).context("AI response does not match the order structure")
}

/// A client whose AI totals disagree with the rule-based grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub client_name: String,
    pub client_id: Option<String>,
    pub ai_students: u32,
    pub grid_students: u32,
    pub ai_teachers: u32,
    pub grid_teachers: u32,
}

pub fn reconcile(ai: &OrderExtraction, grid: &[GridClient]) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();
    for client in &ai.clients {
        let Some(matched) = find_grid_client(client, grid) else {
            debug!(client = %client.client_name, "no grid row for AI client");
            continue;
        };
        let ai_students = client.total(OrderKind::Student);
        let ai_teachers = client.total(OrderKind::Teacher);
        let grid_students = matched.student_total();
        let grid_teachers = matched.teacher_total();
        if ai_students != grid_students || ai_teachers != grid_teachers {
            warn!(
                client = %client.client_name,
                ai_students, grid_students, ai_teachers, grid_teachers,
                "AI and grid counts disagree"
            );
            discrepancies.push(Discrepancy {
                client_name: client.client_name.clone(),
                client_id: client.client_id.clone().or_else(|| matched.client_id.clone()),
                ai_students,
                grid_students,
                ai_teachers,
                grid_teachers,
            });
        }
    }
    discrepancies
}

fn find_grid_client<'a>(client: &AiClient, grid: &'a [GridClient]) -> Option<&'a GridClient> {
    if let Some(id) = client.client_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        if let Some(found) = grid.iter().find(|g| g.client_id.as_deref() == Some(id)) {
            return Some(found);
        }
    }
    let wanted = name_key(&client.client_name);
    if wanted.is_empty() {
        return None;
    }
    grid.iter().find(|g| name_key(&g.client_name) == wanted)
}

/// Whitespace-insensitive comparison key for facility names.
pub fn name_key(name: &str) -> String {
    normalize_digits(name).chars().filter(|c| !c.is_whitespace()).collect()
}

fn deserialize_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(count_from_value(&value))
}

pub fn count_from_value(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
        Value::String(s) => parse_count(s),
        _ => 0,
    }
}

fn deserialize_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() && s.trim() != "null" => {
            Some(s.trim().to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn deserialize_names<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => {
                map.get("name").and_then(Value::as_str).map(|s| s.trim().to_string())
            }
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .collect())
}
