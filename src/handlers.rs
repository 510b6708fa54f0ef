//! HTTP handlers. Each upload endpoint takes a multipart `file` field.

use std::sync::Arc;

use anyhow::anyhow;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::deliverables::{ExtractionReport, build_order_deliverables};
use crate::error::{ApiError, ApiResult};
use crate::masters::{self, MasterInfo, MasterKind};
use crate::order::process_order_pdf_with_ai;
use crate::seal::{SealBlock, create_seal_excel, generate_seal_data};
use crate::server::AppState;

const FILE_FIELD: &str = "file";

/// Master kind assumed when the upload names no `type`.
const DEFAULT_MASTER_KIND: &str = "product";

pub struct Upload {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct FileResponse {
    pub filename: String,
    pub data: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub template_file: FileResponse,
    pub nouhinsyo_file: FileResponse,
    pub extraction: ExtractionReport,
}

#[derive(Serialize)]
pub struct SealResponse {
    pub filename: String,
    pub file_data: String,
    pub blocks: Vec<SealBlock>,
}

#[derive(Deserialize)]
pub struct MasterQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Mamameal API is running" }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Uploaded filename with a trailing `.pdf` (any case) removed.
pub fn pdf_stem(filename: &str) -> &str {
    let cut = filename.len().saturating_sub(4);
    match filename.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".pdf") => &filename[..cut],
        _ => filename,
    }
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<Upload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(err.body_text()))?;
        return Ok(Upload { filename, bytes });
    }
    Err(ApiError::BadRequest("No file uploaded".to_string()))
}

pub async fn seal(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<SealResponse>> {
    let upload = read_upload(multipart).await?;
    info!(filename = %upload.filename, bytes = upload.bytes.len(), "seal PDF received");

    let llm = state
        .llm
        .as_ref()
        .ok_or_else(|| anyhow!("API Key is required for Gemini generation"))?;
    let blocks = generate_seal_data(llm, &state.config.seal_model, &upload.bytes).await?;

    let assets_dir = state.config.assets_dir.clone();
    let rows = blocks.clone();
    let workbook =
        tokio::task::spawn_blocking(move || create_seal_excel(&assets_dir, &rows)).await??;

    Ok(Json(SealResponse {
        filename: format!("{}_seal.xlsx", pdf_stem(&upload.filename)),
        file_data: STANDARD.encode(workbook),
        blocks,
    }))
}

pub async fn order_invoice(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<OrderResponse>> {
    let upload = read_upload(multipart).await?;
    info!(filename = %upload.filename, bytes = upload.bytes.len(), "order PDF received");

    let (ai, ai_error) = match &state.llm {
        Some(llm) => {
            match process_order_pdf_with_ai(llm, &state.config.order_model, &upload.bytes).await {
                Ok(extraction) => (Some(extraction), None),
                Err(err) => {
                    warn!("AI extraction failed, using the order table only: {err:#}");
                    (None, Some(format!("{err:#}")))
                }
            }
        }
        None => {
            warn!("GOOGLE_API_KEY not set; reading the order table without AI");
            (None, None)
        }
    };

    let assets_dir = state.config.assets_dir.clone();
    let pdf = upload.bytes.clone();
    let mut deliverables = tokio::task::spawn_blocking(move || {
        build_order_deliverables(&assets_dir, &pdf, ai)
    })
    .await??;
    deliverables.report.ai_error = ai_error;

    let stem = pdf_stem(&upload.filename);
    Ok(Json(OrderResponse {
        template_file: FileResponse {
            filename: format!("{stem}_数出表.xlsm"),
            data: STANDARD.encode(&deliverables.shipment_sheet),
        },
        nouhinsyo_file: FileResponse {
            filename: format!("{stem}_納品書.xlsx"),
            data: STANDARD.encode(&deliverables.delivery_slip),
        },
        extraction: deliverables.report,
    }))
}

pub async fn upload_master(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MasterQuery>,
    multipart: Multipart,
) -> ApiResult<Json<MessageResponse>> {
    let kind = MasterKind::parse(query.kind.as_deref().unwrap_or(DEFAULT_MASTER_KIND))?;
    let upload = read_upload(multipart).await?;

    let dir = state.config.assets_dir.clone();
    tokio::task::spawn_blocking(move || {
        masters::save_master_file(&dir, kind, &upload.filename, &upload.bytes)
    })
    .await??;

    Ok(Json(MessageResponse {
        message: "File saved successfully".to_string(),
    }))
}

pub async fn list_masters(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<MasterInfo>>> {
    let dir = state.config.assets_dir.clone();
    let listing = tokio::task::spawn_blocking(move || masters::list_masters(&dir)).await??;
    Ok(Json(listing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_drops_pdf_extension_only() {
        assert_eq!(pdf_stem("注文書.pdf"), "注文書");
        assert_eq!(pdf_stem("ORDER.PDF"), "ORDER");
        assert_eq!(pdf_stem("order.xlsx"), "order.xlsx");
        assert_eq!(pdf_stem("order.xlsx.pdf"), "order.xlsx");
        assert_eq!(pdf_stem("pdf"), "pdf");
        assert_eq!(pdf_stem(""), "");
    }
}
