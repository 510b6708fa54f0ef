//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bento_sheet_api::deliverables::{
    CLIENT_SHEET, DELIVERY_TEMPLATE, PASTE_SHEET, SHIPMENT_TEMPLATE,
};
use bento_sheet_api::seal::FALLBACK_SHEET;
use bento_sheet_api::workbook::{CellValue, TemplateWorkbook};
use bento_sheet_api::{AppState, Config, app};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use rust_xlsxwriter::Workbook;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "bento-test-boundary";

const ORDER_PDF: &[u8] = include_bytes!("fixtures/order_table.pdf");

fn test_app(assets: &TempDir, gemini: Option<String>) -> Router {
    let config = Config {
        assets_dir: assets.path().to_path_buf(),
        api_key: gemini.as_ref().map(|_| "test-key".to_string()),
        gemini_base_url: gemini.unwrap_or_default(),
        ..Config::default()
    };
    app(Arc::new(AppState::new(config).unwrap()))
}

/// Writes both order templates into `assets` with the sheets the app fills.
fn write_order_templates(assets: &TempDir) {
    for (file, sheets) in [
        (SHIPMENT_TEMPLATE, vec![PASTE_SHEET, "商品マスタ", "得意先マスタ", "注文弁当の抽出", CLIENT_SHEET]),
        (DELIVERY_TEMPLATE, vec![PASTE_SHEET, "得意先マスタ", "注文弁当の抽出", CLIENT_SHEET]),
    ] {
        let mut workbook = Workbook::new();
        for name in sheets {
            workbook.add_worksheet().set_name(name).unwrap();
        }
        let bytes = workbook.save_to_buffer().unwrap();
        std::fs::write(assets.path().join(file), bytes).unwrap();
    }
}

fn decode_workbook(data: &Value) -> TemplateWorkbook {
    let bytes = STANDARD.decode(data.as_str().unwrap()).unwrap();
    TemplateWorkbook::from_bytes(bytes).unwrap()
}

fn multipart(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Serves `body` with `status` for every request, standing in for Gemini.
async fn fake_gemini(status: StatusCode, body: Value) -> String {
    let router = Router::new().fallback(move || {
        let body = body.clone();
        async move { (status, axum::Json(body)) }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn gemini_answer(text: &str) -> Value {
    json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    })
}

#[tokio::test]
async fn root_and_health() {
    let assets = TempDir::new().unwrap();
    let (status, body) = send(test_app(&assets, None), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Mamameal API is running"}));

    let (status, body) = send(test_app(&assets, None), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn master_upload_rejects_unknown_type() {
    let assets = TempDir::new().unwrap();
    let request = upload(
        "/api/masters/upload?type=supplier",
        multipart("file", "商品マスタ一覧.csv", b"a,b\n"),
    );
    let (status, body) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Invalid type. Use 'product' or 'customer'.");
}

#[tokio::test]
async fn master_upload_requires_marker_in_filename() {
    let assets = TempDir::new().unwrap();
    let request = upload(
        "/api/masters/upload?type=customer",
        multipart("file", "customers.csv", b"a,b\n"),
    );
    let (status, body) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Filename must contain '得意先マスタ一覧'");
}

#[tokio::test]
async fn master_upload_replaces_previous_file() {
    let assets = TempDir::new().unwrap();
    let first = upload(
        "/api/masters/upload?type=product",
        multipart("file", "商品マスタ一覧_old.csv", "商品予定名\n赤飯\n".as_bytes()),
    );
    let (status, body) = send(test_app(&assets, None), first).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "File saved successfully"}));

    let second = upload(
        "/api/masters/upload?type=product",
        multipart("file", "商品マスタ一覧_new.csv", "商品予定名\nキャラ弁\n赤飯\n".as_bytes()),
    );
    let (status, _) = send(test_app(&assets, None), second).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!assets.path().join("商品マスタ一覧_old.csv").exists());
    assert!(assets.path().join("商品マスタ一覧_new.csv").exists());

    let (status, listing) = send(test_app(&assets, None), get("/api/masters")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing[0]["type"], "product");
    assert_eq!(listing[0]["filename"], "商品マスタ一覧_new.csv");
    assert_eq!(listing[0]["rows"], 2);
    assert_eq!(listing[1]["type"], "customer");
    assert_eq!(listing[1]["filename"], Value::Null);
}

#[tokio::test]
async fn missing_file_field_is_bad_request() {
    let assets = TempDir::new().unwrap();
    let request = upload("/api/order-invoice", multipart("document", "order.pdf", b"%PDF"));
    let (status, body) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "No file uploaded");
}

#[tokio::test]
async fn unreadable_order_pdf_is_server_error() {
    let assets = TempDir::new().unwrap();
    write_order_templates(&assets);
    let request = upload("/api/order-invoice", multipart("file", "order.pdf", b"not a pdf"));
    let (status, body) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("PDF"));
}

#[tokio::test]
async fn seal_without_api_key_is_server_error() {
    let assets = TempDir::new().unwrap();
    let request = upload("/api/seal", multipart("file", "seal.pdf", b"%PDF-1.4"));
    let (status, body) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "API Key is required for Gemini generation");
}

#[tokio::test]
async fn seal_builds_workbook_from_model_answer() {
    let assets = TempDir::new().unwrap();
    let answer = concat!(
        "```json\n{\"blocks\": [{\"client_name\": \"さくら幼稚園様\", ",
        "\"preparations\": [\"ご飯150g\"], \"class_name\": \"ばら\", ",
        "\"meal_count\": \"35+1\", \"date\": \"12/10\", \"grade\": \"年長\"},]}\n```"
    );
    let gemini = fake_gemini(StatusCode::OK, gemini_answer(answer)).await;

    let request = upload("/api/seal", multipart("file", "シール表.pdf", b"%PDF-1.4"));
    let (status, body) = send(test_app(&assets, Some(gemini)), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "シール表_seal.xlsx");
    assert_eq!(body["blocks"][0]["class_name"], "ばら");

    let workbook = decode_workbook(&body["file_data"]);
    assert_eq!(
        workbook.cell(FALLBACK_SHEET, 1, 0),
        Some(&CellValue::Text("さくら幼稚園様".into()))
    );
    assert_eq!(
        workbook.cell(FALLBACK_SHEET, 1, 2),
        Some(&CellValue::Text("ご飯150g".into()))
    );
}

#[tokio::test]
async fn gemini_failure_surfaces_as_server_error() {
    let assets = TempDir::new().unwrap();
    let gemini = fake_gemini(
        StatusCode::TOO_MANY_REQUESTS,
        json!({"error": {"code": 429, "message": "quota exhausted"}}),
    )
    .await;

    let request = upload("/api/seal", multipart("file", "seal.pdf", b"%PDF-1.4"));
    let (status, body) = send(test_app(&assets, Some(gemini)), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("quota exhausted"));
}

#[tokio::test]
async fn master_upload_defaults_to_product() {
    let assets = TempDir::new().unwrap();
    let request = upload(
        "/api/masters/upload",
        multipart("file", "商品マスタ一覧.csv", "商品予定名\n赤飯\n".as_bytes()),
    );
    let (status, _) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(assets.path().join("商品マスタ一覧.csv").exists());

    let (_, listing) = send(test_app(&assets, None), get("/api/masters")).await;
    assert_eq!(listing[0]["filename"], "商品マスタ一覧.csv");
}

#[tokio::test]
async fn order_invoice_fills_both_templates_from_the_grid() {
    let assets = TempDir::new().unwrap();
    write_order_templates(&assets);

    let request = upload("/api/order-invoice", multipart("file", "order.pdf", ORDER_PDF));
    let (status, body) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["template_file"]["filename"], "order_数出表.xlsm");
    assert_eq!(body["nouhinsyo_file"]["filename"], "order_納品書.xlsx");

    let extraction = &body["extraction"];
    assert_eq!(extraction["client_source"], "grid");
    assert_eq!(extraction["bento_source"], "empty");
    assert_eq!(extraction["ai"], Value::Null);
    assert!(extraction.get("ai_error").is_none());
    assert_eq!(extraction["grid_clients"][1]["client_name"], "Himawari");

    let shipment = decode_workbook(&body["template_file"]["data"]);
    assert_eq!(
        shipment.cell(PASTE_SHEET, 0, 0),
        Some(&CellValue::Text("Order sheet".into()))
    );
    assert_eq!(shipment.cell(CLIENT_SHEET, 1, 0), Some(&CellValue::Text("Sakura".into())));
    assert_eq!(shipment.cell(CLIENT_SHEET, 1, 1), Some(&CellValue::Number(36.0)));
    assert_eq!(shipment.cell(CLIENT_SHEET, 2, 4), Some(&CellValue::Number(1.0)));

    let slip = decode_workbook(&body["nouhinsyo_file"]["data"]);
    assert_eq!(
        slip.sheet_names(),
        vec![PASTE_SHEET, "得意先マスタ", "注文弁当の抽出", CLIENT_SHEET]
    );
    assert_eq!(slip.cell(PASTE_SHEET, 2, 1), Some(&CellValue::Text("Chara".into())));
    assert_eq!(slip.cell(CLIENT_SHEET, 2, 0), Some(&CellValue::Text("Himawari".into())));
}

#[tokio::test]
async fn order_invoice_without_templates_is_server_error() {
    let assets = TempDir::new().unwrap();
    let request = upload("/api/order-invoice", multipart("file", "order.pdf", ORDER_PDF));
    let (status, body) = send(test_app(&assets, None), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Template files not found");
}

#[tokio::test]
async fn order_invoice_falls_back_to_the_grid_when_gemini_fails() {
    let assets = TempDir::new().unwrap();
    write_order_templates(&assets);
    let gemini = fake_gemini(
        StatusCode::TOO_MANY_REQUESTS,
        json!({"error": {"code": 429, "message": "quota exhausted"}}),
    )
    .await;

    let request = upload("/api/order-invoice", multipart("file", "order.pdf", ORDER_PDF));
    let (status, body) = send(test_app(&assets, Some(gemini)), request).await;
    assert_eq!(status, StatusCode::OK);

    let extraction = &body["extraction"];
    assert_eq!(extraction["client_source"], "grid");
    assert_eq!(extraction["ai"], Value::Null);
    assert!(extraction["ai_error"].as_str().unwrap().contains("quota exhausted"));
    assert_eq!(extraction["grid_clients"][0]["client_name"], "Sakura");
}
