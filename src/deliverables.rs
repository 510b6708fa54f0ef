//! Population of the shipment sheet (数出表) and delivery slip (納品書).

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::masters::{MasterKind, MasterTable, load_master_csv};
use crate::order::{Discrepancy, OrderExtraction, OrderKind, name_key, reconcile};
use crate::pdf_text::{first_page_grid, paste_rows};
use crate::table_extractor::{GridClient, MealCounts, extract_client_table};
use crate::workbook::{CellValue, SheetData, TemplateWorkbook};

pub const SHIPMENT_TEMPLATE: &str = "template.xlsm";
pub const DELIVERY_TEMPLATE: &str = "nouhinsyo.xlsx";

pub const PASTE_SHEET: &str = "貼り付け用";
pub const BENTO_SHEET: &str = "注文弁当の抽出";
pub const CLIENT_SHEET: &str = "クライアント抽出";

/// Bento columns carried into the client sheet.
pub const CLIENT_COLUMNS: usize = 3;

const PLANNED_NAME: &str = "商品予定名";
const BREAD_BOX_QTY: &str = "パン箱入数";
const UNIT_PRICE: &str = "売価単価";
const BENTO_CATEGORY: &str = "弁当区分";
const PRODUCT_NAME: &str = "商品名";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BentoRow {
    pub planned_name: String,
    pub bread_box_qty: String,
    pub unit_price: String,
    pub category: String,
}

/// Looks up each bento name in the product master: exact `商品予定名` first,
/// then containment in either direction.
pub fn match_bento_data(names: &[String], master: &MasterTable) -> Vec<BentoRow> {
    names
        .iter()
        .map(|name| {
            let wanted = name_key(name);
            let planned =
                |row: &[String]| name_key(master.value(row, PLANNED_NAME).unwrap_or_default());

            let found = master
                .rows
                .iter()
                .find(|row| planned(row.as_slice()) == wanted)
                .or_else(|| {
                    master.rows.iter().find(|row| {
                        let key = planned(row.as_slice());
                        !key.is_empty()
                            && !wanted.is_empty()
                            && (key.contains(&wanted) || wanted.contains(&key))
                    })
                });

            match found {
                Some(row) => BentoRow {
                    planned_name: master.value(row, PLANNED_NAME).unwrap_or(name).to_string(),
                    bread_box_qty: master.value(row, BREAD_BOX_QTY).unwrap_or_default().to_string(),
                    unit_price: master.value(row, UNIT_PRICE).unwrap_or_default().to_string(),
                    category: master.value(row, BENTO_CATEGORY).unwrap_or_default().to_string(),
                },
                None => BentoRow {
                    planned_name: name.clone(),
                    ..BentoRow::default()
                },
            }
        })
        .collect()
}

pub fn bento_sheet(rows: &[BentoRow]) -> SheetData {
    SheetData {
        headers: [PLANNED_NAME, BREAD_BOX_QTY, UNIT_PRICE, BENTO_CATEGORY]
            .map(str::to_string)
            .to_vec(),
        rows: rows
            .iter()
            .map(|r| {
                vec![
                    r.planned_name.clone().into(),
                    r.bread_box_qty.clone().into(),
                    r.unit_price.clone().into(),
                    r.category.clone().into(),
                ]
            })
            .collect(),
    }
}

/// Bento frame of the delivery slip, with `商品名` taken from the first
/// master row of each `商品予定名`. `None` when the master has no `商品名`.
pub fn delivery_bento_sheet(rows: &[BentoRow], master: &MasterTable) -> Option<SheetData> {
    if master.is_empty() || master.column(PRODUCT_NAME).is_none() {
        return None;
    }
    let product_name = |planned: &str| {
        master
            .rows
            .iter()
            .find(|row| master.value(row, PLANNED_NAME) == Some(planned))
            .and_then(|row| master.value(row, PRODUCT_NAME))
            .unwrap_or_default()
            .to_string()
    };

    Some(SheetData {
        headers: [PLANNED_NAME, BREAD_BOX_QTY, PRODUCT_NAME].map(str::to_string).to_vec(),
        rows: rows
            .iter()
            .map(|r| {
                vec![
                    r.planned_name.clone().into(),
                    r.bread_box_qty.clone().into(),
                    product_name(&r.planned_name).into(),
                ]
            })
            .collect(),
    })
}

pub fn client_sheet(clients: &[GridClient], bento_headers: &[String]) -> SheetData {
    let mut headers = vec!["クライアント名".to_string()];
    for i in 0..CLIENT_COLUMNS {
        headers.push(match bento_headers.get(i) {
            Some(name) => format!("{name}\n(園児)"),
            None => format!("園児の給食の数{}", i + 1),
        });
    }
    for i in 0..CLIENT_COLUMNS {
        headers.push(match bento_headers.get(i) {
            Some(name) => format!("{name}\n(先生)"),
            None => format!("先生の給食の数{}", i + 1),
        });
    }

    let rows = clients
        .iter()
        .map(|client| {
            let cell = |i: usize, pick: fn(&MealCounts) -> u32| {
                client
                    .counts
                    .get(i)
                    .map_or(CellValue::Text(String::new()), |c| pick(c).into())
            };
            let mut row: Vec<CellValue> = vec![client.client_name.clone().into()];
            row.extend((0..CLIENT_COLUMNS).map(|i| cell(i, |c| c.student)));
            row.extend((0..CLIENT_COLUMNS).map(|i| cell(i, |c| c.teacher)));
            row
        })
        .collect();

    SheetData { headers, rows }
}

/// AI clients folded into single-column grid rows, for PDFs whose grid
/// cannot be read.
pub fn ai_clients_as_grid(ai: &OrderExtraction) -> Vec<GridClient> {
    ai.clients
        .iter()
        .filter(|c| !c.client_name.trim().is_empty())
        .map(|c| GridClient {
            client_id: c.client_id.clone(),
            client_name: c.client_name.trim().to_string(),
            counts: vec![MealCounts {
                student: c.total(OrderKind::Student),
                teacher: c.total(OrderKind::Teacher),
            }],
        })
        .collect()
}

pub fn master_sheet(master: &MasterTable) -> SheetData {
    SheetData {
        headers: master.headers.clone(),
        rows: master
            .rows
            .iter()
            .map(|row| row.iter().cloned().map(CellValue::Text).collect())
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Ai,
    Grid,
    Empty,
}

/// What was extracted from the order PDF and where each part came from.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub client_source: Source,
    pub bento_source: Source,
    pub bento_names: Vec<String>,
    pub ai: Option<OrderExtraction>,
    /// Why the AI extraction is missing when it was attempted and failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_error: Option<String>,
    pub grid_clients: Vec<GridClient>,
    pub discrepancies: Vec<Discrepancy>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderSheets {
    pub paste_rows: Vec<Vec<String>>,
    pub bentos: Vec<BentoRow>,
    pub clients: SheetData,
    pub product_master: MasterTable,
    pub customer_master: MasterTable,
}

#[derive(Debug)]
pub struct OrderDeliverables {
    pub shipment_sheet: Vec<u8>,
    pub delivery_slip: Vec<u8>,
    pub report: ExtractionReport,
}

pub fn template_paths(assets_dir: &Path) -> Result<(PathBuf, PathBuf), ApiError> {
    let shipment = assets_dir.join(SHIPMENT_TEMPLATE);
    let delivery = assets_dir.join(DELIVERY_TEMPLATE);
    if !shipment.is_file() || !delivery.is_file() {
        return Err(ApiError::Internal(anyhow!("Template files not found")));
    }
    Ok((shipment, delivery))
}

/// Reads the order grid, cross-checks it against the AI extraction when one
/// is given, and fills both templates.
pub fn build_order_deliverables(
    assets_dir: &Path,
    pdf_bytes: &[u8],
    ai: Option<OrderExtraction>,
) -> Result<OrderDeliverables, ApiError> {
    let (shipment_path, delivery_path) = template_paths(assets_dir)?;
    let product_master = load_master_csv(assets_dir, MasterKind::Product)?;
    let customer_master = load_master_csv(assets_dir, MasterKind::Customer)?;

    let pasted = paste_rows(pdf_bytes)?;
    if pasted.is_empty() {
        return Err(ApiError::BadRequest(
            "Failed to extract data from PDF for paste sheet".to_string(),
        ));
    }

    let grid = first_page_grid(pdf_bytes)?;
    let grid_clients = extract_client_table(&grid);

    let discrepancies = ai
        .as_ref()
        .map(|ai| reconcile(ai, &grid_clients))
        .unwrap_or_default();

    let (clients, client_source) = if !grid_clients.is_empty() {
        (grid_clients.clone(), Source::Grid)
    } else if let Some(ai) = ai.as_ref().filter(|ai| !ai.clients.is_empty()) {
        warn!("no client rows in the table grid; using AI counts");
        (ai_clients_as_grid(ai), Source::Ai)
    } else {
        (Vec::new(), Source::Empty)
    };

    let ai_names = ai.as_ref().map(OrderExtraction::bento_names).unwrap_or_default();
    let (bento_names, bento_source) = if !ai_names.is_empty() {
        (ai_names, Source::Ai)
    } else {
        let legacy = grid.bento_header_cells();
        let source = if legacy.is_empty() { Source::Empty } else { Source::Grid };
        (legacy, source)
    };

    info!(
        clients = clients.len(),
        bentos = bento_names.len(),
        discrepancies = discrepancies.len(),
        "order PDF extracted"
    );

    let sheets = OrderSheets {
        paste_rows: pasted,
        bentos: match_bento_data(&bento_names, &product_master),
        clients: client_sheet(&clients, &bento_names),
        product_master,
        customer_master,
    };

    let shipment_sheet = build_shipment_sheet(TemplateWorkbook::open(&shipment_path)?, &sheets)?;
    let delivery_slip = build_delivery_slip(TemplateWorkbook::open(&delivery_path)?, &sheets)?;

    Ok(OrderDeliverables {
        shipment_sheet,
        delivery_slip,
        report: ExtractionReport {
            client_source,
            bento_source,
            bento_names,
            ai,
            ai_error: None,
            grid_clients,
            discrepancies,
        },
    })
}

fn paste_master(
    workbook: &mut TemplateWorkbook,
    master: &MasterTable,
    kind: MasterKind,
) -> anyhow::Result<()> {
    let sheet = kind.file_pattern();
    if !master.is_empty() && workbook.has_sheet(sheet) {
        workbook.paste_table(sheet, &master_sheet(master))?;
    }
    Ok(())
}

fn write_paste_rows(workbook: &mut TemplateWorkbook, rows: &[Vec<String>]) -> anyhow::Result<()> {
    let rows: Vec<Vec<CellValue>> = rows
        .iter()
        .map(|row| row.iter().map(|cell| cell.as_str().into()).collect())
        .collect();
    workbook.clear_sheet(PASTE_SHEET)?;
    workbook.write_rows(PASTE_SHEET, 0, &rows)
}

fn paste_if_present(
    workbook: &mut TemplateWorkbook,
    sheet: &str,
    data: &SheetData,
) -> anyhow::Result<()> {
    if workbook.has_sheet(sheet) {
        workbook.paste_table(sheet, data)?;
    }
    Ok(())
}

pub fn build_shipment_sheet(
    mut workbook: TemplateWorkbook,
    sheets: &OrderSheets,
) -> anyhow::Result<Vec<u8>> {
    paste_master(&mut workbook, &sheets.product_master, MasterKind::Product)?;
    paste_master(&mut workbook, &sheets.customer_master, MasterKind::Customer)?;
    write_paste_rows(&mut workbook, &sheets.paste_rows)?;
    if !sheets.bentos.is_empty() {
        paste_if_present(&mut workbook, BENTO_SHEET, &bento_sheet(&sheets.bentos))?;
    }
    if !sheets.clients.rows.is_empty() {
        paste_if_present(&mut workbook, CLIENT_SHEET, &sheets.clients)?;
    }
    workbook.save_to_buffer()
}

pub fn build_delivery_slip(
    mut workbook: TemplateWorkbook,
    sheets: &OrderSheets,
) -> anyhow::Result<Vec<u8>> {
    paste_master(&mut workbook, &sheets.customer_master, MasterKind::Customer)?;
    write_paste_rows(&mut workbook, &sheets.paste_rows)?;
    if !sheets.bentos.is_empty() {
        if let Some(data) = delivery_bento_sheet(&sheets.bentos, &sheets.product_master) {
            paste_if_present(&mut workbook, BENTO_SHEET, &data)?;
        }
    }
    if !sheets.clients.rows.is_empty() {
        paste_if_present(&mut workbook, CLIENT_SHEET, &sheets.clients)?;
    }
    workbook.save_to_buffer()
}
