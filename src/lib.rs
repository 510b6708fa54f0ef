pub mod config;
pub mod counts;
pub mod deliverables;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod masters;
pub mod order;
pub mod pdf_text;
pub mod seal;
pub mod server;
pub mod table_extractor;
pub mod workbook;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{AppState, app, run_server};
