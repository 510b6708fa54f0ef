use bento_sheet_api::server::init_tracing;
use bento_sheet_api::{Config, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Process-wide crypto provider for rustls.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = Config::from_env()?;
    run_server(config).await
}
