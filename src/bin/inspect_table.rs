use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use bento_sheet_api::pdf_text::first_page_grid;
use bento_sheet_api::table_extractor::extract_client_table_from_pdf;
use clap::Parser;

/// Prints the order grid and client rows read from the first page of a PDF.
#[derive(Parser, Debug)]
#[command(name = "inspect-table", version)]
struct Args {
    /// Order PDF to inspect
    pdf: PathBuf,

    /// Grid rows to print
    #[arg(long, default_value_t = 10)]
    rows: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let bytes = fs::read(&args.pdf)
        .with_context(|| format!("failed to read {}", args.pdf.display()))?;

    let grid = first_page_grid(&bytes)?;
    println!("=== first page grid ({} rows) ===", grid.rows.len());
    for (i, row) in grid.rows.iter().take(args.rows).enumerate() {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| cell.as_deref().unwrap_or("").replace('\n', "|"))
            .collect();
        println!("{i}: {cells:?}");
    }

    let clients = extract_client_table_from_pdf(&bytes)?;
    println!("\n=== clients ({}) ===", clients.len());
    for client in &clients {
        println!(
            "{} {}: students {} teachers {}",
            client.client_id.as_deref().unwrap_or("-"),
            client.client_name,
            client.student_total(),
            client.teacher_total()
        );
    }

    Ok(())
}
