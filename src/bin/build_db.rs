use anyhow::Result;
use clap::Parser;

use ravens_wp::config::{self, BuildDbConfig};
use ravens_wp::{logging, play_dataset};

fn main() -> Result<()> {
    config::load_env_files();
    logging::init();

    let config = BuildDbConfig::parse();
    config.validate()?;

    let summary = play_dataset::load_csv_into_db(&config.load_options())?;

    println!(
        "Wrote {} rows to {} table '{}'",
        summary.rows_in_table,
        summary.db_path.display(),
        summary.table
    );
    println!(
        "Inserted this run: {} rows x {} columns",
        summary.rows_inserted, summary.columns
    );
    println!("row_id: {}", summary.row_id_origin);
    println!("Key: {}", summary.key_strategy);
    if !summary.dropped_columns.is_empty() {
        println!(
            "Dropped index columns: {}",
            summary.dropped_columns.join(", ")
        );
    }

    Ok(())
}
