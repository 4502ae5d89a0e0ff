use anyhow::Result;
use clap::Parser;

use ravens_wp::config::{self, ExtractConfig};
use ravens_wp::{logging, wp_export};

fn main() -> Result<()> {
    config::load_env_files();
    logging::init();

    let config = ExtractConfig::parse();
    config.validate()?;

    let summary = wp_export::export_win_probability(&config.extract_options())?;

    println!(
        "Extracted {} rows across {} games -> {}, {}",
        summary.rows,
        summary.games,
        summary.out_csv.display(),
        summary.out_json.display()
    );
    println!("Source: {}", summary.source);
    println!(
        "Most exciting game: {}",
        summary.highlight.as_deref().unwrap_or("n/a")
    );

    Ok(())
}
