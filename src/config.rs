use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use crate::play_dataset::{IfExists, LoadOptions};
use crate::win_prob::DEFAULT_TEAM;
use crate::wp_export::ExtractOptions;

pub const DEFAULT_CSV: &str = "BAL_Ravens_2024.csv";
pub const DEFAULT_DB: &str = "ravens_2024.db";
pub const DEFAULT_TABLE: &str = "ravens_2024";
pub const DEFAULT_OUT_CSV: &str = "ravens_wp.csv";
pub const DEFAULT_OUT_JSON: &str = "ravens_wp.json";

/// Loads `.env.local` then `.env` when present; missing files are fine.
pub fn load_env_files() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

/// Build a SQLite database from a play-by-play CSV file
#[derive(Parser, Debug, Clone)]
#[command(name = "build_db", version, about)]
pub struct BuildDbConfig {
    /// Path to the source CSV file
    #[arg(long, env = "PLAYS_CSV", default_value = DEFAULT_CSV)]
    pub csv: PathBuf,

    /// SQLite database output path
    #[arg(long, env = "PLAYS_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    /// Destination table name
    #[arg(long, env = "PLAYS_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Behaviour when the table already exists
    #[arg(long = "if-exists", env = "PLAYS_IF_EXISTS", value_enum, default_value_t = IfExists::Replace)]
    pub if_exists: IfExists,

    /// Rows per insert batch (chosen automatically for very large inputs)
    #[arg(long, env = "PLAYS_CHUNKSIZE")]
    pub chunksize: Option<usize>,
}

impl BuildDbConfig {
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            bail!("--table must not be empty");
        }
        if self.chunksize == Some(0) {
            bail!("--chunksize must be at least 1");
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            csv_path: self.csv.clone(),
            db_path: self.db.clone(),
            table: self.table.clone(),
            if_exists: self.if_exists,
            chunk_size: self.chunksize,
        }
    }
}

/// Extract a per-play win probability timeline for one team
#[derive(Parser, Debug, Clone)]
#[command(name = "extract_winprob", version, about)]
pub struct ExtractConfig {
    /// SQLite database produced by build_db
    #[arg(long, env = "PLAYS_DB", default_value = DEFAULT_DB)]
    pub db: PathBuf,

    /// CSV read instead when the database does not exist
    #[arg(long, env = "PLAYS_CSV", default_value = DEFAULT_CSV)]
    pub csv: PathBuf,

    /// Table holding the plays
    #[arg(long, env = "PLAYS_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Team code whose win probability is tracked
    #[arg(long, env = "TRACKED_TEAM", default_value = DEFAULT_TEAM)]
    pub team: String,

    /// Flat per-play output
    #[arg(long, env = "WP_OUT_CSV", default_value = DEFAULT_OUT_CSV)]
    pub out_csv: PathBuf,

    /// Per-game grouped output
    #[arg(long, env = "WP_OUT_JSON", default_value = DEFAULT_OUT_JSON)]
    pub out_json: PathBuf,

    /// Snap each game's final JSON win probability to its result (1 win, 0 loss)
    #[arg(long, env = "WP_SNAP_FINAL", default_value = "false")]
    pub snap_final_wp: bool,
}

impl ExtractConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tracked_team().is_empty() {
            bail!("--team must not be empty");
        }
        if self.table.trim().is_empty() {
            bail!("--table must not be empty");
        }
        Ok(())
    }

    pub fn tracked_team(&self) -> String {
        self.team.trim().to_ascii_uppercase()
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            db_path: self.db.clone(),
            csv_path: self.csv.clone(),
            table: self.table.clone(),
            team: self.tracked_team(),
            out_csv: self.out_csv.clone(),
            out_json: self.out_json.clone(),
            snap_final_wp: self.snap_final_wp,
        }
    }
}
