use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::DatasetError;
use crate::excitement::{self, GameResult, GameSummary};
use crate::play_dataset;
use crate::win_prob::{self, PlayRecord, SourcePlay};

pub const CSV_HEADERS: &[&str] = &[
    "game_id",
    "season_type",
    "week",
    "home_team",
    "away_team",
    "minutes_elapsed",
    "minutes_remaining",
    "win_prob",
    "ravens_score",
    "opponent_score",
    "play_desc",
];

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub db_path: PathBuf,
    pub csv_path: PathBuf,
    pub table: String,
    pub team: String,
    pub out_csv: PathBuf,
    pub out_json: PathBuf,
    pub snap_final_wp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaySource {
    Store(PathBuf),
    Csv(PathBuf),
}

impl fmt::Display for PlaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaySource::Store(path) => write!(f, "store {}", path.display()),
            PlaySource::Csv(path) => write!(f, "csv {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractSummary {
    pub source: PlaySource,
    pub rows: usize,
    pub games: usize,
    pub highlight: Option<String>,
    pub out_csv: PathBuf,
    pub out_json: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct GamesPayload<'a> {
    pub games: Vec<GameEntry<'a>>,
    pub most_exciting_game_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct GameEntry<'a> {
    pub game_id: &'a str,
    pub season_type: Option<&'a str>,
    pub week: Option<i64>,
    pub home_team: &'a str,
    pub away_team: &'a str,
    pub result: Option<GameResult>,
    pub final_wp: Option<f64>,
    pub points: Points,
    pub metrics: Metrics,
    pub highlight: bool,
    pub plays: &'a [PlayRecord],
}

#[derive(Debug, Serialize)]
pub struct Points {
    pub ravens: Option<i64>,
    pub opponent: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Metrics {
    pub lead_changes: usize,
    pub amplitude: f64,
}

pub fn export_win_probability(opts: &ExtractOptions) -> Result<ExtractSummary> {
    let (source, sources) = load_sources(opts)?;
    let plays = win_prob::derive_plays(&sources, &opts.team);
    if plays.is_empty() {
        warn!(team = %opts.team, "no qualifying plays; writing empty outputs");
    }

    write_plays_csv(&opts.out_csv, &plays)?;

    let mut games = excitement::summarize_games(&plays, opts.snap_final_wp);
    let highlight = excitement::mark_highlight(&mut games);
    write_games_json(&opts.out_json, &games)?;

    info!(
        rows = plays.len(),
        games = games.len(),
        highlight = highlight.as_deref().unwrap_or("none"),
        "win probability extracted"
    );

    Ok(ExtractSummary {
        source,
        rows: plays.len(),
        games: games.len(),
        highlight,
        out_csv: opts.out_csv.clone(),
        out_json: opts.out_json.clone(),
    })
}

fn load_sources(opts: &ExtractOptions) -> Result<(PlaySource, Vec<SourcePlay>)> {
    if opts.db_path.exists() {
        let conn = play_dataset::open_db_read_only(&opts.db_path)?;
        let sources = win_prob::load_source_plays(&conn, &opts.table, &opts.team)
            .with_context(|| format!("read plays from {}", opts.db_path.display()))?;
        return Ok((PlaySource::Store(opts.db_path.clone()), sources));
    }
    if opts.csv_path.exists() {
        warn!(
            db = %opts.db_path.display(),
            csv = %opts.csv_path.display(),
            "store not found; reading plays from csv"
        );
        let table = play_dataset::read_csv_table(&opts.csv_path)?;
        let sources = win_prob::source_plays_from_table(&table)
            .with_context(|| format!("read plays from {}", opts.csv_path.display()))?;
        return Ok((PlaySource::Csv(opts.csv_path.clone()), sources));
    }
    Err(DatasetError::MissingInput(opts.db_path.clone()).into())
}

pub fn write_plays_csv(path: &Path, plays: &[PlayRecord]) -> Result<()> {
    let mut df = plays_frame(plays).context("build play frame")?;
    let mut file = create_output(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .with_context(|| format!("write csv {}", path.display()))?;
    Ok(())
}

fn plays_frame(plays: &[PlayRecord]) -> PolarsResult<DataFrame> {
    let game_id: Vec<&str> = plays.iter().map(|p| p.game_id.as_str()).collect();
    let season_type: Vec<Option<&str>> = plays.iter().map(|p| p.season_type.as_deref()).collect();
    let week: Vec<Option<i64>> = plays.iter().map(|p| p.week).collect();
    let home_team: Vec<&str> = plays.iter().map(|p| p.home_team.as_str()).collect();
    let away_team: Vec<&str> = plays.iter().map(|p| p.away_team.as_str()).collect();
    let minutes_elapsed: Vec<f64> = plays.iter().map(|p| p.minutes_elapsed).collect();
    let minutes_remaining: Vec<f64> = plays.iter().map(|p| p.minutes_remaining).collect();
    let win_prob: Vec<f64> = plays.iter().map(|p| p.win_prob).collect();
    let team_score: Vec<Option<i64>> = plays.iter().map(|p| p.team_score).collect();
    let opponent_score: Vec<Option<i64>> = plays.iter().map(|p| p.opponent_score).collect();
    let play_desc: Vec<Option<&str>> = plays.iter().map(|p| p.play_desc.as_deref()).collect();

    DataFrame::new(vec![
        Column::new(CSV_HEADERS[0].into(), game_id),
        Column::new(CSV_HEADERS[1].into(), season_type),
        Column::new(CSV_HEADERS[2].into(), week),
        Column::new(CSV_HEADERS[3].into(), home_team),
        Column::new(CSV_HEADERS[4].into(), away_team),
        Column::new(CSV_HEADERS[5].into(), minutes_elapsed),
        Column::new(CSV_HEADERS[6].into(), minutes_remaining),
        Column::new(CSV_HEADERS[7].into(), win_prob),
        Column::new(CSV_HEADERS[8].into(), team_score),
        Column::new(CSV_HEADERS[9].into(), opponent_score),
        Column::new(CSV_HEADERS[10].into(), play_desc),
    ])
}

pub fn games_payload(games: &[GameSummary]) -> GamesPayload<'_> {
    GamesPayload {
        games: games
            .iter()
            .map(|g| GameEntry {
                game_id: &g.game_id,
                season_type: g.season_type.as_deref(),
                week: g.week,
                home_team: &g.home_team,
                away_team: &g.away_team,
                result: g.result,
                final_wp: g.final_wp(),
                points: Points {
                    ravens: g.team_points,
                    opponent: g.opponent_points,
                },
                metrics: Metrics {
                    lead_changes: g.lead_changes,
                    amplitude: g.amplitude,
                },
                highlight: g.highlight,
                plays: &g.plays,
            })
            .collect(),
        most_exciting_game_id: games
            .iter()
            .find(|g| g.highlight)
            .map(|g| g.game_id.as_str()),
    }
}

pub fn write_games_json(path: &Path, games: &[GameSummary]) -> Result<()> {
    let file = create_output(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &games_payload(games))
        .with_context(|| format!("write json {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flush json {}", path.display()))?;
    Ok(())
}

fn create_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("create output {}", path.display()))
}
