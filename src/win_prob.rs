use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite::types::Value;
use serde::Serialize;

use crate::error::DatasetError;
use crate::play_dataset::{PlayTable, quote_ident, table_columns};

pub const DEFAULT_TEAM: &str = "BAL";
const GAME_SECONDS: f64 = 3600.0;

static NULL: Value = Value::Null;

/// Columns pulled from the wide play table, in `SourcePlay::from_values` order.
pub const SOURCE_COLUMNS: &[&str] = &[
    "game_id",
    "season_type",
    "week",
    "home_team",
    "away_team",
    "game_seconds_remaining",
    "wp",
    "home_wp",
    "away_wp",
    "total_home_score",
    "total_away_score",
    "desc",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePlay {
    pub game_id: Option<String>,
    pub season_type: Option<String>,
    pub week: Option<i64>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub game_seconds_remaining: Option<f64>,
    pub wp: Option<f64>,
    pub home_wp: Option<f64>,
    pub away_wp: Option<f64>,
    pub total_home_score: Option<i64>,
    pub total_away_score: Option<i64>,
    pub desc: Option<String>,
}

impl SourcePlay {
    pub fn from_values(values: &[Value]) -> Self {
        let at = |idx: usize| values.get(idx).unwrap_or(&NULL);
        SourcePlay {
            game_id: value_text(at(0)),
            season_type: value_text(at(1)),
            week: value_i64(at(2)),
            home_team: value_text(at(3)),
            away_team: value_text(at(4)),
            game_seconds_remaining: value_f64(at(5)),
            wp: value_f64(at(6)),
            home_wp: value_f64(at(7)),
            away_wp: value_f64(at(8)),
            total_home_score: value_i64(at(9)),
            total_away_score: value_i64(at(10)),
            desc: value_text(at(11)),
        }
    }
}

/// One play from the tracked team's point of view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayRecord {
    pub game_id: String,
    pub season_type: Option<String>,
    pub week: Option<i64>,
    pub home_team: String,
    pub away_team: String,
    pub minutes_elapsed: f64,
    pub minutes_remaining: f64,
    pub win_prob: f64,
    #[serde(rename = "ravens_score")]
    pub team_score: Option<i64>,
    pub opponent_score: Option<i64>,
    pub play_desc: Option<String>,
}

pub fn load_source_plays(conn: &Connection, table: &str, team: &str) -> Result<Vec<SourcePlay>> {
    let columns = table_columns(conn, table)?;
    if columns.is_empty() {
        return Err(DatasetError::MissingTable(table.to_string()).into());
    }
    for required in SOURCE_COLUMNS {
        if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(required)) {
            return Err(DatasetError::MissingColumn((*required).to_string()).into());
        }
    }

    let select = SOURCE_COLUMNS
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {select} FROM {}
             WHERE home_team = ?1 OR away_team = ?1
             ORDER BY rowid",
            quote_ident(table)
        ))
        .context("prepare play extraction query")?;

    let rows = stmt
        .query_map([team], |row| {
            let mut values = Vec::with_capacity(SOURCE_COLUMNS.len());
            for idx in 0..SOURCE_COLUMNS.len() {
                values.push(row.get::<_, Value>(idx)?);
            }
            Ok(SourcePlay::from_values(&values))
        })
        .context("query plays")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode play row")?);
    }
    Ok(out)
}

pub fn source_plays_from_table(table: &PlayTable) -> Result<Vec<SourcePlay>> {
    let mut indices = Vec::with_capacity(SOURCE_COLUMNS.len());
    for name in SOURCE_COLUMNS {
        let idx = table
            .column_index(name)
            .ok_or_else(|| DatasetError::MissingColumn((*name).to_string()))?;
        indices.push(idx);
    }

    Ok(table
        .rows
        .iter()
        .map(|row| {
            let values = indices
                .iter()
                .map(|idx| row.get(*idx).cloned().unwrap_or(Value::Null))
                .collect::<Vec<_>>();
            SourcePlay::from_values(&values)
        })
        .collect())
}

/// `None` when the play does not involve `team` or lacks the timing/probability fields.
pub fn derive_play(source: &SourcePlay, team: &str) -> Option<PlayRecord> {
    let game_id = source.game_id.as_deref()?;
    let home_team = source.home_team.as_deref()?;
    let away_team = source.away_team.as_deref()?;
    let is_home = home_team == team;
    if !is_home && away_team != team {
        return None;
    }
    source.wp?;
    let seconds_remaining = source.game_seconds_remaining?;

    let (win_prob, team_score, opponent_score) = if is_home {
        (source.home_wp?, source.total_home_score, source.total_away_score)
    } else {
        (source.away_wp?, source.total_away_score, source.total_home_score)
    };

    Some(PlayRecord {
        game_id: game_id.to_string(),
        season_type: source.season_type.clone(),
        week: source.week,
        home_team: home_team.to_string(),
        away_team: away_team.to_string(),
        minutes_elapsed: round_to((GAME_SECONDS - seconds_remaining) / 60.0, 3),
        minutes_remaining: round_to(seconds_remaining / 60.0, 3),
        win_prob,
        team_score,
        opponent_score,
        play_desc: source.desc.clone(),
    })
}

/// Derived plays ordered by game, then minutes elapsed; ties keep source order.
pub fn derive_plays(sources: &[SourcePlay], team: &str) -> Vec<PlayRecord> {
    let mut plays = sources
        .iter()
        .filter_map(|s| derive_play(s, team))
        .collect::<Vec<_>>();
    plays.sort_by(|a, b| {
        a.game_id
            .cmp(&b.game_id)
            .then(a.minutes_elapsed.total_cmp(&b.minutes_elapsed))
    });
    plays
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn value_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Integer(v) => Some(*v as f64),
        Value::Real(v) => Some(*v),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        Value::Null | Value::Blob(_) => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(*v),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| value_f64(value).map(|v| v.round() as i64)),
        other => value_f64(other).map(|v| v.round() as i64),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_three_decimals() {
        assert_eq!(round_to(59.99999, 3), 60.0);
        assert_eq!(round_to(12.3456, 3), 12.346);
        assert_eq!(round_to(0.0, 3), 0.0);
    }

    #[test]
    fn numeric_fields_coerce_from_text_and_real() {
        assert_eq!(value_f64(&Value::Text(" 0.42 ".to_string())), Some(0.42));
        assert_eq!(value_f64(&Value::Text("NA".to_string())), None);
        assert_eq!(value_i64(&Value::Real(17.0)), Some(17));
        assert_eq!(value_i64(&Value::Text("24".to_string())), Some(24));
        assert_eq!(value_text(&Value::Integer(3)), Some("3".to_string()));
        assert_eq!(value_text(&Value::Null), None);
    }

    #[test]
    fn play_without_team_is_skipped() {
        let source = SourcePlay {
            game_id: Some("2024_03_PIT_CLE".to_string()),
            home_team: Some("CLE".to_string()),
            away_team: Some("PIT".to_string()),
            game_seconds_remaining: Some(1800.0),
            wp: Some(0.5),
            home_wp: Some(0.5),
            away_wp: Some(0.5),
            ..SourcePlay::default()
        };
        assert!(derive_play(&source, "BAL").is_none());
    }

    #[test]
    fn csv_columns_match_regardless_of_case() {
        use crate::play_dataset::{ColumnDef, SqlType};

        let columns = SOURCE_COLUMNS
            .iter()
            .map(|name| ColumnDef {
                name: name.to_ascii_uppercase(),
                sql_type: SqlType::Text,
            })
            .collect();
        let mut row = vec![Value::Null; SOURCE_COLUMNS.len()];
        row[0] = Value::Text("2024_01_BAL_KC".to_string());
        row[7] = Value::Real(0.61);
        let table = PlayTable {
            columns,
            rows: vec![row],
        };

        let plays = source_plays_from_table(&table).unwrap();
        assert_eq!(plays[0].game_id.as_deref(), Some("2024_01_BAL_KC"));
        assert_eq!(plays[0].home_wp, Some(0.61));
    }
}
