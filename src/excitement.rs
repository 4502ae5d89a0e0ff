use std::collections::BTreeMap;

use serde::Serialize;

use crate::win_prob::{PlayRecord, round_to};

const LEAD_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GameResult {
    W,
    L,
    T,
}

impl GameResult {
    pub fn from_scores(team: i64, opponent: i64) -> Self {
        if team > opponent {
            GameResult::W
        } else if team < opponent {
            GameResult::L
        } else {
            GameResult::T
        }
    }

    pub fn final_wp(self) -> f64 {
        match self {
            GameResult::W => 1.0,
            GameResult::L => 0.0,
            GameResult::T => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameSummary {
    pub game_id: String,
    pub season_type: Option<String>,
    pub week: Option<i64>,
    pub home_team: String,
    pub away_team: String,
    pub result: Option<GameResult>,
    pub team_points: Option<i64>,
    pub opponent_points: Option<i64>,
    pub lead_changes: usize,
    pub amplitude: f64,
    pub highlight: bool,
    pub plays: Vec<PlayRecord>,
}

impl GameSummary {
    pub fn final_wp(&self) -> Option<f64> {
        self.result.map(GameResult::final_wp)
    }
}

/// Consecutive pairs whose `wp >= 0.5` side differs.
pub fn lead_changes(wps: &[f64]) -> usize {
    wps.windows(2)
        .filter(|pair| (pair[0] >= LEAD_THRESHOLD) != (pair[1] >= LEAD_THRESHOLD))
        .count()
}

pub fn amplitude(wps: &[f64]) -> f64 {
    let Some(first) = wps.first() else {
        return 0.0;
    };
    let (min, max) = wps
        .iter()
        .fold((*first, *first), |(lo, hi), wp| (lo.min(*wp), hi.max(*wp)));
    round_to(max - min, 6)
}

/// Groups plays per game (ascending `game_id`, chronological within a game) and scores each one.
///
/// With `snap_final_wp` the last play's probability is replaced by the final result
/// (1 win, 0 loss, 0.5 tie) before the metrics are computed.
pub fn summarize_games(plays: &[PlayRecord], snap_final_wp: bool) -> Vec<GameSummary> {
    let mut by_game: BTreeMap<&str, Vec<PlayRecord>> = BTreeMap::new();
    for play in plays {
        by_game
            .entry(play.game_id.as_str())
            .or_default()
            .push(play.clone());
    }

    let mut games = Vec::with_capacity(by_game.len());
    for (game_id, mut game_plays) in by_game {
        game_plays.sort_by(|a, b| a.minutes_elapsed.total_cmp(&b.minutes_elapsed));
        let Some(last) = game_plays.last() else {
            continue;
        };
        let team_points = last.team_score;
        let opponent_points = last.opponent_score;
        let result = match (team_points, opponent_points) {
            (Some(team), Some(opponent)) => Some(GameResult::from_scores(team, opponent)),
            _ => None,
        };
        if snap_final_wp
            && let Some(result) = result
            && let Some(last) = game_plays.last_mut()
        {
            last.win_prob = result.final_wp();
        }

        let wps = game_plays.iter().map(|p| p.win_prob).collect::<Vec<_>>();
        let first = &game_plays[0];
        games.push(GameSummary {
            game_id: game_id.to_string(),
            season_type: first.season_type.clone(),
            week: first.week,
            home_team: first.home_team.clone(),
            away_team: first.away_team.clone(),
            result,
            team_points,
            opponent_points,
            lead_changes: lead_changes(&wps),
            amplitude: amplitude(&wps),
            highlight: false,
            plays: game_plays,
        });
    }
    games
}

/// Index of the most exciting game: most lead changes, then widest amplitude.
/// Only a strictly better game replaces the current pick, so exact ties keep the
/// earliest game in slice order (lowest `game_id` for `summarize_games` output).
pub fn select_highlight(games: &[GameSummary]) -> Option<usize> {
    let mut best: Option<(usize, usize, f64)> = None;
    for (idx, game) in games.iter().enumerate() {
        if game.plays.is_empty() {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, lc, amp)) => {
                game.lead_changes > lc || (game.lead_changes == lc && game.amplitude > amp)
            }
        };
        if better {
            best = Some((idx, game.lead_changes, game.amplitude));
        }
    }
    best.map(|(idx, _, _)| idx)
}

/// Flags exactly one game (if any) and returns its id.
pub fn mark_highlight(games: &mut [GameSummary]) -> Option<String> {
    let picked = select_highlight(games);
    for (idx, game) in games.iter_mut().enumerate() {
        game.highlight = Some(idx) == picked;
    }
    picked.map(|idx| games[idx].game_id.clone())
}
