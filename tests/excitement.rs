use ravens_wp::excitement::{
    GameResult, amplitude, lead_changes, mark_highlight, select_highlight, summarize_games,
};
use ravens_wp::win_prob::PlayRecord;
use ravens_wp::wp_export::games_payload;

fn play(game_id: &str, minute: f64, win_prob: f64) -> PlayRecord {
    PlayRecord {
        game_id: game_id.to_string(),
        season_type: Some("REG".to_string()),
        week: Some(1),
        home_team: "BAL".to_string(),
        away_team: "CIN".to_string(),
        minutes_elapsed: minute,
        minutes_remaining: 60.0 - minute,
        win_prob,
        team_score: Some(0),
        opponent_score: Some(0),
        play_desc: None,
    }
}

fn game(game_id: &str, wps: &[f64]) -> Vec<PlayRecord> {
    wps.iter()
        .enumerate()
        .map(|(i, wp)| play(game_id, i as f64 * 5.0, *wp))
        .collect()
}

#[test]
fn alternating_sequence_counts_every_crossing() {
    let wps = [0.3, 0.6, 0.4, 0.7];
    assert_eq!(lead_changes(&wps), 3);
    assert_eq!(amplitude(&wps), 0.4);
}

#[test]
fn exactly_half_counts_as_ahead() {
    assert_eq!(lead_changes(&[0.5, 0.5, 0.49, 0.5]), 2);
    assert_eq!(lead_changes(&[0.6, 0.5]), 0);
}

#[test]
fn short_games_have_no_excitement() {
    assert_eq!(lead_changes(&[]), 0);
    assert_eq!(amplitude(&[]), 0.0);
    assert_eq!(lead_changes(&[0.8]), 0);
    assert_eq!(amplitude(&[0.8]), 0.0);

    let games = summarize_games(&game("solo", &[0.42]), false);
    assert_eq!(games.len(), 1);
    assert_eq!(games[0].lead_changes, 0);
    assert_eq!(games[0].amplitude, 0.0);
}

#[test]
fn amplitude_breaks_lead_change_ties() {
    let mut plays = game("2024_01_A", &[0.45, 0.55, 0.45]);
    plays.extend(game("2024_02_B", &[0.35, 0.65, 0.35]));
    let mut games = summarize_games(&plays, false);
    assert_eq!(games[0].lead_changes, 2);
    assert_eq!(games[0].amplitude, 0.1);
    assert_eq!(games[1].lead_changes, 2);
    assert_eq!(games[1].amplitude, 0.3);

    assert_eq!(mark_highlight(&mut games).as_deref(), Some("2024_02_B"));
    assert!(!games[0].highlight);
    assert!(games[1].highlight);
}

#[test]
fn lead_changes_outrank_amplitude() {
    let mut plays = game("a", &[0.1, 0.9, 0.1]);
    plays.extend(game("b", &[0.45, 0.55, 0.45, 0.55]));
    let games = summarize_games(&plays, false);
    assert_eq!(select_highlight(&games), Some(1));
}

#[test]
fn exact_ties_go_to_lowest_game_id() {
    let mut plays = game("2024_09_Z", &[0.4, 0.6]);
    plays.extend(game("2024_03_M", &[0.4, 0.6]));
    let mut games = summarize_games(&plays, false);
    assert_eq!(games[0].game_id, "2024_03_M");
    assert_eq!(mark_highlight(&mut games).as_deref(), Some("2024_03_M"));
    assert_eq!(games.iter().filter(|g| g.highlight).count(), 1);
}

#[test]
fn plays_are_reordered_chronologically() {
    let plays = vec![
        play("g", 30.0, 0.7),
        play("g", 0.0, 0.4),
        play("g", 15.0, 0.55),
    ];
    let games = summarize_games(&plays, false);
    let order = games[0]
        .plays
        .iter()
        .map(|p| p.minutes_elapsed)
        .collect::<Vec<_>>();
    assert_eq!(order, vec![0.0, 15.0, 30.0]);
    assert_eq!(games[0].lead_changes, 1);
}

#[test]
fn final_scores_decide_result() {
    let mut plays = game("g", &[0.5, 0.8]);
    plays[1].team_score = Some(24);
    plays[1].opponent_score = Some(17);
    let games = summarize_games(&plays, true);
    assert_eq!(games[0].result, Some(GameResult::W));
    assert_eq!(games[0].final_wp(), Some(1.0));
    assert_eq!(games[0].plays[1].win_prob, 1.0);
    assert_eq!(games[0].team_points, Some(24));

    assert_eq!(GameResult::from_scores(10, 10), GameResult::T);
    assert_eq!(GameResult::from_scores(3, 10), GameResult::L);
}

#[test]
fn payload_names_the_highlight() {
    let mut games = summarize_games(&game("only", &[0.2, 0.7]), false);
    mark_highlight(&mut games);
    let json = serde_json::to_value(games_payload(&games)).unwrap();
    assert_eq!(json["most_exciting_game_id"], "only");
    assert_eq!(json["games"][0]["highlight"], true);
    assert_eq!(json["games"][0]["plays"][1]["win_prob"].as_f64(), Some(0.7));
    assert_eq!(json["games"][0]["result"], "T");
}
