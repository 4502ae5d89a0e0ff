pub mod config;
pub mod error;
pub mod excitement;
pub mod logging;
pub mod play_dataset;
pub mod win_prob;
pub mod wp_export;
