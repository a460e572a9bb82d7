//! Server-wide timing and bind configuration.
//!
//! No env-loading crate exists in this workspace's dependency stack, so
//! this is a config struct with sensible defaults, with overrides sourced
//! from plain `std::env::var`.

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Countdown shown before question 0 of a freshly started game.
    pub countdown_duration: Duration,
    /// How long `reveal` stays up before auto-advancing to `leaderboard`.
    pub reveal_duration: Duration,
    /// How long the winner's jingle plays before `leaderboard` advances to
    /// the next question's countdown (or to `final`).
    pub winner_jingle_duration: Duration,
    /// Grace window a disconnected TV has to reconnect before its room is
    /// torn down (see `DESIGN.md`).
    pub tv_reconnect_grace: Duration,
    /// Timeout applied to a single `QuestionProvider::generate` call.
    pub provider_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("hardcoded literal parses"),
            countdown_duration: Duration::from_secs(3),
            reveal_duration: Duration::from_secs(5),
            winner_jingle_duration: Duration::from_secs(2),
            tv_reconnect_grace: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Reads overrides from the environment, falling back to [`Default`]
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("TRIVIA_BIND_ADDR", defaults.bind_addr),
            countdown_duration: env_secs("TRIVIA_COUNTDOWN_SECS", defaults.countdown_duration),
            reveal_duration: env_secs("TRIVIA_REVEAL_SECS", defaults.reveal_duration),
            winner_jingle_duration: env_secs("TRIVIA_WINNER_JINGLE_SECS", defaults.winner_jingle_duration),
            tv_reconnect_grace: env_secs("TRIVIA_TV_RECONNECT_GRACE_SECS", defaults.tv_reconnect_grace),
            provider_timeout: env_secs("TRIVIA_PROVIDER_TIMEOUT_SECS", defaults.provider_timeout),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
