use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::ArenaConfig;
use crate::rules::WinRule;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the arena server, accepting player connections.
    Server(ServerArgs),
    /// Connect to an arena and play from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an
    /// ephemeral port.
    #[arg(long, default_value = "127.0.0.1:4000")]
    pub listen: SocketAddr,

    /// Side length of the square board.
    #[arg(long, default_value_t = 3)]
    pub board_size: usize,

    /// Win with a run of this many cells anywhere on the board instead of
    /// a complete line. Pick the variant once per deployment.
    #[arg(long)]
    pub win_run: Option<usize>,

    /// Seated players needed before a round starts.
    #[arg(long, default_value_t = 3)]
    pub min_players: usize,

    /// Connection slots; a full table turns further joins away.
    #[arg(long, default_value_t = 5)]
    pub max_players: usize,

    /// Symbols offered to players, one character each, no separators.
    #[arg(long, default_value = "XYZWV")]
    pub symbols: String,

    /// Where win counts are persisted.
    #[arg(long, default_value = "scores.txt")]
    pub score_file: PathBuf,

    /// Where the append-only audit trail is written.
    #[arg(long, default_value = "arena.log")]
    pub audit_file: PathBuf,

    /// Seconds between announcing a round's outcome and clearing the board.
    #[arg(long, default_value_t = 3)]
    pub reset_delay_secs: u64,
}

impl ServerArgs {
    /// Maps the flags onto an [`ArenaConfig`]. Validation happens when the
    /// arena is built, so a bad combination fails startup with context.
    pub fn to_config(&self) -> ArenaConfig {
        ArenaConfig {
            board_size: self.board_size,
            win_rule: match self.win_run {
                Some(k) => WinRule::Run(k),
                None => WinRule::FullLine,
            },
            min_players: self.min_players,
            max_players: self.max_players,
            symbols: self.symbols.chars().collect(),
            score_path: self.score_file.clone(),
            audit_path: self.audit_file.clone(),
            reset_delay: Duration::from_secs(self.reset_delay_secs),
            ..ArenaConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name used when joining the arena. One word, no whitespace.
    #[arg(long, value_parser = parse_player_name)]
    pub name: String,

    /// Address of the arena server to connect to.
    #[arg(long, default_value = "127.0.0.1:4000")]
    pub server: SocketAddr,
}

/// The client sends `JOIN <name>` as a single line at connect time, so the
/// name must be one whitespace-free token or the server would refuse it
/// with no way to retry.
fn parse_player_name(raw: &str) -> Result<String, String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.chars().any(char::is_whitespace) {
        return Err("name cannot contain whitespace".to_string());
    }
    Ok(name.to_string())
}
