//! Server configuration assembled from the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};

use crate::board::EMPTY_CELL;
use crate::rules::WinRule;

/// Everything the server decides once at startup. Validated before any task
/// spawns; a bad combination is an initialization fault, not something to
/// limp along with.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Side length of the square board.
    pub board_size: usize,
    /// The single winning-shape family this deployment recognizes.
    pub win_rule: WinRule,
    /// Active, symbol-holding players needed before a round starts.
    pub min_players: usize,
    /// Connection slots; a full table rejects further joins.
    pub max_players: usize,
    /// Symbols offered to players, claimed first-come first-served.
    pub symbols: Vec<char>,
    /// Win counts live here, rewritten in full after every decided round.
    pub score_path: PathBuf,
    /// Append-only audit trail of game events.
    pub audit_path: PathBuf,
    /// Audit records buffered between consumer drains; overflow drops the
    /// newest record.
    pub audit_capacity: usize,
    /// Pause between announcing a round's outcome and clearing the board.
    pub reset_delay: Duration,
    /// Upper bound on how long the scheduler and logger sleep without a
    /// wake-up signal.
    pub fallback_interval: Duration,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            board_size: 3,
            win_rule: WinRule::FullLine,
            min_players: 3,
            max_players: 5,
            symbols: "XYZWV".chars().collect(),
            score_path: PathBuf::from("scores.txt"),
            audit_path: PathBuf::from("arena.log"),
            audit_capacity: 50,
            reset_delay: Duration::from_secs(3),
            fallback_interval: Duration::from_millis(200),
        }
    }
}

impl ArenaConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.board_size >= 2, "board size must be at least 2");
        ensure!(self.board_size <= 16, "board size must be at most 16");
        ensure!(self.min_players >= 1, "at least one player is required");
        ensure!(
            self.min_players <= self.max_players,
            "minimum player count {} exceeds the {} available slots",
            self.min_players,
            self.max_players
        );
        ensure!(
            self.max_players <= self.symbols.len(),
            "{} slots need at least that many symbols, got {}",
            self.max_players,
            self.symbols.len()
        );

        for (i, symbol) in self.symbols.iter().enumerate() {
            ensure!(
                !symbol.is_whitespace() && *symbol != EMPTY_CELL,
                "'{symbol}' cannot be used as a player symbol"
            );
            ensure!(
                !self.symbols[..i].contains(symbol),
                "symbol '{symbol}' is offered twice"
            );
        }

        if let WinRule::Run(k) = self.win_rule {
            ensure!(k >= 2, "a winning run needs at least 2 cells");
            ensure!(
                k <= self.board_size,
                "a run of {k} cannot fit on a {0}x{0} board",
                self.board_size
            );
        }

        ensure!(self.audit_capacity >= 1, "audit capacity must be positive");
        ensure!(
            !self.fallback_interval.is_zero(),
            "fallback interval must be positive"
        );

        Ok(())
    }
}
