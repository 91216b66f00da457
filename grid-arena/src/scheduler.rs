//! Round lifecycle driver.
//!
//! One task per server walks the waiting → active → round-over → reset loop.
//! Handlers signal turn-relevant changes through the arena; a bounded
//! fallback interval covers anything that slips past the signal. Each pass
//! performs at most one lifecycle action, so a burst of activity is handled
//! one well-ordered step at a time.

use std::sync::Arc;

use tokio::select;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::state::Arena;

/// Runs until the arena deactivates.
pub async fn run(arena: Arc<Arena>) {
    info!("turn scheduler running");

    while arena.is_active() {
        step(&arena).await;
        let _ = timeout(arena.config().fallback_interval, arena.turn_activity()).await;
    }

    debug!("turn scheduler stopped");
}

async fn step(arena: &Arena) {
    // A finished round outranks everything else: announce it, give players a
    // moment to read the outcome, then clear the board.
    if arena.announce_outcome() {
        select! {
            _ = sleep(arena.config().reset_delay) => arena.reset_round(),
            _ = arena.halted() => {}
        }
        return;
    }

    if arena.advance_turn() {
        return;
    }

    if arena.try_start_round() {
        debug!("round started");
    }
}
