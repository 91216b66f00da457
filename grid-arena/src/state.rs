//! The shared game-state store.
//!
//! One [`Arena`] per server, shared as the context object by every
//! connection handler, the turn scheduler, and the audit logger. All round
//! state sits behind a single mutex; every public operation locks, finishes
//! its work synchronously, and unlocks. No I/O and no awaiting happens
//! inside a critical section: slot outboxes are unbounded channel senders,
//! so even broadcast delivery is a non-blocking push, and the per-connection
//! writer tasks do the socket work outside the lock.
//!
//! The audit ring keeps its own independent lock. The two are never held
//! together; operations finish with the state lock released before emitting
//! audit records.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::board::Board;
use crate::config::ArenaConfig;
use crate::logger::AuditLog;
use crate::protocol::ServerEvent;
use crate::rules;
use crate::scores::ScoreTable;

const MAX_NAME_LEN: usize = 32;

pub type SlotIndex = usize;
pub type ConnId = u64;

/// Identity a handler receives for the slot it owns. Only the owning handler
/// calls mutating operations for its index; `conn_id` exists for tracing,
/// where slot indices get reused across connections.
#[derive(Debug, Clone, Copy)]
pub struct SlotHandle {
    pub index: SlotIndex,
    pub conn_id: ConnId,
}

/// Why a JOIN was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum JoinError {
    NameTaken,
    NameTooLong,
    SlotClosed,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinError::NameTaken => write!(f, "that name is already playing"),
            JoinError::NameTooLong => {
                write!(f, "names are limited to {MAX_NAME_LEN} characters")
            }
            JoinError::SlotClosed => write!(f, "your seat is no longer available"),
        }
    }
}

/// Why a symbol claim was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum SymbolError {
    AlreadyChosen,
    NotOffered,
    Taken,
}

impl std::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolError::AlreadyChosen => write!(f, "you already chose a symbol"),
            SymbolError::NotOffered => write!(f, "that symbol is not offered here"),
            SymbolError::Taken => write!(f, "that symbol is already taken"),
        }
    }
}

/// Why a move was rejected. None of these mutate any state; the client is
/// told via `INVALID` and may try again.
#[derive(Debug, PartialEq, Eq)]
pub enum MoveError {
    NoRound,
    NotYourTurn,
    TurnAlreadyEnded,
    RoundOver,
    OutOfRange,
    CellTaken,
}

impl std::fmt::Display for MoveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveError::NoRound => write!(f, "the round has not started"),
            MoveError::NotYourTurn => write!(f, "not your turn"),
            MoveError::TurnAlreadyEnded => write!(f, "move already submitted this turn"),
            MoveError::RoundOver => write!(f, "round already ended, wait for the reset"),
            MoveError::OutOfRange => write!(f, "cell out of range"),
            MoveError::CellTaken => write!(f, "cell already taken"),
        }
    }
}

/// What a successful move did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Placed,
    /// The table snapshot lets the caller persist scores without touching
    /// the lock again.
    Won { name: String, scores: ScoreTable },
    Drawn,
}

#[derive(Debug, Clone)]
enum RoundOutcome {
    Winner {
        index: SlotIndex,
        name: String,
        symbol: char,
    },
    Draw,
}

struct PlayerSlot {
    conn_id: ConnId,
    name: Option<String>,
    symbol: Option<char>,
    active: bool,
    outbox: Option<UnboundedSender<ServerEvent>>,
}

struct RoundState {
    board: Board,
    slots: Vec<Option<PlayerSlot>>,
    current_turn: Option<SlotIndex>,
    turn_complete: bool,
    round_over: bool,
    outcome: Option<RoundOutcome>,
    scores: ScoreTable,
}

/// Read-only view for the scheduler and the tests. Cloned out instead of
/// borrowed so no caller can hold the lock by accident.
#[derive(Debug, Clone)]
pub struct ArenaSnapshot {
    pub board: String,
    pub current_turn: Option<SlotIndex>,
    pub turn_complete: bool,
    pub round_over: bool,
    pub eligible_players: usize,
    pub scores: ScoreTable,
}

pub struct Arena {
    config: ArenaConfig,
    round: Mutex<RoundState>,
    audit: AuditLog,
    turn_signal: Notify,
    halt_signal: Notify,
    active: AtomicBool,
    next_conn_id: AtomicU64,
}

impl Arena {
    /// Builds the store with a preloaded score table. Configuration problems
    /// surface here, before any task spawns.
    pub fn new(config: ArenaConfig, scores: ScoreTable) -> Result<Self> {
        config.validate()?;

        let round = RoundState {
            board: Board::new(config.board_size),
            slots: (0..config.max_players).map(|_| None).collect(),
            current_turn: None,
            turn_complete: false,
            round_over: false,
            outcome: None,
            scores,
        };
        let audit = AuditLog::new(config.audit_capacity);

        Ok(Self {
            config,
            round: Mutex::new(round),
            audit,
            turn_signal: Notify::new(),
            halt_signal: Notify::new(),
            active: AtomicBool::new(true),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolves once something turn-relevant happened. A permit is stored if
    /// the signal fires before anyone waits, so wake-ups are never lost.
    pub async fn turn_activity(&self) {
        self.turn_signal.notified().await;
    }

    /// Resolves once the arena has been shut down.
    pub async fn halted(&self) {
        while self.is_active() {
            self.halt_signal.notified().await;
        }
    }

    fn wake_scheduler(&self) {
        self.turn_signal.notify_one();
    }

    /// Claims a free slot for a new connection. `None` means the table is
    /// full and the connection should be turned away.
    pub fn register_slot(&self, outbox: UnboundedSender<ServerEvent>) -> Option<SlotHandle> {
        let mut state = self.lock();

        let index = match state.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                drop(state);
                self.audit.emit("connection rejected, no free slot");
                return None;
            }
        };

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        state.slots[index] = Some(PlayerSlot {
            conn_id,
            name: None,
            symbol: None,
            active: true,
            outbox: Some(outbox),
        });
        drop(state);

        self.audit.emit(format!("{} connected", player_label(index)));
        Some(SlotHandle { index, conn_id })
    }

    /// Records the player's name. Names are unique among active players so
    /// score lines and win announcements stay unambiguous.
    pub fn set_name(&self, index: SlotIndex, name: &str) -> Result<(), JoinError> {
        if name.chars().count() > MAX_NAME_LEN {
            return Err(JoinError::NameTooLong);
        }

        let mut state = self.lock();
        let taken = state.slots.iter().enumerate().any(|(i, slot)| {
            i != index
                && matches!(slot, Some(s) if s.active && s.name.as_deref() == Some(name))
        });
        if taken {
            return Err(JoinError::NameTaken);
        }

        match occupied(&mut state, index) {
            Some(slot) => slot.name = Some(name.to_string()),
            None => return Err(JoinError::SlotClosed),
        }
        drop(state);

        self.audit
            .emit(format!("{} joined as {name}", player_label(index)));
        Ok(())
    }

    /// Check-and-set symbol claim. The canonical character from the
    /// configured set is stored and returned, so `x` claims `X`.
    pub fn claim_symbol(&self, index: SlotIndex, want: char) -> Result<char, SymbolError> {
        let symbol = self
            .config
            .symbols
            .iter()
            .copied()
            .find(|offered| offered.eq_ignore_ascii_case(&want))
            .ok_or(SymbolError::NotOffered)?;

        let mut state = self.lock();

        if matches!(occupied(&mut state, index), Some(slot) if slot.symbol.is_some()) {
            return Err(SymbolError::AlreadyChosen);
        }
        let taken = state.slots.iter().enumerate().any(|(i, slot)| {
            i != index && matches!(slot, Some(s) if s.active && s.symbol == Some(symbol))
        });
        if taken {
            return Err(SymbolError::Taken);
        }

        let who = match occupied(&mut state, index) {
            Some(slot) => {
                slot.symbol = Some(symbol);
                slot.name.clone().unwrap_or_else(|| player_label(index))
            }
            None => return Err(SymbolError::Taken),
        };

        // Let everyone else know the table grew.
        let failed = deliver_to_others(
            &mut state,
            index,
            ServerEvent::Message {
                text: format!("{who} joined the table as {symbol}"),
            },
        );
        let audits = retire_failed(&mut state, failed);
        drop(state);

        self.audit
            .emit(format!("{} chose symbol {symbol}", player_label(index)));
        self.finish_retirements(audits);
        self.wake_scheduler();

        Ok(symbol)
    }

    /// Validates and applies one move in a single critical section: turn
    /// check, bounds check, occupancy check, the board write, win/draw
    /// evaluation, and the score update all happen without releasing the
    /// lock.
    pub fn apply_move(
        &self,
        index: SlotIndex,
        row: usize,
        col: usize,
    ) -> Result<MoveOutcome, MoveError> {
        let mut state = self.lock();

        if state.round_over {
            return Err(MoveError::RoundOver);
        }
        let current = state.current_turn.ok_or(MoveError::NoRound)?;
        if current != index {
            return Err(MoveError::NotYourTurn);
        }
        if state.turn_complete {
            return Err(MoveError::TurnAlreadyEnded);
        }
        if !state.board.in_bounds(row, col) {
            return Err(MoveError::OutOfRange);
        }
        if state.board.get(row, col).is_some() {
            return Err(MoveError::CellTaken);
        }

        let (symbol, name) = match occupied(&mut state, index) {
            Some(slot) => match slot.symbol {
                Some(symbol) => (
                    symbol,
                    slot.name.clone().unwrap_or_else(|| player_label(index)),
                ),
                None => return Err(MoveError::NotYourTurn),
            },
            None => return Err(MoveError::NotYourTurn),
        };

        state.board.place(row, col, symbol);
        state.turn_complete = true;

        let mut audits = vec![format!(
            "{} ({name}) placed {symbol} at ({row}, {col})",
            player_label(index)
        )];

        let outcome = if rules::has_win(&state.board, symbol, self.config.win_rule) {
            state.round_over = true;
            state.outcome = Some(RoundOutcome::Winner {
                index,
                name: name.clone(),
                symbol,
            });
            let wins = state.scores.entry(name.clone()).or_insert(0);
            *wins += 1;
            audits.push(format!("round won by {name}"));
            MoveOutcome::Won {
                name,
                scores: state.scores.clone(),
            }
        } else if rules::is_draw(&state.board) {
            state.round_over = true;
            state.outcome = Some(RoundOutcome::Draw);
            audits.push("round ended in a draw, board full".to_string());
            MoveOutcome::Drawn
        } else {
            MoveOutcome::Placed
        };
        drop(state);

        for message in audits {
            self.audit.emit(message);
        }
        self.wake_scheduler();

        Ok(outcome)
    }

    /// Starts a round when enough players are seated with symbols. Returns
    /// whether a round began.
    pub fn try_start_round(&self) -> bool {
        let mut state = self.lock();

        if state.round_over || state.current_turn.is_some() {
            return false;
        }
        let eligible: Vec<SlotIndex> = (0..state.slots.len())
            .filter(|&i| is_eligible(&state, i))
            .collect();
        if eligible.len() < self.config.min_players {
            return false;
        }

        state.current_turn = Some(eligible[0]);
        state.turn_complete = false;
        let failed = deliver_round_view(&mut state);
        let audits = retire_failed(&mut state, failed);
        let player_count = eligible.len();
        let first = eligible[0];
        drop(state);

        self.audit.emit(format!(
            "round started with {player_count} players; {} moves first",
            player_label(first)
        ));
        self.finish_retirements(audits);

        true
    }

    /// Rotates the turn after a completed move, or abandons the round when
    /// nobody eligible remains. The scan is bounded by the slot capacity, so
    /// it terminates for every active-player subset; a sole survivor keeps
    /// receiving the turn. Returns whether anything changed.
    pub fn advance_turn(&self) -> bool {
        let mut state = self.lock();

        if state.round_over || !state.turn_complete {
            return false;
        }
        let current = match state.current_turn {
            Some(index) => index,
            None => return false,
        };

        match next_eligible(&state, current) {
            Some(next) => {
                state.current_turn = Some(next);
                state.turn_complete = false;
                let failed = deliver_round_view(&mut state);
                let audits = retire_failed(&mut state, failed);
                drop(state);
                self.finish_retirements(audits);
            }
            None => {
                clear_round(&mut state);
                drop(state);
                self.audit.emit("round abandoned, no eligible players left");
            }
        }

        true
    }

    /// Announces a finished round to every connected player, exactly once.
    pub fn announce_outcome(&self) -> bool {
        let mut state = self.lock();

        let outcome = match state.outcome.take() {
            Some(outcome) => outcome,
            None => return false,
        };

        let failed = match &outcome {
            RoundOutcome::Winner {
                index,
                name,
                symbol,
            } => {
                let headline = ServerEvent::Message {
                    text: format!("{name} ({symbol}) won the round"),
                };
                let winner = *index;
                let name = name.clone();
                deliver_each(&mut state, |slot_index| {
                    let verdict = if slot_index == winner {
                        ServerEvent::Win { name: name.clone() }
                    } else {
                        ServerEvent::Lose
                    };
                    vec![headline.clone(), verdict]
                })
            }
            RoundOutcome::Draw => deliver_each(&mut state, |_| {
                vec![
                    ServerEvent::Message {
                        text: "nobody won this round".to_string(),
                    },
                    ServerEvent::Draw,
                ]
            }),
        };
        let audits = retire_failed(&mut state, failed);
        drop(state);

        self.finish_retirements(audits);
        true
    }

    /// Clears the board for the next round. Scores survive; only round
    /// state resets.
    pub fn reset_round(&self) {
        let mut state = self.lock();

        clear_round(&mut state);
        let failed = deliver_round_view(&mut state);
        let mut audits = retire_failed(&mut state, failed);
        let more = deliver_to_others(
            &mut state,
            usize::MAX,
            ServerEvent::Message {
                text: "board cleared, new round starting".to_string(),
            },
        );
        audits.extend(retire_failed(&mut state, more));
        drop(state);

        self.audit.emit("board cleared for a new round");
        self.finish_retirements(audits);
        self.wake_scheduler();
    }

    /// Marks the slot inactive and reclaims it for reuse. Called by the
    /// owning handler exactly once, on its way out.
    pub fn release_slot(&self, index: SlotIndex) {
        let mut state = self.lock();

        let name = match state.slots.get(index).and_then(Option::as_ref) {
            Some(slot) => slot.name.clone(),
            None => return,
        };
        retire_entry(&mut state, index);
        state.slots[index] = None;
        drop(state);

        let label = player_label(index);
        match name {
            Some(name) => self.audit.emit(format!("{label} ({name}) disconnected")),
            None => self.audit.emit(format!("{label} disconnected")),
        }
        self.wake_scheduler();
    }

    /// Flips the global active flag, tells every connection, and wakes both
    /// background tasks so they can wind down.
    pub fn shutdown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut state = self.lock();
        deliver_to_others(
            &mut state,
            usize::MAX,
            ServerEvent::Message {
                text: "server shutting down".to_string(),
            },
        );
        for index in 0..state.slots.len() {
            retire_entry(&mut state, index);
        }
        drop(state);

        self.audit.emit("server shutting down");
        self.wake_scheduler();
        self.halt_signal.notify_one();
        self.audit.wake();
    }

    /// Symbols from the configured set not currently held by an active
    /// player, in offer order.
    pub fn available_symbols(&self) -> Vec<char> {
        let state = self.lock();
        self.config
            .symbols
            .iter()
            .copied()
            .filter(|symbol| {
                !state
                    .slots
                    .iter()
                    .any(|slot| matches!(slot, Some(s) if s.active && s.symbol == Some(*symbol)))
            })
            .collect()
    }

    pub fn snapshot(&self) -> ArenaSnapshot {
        let state = self.lock();
        ArenaSnapshot {
            board: state.board.flatten(),
            current_turn: state.current_turn,
            turn_complete: state.turn_complete,
            round_over: state.round_over,
            eligible_players: (0..state.slots.len())
                .filter(|&i| is_eligible(&state, i))
                .count(),
            scores: state.scores.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.round.lock().unwrap()
    }

    fn finish_retirements(&self, audits: Vec<String>) {
        if audits.is_empty() {
            return;
        }
        for message in audits {
            debug!(%message, "retiring unreachable player");
            self.audit.emit(message);
        }
        // A retirement can complete the departed holder's turn; give the
        // scheduler a chance to advance.
        self.wake_scheduler();
    }
}

fn player_label(index: SlotIndex) -> String {
    format!("player {}", index + 1)
}

fn occupied(state: &mut RoundState, index: SlotIndex) -> Option<&mut PlayerSlot> {
    state.slots.get_mut(index)?.as_mut()
}

fn is_eligible(state: &RoundState, index: SlotIndex) -> bool {
    matches!(
        state.slots.get(index).and_then(Option::as_ref),
        Some(slot) if slot.active && slot.symbol.is_some()
    )
}

/// Next slot to hold the turn, scanning at most one full lap so the search
/// terminates even when `from` is the only candidate left. `None` means no
/// eligible slot remains at all.
fn next_eligible(state: &RoundState, from: SlotIndex) -> Option<SlotIndex> {
    let capacity = state.slots.len();
    (1..=capacity)
        .map(|step| (from + step) % capacity)
        .find(|&index| is_eligible(state, index))
}

fn clear_round(state: &mut RoundState) {
    state.board.clear();
    state.current_turn = None;
    state.turn_complete = false;
    state.round_over = false;
    state.outcome = None;
}

fn push(slot: &PlayerSlot, event: ServerEvent) -> bool {
    match &slot.outbox {
        Some(outbox) => outbox.send(event).is_ok(),
        None => false,
    }
}

/// Sends the board and whose-turn information to every connected player.
/// Returns the indices whose outbox is gone.
fn deliver_round_view(state: &mut RoundState) -> Vec<SlotIndex> {
    let cells = state.board.flatten();
    let turn_index = state.current_turn;
    let turn_name = match turn_index {
        Some(turn) => state
            .slots
            .get(turn)
            .and_then(Option::as_ref)
            .map(|slot| slot.name.clone().unwrap_or_else(|| player_label(turn))),
        None => None,
    };

    let mut failed = Vec::new();
    for index in 0..state.slots.len() {
        let slot = match state.slots[index].as_ref() {
            Some(slot) if slot.active => slot,
            _ => continue,
        };

        let mut delivered = push(slot, ServerEvent::Board {
            cells: cells.clone(),
        });
        delivered = delivered
            && match (turn_index, &turn_name) {
                (Some(turn), _) if turn == index => push(slot, ServerEvent::YourTurn),
                (Some(_), Some(name)) => push(
                    slot,
                    ServerEvent::Message {
                        text: format!("it is {name}'s turn"),
                    },
                ),
                _ => true,
            };

        if !delivered {
            failed.push(index);
        }
    }
    failed
}

/// Sends `event` to every connected player except `skip` (pass an
/// out-of-range index to reach everyone). Returns failed indices.
fn deliver_to_others(
    state: &mut RoundState,
    skip: SlotIndex,
    event: ServerEvent,
) -> Vec<SlotIndex> {
    let mut failed = Vec::new();
    for index in 0..state.slots.len() {
        if index == skip {
            continue;
        }
        let slot = match state.slots[index].as_ref() {
            Some(slot) if slot.active => slot,
            _ => continue,
        };
        if !push(slot, event.clone()) {
            failed.push(index);
        }
    }
    failed
}

/// Sends a per-player batch built by `events`. Returns failed indices.
fn deliver_each<F>(state: &mut RoundState, events: F) -> Vec<SlotIndex>
where
    F: Fn(SlotIndex) -> Vec<ServerEvent>,
{
    let mut failed = Vec::new();
    for index in 0..state.slots.len() {
        let slot = match state.slots[index].as_ref() {
            Some(slot) if slot.active => slot,
            _ => continue,
        };
        for event in events(index) {
            if !push(slot, event) {
                failed.push(index);
                break;
            }
        }
    }
    failed
}

/// Marks a slot inactive and closes its outbox. When the departing slot
/// holds the turn mid-round, the turn is marked complete so the scheduler
/// advances past it instead of stalling.
fn retire_entry(state: &mut RoundState, index: SlotIndex) -> bool {
    let newly_retired = match state.slots.get_mut(index).and_then(Option::as_mut) {
        Some(slot) => {
            let was_reachable = slot.active || slot.outbox.is_some();
            slot.active = false;
            slot.outbox = None;
            was_reachable
        }
        None => false,
    };

    if newly_retired && state.current_turn == Some(index) && !state.round_over {
        state.turn_complete = true;
    }
    newly_retired
}

fn retire_failed(state: &mut RoundState, failed: Vec<SlotIndex>) -> Vec<String> {
    let mut audits = Vec::new();
    for index in failed {
        if retire_entry(state, index) {
            audits.push(format!("{} unreachable, retired", player_label(index)));
        }
    }
    audits
}
