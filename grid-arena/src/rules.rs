//! Pure win and draw evaluation over a board snapshot.
//!
//! Evaluation never touches shared state or locks; callers pass the board
//! they already hold and get a plain answer back. A server picks exactly one
//! [`WinRule`] at startup and keeps it for its whole lifetime.

use crate::board::Board;

/// Which family of winning shapes a deployment recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinRule {
    /// A complete row, a complete column, or either main diagonal.
    FullLine,
    /// Any run of `k` consecutive cells along a row, column, or diagonal.
    Run(usize),
}

impl std::fmt::Display for WinRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WinRule::FullLine => write!(f, "full-line"),
            WinRule::Run(k) => write!(f, "run-of-{k}"),
        }
    }
}

/// Returns true when `symbol` has a winning shape on `board` under `rule`.
pub fn has_win(board: &Board, symbol: char, rule: WinRule) -> bool {
    match rule {
        WinRule::FullLine => full_line_win(board, symbol),
        WinRule::Run(k) => run_win(board, symbol, k),
    }
}

/// Draw check: no vacant cell remains. Callers evaluate the just-placed
/// symbol for a win first; no other symbol can hold an unobserved win, or the
/// round would already be over.
pub fn is_draw(board: &Board) -> bool {
    board.is_full()
}

fn full_line_win(board: &Board, symbol: char) -> bool {
    let n = board.size();
    let owned = |row, col| board.get(row, col) == Some(symbol);

    for i in 0..n {
        if (0..n).all(|j| owned(i, j)) || (0..n).all(|j| owned(j, i)) {
            return true;
        }
    }

    (0..n).all(|i| owned(i, i)) || (0..n).all(|i| owned(i, n - 1 - i))
}

fn run_win(board: &Board, symbol: char, k: usize) -> bool {
    let n = board.size();
    if k == 0 || k > n {
        return false;
    }

    // Checking only the four forward directions from each cell visits every
    // window exactly once.
    const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

    for row in 0..n {
        for col in 0..n {
            for (dr, dc) in DIRECTIONS {
                if has_run(board, symbol, k, row, col, dr, dc) {
                    return true;
                }
            }
        }
    }
    false
}

fn has_run(
    board: &Board,
    symbol: char,
    k: usize,
    row: usize,
    col: usize,
    dr: isize,
    dc: isize,
) -> bool {
    (0..k).all(|step| {
        let r = row as isize + dr * step as isize;
        let c = col as isize + dc * step as isize;
        // Negative coordinates fall off the board; `get` treats anything past
        // the far edge as vacant.
        r >= 0 && c >= 0 && board.get(r as usize, c as usize) == Some(symbol)
    })
}
