//! Square grid storage shared by every round.

/// Placeholder for an empty cell in the flattened wire form.
pub const EMPTY_CELL: char = '.';

/// An N×N grid of optional player symbols, row-major.
///
/// The board itself enforces nothing about turn order or symbol ownership;
/// validation lives with the caller so that every check and the write happen
/// inside one critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    size: usize,
    cells: Vec<Option<char>>,
}

impl Board {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![None; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_bounds(&self, row: usize, col: usize) -> bool {
        row < self.size && col < self.size
    }

    /// Returns the symbol at `(row, col)`, or `None` for an empty cell.
    /// Out-of-bounds coordinates also read as `None`; callers that need the
    /// distinction check `in_bounds` first.
    pub fn get(&self, row: usize, col: usize) -> Option<char> {
        if !self.in_bounds(row, col) {
            return None;
        }
        self.cells[row * self.size + col]
    }

    /// Writes `symbol` at `(row, col)`. The caller has already verified the
    /// coordinates are in bounds and the cell is vacant.
    pub fn place(&mut self, row: usize, col: usize, symbol: char) {
        self.cells[row * self.size + col] = Some(symbol);
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|cell| cell.is_some())
    }

    pub fn clear(&mut self) {
        self.cells.fill(None);
    }

    /// Flattens the grid into the `size²`-character wire form, row-major,
    /// with [`EMPTY_CELL`] standing in for vacant cells.
    pub fn flatten(&self) -> String {
        self.cells
            .iter()
            .map(|cell| cell.unwrap_or(EMPTY_CELL))
            .collect()
    }
}
