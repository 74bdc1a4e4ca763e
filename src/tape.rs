//! The memory tape: a fixed run of cells and a single data pointer.
//!
//! Cells are stored as `u32` but behave like bytes in one direction only:
//! decrementing a zero cell lands on 255, while incrementing never wraps
//! until the storage type itself overflows. Likewise the pointer wraps when
//! moving left off cell 0 but clamps at the last cell when moving right.
//! Both asymmetries are long-standing observable behavior and are kept.

/// Value held by one tape cell.
pub type Cell = u32;

/// Number of cells on every tape.
pub const TAPE_LEN: usize = 30_000;

/// Value a zero cell takes after a decrement.
pub const DECREMENT_FLOOR_WRAP: Cell = 255;

#[derive(Debug, Clone)]
pub struct Tape {
    cells: Vec<Cell>,
    pointer: usize,
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}

impl Tape {
    /// A zeroed tape with the pointer on cell 0.
    pub fn new() -> Self {
        Self {
            cells: vec![0; TAPE_LEN],
            pointer: 0,
        }
    }

    /// Move right one cell; stays put on the last cell.
    pub fn move_right(&mut self) {
        if self.pointer < self.cells.len() - 1 {
            self.pointer += 1;
        }
    }

    /// Move left one cell; from cell 0 jumps to the last cell.
    pub fn move_left(&mut self) {
        if self.pointer == 0 {
            self.pointer = self.cells.len() - 1;
        } else {
            self.pointer -= 1;
        }
    }

    pub fn increment(&mut self) {
        let cell = &mut self.cells[self.pointer];
        *cell = cell.wrapping_add(1);
    }

    pub fn decrement(&mut self) {
        let cell = &mut self.cells[self.pointer];
        *cell = if *cell == 0 { DECREMENT_FLOOR_WRAP } else { *cell - 1 };
    }

    /// Value of the cell under the pointer.
    pub fn read(&self) -> Cell {
        self.cells[self.pointer]
    }

    /// Overwrite the cell under the pointer.
    pub fn write(&mut self, value: Cell) {
        self.cells[self.pointer] = value;
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Zero every cell and return the pointer to cell 0.
    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = 0);
        self.pointer = 0;
    }
}
