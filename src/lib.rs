//! A Brainfuck interpreter that replays loops from its own execution history.
//!
//! The engine reads a program one byte at a time and never looks ahead for
//! matching brackets. Loops are repeated by scanning back through the tokens
//! it has already dispatched and queueing them for replay; see [`engine`].
//!
//! Features and behaviors:
//! - A fixed tape of 30,000 cells, all initialized to 0.
//! - Moving left from cell 0 wraps to the last cell; moving right from the
//!   last cell stays put.
//! - Decrementing a zero cell yields 255; incrementing does not wrap at 255.
//! - `.` appends the character whose code point is the cell value.
//! - `,` reads a line of digits from stdin into the cell; an empty line
//!   leaves it unchanged.
//! - `[` never tests the cell, so every loop body runs at least once.
//! - Any other byte runs the custom operator bound to it, if there is one,
//!   and is ignored otherwise.
//!
//! Quick start:
//!
//! ```
//! use replay_bf::{interpret, CustomOperator, OperatorRegistry};
//!
//! fn fib(n: u32) -> u32 {
//!     if n < 2 { n } else { fib(n - 1) + fib(n - 2) }
//! }
//!
//! let mut registry = OperatorRegistry::new();
//! registry.register(CustomOperator::new('f', fib)).unwrap();
//!
//! // fib(11) - 2 == 87 == 'W'
//! let out = interpret("+++++++++++f--.".as_bytes(), &registry).unwrap();
//! assert_eq!(out, "W");
//! ```

pub mod cli_util;
pub mod commands;
pub mod config;
pub mod engine;
pub mod ops;
pub mod registry;
pub mod repl;
pub mod tape;

pub use engine::{interpret, Diagnostics, Engine, EngineError, StepControl};
pub use ops::NamedOperation;
pub use registry::{CustomOperator, OperatorRegistry, RegistryError};
pub use tape::{Cell, Tape, TAPE_LEN};
