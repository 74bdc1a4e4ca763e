//! Ready-made cell operations for binding custom operators from the command
//! line (`--op f=fibonacci`) or the `[operators]` table of `bf.toml`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::registry::CustomOperator;
use crate::tape::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum NamedOperation {
    /// Nth Fibonacci number of the cell value, with fib(0) = 0 and fib(1) = 1.
    Fibonacci,
    Factorial,
    Square,
    Double,
    Halve,
    Zero,
}

impl NamedOperation {
    pub const ALL: [NamedOperation; 6] = [
        NamedOperation::Fibonacci,
        NamedOperation::Factorial,
        NamedOperation::Square,
        NamedOperation::Double,
        NamedOperation::Halve,
        NamedOperation::Zero,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NamedOperation::Fibonacci => "fibonacci",
            NamedOperation::Factorial => "factorial",
            NamedOperation::Square => "square",
            NamedOperation::Double => "double",
            NamedOperation::Halve => "halve",
            NamedOperation::Zero => "zero",
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            NamedOperation::Fibonacci => "replace the cell n with fib(n)",
            NamedOperation::Factorial => "replace the cell n with n!",
            NamedOperation::Square => "multiply the cell by itself",
            NamedOperation::Double => "multiply the cell by two",
            NamedOperation::Halve => "divide the cell by two, rounding down",
            NamedOperation::Zero => "clear the cell",
        }
    }

    pub fn apply(self, cell: Cell) -> Cell {
        match self {
            NamedOperation::Fibonacci => fibonacci(cell),
            NamedOperation::Factorial => (1..=cell).fold(1, |acc: Cell, k| acc.wrapping_mul(k)),
            NamedOperation::Square => cell.wrapping_mul(cell),
            NamedOperation::Double => cell.wrapping_mul(2),
            NamedOperation::Halve => cell / 2,
            NamedOperation::Zero => 0,
        }
    }

    /// A custom operator on `code` that runs this operation.
    pub fn bind(self, code: impl Into<u32>) -> CustomOperator {
        CustomOperator::new(code, move |cell| self.apply(cell)).with_label(self.name())
    }
}

impl fmt::Display for NamedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NamedOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|op| op.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|op| op.name()).collect();
                format!("unknown operation '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

impl TryFrom<String> for NamedOperation {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

fn fibonacci(n: Cell) -> Cell {
    let (mut a, mut b): (Cell, Cell) = (0, 1);
    for _ in 0..n {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}

/// Parse a single-character operator code, as written in `CH=NAME` or as a
/// key of the `[operators]` table.
pub fn parse_code(s: &str) -> Result<char, String> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(ch),
        _ => Err(format!("operator code must be a single character, got '{s}'")),
    }
}

/// Parse `CH=NAME` into the code and operation it binds.
pub fn parse_binding(s: &str) -> Result<(char, NamedOperation), String> {
    let (code, name) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CH=NAME, got '{s}'"))?;
    Ok((parse_code(code)?, name.parse()?))
}
