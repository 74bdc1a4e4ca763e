//! Custom operator registry.
//!
//! Besides the eight built-in tokens `><+-.,[]`, a program may use any
//! ASCII code that a caller has bound to a `Cell -> Cell` operation. The
//! engine applies the operation to the cell under the pointer and writes
//! the result back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::tape::Cell;

/// Highest code a custom operator may use.
pub const MAX_CUSTOM_CODE: u32 = 127;

/// Built-in tokens, which can never be rebound.
pub const BUILTIN_TOKENS: [u8; 8] = [b'>', b'<', b'+', b'-', b'.', b',', b'[', b']'];

/// Errors returned when editing an [`OperatorRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("operator {} is a built-in and cannot be rebound", show_code(.code))]
    ReservedOperator { code: u32 },

    #[error("operator code {code} is outside the ASCII range 0..=127")]
    OutOfRange { code: u32 },

    #[error("operator {} is already registered", show_code(.code))]
    DuplicateOperator { code: u32 },

    #[error("operator {} is not registered", show_code(.code))]
    NotFound { code: u32 },
}

/// Shows a code as `'f' (102)` when printable, or just the number.
struct CodeDisplay(u32);

fn show_code(code: &u32) -> CodeDisplay {
    CodeDisplay(*code)
}

impl fmt::Display for CodeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match char::from_u32(self.0).filter(|c| c.is_ascii_graphic()) {
            Some(ch) => write!(f, "'{ch}' ({})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

type Operation = Arc<dyn Fn(Cell) -> Cell + Send + Sync>;

/// A code bound to a cell transformation.
#[derive(Clone)]
pub struct CustomOperator {
    code: u32,
    label: Option<String>,
    operation: Operation,
}

impl CustomOperator {
    /// Bind `code` (a `char`, `u8` or `u32`) to `operation`.
    pub fn new<F>(code: impl Into<u32>, operation: F) -> Self
    where
        F: Fn(Cell) -> Cell + Send + Sync + 'static,
    {
        Self {
            code: code.into(),
            label: None,
            operation: Arc::new(operation),
        }
    }

    /// Attach a human readable name, shown in listings.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn apply(&self, cell: Cell) -> Cell {
        (self.operation)(cell)
    }
}

impl fmt::Debug for CustomOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOperator")
            .field("code", &self.code)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CustomOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", CodeDisplay(self.code))?;
        if let Some(label) = &self.label {
            write!(f, " => {label}")?;
        }
        Ok(())
    }
}

/// Mapping from code to custom operator.
///
/// Keyed by code, so listings come out in ascending code order.
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    operators: BTreeMap<u32, CustomOperator>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `operator`, rejecting built-in, non-ASCII and already bound codes.
    pub fn register(&mut self, operator: CustomOperator) -> Result<(), RegistryError> {
        let code = operator.code;
        if u8::try_from(code).is_ok_and(|b| BUILTIN_TOKENS.contains(&b)) {
            return Err(RegistryError::ReservedOperator { code });
        }
        if code > MAX_CUSTOM_CODE {
            return Err(RegistryError::OutOfRange { code });
        }
        if self.operators.contains_key(&code) {
            return Err(RegistryError::DuplicateOperator { code });
        }
        debug!(code, label = operator.label.as_deref(), "registered custom operator");
        self.operators.insert(code, operator);
        Ok(())
    }

    /// Remove the operator bound to `code`.
    pub fn unregister(&mut self, code: impl Into<u32>) -> Result<CustomOperator, RegistryError> {
        let code = code.into();
        let removed = self
            .operators
            .remove(&code)
            .ok_or(RegistryError::NotFound { code })?;
        debug!(code, "unregistered custom operator");
        Ok(removed)
    }

    pub fn lookup(&self, code: impl Into<u32>) -> Option<&CustomOperator> {
        self.operators.get(&code.into())
    }

    /// Snapshot of every registered operator, ordered by code.
    pub fn list(&self) -> Vec<&CustomOperator> {
        self.operators.values().collect()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(code: impl Into<u32>) -> CustomOperator {
        CustomOperator::new(code, |c| c)
    }

    #[test]
    fn builtin_codes_are_reserved() {
        let mut reg = OperatorRegistry::new();
        for &tok in BUILTIN_TOKENS.iter() {
            let err = reg.register(identity(tok)).unwrap_err();
            assert_eq!(err, RegistryError::ReservedOperator { code: tok as u32 });
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn codes_above_ascii_are_out_of_range() {
        let mut reg = OperatorRegistry::new();
        assert_eq!(
            reg.register(identity(200u32)),
            Err(RegistryError::OutOfRange { code: 200 })
        );
        assert_eq!(
            reg.register(identity('ƒ')),
            Err(RegistryError::OutOfRange { code: 'ƒ' as u32 })
        );
        assert!(reg.register(identity(127u32)).is_ok());
    }

    #[test]
    fn second_registration_of_a_code_is_a_duplicate() {
        let mut reg = OperatorRegistry::new();
        reg.register(identity('f')).unwrap();
        assert_eq!(
            reg.register(identity('f')),
            Err(RegistryError::DuplicateOperator { code: 'f' as u32 })
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unregister_removes_and_reports_missing() {
        let mut reg = OperatorRegistry::new();
        reg.register(identity('x')).unwrap();
        let removed = reg.unregister('x').unwrap();
        assert_eq!(removed.code(), 'x' as u32);
        assert!(reg.lookup('x').is_none());
        assert!(matches!(
            reg.unregister('x'),
            Err(RegistryError::NotFound { code }) if code == 'x' as u32
        ));
    }

    #[test]
    fn lookup_applies_the_bound_operation() {
        let mut reg = OperatorRegistry::new();
        reg.register(CustomOperator::new('d', |c| c * 2)).unwrap();
        let op = reg.lookup(b'd').expect("registered");
        assert_eq!(op.apply(21), 42);
    }

    #[test]
    fn list_is_ordered_by_code() {
        let mut reg = OperatorRegistry::new();
        reg.register(identity('z')).unwrap();
        reg.register(identity('a')).unwrap();
        reg.register(identity('m')).unwrap();
        let codes: Vec<u32> = reg.list().iter().map(|op| op.code()).collect();
        assert_eq!(codes, vec!['a' as u32, 'm' as u32, 'z' as u32]);
    }

    #[test]
    fn display_shows_char_and_label() {
        let op = identity('f').with_label("fibonacci");
        assert_eq!(op.to_string(), "'f' (102) => fibonacci");
        let err = RegistryError::ReservedOperator { code: '+' as u32 };
        assert_eq!(err.to_string(), "operator '+' (43) is a built-in and cannot be rebound");
    }
}
