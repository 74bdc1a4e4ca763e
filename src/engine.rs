//! The interpreter loop.
//!
//! The engine never parses the program or pre-computes bracket positions.
//! Every dispatched token is pushed onto a history stack. When a `]` is
//! dispatched while the current cell is nonzero, the engine scans the
//! history backwards to the matching `[`, moving each token onto a replay
//! stack. Tokens waiting on the replay stack are dispatched before any new
//! byte is read from the source, so the loop body runs again, and its own
//! closing `]` decides whether it runs yet again.
//!
//! A `[` never checks its condition, so a loop body always runs at least
//! once, even when entered on a zero cell.
//!
//! ```
//! use replay_bf::{CustomOperator, Engine};
//!
//! let mut engine = Engine::new();
//! engine
//!     .registry_mut()
//!     .register(CustomOperator::new('d', |cell| cell * 2))
//!     .unwrap();
//!
//! // 33 doubled is 'B'
//! let out = engine.interpret("+++++++++++[>+++<-]>d.".as_bytes()).unwrap();
//! assert_eq!(out, "B");
//! ```

use std::io::{self, BufRead, BufReader, Read};
use std::num::ParseIntError;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, trace, warn};

use crate::registry::OperatorRegistry;
use crate::tape::{Cell, Tape};

const MOVE_RIGHT: u8 = b'>';
const MOVE_LEFT: u8 = b'<';
const INCREMENT: u8 = b'+';
const DECREMENT: u8 = b'-';
const OUTPUT: u8 = b'.';
const INPUT: u8 = b',';
const LOOP_OPEN: u8 = b'[';
const LOOP_CLOSE: u8 = b']';

/// Errors that abort a run. Whatever output was produced so far is dropped.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Reading the program stream failed for a reason other than end of input.
    #[error("failed to read program stream: {source}")]
    FatalStream {
        #[source]
        source: io::Error,
    },

    /// A line given to `,` was not an unsigned integer.
    #[error("invalid numeric input {line:?}: {source}")]
    FatalInputParse {
        line: String,
        #[source]
        source: ParseIntError,
    },

    /// The console (or input provider) failed while `,` was waiting for a line.
    #[error("failed to read input: {source}")]
    Input {
        #[source]
        source: io::Error,
    },

    /// Execution aborted due to step limit.
    #[error("Execution aborted: step limit exceeded ({limit})")]
    StepLimitExceeded { limit: usize },

    /// Execution aborted due to cooperative cancellation (e.g., timeout)
    #[error("Execution aborted: cancelled")]
    Canceled,
}

/// Controls for cooperative cancellation and step limiting.
///
/// One step is one token taken from either the replay stack or the source.
#[derive(Clone)]
pub struct StepControl {
    pub max_steps: Option<usize>,
    pub cancel_flag: Arc<AtomicBool>,
}

impl StepControl {
    pub fn new(max_steps: Option<usize>, cancel_flag: Arc<AtomicBool>) -> Self {
        Self { max_steps, cancel_flag }
    }

    /// Only a step limit, with a flag nobody else holds.
    pub fn with_max_steps(max_steps: usize) -> Self {
        Self::new(Some(max_steps), Arc::new(AtomicBool::new(false)))
    }
}

/// Counters describing how loop captures went since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Capture scans started by a `]` on a nonzero cell.
    pub captures: usize,
    /// Capture scans that ran out of history before finding a `[`.
    /// Nonzero means the program has an unmatched `]`.
    pub truncated_captures: usize,
}

/// Where a dispatched token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenSource {
    Stream,
    Replay,
}

impl TokenSource {
    fn label(self) -> &'static str {
        match self {
            TokenSource::Stream => "src",
            TokenSource::Replay => "rpl",
        }
    }
}

type InputProvider = Box<dyn FnMut() -> io::Result<Option<String>> + Send>;

/// Interpreter state: tape, history and replay stacks, and the custom
/// operators visible to programs.
pub struct Engine {
    tape: Tape,
    history: Vec<u8>,
    replay: Vec<u8>,
    registry: OperatorRegistry,
    diagnostics: Diagnostics,
    input_provider: Option<InputProvider>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// A fresh engine with no custom operators.
    pub fn new() -> Self {
        Self::with_registry(OperatorRegistry::new())
    }

    pub fn with_registry(registry: OperatorRegistry) -> Self {
        Self {
            tape: Tape::new(),
            history: Vec::new(),
            replay: Vec::new(),
            registry,
            diagnostics: Diagnostics::default(),
            input_provider: None,
        }
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Tokens dispatched and not yet taken back by a loop capture, oldest first.
    pub fn history(&self) -> &[u8] {
        &self.history
    }

    /// Tokens waiting to be replayed; the last element is dispatched next.
    pub fn pending_replay(&self) -> &[u8] {
        &self.replay
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OperatorRegistry {
        &mut self.registry
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Clear the tape, both stacks and the diagnostics. Custom operators
    /// and the input provider are kept.
    pub fn reset(&mut self) {
        self.tape.reset();
        self.history.clear();
        self.replay.clear();
        self.diagnostics = Diagnostics::default();
    }

    /// Provide an input provider. When set, ',' asks it for a line instead of stdin.
    /// Returning `Ok(None)` means end of input and leaves the cell unchanged.
    pub fn set_input_provider<F>(&mut self, provider: F)
    where
        F: FnMut() -> io::Result<Option<String>> + Send + 'static,
    {
        self.input_provider = Some(Box::new(provider));
    }

    /// Run `source` to completion against the current state and return the
    /// text written by `.`.
    pub fn interpret<R: Read>(&mut self, source: R) -> Result<String, EngineError> {
        self.execute(source, false, None)
    }

    /// Debug-run `source`, printing a step-by-step table of operations instead
    /// of producing I/O side effects:
    /// - '.' does not emit the character; the action is logged instead
    /// - ',' does not read input; an empty line is simulated
    pub fn interpret_debug<R: Read>(&mut self, source: R) -> Result<String, EngineError> {
        self.execute(source, true, None)
    }

    /// Execute with cooperative cancellation and optional step limit.
    pub fn interpret_with_control<R: Read>(
        &mut self,
        source: R,
        step_control: StepControl,
    ) -> Result<String, EngineError> {
        self.execute(source, false, Some(&step_control))
    }

    /// Debug-run with cooperative cancellation and optional step limit.
    pub fn interpret_debug_with_control<R: Read>(
        &mut self,
        source: R,
        step_control: StepControl,
    ) -> Result<String, EngineError> {
        self.execute(source, true, Some(&step_control))
    }

    fn execute<R: Read>(
        &mut self,
        source: R,
        debug_table: bool,
        step_control: Option<&StepControl>,
    ) -> Result<String, EngineError> {
        let mut stream = BufReader::new(source).bytes();
        let mut output = String::new();
        let mut step: usize = 0;

        debug!(custom_operators = self.registry.len(), debug_table, "starting run");
        if debug_table {
            println!("STEP | SRC | PTR   | CELL  | TOK | ACTION");
            println!("-----+-----+-------+-------+-----+------------------------------------------");
        }

        loop {
            // Replay always wins over fresh input.
            let (token, from) = match self.replay.pop() {
                Some(token) => (token, TokenSource::Replay),
                None => match stream.next() {
                    None => break,
                    Some(Ok(byte)) => (byte, TokenSource::Stream),
                    Some(Err(source)) => return Err(EngineError::FatalStream { source }),
                },
            };

            // Only tokens that are about to run count against the limit.
            if let Some(ctrl) = step_control {
                if ctrl.cancel_flag.load(Ordering::Relaxed) {
                    return Err(EngineError::Canceled);
                }
                if let Some(max) = ctrl.max_steps {
                    if step >= max {
                        return Err(EngineError::StepLimitExceeded { limit: max });
                    }
                }
            }

            let (ptr_before, cell_before) = (self.tape.pointer(), self.tape.read());
            let mut action: Option<String> = if debug_table { Some(String::new()) } else { None };

            let recorded = match token {
                MOVE_RIGHT => {
                    self.tape.move_right();
                    if let Some(a) = action.as_mut() { *a = format!("Moved pointer to index {}", self.tape.pointer()); }
                    true
                }
                MOVE_LEFT => {
                    self.tape.move_left();
                    if let Some(a) = action.as_mut() { *a = format!("Moved pointer to index {}", self.tape.pointer()); }
                    true
                }
                INCREMENT => {
                    self.tape.increment();
                    if let Some(a) = action.as_mut() { *a = format!("Increment cell[{}] from {} to {}", ptr_before, cell_before, self.tape.read()); }
                    true
                }
                DECREMENT => {
                    self.tape.decrement();
                    if let Some(a) = action.as_mut() { *a = format!("Decrement cell[{}] from {} to {}", ptr_before, cell_before, self.tape.read()); }
                    true
                }
                OUTPUT => {
                    let ch = cell_char(self.tape.read());
                    if let Some(a) = action.as_mut() {
                        *a = format!("Output {:?} (suppressed in debug)", ch);
                    } else {
                        output.push(ch);
                    }
                    true
                }
                INPUT => {
                    if let Some(a) = action.as_mut() {
                        *a = "Read line -> simulated empty line (cell unchanged)".to_string();
                    } else {
                        self.read_input()?;
                    }
                    true
                }
                LOOP_OPEN => {
                    if let Some(a) = action.as_mut() { *a = "Open loop (no check)".to_string(); }
                    true
                }
                LOOP_CLOSE => true,
                other => match self.registry.lookup(other) {
                    Some(op) => {
                        let after = op.apply(cell_before);
                        self.tape.write(after);
                        if let Some(a) = action.as_mut() { *a = format!("Custom {} on cell[{}] from {} to {}", op, ptr_before, cell_before, after); }
                        true
                    }
                    None => {
                        if let Some(a) = action.as_mut() { *a = format!("Ignored byte 0x{:02x}", other); }
                        false
                    }
                },
            };

            if recorded {
                self.history.push(token);
            }

            if token == LOOP_CLOSE {
                if self.tape.read() != 0 {
                    let captured = self.capture_loop_body();
                    if let Some(a) = action.as_mut() { *a = format!("Cell != 0; replay {} tokens", captured); }
                } else if let Some(a) = action.as_mut() {
                    *a = "Exit loop (cell is 0)".to_string();
                }
            }

            if debug_table {
                println!(
                    "{:<4} | {} | {:<5} | {:<5} |  {}  | {}",
                    step,
                    from.label(),
                    ptr_before,
                    cell_before,
                    printable(token),
                    action.unwrap_or_default()
                );
            }

            step += 1;
        }

        debug!(
            steps = step,
            history = self.history.len(),
            truncated_captures = self.diagnostics.truncated_captures,
            "run finished"
        );
        Ok(output)
    }

    /// Move the tokens of the loop that just closed from the history stack to
    /// the replay stack, boundary brackets included, so that popping the
    /// replay stack yields them in source order. Returns how many tokens
    /// were moved.
    fn capture_loop_body(&mut self) -> usize {
        self.diagnostics.captures += 1;
        let mut depth: usize = 0;
        let mut seen_any = false;
        let mut captured = 0;

        while let Some(token) = self.history.pop() {
            self.replay.push(token);
            captured += 1;

            // The first pop is the `]` that triggered this capture.
            if token == LOOP_CLOSE && seen_any {
                depth += 1;
            }
            if token == LOOP_OPEN {
                if depth == 0 {
                    trace!(captured, "captured loop body");
                    return captured;
                }
                depth -= 1;
            }
            seen_any = true;
        }

        self.diagnostics.truncated_captures += 1;
        warn!(captured, "history exhausted before a matching '['; replaying a partial loop body");
        captured
    }

    fn read_input(&mut self) -> Result<(), EngineError> {
        let line = match self.input_provider.as_mut() {
            Some(provider) => provider(),
            None => read_stdin_line(),
        }
        .map_err(|source| EngineError::Input { source })?;

        let Some(line) = line else {
            return Ok(());
        };
        // Only the line terminator is dropped; the rest must be plain digits.
        let text = line.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(());
        }
        let value = text.parse::<Cell>().map_err(|source| EngineError::FatalInputParse {
            line: text.to_string(),
            source,
        })?;
        self.tape.write(value);
        Ok(())
    }
}

/// Run `source` on a fresh engine that sees the operators in `registry`.
pub fn interpret<R: Read>(source: R, registry: &OperatorRegistry) -> Result<String, EngineError> {
    Engine::with_registry(registry.clone()).interpret(source)
}

fn read_stdin_line() -> io::Result<Option<String>> {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

/// The character a cell prints as. Values that are not Unicode scalar
/// values print as U+FFFD.
fn cell_char(cell: Cell) -> char {
    char::from_u32(cell).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn printable(token: u8) -> char {
    if token.is_ascii_graphic() { token as char } else { '?' }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CustomOperator;
    use std::collections::VecDeque;

    fn run(code: &str) -> (Engine, String) {
        let mut engine = Engine::new();
        let out = engine.interpret(code.as_bytes()).expect("program should run");
        (engine, out)
    }

    fn lines(input: &'static [&'static str]) -> impl FnMut() -> io::Result<Option<String>> + Send + 'static {
        let mut queue: VecDeque<String> = input.iter().map(|s| s.to_string()).collect();
        move || Ok(queue.pop_front())
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "boom"))
        }
    }

    #[test]
    fn hello_world() {
        let code = ">++++++++[<+++++++++>-]<.>++++[<+++++++>-]<+.+++++++..+++.>>++++++[<+++++++>-]<++.------------.>++++++[<+++++++++>-]<+.<.+++.------.--------.>>>++++[<++++++++>-]<+.";
        let (_, out) = run(code);
        assert_eq!(out, "Hello, World!");
    }

    #[test]
    fn arithmetic_and_moves() {
        let (engine, out) = run("+++>++<-.");
        assert_eq!(engine.tape().cells()[0], 2);
        assert_eq!(engine.tape().cells()[1], 2);
        assert_eq!(engine.tape().pointer(), 0);
        assert_eq!(out, "\u{2}");
    }

    #[test]
    fn simple_loop_clears_cell() {
        let (engine, _) = run("+++[-]");
        assert_eq!(engine.tape().read(), 0);
        assert_eq!(engine.diagnostics().captures, 2);
        assert!(engine.pending_replay().is_empty());
    }

    #[test]
    fn loop_entered_on_zero_runs_body_once() {
        // `[` does not check; the body runs, the cell floor-wraps to 255
        // and the loop then counts it back down to zero.
        let (engine, _) = run("[-]");
        assert_eq!(engine.tape().read(), 0);
        assert_eq!(engine.diagnostics().captures, 255);
    }

    #[test]
    fn nested_loops_multiply() {
        // 3 * 4 into cell 2 via an inner loop
        let (engine, _) = run("+++[>++++[>+<-]<-]");
        assert_eq!(engine.tape().cells()[0], 0);
        assert_eq!(engine.tape().cells()[1], 0);
        assert_eq!(engine.tape().cells()[2], 12);
        assert_eq!(engine.diagnostics().truncated_captures, 0);
    }

    #[test]
    fn history_keeps_last_iteration_only() {
        let (engine, _) = run("++[-]");
        assert_eq!(engine.history(), b"++[-]");
    }

    #[test]
    fn non_instruction_bytes_are_ignored_and_not_recorded() {
        let (engine, out) = run("+ a\n+.");
        assert_eq!(out, "\u{2}");
        assert_eq!(engine.history(), b"++.");
    }

    #[test]
    fn output_above_ascii_is_a_code_point() {
        let mut engine = Engine::new();
        engine.tape.write(0x263A);
        let out = engine.interpret(".".as_bytes()).unwrap();
        assert_eq!(out, "\u{263A}");
    }

    #[test]
    fn output_of_surrogate_is_replacement_char() {
        let mut engine = Engine::new();
        engine.tape.write(0xD800);
        let out = engine.interpret(".".as_bytes()).unwrap();
        assert_eq!(out, "\u{FFFD}");
    }

    #[test]
    fn custom_operator_is_applied_and_recorded() {
        let mut engine = Engine::new();
        engine
            .registry_mut()
            .register(CustomOperator::new('d', |c| c * 2))
            .unwrap();
        let out = engine.interpret("+++dd.".as_bytes()).unwrap();
        assert_eq!(out, "\u{c}");
        assert_eq!(engine.history(), b"+++dd.");
    }

    #[test]
    fn custom_operator_inside_loop_is_replayed() {
        let mut engine = Engine::new();
        engine
            .registry_mut()
            .register(CustomOperator::new('h', |c| c / 2))
            .unwrap();
        // 8 -> 4 -> 2 -> 1 -> 0
        engine.interpret("++++++++[h]".as_bytes()).unwrap();
        assert_eq!(engine.tape().read(), 0);
        assert_eq!(engine.diagnostics().captures, 3);
    }

    #[test]
    fn builtins_ignore_registry_contents() {
        let mut with_ops = Engine::new();
        with_ops
            .registry_mut()
            .register(CustomOperator::new('x', |_| 7))
            .unwrap();
        let code = "++>+<-.>.";
        let plain = Engine::new().interpret(code.as_bytes()).unwrap();
        let extended = with_ops.interpret(code.as_bytes()).unwrap();
        assert_eq!(plain, extended);
    }

    #[test]
    fn input_line_is_parsed_into_cell() {
        let mut engine = Engine::new();
        engine.set_input_provider(lines(&["65\n", "66\r\n", "67"]));
        let out = engine.interpret(",.,.,.".as_bytes()).unwrap();
        assert_eq!(out, "ABC");
    }

    #[test]
    fn signed_or_padded_input_is_rejected() {
        const CASES: [&[&str]; 3] = [&["+65\n"], &["  66 \n"], &["-1\n"]];
        for input in CASES {
            let mut engine = Engine::new();
            engine.set_input_provider(lines(input));
            let result = engine.interpret(",".as_bytes());
            assert!(
                matches!(result, Err(EngineError::FatalInputParse { .. })),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn empty_input_line_leaves_cell_unchanged() {
        let mut engine = Engine::new();
        engine.set_input_provider(lines(&["\n"]));
        engine.interpret("+++,,".as_bytes()).unwrap();
        assert_eq!(engine.tape().read(), 3);
    }

    #[test]
    fn malformed_input_is_fatal() {
        let mut engine = Engine::new();
        engine.set_input_provider(lines(&["abc"]));
        let result = engine.interpret(",.".as_bytes());
        assert!(matches!(result, Err(EngineError::FatalInputParse { ref line, .. }) if line == "abc"));
    }

    #[test]
    fn stream_failure_is_fatal() {
        let mut engine = Engine::new();
        let result = engine.interpret(FailingReader);
        assert!(matches!(result, Err(EngineError::FatalStream { .. })));
    }

    #[test]
    fn infinite_loop_hits_step_limit() {
        let mut engine = Engine::new();
        let result = engine.interpret_with_control("+[]".as_bytes(), StepControl::with_max_steps(1_000));
        assert!(matches!(result, Err(EngineError::StepLimitExceeded { limit: 1_000 })));
        // `[]` replays forever without growing the history
        assert!(engine.history().len() <= 3);
    }

    #[test]
    fn terminating_loop_fits_within_step_limit() {
        let mut engine = Engine::new();
        let result = engine.interpret_with_control("+++[-]".as_bytes(), StepControl::with_max_steps(1_000));
        assert!(result.is_ok());
    }

    #[test]
    fn program_of_exactly_max_steps_completes() {
        let mut engine = Engine::new();
        let result = engine.interpret_with_control("+".as_bytes(), StepControl::with_max_steps(1));
        assert_eq!(result.unwrap(), "");
        assert_eq!(engine.tape().read(), 1);

        // One token more than the limit aborts before it runs.
        let mut engine = Engine::new();
        let result = engine.interpret_with_control("++".as_bytes(), StepControl::with_max_steps(1));
        assert!(matches!(result, Err(EngineError::StepLimitExceeded { limit: 1 })));
        assert_eq!(engine.tape().read(), 1);
    }

    #[test]
    fn raised_cancel_flag_stops_the_run() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut engine = Engine::new();
        let result = engine.interpret_with_control("+".as_bytes(), StepControl::new(None, flag));
        assert!(matches!(result, Err(EngineError::Canceled)));
    }

    #[test]
    fn unmatched_close_is_reported_in_diagnostics() {
        let mut engine = Engine::new();
        // The stray `]` replays `+]` forever; cap it.
        let result = engine.interpret_with_control("+]".as_bytes(), StepControl::with_max_steps(50));
        assert!(matches!(result, Err(EngineError::StepLimitExceeded { .. })));
        assert!(engine.diagnostics().truncated_captures > 0);
    }

    #[test]
    fn unmatched_close_on_zero_cell_is_harmless() {
        let (engine, _) = run("]");
        assert_eq!(engine.diagnostics(), Diagnostics::default());
        assert_eq!(engine.history(), b"]");
    }

    #[test]
    fn reset_keeps_registry() {
        let mut engine = Engine::new();
        engine
            .registry_mut()
            .register(CustomOperator::new('z', |_| 0))
            .unwrap();
        engine.interpret("+++>".as_bytes()).unwrap();
        engine.reset();
        assert_eq!(engine.tape().pointer(), 0);
        assert!(engine.history().is_empty());
        assert!(engine.registry().lookup('z').is_some());
    }

    #[test]
    fn state_carries_over_without_reset() {
        let mut engine = Engine::new();
        engine.interpret("+++".as_bytes()).unwrap();
        engine.interpret("+".as_bytes()).unwrap();
        assert_eq!(engine.tape().read(), 4);
    }

    #[test]
    fn debug_run_suppresses_output_but_advances_state() {
        let mut engine = Engine::new();
        let out = engine.interpret_debug("+++.".as_bytes()).unwrap();
        assert!(out.is_empty());
        assert_eq!(engine.tape().read(), 3);
    }
}
