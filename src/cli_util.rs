use std::io::{self, IsTerminal, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::engine::{Engine, EngineError, StepControl};
use crate::ops::NamedOperation;
use crate::registry::OperatorRegistry;

/// Install the stderr log subscriber. `BF_LOG` takes the usual
/// `EnvFilter` syntax and defaults to `warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("BF_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Registry holding the operators from `bf.toml` followed by the ones given
/// on the command line. A failed registration is reported as a message.
pub fn build_registry(
    config: &Config,
    bindings: &[(char, NamedOperation)],
) -> Result<OperatorRegistry, String> {
    let mut registry = OperatorRegistry::new();
    config
        .register_operators(&mut registry)
        .map_err(|e| format!("invalid [operators] in config: {e}"))?;
    for &(code, op) in bindings {
        registry
            .register(op.bind(code))
            .map_err(|e| format!("cannot bind '{code}' to {op}: {e}"))?;
    }
    Ok(registry)
}

/// Limits applied to one CLI or REPL run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// `None` waits for the run however long it takes.
    pub timeout_ms: Option<u64>,
    pub max_steps: Option<usize>,
}

impl RunLimits {
    /// Limits from flags, falling back to environment, config file and defaults.
    pub fn resolve(config: &Config, timeout_flag: Option<u64>, max_steps_flag: Option<u64>) -> Self {
        Self {
            timeout_ms: config.resolve_timeout_ms(timeout_flag, io::stdin().is_terminal()),
            max_steps: config
                .resolve_max_steps(max_steps_flag)
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
        }
    }
}

/// Run `source` on a fresh engine on a worker thread. A run that outlives
/// the wall-clock timeout is cancelled and reported as
/// [`EngineError::Canceled`].
pub fn execute_with_limits(
    registry: OperatorRegistry,
    source: Box<dyn Read + Send>,
    debug_table: bool,
    limits: RunLimits,
) -> Result<String, EngineError> {
    debug!(?limits, operators = registry.len(), "executing");

    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<Result<String, EngineError>>();
    let cancel_clone = cancel.clone();

    thread::spawn(move || {
        let mut engine = Engine::with_registry(registry);
        let ctrl = StepControl::new(limits.max_steps, cancel_clone);
        let res = if debug_table {
            engine.interpret_debug_with_control(source, ctrl)
        } else {
            engine.interpret_with_control(source, ctrl)
        };
        let _ = tx.send(res);
    });

    let Some(timeout_ms) = limits.timeout_ms else {
        return rx.recv().unwrap_or_else(|_| Err(worker_gone()));
    };

    match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
        Ok(res) => res,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            cancel.store(true, Ordering::Relaxed);
            Err(EngineError::Canceled)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(worker_gone()),
    }
}

fn worker_gone() -> EngineError {
    EngineError::Input {
        source: io::Error::other("interpreter thread exited without a result"),
    }
}

/// Print an [`EngineError`] as a one-line message on stderr.
/// If `program` is `Some("bf")`, prefix messages with "bf: ..." for CLI run mode
pub fn print_engine_error(program: Option<&str>, err: &EngineError, limits: RunLimits) {
    let msg = match err {
        EngineError::FatalStream { source } => format!("I/O error: failed to read program: {source}"),
        EngineError::FatalInputParse { line, source } => {
            format!("Input error: {line:?} is not an unsigned integer ({source})")
        }
        EngineError::Input { source } => format!("I/O error: failed to read input: {source}"),
        // Abort messages are never prefixed so they read the same everywhere.
        EngineError::StepLimitExceeded { .. } => {
            eprintln!("{err}");
            let _ = io::stderr().flush();
            return;
        }
        EngineError::Canceled => {
            match limits.timeout_ms {
                Some(ms) => eprintln!("Execution aborted: wall-clock timeout exceeded ({ms} ms)"),
                None => eprintln!("{err}"),
            }
            let _ = io::stderr().flush();
            return;
        }
    };

    match program {
        Some(p) => eprintln!("{p}: {msg}"),
        None => eprintln!("{msg}"),
    }
    let _ = io::stderr().flush();
}

/// Keep only the bytes a run can act on: the eight built-in tokens and any
/// code bound in `registry`.
pub fn executable_only(s: &str, registry: &OperatorRegistry) -> String {
    s.chars()
        .filter(|&c| {
            matches!(c, '>' | '<' | '+' | '-' | '.' | ',' | '[' | ']')
                || registry.lookup(c).is_some()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_only_keeps_bound_codes() {
        let mut reg = OperatorRegistry::new();
        reg.register(NamedOperation::Zero.bind('z')).unwrap();
        assert_eq!(executable_only("+ z\nq[-]", &reg), "+z[-]");
    }

    #[test]
    fn run_without_timeout_waits_for_the_result() {
        let limits = RunLimits { timeout_ms: None, max_steps: None };
        let source = Box::new(io::Cursor::new(b"++++++++[>++++++++<-]>+.".to_vec()));
        let out = execute_with_limits(OperatorRegistry::new(), source, false, limits).unwrap();
        assert_eq!(out, "A");
    }

    #[test]
    fn timeout_cancels_a_runaway_program() {
        let limits = RunLimits { timeout_ms: Some(50), max_steps: None };
        let source = Box::new(io::Cursor::new(b"+[]".to_vec()));
        let err = execute_with_limits(OperatorRegistry::new(), source, false, limits).unwrap_err();
        assert!(matches!(err, EngineError::Canceled));
    }

    #[test]
    fn command_line_bindings_follow_config() {
        let cfg = Config::from_toml("[operators]\nf = \"fibonacci\"\n").unwrap();
        let reg = build_registry(&cfg, &[('d', NamedOperation::Double)]).unwrap();
        assert_eq!(reg.len(), 2);

        let err = build_registry(&cfg, &[('f', NamedOperation::Zero)]).unwrap_err();
        assert!(err.contains("already registered"));
    }
}
