use std::io::{self, IsTerminal, Write};
use clap::Args;

use crate::cli_util::{build_registry, RunLimits};
use crate::config::config;
use crate::ops::{parse_binding, NamedOperation};
use crate::repl::{execute_bare_once, repl_loop, select_mode, ModeFlagOverride, ReplMode, Session};

#[derive(Args, Debug, Default)]
#[command(disable_help_flag = true)]
pub struct ReplArgs {
    /// Force non-interactive bare mode
    #[arg(long = "bare", conflicts_with = "editor")]
    pub bare: bool,

    /// Force interactive mode (errors if stdin is not a TTY)
    #[arg(long = "editor", conflicts_with = "bare")]
    pub editor: bool,

    /// Bind a custom operator for the whole session, e.g. `--op f=fibonacci`
    #[arg(long = "op", value_name = "CH=NAME", value_parser = parse_binding)]
    pub ops: Vec<(char, NamedOperation)>,

    /// Show this help
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    pub help: bool,
}

// Public entry point for the REPL from main.rs
pub fn run(program: &str, args: ReplArgs) -> i32 {
    if args.help {
        usage_and_exit(program, 0);
    }

    let mode_flag = if args.bare {
        ModeFlagOverride::Bare
    } else if args.editor {
        ModeFlagOverride::Editor
    } else {
        ModeFlagOverride::None
    };

    // Determine mode: flags -> env -> auto-detect via is_terminal()
    let mode = match select_mode(mode_flag) {
        Ok(m) => m,
        Err(msg) => {
            eprintln!("{program}: {msg}");
            let _ = io::stderr().flush();
            return 1;
        }
    };

    let cfg = config();
    let registry = match build_registry(cfg, &args.ops) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("{program}: {msg}");
            let _ = io::stderr().flush();
            return 1;
        }
    };
    let session = Session::new(registry, RunLimits::resolve(cfg, None, None));

    // Install SIGINT (ctrl+c) handler to flush and exit(0) immediately
    if let Err(e) = ctrlc::set_handler(|| {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        std::process::exit(0);
    }) {
        eprintln!("{program}: failed to set ctrl+c handler: {e}");
        let _ = io::stderr().flush();
        return 1;
    }

    match mode {
        ReplMode::Editor => {
            // Print banners/prompts only if stderr is a TTY
            if io::stderr().is_terminal() {
                eprintln!("Brainfuck REPL (interactive editor mode)");
                eprintln!("Ctrl+d/Ctrl+z Enter (Windows) executes the current buffer. Type :help for meta commands, ctrl+c to exit");
                let _ = io::stderr().flush();
            }

            if let Err(e) = repl_loop(&session) {
                eprintln!("{program}: REPL error: {e}");
                let _ = io::stderr().flush();
                return 1;
            }

            0
        }
        ReplMode::Bare => match execute_bare_once(&session) {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("{program}: REPL error: {e}");
                let _ = io::stderr().flush();
                1
            }
        },
    }
}

fn usage_and_exit(program: &str, code: i32) -> ! {
    eprintln!(
        r#"Usage:
  {0} repl [--bare|--editor] [--op CH=NAME]...

Options:
  --help,   -h        Show this help
  --bare              Force non-interactive bare mode
  --editor            Force interactive editor mode (errors if stdin is not a TTY)
  --op CH=NAME        Bind character CH to a named operation for the session

Description:
  Starts a REPL where you can enter programs and execute them live.

Meta commands (line starts with ":")
  :help            Show the meta command list
  :ops             List the custom operators bound in this session
  :exit            Exit immediately (code 0)

Notes:
    - Characters that are neither instructions nor bound operators are ignored.
    - Ctrl+D executes the current buffer on *nix/macOS.
    - Ctrl+Z and Enter will execute the current buffer on Windows.
    - Ctrl+C exits the REPL immediately.
    - The REPL will print a newline after each execution for readability.
    - Each execution starts with a fresh tape; custom operators persist for the session.
    - The REPL will exit after a single execution if the environment variable `BF_REPL_ONCE` is set to `1`.
    - Mode selection:
        * Flags: --bare|--editor override environment and auto-detection.
        * Env: BF_REPL_MODE=bare|editor overrides auto-detection (flags, when present, will override env).
        * Auto-detect: if stdin is a TTY, starts in interactive editor mode; otherwise, bare mode.
        * Prompts/banners suppressed if stderr is not a TTY.
    - BF_TIMEOUT_MS and BF_MAX_STEPS (or [limits] in bf.toml) bound every execution.
"#,
        program
    );
    let _ = io::stderr().flush();
    std::process::exit(code);
}
