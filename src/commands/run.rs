use clap::Args;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};

use crate::cli_util::{build_registry, execute_with_limits, print_engine_error, RunLimits};
use crate::config::config;
use crate::ops::{parse_binding, NamedOperation};

#[derive(Args, Debug)]
#[command(disable_help_flag = true)]
pub struct RunArgs {
    /// Print a step-by-step table of operations instead of executing
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Stream the program from PATH instead of positional "<code>"
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Bind a custom operator, e.g. `--op f=fibonacci` (repeatable)
    #[arg(long = "op", value_name = "CH=NAME", value_parser = parse_binding)]
    pub ops: Vec<(char, NamedOperation)>,

    /// Concatenated program parts
    #[arg(value_name = "code", trailing_var_arg = true)]
    pub code: Vec<String>,

    /// Wall-clock timeout in milliseconds (fallback BF_TIMEOUT_MS, then bf.toml; default 2_000, none when stdin is a terminal)
    #[arg(long = "timeout", value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Maximum interpreter steps before abort (fallback BF_MAX_STEPS, then bf.toml; default unlimited)
    #[arg(long = "max-steps", value_name = "N")]
    pub max_steps: Option<u64>,

    /// Show this help
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    pub help: bool,
}

pub fn run(program: &str, args: RunArgs) -> i32 {
    if args.help {
        usage_and_exit(program, 0);
    }

    let RunArgs {
        debug,
        file,
        ops,
        code,
        timeout_ms,
        max_steps,
        ..
    } = args;

    if file.is_none() && code.is_empty() {
        usage_and_exit(program, 2);
    }

    if file.is_some() && !code.is_empty() {
        eprintln!("{program}: cannot use positional code together with --file");
        usage_and_exit(program, 2);
    }

    let source: Box<dyn Read + Send> = match file {
        Some(path) => match File::open(&path) {
            Ok(f) => Box::new(f),
            Err(e) => {
                eprintln!("{program}: failed to open {path}: {e}");
                let _ = io::stderr().flush();
                return 1;
            }
        },
        None => Box::new(Cursor::new(code.join("").into_bytes())),
    };

    let cfg = config();
    let registry = match build_registry(cfg, &ops) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("{program}: {msg}");
            let _ = io::stderr().flush();
            return 1;
        }
    };

    // Resolve limits: flags -> env -> config file -> defaults
    let limits = RunLimits::resolve(cfg, timeout_ms, max_steps);

    let exit_code = match execute_with_limits(registry, source, debug, limits) {
        Ok(output) => {
            print!("{output}");
            0
        }
        Err(err) => {
            print_engine_error(Some(program), &err, limits);
            1
        }
    };

    // For readability, ensure output ends with a newline
    println!();
    let _ = io::stdout().flush();
    exit_code
}

fn usage_and_exit(program: &str, code: i32) -> ! {
    eprintln!(
        r#"Usage:
  {0} run [--debug|-d] [--op CH=NAME]... "<code>"
  {0} run [--debug|-d] [--op CH=NAME]... --file <PATH>

Options:
  --file,  -f <PATH>   Stream the program from PATH instead of positional "<code>"
  --op CH=NAME         Bind character CH to a named operation (see `{0} ops`)
  --debug, -d          Print a step-by-step table of operations instead of executing
  --timeout <MS>       Wall-clock timeout (BF_TIMEOUT_MS, bf.toml; default 2000,
                       or no limit when stdin is a terminal)
  --max-steps <N>      Abort after N steps (BF_MAX_STEPS, bf.toml; default unlimited)
  --help,  -h          Show this help

Notes:
- Input (`,`) reads one line of digits from stdin into the current cell;
  an empty line or EOF leaves the cell unchanged.
- Bytes that are neither instructions nor bound operators are ignored.
- Loops always run their body at least once: `[` does not test the cell.

Examples:
- Run a program file:
    {0} run --file ./program.bf
- Use a Fibonacci operator on `f`:
    {0} run --op f=fibonacci "+++++++++++f--."
"#,
        program
    );
    let _ = io::stderr().flush();
    std::process::exit(code);
}
