use clap::{Parser, Subcommand};
use replay_bf::cli_util::init_logging;
use replay_bf::commands::{ops, repl, run};
use std::env;
use std::io::{self, Write};

fn print_top_usage_and_exit(program: &str, code: i32) -> ! {
    eprintln!(
        r#"Usage:
  {0} run  [--debug|-d] [--op CH=NAME]... "<code>"      # Run a program (args are concatenated)
  {0} run  [--debug|-d] [--op CH=NAME]... --file <PATH> # Stream a program from a file
  {0} repl [--bare|--editor] [--op CH=NAME]...          # Start a REPL (default when no subcommand is given)
  {0} ops                                                # List named operations and configured operators

Run "{0} <subcommand> --help" for more info.
Set BF_LOG (e.g. BF_LOG=debug) to see interpreter logs on stderr.
"#,
        program
    );
    let _ = io::stderr().flush();
    std::process::exit(code);
}

#[derive(Parser, Debug)]
#[command(name = "bf", disable_help_flag = true, disable_help_subcommand = true)]
struct Cli {
    /// Show this help
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    help: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(run::RunArgs),
    Repl(repl::ReplArgs),
    Ops(ops::OpsArgs),
}

fn main() {
    // We still pull the program name for help rendering consistency
    let program = env::args().next().unwrap_or_else(|| String::from("bf"));

    init_logging();

    let cli = Cli::parse();

    if cli.help {
        print_top_usage_and_exit(&program, 0);
    }

    let code = match cli.command {
        Some(Command::Run(args)) => run::run(&program, args),
        Some(Command::Repl(args)) => repl::run(&program, args),
        Some(Command::Ops(args)) => ops::run(&program, args),
        None => repl::run(&program, repl::ReplArgs::default()),
    };

    std::process::exit(code);
}
