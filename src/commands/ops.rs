use std::io::{self, Write};
use clap::Args;

use crate::config::{config, config_path};
use crate::ops::NamedOperation;
use crate::registry::OperatorRegistry;

#[derive(Args, Debug)]
#[command(disable_help_flag = true)]
pub struct OpsArgs {
    /// Show this help
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    pub help: bool,
}

/// List the named operations and the operators bound in `bf.toml`.
pub fn run(program: &str, args: OpsArgs) -> i32 {
    if args.help {
        usage_and_exit(program, 0);
    }

    println!("Named operations (bind with --op CH=NAME):");
    for op in NamedOperation::ALL {
        println!("  {:<10} {}", op.name(), op.summary());
    }

    let location = config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<no config directory>".to_string());

    let mut registry = OperatorRegistry::new();
    if let Err(e) = config().register_operators(&mut registry) {
        eprintln!("{program}: invalid [operators] in {location}: {e}");
        let _ = io::stderr().flush();
        return 1;
    }

    println!();
    if registry.is_empty() {
        println!("No operators configured in {location}");
    } else {
        println!("Operators configured in {location}:");
        for op in registry.list() {
            println!("  {op}");
        }
    }
    let _ = io::stdout().flush();
    0
}

fn usage_and_exit(program: &str, code: i32) -> ! {
    eprintln!(
        r#"Usage:
  {0} ops   # List named operations and configured custom operators

Options:
  --help,   -h        Show this help

Configuration:
  Operators can be bound permanently in bf.toml (BF_CONFIG overrides the location):

    [operators]
    f = "fibonacci"
"#,
        program
    );
    let _ = io::stderr().flush();
    std::process::exit(code);
}
