use assert_cmd::Command;
use predicates::prelude::*;
use std::time::Duration;

fn make_cmd() -> Command {
    let mut cmd = Command::cargo_bin("bf").expect("bf binary");
    cmd.env("BF_CONFIG", "/nonexistent/bf.toml")
        .env_remove("BF_REPL_MODE")
        .timeout(Duration::from_secs(5));
    cmd
}

#[test]
fn repl_empty_input_exits_clean_and_quiet() {
    // In non-TTY (piped) stdin, REPL auto-selects bare mode and prints no prompt.
    make_cmd()
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty());
}

#[test]
fn repl_valid_program_outputs_and_exits() {
    // Print 'A' (65)
    let program = "+++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++++.";
    make_cmd()
        .env("BF_REPL_ONCE", "1")
        .write_stdin(program)
        .assert()
        .success()
        .stdout("A\n")
        .stderr(predicate::str::is_empty());
}

#[test]
fn repl_subcommand_with_bound_operator() {
    make_cmd()
        .args(["repl", "--bare", "--op", "f=fibonacci"])
        .write_stdin("+++++++++++ f -- .\n")
        .assert()
        .success()
        .stdout("W\n");
}

#[test]
fn repl_comment_text_is_ignored() {
    make_cmd()
        .write_stdin("add three: +++\nprint it: .\n")
        .assert()
        .success()
        .stdout("\u{3}\n");
}

#[test]
fn meta_exit_exits_code_0_and_no_stdout() {
    make_cmd()
        .write_stdin(":exit\n+++.\n")
        .assert()
        .code(0)
        .stdout(predicate::str::is_empty());
}

#[test]
fn meta_ops_lists_session_operators_on_stderr() {
    make_cmd()
        .args(["repl", "--bare", "--op", "d=double"])
        .write_stdin(":ops\n")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("'d' (100) => double"));
}

#[test]
fn forced_editor_on_non_tty_errors() {
    make_cmd()
        .arg("repl")
        .arg("--editor")
        .write_stdin("+++.")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("stdin is not a TTY"));
}

#[test]
fn env_mode_respected_flags_override() {
    make_cmd()
        .env("BF_REPL_MODE", "editor")
        .arg("repl")
        .arg("--bare")
        .write_stdin("+++.")
        .assert()
        .success()
        .stdout("\u{3}\n");
}

#[test]
fn input_after_drained_stdin_leaves_cell_unchanged() {
    // Bare mode consumes stdin as the program, so `,` sees EOF.
    make_cmd()
        .write_stdin("+++,.")
        .assert()
        .success()
        .stdout("\u{3}\n");
}
