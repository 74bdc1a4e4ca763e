use std::env;
use std::io::{self, Cursor, IsTerminal, Read, Write};

use nu_ansi_term::Style;
use reedline::{DefaultPrompt, DefaultPromptSegment, Highlighter, HistoryItem, Signal, StyledText};

use crate::cli_util::{self, RunLimits};
use crate::registry::OperatorRegistry;

/// State shared by every submission of one REPL session. Each submission
/// runs on a fresh engine; only the custom operators carry over.
pub struct Session {
    registry: OperatorRegistry,
    limits: RunLimits,
}

/// What the REPL should do after a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

impl Session {
    pub fn new(registry: OperatorRegistry, limits: RunLimits) -> Self {
        Self { registry, limits }
    }

    /// Handle one submission: `:` lines are meta commands, everything else is
    /// program text.
    pub fn submit(&self, submission: &str) -> Flow {
        let mut code = String::new();
        for line in submission.lines() {
            let trimmed = line.trim();
            if let Some(meta) = trimmed.strip_prefix(':') {
                if self.meta(meta) == Flow::Exit {
                    return Flow::Exit;
                }
            } else {
                code.push_str(line);
                code.push('\n');
            }
        }

        let filtered = cli_util::executable_only(&code, &self.registry);
        if !filtered.is_empty() {
            self.execute(filtered);
        }
        Flow::Continue
    }

    fn meta(&self, command: &str) -> Flow {
        match command.split_whitespace().next().unwrap_or("") {
            "exit" | "quit" => return Flow::Exit,
            "help" => print_meta_help(),
            "ops" => {
                if self.registry.is_empty() {
                    eprintln!("no custom operators bound");
                } else {
                    for op in self.registry.list() {
                        eprintln!("  {op}");
                    }
                }
            }
            other => eprintln!("unknown meta command ':{other}' (try :help)"),
        }
        let _ = io::stderr().flush();
        Flow::Continue
    }

    /// Executes a single program contained in `buffer`.
    /// - Program output goes to stdout.
    /// - Errors are printed concisely to stderr.
    /// - A newline is always written to stdout after execution (success or error)
    ///   so that the prompt begins at column 0 on the next iteration.
    fn execute(&self, buffer: String) {
        let source = Box::new(Cursor::new(buffer.into_bytes()));
        match cli_util::execute_with_limits(self.registry.clone(), source, false, self.limits) {
            Ok(output) => print!("{output}"),
            Err(err) => cli_util::print_engine_error(None, &err, self.limits),
        }
        println!();
        let _ = io::stdout().flush(); // Ensure output is flushed
    }
}

fn print_meta_help() {
    eprintln!("Meta commands (line starts with \":\")");
    eprintln!("  :help   Show this help");
    eprintln!("  :ops    List the custom operators bound in this session");
    eprintln!("  :exit   Exit immediately (code 0)");
}

pub fn repl_loop(session: &Session) -> io::Result<()> {
    let mut editor = init_line_editor(&session.registry)?;
    let prompt = DefaultPrompt::new(DefaultPromptSegment::Basic("bf".to_string()), DefaultPromptSegment::Empty);
    let once = env::var("BF_REPL_ONCE").is_ok_and(|v| v == "1");

    loop {
        let submission = match editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => buffer,
            Ok(_) => break,
            Err(e) => {
                eprintln!("repl: editor error: {e}");
                break;
            }
        };
        if submission.trim().is_empty() {
            continue;
        }

        // History keeps whole programs, not lines.
        let _ = editor.history_mut().save(HistoryItem::from_command_line(submission.clone()));

        if session.submit(&submission) == Flow::Exit || once {
            return Ok(());
        }
    }

    // Leave the shell prompt on a fresh line.
    println!();
    io::stdout().flush()
}

fn init_line_editor(registry: &OperatorRegistry) -> io::Result<reedline::Reedline> {
    use reedline::{
        default_emacs_keybindings, EditCommand, Emacs, KeyCode, KeyModifiers, Reedline, ReedlineEvent,
    };

    // Enter inserts a newline; the whole buffer is submitted with Ctrl+D
    // (Ctrl+Z on Windows). Plain arrows stay inside the buffer, modified
    // arrows walk the submission history.
    let mut keybindings = default_emacs_keybindings();
    let bindings = [
        (KeyModifiers::NONE, KeyCode::Enter, ReedlineEvent::Edit(vec![EditCommand::InsertNewline])),
        (KeyModifiers::CONTROL, KeyCode::Char('d'), ReedlineEvent::Submit),
        (KeyModifiers::CONTROL, KeyCode::Char('z'), ReedlineEvent::Submit),
        (KeyModifiers::NONE, KeyCode::Up, ReedlineEvent::Up),
        (KeyModifiers::NONE, KeyCode::Down, ReedlineEvent::Down),
    ];
    for (modifiers, key, event) in bindings {
        keybindings.add_binding(modifiers, key, event);
    }
    for modifiers in [KeyModifiers::ALT, KeyModifiers::CONTROL] {
        keybindings.add_binding(modifiers, KeyCode::Up, ReedlineEvent::PreviousHistory);
        keybindings.add_binding(modifiers, KeyCode::Down, ReedlineEvent::NextHistory);
    }

    let history = reedline::FileBackedHistory::new(1_000)
        .map_err(|e| io::Error::other(e.to_string()))?;

    let custom_codes: Vec<char> = registry
        .list()
        .iter()
        .filter_map(|op| char::from_u32(op.code()))
        .collect();

    let editor = Reedline::create()
        .with_highlighter(Box::new(ProgramHighlighter::new(custom_codes)))
        .with_history(Box::new(history))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    Ok(editor)
}

/// Everything left on `input`, or `None` when it is empty or unreadable.
pub fn read_submission<R: Read>(input: &mut R) -> Option<String> {
    let mut buffer = String::new();
    input.read_to_string(&mut buffer).ok()?;
    (!buffer.is_empty()).then_some(buffer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplMode {
    Bare,
    Editor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFlagOverride {
    None,
    Bare,
    Editor,
}

/// Flags win over `BF_REPL_MODE`, which wins over detecting a terminal on
/// stdin. Asking for the editor without a terminal is an error.
pub fn select_mode(flag: ModeFlagOverride) -> Result<ReplMode, String> {
    let requested = match flag {
        ModeFlagOverride::Bare => Some(ReplMode::Bare),
        ModeFlagOverride::Editor => Some(ReplMode::Editor),
        ModeFlagOverride::None => match env::var("BF_REPL_MODE") {
            Ok(val) => Some(parse_mode(&val)?),
            Err(_) => None,
        },
    };

    let tty = io::stdin().is_terminal();
    match requested {
        Some(ReplMode::Editor) if !tty => {
            Err("cannot start editor: stdin is not a TTY (use --bare or BF_REPL_MODE=bare)".to_string())
        }
        Some(mode) => Ok(mode),
        None if tty => Ok(ReplMode::Editor),
        None => Ok(ReplMode::Bare),
    }
}

fn parse_mode(val: &str) -> Result<ReplMode, String> {
    match val.trim().to_ascii_lowercase().as_str() {
        "bare" => Ok(ReplMode::Bare),
        "editor" => Ok(ReplMode::Editor),
        _ => Err(format!("invalid BF_REPL_MODE value: {val}, must be 'bare' or 'editor'")),
    }
}

/// Bare mode: read stdin until EOF and run it once.
pub fn execute_bare_once(session: &Session) -> io::Result<()> {
    // Release the stdin lock before running; `,` reads stdin from the worker.
    let submission = {
        read_submission(&mut io::stdin().lock())
    };
    if let Some(s) = submission {
        if !s.trim().is_empty() {
            session.submit(&s);
        }
    }
    Ok(())
}

/// Catppuccin Mocha accents used by the editor highlighter.
mod mocha {
    use nu_ansi_term::Color;

    pub const SURFACE2: Color = Color::Rgb(108, 112, 134);
    pub const RED: Color = Color::Rgb(243, 139, 168);
    pub const PEACH: Color = Color::Rgb(250, 179, 135);
    pub const YELLOW: Color = Color::Rgb(249, 226, 175);
    pub const GREEN: Color = Color::Rgb(166, 227, 161);
    pub const TEAL: Color = Color::Rgb(148, 226, 213);
    pub const SKY: Color = Color::Rgb(137, 220, 235);
    pub const BLUE: Color = Color::Rgb(137, 180, 250);
    pub const MAUVE: Color = Color::Rgb(203, 166, 247);
}

/// Colors built-in tokens by role and underlines the codes bound in the
/// session; everything else is dimmed as comment text.
struct ProgramHighlighter {
    custom_codes: Vec<char>,
}

impl ProgramHighlighter {
    fn new(custom_codes: Vec<char>) -> Self {
        Self { custom_codes }
    }

    fn style_for(&self, ch: char) -> Style {
        use self::mocha as P;

        let color = match ch {
            '>' => P::SKY,
            '<' => P::TEAL,
            '+' => P::GREEN,
            '-' => P::RED,
            '.' => P::YELLOW,
            ',' => P::PEACH,
            '[' | ']' => P::MAUVE,
            c if self.custom_codes.contains(&c) => return Style::new().fg(P::BLUE).bold().underline(),
            _ => return Style::new().fg(P::SURFACE2),
        };
        Style::new().fg(color).bold()
    }
}

impl Highlighter for ProgramHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        // One segment per run of equally styled characters.
        let mut out = StyledText::new();
        for ch in line.chars() {
            let style = self.style_for(ch);
            match out.buffer.last_mut() {
                Some((last, text)) if *last == style => text.push(ch),
                _ => out.push((style, ch.to_string())),
            }
        }
        out
    }
}
