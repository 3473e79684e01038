//! YASL CLI - command-line interface for the YASL scripting language.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

use log::{LevelFilter, Log, Metadata, Record};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use yasl::Artifact;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Extension of compiled artifacts written with `-c`.
const ARTIFACT_EXTENSION: &str = "yb";

fn main() {
    init_logging();
    let args: Vec<String> = env::args().skip(1).collect();

    if let Err(e) = run(args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let mut eval_code: Option<String> = None;
    let mut interactive = false;
    let mut disassemble = false;
    let mut output: Option<String> = None;
    let mut file: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "-v" | "--version" => {
                print_version();
                return Ok(());
            }
            "-e" | "--eval" => {
                i += 1;
                if i >= args.len() {
                    return Err("-e requires an argument".to_string());
                }
                eval_code = Some(args[i].clone());
            }
            "-c" | "--compile" => {
                i += 1;
                if i >= args.len() {
                    return Err("-c requires an output path".to_string());
                }
                output = Some(args[i].clone());
            }
            "-d" | "--disassemble" => {
                disassemble = true;
            }
            "-i" | "--interactive" => {
                interactive = true;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                file = Some(arg.clone());
                break;
            }
        }
        i += 1;
    }

    let artifact = match (&eval_code, &file) {
        (Some(code), _) => Some(yasl::compile(code).map_err(|e| e.to_string())?),
        (None, Some(path)) => Some(load_file(path)?),
        (None, None) => None,
    };

    let Some(artifact) = artifact else {
        return start_repl();
    };

    if let Some(path) = output {
        fs::write(&path, artifact.as_bytes())
            .map_err(|e| format!("Failed to write {}: {}", path, e))?;
        log::info!("wrote {} bytes to {}", artifact.len(), path);
    } else if disassemble {
        print_disassembly(&artifact);
    } else {
        yasl::run_artifact(&artifact, io::stdout()).map_err(|e| e.to_string())?;
    }

    if interactive {
        start_repl()?;
    }
    Ok(())
}

fn print_usage() {
    println!(
        r#"
YASL v{} - Yet Another Scripting Language

Usage:
  yasl [options] [file]

Options:
  -h, --help         Show this help message
  -v, --version      Show version
  -e, --eval         Evaluate code from command line
  -c, --compile OUT  Write the compiled artifact to OUT instead of running
  -d, --disassemble  Print the bytecode instead of running
  -i, --interactive  Start REPL after running file

Files ending in .{} are loaded as compiled artifacts.
Set YASL_LOG=debug (or trace) to log compiler and VM activity to stderr.

Examples:
  yasl                       Start interactive REPL
  yasl script.yasl           Run a script file
  yasl -e "echo 1 + 2;"      Evaluate code
  yasl -c out.yb script.yasl Compile a script
  yasl out.yb                Run a compiled artifact
"#,
        VERSION, ARTIFACT_EXTENSION
    );
}

fn print_version() {
    println!("YASL {}", VERSION);
}

fn load_file(filepath: &str) -> Result<Artifact, String> {
    let path = Path::new(filepath);

    if !path.exists() {
        return Err(format!("File not found: {}", filepath));
    }

    if path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION) {
        let bytes = fs::read(path).map_err(|e| format!("Failed to read file: {}", e))?;
        return yasl::load(bytes).map_err(|e| format!("Error in {}: {}", filepath, e));
    }

    let code = fs::read_to_string(path).map_err(|e| format!("Failed to read file: {}", e))?;
    yasl::compile(&code).map_err(|e| format!("Error in {}:\n{}", filepath, e))
}

fn print_disassembly(artifact: &Artifact) {
    println!("; header ({} bytes)", artifact.entry_point());
    for (row, chunk) in artifact.header().chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:04x}: {}", row * 16, bytes.join(" "));
    }
    println!("; code");
    print!("{}", artifact.disassemble());
}

// =============================================================================
// REPL
// =============================================================================

/// Interactive session.
///
/// Each accepted entry is appended to the session source, which is
/// recompiled and rerun; only output past what earlier entries printed is
/// shown. Entries that fail are discarded.
fn start_repl() -> Result<(), String> {
    println!("YASL v{} - Type 'exit' or Ctrl+D to quit", VERSION);
    println!();

    let mut rl = DefaultEditor::new().map_err(|e| format!("Failed to create editor: {}", e))?;

    let mut session = String::new();
    let mut printed = 0;
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "YASL> " } else { "...   " };

        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();

                if buffer.is_empty() && (trimmed == "exit" || trimmed == "quit") {
                    println!("Goodbye!");
                    break;
                }

                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(&line);

                if !is_complete(&buffer) {
                    continue;
                }
                if !buffer.trim().is_empty() {
                    rl.add_history_entry(buffer.trim()).ok();

                    let candidate = format!("{}{}\n", session, buffer);
                    let (accepted, output) = eval_session(&candidate);
                    let fresh = output.get(printed..).unwrap_or_default();
                    print!("{}", String::from_utf8_lossy(fresh));
                    io::stdout().flush().ok();
                    if accepted {
                        session = candidate;
                        printed = output.len();
                    }
                }
                buffer.clear();
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                println!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(e) => {
                return Err(format!("Readline error: {}", e));
            }
        }
    }

    Ok(())
}

/// Run a whole session, returning whether it succeeded and what it printed.
fn eval_session(source: &str) -> (bool, Vec<u8>) {
    let artifact = match yasl::compile(source) {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("{}", e);
            return (false, Vec::new());
        }
    };
    let mut out = Vec::new();
    match yasl::run_artifact(&artifact, &mut out) {
        Ok(_) => (true, out),
        Err(e) => {
            eprintln!("{}", e);
            (false, out)
        }
    }
}

/// Check if the input has balanced delimiters and no open string.
fn is_complete(input: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut string_char = '\0';
    let mut escaped = false;
    let mut in_comment = false;

    for c in input.chars() {
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == string_char {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                in_string = true;
                string_char = c;
            }
            '#' => in_comment = true,
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            _ => {}
        }
    }

    depth <= 0 && !in_string
}

// =============================================================================
// Logging
// =============================================================================

/// Minimal stderr logger for the `log` facade.
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {
        io::stderr().flush().ok();
    }
}

/// Install the stderr logger at the level named by `YASL_LOG`.
fn init_logging() {
    let level = env::var("YASL_LOG")
        .ok()
        .and_then(|value| LevelFilter::from_str(&value).ok())
        .unwrap_or(LevelFilter::Off);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
