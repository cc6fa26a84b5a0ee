// src/prompt.rs

//! Interactive confirmation before destructive steps

use std::io::{self, BufRead, IsTerminal, Write};

/// Asks the user a yes/no question
pub trait Confirm: Send + Sync {
    /// Returns true only on an explicit yes
    fn confirm(&self, message: &str) -> bool;
}

/// Prompt on the controlling terminal
///
/// Without a terminal on stdin nobody can answer, so the answer is no.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, message: &str) -> bool {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return false;
        }
        ask(&mut stdin.lock(), &mut io::stderr(), message).unwrap_or(false)
    }
}

/// Write `message` with a `[y/N]` suffix and read one answer line
pub fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, message: &str) -> io::Result<bool> {
    write!(output, "{message} [y/N] ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
