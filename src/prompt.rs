//! Operator confirmation.

use std::io::{self, BufRead, Stdin, StdinLock, Stdout, Write};

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Answers yes to everything. Used for `--no-prompt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        tracing::info!(prompt, "confirmed without prompting");
        true
    }
}

/// Reads answers line by line until one is `y`, `yes`, `n` or `no`.
/// End of input counts as no.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        let stdin: Stdin = io::stdin();
        Self::new(stdin.lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for TerminalPrompt<R, W> {
    fn confirm(&mut self, prompt: &str) -> bool {
        loop {
            if write!(self.output, "{} (y/n)? ", prompt).and_then(|_| self.output.flush()).is_err() {
                return false;
            }

            let mut answer = String::new();
            match self.input.read_line(&mut answer) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }

            match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => {
                    let _ = writeln!(self.output, "Please answer y or n.");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask(input: &str) -> (bool, String) {
        let mut out = Vec::new();
        let answer = TerminalPrompt::new(input.as_bytes(), &mut out).confirm("Drop everything");
        (answer, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_terminal_prompt_answers() {
        assert!(ask("y\n").0);
        assert!(ask("YES\n").0);
        assert!(!ask("n\n").0);
        assert!(!ask("No\n").0);
    }

    #[test]
    fn test_terminal_prompt_repeats_until_valid() {
        let (answer, out) = ask("maybe\n\nyes\n");
        assert!(answer);
        assert_eq!(out.matches("Drop everything (y/n)? ").count(), 3);
        assert_eq!(out.matches("Please answer y or n.").count(), 2);
    }

    #[test]
    fn test_terminal_prompt_end_of_input_is_no() {
        assert!(!ask("").0);
        assert!(!ask("perhaps\n").0);
    }

    #[test]
    fn test_closures_confirm() {
        let mut asked = Vec::new();
        let mut recorder = |prompt: &str| {
            asked.push(prompt.to_string());
            false
        };
        assert!(!recorder.confirm("Proceed"));
        assert!(AutoConfirm.confirm("Proceed"));
        assert_eq!(asked, vec!["Proceed".to_string()]);
    }
}
