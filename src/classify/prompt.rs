//! Operator port: asks a human which bin an unknown item belongs in.

use std::io::{self, BufRead, Write};

use crate::core::bins::BinColor;

/// Asks a human to pick a bin for an item nothing else could place.
///
/// Returning `None` means the operator cancelled (or could not be asked);
/// the item then stays unresolved and nothing is written.
pub trait BinPrompter {
    fn choose_bin(&mut self, item_name: &str, bins: &[BinColor]) -> Option<BinColor>;
}

impl<F> BinPrompter for F
where
    F: FnMut(&str, &[BinColor]) -> Option<BinColor>,
{
    fn choose_bin(&mut self, item_name: &str, bins: &[BinColor]) -> Option<BinColor> {
        self(item_name, bins)
    }
}

/// Prompter for contexts without a human (protocol requests, batch runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOperator;

impl BinPrompter for NoOperator {
    fn choose_bin(&mut self, _item_name: &str, _bins: &[BinColor]) -> Option<BinColor> {
        None
    }
}

/// Numbered-menu prompter over any line reader / writer pair.
///
/// ```text
/// Unknown item: 'jar'
/// Which bin should it go in?
///   1 - yellow
///   2 - green
///   0 - Cancel
/// Choice:
/// ```
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, item_name: &str, bins: &[BinColor]) -> io::Result<Option<BinColor>> {
        writeln!(self.output, "\nUnknown item: '{item_name}'")?;
        writeln!(self.output, "Which bin should it go in?")?;
        for (idx, bin) in bins.iter().enumerate() {
            writeln!(self.output, "  {} - {bin}", idx + 1)?;
        }
        writeln!(self.output, "  0 - Cancel")?;
        write!(self.output, "Choice: ")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(parse_choice(line.trim(), bins))
    }
}

impl<R: BufRead, W: Write> BinPrompter for TerminalPrompter<R, W> {
    fn choose_bin(&mut self, item_name: &str, bins: &[BinColor]) -> Option<BinColor> {
        self.ask(item_name, bins).unwrap_or_else(|e| {
            eprintln!("[SBIN-PROMPT] operator prompt failed: {e}");
            None
        })
    }
}

/// `1..=n` selects a bin; `0`, garbage and out-of-range input cancel.
fn parse_choice(raw: &str, bins: &[BinColor]) -> Option<BinColor> {
    let idx = raw.parse::<usize>().ok()?;
    if idx == 0 {
        return None;
    }
    bins.get(idx - 1).cloned()
}
