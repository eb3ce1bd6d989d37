//! Stdin line protocol
//!
//! Lines starting with `!` are control commands; everything else is data.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

/// A parsed input line
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// Data line; for debounce this is `KEY PAYLOAD...`
    Data(&'a str),
    /// `!cancel KEY`
    Cancel(&'a str),
    /// `!flush [KEY...]`
    Flush(Vec<&'a str>),
    /// Blank line or unknown command
    Skip,
}

pub fn parse(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Skip;
    }

    let Some(command) = line.strip_prefix('!') else {
        return Line::Data(line);
    };

    let mut words = command.split_whitespace();
    match words.next() {
        Some("flush") => Line::Flush(words.collect()),
        Some("cancel") => match words.next() {
            Some(key) => Line::Cancel(key),
            None => Line::Skip,
        },
        _ => {
            tracing::warn!("Unknown command: {}", line);
            Line::Skip
        }
    }
}

/// Split a debounce data line into key and payload
pub fn split_keyed(data: &str) -> (&str, &str) {
    match data.split_once(char::is_whitespace) {
        Some((key, payload)) => (key, payload.trim_start()),
        None => (data, ""),
    }
}

/// Feed stdin lines to `handle` until EOF or Ctrl-C
pub async fn drive<F>(mut handle: F) -> Result<()>
where
    F: FnMut(Line<'_>),
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => handle(parse(&line)),
                    None => break,
                }
            }
            _ = &mut interrupt => {
                tracing::info!("Interrupted, draining");
                break;
            }
        }
    }

    Ok(())
}
