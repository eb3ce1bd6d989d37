//! Debounce keyed stdin lines

use crate::input::{self, Line};
use anyhow::{Context, Result};
use delay::{DebounceConfig, KeyedDebouncer};
use owo_colors::OwoColorize;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub async fn run(config: &DebounceConfig) -> Result<()> {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);

    let debouncer = KeyedDebouncer::from_config(
        move |(key, payload): (String, String)| {
            counter.fetch_add(1, Ordering::Relaxed);
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{} {}", key, payload);
        },
        config,
    )
    .context("Invalid debounce configuration")?;

    let mut dropped = 0usize;
    input::drive(|line| match line {
        Line::Data(data) => {
            let (key, payload) = input::split_keyed(data);
            if !debouncer.register(key.to_string(), (key.to_string(), payload.to_string())) {
                dropped += 1;
            }
        }
        Line::Cancel(key) => {
            if !debouncer.cancel(&key.to_string()) {
                tracing::debug!("Nothing pending for {}", key);
            }
        }
        Line::Flush(keys) => {
            let keys: Vec<String> = keys.into_iter().map(str::to_string).collect();
            let flushed = debouncer.flush(&keys);
            tracing::debug!("Flushed {} pending keys", flushed);
        }
        Line::Skip => {}
    })
    .await?;

    debouncer.stop().await;

    eprintln!(
        "{} {} delivered, {} dropped",
        "debounce:".dimmed(),
        delivered.load(Ordering::Relaxed).green(),
        dropped.yellow()
    );
    Ok(())
}
