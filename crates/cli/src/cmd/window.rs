//! Batch stdin lines into timed windows

use crate::input::{self, Line};
use anyhow::{Context, Result};
use delay::{BatchWindower, WindowConfig};
use owo_colors::OwoColorize;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub async fn run(config: &WindowConfig) -> Result<()> {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);

    let windower = BatchWindower::from_config(
        move |item: String| {
            counter.fetch_add(1, Ordering::Relaxed);
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", item);
        },
        config,
    )
    .context("Invalid window configuration")?;
    windower.start();

    let mut dropped = 0usize;
    input::drive(|line| match line {
        Line::Data(item) => {
            if !windower.exec(item.to_string()) {
                dropped += 1;
            }
        }
        Line::Flush(_) => {
            windower.flush();
        }
        Line::Cancel(_) => tracing::warn!("cancel is not supported in window mode"),
        Line::Skip => {}
    })
    .await?;

    windower.stop().await;

    eprintln!(
        "{} {} delivered, {} dropped",
        "window:".dimmed(),
        delivered.load(Ordering::Relaxed).green(),
        dropped.yellow()
    );
    Ok(())
}
