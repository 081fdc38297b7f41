//! Console output for the CLI
//!
//! Informational lines go through `info_print!`/`warn_print!` and disappear
//! in quiet mode; results are always printed. `--json` switches quiet mode on
//! so stdout carries nothing but the JSON document.

use colored::{ColoredString, Colorize};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

static QUIET_MODE: AtomicBool = AtomicBool::new(false);

pub fn set_quiet(quiet: bool) {
    QUIET_MODE.store(quiet, Ordering::SeqCst);
}

pub fn is_quiet() -> bool {
    QUIET_MODE.load(Ordering::SeqCst)
}

/// Print a message only if not in quiet mode
#[macro_export]
macro_rules! info_print {
    ($($arg:tt)*) => {
        if !$crate::output::is_quiet() {
            println!($($arg)*);
        }
    };
}

/// Print to stderr only if not in quiet mode
#[macro_export]
macro_rules! warn_print {
    ($($arg:tt)*) => {
        if !$crate::output::is_quiet() {
            eprintln!($($arg)*);
        }
    };
}

/// Pretty-printed JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Colour a relevance or similarity score by strength
pub fn format_score(score: f64) -> ColoredString {
    let text = format!("{:.4}", score);
    if score >= 0.7 {
        text.bright_green()
    } else if score >= 0.4 {
        text.yellow()
    } else {
        text.dimmed()
    }
}

/// `#3`, or `-` when the source did not return the table
pub fn format_rank(rank: Option<u32>) -> String {
    match rank {
        Some(rank) => format!("#{}", rank),
        None => "-".to_string(),
    }
}
