//! Fixed-line terminal progress display.
//!
//! Each in-flight transfer owns one terminal line. Lines are assigned in
//! arrival order and repainted in place with ANSI cursor movement, so
//! several concurrent transfers render as a stable table instead of
//! interleaved output.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use davsync_common::RelPath;
use davsync_engine::{ProgressEvent, ProgressSink};

const BAR_WIDTH: usize = 40;

#[derive(Default)]
struct Slots {
    by_path: HashMap<String, usize>,
    next: usize,
}

/// [`ProgressSink`] that paints one progress bar per transfer on stdout.
#[derive(Default)]
pub struct ConsoleProgress {
    slots: Mutex<Slots>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(slot: usize, total_lines: usize, event: &ProgressEvent) {
        let bar = progress_bar(event.percentage);
        let name = event.path.name().unwrap_or("");
        let mut out = std::io::stdout().lock();
        // save cursor, jump up to the slot's line, repaint it, jump back
        let _ = write!(
            out,
            "\x1b[s\x1b[{}A\x1b[2K\r[{}] {} {}/{} {} {:.1}% {}\x1b[u",
            total_lines - slot,
            slot + 1,
            bar,
            format_size(event.bytes_moved),
            format_size(event.total_bytes),
            format_speed(event.speed),
            event.percentage,
            name
        );
        let _ = out.flush();
    }
}

impl ProgressSink for ConsoleProgress {
    fn update(&self, event: &ProgressEvent) {
        let mut slots = self.slots.lock().unwrap();
        let slot = match slots.by_path.get(event.path.as_str()) {
            Some(slot) => *slot,
            None => {
                let slot = slots.next;
                slots.next += 1;
                slots.by_path.insert(event.path.as_str().to_string(), slot);
                // reserve a line below the cursor for this transfer
                println!();
                slot
            }
        };
        Self::render(slot, slots.next, event);
    }

    fn finish(&self, path: &RelPath) {
        let mut slots = self.slots.lock().unwrap();
        slots.by_path.remove(path.as_str());
    }
}

/// `[====>    ]` style bar for a 0-100 percentage.
fn progress_bar(percentage: f64) -> String {
    let completed = ((BAR_WIDTH as f64) * percentage / 100.0) as usize;
    let mut bar = String::with_capacity(BAR_WIDTH + 2);
    bar.push('[');
    for i in 0..BAR_WIDTH {
        if i < completed {
            bar.push('=');
        } else if i == completed {
            bar.push('>');
        } else {
            bar.push(' ');
        }
    }
    bar.push(']');
    bar
}

/// Human-readable byte count with binary units.
pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}iB", bytes as f64 / div as f64, b"KMGTPE"[exp] as char)
}

/// Human-readable throughput with binary units.
pub fn format_speed(bytes_per_second: f64) -> String {
    const UNIT: f64 = 1024.0;
    if bytes_per_second < UNIT {
        return format!("{bytes_per_second:.1} B/s");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes_per_second / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!(
        "{:.1} {}iB/s",
        bytes_per_second / div,
        b"KMGTPE"[exp] as char
    )
}
