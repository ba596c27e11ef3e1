// src/progress.rs

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::{Arc, OnceLock};

/// Receives a copy of every byte count written to a spill file.
pub trait ProgressSink: Send + Sync {
    fn advance(&self, bytes: u64);
    fn finish(&self) {}
}

impl ProgressSink for ProgressBar {
    fn advance(&self, bytes: u64) {
        self.inc(bytes);
    }

    fn finish(&self) {
        ProgressBar::finish(self);
    }
}

const PB_STYLE: &str =
    "{prefix:.yellow} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

const PB_CHARS: &str = "█▓▒░  ";

fn bar_style() -> ProgressStyle {
    static STYLE: OnceLock<ProgressStyle> = OnceLock::new();
    STYLE
        .get_or_init(|| {
            ProgressStyle::with_template(PB_STYLE)
                .map(|s| s.progress_chars(PB_CHARS))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
        })
        .clone()
}

/// One terminal bar per chunk, rendered together.
#[derive(Clone, Default)]
pub struct ChunkBars {
    multi: MultiProgress,
}

impl ChunkBars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, label: String, len: u64) -> Arc<dyn ProgressSink> {
        let bar = self.multi.add(ProgressBar::new(len));
        bar.set_style(bar_style());
        bar.set_prefix(label);
        Arc::new(bar)
    }
}
