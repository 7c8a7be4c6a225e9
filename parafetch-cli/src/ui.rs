//! Terminal progress display.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use parafetch::Progress;
use parking_lot::Mutex;

const BAR_TEMPLATE: &str = "{spinner:.green} {msg} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

// Used until the total size is known; unknown sizes never leave it.
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} [{elapsed_precise}] {bytes} ({bytes_per_sec})";

const PB_CHARS: &str = "█▓▒░  ";

fn style(template: &str) -> ProgressStyle {
    match ProgressStyle::with_template(template) {
        Ok(style) => style.progress_chars(PB_CHARS),
        Err(_) => ProgressStyle::default_bar(),
    }
}

/// One progress bar per transfer, replaced when the next one begins.
///
/// Shared between the main thread and the progress callback.
pub struct TransferBar {
    visible: bool,
    current: Mutex<ProgressBar>,
}

impl TransferBar {
    pub fn new(visible: bool) -> Self {
        Self {
            visible,
            current: Mutex::new(ProgressBar::hidden()),
        }
    }

    /// Start a fresh bar labelled `label`.
    pub fn begin(&self, label: &str) {
        let target = if self.visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, target);
        bar.set_style(style(SPINNER_TEMPLATE));
        bar.set_message(label.to_string());
        *self.current.lock() = bar;
    }

    /// Apply a progress snapshot.
    pub fn update(&self, progress: Progress) {
        let bar = self.current.lock();
        if progress.total_bytes > 0 && bar.length() != Some(progress.total_bytes) {
            bar.set_style(style(BAR_TEMPLATE));
            bar.set_length(progress.total_bytes);
        }
        bar.set_position(progress.bytes_downloaded);
    }

    /// Hide the bar while `f` runs, e.g. for an interactive prompt.
    pub fn suspend<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let bar = self.current.lock().clone();
        bar.suspend(f)
    }

    pub fn finish(&self) {
        self.current.lock().finish_and_clear();
    }
}
