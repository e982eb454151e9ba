//! Terminal output: progress for documents and pages, and a stderr writer
//! for logs that doesn't tear through the progress bars.

use std::{
    borrow::Cow,
    io::{self, Write as _},
    sync::Arc,
    time::Duration,
};

use indicatif::{
    MultiProgress, ProgressBar, ProgressDrawTarget, ProgressFinish, ProgressStyle,
};

use crate::prelude::*;

/// Template for bars with a known length.
const BAR_TEMPLATE: &str =
    "  {prefix:3}{msg:25} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue} {eta_precise}";

/// Template for spinners.
const SPINNER_TEMPLATE: &str = "{spinner} {prefix:3}{msg}";

/// Labels for a progress bar.
pub struct ProgressConfig<'a> {
    /// Shown in front of the message.
    pub emoji: &'a str,
    /// Shown while running.
    pub msg: &'a str,
    /// Shown once finished.
    pub done_msg: &'a str,
}

/// Shared handle to everything we draw on the terminal. Cheap to clone.
#[derive(Clone)]
pub struct Ui {
    bars: Arc<MultiProgress>,
}

impl Ui {
    /// Set up progress drawing on stderr.
    pub fn init() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::new()),
        }
    }

    /// A UI which never draws anything.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
        }
    }

    /// Stop drawing progress, because stdout carries our actual output.
    pub fn hide_progress_bars(&self) {
        self.bars.set_draw_target(ProgressDrawTarget::hidden());
    }

    /// A writer for `tracing` which pauses progress drawing while it writes.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Print a one-line summary above any progress bars.
    pub fn display_message(&self, emoji: &str, msg: &str) {
        if let Err(err) = self.bars.println(format!("{emoji} {msg}")) {
            debug!("could not display message: {}", err);
        }
    }

    /// A progress bar counting up to `len`.
    pub fn new_progress_bar(&self, config: &ProgressConfig<'_>, len: u64) -> ProgressBar {
        self.add(ProgressBar::new(len), BAR_TEMPLATE, config)
    }

    /// A spinner, for when we don't know how much work there is.
    pub fn new_spinner(&self, config: &ProgressConfig<'_>) -> ProgressBar {
        self.add(ProgressBar::new_spinner(), SPINNER_TEMPLATE, config)
    }

    /// A progress bar if `size_hint` has a known, non-zero upper bound, and a
    /// spinner otherwise.
    pub fn new_from_size_hint(
        &self,
        config: &ProgressConfig<'_>,
        size_hint: (usize, Option<usize>),
    ) -> ProgressBar {
        match size_hint.1 {
            Some(len) if len > 0 => {
                self.new_progress_bar(config, u64::try_from(len).unwrap_or(u64::MAX))
            }
            _ => self.new_spinner(config),
        }
    }

    /// Style `bar`, label it and start drawing it.
    fn add(&self, bar: ProgressBar, template: &str, config: &ProgressConfig<'_>) -> ProgressBar {
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = self.bars.add(bar.with_style(style));
        #[cfg(test)]
        bar.set_draw_target(ProgressDrawTarget::hidden());
        bar.set_prefix(config.emoji.to_owned());
        bar.set_message(config.msg.to_owned());
        bar.enable_steady_tick(Duration::from_millis(250));
        bar.with_finish(ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }
}

/// Writes to stderr with progress bars suspended.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.bars.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // Keep a whole log line inside one suspension.
        self.ui.bars.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.bars.suspend(|| io::stderr().flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_hints_pick_bar_or_spinner() {
        let ui = Ui::init_for_tests();
        let config = ProgressConfig {
            emoji: "📄",
            msg: "Ingesting documents",
            done_msg: "Ingested documents",
        };
        assert_eq!(ui.new_from_size_hint(&config, (3, Some(3))).length(), Some(3));
        assert_eq!(ui.new_from_size_hint(&config, (0, None)).length(), None);
        assert_eq!(ui.new_from_size_hint(&config, (0, Some(0))).length(), None);
    }
}
