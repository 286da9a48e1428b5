//! The terminal surface of the transaction pipeline.
//!
//! A [`Console`] multiplexes named progress bars with interleaved log lines
//! and hosts the confirmation prompt. All drawing funnels through one
//! [`MultiProgress`], which serializes concurrent updates so bars and lines
//! never corrupt each other. A `Console` is an explicit value threaded
//! through the pipeline; the CLI keeps the only long-lived instance.

use std::borrow::Cow;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::context::{Context, InterruptFlag};

/// The progress surface consumed by the fetch-extract engine and the
/// transaction executor.
#[derive(Clone)]
pub struct Console {
    multi_progress: MultiProgress,
    quiet: bool,
    json: bool,
    no_progress_bars: bool,
    always_yes: bool,
    interrupt: InterruptFlag,
}

impl Console {
    /// Creates a console configured from the given context.
    pub fn new(ctx: &Context, interrupt: InterruptFlag) -> Self {
        Self::with_multi_progress(MultiProgress::new(), ctx, interrupt)
    }

    /// Creates a console drawing onto an existing [`MultiProgress`]. The CLI
    /// uses this to share the progress area with the log writer.
    pub fn with_multi_progress(
        multi_progress: MultiProgress,
        ctx: &Context,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            multi_progress,
            quiet: ctx.quiet,
            json: ctx.json,
            no_progress_bars: ctx.no_progress_bars,
            always_yes: ctx.always_yes,
            interrupt,
        }
    }

    /// The underlying progress area.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Whether the user has interrupted the process.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    fn skip_progress_bars(&self) -> bool {
        self.quiet || self.json || self.no_progress_bars
    }

    /// Registers a new progress bar labeled with the given name. In quiet,
    /// machine-readable, or bar-less modes the returned handle swallows all
    /// updates (bar-less mode still announces completion as a plain line).
    pub fn add_bar(&self, label: &str) -> ProgressHandle {
        if self.skip_progress_bars() {
            let completion_fallback =
                (self.no_progress_bars && !self.quiet && !self.json).then(|| self.clone());
            return ProgressHandle {
                bar: ProgressBar::hidden(),
                indeterminate: Arc::new(AtomicBool::new(false)),
                completion_fallback,
            };
        }

        let bar = self.multi_progress.add(
            ProgressBar::new(100)
                .with_style(default_progress_style())
                .with_prefix(label.to_string()),
        );
        ProgressHandle {
            bar,
            indeterminate: Arc::new(AtomicBool::new(false)),
            completion_fallback: None,
        }
    }

    /// Prints a line above the active progress bars. Suppressed in quiet and
    /// machine-readable modes.
    pub fn print(&self, line: impl AsRef<str>) {
        if self.quiet || self.json {
            return;
        }
        let _ = self.multi_progress.println(line.as_ref());
    }

    /// Asks the user a yes/no question and returns the answer.
    ///
    /// Honors `always_yes`. In quiet or machine-readable mode prompts are
    /// suppressed entirely, so without `always_yes` the answer is "no". The
    /// interrupt flag is polled between reads; an interrupt answers "no".
    pub fn prompt(&self, message: &str, default_yes: bool) -> bool {
        if self.always_yes {
            return true;
        }
        if self.quiet || self.json {
            tracing::warn!("prompts are suppressed; pass 'always_yes' to confirm transactions");
            return false;
        }

        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
        let stdin = std::io::stdin();
        while !self.interrupt.is_interrupted() {
            let _ = self.multi_progress.println(format!("{message}: {hint} "));
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                return false;
            }
            let answer = match line.trim() {
                "" => default_yes,
                "y" | "Y" => true,
                "n" | "N" => false,
                _ => continue,
            };
            return answer && !self.interrupt.is_interrupted();
        }
        false
    }
}

/// A thread-safe handle to one progress bar.
#[derive(Clone)]
pub struct ProgressHandle {
    bar: ProgressBar,
    indeterminate: Arc<AtomicBool>,
    completion_fallback: Option<Console>,
}

impl ProgressHandle {
    /// Sets the progress of the bar. A value in `0..=100` is a percentage;
    /// `-1` switches the bar to an indeterminate spinner until the next
    /// non-negative update.
    pub fn set_progress(&self, progress: i8) {
        if progress < 0 {
            if !self.indeterminate.swap(true, Ordering::Relaxed) {
                self.bar.set_style(indeterminate_progress_style());
                self.bar.enable_steady_tick(Duration::from_millis(100));
            }
            self.bar.tick();
        } else {
            if self.indeterminate.swap(false, Ordering::Relaxed) {
                self.bar.disable_steady_tick();
                self.bar.set_style(default_progress_style());
            }
            self.bar.set_position(u64::from(progress.min(100) as u8));
        }
    }

    /// Sets the trailing text of the bar.
    pub fn set_postfix(&self, text: impl Into<Cow<'static, str>>) {
        self.bar.set_message(text);
    }

    /// Redraws the bar once with the final message and removes it from the
    /// active set.
    pub fn complete(&self, final_msg: impl Into<Cow<'static, str>>) {
        self.bar.disable_steady_tick();
        if let Some(console) = &self.completion_fallback {
            console.print(final_msg.into());
            self.bar.finish_and_clear();
        } else {
            self.bar.set_style(finished_progress_style());
            self.bar.finish_with_message(final_msg);
        }
    }
}

/// Returns the style to use for a progressbar that is currently in progress.
fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} {prefix:20!} [{bar:30!.bright.yellow/dim.white}] {percent:>3}% {msg}",
        )
        .expect("progress template is valid")
        .progress_chars("━━╾─")
}

/// Returns the style to use for a progressbar whose length is unknown.
fn indeterminate_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:20!} [{elapsed_precise}] {msg}")
        .expect("progress template is valid")
        .progress_chars("━━╾─")
}

/// Returns the style to use for a progressbar that is finished.
fn finished_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!(
            "{} {{prefix:20!}} {{msg:.bold}}",
            console::style(console::Emoji("✔", " ")).green()
        ))
        .expect("progress template is valid")
        .progress_chars("━━╾─")
}

#[cfg(test)]
mod test {
    use super::Console;
    use crate::context::{Context, InterruptFlag};

    fn quiet_context() -> Context {
        Context {
            quiet: true,
            ..Default::default()
        }
    }

    #[test]
    fn always_yes_short_circuits_prompt() {
        let ctx = Context {
            always_yes: true,
            quiet: true,
            ..Default::default()
        };
        let console = Console::new(&ctx, InterruptFlag::new());
        assert!(console.prompt("Confirm changes", true));
    }

    #[test]
    fn suppressed_prompt_without_always_yes_declines() {
        let console = Console::new(&quiet_context(), InterruptFlag::new());
        assert!(!console.prompt("Confirm changes", true));
    }

    #[test]
    fn interrupted_prompt_declines() {
        let ctx = Context::default();
        let interrupt = InterruptFlag::new();
        interrupt.interrupt();
        let console = Console::new(&ctx, interrupt);
        assert!(!console.prompt("Confirm changes", true));
    }

    #[test]
    fn hidden_bars_swallow_updates() {
        let console = Console::new(&quiet_context(), InterruptFlag::new());
        let bar = console.add_bar("foo");
        bar.set_progress(-1);
        bar.set_progress(50);
        bar.set_postfix("Validating...");
        bar.complete("Finished foo");
    }
}
