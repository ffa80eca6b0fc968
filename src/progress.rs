use std::future::Future;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners and checkmarks.
    Normal,
    /// Spinners plus tracing output on stderr.
    Verbose,
    /// No step output at all.
    Quiet,
    /// No ANSI, one println per step (piped/non-TTY).
    Plain,
}

/// Numbered provisioning steps with spinners and checkmarks.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2713} {msg:.green}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2717} {msg:.red}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = match mode {
            OutputMode::Plain | OutputMode::Quiet => {
                MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
            }
            OutputMode::Normal | OutputMode::Verbose => MultiProgress::new(),
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    fn next_prefix(&mut self) -> String {
        self.current_step += 1;
        format!("{}/{}", self.current_step, self.total_steps)
    }

    /// Run a fallible async task as the next numbered step.
    ///
    /// Spinner while running, checkmark on `Ok`, cross on `Err`.
    pub async fn run<Fut, T, E>(&mut self, label: &str, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let prefix = self.next_prefix();
        if self.mode == OutputMode::Plain {
            println!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));

        let result = fut.await;

        match &result {
            Ok(_) => {
                if self.mode == OutputMode::Plain {
                    println!("[{prefix}] \u{2713} {label}");
                }
                bar.set_style(done_style());
            }
            Err(_) => {
                if self.mode == OutputMode::Plain {
                    println!("[{prefix}] \u{2717} {label}");
                }
                bar.set_style(failed_style());
            }
        }
        bar.finish_with_message(label.to_string());
        result
    }

    /// Instant completion for a step whose work is already done.
    pub fn skip(&mut self, label: &str) {
        let prefix = self.next_prefix();
        tracing::info!(step = %prefix, "{label}");

        if self.mode == OutputMode::Plain {
            println!("[{prefix}] \u{2713} {label}");
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(done_style());
        bar.set_prefix(prefix);
        bar.set_message(label.to_string());
        bar.finish();
    }

    /// Print an info line under the steps (ports, paths).
    pub fn info(&self, text: &str) {
        match self.mode {
            OutputMode::Quiet => {}
            OutputMode::Plain => println!("      \u{2192} {text}"),
            OutputMode::Normal | OutputMode::Verbose => {
                self.multi.println(format!("      \u{2192} {text}")).ok();
            }
        }
    }
}
