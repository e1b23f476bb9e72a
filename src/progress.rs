use colored::Colorize;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::time::Duration;

use freshen::update::{Stage, UpdateEvent};

/// Resolution of the download bar; fractions are scaled onto it
const BAR_UNITS: u64 = 1000;

/// Terminal rendering of pipeline events. Cheap to clone; all clones drive
/// the same bar.
#[derive(Clone)]
pub struct Reporter {
    bar: ProgressBar,
}

impl Reporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn handle(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::Stage(Stage::Downloading) => {
                self.bar.set_length(BAR_UNITS);
                self.bar.set_position(0);
                self.bar.set_style(download_style());
                self.bar.set_message("");
            }
            UpdateEvent::Stage(stage) if stage.is_terminal() => {
                self.bar.finish_and_clear();
            }
            UpdateEvent::Stage(stage) => {
                self.bar.set_style(spinner_style());
                self.bar.set_message(capitalize(&stage.to_string()));
            }
            UpdateEvent::DownloadProgress {
                fraction,
                bytes_per_second,
            } => {
                let position = (fraction.clamp(0.0, 1.0) * BAR_UNITS as f64) as u64;
                self.bar.set_position(position);
                self.bar
                    .set_message(format!("{}/s", HumanBytes(*bytes_per_second as u64)));
            }
            UpdateEvent::CacheHit { path } => {
                self.bar.println(format!(
                    "{} Using cached download {}",
                    "↺".cyan(),
                    path.display().to_string().dimmed()
                ));
            }
            UpdateEvent::BackendFailed(failure) => {
                self.bar.println(format!(
                    "  {} {} could not extract: {}",
                    "✗".red(),
                    failure.backend,
                    failure.reason.dimmed()
                ));
            }
            UpdateEvent::Finished(_) => self.bar.finish_and_clear(),
        }
    }

    /// Hide the bar while the user answers a prompt
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bar.suspend(f)
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>() + "...",
        None => String::new(),
    }
}
