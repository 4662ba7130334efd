use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use extpack_core::{namespace_label, LocalExtension};
use extpack_job::{Progress, ProgressObserver};
use extpack_planner::{ExtensionAction, ExtensionPlan};
use extpack_repository::RepositorySourceRecord;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    )
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

/// Plan lines: the dependency tree followed by the execution order.
pub(crate) fn format_plan_lines(plan: &ExtensionPlan, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if style == OutputStyle::Rich {
        lines.push(colorize(section_style(), "== plan =="));
    }
    lines.extend(plan.render_tree());

    let effective: Vec<_> = plan.effective_actions().collect();
    if effective.is_empty() {
        lines.push("nothing to do".to_string());
        return lines;
    }
    if style == OutputStyle::Rich {
        lines.push(colorize(section_style(), "== order =="));
    } else {
        lines.push("order:".to_string());
    }
    for (index, action) in effective.iter().enumerate() {
        let line = format!("{:>3}. {action}", index + 1);
        lines.push(match (style, action.action) {
            (OutputStyle::Rich, ExtensionAction::Uninstall) => colorize(removal_style(), &line),
            (OutputStyle::Rich, _) => colorize(change_style(), &line),
            (OutputStyle::Plain, _) => line,
        });
    }
    lines
}

pub(crate) fn format_installed_lines(installed: &[LocalExtension]) -> Vec<String> {
    installed
        .iter()
        .map(|local| {
            let namespaces = local
                .namespaces
                .iter()
                .map(|namespace| namespace_label(namespace.as_deref()))
                .collect::<Vec<_>>()
                .join(", ");
            let mut line = format!(
                "{} [{}] type={} from={}",
                local.id(),
                namespaces,
                local.extension.extension_type,
                local.extension.repository
            );
            if local.is_dependency() {
                let parents = local
                    .installed_as_dependency_of
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                line.push_str(&format!(" (dependency of {parents})"));
            }
            line
        })
        .collect()
}

pub(crate) fn format_source_lines(sources: &[RepositorySourceRecord]) -> Vec<String> {
    sources
        .iter()
        .map(|source| {
            format!(
                "{} kind={} priority={} enabled={} location={} fingerprint={}",
                source.name,
                source.kind.as_str(),
                source.priority,
                source.enabled,
                source.location,
                source.fingerprint_sha256
            )
        })
        .collect()
}

/// Renders job progress: an `indicatif` bar on rich terminals, one line per
/// ten percent otherwise.
pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    progress_bar: Option<ProgressBar>,
    last_reported: Mutex<Option<u32>>,
    started_at: Instant,
}

impl TerminalProgress {
    pub(crate) fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = if style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(100);
            if let Ok(template) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<10} [{bar:20.cyan/blue}] {pos:>3}% {elapsed_precise}",
            ) {
                progress_bar.set_style(
                    template
                        .tick_chars(progress_tick_chars(label))
                        .progress_chars("=>-"),
                );
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        Self {
            style,
            label: label.to_string(),
            progress_bar,
            last_reported: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    pub(crate) fn finish(&self, succeeded: bool) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.finish_and_clear();
        }
        if succeeded && self.style == OutputStyle::Rich {
            println!(
                "{} complete in {}",
                colorize(progress_label_style(), &self.label),
                format_elapsed(self.started_at.elapsed())
            );
        }
    }
}

impl ProgressObserver for TerminalProgress {
    fn on_progress(&self, _job: &str, progress: Progress) -> anyhow::Result<()> {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_position(u64::from(progress.percent));
            return Ok(());
        }

        let bucket = progress.percent / 10;
        let mut last = self
            .last_reported
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last != Some(bucket) {
            *last = Some(bucket);
            eprintln!("{}: {}%", self.label, progress.percent);
        }
        Ok(())
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn progress_tick_chars(label: &str) -> &'static str {
    match label {
        "install" => ".oO@* ",
        "uninstall" => "\\|/- ",
        _ => "|/-\\ ",
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn change_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::Green.into()))
}

fn removal_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::Red.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
