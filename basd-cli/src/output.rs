// Terminal Output
// Styled stderr lines for batch, stage and task progress

use std::time::Duration;

/// ANSI style of one piece of a line
#[derive(Clone, Copy)]
enum Style {
    Action,
    Heading,
    Stage,
    Good,
    Bad,
    Warn,
    Note,
    Muted,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Style::Action => "1;36",
            Style::Heading => "1",
            Style::Stage => "1;34",
            Style::Good => "32",
            Style::Bad => "31",
            Style::Warn => "33",
            Style::Note => "36",
            Style::Muted => "2",
        }
    }

    fn outcome(ok: bool) -> Self {
        if ok {
            Style::Good
        } else {
            Style::Bad
        }
    }
}

fn paint(style: Style, text: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", style.code(), text)
}

/// Right-aligned action word followed by a message
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", paint(Style::Action, &format!("{:>12}", action)), message);
}

pub fn check(message: &str) {
    eprintln!("  {} {}", paint(Style::Good, "\u{2713}"), message);
}

pub fn warning(message: &str) {
    eprintln!("  {} {}", paint(Style::Warn, "!"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint(Style::Bad, "error:"), message);
}

pub fn info(message: &str) {
    eprintln!("  {} {}", paint(Style::Note, "i"), message);
}

pub fn dim(message: &str) {
    eprintln!("{}", paint(Style::Muted, message));
}

/// Closing line of a command
pub fn verdict(ok: bool, message: &str) {
    let mark = if ok { "\u{2713}" } else { "\u{2717}" };
    eprintln!("  {} {}", paint(Style::outcome(ok), mark), message);
}

pub fn batch_header(name: &str, total_stages: usize) {
    eprintln!();
    let line = format!("==> Batch '{}' ({} stages)", name, total_stages);
    eprintln!("{}", paint(Style::Heading, &line));
}

pub fn stage_header(name: &str, description: &str, total_tasks: usize) {
    eprintln!("  {} '{}' ({} tasks)", paint(Style::Stage, "Stage"), name, total_tasks);
    dim(&format!("    {}", description));
}

pub fn stage_summary(name: &str, succeeded: usize, skipped: usize, failed: usize, duration: Duration) {
    let line = format!(
        "  Stage '{}' {} ok, {} skipped, {} failed ({:.2}s)",
        name,
        succeeded,
        skipped,
        failed,
        duration.as_secs_f64()
    );
    eprintln!("{}", paint(Style::outcome(failed == 0), &line));
}

/// Indented result line of one task
pub fn task_line(ok: bool, message: &str) {
    eprintln!("{}", paint(Style::outcome(ok), &format!("    {}", message)));
}

/// Task error, one indented line per message line
pub fn task_error(message: &str) {
    for line in message.lines() {
        eprintln!("{}", paint(Style::Bad, &format!("        | {}", line)));
    }
}
