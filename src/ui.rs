use colored::{ColoredString, Colorize};
use provision::Outcome;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Status symbol for an outcome
pub fn outcome_symbol(outcome: &Outcome) -> ColoredString {
    match outcome {
        Outcome::Applied => "✓".green(),
        Outcome::AlreadyExists => "=".dimmed(),
        Outcome::Failed { .. } => "✗".red(),
        Outcome::Skipped { .. } => "-".yellow(),
    }
}

/// Short status label for an outcome
pub fn outcome_label(outcome: &Outcome) -> ColoredString {
    match outcome {
        Outcome::Applied => "applied".green(),
        Outcome::AlreadyExists => "unchanged".dimmed(),
        Outcome::Failed { .. } => "failed".red().bold(),
        Outcome::Skipped { .. } => "skipped".yellow(),
    }
}

/// Pad `text` to `width` display columns
pub fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_string()
    } else {
        format!("{text}{}", " ".repeat(width - len))
    }
}
