use colored::{ColoredString, Colorize};
use declarative::{ApplyStatus, DiffKind, RunStatus};

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

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored `+`/`~`/`-`/`=` for an op kind
pub fn kind_symbol(kind: DiffKind) -> ColoredString {
    match kind {
        DiffKind::Create => kind.symbol().green(),
        DiffKind::Update => kind.symbol().yellow(),
        DiffKind::Delete => kind.symbol().red(),
        DiffKind::Noop => kind.symbol().dimmed(),
    }
}

pub fn outcome_symbol(outcome: &ApplyStatus) -> ColoredString {
    match outcome {
        ApplyStatus::Succeeded => "✓".green(),
        ApplyStatus::Failed { .. } => "✗".red(),
        ApplyStatus::Skipped { .. } => "⊘".yellow(),
        ApplyStatus::Aborted { .. } => "○".dimmed(),
    }
}

pub fn status_label(status: RunStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::AllOk => label.green().bold(),
        RunStatus::Partial => label.yellow().bold(),
        RunStatus::Aborted | RunStatus::ValidationFailed => label.red().bold(),
    }
}

/// `n thing` / `n things`
pub fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Truncate a string for display, keeping the end
pub fn truncate_start(text: &str, max_len: usize) -> String {
    let len = text.chars().count();
    if len <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let tail: String = text.chars().skip(len - (max_len - 3)).collect();
        format!("...{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "change"), "1 change");
        assert_eq!(plural(0, "change"), "0 changes");
        assert_eq!(plural(3, "run"), "3 runs");
    }

    #[test]
    fn test_truncate_start_short() {
        assert_eq!(truncate_start("short.txt", 20), "short.txt");
        assert_eq!(truncate_start("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_start_long() {
        assert_eq!(
            truncate_start(r"HKLM\Software\Policies\Acme\Level", 15),
            r"...s\Acme\Level"
        );
    }

    #[test]
    fn test_truncate_start_edge_cases() {
        assert_eq!(truncate_start("test", 3), "...");
        assert_eq!(truncate_start("", 10), "");
    }
}
