//! Terminal styling shared by the subcommands.

use branchwise_core::conflict::Severity;
use branchwise_core::Strategy;
use comfy_table::Color;
use console::Style;

/// Green with a checkmark.
pub fn success(msg: &str) -> String {
    format!("{} {}", Style::new().green().apply_to("✓"), msg)
}

/// Red with a cross.
pub fn error(msg: &str) -> String {
    format!("{} {}", Style::new().red().apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    format!("{} {}", Style::new().yellow().apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Bullet line for a suggestion or factor.
pub fn bullet(msg: &str) -> String {
    format!("  {} {}", Style::new().cyan().apply_to("•"), msg)
}

/// Strategy name, coloured by how disruptive it is.
pub fn strategy(strategy: Strategy) -> String {
    let style = match strategy {
        Strategy::Merge => Style::new().blue().bold(),
        Strategy::Rebase => Style::new().magenta().bold(),
        Strategy::None => Style::new().dim(),
    };
    style.apply_to(strategy.to_string().to_uppercase()).to_string()
}

/// Table cell colour for a conflict severity.
pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Low => Color::Green,
        Severity::Medium => Color::Yellow,
        Severity::High => Color::Red,
    }
}
