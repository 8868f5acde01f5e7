//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use engine_lib::Action;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Pretty-print any serializable value as JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format an optional CO2 value in g/km
pub fn format_co2(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1} g/km", v),
        None => "-".to_string(),
    }
}

/// Format optional maintenance days
pub fn format_days(days: Option<u32>) -> String {
    match days {
        Some(d) => format!("{} d", d),
        None => "-".to_string(),
    }
}

/// Color an action label by severity
pub fn color_action(action: &Action) -> String {
    let label = action.label();
    match action {
        Action::ManualInspection | Action::NonComplianceAlert { .. } => label.red().bold().to_string(),
        Action::MaintenanceNotice { .. } => label.yellow().to_string(),
        Action::Ok => label.green().to_string(),
    }
}

/// Color a generation origin or status word
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "current" | "training" => status.green().to_string(),
        "incremental_update" => status.blue().to_string(),
        "anomaly" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color an R² score: green above 0.9, yellow above 0.7, red otherwise
pub fn color_r2(r2: f64) -> String {
    let formatted = format!("{:.3}", r2);
    if r2 >= 0.9 {
        formatted.green().to_string()
    } else if r2 >= 0.7 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}
