//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_table<T: Tabled>(items: Vec<T>, empty_message: &str) {
    if items.is_empty() {
        print_warning(empty_message);
        return;
    }
    println!("{}", Table::new(items).with(Style::rounded()));
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Pending count colored by how much is still outstanding
pub fn color_remaining(remaining: usize, requests: usize) -> String {
    let text = format!("{}/{}", remaining, requests);
    if remaining == 0 {
        text.green().to_string()
    } else if remaining * 2 <= requests {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}
