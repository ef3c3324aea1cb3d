//! Output formatting

use clap::ValueEnum;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn print<T: Serialize + Tabled>(&self, rows: &[T]) {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default());
            }
            OutputFormat::Table => {
                if rows.is_empty() {
                    println!("(no rows)");
                } else {
                    println!("{}", Table::new(rows));
                }
            }
        }
    }
}
