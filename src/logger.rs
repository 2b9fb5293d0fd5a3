use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use fern::Dispatch;
use log::Record;
use serde::Serialize;

use crate::config::{Config, LogType};

#[derive(Serialize)]
struct Entry<'a> {
    timestamp: u64,
    level: &'a str,
    target: &'a str,
    message: String,
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|it| it.as_millis() as u64)
        .unwrap_or_default()
}

fn text_line(record: &Record, message: &fmt::Arguments) -> String {
    format!(
        "[{}] - ({}) - {}",
        record.level(),
        record.file_static().unwrap_or("*"),
        message
    )
}

fn json_line(record: &Record, message: &fmt::Arguments) -> String {
    let entry = Entry {
        level: record.level().as_str(),
        target: record.target(),
        message: message.to_string(),
        timestamp: timestamp(),
    };

    serde_json::to_string(&entry).unwrap_or_else(|_| message.to_string())
}

/// Installs the global logger described by the config.
pub fn init(config: &Config) -> Result<()> {
    let line: fn(&Record, &fmt::Arguments) -> String = match config.log_type {
        LogType::Text => text_line,
        LogType::Json => json_line,
    };

    Dispatch::new()
        .level(config.log_level.as_level().to_level_filter())
        .format(move |out, message, record| out.finish(format_args!("{}", line(record, message))))
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}
