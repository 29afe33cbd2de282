use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MffError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// 文档根标签未注册
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Timezone required for date/time {0}")]
    MissingTimezone(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Corrupt block: {0}")]
    CorruptBlock(String),

    #[error("Unpaired file: {0}")]
    UnpairedFile(String),

    #[error("Missing file: {0}")]
    MissingFile(String),

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Unsupported unit conversion: {from} -> {to}")]
    UnsupportedUnit { from: String, to: String },

    #[error("Not an MFF container: {0}")]
    NotAContainer(String),

    #[error("No signal of type {0}")]
    UnknownSignalType(String),

    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),
}

pub type Result<T> = std::result::Result<T, MffError>;
