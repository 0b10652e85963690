use thiserror::Error;

use crate::sim_if::TimeUnit;

#[derive(Debug, Error)]
pub enum TbError {
    #[error("no simulator interface installed on this thread")]
    NoSimulator,
    #[error("object `{0}` not found in design")]
    ObjectNotFound(String),
    #[error("object `{0}` does not carry a value")]
    NoValue(String),
    #[error("unknown callback handle {0}")]
    UnknownCallback(usize),
    #[error("can't convert {time}{unit} to sim steps without rounding (sim precision: 1e{precision} s)")]
    TimeResolution {
        time: u64,
        unit: TimeUnit,
        precision: i8,
    },
    #[error("task was cancelled before it completed")]
    Cancelled,
    #[error("Tests failed: {0}")]
    Mismatch(u32),
    #[error("Test completed but {0} expected values weren't checked")]
    Unchecked(usize),
    #[error("unknown coverage item `{0}`")]
    UnknownCoverItem(String),
    #[error("invalid value `{value}` for {key}")]
    Config { key: &'static str, value: String },
    #[error("could not write report: {0}")]
    Report(String),
    #[error("could not write coverage: {0}")]
    Xml(#[from] xml::writer::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
