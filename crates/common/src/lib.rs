
use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Identifier for a column within a table schema.
pub type ColumnId = u16;

/// Identifier for a transaction, allocated by the transaction manager.
pub type TransactionId = u32;

/// Logical identifier for a page in the storage layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Fully-qualified identifier for a record within a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

/// Log Sequence Number: `(logFileNumber, fileOffset)`, totally ordered
/// lexicographically. The size of the record it names is recoverable from
/// the log itself, so it is not carried here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogSequenceNumber {
    pub file_number: u16,
    pub file_offset: u32,
}

impl LogSequenceNumber {
    pub const ZERO: LogSequenceNumber = LogSequenceNumber {
        file_number: 0,
        file_offset: 0,
    };

    pub fn new(file_number: u16, file_offset: u32) -> Self {
        Self {
            file_number,
            file_offset,
        }
    }
}

impl std::fmt::Display for LogSequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LSN({}:{})", self.file_number, self.file_offset)
    }
}

/// Positional row representation backed by `types::Value`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
    #[serde(skip)]
    #[serde(default)]
    rid: Option<RecordId>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self::new(values)
    }

    pub fn with_rid(mut self, rid: RecordId) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn set_rid(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Canonical error taxonomy shared across database subsystems.
///
/// Each variant corresponds to one of the six error kinds: I/O failures never
/// recovered locally, on-disk corruption that aborts recovery, user-level
/// transaction failures that preserve txn state for inspection, schema
/// mismatches reported synchronously, runtime evaluation failures that abort
/// only the current query, and programmer errors that are never recovered.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("transaction: {0}")]
    Transaction(String),
    #[error("schema: {0}")]
    Schema(String),
    #[error("execution: {0}")]
    Execution(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the database components, mirroring the
/// `nanodb.*` configuration keys.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .base_dir(PathBuf::from("./my_db"))
///     .page_size(8192)
///     .buffer_pool_bytes(1 << 20)
///     .transactions(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Root directory for persisted files (`nanodb.basedir`).
    #[builder(default = PathBuf::from("./db_data"))]
    pub base_dir: PathBuf,
    /// Default page size in bytes; must be a power of two in `[512, 65536]`
    /// (`nanodb.pagesize`).
    #[builder(default = 8192)]
    pub page_size: usize,
    /// Buffer pool byte budget (`nanodb.buffersize`).
    #[builder(default = 4 * 1024 * 1024)]
    pub buffer_pool_bytes: usize,
    /// Enables WAL + recovery when true; direct, non-durable writes when
    /// false (`nanodb.transactions`).
    #[builder(default = true)]
    pub transactions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./db_data"),
            page_size: 8192,
            buffer_pool_bytes: 4 * 1024 * 1024,
            transactions: true,
        }
    }
}

impl Config {
    /// Validates the page size invariant of the file manager: a power of two
    /// between 512 and 65536 inclusive.
    pub fn validate(&self) -> DbResult<()> {
        let p = self.page_size;
        if !p.is_power_of_two() || !(512..=65536).contains(&p) {
            return Err(DbError::InvalidArgument(format!(
                "page size {p} must be a power of two in [512, 65536]"
            )));
        }
        Ok(())
    }

    /// Parses `key=value` lines (one per line, `#`-prefixed comments and
    /// blank lines ignored) recognizing the four `nanodb.*` keys of the
    /// external configuration surface. Unknown keys are ignored.
    pub fn from_pairs(text: &str) -> DbResult<Self> {
        let mut cfg = Config::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(DbError::InvalidArgument(format!(
                    "malformed config line: {line}"
                )));
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "nanodb.transactions" => cfg.transactions = value == "on",
                "nanodb.basedir" => cfg.base_dir = PathBuf::from(value),
                "nanodb.pagesize" => {
                    cfg.page_size = value
                        .parse()
                        .map_err(|_| DbError::InvalidArgument(format!("bad page size: {value}")))?;
                }
                "nanodb.buffersize" => {
                    cfg.buffer_pool_bytes = value
                        .parse()
                        .map_err(|_| DbError::InvalidArgument(format!("bad buffer size: {value}")))?;
                }
                _ => {}
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        ColumnId, Config, DbError, DbResult, LogSequenceNumber, PageId, RecordId, Row,
        TransactionId,
    };
    pub use types::{SqlType, Value};
}
