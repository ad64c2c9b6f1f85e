//! The engine handle that wires every component together.
//!
//! There are no process-wide singletons: an [`Engine`] owns the catalog,
//! the buffer pool, and (when transactions are enabled) the transaction
//! manager, and every entry point threads those explicitly. A shell
//! submits parsed [`Command`]s and receives either a result set with
//! column descriptors or a completion status.


use buffer::{BufferPool, NullForcer, UpdateLogger, WalForcer, pages_for_budget};
use catalog::{Catalog, Column, KeyConstraints, TableStorage};
use colstore::ColStoreTable;
use colstore::encoding::BasicAnalyzer;
use common::{Config, DbError, DbResult, Row};
use executor::ExecutionContext;
use heap::HeapFile;
use planner::SelectClause;
use std::path::Path;
use txn::TransactionManager;
use types::{SqlType, Value};

/// Process exit codes the embedding shell is expected to use.
pub const EXIT_OK: i32 = 0;
pub const EXIT_STARTUP_FAILURE: i32 = 1;
pub const EXIT_SHUTDOWN_FAILURE: i32 = 2;

/// File holding the table registry, beside the table directories.
const CATALOG_FILE: &str = "catalog.json";

/// Installs a `tracing` subscriber reading `RUST_LOG`. Embedders and tests
/// that install their own may skip this; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A parsed command submitted by the shell.
#[derive(Clone, Debug)]
pub enum Command {
    CreateTable {
        table: String,
        columns: Vec<Column>,
        keys: KeyConstraints,
        storage: TableStorage,
    },
    Insert {
        table: String,
        values: Vec<Value>,
    },
    Select(SelectClause),
    Begin,
    Commit,
    Rollback,
    /// Loads a tab-separated text file into a table: row-at-a-time inserts
    /// for a heap table, the analyzing bulk loader for a column store.
    LoadFile {
        table: String,
        path: std::path::PathBuf,
    },
    Exit,
}

/// Result set of a SELECT: column descriptors plus the materialized rows.
#[derive(Clone, Debug)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// What a command produced.
#[derive(Clone, Debug)]
pub enum CommandOutput {
    Done,
    RowsAffected(u64),
    Rows(QueryResult),
    /// The shell should shut the engine down and exit.
    ExitRequested,
}

/// A running database instance rooted at `config.base_dir`.
pub struct Engine {
    config: Config,
    catalog: Catalog,
    pool: BufferPool,
    txn: Option<TransactionManager>,
    no_wal: NullForcer,
}

impl Engine {
    /// Opens (creating as needed) the data directory, runs crash recovery
    /// when transactions are enabled, and loads the catalog.
    pub fn open(config: Config) -> DbResult<Engine> {
        config.validate()?;
        std::fs::create_dir_all(&config.base_dir)?;

        // Recovery rewrites data files directly, so it runs before any
        // page enters the buffer pool.
        let txn = if config.transactions {
            let (manager, report) = TransactionManager::open(&config.base_dir, config.page_size)?;
            if !report.txns_undone.is_empty() || report.redone_updates > 0 {
                tracing::info!(
                    redone = report.redone_updates,
                    undone = ?report.txns_undone,
                    "crash recovery applied"
                );
            }
            Some(manager)
        } else {
            tracing::warn!("transactions are off: writes are direct and non-durable");
            None
        };

        let catalog = Catalog::load(&config.base_dir.join(CATALOG_FILE))?;
        let max_pages = pages_for_budget(config.buffer_pool_bytes, config.page_size);
        let pool = BufferPool::new(&config.base_dir, max_pages);

        Ok(Engine {
            config,
            catalog,
            pool,
            txn,
            no_wal: NullForcer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Executes one command against the engine.
    pub fn execute(&mut self, command: Command) -> DbResult<CommandOutput> {
        match command {
            Command::CreateTable {
                table,
                columns,
                keys,
                storage,
            } => {
                self.create_table(&table, columns, keys, storage)?;
                Ok(CommandOutput::Done)
            }
            Command::Insert { table, values } => {
                self.insert(&table, values)?;
                Ok(CommandOutput::RowsAffected(1))
            }
            Command::Select(clause) => Ok(CommandOutput::Rows(self.query(&clause)?)),
            Command::Begin => {
                let txn = self.txn.as_mut().ok_or_else(|| {
                    DbError::Transaction("transactions are disabled in this configuration".into())
                })?;
                txn.start_transaction(true)?;
                Ok(CommandOutput::Done)
            }
            Command::Commit => {
                let txn = self.txn.as_mut().ok_or_else(|| {
                    DbError::Transaction("transactions are disabled in this configuration".into())
                })?;
                txn.commit_transaction()?;
                Ok(CommandOutput::Done)
            }
            Command::Rollback => {
                let txn = self.txn.as_mut().ok_or_else(|| {
                    DbError::Transaction("transactions are disabled in this configuration".into())
                })?;
                txn.rollback_transaction(&mut self.pool)?;
                Ok(CommandOutput::Done)
            }
            Command::LoadFile { table, path } => {
                let count = self.load_file(&table, &path)?;
                Ok(CommandOutput::RowsAffected(count))
            }
            Command::Exit => Ok(CommandOutput::ExitRequested),
        }
    }

    /// Runs a SELECT and materializes its output.
    pub fn query(&mut self, clause: &SelectClause) -> DbResult<QueryResult> {
        let (pool, forcer) = match &mut self.txn {
            Some(txn) => (&mut self.pool, txn as &mut dyn WalForcer),
            None => (&mut self.pool, &mut self.no_wal as &mut dyn WalForcer),
        };
        let mut ctx = ExecutionContext { pool, forcer };
        let mut plan = planner::make_plan(clause, &mut ctx)?;
        let columns = plan.schema().columns.clone();
        let rows = executor::execute(plan.as_mut(), &mut ctx)?;
        Ok(QueryResult { columns, rows })
    }

    fn create_table(
        &mut self,
        table: &str,
        columns: Vec<Column>,
        keys: KeyConstraints,
        storage: TableStorage,
    ) -> DbResult<()> {
        self.catalog.define_table(table, columns, keys, storage)?;
        if storage == TableStorage::Heap {
            let schema = self.catalog.table(table)?.schema.clone();
            HeapFile::create(&mut self.pool, table, schema, self.config.page_size)?;
        }
        // A column-store table materializes its files at LoadFile time,
        // when the bulk loader has the whole input to analyze.
        self.save_catalog()?;
        tracing::info!(table, ?storage, "table created");
        Ok(())
    }

    fn insert(&mut self, table: &str, values: Vec<Value>) -> DbResult<()> {
        if self.catalog.table(table)?.storage_kind != TableStorage::Heap {
            return Err(DbError::Schema(format!(
                "'{table}' is a column-store table; use LoadFile to populate it"
            )));
        }

        let implicit = match &mut self.txn {
            Some(txn) if !txn.in_transaction() => {
                txn.start_transaction(false)?;
                true
            }
            _ => false,
        };

        let result = self.insert_inner(table, values);
        match result {
            Ok(()) => {
                if implicit {
                    self.txn.as_mut().expect("started above").commit_transaction()?;
                }
                Ok(())
            }
            Err(err) => {
                if implicit
                    && let Some(txn) = &mut self.txn
                    && let Err(rollback_err) = txn.rollback_transaction(&mut self.pool)
                {
                    tracing::error!(%rollback_err, "rollback after failed insert also failed");
                }
                Err(err)
            }
        }
    }

    fn insert_inner(&mut self, table: &str, values: Vec<Value>) -> DbResult<()> {
        let (pool, logger) = match &mut self.txn {
            Some(txn) => (&mut self.pool, txn as &mut dyn UpdateLogger),
            None => (&mut self.pool, &mut self.no_wal as &mut dyn UpdateLogger),
        };
        let heap = HeapFile::open(pool, &mut *logger, table)?;
        heap.add_tuple(pool, logger, &Row::new(values))?;
        Ok(())
    }

    fn load_file(&mut self, table: &str, path: &Path) -> DbResult<u64> {
        let meta = self.catalog.table(table)?;
        let schema = meta.schema.clone();
        let storage = meta.storage_kind;
        let text = std::fs::read_to_string(path)?;
        let rows = parse_rows(&schema.columns, &text)?;
        let count = rows.len() as u64;

        match storage {
            TableStorage::Heap => {
                for row in rows {
                    self.insert(table, row.into_values())?;
                }
            }
            TableStorage::ColumnStore => {
                ColStoreTable::write_table(
                    &mut self.pool,
                    &BasicAnalyzer,
                    table,
                    schema,
                    &rows,
                    self.config.page_size,
                )?;
            }
        }
        tracing::info!(table, count, "file loaded");
        Ok(count)
    }

    fn save_catalog(&self) -> DbResult<()> {
        self.catalog.save(&self.config.base_dir.join(CATALOG_FILE))
    }

    /// Clean shutdown: every dirty page is written and fsynced (the WAL is
    /// forced first, per the WAL rule), and the recovery scan range is
    /// emptied. Dropping the engine without calling this models a crash.
    pub fn shutdown(mut self) -> DbResult<()> {
        if let Some(txn) = &mut self.txn {
            if txn.in_transaction() {
                txn.rollback_transaction(&mut self.pool)?;
            }
            self.pool.flush_all(true, txn)?;
            txn.advance_first_lsn_to_tail()?;
        } else {
            self.pool.flush_all(true, &mut self.no_wal)?;
        }
        self.save_catalog()?;
        tracing::info!("engine shut down cleanly");
        Ok(())
    }
}

/// Parses a tab-separated load file: one row per line, `\N` or an empty
/// field for NULL, values formatted per the declared column types.
fn parse_rows(columns: &[Column], text: &str) -> DbResult<Vec<Row>> {
    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns.len() {
            return Err(DbError::Schema(format!(
                "line {}: {} fields for {} columns",
                line_no + 1,
                fields.len(),
                columns.len()
            )));
        }
        let values = columns
            .iter()
            .zip(&fields)
            .map(|(col, field)| parse_value(col.ty, field))
            .collect::<DbResult<Vec<Value>>>()?;
        rows.push(Row::new(values));
    }
    Ok(rows)
}

fn parse_value(ty: SqlType, field: &str) -> DbResult<Value> {
    if field.is_empty() || field == "\\N" {
        return Ok(Value::Null);
    }
    let bad = || DbError::Schema(format!("cannot parse {field:?} as {ty:?}"));
    Ok(match ty {
        SqlType::Integer => Value::Integer(field.parse().map_err(|_| bad())?),
        SqlType::BigInt => Value::BigInt(field.parse().map_err(|_| bad())?),
        SqlType::Float => Value::Float(field.parse().map_err(|_| bad())?),
        SqlType::Double => Value::Double(field.parse().map_err(|_| bad())?),
        SqlType::Char(_) => Value::Char(field.to_string()),
        SqlType::Varchar(_) => Value::Varchar(field.to_string()),
        SqlType::Boolean => match field {
            "true" | "TRUE" | "1" => Value::Boolean(true),
            "false" | "FALSE" | "0" => Value::Boolean(false),
            _ => return Err(DbError::Schema(format!("cannot parse {field:?} as BOOLEAN"))),
        },
    })
}
