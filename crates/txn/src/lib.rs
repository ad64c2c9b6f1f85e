//! Transaction manager: txn id allocation, per-session transaction state,
//! and the txn-state page that anchors crash recovery.
//!
//! The manager owns the `WalManager` and is the single component that
//! appends to the log. Table managers report page mutations through
//! [`buffer::UpdateLogger`]; the buffer pool forces the log through
//! [`buffer::WalForcer`]. Both arrive here.


use byteorder::{BigEndian, ByteOrder};
use buffer::{BufferPool, UpdateLogger, WalForcer};
use common::{DbError, DbResult, LogSequenceNumber, TransactionId};
use std::path::{Path, PathBuf};
use storage::{DBFile, DBPage, DbFileType};
use wal::{RecoveryReport, WalManager, WalRecord, read_record};

/// File name of the single-page txn-state file inside the data directory.
pub const TXN_STATE_FILE: &str = "txnstate.dat";

/// Offset of the txn-state payload, just past the common page-0 header.
const STATE_OFFSET: usize = 3;

/// The in-progress transaction attached to a session. A session has at most
/// one; the engine serializes write transactions.
#[derive(Clone, Debug)]
pub struct TransactionState {
    pub txn_id: TransactionId,
    /// True when the transaction was opened by an explicit BEGIN rather
    /// than implicitly around a single statement.
    pub user_started: bool,
    pub performed_writes: bool,
    /// Set once the lazy START_TXN record has been appended.
    pub logged_start: bool,
    pub last_lsn: Option<LogSequenceNumber>,
}

/// Coordinates transactions against the write-ahead log and persists
/// `{nextTransactionId, firstLSN, nextLSN}` in the txn-state page.
pub struct TransactionManager {
    base_dir: PathBuf,
    state_file: DBFile,
    wal: WalManager,
    next_txn_id: TransactionId,
    /// Earliest LSN still needed for recovery.
    first_lsn: LogSequenceNumber,
    /// In-memory mirror of the log's append position; persisted on every
    /// WAL force so that durable data pages are always covered by the
    /// recovery scan range.
    next_lsn: LogSequenceNumber,
    session: Option<TransactionState>,
}

impl TransactionManager {
    /// Opens (creating on first use) the txn-state file and the WAL, and
    /// runs crash recovery if the persisted `firstLSN`/`nextLSN` differ.
    pub fn open(base_dir: impl Into<PathBuf>, page_size: usize) -> DbResult<(Self, RecoveryReport)> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let state_path = base_dir.join(TXN_STATE_FILE);

        if !state_path.exists() {
            // Bootstrap: the log's very first record position is the initial
            // value of both LSN fields.
            let initial = LogSequenceNumber::new(0, wal::HEADER_LEN as u32);
            let mut file = DBFile::create(&state_path, DbFileType::TxnState, page_size)?;
            write_state_page(&mut file, 1, initial, initial)?;
            file.sync()?;
        }

        let mut state_file = DBFile::open(&state_path)?;
        let (next_txn_id, first_lsn, next_lsn) = read_state_page(&mut state_file)?;
        if first_lsn > next_lsn {
            return Err(DbError::Corruption(format!(
                "txn-state page has firstLSN {first_lsn} past nextLSN {next_lsn}"
            )));
        }

        let mut report = RecoveryReport::default();
        let mut first_lsn = first_lsn;
        let mut next_lsn = next_lsn;
        if first_lsn != next_lsn {
            tracing::info!(%first_lsn, %next_lsn, "starting WAL recovery");
            let (recovered_next, rec_report) =
                wal::recover(&base_dir, first_lsn, next_lsn, page_size)?;
            // Everything before the recovered tail now describes only
            // committed, already-redone effects; a later crash never needs
            // to scan past it again.
            first_lsn = recovered_next;
            next_lsn = recovered_next;
            write_state_page(&mut state_file, next_txn_id, first_lsn, next_lsn)?;
            state_file.sync()?;
            tracing::info!(
                undone = rec_report.txns_undone.len(),
                redone = rec_report.redone_updates,
                "recovery complete"
            );
            report = rec_report;
        }

        let wal = WalManager::open_or_create(&base_dir, page_size)?;
        if wal.next_lsn() < next_lsn {
            return Err(DbError::Corruption(format!(
                "WAL ends at {} but the txn-state page recorded nextLSN {next_lsn}",
                wal.next_lsn()
            )));
        }

        Ok((
            Self {
                base_dir,
                state_file,
                wal,
                next_txn_id,
                first_lsn,
                next_lsn,
                session: None,
            },
            report,
        ))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn in_transaction(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&TransactionState> {
        self.session.as_ref()
    }

    pub fn next_lsn(&self) -> LogSequenceNumber {
        self.next_lsn
    }

    pub fn first_lsn(&self) -> LogSequenceNumber {
        self.first_lsn
    }

    /// Allocates a transaction id and attaches it to the session. No WAL
    /// record is written until the transaction performs its first write.
    pub fn start_transaction(&mut self, user_started: bool) -> DbResult<TransactionId> {
        if let Some(state) = &self.session {
            return Err(DbError::Transaction(format!(
                "transaction {} is already in progress",
                state.txn_id
            )));
        }
        let txn_id = self.next_txn_id;
        self.next_txn_id = self.next_txn_id.wrapping_add(1);
        self.session = Some(TransactionState {
            txn_id,
            user_started,
            performed_writes: false,
            logged_start: false,
            last_lsn: None,
        });
        tracing::debug!(txn_id, user_started, "transaction started");
        Ok(txn_id)
    }

    /// Appends COMMIT_TXN and forces the log through it; this is the
    /// durability boundary. A transaction that never wrote commits
    /// silently. On I/O failure the session state is left intact so the
    /// caller can inspect or retry.
    pub fn commit_transaction(&mut self) -> DbResult<()> {
        let state = self
            .session
            .as_ref()
            .ok_or_else(|| DbError::Transaction("no transaction in progress".into()))?;
        if state.performed_writes {
            let prev_lsn = state
                .last_lsn
                .ok_or_else(|| DbError::Transaction("write transaction has no lastLSN".into()))?;
            let txn_id = state.txn_id;
            let lsn = self.wal.append(&WalRecord::CommitTxn { txn_id, prev_lsn })?;
            self.force_through(lsn)?;
            tracing::debug!(txn_id, %lsn, "transaction committed");
        }
        self.session = None;
        Ok(())
    }

    /// Rolls back the in-flight transaction: walks its `prevLSN` chain
    /// backward, restoring pre-images into the buffer pool and appending
    /// compensating redo-only records, then appends ABORT_TXN.
    pub fn rollback_transaction(&mut self, pool: &mut BufferPool) -> DbResult<()> {
        let state = self
            .session
            .take()
            .ok_or_else(|| DbError::Transaction("no transaction in progress".into()))?;
        if !state.performed_writes {
            tracing::debug!(txn_id = state.txn_id, "read-only transaction rolled back");
            return Ok(());
        }

        let txn_id = state.txn_id;
        let mut chain_lsn = state
            .last_lsn
            .ok_or_else(|| DbError::Transaction("write transaction has no lastLSN".into()))?;
        let mut cursor = Some(chain_lsn);

        // Borrow the WAL and state page separately from `self` so the same
        // state-persisting forcer can serve evictions inside `pool.pin`.
        let mut forcer = StateForcer {
            wal: &mut self.wal,
            state_file: &mut self.state_file,
            next_txn_id: self.next_txn_id,
            first_lsn: self.first_lsn,
            next_lsn: &mut self.next_lsn,
        };

        while let Some(lsn) = cursor {
            let record = read_record(&self.base_dir, lsn)?;
            match record {
                WalRecord::StartTxn { .. } => {
                    forcer.wal.append(&WalRecord::AbortTxn {
                        txn_id,
                        prev_lsn: chain_lsn,
                    })?;
                    break;
                }
                WalRecord::UpdatePage {
                    prev_lsn,
                    file_name,
                    page_no,
                    segments,
                    ..
                } => {
                    let page = pool.pin(&file_name, page_no as u64, false, &mut forcer)?;
                    page.mark_dirty();
                    for seg in &segments {
                        storage::apply_new_bytes(&mut page.data, seg.index, &seg.old_bytes);
                    }
                    let redo_segments = segments
                        .iter()
                        .map(|s| wal::RedoSegment {
                            index: s.index,
                            new_bytes: s.old_bytes.clone(),
                        })
                        .collect();
                    let clr = forcer.wal.append(&WalRecord::UpdatePageRedoOnly {
                        txn_id,
                        prev_lsn: chain_lsn,
                        file_name: file_name.clone(),
                        page_no,
                        segments: redo_segments,
                        start_off: 0,
                    })?;
                    let page = pool.page_mut(&file_name, page_no as u64)?;
                    page.page_lsn = Some(clr);
                    page.rebase_snapshot();
                    pool.unpin(&file_name, page_no as u64)?;
                    chain_lsn = clr;
                    cursor = Some(prev_lsn);
                }
                other => {
                    // Rollback only ever expects its own START/UPDATE chain.
                    tracing::warn!(txn_id, ?other, "unexpected record type during rollback, skipping");
                    cursor = prev_lsn_of(&other);
                }
            }
        }

        *forcer.next_lsn = forcer.wal.next_lsn();
        tracing::debug!(txn_id, "transaction rolled back");
        Ok(())
    }

    /// After every dirty page has been flushed and fsynced (a clean
    /// shutdown), nothing before the log tail is needed for redo; advancing
    /// `firstLSN` keeps the next startup's recovery scan empty.
    pub fn advance_first_lsn_to_tail(&mut self) -> DbResult<()> {
        let tail = self.wal.next_lsn();
        self.first_lsn = tail;
        self.next_lsn = tail;
        write_state_page(&mut self.state_file, self.next_txn_id, self.first_lsn, self.next_lsn)?;
        self.state_file.sync()
    }

    /// Forces the log through `lsn` and persists the covering `nextLSN` so
    /// that any data page made durable under the WAL rule is inside the
    /// recovery scan range of the next startup.
    fn force_through(&mut self, lsn: LogSequenceNumber) -> DbResult<()> {
        let mut forcer = StateForcer {
            wal: &mut self.wal,
            state_file: &mut self.state_file,
            next_txn_id: self.next_txn_id,
            first_lsn: self.first_lsn,
            next_lsn: &mut self.next_lsn,
        };
        forcer.force_wal(lsn)
    }
}

impl WalForcer for TransactionManager {
    fn force_wal(&mut self, target: LogSequenceNumber) -> DbResult<()> {
        self.force_through(target)
    }
}

impl UpdateLogger for TransactionManager {
    /// Called by table managers after they mutate a pinned page. Lazily
    /// emits START_TXN on the transaction's first write, logs the byte diff
    /// against the page's snapshot, stamps the page LSN, and re-bases the
    /// snapshot so the next mutation diffs against freshly-logged bytes.
    fn record_page_update(&mut self, page: &mut DBPage) -> DbResult<()> {
        let state = self
            .session
            .as_mut()
            .ok_or_else(|| DbError::Transaction("page update outside any transaction".into()))?;
        let txn_id = state.txn_id;

        if !state.logged_start {
            let lsn = self.wal.append(&WalRecord::StartTxn { txn_id })?;
            state.logged_start = true;
            state.last_lsn = Some(lsn);
        }

        let segments = page.diff();
        if segments.is_empty() {
            return Ok(());
        }
        let prev_lsn = state.last_lsn.expect("START_TXN was just logged");
        let page_no: u16 = page.page_no.try_into().map_err(|_| {
            DbError::InvalidArgument(format!("page number {} exceeds the loggable range", page.page_no))
        })?;
        let lsn = self.wal.append(&WalRecord::UpdatePage {
            txn_id,
            prev_lsn,
            file_name: page.file_name.clone(),
            page_no,
            segments,
            start_off: 0,
        })?;

        state.last_lsn = Some(lsn);
        state.performed_writes = true;
        page.page_lsn = Some(lsn);
        page.rebase_snapshot();
        self.next_lsn = self.wal.next_lsn();
        Ok(())
    }
}

/// Disjoint-field borrow of the manager used wherever a `WalForcer` must
/// outlive another borrow of the manager (rollback pinning pages while the
/// WAL stays appendable).
struct StateForcer<'a> {
    wal: &'a mut WalManager,
    state_file: &'a mut DBFile,
    next_txn_id: TransactionId,
    first_lsn: LogSequenceNumber,
    next_lsn: &'a mut LogSequenceNumber,
}

impl WalForcer for StateForcer<'_> {
    fn force_wal(&mut self, target: LogSequenceNumber) -> DbResult<()> {
        self.wal.force_wal(target)?;
        let tail = self.wal.next_lsn();
        if tail > *self.next_lsn {
            *self.next_lsn = tail;
            write_state_page(self.state_file, self.next_txn_id, self.first_lsn, tail)?;
            self.state_file.sync()?;
        }
        Ok(())
    }
}

fn prev_lsn_of(record: &WalRecord) -> Option<LogSequenceNumber> {
    match record {
        WalRecord::StartTxn { .. } => None,
        WalRecord::CommitTxn { prev_lsn, .. }
        | WalRecord::AbortTxn { prev_lsn, .. }
        | WalRecord::UpdatePage { prev_lsn, .. }
        | WalRecord::UpdatePageRedoOnly { prev_lsn, .. } => Some(*prev_lsn),
    }
}

fn write_state_page(
    file: &mut DBFile,
    next_txn_id: TransactionId,
    first_lsn: LogSequenceNumber,
    next_lsn: LogSequenceNumber,
) -> DbResult<()> {
    let mut buf = vec![0u8; file.page_size];
    file.read_page(0, &mut buf, false)?;
    let s = STATE_OFFSET;
    BigEndian::write_u32(&mut buf[s..s + 4], next_txn_id);
    BigEndian::write_u16(&mut buf[s + 4..s + 6], first_lsn.file_number);
    BigEndian::write_u32(&mut buf[s + 6..s + 10], first_lsn.file_offset);
    BigEndian::write_u16(&mut buf[s + 10..s + 12], next_lsn.file_number);
    BigEndian::write_u32(&mut buf[s + 12..s + 16], next_lsn.file_offset);
    file.write_page(0, &buf)
}

fn read_state_page(
    file: &mut DBFile,
) -> DbResult<(TransactionId, LogSequenceNumber, LogSequenceNumber)> {
    let mut buf = vec![0u8; file.page_size];
    file.read_page(0, &mut buf, false)?;
    let s = STATE_OFFSET;
    let next_txn_id = BigEndian::read_u32(&buf[s..s + 4]);
    let first_lsn = LogSequenceNumber::new(
        BigEndian::read_u16(&buf[s + 4..s + 6]),
        BigEndian::read_u32(&buf[s + 6..s + 10]),
    );
    let next_lsn = LogSequenceNumber::new(
        BigEndian::read_u16(&buf[s + 10..s + 12]),
        BigEndian::read_u32(&buf[s + 12..s + 16]),
    );
    Ok((next_txn_id, first_lsn, next_lsn))
}
