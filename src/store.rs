// ============================================================================
// Sled Store - persistent snapshot of the engine state
// ============================================================================
//
// One tree per entity, JSON values:
//
//   contests  contest_id                -> Contest
//   entries   contest_id/entry_id       -> Entry
//   ballots   contest_id/participant_id -> Ballot
//   wagers    contest_id/bettor_id      -> Wager
//   ledger    seq (u64 big-endian)      -> LedgerTransaction   (insert only)
//   members   trip_id/user_id           -> TripMember
//
// Contest-scoped trees are rewritten with one batch each, removing keys
// whose rows no longer exist. Ledger rows already on disk are never touched.
//
// ============================================================================

use crate::contest::{Ballot, BallotBox, Contest, Entry, EntryRegistry, Wager, WagerBook};
use crate::engine::{ContestRecord, EngineState};
use crate::error::{ContestError, ContestResult};
use crate::ledger::{Ledger, LedgerTransaction};
use crate::membership::TripMember;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub contests: usize,
    pub entries: usize,
    pub ballots: usize,
    pub wagers: usize,
    pub ledger_rows_written: usize,
}

pub struct SledStore {
    db: sled::Db,
    contests: sled::Tree,
    entries: sled::Tree,
    ballots: sled::Tree,
    wagers: sled::Tree,
    ledger: sled::Tree,
    members: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> ContestResult<Self> {
        let db = sled::open(path.as_ref())?;
        info!("💾 Opened contest store at {}", path.as_ref().display());
        Self::from_db(db)
    }

    /// Throwaway store, deleted on drop
    pub fn temporary() -> ContestResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> ContestResult<Self> {
        Ok(Self {
            contests: db.open_tree("contests")?,
            entries: db.open_tree("entries")?,
            ballots: db.open_tree("ballots")?,
            wagers: db.open_tree("wagers")?,
            ledger: db.open_tree("ledger")?,
            members: db.open_tree("members")?,
            db,
        })
    }

    // ------------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------------

    /// Write the whole state. Call under the engine lock for a consistent view.
    pub fn save(&self, state: &EngineState) -> ContestResult<SnapshotStats> {
        let mut contests = BTreeMap::new();
        let mut entries = BTreeMap::new();
        let mut ballots = BTreeMap::new();
        let mut wagers = BTreeMap::new();

        for (id, record) in &state.contests {
            contests.insert(id.clone(), serde_json::to_vec(&record.contest)?);
            for entry in record.entries.iter() {
                entries.insert(scoped_key(id, &entry.id), serde_json::to_vec(entry)?);
            }
            for ballot in record.ballots.iter() {
                ballots.insert(scoped_key(id, &ballot.participant_id), serde_json::to_vec(ballot)?);
            }
            for wager in record.wagers.iter() {
                wagers.insert(scoped_key(id, &wager.bettor_id), serde_json::to_vec(wager)?);
            }
        }

        let stats = SnapshotStats {
            contests: contests.len(),
            entries: entries.len(),
            ballots: ballots.len(),
            wagers: wagers.len(),
            ledger_rows_written: self.append_ledger(state.ledger.transactions())?,
        };

        replace_tree(&self.contests, contests)?;
        replace_tree(&self.entries, entries)?;
        replace_tree(&self.ballots, ballots)?;
        replace_tree(&self.wagers, wagers)?;
        self.db.flush()?;

        debug!("Snapshot written: {:?}", stats);
        Ok(stats)
    }

    fn append_ledger(&self, transactions: &[LedgerTransaction]) -> ContestResult<usize> {
        let stored_head = match self.ledger.last()? {
            Some((key, _)) => decode_seq(&key)?,
            None => 0,
        };

        let mut batch = sled::Batch::default();
        let mut written = 0;
        for tx in transactions.iter().filter(|tx| tx.seq > stored_head) {
            batch.insert(tx.seq.to_be_bytes().to_vec(), serde_json::to_vec(tx)?);
            written += 1;
        }
        if written > 0 {
            self.ledger.apply_batch(batch)?;
        }
        Ok(written)
    }

    pub fn save_members(&self, members: &[TripMember]) -> ContestResult<()> {
        let mut rows = BTreeMap::new();
        for m in members {
            rows.insert(scoped_key(&m.trip_id, &m.user_id), serde_json::to_vec(m)?);
        }
        replace_tree(&self.members, rows)?;
        self.db.flush()?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------------

    pub fn load(&self) -> ContestResult<EngineState> {
        let mut contests: HashMap<String, ContestRecord> = HashMap::new();
        for contest in read_tree::<Contest>(&self.contests)? {
            contests.insert(contest.id.clone(), ContestRecord::new(contest));
        }

        let mut entries: HashMap<String, Vec<Entry>> = HashMap::new();
        for entry in read_tree::<Entry>(&self.entries)? {
            entries.entry(entry.contest_id.clone()).or_default().push(entry);
        }
        let mut ballots: HashMap<String, Vec<Ballot>> = HashMap::new();
        for ballot in read_tree::<Ballot>(&self.ballots)? {
            ballots.entry(ballot.contest_id.clone()).or_default().push(ballot);
        }
        let mut wagers: HashMap<String, Vec<Wager>> = HashMap::new();
        for wager in read_tree::<Wager>(&self.wagers)? {
            wagers.entry(wager.contest_id.clone()).or_default().push(wager);
        }

        for (id, record) in contests.iter_mut() {
            record.entries = EntryRegistry::from_entries(entries.remove(id).unwrap_or_default());
            record.ballots = BallotBox::from_ballots(ballots.remove(id).unwrap_or_default());
            record.wagers = WagerBook::from_wagers(wagers.remove(id).unwrap_or_default());
        }
        let orphans = entries.len() + ballots.len() + wagers.len();
        if orphans > 0 {
            warn!("⚠️ Ignored rows for {} unknown contests", orphans);
        }

        let ledger = Ledger::from_transactions(read_tree::<LedgerTransaction>(&self.ledger)?)?;
        info!(
            "📂 Loaded {} contests and {} ledger transactions",
            contests.len(),
            ledger.len()
        );
        Ok(EngineState { contests, ledger })
    }

    pub fn load_members(&self) -> ContestResult<Vec<TripMember>> {
        read_tree(&self.members)
    }
}

fn scoped_key(scope: &str, id: &str) -> String {
    format!("{}/{}", scope, id)
}

fn decode_seq(key: &[u8]) -> ContestResult<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| ContestError::Storage(format!("malformed ledger key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Make `tree` hold exactly `rows`
fn replace_tree(tree: &sled::Tree, rows: BTreeMap<String, Vec<u8>>) -> ContestResult<()> {
    let mut batch = sled::Batch::default();
    for key in tree.iter().keys() {
        let key = key?;
        if !rows.contains_key(String::from_utf8_lossy(&key).as_ref()) {
            batch.remove(key);
        }
    }
    for (key, value) in rows {
        batch.insert(key.as_bytes(), value);
    }
    tree.apply_batch(batch)?;
    Ok(())
}

fn read_tree<T: DeserializeOwned>(tree: &sled::Tree) -> ContestResult<Vec<T>> {
    let mut rows = Vec::new();
    for item in tree.iter() {
        let (_, value) = item?;
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}
