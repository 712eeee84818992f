use std::collections::BTreeMap;
use std::path::Path;

use epochx_core::error::EpochxError;
use epochx_core::types::{AccountId, Balance, Epoch, Position};
use epochx_window::SlidingWindow;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use crate::buckets::EpochBalance;
use crate::ledger::{ChangeSet, Ledger, LedgerParts};

const META_WINDOW: &str = "window";
const META_TOTAL_MINTED: &str = "total_minted";
const META_TOTAL_BURNED: &str = "total_burned";
const META_LAST_POINTER: &str = "last_pointer";

fn storage_err(e: sled::Error) -> EpochxError {
    EpochxError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EpochxError> {
    bincode::serialize(value).map_err(|e| EpochxError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EpochxError> {
    bincode::deserialize(bytes).map_err(|e| EpochxError::Serialization(e.to_string()))
}

fn epoch_key(epoch: Epoch, account: &AccountId) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&epoch.to_be_bytes());
    key[8..].copy_from_slice(account.as_bytes());
    key
}

fn pair_key(a: &AccountId, b: &AccountId) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(a.as_bytes());
    key[32..].copy_from_slice(b.as_bytes());
    key
}

fn split_epoch_key(key: &[u8]) -> Result<(Epoch, AccountId), EpochxError> {
    let raw: [u8; 40] = key
        .try_into()
        .map_err(|_| EpochxError::Serialization(format!("bad epoch key length {}", key.len())))?;
    let mut epoch = [0u8; 8];
    epoch.copy_from_slice(&raw[..8]);
    let mut account = [0u8; 32];
    account.copy_from_slice(&raw[8..]);
    Ok((Epoch::from_be_bytes(epoch), AccountId(account)))
}

fn split_pair_key(key: &[u8]) -> Result<(AccountId, AccountId), EpochxError> {
    let raw: [u8; 64] = key
        .try_into()
        .map_err(|_| EpochxError::Serialization(format!("bad allowance key length {}", key.len())))?;
    let mut a = [0u8; 32];
    a.copy_from_slice(&raw[..32]);
    let mut b = [0u8; 32];
    b.copy_from_slice(&raw[32..]);
    Ok((AccountId(a), AccountId(b)))
}

/// Persistent ledger store backed by sled.
///
/// Named trees:
///   epochs     : epoch BE ‖ AccountId → bincode(EpochBalance)
///   world      : position BE          → bincode(Balance)
///   allowances : owner ‖ spender      → bincode(Balance)
///   meta       : utf8 key bytes       → raw bytes
pub struct StateDb {
    db: sled::Db,
    epochs: sled::Tree,
    world: sled::Tree,
    allowances: sled::Tree,
    meta: sled::Tree,
    #[cfg(test)]
    fail_commits: std::sync::atomic::AtomicBool,
}

impl StateDb {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EpochxError> {
        let db = sled::open(path).map_err(storage_err)?;
        let epochs = db.open_tree("epochs").map_err(storage_err)?;
        let world = db.open_tree("world").map_err(storage_err)?;
        let allowances = db.open_tree("allowances").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            db,
            epochs,
            world,
            allowances,
            meta,
            #[cfg(test)]
            fail_commits: std::sync::atomic::AtomicBool::new(false),
        })
    }

    // ── Whole-ledger load ─────────────────────────────────────────────────────

    /// Rebuild the ledger. `None` when no window has ever been stored.
    pub fn load_ledger(&self) -> Result<Option<Ledger>, EpochxError> {
        let Some(window) = self.get_window()? else {
            return Ok(None);
        };

        let mut parts = LedgerParts { window, ..LedgerParts::default() };
        for item in self.epochs.iter() {
            let (key, value) = item.map_err(storage_err)?;
            parts.epochs.push((split_epoch_key(&key)?, decode::<EpochBalance>(&value)?));
        }
        let mut world = BTreeMap::new();
        for item in self.world.iter() {
            let (key, value) = item.map_err(storage_err)?;
            let raw = <[u8; 8]>::try_from(&key[..]).map_err(|_| {
                EpochxError::Serialization(format!("bad position key length {}", key.len()))
            })?;
            world.insert(Position::from_be_bytes(raw), decode::<Balance>(&value)?);
        }
        parts.world_state = world;
        for item in self.allowances.iter() {
            let (key, value) = item.map_err(storage_err)?;
            parts.allowances.push((split_pair_key(&key)?, decode::<Balance>(&value)?));
        }
        parts.total_minted = self.get_meta_value(META_TOTAL_MINTED)?.unwrap_or(0);
        parts.total_burned = self.get_meta_value(META_TOTAL_BURNED)?.unwrap_or(0);

        Ok(Some(Ledger::from_parts(parts)))
    }

    // ── Write-through ─────────────────────────────────────────────────────────

    /// Persist every key named in `changes` from the current ledger state,
    /// together with the pointer that produced them. All four trees are
    /// written in one sled transaction: either everything lands or nothing.
    pub fn commit(
        &self,
        ledger: &Ledger,
        changes: &ChangeSet,
        pointer: Option<Position>,
    ) -> Result<(), EpochxError> {
        #[cfg(test)]
        if self.fail_commits.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EpochxError::Storage("commit refused by test hook".into()));
        }

        let mut epochs = sled::Batch::default();
        for (epoch, account) in &changes.epochs {
            let key = epoch_key(*epoch, account);
            match ledger.epoch_balance(*epoch, account) {
                Some(eb) => epochs.insert(&key[..], encode(eb)?),
                None => epochs.remove(&key[..]),
            }
        }

        let mut world = sled::Batch::default();
        for position in &changes.positions {
            let key = position.to_be_bytes();
            match ledger.world_state().get(position) {
                Some(amount) => world.insert(&key[..], encode(amount)?),
                None => world.remove(&key[..]),
            }
        }

        let mut allowances = sled::Batch::default();
        for (owner, spender) in &changes.allowances {
            let key = pair_key(owner, spender);
            allowances.insert(&key[..], encode(&ledger.allowance(owner, spender))?);
        }

        let mut meta = sled::Batch::default();
        if changes.supply {
            meta.insert(META_TOTAL_MINTED.as_bytes(), encode(&ledger.total_minted())?);
            meta.insert(META_TOTAL_BURNED.as_bytes(), encode(&ledger.total_burned())?);
        }
        if let Some(p) = pointer {
            meta.insert(META_LAST_POINTER.as_bytes(), encode(&p)?);
        }

        (&self.epochs, &self.world, &self.allowances, &self.meta)
            .transaction(|(e, w, a, m)| {
                e.apply_batch(&epochs)?;
                w.apply_batch(&world)?;
                a.apply_batch(&allowances)?;
                m.apply_batch(&meta)?;
                Ok::<(), ConflictableTransactionError<EpochxError>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => storage_err(e),
            })
    }

    /// Make every later `commit` fail before touching disk.
    #[cfg(test)]
    pub(crate) fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Store a new window and drop all balance state (reconfiguration).
    pub fn reset(&self, window: &SlidingWindow) -> Result<(), EpochxError> {
        self.epochs.clear().map_err(storage_err)?;
        self.world.clear().map_err(storage_err)?;
        self.put_meta_value(META_TOTAL_MINTED, &0u128)?;
        self.put_meta_value(META_TOTAL_BURNED, &0u128)?;
        self.put_window(window)
    }

    // ── Meta ──────────────────────────────────────────────────────────────────

    pub fn get_window(&self) -> Result<Option<SlidingWindow>, EpochxError> {
        self.get_meta_value(META_WINDOW)
    }

    pub fn put_window(&self, window: &SlidingWindow) -> Result<(), EpochxError> {
        self.put_meta_value(META_WINDOW, window)
    }

    pub fn get_last_pointer(&self) -> Result<Option<Position>, EpochxError> {
        self.get_meta_value(META_LAST_POINTER)
    }

    pub fn put_last_pointer(&self, pointer: Position) -> Result<(), EpochxError> {
        self.put_meta_value(META_LAST_POINTER, &pointer)
    }

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), EpochxError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, EpochxError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }

    fn put_meta_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), EpochxError> {
        self.put_meta(key, &encode(value)?)
    }

    fn get_meta_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EpochxError> {
        self.get_meta(key)?.map(|bytes| decode(&bytes)).transpose()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), EpochxError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}
