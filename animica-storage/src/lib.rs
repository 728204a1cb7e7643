//! Persisted chain storage: one keyspace with record prefixes
//! (`state/`, `block/`, `receipt/`, `head`, `mempool/ban/`), bincode-encoded
//! records, and an atomic single-record head pointer.
//!
//! Two backends share the layout: RocksDB for nodes and an in-memory map
//! for tests and ephemeral devnets.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use animica_core::{Account, Address, Block, BlockHash, Receipt};

mod keys {
    use animica_core::Address;

    pub const HEAD: &[u8] = b"head";
    pub const AUTO_MINE: &[u8] = b"meta/automine";

    pub fn block(height: u64) -> Vec<u8> {
        let mut k = b"block/".to_vec();
        k.extend_from_slice(&height.to_be_bytes());
        k
    }

    pub fn receipts(height: u64) -> Vec<u8> {
        let mut k = b"receipt/".to_vec();
        k.extend_from_slice(&height.to_be_bytes());
        k
    }

    pub fn account(addr: &Address) -> Vec<u8> {
        let mut k = b"state/".to_vec();
        k.extend_from_slice(addr);
        k
    }

    pub fn ban(addr: &Address) -> Vec<u8> {
        let mut k = b"mempool/ban/".to_vec();
        k.extend_from_slice(addr);
        k
    }

    pub const STATE_PREFIX: &[u8] = b"state/";
    pub const BAN_PREFIX: &[u8] = b"mempool/ban/";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rocksdb: {0}")]
    Backend(String),
    #[error("corrupt record under {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadInfo {
    pub height: u64,
    pub hash: BlockHash,
    /// Cumulative acceptance weight of the canonical chain.
    pub total_s_micro: u128,
}

/// Byte-level backend seam shared by both stores.
trait Kv: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

struct RocksKv {
    db: rocksdb::DB,
}

impl Kv for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.put(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.delete(key)?)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        let iter = self.db.iterator(rocksdb::IteratorMode::From(prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

#[derive(Default)]
struct MemKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Kv for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .map
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Chain persistence surface consumed by the node.
pub trait ChainStore: Send + Sync {
    fn put_block(&self, block: &Block) -> Result<(), StoreError>;
    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError>;
    fn delete_block(&self, height: u64) -> Result<(), StoreError>;
    fn put_receipts(&self, height: u64, receipts: &[Receipt]) -> Result<(), StoreError>;
    fn receipts_by_height(&self, height: u64) -> Result<Option<Vec<Receipt>>, StoreError>;
    fn delete_receipts(&self, height: u64) -> Result<(), StoreError>;
    fn put_account(&self, addr: &Address, account: &Account) -> Result<(), StoreError>;
    fn account(&self, addr: &Address) -> Result<Option<Account>, StoreError>;
    fn delete_account(&self, addr: &Address) -> Result<(), StoreError>;
    fn accounts(&self) -> Result<Vec<(Address, Account)>, StoreError>;
    fn head(&self) -> Result<Option<HeadInfo>, StoreError>;
    fn set_head(&self, head: &HeadInfo) -> Result<(), StoreError>;
    fn put_ban(&self, addr: &Address, until_s: u64) -> Result<(), StoreError>;
    fn clear_ban(&self, addr: &Address) -> Result<(), StoreError>;
    fn bans(&self) -> Result<Vec<(Address, u64)>, StoreError>;
    fn set_auto_mine(&self, on: bool) -> Result<(), StoreError>;
    fn auto_mine(&self) -> Result<bool, StoreError>;
}

/// The record codec over any `Kv` backend.
struct Store<B: Kv> {
    kv: B,
}

fn encode<T: Serialize>(key: &[u8], value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        detail: e.to_string(),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        detail: e.to_string(),
    })
}

fn suffix_address(key: &[u8], prefix: &[u8]) -> Result<Address, StoreError> {
    key[prefix.len()..].try_into().map_err(|_| StoreError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        detail: "address suffix has wrong length".into(),
    })
}

impl<B: Kv> Store<B> {
    fn get_record<T: for<'de> Deserialize<'de>>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), StoreError> {
        self.kv.put(key, &encode(key, value)?)
    }
}

impl<B: Kv> ChainStore for Store<B> {
    fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        self.put_record(&keys::block(block.header.height), block)
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        self.get_record(&keys::block(height))
    }

    fn delete_block(&self, height: u64) -> Result<(), StoreError> {
        self.kv.delete(&keys::block(height))
    }

    fn put_receipts(&self, height: u64, receipts: &[Receipt]) -> Result<(), StoreError> {
        self.put_record(&keys::receipts(height), &receipts.to_vec())
    }

    fn receipts_by_height(&self, height: u64) -> Result<Option<Vec<Receipt>>, StoreError> {
        self.get_record(&keys::receipts(height))
    }

    fn delete_receipts(&self, height: u64) -> Result<(), StoreError> {
        self.kv.delete(&keys::receipts(height))
    }

    fn put_account(&self, addr: &Address, account: &Account) -> Result<(), StoreError> {
        self.put_record(&keys::account(addr), account)
    }

    fn delete_account(&self, addr: &Address) -> Result<(), StoreError> {
        self.kv.delete(&keys::account(addr))
    }

    fn account(&self, addr: &Address) -> Result<Option<Account>, StoreError> {
        self.get_record(&keys::account(addr))
    }

    fn accounts(&self) -> Result<Vec<(Address, Account)>, StoreError> {
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(keys::STATE_PREFIX)? {
            let addr = suffix_address(&key, keys::STATE_PREFIX)?;
            out.push((addr, decode(&key, &value)?));
        }
        Ok(out)
    }

    fn head(&self) -> Result<Option<HeadInfo>, StoreError> {
        self.get_record(keys::HEAD)
    }

    /// The head pointer is one record; the backend write is atomic.
    fn set_head(&self, head: &HeadInfo) -> Result<(), StoreError> {
        self.put_record(keys::HEAD, head)
    }

    fn put_ban(&self, addr: &Address, until_s: u64) -> Result<(), StoreError> {
        self.put_record(&keys::ban(addr), &until_s)
    }

    fn clear_ban(&self, addr: &Address) -> Result<(), StoreError> {
        self.kv.delete(&keys::ban(addr))
    }

    fn bans(&self) -> Result<Vec<(Address, u64)>, StoreError> {
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(keys::BAN_PREFIX)? {
            let addr = suffix_address(&key, keys::BAN_PREFIX)?;
            out.push((addr, decode(&key, &value)?));
        }
        Ok(out)
    }

    fn set_auto_mine(&self, on: bool) -> Result<(), StoreError> {
        self.put_record(keys::AUTO_MINE, &on)
    }

    fn auto_mine(&self) -> Result<bool, StoreError> {
        Ok(self.get_record(keys::AUTO_MINE)?.unwrap_or(false))
    }
}

/// Open (or create) a RocksDB-backed store at `path`.
pub fn open_rocks(path: &Path) -> Result<Box<dyn ChainStore>, StoreError> {
    let mut opts = rocksdb::Options::default();
    opts.create_if_missing(true);
    let db = rocksdb::DB::open(&opts, path)?;
    info!(path = %path.display(), "opened chain store");
    Ok(Box::new(Store { kv: RocksKv { db } }))
}

/// Ephemeral store for tests and in-process devnets.
pub fn open_memory() -> Box<dyn ChainStore> {
    Box::new(Store { kv: MemKv::default() })
}
