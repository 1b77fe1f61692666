use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use std::path::Path;

use certel_block::{decode_block, encode_block, Block};
use certel_core::CertelError;

/// Persistent key-value layer backed by sled (pure-Rust, no C dependencies).
///
/// One flat keyspace:
///   block:height:<u64>        binary block wire form
///   block:hash:<hex>          same bytes, addressed by hash
///   chain:tip                 u64 BE latest height
///   cert:pk:<pem>             bincode(CertRecord)
///   cert:id:<name>:<surname>  bincode(CertRecord)
///   cert:inq:<inquiry>        bincode(CertRecord)
pub struct Store {
    db: sled::Db,
}

/// Projection of one accepted attestation into the query indexes. Rebuildable
/// from the chain alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRecord {
    pub public_key: String,
    pub name: String,
    pub surname: String,
    pub inquiry_id: String,
    pub datetime: DateTime<Utc>,
    pub block_hash: String,
    pub height: u64,
}

const KEY_CHAIN_TIP: &str = "chain:tip";
const CERT_PREFIX: &str = "cert:";

fn key_block_height(height: u64) -> String {
    format!("block:height:{height}")
}

fn key_block_hash(hash: &str) -> String {
    format!("block:hash:{hash}")
}

fn key_cert_pk(public_key: &str) -> String {
    format!("cert:pk:{public_key}")
}

fn key_cert_identity(name: &str, surname: &str) -> String {
    format!("cert:id:{name}:{surname}")
}

fn key_cert_inquiry(inquiry_id: &str) -> String {
    format!("cert:inq:{inquiry_id}")
}

fn storage_err(e: impl std::fmt::Display) -> CertelError {
    CertelError::Storage(e.to_string())
}

fn txn_err(e: TransactionError<()>) -> CertelError {
    match e {
        TransactionError::Abort(()) => CertelError::Storage("transaction aborted".into()),
        TransactionError::Storage(e) => CertelError::Storage(e.to_string()),
    }
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CertelError> {
        let db = sled::open(path).map_err(storage_err)?;
        Ok(Self { db })
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    /// Persist a block under both its height and hash keys and advance
    /// `chain:tip`, atomically.
    pub fn save_block(&self, block: &Block) -> Result<(), CertelError> {
        let bytes = encode_block(block)?;
        let height_key = key_block_height(block.header.height);
        let hash_key = key_block_hash(&block.hash()?);
        let tip = block.header.height.to_be_bytes();

        self.db
            .transaction(|tx| {
                tx.insert(height_key.as_bytes(), bytes.as_slice())?;
                tx.insert(hash_key.as_bytes(), bytes.as_slice())?;
                tx.insert(KEY_CHAIN_TIP.as_bytes(), tip.as_slice())?;
                Ok(())
            })
            .map_err(txn_err)?;
        Ok(())
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, CertelError> {
        self.get_block(&key_block_height(height))
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>, CertelError> {
        self.get_block(&key_block_hash(hash))
    }

    fn get_block(&self, key: &str) -> Result<Option<Block>, CertelError> {
        match self.db.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Height of the latest persisted block; `None` on a fresh database.
    pub fn tip_height(&self) -> Result<Option<u64>, CertelError> {
        match self.db.get(KEY_CHAIN_TIP.as_bytes()).map_err(storage_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| CertelError::Storage("corrupt chain:tip".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    // ── Certification indexes ────────────────────────────────────────────────

    /// Write all three index entries for one accepted attestation, atomically.
    pub fn save_cert(&self, rec: &CertRecord) -> Result<(), CertelError> {
        let bytes = bincode::serialize(rec)
            .map_err(|e| CertelError::Serialization(e.to_string()))?;
        let pk_key = key_cert_pk(&rec.public_key);
        let id_key = key_cert_identity(&rec.name, &rec.surname);
        let inq_key = key_cert_inquiry(&rec.inquiry_id);

        self.db
            .transaction(|tx| {
                tx.insert(pk_key.as_bytes(), bytes.as_slice())?;
                tx.insert(id_key.as_bytes(), bytes.as_slice())?;
                tx.insert(inq_key.as_bytes(), bytes.as_slice())?;
                Ok(())
            })
            .map_err(txn_err)?;
        Ok(())
    }

    pub fn get_cert_by_pk(&self, public_key: &str) -> Result<Option<CertRecord>, CertelError> {
        self.get_cert(&key_cert_pk(public_key))
    }

    pub fn get_cert_by_identity(
        &self,
        name: &str,
        surname: &str,
    ) -> Result<Option<CertRecord>, CertelError> {
        self.get_cert(&key_cert_identity(name, surname))
    }

    pub fn get_cert_by_inquiry(&self, inquiry_id: &str) -> Result<Option<CertRecord>, CertelError> {
        self.get_cert(&key_cert_inquiry(inquiry_id))
    }

    fn get_cert(&self, key: &str) -> Result<Option<CertRecord>, CertelError> {
        match self.db.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => {
                let rec = bincode::deserialize(&bytes)
                    .map_err(|e| CertelError::Serialization(e.to_string()))?;
                Ok(Some(rec))
            }
            None => Ok(None),
        }
    }

    /// Delete index rows whose embedded datetime is older than `older_than`.
    /// Cache hygiene only: the chain itself is never rewritten. Returns the
    /// number of rows removed.
    pub fn expire_certs(&self, older_than: DateTime<Utc>) -> Result<u64, CertelError> {
        let mut removed = 0u64;
        for item in self.db.scan_prefix(CERT_PREFIX.as_bytes()) {
            let (key, value) = item.map_err(storage_err)?;
            let rec: CertRecord = match bincode::deserialize(&value) {
                Ok(rec) => rec,
                Err(_) => continue,
            };
            if rec.datetime < older_than {
                self.db.remove(key).map_err(storage_err)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), CertelError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certel_core::Attestation;
    use chrono::Duration;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn tx(inquiry: &str) -> Attestation {
        Attestation::build(
            "-----BEGIN PUBLIC KEY-----\nAA==\n-----END PUBLIC KEY-----",
            "Alice",
            "Doe",
            inquiry,
            Utc::now(),
            "c2ln",
        )
    }

    fn record(inquiry: &str, datetime: DateTime<Utc>) -> CertRecord {
        CertRecord {
            public_key: "PEMKEY".into(),
            name: "Alice".into(),
            surname: "Doe".into(),
            inquiry_id: inquiry.into(),
            datetime: certel_core::truncate_to_seconds(datetime),
            block_hash: "ab".repeat(32),
            height: 1,
        }
    }

    #[test]
    fn block_save_and_load_by_both_keys() {
        let (_dir, store) = store();
        let block = Block::new(vec![tx("inq-1")], "0", 0).unwrap();
        store.save_block(&block).unwrap();

        assert_eq!(store.tip_height().unwrap(), Some(0));
        assert_eq!(store.get_block_by_height(0).unwrap().unwrap(), block);
        let hash = block.hash().unwrap();
        assert_eq!(store.get_block_by_hash(&hash).unwrap().unwrap(), block);
        assert!(store.get_block_by_height(1).unwrap().is_none());
    }

    #[test]
    fn tip_advances_with_saves() {
        let (_dir, store) = store();
        assert_eq!(store.tip_height().unwrap(), None);
        let b0 = Block::new(vec![tx("inq-0")], "0", 0).unwrap();
        store.save_block(&b0).unwrap();
        let b1 = Block::new(vec![tx("inq-1")], b0.hash().unwrap(), 1).unwrap();
        store.save_block(&b1).unwrap();
        assert_eq!(store.tip_height().unwrap(), Some(1));
    }

    #[test]
    fn cert_lookup_by_all_three_indexes() {
        let (_dir, store) = store();
        let rec = record("inq-1", Utc::now());
        store.save_cert(&rec).unwrap();

        assert_eq!(store.get_cert_by_pk("PEMKEY").unwrap().unwrap(), rec);
        assert_eq!(
            store.get_cert_by_identity("Alice", "Doe").unwrap().unwrap(),
            rec
        );
        assert_eq!(store.get_cert_by_inquiry("inq-1").unwrap().unwrap(), rec);
        assert!(store.get_cert_by_inquiry("inq-2").unwrap().is_none());
    }

    #[test]
    fn newer_cert_overwrites_indexes() {
        let (_dir, store) = store();
        let mut old = record("inq-1", Utc::now());
        old.height = 1;
        store.save_cert(&old).unwrap();
        let mut newer = record("inq-1", Utc::now());
        newer.height = 5;
        store.save_cert(&newer).unwrap();

        assert_eq!(store.get_cert_by_pk("PEMKEY").unwrap().unwrap().height, 5);
    }

    #[test]
    fn expire_removes_only_old_rows() {
        let (_dir, store) = store();
        let old = record("inq-old", Utc::now() - Duration::days(400));
        store.save_cert(&old).unwrap();
        let fresh = record("inq-new", Utc::now());
        let mut fresh = fresh;
        fresh.public_key = "OTHERKEY".into();
        fresh.name = "Bob".into();
        store.save_cert(&fresh).unwrap();

        let removed = store
            .expire_certs(Utc::now() - Duration::days(365))
            .unwrap();
        assert_eq!(removed, 3); // all three index rows of the old record

        assert!(store.get_cert_by_inquiry("inq-old").unwrap().is_none());
        assert!(store.get_cert_by_inquiry("inq-new").unwrap().is_some());
    }

    #[test]
    fn expire_never_touches_blocks() {
        let (_dir, store) = store();
        let block = Block::new(vec![tx("inq-1")], "0", 0).unwrap();
        store.save_block(&block).unwrap();
        store
            .expire_certs(Utc::now() + Duration::days(1))
            .unwrap();
        assert!(store.get_block_by_height(0).unwrap().is_some());
    }
}
