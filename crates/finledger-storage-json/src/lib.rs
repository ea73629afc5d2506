use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use finledger_core::{storage::PartitionBackend, CoreError, CoreResult};
use finledger_domain::{UserId, UserLedger, CURRENT_SCHEMA_VERSION};
use tracing::{debug, warn};

const DOCUMENT_EXTENSION: &str = "json";
const TMP_SUFFIX: &str = "tmp";

/// Filesystem-backed JSON persistence: one document per user partition.
///
/// Writes go through a temp file followed by a rename, so a partition on disk
/// is always either the previous or the next complete document.
#[derive(Debug)]
pub struct JsonLedgerStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl JsonLedgerStorage {
    pub fn new(root: PathBuf) -> CoreResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, user: &UserId) -> PathBuf {
        self.root
            .join(format!("{}.{}", canonical_name(user.as_str()), DOCUMENT_EXTENSION))
    }

    fn guard(&self) -> CoreResult<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| CoreError::Storage("json storage lock poisoned".into()))
    }

    fn load(&self, user: &UserId) -> CoreResult<UserLedger> {
        let path = self.partition_path(user);
        if !path.exists() {
            return Ok(UserLedger::new(user.clone()));
        }
        let ledger = load_partition_from_path(&path)?;
        if &ledger.user_id != user {
            return Err(CoreError::Storage(format!(
                "partition `{}` belongs to another user",
                path.display()
            )));
        }
        Ok(ledger)
    }

    fn save(&self, ledger: &UserLedger) -> CoreResult<()> {
        let path = self.partition_path(&ledger.user_id);
        save_partition_to_path(ledger, &path)?;
        debug!(
            user = %ledger.user_id,
            path = %path.display(),
            transactions = ledger.transactions.len(),
            "partition saved"
        );
        Ok(())
    }
}

impl PartitionBackend for JsonLedgerStorage {
    fn user_ids(&self) -> CoreResult<Vec<UserId>> {
        let _guard = self.guard()?;
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut users = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            // A damaged document must not hide every other user from the sweep.
            match load_partition_from_path(&path) {
                Ok(ledger) => users.push(ledger.user_id),
                Err(err) => warn!(
                    path = %path.display(),
                    error = %err,
                    "skipping unreadable partition"
                ),
            }
        }
        users.sort();
        Ok(users)
    }

    fn read_partition<R>(
        &self,
        user: &UserId,
        f: impl FnOnce(&UserLedger) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let _guard = self.guard()?;
        let ledger = self.load(user)?;
        f(&ledger)
    }

    fn write_partition<R>(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut UserLedger) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let _guard = self.guard()?;
        let mut ledger = self.load(user)?;
        let result = f(&mut ledger)?;
        self.save(&ledger)?;
        Ok(result)
    }
}

/// Saves a partition document to an arbitrary path on disk.
pub fn save_partition_to_path(ledger: &UserLedger, path: &Path) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    write_atomic(&tmp, &serialize_partition(ledger)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Loads a partition document, rejecting schema versions newer than this build understands.
pub fn load_partition_from_path(path: &Path) -> CoreResult<UserLedger> {
    let data = fs::read_to_string(path)?;
    let ledger: UserLedger = serde_json::from_str(&data).map_err(serde_error)?;
    if ledger.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(CoreError::Storage(format!(
            "partition `{}` uses schema v{} (supported up to v{})",
            path.display(),
            ledger.schema_version,
            CURRENT_SCHEMA_VERSION
        )));
    }
    Ok(ledger)
}

/// File stem for a user id: lowercase letters, digits and `-` are kept, every
/// other byte becomes `_xx`, so distinct ids never share a file.
fn canonical_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => encoded.push(byte as char),
            other => encoded.push_str(&format!("_{other:02x}")),
        }
    }
    if encoded.is_empty() {
        "_".into()
    } else {
        encoded
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

fn write_atomic(path: &Path, data: &str) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn serialize_partition(ledger: &UserLedger) -> CoreResult<String> {
    serde_json::to_string_pretty(ledger).map_err(serde_error)
}

fn serde_error(err: serde_json::Error) -> CoreError {
    CoreError::Storage(format!("serialization error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_are_distinct_for_similar_ids() {
        assert_eq!(canonical_name("user-1"), "user-1");
        assert_ne!(canonical_name("a.b"), canonical_name("a_b"));
        assert_ne!(canonical_name("Bob"), canonical_name("bob"));
        assert_eq!(canonical_name(""), "_");
    }

    #[test]
    fn tmp_path_appends_suffix() {
        let tmp = tmp_path(Path::new("/data/user.json"));
        assert_eq!(tmp, PathBuf::from("/data/user.json.tmp"));
    }
}
