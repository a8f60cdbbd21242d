// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Directory-backed durable tier: one CBOR file per anchor.
//!
//! File names are `n-<hex id>.cbor` for entities and `e-<hex id>.cbor` for
//! relationships. A version/owner index is rebuilt from the files at open.
//! The `EPOCH` file holds the last epoch handed out by
//! [`DurableStore::next_epoch`].
//!
//! A batch first writes every new anchor to a `.tmp` sibling. It then swaps
//! the files in, moving each replaced or deleted file to a `.bak` sibling.
//! Any failure undoes the swaps in reverse, so a failed batch leaves no
//! anchor file and no index entry changed.
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{CommitBatch, DurableStore, StoreError};
use crate::anchor::Anchor;
use crate::ident::{ObjectId, RootId};

const EPOCH_FILE: &str = "EPOCH";
const EXTENSION: &str = "cbor";
const TMP_EXTENSION: &str = "tmp";
const BACKUP_EXTENSION: &str = "bak";

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    version: u64,
    owner: RootId,
}

#[derive(Debug, Default)]
struct State {
    index: BTreeMap<ObjectId, IndexEntry>,
    epoch: u64,
}

/// Renames performed by one batch, in order.
#[derive(Debug, Default)]
struct Journal {
    renames: Vec<(PathBuf, PathBuf)>,
}

impl Journal {
    fn rename(&mut self, from: &Path, to: &Path) -> Result<(), StoreError> {
        fs::rename(from, to)?;
        self.renames.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    /// Moves `path` aside when it holds a regular file.
    fn back_up(&mut self, path: &Path) -> Result<Option<PathBuf>, StoreError> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_file() => {
                let backup = path.with_extension(BACKUP_EXTENSION);
                self.rename(path, &backup)?;
                Ok(Some(backup))
            }
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn undo(self) {
        for (from, to) in self.renames.into_iter().rev() {
            if let Err(err) = fs::rename(&to, &from) {
                warn!(from = %to.display(), to = %from.display(), error = %err, "undo rename failed");
            }
        }
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "leftover file not removed"),
    }
}

/// Durable tier that survives process restarts.
#[derive(Debug)]
pub struct FsDurable {
    dir: PathBuf,
    state: Mutex<State>,
}

fn file_name(id: ObjectId) -> String {
    let tag = match id {
        ObjectId::Node(_) => 'n',
        ObjectId::Edge(_) => 'e',
    };
    format!("{tag}-{}.{EXTENSION}", hex::encode(id.digest()))
}

fn decode(bytes: &[u8]) -> Result<Anchor, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

fn encode(anchor: &Anchor) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(anchor, &mut buf).map_err(|e| StoreError::Codec(e.to_string()))?;
    Ok(buf)
}

impl FsDurable {
    /// Opens (creating if needed) a store rooted at `dir` and rebuilds the
    /// index from the anchor files found there.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut state = State::default();
        recover(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let anchor = decode(&fs::read(&path)?)?;
            state.index.insert(
                anchor.id,
                IndexEntry {
                    version: anchor.version,
                    owner: anchor.owner,
                },
            );
        }
        state.epoch = match fs::read_to_string(dir.join(EPOCH_FILE)) {
            Ok(text) => text
                .trim()
                .parse()
                .map_err(|_| StoreError::Codec(format!("bad epoch file: {text:?}")))?,
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };
        debug!(dir = %dir.display(), anchors = state.index.len(), epoch = state.epoch, "opened durable dir");
        Ok(Self {
            dir,
            state: Mutex::new(state),
        })
    }

    /// Directory holding the anchor files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: ObjectId) -> PathBuf {
        self.dir.join(file_name(id))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension(TMP_EXTENSION);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Writes every anchor of `batch` to its `.tmp` sibling. Returns
    /// `(tmp, target)` pairs; on failure no `.tmp` file is left behind.
    fn stage(&self, batch: &CommitBatch) -> Result<Vec<(PathBuf, PathBuf)>, StoreError> {
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(batch.writes.len());
        for anchor in &batch.writes {
            let target = self.path_for(anchor.id);
            let tmp = target.with_extension(TMP_EXTENSION);
            let written = encode(anchor).and_then(|bytes| Ok(fs::write(&tmp, bytes)?));
            if let Err(err) = written {
                remove_quietly(&tmp);
                for (tmp, _) in &staged {
                    remove_quietly(tmp);
                }
                return Err(err);
            }
            staged.push((tmp, target));
        }
        Ok(staged)
    }

    /// Moves staged files into place and deleted files aside. Returns the
    /// backups to remove once the batch has landed.
    fn swap_in(
        &self,
        staged: &[(PathBuf, PathBuf)],
        deletes: &[(ObjectId, u64)],
        journal: &mut Journal,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let mut backups = Vec::new();
        for (tmp, target) in staged {
            backups.extend(journal.back_up(target)?);
            journal.rename(tmp, target)?;
        }
        for (id, _) in deletes {
            match journal.back_up(&self.path_for(*id))? {
                Some(backup) => backups.push(backup),
                None => warn!(%id, "durable file already gone"),
            }
        }
        Ok(backups)
    }
}

/// Clears what an interrupted batch left behind: stray `.tmp` files are
/// dropped and a `.bak` whose anchor file is missing is restored.
// TODO: journal whole batches on disk so a crash mid-swap rolls back every
// anchor, not only the ones whose file went missing.
fn recover(dir: &Path) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some(TMP_EXTENSION) => remove_quietly(&path),
            Some(BACKUP_EXTENSION) => {
                let target = path.with_extension(EXTENSION);
                if target.exists() {
                    remove_quietly(&path);
                } else {
                    warn!(path = %target.display(), "restoring anchor from interrupted batch");
                    fs::rename(&path, &target)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

impl DurableStore for FsDurable {
    fn fetch(&self, id: ObjectId) -> Result<Option<Anchor>, StoreError> {
        match fs::read(self.path_for(id)) {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn apply(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        batch.check(|id| state.index.get(&id).map(|e| e.version))?;
        let staged = self.stage(batch)?;
        let mut journal = Journal::default();
        let backups = match self.swap_in(&staged, &batch.deletes, &mut journal) {
            Ok(backups) => backups,
            Err(err) => {
                journal.undo();
                for (tmp, _) in &staged {
                    remove_quietly(tmp);
                }
                return Err(err);
            }
        };
        for backup in &backups {
            remove_quietly(backup);
        }
        for anchor in &batch.writes {
            state.index.insert(
                anchor.id,
                IndexEntry {
                    version: anchor.version,
                    owner: anchor.owner,
                },
            );
        }
        for (id, _) in &batch.deletes {
            state.index.remove(id);
        }
        Ok(())
    }

    fn owned_by(&self, root: RootId) -> Result<Vec<ObjectId>, StoreError> {
        Ok(self
            .state
            .lock()
            .index
            .iter()
            .filter(|(_, e)| e.owner == root)
            .map(|(id, _)| *id)
            .collect())
    }

    fn next_epoch(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let next = state.epoch + 1;
        self.write_atomic(&self.dir.join(EPOCH_FILE), next.to_string().as_bytes())?;
        state.epoch = next;
        Ok(next)
    }
}
