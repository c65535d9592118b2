//! File-backed engine for databases that survive restarts.
//!
//! ```text
//! <location>/
//! ├─ LOCK          # Advisory lock for single-writer
//! ├─ DATA          # CBOR image of every entry
//! └─ DATA.tmp      # Written then renamed over DATA
//! ```

use crate::engine::{
    BatchOp, Capabilities, Engine, EngineCursor, EngineIteratorOptions, EngineOpenOptions,
    EngineRange, EngineReadOptions, EngineWriteOptions, SnapshotId,
};
use crate::error::{EngineError, EngineResult};
use crate::memory::{Map, MemoryEngine};
use async_trait::async_trait;
use bytes::Bytes;
use ciborium::value::Value as Cbor;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const DATA_FILE: &str = "DATA";
const DATA_TEMP: &str = "DATA.tmp";
const DATA_CORRUPT: &str = "DATA.corrupt";

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

/// A persistent engine.
///
/// Entries are served from an in-memory map and written back as a whole to
/// `DATA` after every mutation, via a temp file and an atomic rename. A
/// mutation becomes visible only once its image is on disk, so a failed write
/// leaves both the file and the map as they were. A `LOCK` file gives one
/// open handle exclusive access to a location.
///
/// File I/O runs on tokio's blocking pool.
#[derive(Debug, Default)]
pub struct FileEngine {
    memory: MemoryEngine,
    dir: Mutex<Option<OpenDir>>,
    /// Held from staging a mutation until it is installed.
    writes: tokio::sync::Mutex<()>,
}

#[derive(Debug)]
struct OpenDir {
    path: PathBuf,
    _lock_file: File,
}

impl FileEngine {
    /// Creates an engine that is not yet bound to a location.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the location this engine is open at, if any.
    #[must_use]
    pub fn location(&self) -> Option<PathBuf> {
        self.dir.lock().as_ref().map(|dir| dir.path.clone())
    }

    fn lock_dir(path: &Path) -> EngineResult<File> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(EngineError::Locked {
                location: path.to_path_buf(),
            });
        }
        Ok(lock_file)
    }

    /// Stages a mutation, writes the resulting image and installs it.
    async fn write_with<F>(&self, sync: bool, stage: F) -> EngineResult<()>
    where
        F: FnOnce(&MemoryEngine) -> EngineResult<Arc<Map>> + Send,
    {
        let _writer = self.writes.lock().await;
        let next = stage(&self.memory)?;
        self.commit(next, sync).await
    }

    /// Writes `next` to disk, then makes it the live map. Callers hold
    /// `writes`.
    async fn commit(&self, next: Arc<Map>, sync: bool) -> EngineResult<()> {
        let path = self.location().ok_or(EngineError::NotOpen)?;
        let compression = self.memory.compression();
        let image = Arc::clone(&next);
        blocking(move || {
            let bytes = encode_image(image.iter(), compression)?;
            write_atomic(&path, &bytes, sync)
        })
        .await?;
        self.memory.install(next);
        Ok(())
    }
}

/// Runs file work on the blocking pool.
async fn blocking<T, F>(work: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EngineError::custom(format!("file task failed: {e}")))?
}

fn encode_image<'a>(
    entries: impl IntoIterator<Item = (&'a Bytes, &'a Bytes)>,
    compression: bool,
) -> EngineResult<Vec<u8>> {
    let entries = entries
        .into_iter()
        .map(|(k, v)| Cbor::Array(vec![Cbor::Bytes(k.to_vec()), Cbor::Bytes(v.to_vec())]))
        .collect();
    let doc = Cbor::Map(vec![
        (Cbor::Text("version".into()), Cbor::Integer(FORMAT_VERSION.into())),
        (Cbor::Text("compression".into()), Cbor::Bool(compression)),
        (Cbor::Text("entries".into()), Cbor::Array(entries)),
    ]);

    let mut buf = Vec::new();
    ciborium::ser::into_writer(&doc, &mut buf)
        .map_err(|e| EngineError::custom(format!("failed to encode data file: {e}")))?;
    Ok(buf)
}

fn decode_image(bytes: &[u8]) -> EngineResult<Vec<(Bytes, Bytes)>> {
    let doc: Cbor = ciborium::de::from_reader(bytes)
        .map_err(|e| EngineError::corrupted(format!("unreadable data file: {e}")))?;
    let Cbor::Map(fields) = doc else {
        return Err(EngineError::corrupted("data file is not a map"));
    };

    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| matches!(k, Cbor::Text(t) if t == name))
            .map(|(_, v)| v)
    };

    match field("version") {
        Some(Cbor::Integer(v)) if u32::try_from(*v).ok() == Some(FORMAT_VERSION) => {}
        Some(other) => {
            return Err(EngineError::corrupted(format!(
                "unsupported data file version: {other:?}"
            )))
        }
        None => return Err(EngineError::corrupted("data file has no version")),
    }

    let Some(Cbor::Array(entries)) = field("entries") else {
        return Err(EngineError::corrupted("data file has no entries"));
    };

    entries
        .iter()
        .map(|entry| match entry {
            Cbor::Array(pair) => match pair.as_slice() {
                [Cbor::Bytes(k), Cbor::Bytes(v)] => {
                    Ok((Bytes::copy_from_slice(k), Bytes::copy_from_slice(v)))
                }
                _ => Err(EngineError::corrupted("malformed entry")),
            },
            _ => Err(EngineError::corrupted("malformed entry")),
        })
        .collect()
}

fn write_atomic(dir: &Path, image: &[u8], sync: bool) -> EngineResult<()> {
    let temp_path = dir.join(DATA_TEMP);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(image)?;
        if sync {
            file.sync_all()?;
        }
    }
    fs::rename(&temp_path, dir.join(DATA_FILE))?;
    Ok(())
}

fn read_image(dir: &Path) -> EngineResult<Option<Vec<(Bytes, Bytes)>>> {
    let path = dir.join(DATA_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    decode_image(&bytes).map(Some)
}

/// Checks the open flags against `location`, locks it and reads its entries.
fn load_dir(
    location: &Path,
    options: &EngineOpenOptions,
) -> EngineResult<(File, Vec<(Bytes, Bytes)>)> {
    if location.exists() {
        if options.error_if_exists {
            return Err(EngineError::AlreadyExists {
                location: location.to_path_buf(),
            });
        }
    } else if options.create_if_missing {
        fs::create_dir_all(location)?;
    } else {
        return Err(EngineError::DoesNotExist {
            location: location.to_path_buf(),
        });
    }

    let lock_file = FileEngine::lock_dir(location)?;
    let entries = read_image(location)?.unwrap_or_default();
    Ok((lock_file, entries))
}

fn destroy_dir(location: &Path) -> EngineResult<()> {
    if !location.exists() {
        return Ok(());
    }
    // Fails with Locked if another handle has it open
    drop(FileEngine::lock_dir(location)?);
    fs::remove_dir_all(location)?;
    Ok(())
}

fn repair_dir(location: &Path) -> EngineResult<()> {
    if !location.is_dir() {
        return Ok(());
    }

    let _lock_file = FileEngine::lock_dir(location)?;
    let stale = location.join(DATA_TEMP);
    if stale.exists() {
        fs::remove_file(stale)?;
    }

    match read_image(location) {
        Ok(Some(entries)) => {
            let image = encode_image(entries.iter().map(|(k, v)| (k, v)), true)?;
            write_atomic(location, &image, true)?;
            debug!(location = %location.display(), entries = entries.len(), "rewrote data file");
        }
        Ok(None) => {}
        Err(EngineError::Corrupted(reason)) => {
            warn!(location = %location.display(), %reason, "quarantining unreadable data file");
            fs::rename(location.join(DATA_FILE), location.join(DATA_CORRUPT))?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

#[async_trait]
impl Engine for FileEngine {
    async fn open(&self, location: &Path, options: &EngineOpenOptions) -> EngineResult<()> {
        if self.dir.lock().is_some() {
            return Err(EngineError::AlreadyOpen);
        }

        let (lock_file, entries) = {
            let location = location.to_path_buf();
            let options = options.clone();
            blocking(move || load_dir(&location, &options)).await?
        };
        debug!(location = %location.display(), entries = entries.len(), "loaded data file");

        self.memory.replace_entries(entries);
        self.memory
            .open(
                location,
                &EngineOpenOptions {
                    create_if_missing: true,
                    error_if_exists: false,
                    ..options.clone()
                },
            )
            .await?;

        *self.dir.lock() = Some(OpenDir {
            path: location.to_path_buf(),
            _lock_file: lock_file,
        });
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        let _writer = self.writes.lock().await;
        let current = self.memory.current()?;
        self.commit(current, true).await?;
        self.memory.close().await?;
        // Dropping the lock file releases the lock
        self.dir.lock().take();
        Ok(())
    }

    async fn get(&self, key: Bytes, options: &EngineReadOptions) -> EngineResult<Option<Bytes>> {
        self.memory.get(key, options).await
    }

    async fn get_many(
        &self,
        keys: Vec<Bytes>,
        options: &EngineReadOptions,
    ) -> EngineResult<Vec<Option<Bytes>>> {
        self.memory.get_many(keys, options).await
    }

    async fn put(&self, key: Bytes, value: Bytes, options: &EngineWriteOptions) -> EngineResult<()> {
        self.write_with(options.sync, move |memory| {
            memory.stage_batch(vec![BatchOp::Put { key, value }])
        })
        .await
    }

    async fn del(&self, key: Bytes, options: &EngineWriteOptions) -> EngineResult<()> {
        self.write_with(options.sync, move |memory| {
            memory.stage_batch(vec![BatchOp::Del { key }])
        })
        .await
    }

    async fn clear(&self, range: &EngineRange, snapshot: Option<SnapshotId>) -> EngineResult<()> {
        self.write_with(false, |memory| memory.stage_clear(range, snapshot))
            .await
    }

    async fn batch(&self, ops: Vec<BatchOp>, options: &EngineWriteOptions) -> EngineResult<()> {
        self.write_with(options.sync, move |memory| memory.stage_batch(ops))
            .await
    }

    fn iterator(&self, options: EngineIteratorOptions) -> EngineResult<Box<dyn EngineCursor>> {
        self.memory.iterator(options)
    }

    async fn approximate_size(&self, start: Bytes, end: Bytes) -> EngineResult<u64> {
        self.memory.approximate_size(start, end).await
    }

    async fn compact_range(&self, start: Bytes, end: Bytes) -> EngineResult<()> {
        self.memory.compact_range(start, end).await?;
        self.write_with(true, MemoryEngine::current).await
    }

    fn get_property(&self, name: &str) -> EngineResult<Option<String>> {
        self.memory.get_property(name)
    }

    fn snapshot_create(&self) -> EngineResult<SnapshotId> {
        self.memory.snapshot_create()
    }

    fn snapshot_close(&self, snapshot: SnapshotId) -> EngineResult<()> {
        self.memory.snapshot_close(snapshot)
    }

    async fn destroy(&self, location: &Path) -> EngineResult<()> {
        if self.location().as_deref() == Some(location) {
            return Err(EngineError::Locked {
                location: location.to_path_buf(),
            });
        }
        let location = location.to_path_buf();
        blocking(move || destroy_dir(&location)).await
    }

    async fn repair(&self, location: &Path) -> EngineResult<()> {
        if self.location().as_deref() == Some(location) {
            return Err(EngineError::Locked {
                location: location.to_path_buf(),
            });
        }
        let location = location.to_path_buf();
        blocking(move || repair_dir(&location)).await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            permanence: true,
            ..self.memory.capabilities()
        }
    }
}
