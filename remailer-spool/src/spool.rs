use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{
    error::{Result, SpoolError},
    name::{self, MessageMeta, EXTENSION},
    queue::{Queue, Snapshot},
};

#[derive(Debug, Default)]
struct Queues([VecDeque<String>; 5]);

/// The on-disk spool and its in-memory queue cache.
///
/// Directory entries are authoritative; the queues are hints rebuilt by
/// [`Spool::rescan`]. All queue mutation happens under one mutex, which is
/// never held across an await point.
#[derive(Debug)]
pub struct Spool {
    root: PathBuf,
    backup_enabled: bool,
    available: [bool; 5],
    queues: Mutex<Queues>,
}

impl Spool {
    /// Open a spool rooted at `root`, creating the five queue directories.
    ///
    /// A directory that cannot be created marks its queue unavailable but
    /// does not prevent the others from operating.
    pub fn open(root: impl Into<PathBuf>, backup_enabled: bool) -> Self {
        let root = root.into();
        let mut available = [false; 5];

        for queue in Queue::ALL {
            let dir = root.join(queue.dir_name());
            match std::fs::create_dir_all(&dir) {
                Ok(()) => available[queue.index()] = true,
                Err(err) => {
                    warn!(queue = queue.label(), dir = %dir.display(), %err, "queue unavailable");
                }
            }
        }

        Self {
            root,
            backup_enabled,
            available,
            queues: Mutex::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_enabled(&self) -> bool {
        self.backup_enabled
    }

    pub fn available(&self, queue: Queue) -> bool {
        self.available[queue.index()]
    }

    /// All five queues are usable.
    pub fn ready(&self) -> bool {
        Queue::ALL.iter().all(|queue| self.available(*queue))
    }

    pub fn dir(&self, queue: Queue) -> PathBuf {
        self.root.join(queue.dir_name())
    }

    pub fn path_of(&self, queue: Queue, filename: &str) -> PathBuf {
        self.dir(queue).join(filename)
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().expect("spool queue mutex poisoned")
    }

    /// Append a filename to a queue's in-memory tail.
    pub fn enqueue(&self, queue: Queue, filename: impl Into<String>) {
        self.lock().0[queue.index()].push_back(filename.into());
    }

    /// Remove and return the head of the parking queue.
    pub fn pop_parking(&self) -> Option<String> {
        self.lock().0[Queue::Parking.index()].pop_front()
    }

    /// Re-append a filename to the parking tail after a failed attempt.
    pub fn push_back_parking(&self, filename: impl Into<String>) {
        self.enqueue(Queue::Parking, filename);
    }

    pub fn len(&self, queue: Queue) -> usize {
        self.lock().0[queue.index()].len()
    }

    pub fn is_empty(&self, queue: Queue) -> bool {
        self.len(queue) == 0
    }

    /// Current in-memory listing of a queue.
    pub fn queued(&self, queue: Queue) -> Vec<String> {
        self.lock().0[queue.index()].iter().cloned().collect()
    }

    /// Write message bytes into `queue`, fsync, and return the filename.
    ///
    /// The filename is derived from `meta` (receipt time, session id,
    /// sanitized envelope). A partial file left by a failed write is
    /// unlinked before the error is returned. The caller decides whether to
    /// enqueue the returned name.
    pub async fn write(&self, queue: Queue, meta: &MessageMeta, data: &[u8]) -> Result<String> {
        if !self.available(queue) {
            return Err(SpoolError::Unavailable(queue.label()));
        }

        let filename = name::filename(meta);
        let path = self.path_of(queue, &filename);

        if let Err(err) = write_file(&path, data).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(SpoolError::persist(filename, err));
        }

        debug!(queue = queue.label(), %filename, bytes = data.len(), "spooled");
        Ok(filename)
    }

    /// Move a file from `origin` into the error queue.
    pub async fn move_to_error(&self, filename: &str, origin: Queue) -> Result<()> {
        self.relocate(filename, origin, Queue::Error).await
    }

    /// Move a file from `origin` into its corresponding backup queue.
    pub async fn move_to_backup(&self, filename: &str, origin: Queue) -> Result<()> {
        let Some(target) = origin.backup() else {
            return Err(SpoolError::Unavailable(origin.label()));
        };
        self.relocate(filename, origin, target).await
    }

    /// Unlink a delivered file (backup disabled).
    pub async fn remove(&self, filename: &str, queue: Queue) -> Result<()> {
        tokio::fs::remove_file(self.path_of(queue, filename))
            .await
            .map_err(|err| SpoolError::persist(filename, err))?;
        self.lock().0[queue.index()].retain(|name| name != filename);
        Ok(())
    }

    async fn relocate(&self, filename: &str, origin: Queue, target: Queue) -> Result<()> {
        if !self.available(target) {
            return Err(SpoolError::Unavailable(target.label()));
        }

        tokio::fs::rename(
            self.path_of(origin, filename),
            self.path_of(target, filename),
        )
        .await
        .map_err(|err| SpoolError::persist(filename, err))?;

        let mut queues = self.lock();
        queues.0[origin.index()].retain(|name| name != filename);
        queues.0[target.index()].push_back(filename.to_string());

        debug!(
            %filename,
            from = origin.label(),
            to = target.label(),
            "relocated"
        );
        Ok(())
    }

    /// Enumerate every queue directory and replace the in-memory queues with
    /// what is actually on disk.
    ///
    /// Only regular `*.eml` files count. Names are sorted lexicographically,
    /// which the filename format turns into receipt order.
    pub async fn rescan(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();

        for queue in Queue::ALL {
            if self.available(queue) {
                *queue_entries(&mut snapshot, queue) = list_dir(&self.dir(queue)).await?;
            }
        }

        let mut queues = self.lock();
        for queue in Queue::ALL {
            queues.0[queue.index()] = snapshot.queue(queue).iter().cloned().collect();
        }

        Ok(snapshot)
    }
}

fn queue_entries(snapshot: &mut Snapshot, queue: Queue) -> &mut Vec<String> {
    match queue {
        Queue::Parking => &mut snapshot.parking,
        Queue::Direct => &mut snapshot.direct,
        Queue::Error => &mut snapshot.error,
        Queue::ParkingBackup => &mut snapshot.parking_backup,
        Queue::DirectBackup => &mut snapshot.direct_backup,
    }
}

async fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };

        if Path::new(file_name)
            .extension()
            .is_some_and(|ext| ext == EXTENSION)
        {
            names.push(file_name.to_string());
        }
    }

    names.sort_unstable();
    Ok(names)
}

async fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}
