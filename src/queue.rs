use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, trace, warn};

use crate::codec::{BincodeCodec, Codec};
use crate::compaction::Compactor;
use crate::config::{QueueConfig, RemovalPolicy};
use crate::error::QueueError;
use crate::recovery;
use crate::storage::{FileLock, FileSystem, OsFileSystem, WritableFile};
use crate::writer::Writer;

/// `<log>.lock`, the advisory ownership lock of a store.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// A FIFO queue persisted to an append-only log.
///
/// Every element added is appended to the log as a value record. Removing
/// the head appends a tombstone; once `defrag_interval` removals have piled
/// up, the log is rewritten from the in-memory contents instead. Reopening
/// the same path replays the log and yields the queue as it was.
///
/// All mutations write to the log first and only then touch the in-memory
/// mirror, so a failed call leaves the queue unchanged. Reads never touch
/// the disk.
pub struct PersistentQueue<T, C = BincodeCodec<T>> {
    path: PathBuf,
    config: QueueConfig,
    codec: C,
    fs: Arc<dyn FileSystem>,
    mirror: RwLock<VecDeque<T>>,
    // 写日志与压缩共享这一把锁，保证任意时刻只有一个持久化动作
    durability: Mutex<DurabilityState>,
    signal: Signal,
    _owner: Option<Box<dyn FileLock>>,
}

struct DurabilityState {
    removes_since_compaction: usize,
}

#[derive(Default)]
struct Signal {
    lock: Mutex<()>,
    cond: Condvar,
}

/// Which elements a removing call takes out of the mirror.
enum Removal {
    /// The first `n` elements.
    Prefix(usize),
    /// Arbitrary positions, one flag per element.
    Marked { marks: Vec<bool>, count: usize },
}

impl Removal {
    fn count(&self) -> usize {
        match self {
            Removal::Prefix(n) => *n,
            Removal::Marked { count, .. } => *count,
        }
    }

    fn from_marks(marks: Vec<bool>) -> Removal {
        let count = marks.iter().filter(|m| **m).count();
        // 被删除的元素恰好是队首的连续前缀时，按前缀处理
        if marks.iter().take(count).all(|m| *m) {
            Removal::Prefix(count)
        } else {
            Removal::Marked { marks, count }
        }
    }
}

enum DurableAction {
    Tombstones(usize),
    Compact,
}

impl<T> PersistentQueue<T, BincodeCodec<T>>
where
    T: Serialize + DeserializeOwned,
{
    /// Opens the queue stored at `path`, creating an empty log if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        Self::open_with_config(path, QueueConfig::default())
    }

    pub fn open_with_interval(
        path: impl AsRef<Path>,
        defrag_interval: usize,
    ) -> Result<Self, QueueError> {
        Self::open_with_config(
            path,
            QueueConfig::default().with_defrag_interval(defrag_interval),
        )
    }

    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        Self::open_with(path, config, BincodeCodec::new(), Arc::new(OsFileSystem))
    }
}

impl<T, C> PersistentQueue<T, C>
where
    C: Codec<T>,
{
    pub fn with_codec(
        path: impl AsRef<Path>,
        config: QueueConfig,
        codec: C,
    ) -> Result<Self, QueueError> {
        Self::open_with(path, config, codec, Arc::new(OsFileSystem))
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        config: QueueConfig,
        codec: C,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        config.validate().map_err(QueueError::Config)?;

        let owner = if config.lock {
            let lock_file = lock_path(&path);
            match fs.lock(&lock_file) {
                Ok(guard) => Some(guard),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(QueueError::Locked(lock_file));
                }
                Err(source) => {
                    return Err(QueueError::Construction {
                        path: lock_file,
                        source,
                    });
                }
            }
        } else {
            None
        };

        let (items, _stats) =
            recovery::recover(fs.as_ref(), &path, &codec, config.max_record_size)?;

        Ok(Self {
            path,
            config,
            codec,
            fs,
            mirror: RwLock::new(items),
            durability: Mutex::new(DurabilityState {
                removes_since_compaction: 0,
            }),
            signal: Signal::default(),
            _owner: owner,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn removals_since_compaction(&self) -> usize {
        self.durability.lock().removes_since_compaction
    }

    pub fn size(&self) -> usize {
        self.mirror.read().len()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.read().is_empty()
    }

    /// Appends `item` at the tail.
    pub fn add(&self, item: T) -> Result<(), QueueError> {
        let payload = self.codec.encode(&item)?;

        let guard = self.durability.lock();
        self.append(|writer| writer.write_value(&payload))?;
        self.mirror.write().push_back(item);
        drop(guard);

        self.signal.notify();
        Ok(())
    }

    /// Same as [`add`](Self::add). The queue is unbounded, so an offer is
    /// never refused; the `bool` mirrors the usual queue contract.
    pub fn offer(&self, item: T) -> Result<bool, QueueError> {
        self.add(item)?;
        Ok(true)
    }

    /// Appends every element in order, with a single log write.
    /// Returns `false` when `items` was empty.
    pub fn add_all<I>(&self, items: I) -> Result<bool, QueueError>
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        if items.is_empty() {
            return Ok(false);
        }
        let payloads = items
            .iter()
            .map(|item| self.codec.encode(item))
            .collect::<Result<Vec<_>, _>>()?;

        let guard = self.durability.lock();
        self.append(|writer| {
            for payload in &payloads {
                writer.write_value(payload)?;
            }
            Ok(())
        })?;
        self.mirror.write().extend(items);
        drop(guard);

        self.signal.notify();
        Ok(true)
    }

    /// Removes and returns the head, or `None` when empty.
    pub fn poll(&self) -> Result<Option<T>, QueueError> {
        Ok(self.remove_prefix(1)?.into_iter().next())
    }

    /// Removes and returns the head, failing with [`QueueError::Empty`].
    pub fn remove(&self) -> Result<T, QueueError> {
        self.poll()?.ok_or(QueueError::Empty)
    }

    /// Empties the queue and rewrites the log as an empty file.
    pub fn clear(&self) -> Result<(), QueueError> {
        let mut state = self.durability.lock();
        Compactor::compact(
            self.fs.as_ref(),
            &self.path,
            std::iter::empty::<&T>(),
            &self.codec,
            self.config.write_mode,
        )?;
        self.mirror.write().clear();
        state.removes_since_compaction = 0;
        Ok(())
    }

    /// Rewrites the log from the current contents, dropping consumed values
    /// and tombstones.
    pub fn compact(&self) -> Result<(), QueueError> {
        let mut state = self.durability.lock();
        {
            let mirror = self.mirror.read();
            Compactor::compact(
                self.fs.as_ref(),
                &self.path,
                mirror.iter(),
                &self.codec,
                self.config.write_mode,
            )?;
        }
        state.removes_since_compaction = 0;
        Ok(())
    }

    /// Removes up to `max` elements from the head, in order.
    pub(crate) fn remove_prefix(&self, max: usize) -> Result<Vec<T>, QueueError> {
        self.remove_planned(|mirror| Removal::Prefix(max.min(mirror.len())))
    }

    fn remove_planned<F>(&self, plan: F) -> Result<Vec<T>, QueueError>
    where
        F: FnOnce(&VecDeque<T>) -> Removal,
    {
        let mut state = self.durability.lock();

        // 只有持有 durability 锁的线程会修改 mirror，因此这里读到的内容
        // 在写日志期间不会变化
        let removal = {
            let mirror = self.mirror.read();
            plan(&mirror)
        };
        let count = removal.count();
        if count == 0 {
            return Ok(Vec::new());
        }

        let removes = state.removes_since_compaction + count;
        match self.durable_action(&removal, removes) {
            DurableAction::Compact => {
                let mirror = self.mirror.read();
                let kept = survivors(&mirror, &removal);
                Compactor::compact(
                    self.fs.as_ref(),
                    &self.path,
                    kept,
                    &self.codec,
                    self.config.write_mode,
                )?;
                state.removes_since_compaction = 0;
            }
            DurableAction::Tombstones(n) => {
                self.append(|writer| {
                    for _ in 0..n {
                        writer.write_tombstone()?;
                    }
                    Ok(())
                })?;
                trace!(
                    path = %self.path.display(),
                    removed = count,
                    tombstones = n,
                    "Recorded removal"
                );
                state.removes_since_compaction = removes;
            }
        }

        let mut mirror = self.mirror.write();
        Ok(apply(&mut mirror, removal))
    }

    fn durable_action(&self, removal: &Removal, removes: usize) -> DurableAction {
        if removes >= self.config.defrag_interval {
            debug!(
                path = %self.path.display(),
                removes,
                defrag_interval = self.config.defrag_interval,
                "Removal threshold reached, compacting"
            );
            return DurableAction::Compact;
        }
        match (self.config.removal_policy, removal) {
            (RemovalPolicy::SingleTombstone, _) => DurableAction::Tombstones(1),
            (RemovalPolicy::Exact, Removal::Prefix(n)) => DurableAction::Tombstones(*n),
            (RemovalPolicy::Exact, Removal::Marked { .. }) => DurableAction::Compact,
        }
    }

    /// Opens the log in append mode, runs `write`, flushes and closes.
    ///
    /// On failure the log is truncated back to its length before the call,
    /// so a half-written record never reaches replay.
    fn append<F>(&self, write: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Writer<Box<dyn WritableFile>>) -> Result<(), QueueError>,
    {
        let base = self.fs.len(&self.path).map_err(QueueError::Durability)?;
        let file = self.fs.open_append(&self.path).map_err(QueueError::Durability)?;
        let mut writer = Writer::new(file);

        let result = write(&mut writer).and_then(|()| writer.finish(self.config.write_mode));
        if let Err(e) = result {
            if let Err(truncate_err) = writer.discard(base) {
                warn!(
                    path = %self.path.display(),
                    len = base,
                    error = %truncate_err,
                    "Failed to truncate torn append"
                );
            }
            return Err(QueueError::durability(e));
        }
        Ok(())
    }

    /// Blocks until the mirror is non-empty or `deadline` passes.
    /// Returns `false` on timeout.
    pub(crate) fn wait_for_items(&self, deadline: Option<Instant>) -> bool {
        let mut guard = self.signal.lock.lock();
        if !self.mirror.read().is_empty() {
            return true;
        }
        match deadline {
            Some(deadline) => !self.signal.cond.wait_until(&mut guard, deadline).timed_out(),
            None => {
                self.signal.cond.wait(&mut guard);
                true
            }
        }
    }
}

impl<T, C> PersistentQueue<T, C>
where
    T: Clone,
    C: Codec<T>,
{
    /// Returns a copy of the head without removing it.
    pub fn peek(&self) -> Option<T> {
        self.mirror.read().front().cloned()
    }

    /// Like [`peek`](Self::peek), failing with [`QueueError::Empty`].
    pub fn element(&self) -> Result<T, QueueError> {
        self.peek().ok_or(QueueError::Empty)
    }

    /// Snapshot of the contents, head first.
    pub fn to_vec(&self) -> Vec<T> {
        self.mirror.read().iter().cloned().collect()
    }

    /// Iterates over a snapshot taken at call time; later mutations are
    /// not reflected.
    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.to_vec().into_iter()
    }
}

impl<T, C> PersistentQueue<T, C>
where
    T: PartialEq,
    C: Codec<T>,
{
    pub fn contains(&self, item: &T) -> bool {
        self.mirror.read().contains(item)
    }

    pub fn contains_all(&self, items: &[T]) -> bool {
        let mirror = self.mirror.read();
        items.iter().all(|item| mirror.contains(item))
    }

    /// Removes the first element equal to `item`.
    pub fn remove_item(&self, item: &T) -> Result<bool, QueueError> {
        let removed = self.remove_planned(|mirror| {
            let mut marks = vec![false; mirror.len()];
            if let Some(pos) = mirror.iter().position(|e| e == item) {
                marks[pos] = true;
            }
            Removal::from_marks(marks)
        })?;
        Ok(!removed.is_empty())
    }

    /// Removes every element that is also in `items`.
    pub fn remove_all(&self, items: &[T]) -> Result<bool, QueueError> {
        let removed = self.remove_planned(|mirror| {
            Removal::from_marks(mirror.iter().map(|e| items.contains(e)).collect())
        })?;
        Ok(!removed.is_empty())
    }

    /// Removes every element that is not in `items`.
    pub fn retain_all(&self, items: &[T]) -> Result<bool, QueueError> {
        let removed = self.remove_planned(|mirror| {
            Removal::from_marks(mirror.iter().map(|e| !items.contains(e)).collect())
        })?;
        Ok(!removed.is_empty())
    }
}

impl<T, C> fmt::Debug for PersistentQueue<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentQueue")
            .field("path", &self.path)
            .field("size", &self.mirror.read().len())
            .field("config", &self.config)
            .finish()
    }
}

impl Signal {
    fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

fn survivors<'a, T>(
    mirror: &'a VecDeque<T>,
    removal: &'a Removal,
) -> Box<dyn Iterator<Item = &'a T> + 'a> {
    match removal {
        Removal::Prefix(n) => Box::new(mirror.iter().skip(*n)),
        Removal::Marked { marks, .. } => Box::new(
            mirror
                .iter()
                .zip(marks.iter())
                .filter(|(_, removed)| !**removed)
                .map(|(item, _)| item),
        ),
    }
}

fn apply<T>(mirror: &mut VecDeque<T>, removal: Removal) -> Vec<T> {
    match removal {
        Removal::Prefix(n) => mirror.drain(..n).collect(),
        Removal::Marked { marks, count } => {
            let mut removed = Vec::with_capacity(count);
            let old = std::mem::take(mirror);
            for (item, is_removed) in old.into_iter().zip(marks) {
                if is_removed {
                    removed.push(item);
                } else {
                    mirror.push_back(item);
                }
            }
            removed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringCodec;
    use crate::record::{Record, TAG_TOMBSTONE};
    use crate::storage::MemFileSystem;

    fn open_mem(
        fs: &MemFileSystem,
        config: QueueConfig,
    ) -> PersistentQueue<String, StringCodec> {
        PersistentQueue::open_with("queue.log", config, StringCodec, Arc::new(fs.clone())).unwrap()
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_add_appends_value_record() {
        let fs = MemFileSystem::new();
        let queue = open_mem(&fs, QueueConfig::default());

        queue.add(s("a")).unwrap();
        assert!(queue.offer(s("b")).unwrap());

        let mut expected = Vec::new();
        Record::Value(b"a".to_vec()).encode_to(&mut expected).unwrap();
        Record::Value(b"b".to_vec()).encode_to(&mut expected).unwrap();
        assert_eq!(fs.contents(Path::new("queue.log")).unwrap(), expected);
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.peek(), Some(s("a")));
    }

    #[test]
    fn test_poll_appends_single_tombstone() {
        let fs = MemFileSystem::new();
        let queue = open_mem(&fs, QueueConfig::default());
        queue.add_all(vec![s("a"), s("b")]).unwrap();
        let before = fs.len(Path::new("queue.log")).unwrap();

        assert_eq!(queue.poll().unwrap(), Some(s("a")));
        let data = fs.contents(Path::new("queue.log")).unwrap();
        assert_eq!(data.len() as u64, before + 1);
        assert_eq!(*data.last().unwrap(), TAG_TOMBSTONE);
        assert_eq!(queue.removals_since_compaction(), 1);
    }

    #[test]
    fn test_noop_calls_touch_nothing() {
        let fs = MemFileSystem::new();
        let queue = open_mem(&fs, QueueConfig::default());

        assert_eq!(queue.poll().unwrap(), None);
        assert!(!queue.remove_item(&s("missing")).unwrap());
        assert!(!queue.add_all(Vec::new()).unwrap());
        assert_eq!(fs.len(Path::new("queue.log")).unwrap(), 0);
        assert!(matches!(queue.remove(), Err(QueueError::Empty)));
        assert!(matches!(queue.element(), Err(QueueError::Empty)));
    }

    #[test]
    fn test_failed_append_leaves_mirror_unchanged() {
        let fs = MemFileSystem::new();
        let queue = open_mem(&fs, QueueConfig::default());
        queue.add(s("kept")).unwrap();

        fs.fail_writes(true);
        assert!(matches!(queue.add(s("lost")), Err(QueueError::Durability(_))));
        assert!(matches!(queue.poll(), Err(QueueError::Durability(_))));
        assert_eq!(queue.to_vec(), vec![s("kept")]);
        assert_eq!(queue.removals_since_compaction(), 0);
    }

    #[test]
    fn test_torn_append_is_rolled_back() {
        let fs = MemFileSystem::new();
        {
            let queue = open_mem(&fs, QueueConfig::default());
            queue.add("a".repeat(10)).unwrap();
            let len = fs.len(Path::new("queue.log")).unwrap();

            fs.tear_writes(true);
            assert!(matches!(
                queue.add("b".repeat(10)),
                Err(QueueError::Durability(_))
            ));
            assert!(matches!(queue.poll(), Err(QueueError::Durability(_))));
            assert_eq!(fs.len(Path::new("queue.log")).unwrap(), len);
            fs.tear_writes(false);

            queue.add("c".repeat(10)).unwrap();
            assert_eq!(queue.to_vec(), vec!["a".repeat(10), "c".repeat(10)]);
        }

        let reopened = open_mem(&fs, QueueConfig::default());
        assert_eq!(reopened.to_vec(), vec!["a".repeat(10), "c".repeat(10)]);
    }

    #[test]
    fn test_rename_failure_leaves_mirror_unchanged() {
        let fs = MemFileSystem::new();
        let queue = open_mem(&fs, QueueConfig::default().with_defrag_interval(0));
        queue.add_all(vec![s("a"), s("b")]).unwrap();

        fs.fail_renames(true);
        assert!(matches!(
            queue.poll(),
            Err(QueueError::CompactionRename { .. })
        ));
        assert!(matches!(
            queue.clear(),
            Err(QueueError::CompactionRename { .. })
        ));
        assert_eq!(queue.to_vec(), vec![s("a"), s("b")]);
    }

    #[test]
    fn test_remove_item_and_retain_all() {
        let fs = MemFileSystem::new();
        let queue = open_mem(&fs, QueueConfig::default());
        queue
            .add_all(vec![s("a"), s("b"), s("c"), s("b")])
            .unwrap();

        assert!(queue.remove_item(&s("b")).unwrap());
        assert_eq!(queue.to_vec(), vec![s("a"), s("c"), s("b")]);

        assert!(queue.retain_all(&[s("c")]).unwrap());
        assert_eq!(queue.to_vec(), vec![s("c")]);
        assert!(!queue.retain_all(&[s("c")]).unwrap());
        assert!(queue.contains(&s("c")));
        assert!(!queue.contains_all(&[s("c"), s("a")]));
    }

    #[test]
    fn test_exact_policy_replays_batch_removals() {
        let fs = MemFileSystem::new();
        let config = QueueConfig::default().with_removal_policy(RemovalPolicy::Exact);
        {
            let queue = open_mem(&fs, config.clone());
            queue
                .add_all(vec![s("1"), s("2"), s("3"), s("4"), s("5")])
                .unwrap();
            // 非前缀删除：触发压缩
            assert!(queue.remove_all(&[s("2"), s("4")]).unwrap());
            assert_eq!(queue.removals_since_compaction(), 0);
            // 前缀删除：每个元素一个 tombstone
            assert!(queue.remove_all(&[s("1"), s("3")]).unwrap());
            assert_eq!(queue.removals_since_compaction(), 2);
        }

        let reopened = open_mem(&fs, config);
        assert_eq!(reopened.to_vec(), vec![s("5")]);
    }

    #[test]
    fn test_remove_head_item_is_a_prefix() {
        let marks = vec![true, false, false];
        assert!(matches!(Removal::from_marks(marks), Removal::Prefix(1)));
        let marks = vec![false, true];
        assert!(matches!(
            Removal::from_marks(marks),
            Removal::Marked { count: 1, .. }
        ));
    }

    #[test]
    fn test_second_owner_is_rejected() {
        let fs = MemFileSystem::new();
        let first = open_mem(&fs, QueueConfig::default());

        let second = PersistentQueue::<String, _>::open_with(
            "queue.log",
            QueueConfig::default(),
            StringCodec,
            Arc::new(fs.clone()),
        );
        assert!(matches!(second, Err(QueueError::Locked(_))));

        drop(first);
        let _third = open_mem(&fs, QueueConfig::default());
    }

    #[test]
    fn test_lock_can_be_disabled() {
        let fs = MemFileSystem::new();
        let config = QueueConfig::default().with_lock(false);
        let _first = open_mem(&fs, config.clone());
        let _second = open_mem(&fs, config);
        assert!(!fs.is_locked(&lock_path(Path::new("queue.log"))));

        let _owner = open_mem(&fs, QueueConfig::default());
        assert!(fs.is_locked(&lock_path(Path::new("queue.log"))));
    }
}
