//! In-Memory Filesystem
//!
//! Tree-structured filesystem with directories and regular files. All
//! data lives in the heap; an optional byte capacity makes `NoSpace`
//! reachable. Devices (`con:`) are attached by name.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::console::{Console, ConsoleHandle};
use crate::path::{is_device, split_parent};
use crate::vfs::{FileSystem, Vnode};
use crate::{FileMetadata, FilePermissions, FileType, OpenFlags, StorageError};

// ────────────────────────── Types ──────────────────────────

/// Inode number
pub type Ino = u64;

const ROOT_INO: Ino = 1;

/// Largest size a file may grow to.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone)]
struct Inode {
    perms: FilePermissions,
    nlink: u32,
    content: InodeContent,
}

#[derive(Debug, Clone)]
enum InodeContent {
    Directory(BTreeMap<String, Ino>),
    File(Vec<u8>),
}

struct Tree {
    inodes: BTreeMap<Ino, Inode>,
    next_ino: Ino,
    /// Bytes of file data stored.
    used: u64,
    capacity: Option<u64>,
}

impl Tree {
    fn new(capacity: Option<u64>) -> Self {
        let mut inodes = BTreeMap::new();
        inodes.insert(
            ROOT_INO,
            Inode {
                perms: FilePermissions::DEFAULT_DIR,
                nlink: 2,
                content: InodeContent::Directory(BTreeMap::new()),
            },
        );
        Self {
            inodes,
            next_ino: ROOT_INO + 1,
            used: 0,
            capacity,
        }
    }

    fn alloc_ino(&mut self) -> Ino {
        let i = self.next_ino;
        self.next_ino += 1;
        i
    }

    // ── Navigation ────────────────────────────────────────────

    /// Resolve a normalised absolute path to its inode.
    fn resolve(&self, path: &str) -> Result<Ino, StorageError> {
        let mut ino = ROOT_INO;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let node = self.inodes.get(&ino).ok_or(StorageError::FileNotFound)?;
            match &node.content {
                InodeContent::Directory(entries) => {
                    ino = *entries.get(component).ok_or(StorageError::FileNotFound)?;
                }
                InodeContent::File(_) => return Err(StorageError::NotADirectory),
            }
        }
        Ok(ino)
    }

    /// Resolve the parent directory of `path`, returning it with the final name.
    fn resolve_parent<'a>(&self, path: &'a str) -> Result<(Ino, &'a str), StorageError> {
        let (parent, name) = split_parent(path);
        if name.is_empty() {
            return Err(StorageError::InvalidPath);
        }
        let parent_ino = self.resolve(parent)?;
        match self.inodes.get(&parent_ino).map(|n| &n.content) {
            Some(InodeContent::Directory(_)) => Ok((parent_ino, name)),
            Some(InodeContent::File(_)) => Err(StorageError::NotADirectory),
            None => Err(StorageError::FileNotFound),
        }
    }

    fn insert(&mut self, parent: Ino, name: &str, node: Inode) -> Ino {
        let ino = self.alloc_ino();
        let is_dir = matches!(node.content, InodeContent::Directory(_));
        self.inodes.insert(ino, node);
        if let Some(p) = self.inodes.get_mut(&parent) {
            if let InodeContent::Directory(ref mut entries) = p.content {
                entries.insert(String::from(name), ino);
            }
            if is_dir {
                p.nlink += 1;
            }
        }
        ino
    }

    fn metadata(&self, ino: Ino) -> Result<FileMetadata, StorageError> {
        let node = self.inodes.get(&ino).ok_or(StorageError::FileNotFound)?;
        let (file_type, size) = match &node.content {
            InodeContent::Directory(entries) => (FileType::Directory, entries.len() as u64),
            InodeContent::File(data) => (FileType::Regular, data.len() as u64),
        };
        Ok(FileMetadata {
            file_type,
            permissions: node.perms,
            size,
            nlink: node.nlink,
            inode: ino,
        })
    }

    fn truncate(&mut self, ino: Ino) {
        if let Some(Inode {
            content: InodeContent::File(data),
            ..
        }) = self.inodes.get_mut(&ino)
        {
            self.used -= data.len() as u64;
            data.clear();
        }
    }

    fn read(&self, ino: Ino, offset: u64, buffer: &mut [u8]) -> Result<usize, StorageError> {
        match self.inodes.get(&ino).map(|n| &n.content) {
            Some(InodeContent::File(data)) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(buffer.len()).min(data.len());
                buffer[..end - start].copy_from_slice(&data[start..end]);
                Ok(end - start)
            }
            Some(InodeContent::Directory(_)) => Err(StorageError::IsADirectory),
            None => Err(StorageError::IoError),
        }
    }

    fn write(&mut self, ino: Ino, offset: u64, input: &[u8]) -> Result<usize, StorageError> {
        let available = self.capacity.map(|cap| cap.saturating_sub(self.used));
        let data = match self.inodes.get_mut(&ino).map(|n| &mut n.content) {
            Some(InodeContent::File(data)) => data,
            Some(InodeContent::Directory(_)) => return Err(StorageError::IsADirectory),
            None => return Err(StorageError::IoError),
        };

        if input.is_empty() {
            return Ok(0);
        }
        match offset.checked_add(input.len() as u64) {
            Some(end) if end <= MAX_FILE_SIZE => {}
            _ => return Err(StorageError::FileTooLarge),
        }
        let offset = offset as usize;
        let old_len = data.len();
        let mut count = input.len();
        if let Some(available) = available {
            let growth = offset.saturating_add(count).saturating_sub(old_len) as u64;
            if growth > available {
                // Short write up to the capacity.
                let fits = (old_len as u64 + available).saturating_sub(offset as u64);
                count = fits.min(count as u64) as usize;
                if count == 0 && !input.is_empty() {
                    return Err(StorageError::NoSpace);
                }
            }
        }

        let end = offset + count;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(&input[..count]);
        let new_len = data.len();
        self.used += (new_len - old_len) as u64;
        Ok(count)
    }
}

// ────────────────────────── Filesystem ──────────────────────────

/// In-memory file system.
pub struct MemFs {
    tree: Arc<Mutex<Tree>>,
    devices: Mutex<BTreeMap<String, Arc<Console>>>,
    handles: Arc<AtomicUsize>,
}

impl MemFs {
    /// Create an empty file system with unlimited space.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty file system holding at most `bytes` of file data.
    pub fn with_capacity(bytes: u64) -> Self {
        Self::build(Some(bytes))
    }

    fn build(capacity: Option<u64>) -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new(capacity))),
            devices: Mutex::new(BTreeMap::new()),
            handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach a console under a device name such as `con:`.
    pub fn attach_console(&self, name: &str, console: Arc<Console>) {
        self.devices.lock().insert(String::from(name), console);
    }

    /// Create (or replace) a file at `path`, creating missing directories.
    pub fn create_file(&self, path: &str, data: &[u8], mode: u16) -> Result<(), StorageError> {
        let (parent, _) = split_parent(path);
        self.create_dir_all(parent)?;

        let mut tree = self.tree.lock();
        let (parent_ino, name) = tree.resolve_parent(path)?;
        let ino = match tree.resolve(path) {
            Ok(ino) => {
                tree.truncate(ino);
                ino
            }
            Err(StorageError::FileNotFound) => tree.insert(
                parent_ino,
                name,
                Inode {
                    perms: FilePermissions::from_mode(mode),
                    nlink: 1,
                    content: InodeContent::File(Vec::new()),
                },
            ),
            Err(e) => return Err(e),
        };
        let written = tree.write(ino, 0, data)?;
        if written < data.len() {
            return Err(StorageError::NoSpace);
        }
        Ok(())
    }

    /// Create `path` and all missing parents.
    pub fn create_dir_all(&self, path: &str) -> Result<(), StorageError> {
        let mut prefix = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            prefix.push('/');
            prefix.push_str(component);
            match self.mkdir(&prefix, 0o755) {
                Ok(()) | Err(StorageError::AlreadyExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Whole contents of a regular file.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let tree = self.tree.lock();
        let ino = tree.resolve(path)?;
        match tree.inodes.get(&ino).map(|n| &n.content) {
            Some(InodeContent::File(data)) => Ok(data.clone()),
            Some(InodeContent::Directory(_)) => Err(StorageError::IsADirectory),
            None => Err(StorageError::FileNotFound),
        }
    }

    /// Number of vnode handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    fn track(&self, vnode: impl Vnode + 'static) -> Box<dyn Vnode> {
        self.handles.fetch_add(1, Ordering::SeqCst);
        Box::new(Tracked {
            inner: vnode,
            handles: self.handles.clone(),
        })
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &str, flags: OpenFlags, mode: u16) -> Result<Box<dyn Vnode>, StorageError> {
        let access = flags.access_mode()?;

        if is_device(path) {
            let console = self
                .devices
                .lock()
                .get(path)
                .cloned()
                .ok_or(StorageError::FileNotFound)?;
            return Ok(self.track(ConsoleHandle::new(console)));
        }

        let mut tree = self.tree.lock();
        let ino = match tree.resolve(path) {
            Ok(ino) => {
                if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(StorageError::AlreadyExists);
                }
                let is_dir = matches!(
                    tree.inodes.get(&ino).map(|n| &n.content),
                    Some(InodeContent::Directory(_))
                );
                if is_dir && access.can_write() {
                    return Err(StorageError::IsADirectory);
                }
                if flags.contains(OpenFlags::TRUNC) && access.can_write() {
                    tree.truncate(ino);
                }
                ino
            }
            Err(StorageError::FileNotFound) if flags.contains(OpenFlags::CREAT) => {
                let (parent, name) = tree.resolve_parent(path)?;
                tree.insert(
                    parent,
                    name,
                    Inode {
                        perms: FilePermissions::from_mode(mode),
                        nlink: 1,
                        content: InodeContent::File(Vec::new()),
                    },
                )
            }
            Err(e) => return Err(e),
        };
        drop(tree);

        Ok(self.track(MemVnode {
            tree: self.tree.clone(),
            ino,
        }))
    }

    fn mkdir(&self, path: &str, mode: u16) -> Result<(), StorageError> {
        let mut tree = self.tree.lock();
        if path == "/" {
            return Err(StorageError::AlreadyExists);
        }
        let (parent, name) = tree.resolve_parent(path)?;
        if tree.resolve(path).is_ok() {
            return Err(StorageError::AlreadyExists);
        }
        tree.insert(
            parent,
            name,
            Inode {
                perms: FilePermissions::from_mode(mode),
                nlink: 2,
                content: InodeContent::Directory(BTreeMap::new()),
            },
        );
        Ok(())
    }

    fn lookup(&self, path: &str) -> Result<FileMetadata, StorageError> {
        if is_device(path) {
            return match self.devices.lock().get(path) {
                Some(_) => Ok(FileMetadata {
                    file_type: FileType::CharDevice,
                    ..FileMetadata::default()
                }),
                None => Err(StorageError::FileNotFound),
            };
        }
        let tree = self.tree.lock();
        let ino = tree.resolve(path)?;
        tree.metadata(ino)
    }
}

// ────────────────────────── Vnodes ──────────────────────────

struct MemVnode {
    tree: Arc<Mutex<Tree>>,
    ino: Ino,
}

impl Vnode for MemVnode {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, StorageError> {
        self.tree.lock().read(self.ino, offset, buffer)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, StorageError> {
        self.tree.lock().write(self.ino, offset, data)
    }

    fn stat(&self) -> Result<FileMetadata, StorageError> {
        self.tree.lock().metadata(self.ino)
    }
}

/// Counts live handles so tests can observe the last close.
struct Tracked<V> {
    inner: V,
    handles: Arc<AtomicUsize>,
}

impl<V: Vnode> Vnode for Tracked<V> {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<usize, StorageError> {
        self.inner.read_at(offset, buffer)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, StorageError> {
        self.inner.write_at(offset, data)
    }

    fn stat(&self) -> Result<FileMetadata, StorageError> {
        self.inner.stat()
    }

    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }
}

impl<V> Drop for Tracked<V> {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}
