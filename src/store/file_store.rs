//! Single-file object store with content-addressed storage and a ref table
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("VAULTDB\0")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - object_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - refs_offset: 8 bytes (u64 LE)
//!   - refs_count: 8 bytes (u64 LE)
//!   - reserved: 16 bytes
//!
//! [OBJECTS: variable]
//!   - kind byte + zstd body, concatenated
//!
//! [INDEX: variable]
//!   - sorted array of (hash, offset, size) entries
//!
//! [REFS: variable]
//!   - branch names -> commit hashes
//! ```
//!
//! Index and refs are rewritten by [`FileStore::sync`], which also runs on
//! drop. The store is safe to share between threads. Across processes, each
//! handle holds an exclusive advisory lock on the file for its whole life, so
//! a second handle fails to open with [`Error::StoreLocked`] instead of
//! racing on refs and the append offset.

use super::packed::PackedObject;
use super::{ObjectStore, RefTable};
use crate::model::{Hash, Object};
use crate::{Error, Result, MAGIC, VERSION};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER_SIZE: u64 = 64;

/// 32 hash + 8 offset + 4 size
const INDEX_ENTRY_SIZE: usize = 44;

/// zstd level used unless configured otherwise
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// A content-addressed object store and ref table backed by a single file
pub struct FileStore {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<Hash, IndexEntry>>,
    refs: RwLock<HashMap<String, Hash>>,
    /// Current append position
    write_offset: RwLock<u64>,
    compression_level: i32,
}

impl FileStore {
    /// Create a new database file, truncating any existing one
    ///
    /// Fails with [`Error::StoreLocked`], leaving the file untouched, while
    /// another handle has it open.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock(&file, &path)?;
        file.set_len(0)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        debug!(path = %path.display(), "created vault file");

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            refs: RwLock::new(HashMap::new()),
            write_offset: RwLock::new(HEADER_SIZE),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        })
    }

    /// Open an existing database file
    ///
    /// Fails with [`Error::StoreLocked`] while another handle has it open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        lock(&file, &path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = read_u32(&header, 8);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let object_count = read_u64(&header, 16);
        let index_offset = read_u64(&header, 24);
        let refs_offset = read_u64(&header, 32);
        let refs_count = read_u64(&header, 40);

        let mut index = HashMap::new();
        if index_offset > 0 && object_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..object_count {
                let mut buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut buf)?;

                let mut hash_bytes = [0u8; 32];
                hash_bytes.copy_from_slice(&buf[0..32]);

                index.insert(
                    Hash::from_bytes(hash_bytes),
                    IndexEntry {
                        offset: read_u64(&buf, 32),
                        size: read_u32(&buf, 40),
                    },
                );
            }
        }

        let mut refs = HashMap::new();
        if refs_offset > 0 && refs_count > 0 {
            file.seek(SeekFrom::Start(refs_offset))?;
            for _ in 0..refs_count {
                let mut len_buf = [0u8; 2];
                file.read_exact(&mut len_buf)?;
                let name_len = u16::from_le_bytes(len_buf) as usize;

                let mut name_buf = vec![0u8; name_len];
                file.read_exact(&mut name_buf)?;
                let name = String::from_utf8(name_buf)
                    .map_err(|_| Error::InvalidFile("Ref name is not UTF-8".into()))?;

                let mut hash_buf = [0u8; 32];
                file.read_exact(&mut hash_buf)?;

                refs.insert(name, Hash::from_bytes(hash_buf));
            }
        }

        // Objects end where the index begins
        let write_offset = if index_offset > 0 {
            index_offset
        } else {
            file.seek(SeekFrom::End(0))?
        };

        debug!(
            path = %path.display(),
            objects = index.len(),
            refs = refs.len(),
            "opened vault file"
        );

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            refs: RwLock::new(refs),
            write_offset: RwLock::new(write_offset),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        })
    }

    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Set the zstd level used for objects written from now on
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn object_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the index and refs to disk
    pub fn sync(&self) -> Result<()> {
        // Same lock order as `put`: offset, then index, then file
        let write_offset = self.write_offset.read();
        let index = self.index.read();
        let refs = self.refs.read();
        let mut file = self.file.write();
        let write_offset = *write_offset;

        let refs_offset = write_offset + (index.len() * INDEX_ENTRY_SIZE) as u64;

        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(index.len() as u64).to_le_bytes())?;
        file.write_all(&write_offset.to_le_bytes())?;
        file.write_all(&refs_offset.to_le_bytes())?;
        file.write_all(&(refs.len() as u64).to_le_bytes())?;

        file.seek(SeekFrom::Start(write_offset))?;

        // Sorted for a deterministic file layout
        let mut entries: Vec<_> = index.iter().collect();
        entries.sort_by_key(|(h, _)| **h);
        for (hash, entry) in entries {
            file.write_all(hash.as_bytes())?;
            file.write_all(&entry.offset.to_le_bytes())?;
            file.write_all(&entry.size.to_le_bytes())?;
        }

        let mut ref_list: Vec<_> = refs.iter().collect();
        ref_list.sort_by_key(|(name, _)| name.as_str());
        for (name, hash) in ref_list {
            let name_bytes = name.as_bytes();
            file.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
            file.write_all(name_bytes)?;
            file.write_all(hash.as_bytes())?;
        }

        let end = file.stream_position()?;
        file.set_len(end)?;
        file.sync_all()?;
        Ok(())
    }
}

impl ObjectStore for FileStore {
    fn get(&self, hash: &Hash) -> Result<Object> {
        let entry = self
            .index
            .read()
            .get(hash)
            .cloned()
            .ok_or(Error::ObjectNotFound(*hash))?;

        let mut data = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut data)?;
        }

        PackedObject::decompress(&data)?.into_object(hash)
    }

    fn put(&self, object: &Object) -> Result<Hash> {
        let packed = PackedObject::from_object(object)?;
        let hash = packed.hash();

        if self.index.read().contains_key(&hash) {
            return Ok(hash);
        }

        let compressed = packed.compress(self.compression_level)?;
        let size = compressed.len() as u32;

        // Hold the offset lock across the check-and-write so two writers of
        // the same object cannot both append it
        let mut write_offset = self.write_offset.write();
        if self.index.read().contains_key(&hash) {
            return Ok(hash);
        }

        let offset = *write_offset;
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&compressed)?;
        }
        *write_offset = offset + size as u64;

        self.index.write().insert(hash, IndexEntry { offset, size });
        debug!(hash = %hash.short(), kind = ?packed.kind, size, "stored object");

        Ok(hash)
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        Ok(self.index.read().contains_key(hash))
    }

    fn check(&self) -> Result<()> {
        std::fs::metadata(&self.path)?;
        Ok(())
    }
}

impl RefTable for FileStore {
    fn read(&self, name: &str) -> Result<Option<Hash>> {
        Ok(self.refs.read().get(name).copied())
    }

    fn compare_and_swap(&self, name: &str, expected: Option<Hash>, new: Hash) -> Result<bool> {
        let mut refs = self.refs.write();
        if refs.get(name).copied() != expected {
            return Ok(false);
        }
        refs.insert(name.to_string(), new);
        Ok(true)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.refs.write().remove(name).is_some())
    }

    fn list(&self) -> Result<Vec<(String, Hash)>> {
        let mut refs: Vec<_> = self
            .refs
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(path = %self.path.display(), error = %e, "failed to sync vault file on drop");
        }
    }
}

/// Take the exclusive lock without waiting
fn lock(file: &File, path: &Path) -> Result<()> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(Error::StoreLocked(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Commit, EntryMode, Tree, TreeEntry};
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vault");

        {
            let store = FileStore::create(&path).unwrap();
            assert_eq!(store.object_count(), 0);
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.object_count(), 0);
        }
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, vec![7u8; 64]).unwrap();

        assert!(matches!(FileStore::open(&path), Err(Error::InvalidFile(_))));
    }

    #[test]
    fn test_object_storage() {
        let dir = tempdir().unwrap();
        let store = FileStore::create(dir.path().join("test.vault")).unwrap();

        let blob = Object::Blob(b"[1,2,3]".to_vec());
        let blob_hash = store.put(&blob).unwrap();
        let tree = Tree::list(vec![TreeEntry::new("0", EntryMode::Record, blob_hash)]);
        let tree_hash = store.put(&Object::Tree(tree.clone())).unwrap();

        assert_eq!(store.get_blob(&blob_hash).unwrap(), b"[1,2,3]".to_vec());
        assert_eq!(store.get_tree(&tree_hash).unwrap(), tree);
        assert_eq!(tree_hash, tree.hash());
    }

    #[test]
    fn test_deduplication() {
        let dir = tempdir().unwrap();
        let store = FileStore::create(dir.path().join("test.vault")).unwrap();

        let blob = Object::Blob(b"duplicate data".to_vec());
        let h1 = store.put(&blob).unwrap();
        let h2 = store.put(&blob).unwrap();

        assert_eq!(h1, h2);
        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vault");

        let commit = Commit::new(Hash::digest(b"tree"), vec![], "init", "ann", "ann", 7);
        let hash;
        {
            let store = FileStore::create(&path).unwrap();
            hash = store.put(&Object::Commit(commit.clone())).unwrap();
            assert!(store.compare_and_swap("main", None, hash).unwrap());
            store.sync().unwrap();
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.get_commit(&hash).unwrap(), commit);
            assert_eq!(store.read("main").unwrap(), Some(hash));
        }
    }

    #[test]
    fn test_writes_after_sync_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vault");

        let (h1, h2);
        {
            let store = FileStore::create(&path).unwrap();
            h1 = store.put(&Object::Blob(b"first".to_vec())).unwrap();
            store.sync().unwrap();
            h2 = store.put(&Object::Blob(b"second".to_vec())).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get_blob(&h1).unwrap(), b"first".to_vec());
        assert_eq!(store.get_blob(&h2).unwrap(), b"second".to_vec());
    }

    #[test]
    fn test_second_handle_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vault");

        let first = FileStore::create(&path).unwrap();
        let hash = first.put(&Object::Blob(b"kept".to_vec())).unwrap();
        first.sync().unwrap();

        let err = FileStore::open(&path).err().unwrap();
        assert!(matches!(err, Error::StoreLocked(_)));
        assert!(err.is_retryable());
        // Re-creating while locked must not truncate the live file
        assert!(matches!(
            FileStore::create(&path),
            Err(Error::StoreLocked(_))
        ));
        assert_eq!(first.get_blob(&hash).unwrap(), b"kept".to_vec());

        drop(first);
        let second = FileStore::open(&path).unwrap();
        assert_eq!(second.get_blob(&hash).unwrap(), b"kept".to_vec());
    }

    #[test]
    fn test_flipped_bytes_on_disk_are_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.vault");

        let (hash, entry) = {
            let store = FileStore::create(&path).unwrap();
            let hash = store
                .put(&Object::Blob(b"{\"name\":\"ann\",\"age\":30}".to_vec()))
                .unwrap();
            let entry = store.index.read().get(&hash).cloned().unwrap();
            (hash, entry)
        };

        let mut bytes = std::fs::read(&path).unwrap();
        let last = (entry.offset + entry.size as u64 - 1) as usize;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.contains(&hash).unwrap());
        assert!(matches!(store.get(&hash), Err(Error::CorruptObject(_))));
    }

    #[test]
    fn test_refs_compare_and_swap() {
        let dir = tempdir().unwrap();
        let store = FileStore::create(dir.path().join("test.vault")).unwrap();

        let a = Hash::digest(b"a");
        let b = Hash::digest(b"b");

        assert!(store.compare_and_swap("main", None, a).unwrap());
        assert!(!store.compare_and_swap("main", None, b).unwrap());
        assert!(store.compare_and_swap("main", Some(a), b).unwrap());
        assert!(store.compare_and_swap("feature", None, a).unwrap());

        let names: Vec<_> = store.list().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["feature", "main"]);

        assert!(store.delete("feature").unwrap());
        assert_eq!(store.read("feature").unwrap(), None);
    }
}
