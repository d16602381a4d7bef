// src/fs/mock.rs

use super::{FileStat, FileSystem, ReadSeek, WriteSeek};
use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

type Entries = Arc<Mutex<BTreeMap<PathBuf, MockEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, BTreeMap<PathBuf, MockEntry>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory filesystem for tests. Parent directories of added files are
/// created implicitly.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Entries,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut entries = lock(&self.entries);
        ensure_parents(&mut entries, path);
        entries.insert(path.to_path_buf(), MockEntry::File(content.into()));
    }

    /// Current content of a file, if any.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match lock(&self.entries).get(path.as_ref()) {
            Some(MockEntry::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// All file paths, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        lock(&self.entries)
            .iter()
            .filter(|(_, e)| matches!(e, MockEntry::File(_)))
            .map(|(p, _)| p.clone())
            .collect()
    }
}

fn ensure_parents(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d.as_os_str().is_empty() {
            break;
        }
        entries.entry(d.to_path_buf()).or_insert(MockEntry::Dir);
        dir = d.parent();
    }
}

fn has_parent(entries: &BTreeMap<PathBuf, MockEntry>, path: &Path) -> bool {
    match path.parent() {
        None => true,
        Some(p) if p.as_os_str().is_empty() || p == Path::new("/") => true,
        Some(p) => matches!(entries.get(p), Some(MockEntry::Dir)),
    }
}

/// Buffers writes and publishes the content on every flush and on drop.
struct MockWriter {
    path: PathBuf,
    buf: Cursor<Vec<u8>>,
    entries: Entries,
}

impl MockWriter {
    fn commit(&self) {
        lock(&self.entries).insert(self.path.clone(), MockEntry::File(self.buf.get_ref().clone()));
    }
}

impl Write for MockWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit();
        Ok(())
    }
}

impl Seek for MockWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buf.seek(pos)
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        self.commit();
    }
}

impl FileSystem for MockFileSystem {
    fn open_read(&self, path: &Path) -> Result<Box<dyn ReadSeek>> {
        match lock(&self.entries).get(path) {
            Some(MockEntry::File(content)) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn create(&self, path: &Path) -> Result<Box<dyn WriteSeek>> {
        let mut entries = lock(&self.entries);
        if matches!(entries.get(path), Some(MockEntry::Dir)) {
            return Err(anyhow!("Is a directory: {:?}", path));
        }
        if !has_parent(&entries, path) {
            return Err(anyhow!("Parent directory not found: {:?}", path));
        }
        entries.insert(path.to_path_buf(), MockEntry::File(Vec::new()));
        Ok(Box::new(MockWriter {
            path: path.to_path_buf(),
            buf: Cursor::new(Vec::new()),
            entries: Arc::clone(&self.entries),
        }))
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        match lock(&self.entries).get(path) {
            Some(MockEntry::File(content)) => Ok(FileStat {
                len: content.len() as u64,
                is_dir: false,
            }),
            Some(MockEntry::Dir) => Ok(FileStat {
                len: 0,
                is_dir: true,
            }),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        lock(&self.entries).contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(lock(&self.entries).get(path), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(lock(&self.entries).get(path), Some(MockEntry::Dir))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut entries = lock(&self.entries);
        match entries.get(path) {
            Some(MockEntry::File(_)) => {
                entries.remove(path);
                Ok(())
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut entries = lock(&self.entries);
        if !has_parent(&entries, to) {
            return Err(anyhow!("Parent directory not found: {:?}", to));
        }
        match entries.remove(from) {
            Some(entry @ MockEntry::File(_)) => {
                entries.insert(to.to_path_buf(), entry);
                Ok(())
            }
            Some(MockEntry::Dir) => {
                entries.insert(from.to_path_buf(), MockEntry::Dir);
                Err(anyhow!("Renaming directories is not supported: {:?}", from))
            }
            None => Err(anyhow!("File not found: {:?}", from)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut entries = lock(&self.entries);
        if matches!(entries.get(path), Some(MockEntry::File(_))) {
            return Err(anyhow!("Not a directory: {:?}", path));
        }
        ensure_parents(&mut entries, path);
        entries.insert(path.to_path_buf(), MockEntry::Dir);
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = lock(&self.entries);
        match entries.get(path) {
            Some(MockEntry::Dir) => Ok(entries
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let entries = lock(&self.entries);
        if !matches!(entries.get(root), Some(MockEntry::Dir)) {
            return Err(anyhow!("Not a directory or not found: {:?}", root));
        }
        Ok(entries
            .keys()
            .filter(|p| p.starts_with(root) && p.as_path() != root)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_publishes_on_drop() {
        let fs = MockFileSystem::new();
        fs.create_dir_all(Path::new("/data")).unwrap();
        {
            let mut w = fs.create(Path::new("/data/a.bin")).unwrap();
            w.write_all(b"abc").unwrap();
        }
        assert_eq!(fs.contents("/data/a.bin").unwrap(), b"abc");
    }

    #[test]
    fn create_requires_parent_directory() {
        let fs = MockFileSystem::new();
        assert!(fs.create(Path::new("/missing/a.bin")).is_err());
    }

    #[test]
    fn read_dir_lists_direct_children_only() {
        let fs = MockFileSystem::new();
        fs.add_file("/d/a.txt", "a");
        fs.add_file("/d/sub/b.txt", "b");

        let children = fs.read_dir(Path::new("/d")).unwrap();
        assert_eq!(children, vec![PathBuf::from("/d/a.txt"), PathBuf::from("/d/sub")]);
        assert_eq!(fs.walk(Path::new("/d")).unwrap().len(), 3);
    }
}
