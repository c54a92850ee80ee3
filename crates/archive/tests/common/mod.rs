use async_trait::async_trait;
use bytes::Bytes;
use depot_archive::{ArchiveError, ArchiveResult, FileSystem, FsFile};
use depot_core::Entity;
use depot_storage::{EntitySource, StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

pub const LEGACY_ZIP: &[u8] = include_bytes!("../fixtures/legacy.zip");
pub const FOLDERS_7Z: &[u8] = include_bytes!("../fixtures/folders.7z");

/// In-memory [`FileSystem`] with injectable read failures.
#[allow(dead_code)]
pub struct MemoryFileSystem {
    nodes: Mutex<BTreeMap<String, FsFile>>,
    contents: Mutex<HashMap<String, Bytes>>,
    broken: Mutex<HashSet<String>>,
    unreadable_folders: Mutex<HashSet<String>>,
    next_entity: AtomicI64,
    /// Number of entity readers opened.
    pub opened: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryFileSystem {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), FsFile::folder("/"));
        Self {
            nodes: Mutex::new(nodes),
            contents: Mutex::new(HashMap::new()),
            broken: Mutex::new(HashSet::new()),
            unreadable_folders: Mutex::new(HashSet::new()),
            next_entity: AtomicI64::new(1),
            opened: AtomicUsize::new(0),
        }
    }

    fn new_entity(&self, data: Bytes) -> Entity {
        let id = self.next_entity.fetch_add(1, Ordering::SeqCst);
        let source = format!("blobs/{id}");
        let entity = Entity::new(id, source.clone(), data.len() as u64, 1);
        self.contents.lock().unwrap().insert(source, data);
        entity
    }

    fn insert(&self, file: FsFile) {
        let mut nodes = self.nodes.lock().unwrap();
        let mut parent = file.parent().to_string();
        while parent != "/" && !nodes.contains_key(&parent) {
            let folder = FsFile::folder(parent.clone());
            parent = folder.parent().to_string();
            nodes.insert(folder.path.clone(), folder);
        }
        nodes.insert(file.path.clone(), file);
    }

    pub fn add_file(&self, path: &str, data: impl Into<Bytes>) -> Entity {
        let entity = self.new_entity(data.into());
        self.insert(FsFile::file(path, entity.clone()));
        entity
    }

    pub fn add_symlink(&self, path: &str, data: impl Into<Bytes>) {
        let entity = self.new_entity(data.into());
        let mut file = FsFile::file(path, entity);
        file.is_symbolic = true;
        self.insert(file);
    }

    pub fn add_folder(&self, path: &str) {
        self.insert(FsFile::folder(path));
    }

    /// Store new content for an existing file and make it primary.
    pub fn add_version(&self, path: &str, data: impl Into<Bytes>) -> Entity {
        let entity = self.new_entity(data.into());
        let mut nodes = self.nodes.lock().unwrap();
        let file = nodes.get_mut(path).unwrap();
        file.size = entity.size;
        file.primary_entity = Some(entity.id);
        file.entities.push(entity.clone());
        entity
    }

    /// Make every read of the file's primary entity fail.
    pub fn break_reads(&self, path: &str) {
        let nodes = self.nodes.lock().unwrap();
        let entity = nodes[path].find_entity(None).unwrap();
        self.broken.lock().unwrap().insert(entity.source.clone());
    }

    pub fn break_folder(&self, path: &str) {
        self.unreadable_folders
            .lock()
            .unwrap()
            .insert(path.to_string());
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn get(&self, path: &str) -> ArchiveResult<FsFile> {
        self.nodes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))
    }

    async fn children(&self, path: &str) -> ArchiveResult<Vec<FsFile>> {
        if self.unreadable_folders.lock().unwrap().contains(path) {
            return Err(ArchiveError::NotSupported(format!("cannot read {path}")));
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|node| !node.is_root() && node.parent() == path)
            .cloned()
            .collect())
    }

    async fn open_entity(&self, entity: &Entity) -> ArchiveResult<Box<dyn EntitySource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let data = self
            .contents
            .lock()
            .unwrap()
            .get(&entity.source)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(entity.source.clone()))?;
        let broken = self.broken.lock().unwrap().contains(&entity.source);
        Ok(Box::new(MemorySource {
            entity: entity.clone(),
            data,
            broken,
        }))
    }
}

struct MemorySource {
    entity: Entity,
    data: Bytes,
    broken: bool,
}

#[async_trait]
impl EntitySource for MemorySource {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    async fn read_range(&mut self, start: u64, end: u64) -> StorageResult<Bytes> {
        if self.broken {
            return Err(StorageError::transport(
                "get_range",
                &self.entity.source,
                "injected failure",
            ));
        }
        let end = end.min(self.data.len() as u64);
        if start >= end {
            return Ok(Bytes::new());
        }
        Ok(self.data.slice(start as usize..end as usize))
    }
}
