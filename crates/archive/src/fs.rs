//! Virtual filesystem seam used by archive operations.
//!
//! The archive service never touches storage keys directly. It resolves
//! paths, walks folders and opens entity readers through [`FileSystem`], so
//! the full file tree (ownership, permissions, versions) stays outside this
//! crate. [`ObjectFileSystem`] is a thin implementation that treats the keys
//! of a single storage policy as paths.

use crate::error::{ArchiveError, ArchiveResult};
use async_trait::async_trait;
use depot_core::{Entity, EntityId};
use depot_storage::{EntitySource, PhysicalObject, StorageDriver, StorageError};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use time::OffsetDateTime;

/// Kind of a filesystem node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Folder,
}

/// A file or folder as seen by archive operations.
#[derive(Clone, Debug)]
pub struct FsFile {
    /// Absolute `/`-separated path. The root is `/`.
    pub path: String,
    pub kind: FileKind,
    /// Size of the primary entity in bytes (0 for folders).
    pub size: u64,
    pub updated_at: OffsetDateTime,
    /// Symbolic links are skipped when walking folders.
    pub is_symbolic: bool,
    /// Entity holding the current content.
    pub primary_entity: Option<EntityId>,
    /// Every stored version of the content.
    pub entities: Vec<Entity>,
}

impl FsFile {
    /// A file whose only version is `entity`.
    pub fn file(path: impl Into<String>, entity: Entity) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::File,
            size: entity.size,
            updated_at: entity.updated_at,
            is_symbolic: false,
            primary_entity: Some(entity.id),
            entities: vec![entity],
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Folder,
            size: 0,
            updated_at: OffsetDateTime::UNIX_EPOCH,
            is_symbolic: false,
            primary_entity: None,
            entities: Vec::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_root(&self) -> bool {
        self.path.trim_matches('/').is_empty()
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// Parent folder path, always starting with `/`.
    pub fn parent(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) | None => "/",
            Some(pos) => &trimmed[..pos],
        }
    }

    /// Lowercased extension of the name, if any.
    pub fn ext(&self) -> Option<String> {
        let name = self.name();
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    /// The entity with `id`, or the primary entity when `id` is `None`.
    pub fn find_entity(&self, id: Option<EntityId>) -> Option<&Entity> {
        let id = id.or(self.primary_entity)?;
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Filesystem collaborator for archive operations.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Resolve a path.
    async fn get(&self, path: &str) -> ArchiveResult<FsFile>;

    /// Direct children of a folder.
    async fn children(&self, path: &str) -> ArchiveResult<Vec<FsFile>>;

    /// Open a range reader over one stored entity.
    async fn open_entity(&self, entity: &Entity) -> ArchiveResult<Box<dyn EntitySource>>;
}

/// [`FileSystem`] over the object keys of one storage driver.
///
/// `/a/b.zip` maps to key `a/b.zip`; folders are key prefixes.
pub struct ObjectFileSystem {
    driver: Arc<dyn StorageDriver>,
    policy_id: i64,
}

impl ObjectFileSystem {
    pub fn new(driver: Arc<dyn StorageDriver>, policy_id: i64) -> Self {
        Self { driver, policy_id }
    }

    fn entity(&self, key: &str, size: u64, modified: Option<OffsetDateTime>) -> Entity {
        let mut entity = Entity::new(entity_id(key, size, modified), key, size, self.policy_id);
        if let Some(modified) = modified {
            entity.updated_at = modified;
        }
        entity
    }

    fn from_physical(&self, parent: &str, object: PhysicalObject) -> FsFile {
        let path = format!("{}/{}", parent.trim_end_matches('/'), object.relative_path);
        if object.is_dir {
            return FsFile::folder(path);
        }
        let entity = self.entity(&object.source, object.size, object.last_modified);
        FsFile::file(path, entity)
    }
}

/// Entity identity of an object: a changed object gets a new ID.
fn entity_id(key: &str, size: u64, modified: Option<OffsetDateTime>) -> EntityId {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    size.hash(&mut hasher);
    modified.map(|t| t.unix_timestamp_nanos()).hash(&mut hasher);
    (hasher.finish() >> 1) as EntityId
}

fn object_key(path: &str) -> &str {
    path.trim_matches('/')
}

#[async_trait]
impl FileSystem for ObjectFileSystem {
    async fn get(&self, path: &str) -> ArchiveResult<FsFile> {
        let key = object_key(path);
        if key.is_empty() {
            return Ok(FsFile::folder("/"));
        }

        match self.driver.meta(key).await {
            Ok(meta) => {
                let entity = self.entity(key, meta.size, meta.last_modified);
                Ok(FsFile::file(format!("/{key}"), entity))
            }
            Err(StorageError::NotFound(_)) => {
                let listed = self.driver.list(key, false, &|_| {}).await?;
                if listed.is_empty() {
                    Err(ArchiveError::NotFound(path.to_string()))
                } else {
                    Ok(FsFile::folder(format!("/{key}")))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn children(&self, path: &str) -> ArchiveResult<Vec<FsFile>> {
        let key = object_key(path);
        let parent = format!("/{key}");
        let listed = self.driver.list(key, false, &|_| {}).await?;
        Ok(listed
            .into_iter()
            .map(|object| self.from_physical(&parent, object))
            .collect())
    }

    async fn open_entity(&self, entity: &Entity) -> ArchiveResult<Box<dyn EntitySource>> {
        Ok(self.driver.open_range(entity).await?)
    }
}
