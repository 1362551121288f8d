use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::pipeline::EXTENSION;

const THUMB_SUFFIX: &str = "_thumb";
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not_found")]
    NotFound,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Which of the two public directories a rendition lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenditionKind {
    Full,
    Thumb,
}

impl RenditionKind {
    pub const ALL: [RenditionKind; 2] = [RenditionKind::Full, RenditionKind::Thumb];

    /// URL mount point, without slashes.
    pub fn mount(self) -> &'static str {
        match self {
            RenditionKind::Full => "uploads",
            RenditionKind::Thumb => "thumbs",
        }
    }

    pub fn file_name(self, id: &Uuid) -> String {
        match self {
            RenditionKind::Full => format!("{id}.{EXTENSION}"),
            RenditionKind::Thumb => format!("{id}{THUMB_SUFFIX}.{EXTENSION}"),
        }
    }

    /// Server-relative path stored in the metadata row and used in public URLs.
    pub fn public_path(self, id: &Uuid) -> String {
        format!("/{}/{}", self.mount(), self.file_name(id))
    }

    /// Recovers the panel id from a file name, only if the name is exactly what
    /// `file_name` would have produced for this kind.
    pub fn parse_file_name(self, name: &str) -> Option<Uuid> {
        let stem = name.strip_suffix(EXTENSION)?.strip_suffix('.')?;
        let raw = match self {
            RenditionKind::Full => stem,
            RenditionKind::Thumb => stem.strip_suffix(THUMB_SUFFIX)?,
        };
        let id = Uuid::try_parse(raw).ok()?;
        (self.file_name(&id) == name).then_some(id)
    }
}

#[async_trait]
pub trait RenditionStore: Send + Sync {
    async fn save(&self, kind: RenditionKind, name: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn load(&self, kind: RenditionKind, name: &str) -> Result<Vec<u8>, StoreError>;
    async fn delete(&self, kind: RenditionKind, name: &str) -> Result<(), StoreError>;
    /// Every entry name in the kind's directory, including stray partial writes.
    async fn list(&self, kind: RenditionKind) -> Result<Vec<String>, StoreError>;
    /// Last-modified time of a listed entry.
    async fn modified(&self, kind: RenditionKind, name: &str) -> Result<SystemTime, StoreError>;
}

pub fn is_partial(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PART_SUFFIX)
}

// ---------------- Filesystem implementation ----------------
pub struct FsRenditionStore {
    upload_dir: PathBuf,
    thumb_dir: PathBuf,
}

impl FsRenditionStore {
    /// Creates both directories if missing. Failure here is a startup error.
    pub async fn open(
        upload_dir: impl Into<PathBuf>,
        thumb_dir: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let store = Self { upload_dir: upload_dir.into(), thumb_dir: thumb_dir.into() };
        for kind in RenditionKind::ALL {
            tokio::fs::create_dir_all(store.dir(kind)).await?;
        }
        info!(
            "rendition dirs ready uploads={} thumbs={}",
            store.upload_dir.display(),
            store.thumb_dir.display()
        );
        Ok(store)
    }

    pub fn dir(&self, kind: RenditionKind) -> &Path {
        match kind {
            RenditionKind::Full => &self.upload_dir,
            RenditionKind::Thumb => &self.thumb_dir,
        }
    }

    fn path_for(&self, kind: RenditionKind, name: &str) -> Result<PathBuf, StoreError> {
        if kind.parse_file_name(name).is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(self.dir(kind).join(name))
    }

    // Like `path_for`, but also admits the partial files a failed save can leave.
    fn entry_path(&self, kind: RenditionKind, name: &str) -> Result<PathBuf, StoreError> {
        if is_partial(name) && !name.contains(['/', '\\']) {
            Ok(self.dir(kind).join(name))
        } else {
            self.path_for(kind, name)
        }
    }
}

#[async_trait]
impl RenditionStore for FsRenditionStore {
    async fn save(&self, kind: RenditionKind, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let target = self.path_for(kind, name)?;
        let part = self.dir(kind).join(format!(".{name}{PART_SUFFIX}"));
        let written = async {
            let mut file = tokio::fs::File::create(&part).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&part, &target).await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(&self, kind: RenditionKind, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(kind, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, kind: RenditionKind, name: &str) -> Result<(), StoreError> {
        let path = self.entry_path(kind, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, kind: RenditionKind) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(self.dir(kind)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    warn!("skipping non-utf8 entry {raw:?} in {}", self.dir(kind).display())
                }
            }
        }
        Ok(names)
    }

    async fn modified(&self, kind: RenditionKind, name: &str) -> Result<SystemTime, StoreError> {
        let path = self.entry_path(kind, name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.modified()?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
