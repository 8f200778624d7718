use std::fs;
use std::io::Write;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{CachedFile, FileId};
use crate::error::KiraError;
use crate::state::StateStore;

/// Upper bound (exclusive) of the id search space.
pub const DEFAULT_ID_CEILING: u32 = 10_000;

const BASE64_MARKER: &str = ";base64,";

/// Flat directory of uploaded blobs, indexed by small integer ids kept in
/// the state store's file registry.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: Utf8PathBuf,
    state: Arc<StateStore>,
    id_ceiling: u32,
}

impl FileCache {
    pub fn new(root: Utf8PathBuf, state: Arc<StateStore>) -> Self {
        Self::with_id_ceiling(root, state, DEFAULT_ID_CEILING)
    }

    pub fn with_id_ceiling(root: Utf8PathBuf, state: Arc<StateStore>, id_ceiling: u32) -> Self {
        Self {
            root,
            state,
            id_ceiling,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn init(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", self.root)))
    }

    /// Registers a new cached file and returns the path the caller must
    /// write it to. The id is the lowest one not currently registered.
    pub fn add(&self, original_name: &str) -> Result<(FileId, Utf8PathBuf), KiraError> {
        let ceiling = self.id_ceiling;
        let root = self.root.clone();
        let original_name = original_name.to_string();
        let (id, path) = self.state.modify_cached_files(|files| {
            let Some(id) = (0..ceiling).map(FileId::new).find(|id| !files.contains_key(id))
            else {
                return (None, Err(KiraError::IdSpaceExhausted { ceiling }));
            };
            let path = root.join(cached_file_name(id, &original_name));
            let mut next = files.clone();
            next.insert(
                id,
                CachedFile {
                    id,
                    original_name,
                    cached_path: path.clone(),
                },
            );
            (Some(next), Ok((id, path)))
        })?;
        debug!(%id, path = %path, "allocated cache entry");
        Ok((id, path))
    }

    pub fn get(&self, id: FileId) -> Result<CachedFile, KiraError> {
        self.state
            .cached_files()
            .get(&id)
            .cloned()
            .ok_or(KiraError::NotFound(id))
    }

    pub fn read(&self, id: FileId) -> Result<Vec<u8>, KiraError> {
        let file = self.get(id)?;
        fs::read(file.cached_path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", file.cached_path)))
    }

    /// Stores raw bytes under a fresh id.
    pub fn store(&self, name: &str, content: &[u8]) -> Result<FileId, KiraError> {
        let (id, path) = self.add(name)?;
        if let Err(err) = write_new_file(&path, content) {
            self.release(id);
            return Err(err);
        }
        info!(%id, name, bytes = content.len(), "cached uploaded file");
        Ok(id)
    }

    /// Drops a registration whose file was never written.
    fn release(&self, id: FileId) {
        self.state.modify_cached_files(|files| {
            let mut next = files.clone();
            let removed = next.remove(&id).is_some();
            (removed.then_some(next), ())
        });
        warn!(%id, "released cache entry after failed write");
    }

    /// Decodes an upload payload (optionally prefixed up to `;base64,`) and
    /// stores it. Nothing is registered when decoding fails.
    pub fn save(&self, name: &str, payload: &str) -> Result<FileId, KiraError> {
        let content = decode_upload(payload)?;
        self.store(name, &content)
    }
}

pub fn cached_file_name(id: FileId, original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let extension = base.rsplit('.').next().unwrap_or(base);
    format!("cached{:04}.{extension}", id.get())
}

pub fn decode_upload(payload: &str) -> Result<Vec<u8>, KiraError> {
    let data = match payload.split_once(BASE64_MARKER) {
        Some((_, data)) => data,
        None => payload,
    };
    let compact: String = data.chars().filter(|ch| !ch.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| KiraError::Decode(err.to_string()))
}

fn write_new_file(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = path
        .parent()
        .ok_or_else(|| KiraError::Filesystem(format!("invalid cache path {path}")))?;
    let mut temp = tempfile::Builder::new()
        .prefix("kira-cs-upload")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}
