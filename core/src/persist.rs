use crate::error::{Result, SearchError};
use crate::Document;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub created_at: String,
    pub version: u32,
}

impl MetaFile {
    pub fn new(documents: &[Document]) -> Self {
        Self {
            num_docs: documents.len() as u32,
            created_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            version: FORMAT_VERSION,
        }
    }
}

/// Fixed artifact locations under one index directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn lexical(&self) -> PathBuf { self.root.join("lexical.bin") }
    pub fn chunk_embeddings(&self) -> PathBuf { self.root.join("chunk_embeddings.bin") }
    pub fn chunk_metadata(&self) -> PathBuf { self.root.join("chunk_metadata.json") }
    pub fn document_embeddings(&self) -> PathBuf { self.root.join("document_embeddings.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }

    pub fn has_lexical(&self) -> bool {
        self.lexical().is_file()
    }

    /// Both chunk files must exist for the chunk store to count as present.
    pub fn has_chunk_store(&self) -> bool {
        self.chunk_embeddings().is_file() && self.chunk_metadata().is_file()
    }
}

/// Write to a sibling temp file, then rename over `path`. Readers see either the
/// old artifact or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(())
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SearchError::IndexNotFound(path.to_path_buf()),
        _ => SearchError::Io(e),
    })?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn save_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    write_atomic(path, &bytes)
}

pub fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let buf = read_artifact(path)?;
    Ok(bincode::deserialize(&buf)?)
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let buf = read_artifact(path)?;
    Ok(serde_json::from_slice(&buf)?)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    save_json(&paths.meta(), meta)
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    load_json(&paths.meta())
}

/// Content hash over every document's id, title and body, in corpus order.
pub fn corpus_fingerprint(documents: &[Document]) -> String {
    let mut hasher = blake3::Hasher::new();
    for doc in documents {
        for field in [&doc.id, &doc.title, &doc.body] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}
