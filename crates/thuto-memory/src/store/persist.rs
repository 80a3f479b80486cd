//! Generation-based persistence of one subject's index and metadata.
//!
//! Layout under the subject directory:
//!
//! ```text
//! CURRENT            name of the live generation, e.g. "gen-7"
//! gen-7/index.bin    vectors
//! gen-7/metadata.json records
//! ```
//!
//! A generation is written completely into a temporary directory, synced and renamed before
//! `CURRENT` is atomically replaced, so a crash leaves either the old pair or the new pair.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::index::FlatIndex;
use super::metadata::{ChunkRecord, METADATA_FORMAT_VERSION, MetadataFile};
use crate::error::{MemoryError, Result};

pub(crate) const CURRENT_FILE: &str = "CURRENT";
pub(crate) const INDEX_FILE: &str = "index.bin";
pub(crate) const METADATA_FILE: &str = "metadata.json";

const MAGIC: &[u8; 4] = b"THIX";
const INDEX_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const CHECKSUM_LEN: usize = 32;

pub(crate) struct LoadedGeneration {
    pub generation: u64,
    pub index: FlatIndex,
    pub records: Vec<ChunkRecord>,
}

fn generation_name(generation: u64) -> String {
    format!("gen-{generation}")
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix("gen-")?.parse().ok()
}

pub(crate) fn encode_index(index: &FlatIndex) -> Result<Vec<u8>> {
    let dim = u32::try_from(index.dim())
        .map_err(|_| MemoryError::InvalidArgument(format!("dimension {} too large", index.dim())))?;
    let mut out = Vec::with_capacity(HEADER_LEN + index.as_slice().len() * 4 + CHECKSUM_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    out.extend_from_slice(&dim.to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for x in index.as_slice() {
        out.extend_from_slice(&x.to_le_bytes());
    }
    let checksum = blake3::hash(&out);
    out.extend_from_slice(checksum.as_bytes());
    Ok(out)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn decode_index(subject: &str, bytes: &[u8]) -> Result<(FlatIndex, blake3::Hash)> {
    let corrupt = |reason: &str| MemoryError::corrupt_index(subject, reason);

    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(corrupt("index file truncated"));
    }
    if &bytes[..4] != MAGIC {
        return Err(corrupt("bad index magic"));
    }
    let version = read_u32(bytes, 4);
    if version != INDEX_VERSION {
        return Err(corrupt(&format!("unsupported index version {version}")));
    }
    let dim = read_u32(bytes, 8) as usize;
    let mut count_buf = [0u8; 8];
    count_buf.copy_from_slice(&bytes[12..20]);
    let count = usize::try_from(u64::from_le_bytes(count_buf))
        .map_err(|_| corrupt("vector count overflows"))?;

    let payload_len = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt("vector count overflows"))?;
    if bytes.len() != HEADER_LEN + payload_len + CHECKSUM_LEN {
        return Err(corrupt("index payload length does not match header"));
    }

    let body_end = HEADER_LEN + payload_len;
    let checksum = blake3::hash(&bytes[..body_end]);
    if checksum.as_bytes() != &bytes[body_end..] {
        return Err(corrupt("index checksum mismatch"));
    }

    let data: Vec<f32> = bytes[HEADER_LEN..body_end]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let index = FlatIndex::from_raw(dim, data).ok_or_else(|| corrupt("zero index dimension"))?;
    Ok((index, checksum))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn sync_dir(dir: &Path) {
    // Directory fsync is unsupported on some platforms.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}

/// Name of the live generation, if the subject has ever been persisted.
pub(crate) fn read_current(subject_dir: &Path) -> Result<Option<(u64, PathBuf)>> {
    let pointer = match fs::read_to_string(subject_dir.join(CURRENT_FILE)) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let name = pointer.trim();
    let subject = subject_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let generation = parse_generation(name)
        .ok_or_else(|| MemoryError::corrupt_index(&subject, format!("bad CURRENT pointer {name:?}")))?;
    Ok(Some((generation, subject_dir.join(name))))
}

/// Highest generation directory present under `subject_dir`, whatever `CURRENT` says.
pub(crate) fn latest_generation_on_disk(subject_dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(subject_dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|e| parse_generation(&e.file_name().to_string_lossy()))
        .max()
        .unwrap_or(0)
}

/// Write `index` and `records` as generation `generation` and make it current.
pub(crate) fn write_generation(
    subject_dir: &Path,
    subject: &str,
    generation: u64,
    index: &FlatIndex,
    records: &[ChunkRecord],
) -> Result<()> {
    fs::create_dir_all(subject_dir)?;

    let name = generation_name(generation);
    let staging = subject_dir.join(format!("{name}.tmp"));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir(&staging)?;

    let index_bytes = encode_index(index)?;
    let checksum = blake3::hash(&index_bytes);
    write_synced(&staging.join(INDEX_FILE), &index_bytes)?;

    let meta = MetadataFile {
        format_version: METADATA_FORMAT_VERSION,
        subject: subject.to_owned(),
        generation,
        dim: index.dim(),
        count: records.len(),
        index_checksum: checksum.to_hex().to_string(),
        records: records.to_vec(),
    };
    write_synced(&staging.join(METADATA_FILE), &serde_json::to_vec(&meta)?)?;
    sync_dir(&staging);

    let target = subject_dir.join(&name);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::rename(&staging, &target)?;

    let pointer_tmp = subject_dir.join(format!("{CURRENT_FILE}.tmp"));
    write_synced(&pointer_tmp, format!("{name}\n").as_bytes())?;
    fs::rename(&pointer_tmp, subject_dir.join(CURRENT_FILE))?;
    sync_dir(subject_dir);

    remove_stale_generations(subject_dir, &name);
    Ok(())
}

fn remove_stale_generations(subject_dir: &Path, live: &str) {
    let Ok(entries) = fs::read_dir(subject_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name.starts_with("gen-")
            && name != live
            && let Err(e) = fs::remove_dir_all(entry.path())
        {
            tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove stale generation");
        }
    }
}

fn read_metadata(subject: &str, dir: &Path) -> Result<MetadataFile> {
    let bytes = fs::read(dir.join(METADATA_FILE)).map_err(|e| {
        MemoryError::corrupt_index(subject, format!("cannot read {METADATA_FILE}: {e}"))
    })?;
    let meta: MetadataFile = serde_json::from_slice(&bytes)
        .map_err(|e| MemoryError::corrupt_index(subject, format!("invalid {METADATA_FILE}: {e}")))?;
    if meta.format_version != METADATA_FORMAT_VERSION {
        return Err(MemoryError::corrupt_index(
            subject,
            format!("unsupported metadata version {}", meta.format_version),
        ));
    }
    Ok(meta)
}

/// Load the live generation, verifying that the index and metadata agree.
pub(crate) fn load_generation(subject: &str, subject_dir: &Path) -> Result<Option<LoadedGeneration>> {
    let Some((generation, dir)) = read_current(subject_dir)? else {
        return Ok(None);
    };

    let index_bytes = fs::read(dir.join(INDEX_FILE))
        .map_err(|e| MemoryError::corrupt_index(subject, format!("cannot read {INDEX_FILE}: {e}")))?;
    let (index, checksum) = decode_index(subject, &index_bytes)?;
    let meta = read_metadata(subject, &dir)?;

    if meta.subject != subject {
        return Err(MemoryError::corrupt_index(
            subject,
            format!("metadata belongs to subject {:?}", meta.subject),
        ));
    }
    if meta.records.len() != meta.count || index.len() != meta.records.len() {
        return Err(MemoryError::corrupt_index(
            subject,
            format!(
                "index holds {} vectors but metadata holds {} records",
                index.len(),
                meta.records.len()
            ),
        ));
    }
    if meta.dim != index.dim() {
        return Err(MemoryError::corrupt_index(subject, "metadata dimension differs from index"));
    }
    if meta.index_checksum != checksum.to_hex().as_str() {
        return Err(MemoryError::corrupt_index(subject, "metadata does not describe this index"));
    }

    Ok(Some(LoadedGeneration {
        generation,
        index,
        records: meta.records,
    }))
}

/// Records of the live generation without touching the index file.
pub(crate) fn load_records(subject: &str, subject_dir: &Path) -> Result<Option<Vec<ChunkRecord>>> {
    let Some((_, dir)) = read_current(subject_dir)? else {
        return Ok(None);
    };
    Ok(Some(read_metadata(subject, &dir)?.records))
}
