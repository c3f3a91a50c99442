//! BagIt 0.97 assembly, sealing and verification.
//!
//! A bag is a directory holding a `data/` payload tree plus four tag files.
//! Sealing computes every digest first, writes each tag file to a temporary
//! file in the bag root and only then renames them into place.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::AssemblyError;
use crate::metadata::MetadataRecord;

pub const BAGIT_VERSION: &str = "0.97";
pub const DATA_DIR: &str = "data";
pub const DECLARATION_FILE: &str = "bagit.txt";
pub const BAG_INFO_FILE: &str = "bag-info.txt";
pub const MANIFEST_FILE: &str = "manifest-sha256.txt";
pub const TAG_MANIFEST_FILE: &str = "tagmanifest-sha256.txt";

const TEMP_PREFIX: &str = ".bagsync-";

// ── Types ──────────────────────────────────────────────────────────────────

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the bag root, `/`-separated.
    pub path: String,
    /// Lower-case hex SHA-256.
    pub digest: String,
    pub bytes: u64,
}

/// A sealed bag.
#[derive(Debug, Clone)]
pub struct Bag {
    root: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl Bag {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Payload entries, sorted by path.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// `<total bytes>.<file count>`
    pub fn payload_oxum(&self) -> String {
        payload_oxum(&self.entries)
    }
}

/// Result of re-checking a bag against its manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Manifest lines examined.
    pub checked: usize,
    /// Listed in a manifest but absent on disk.
    pub missing: Vec<String>,
    /// Present but with a different digest.
    pub mismatched: Vec<String>,
    /// Present under `data/` but not listed.
    pub unlisted: Vec<String>,
}

impl VerifyReport {
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty() && self.unlisted.is_empty()
    }
}

// ── Assembly ───────────────────────────────────────────────────────────────

/// The payload directory of a bag rooted at `root`.
pub fn data_dir(root: &Path) -> PathBuf {
    root.join(DATA_DIR)
}

/// A directory is treated as a bag once it carries a declaration file.
pub fn is_bag(dir: &Path) -> bool {
    dir.join(DECLARATION_FILE).is_file()
}

/// Place `payload_files` under `root/data/` and seal the bag.
///
/// Files already under `data/` stay where they are; the manifest covers every
/// file found there, not only the ones passed in. On error no payload file is
/// removed and no tag file is replaced.
pub fn assemble(
    root: &Path,
    payload_files: &[PathBuf],
    metadata: &MetadataRecord,
) -> Result<Bag, AssemblyError> {
    let data = data_dir(root);
    fs::create_dir_all(&data).map_err(|source| AssemblyError::CreateDir {
        path: data.clone(),
        source,
    })?;

    for payload in payload_files {
        place_payload(payload, &data)?;
    }

    let mut entries = Vec::new();
    collect_entries(&data, DATA_DIR, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    seal(root, &entries, metadata)?;

    Ok(Bag {
        root: root.to_path_buf(),
        entries,
    })
}

fn place_payload(payload: &Path, data: &Path) -> Result<(), AssemblyError> {
    let name = payload
        .file_name()
        .ok_or_else(|| AssemblyError::InvalidPayload {
            path: payload.to_path_buf(),
        })?;
    let dest = data.join(name);
    if dest.exists() && same_file(payload, &dest) {
        return Ok(());
    }

    let copy_err = |source| AssemblyError::CopyPayload {
        path: payload.to_path_buf(),
        source,
    };
    let mut input = File::open(payload).map_err(copy_err)?;
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(data)
        .map_err(copy_err)?;
    io::copy(&mut input, temp.as_file_mut()).map_err(copy_err)?;
    publish(temp, &dest).map_err(copy_err)?;
    tracing::debug!(payload = %payload.display(), dest = %dest.display(), "copied payload into bag");
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Walk `dir` recursively, hashing every regular file.
fn collect_entries(
    dir: &Path,
    prefix: &str,
    entries: &mut Vec<ManifestEntry>,
) -> Result<(), AssemblyError> {
    let list_err = |source| AssemblyError::ListPayload {
        path: dir.to_path_buf(),
        source,
    };
    for item in fs::read_dir(dir).map_err(list_err)? {
        let item = item.map_err(list_err)?;
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let path = item.path();
        let rel = format!("{}/{}", prefix, name);
        let file_type = item.file_type().map_err(list_err)?;
        if file_type.is_dir() {
            collect_entries(&path, &rel, entries)?;
        } else {
            let (digest, bytes) =
                hash_file(&path).map_err(|source| AssemblyError::ReadPayload {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!(path = %rel, %digest, bytes, "hashed payload");
            entries.push(ManifestEntry {
                path: rel,
                digest,
                bytes,
            });
        }
    }
    Ok(())
}

/// Stream a file through SHA-256.
pub fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes = io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), bytes))
}

fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ── Rendering ──────────────────────────────────────────────────────────────

pub fn render_declaration() -> String {
    format!(
        "BagIt-Version: {}\nTag-File-Character-Encoding: UTF-8\n",
        BAGIT_VERSION
    )
}

/// `<hex>  <path>\n` per entry, in the order given.
pub fn render_manifest(entries: &[ManifestEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}  {}\n", e.digest, e.path))
        .collect()
}

/// One `Name: value` line per value, then `Payload-Oxum`.
///
/// Embedded newlines become indented continuation lines.
pub fn render_bag_info(metadata: &MetadataRecord, entries: &[ManifestEntry]) -> String {
    let mut out = String::new();
    for (field, values) in metadata.iter() {
        for value in values {
            let value = value.replace("\r\n", "\n").replace('\n', "\n  ");
            out.push_str(&format!("{}: {}\n", field.canonical_name(), value));
        }
    }
    out.push_str(&format!("Payload-Oxum: {}\n", payload_oxum(entries)));
    out
}

fn payload_oxum(entries: &[ManifestEntry]) -> String {
    let total: u64 = entries.iter().map(|e| e.bytes).sum();
    format!("{}.{}", total, entries.len())
}

// ── Sealing ────────────────────────────────────────────────────────────────

fn seal(
    root: &Path,
    entries: &[ManifestEntry],
    metadata: &MetadataRecord,
) -> Result<(), AssemblyError> {
    let declaration = render_declaration();
    let manifest = render_manifest(entries);
    let bag_info = render_bag_info(metadata, entries);
    let tag_manifest = format!(
        "{}  {}\n{}  {}\n",
        hash_bytes(declaration.as_bytes()),
        DECLARATION_FILE,
        hash_bytes(manifest.as_bytes()),
        MANIFEST_FILE
    );

    let files = [
        (DECLARATION_FILE, declaration),
        (BAG_INFO_FILE, bag_info),
        (MANIFEST_FILE, manifest),
        (TAG_MANIFEST_FILE, tag_manifest),
    ];

    let mut staged = Vec::with_capacity(files.len());
    for (name, contents) in &files {
        let dest = root.join(name);
        let write_err = |source| AssemblyError::WriteTag {
            name: name.to_string(),
            source,
        };
        if dest.is_dir() {
            return Err(write_err(io::Error::other("a directory is in the way")));
        }
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(root)
            .map_err(write_err)?;
        temp.write_all(contents.as_bytes()).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        staged.push((name, temp, dest));
    }

    for (name, temp, dest) in staged {
        publish(temp, &dest).map_err(|source| AssemblyError::WriteTag {
            name: name.to_string(),
            source,
        })?;
    }

    tracing::info!(
        root = %root.display(),
        files = entries.len(),
        oxum = %payload_oxum(entries),
        "sealed bag"
    );
    Ok(())
}

/// Rename a finished temp file into place with ordinary file permissions.
fn publish(temp: NamedTempFile, dest: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
    }
    temp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

// ── Verification ───────────────────────────────────────────────────────────

/// Recompute every digest listed in the payload and tag manifests.
pub fn verify(root: &Path) -> Result<VerifyReport, AssemblyError> {
    if !is_bag(root) {
        return Err(AssemblyError::NotABag {
            path: root.to_path_buf(),
            reason: format!("no {}", DECLARATION_FILE),
        });
    }
    let manifest_path = root.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(AssemblyError::NotABag {
            path: root.to_path_buf(),
            reason: format!("no {}", MANIFEST_FILE),
        });
    }

    let mut report = VerifyReport::default();
    let listed = check_manifest(root, MANIFEST_FILE, &mut report)?;
    if root.join(TAG_MANIFEST_FILE).is_file() {
        check_manifest(root, TAG_MANIFEST_FILE, &mut report)?;
    }

    let data = data_dir(root);
    if data.is_dir() {
        let mut present = Vec::new();
        collect_paths(&data, DATA_DIR, &mut present)?;
        report.unlisted = present
            .into_iter()
            .filter(|p| !listed.contains(p))
            .collect();
        report.unlisted.sort();
    }

    if report.is_valid() {
        tracing::info!(root = %root.display(), checked = report.checked, "bag is valid");
    } else {
        tracing::warn!(
            root = %root.display(),
            missing = report.missing.len(),
            mismatched = report.mismatched.len(),
            unlisted = report.unlisted.len(),
            "bag failed verification"
        );
    }
    Ok(report)
}

/// Check one manifest file, returning the set of paths it lists.
fn check_manifest(
    root: &Path,
    file: &str,
    report: &mut VerifyReport,
) -> Result<BTreeSet<String>, AssemblyError> {
    let path = root.join(file);
    let text = fs::read_to_string(&path)
        .map_err(|source| AssemblyError::ReadPayload { path, source })?;

    let mut listed = BTreeSet::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (digest, rel) = line
            .split_once(char::is_whitespace)
            .map(|(d, p)| (d, p.trim_start()))
            .filter(|(d, p)| !d.is_empty() && !p.is_empty())
            .ok_or_else(|| AssemblyError::MalformedManifest {
                file: file.to_string(),
                line: index + 1,
                text: line.to_string(),
            })?;
        if !listable(file, rel) {
            return Err(AssemblyError::MalformedManifest {
                file: file.to_string(),
                line: index + 1,
                text: line.to_string(),
            });
        }

        report.checked += 1;
        listed.insert(rel.to_string());
        let on_disk = root.join(rel);
        if !on_disk.is_file() {
            report.missing.push(rel.to_string());
            continue;
        }
        let (actual, _) = hash_file(&on_disk).map_err(|source| AssemblyError::ReadPayload {
            path: on_disk.clone(),
            source,
        })?;
        if !actual.eq_ignore_ascii_case(digest) {
            report.mismatched.push(rel.to_string());
        }
    }
    Ok(listed)
}

/// Payload manifest paths must stay under `data/`; tag manifest paths must
/// name a file in the bag root.
fn listable(file: &str, rel: &str) -> bool {
    let mut parts = rel.split('/');
    let plain = |p: &str| !p.is_empty() && p != "." && p != ".." && !p.contains('\\');
    if file == MANIFEST_FILE {
        parts.next() == Some(DATA_DIR) && {
            let rest: Vec<&str> = parts.collect();
            !rest.is_empty() && rest.iter().all(|p| plain(*p))
        }
    } else {
        parts.next().is_some_and(plain) && parts.next().is_none()
    }
}

fn collect_paths(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), AssemblyError> {
    let list_err = |source| AssemblyError::ListPayload {
        path: dir.to_path_buf(),
        source,
    };
    for item in fs::read_dir(dir).map_err(list_err)? {
        let item = item.map_err(list_err)?;
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let rel = format!("{}/{}", prefix, name);
        if item.file_type().map_err(list_err)?.is_dir() {
            collect_paths(&item.path(), &rel, out)?;
        } else {
            out.push(rel);
        }
    }
    Ok(())
}
