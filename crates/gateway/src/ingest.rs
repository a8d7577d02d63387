//! Sandbox ingestion for `POST /submit_with_files`: unpack an uploaded
//! archive or shallow-clone a git reference, walk the result applying an
//! ignore list, and produce the flat path-to-text map that becomes
//! `Submission::ExistingArchive.tree`. Binary files and anything over the
//! per-file size cap are skipped rather than rejecting the whole request.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use pipeline_core::config::GatewaySection;

use crate::error::{bad_request, internal_error, ApiError};

const IGNORED_SEGMENTS: &[&str] =
    &[".git", "node_modules", "__pycache__", ".venv", "dist", "build"];

pub struct IngestLimits {
    pub max_archive_bytes: u64,
    pub max_file_bytes: u64,
    pub max_files: u64,
    pub extra_ignores: Vec<String>,
}

impl IngestLimits {
    pub fn from_section(section: &GatewaySection, extra_ignores: Vec<String>) -> Self {
        Self {
            max_archive_bytes: section.max_archive_bytes,
            max_file_bytes: section.max_file_bytes,
            max_files: section.max_files,
            extra_ignores,
        }
    }

    fn is_ignored(&self, path: &str) -> bool {
        path.split('/').any(|segment| {
            IGNORED_SEGMENTS.contains(&segment) || self.extra_ignores.iter().any(|p| p == segment)
        })
    }
}

/// Unzips `bytes` in memory (already bounded by the gateway's multipart body
/// limit) applying the ignore list, per-file size cap, and total file count
/// cap. Entries that fail UTF-8 decoding are treated as binary and skipped.
pub fn extract_archive(bytes: &[u8], limits: &IngestLimits) -> Result<HashMap<String, String>, ApiError> {
    if bytes.len() as u64 > limits.max_archive_bytes {
        return Err(bad_request(format!(
            "archive of {} bytes exceeds the {} byte limit",
            bytes.len(),
            limits.max_archive_bytes
        )));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| bad_request(format!("not a valid archive: {e}")))?;

    let mut tree = HashMap::new();
    for i in 0..archive.len() {
        if tree.len() as u64 >= limits.max_files {
            break;
        }
        let mut entry = archive
            .by_index(i)
            .map_err(|e| bad_request(format!("bad archive entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");
        if limits.is_ignored(&name) || entry.size() > limits.max_file_bytes {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(internal_error)?;
        if let Ok(text) = String::from_utf8(buf) {
            tree.insert(name, text);
        }
    }
    Ok(tree)
}

/// Shallow-clones `url` at `branch` into a temporary sandbox that is
/// released when this function returns, walking the resulting tree the same
/// way `extract_archive` walks a zip. Blocking git2 calls run on a blocking
/// thread so they don't stall the async runtime.
pub async fn clone_git(url: &str, branch: &str, limits: &IngestLimits) -> Result<HashMap<String, String>, ApiError> {
    let url = url.to_string();
    let branch = branch.to_string();
    let max_file_bytes = limits.max_file_bytes;
    let max_files = limits.max_files;
    let extra_ignores = limits.extra_ignores.clone();

    tokio::task::spawn_blocking(move || {
        clone_git_blocking(&url, &branch, max_file_bytes, max_files, &extra_ignores)
    })
    .await
    .map_err(|e| internal_error(format!("git clone task panicked: {e}")))?
}

fn clone_git_blocking(
    url: &str,
    branch: &str,
    max_file_bytes: u64,
    max_files: u64,
    extra_ignores: &[String],
) -> Result<HashMap<String, String>, ApiError> {
    let sandbox = tempfile::tempdir().map_err(internal_error)?;

    let mut fetch_opts = git2::FetchOptions::new();
    fetch_opts.depth(1);
    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_opts);
    builder.branch(branch);

    let repo = builder
        .clone(url, sandbox.path())
        .map_err(|e| bad_request(format!("git clone failed: {e}")))?;

    let head = repo.head().map_err(internal_error)?;
    let tree = head.peel_to_tree().map_err(internal_error)?;

    let limits = IngestLimits {
        max_archive_bytes: u64::MAX,
        max_file_bytes,
        max_files,
        extra_ignores: extra_ignores.to_vec(),
    };

    let mut out = HashMap::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |parent, entry| {
        if out.len() as u64 >= limits.max_files {
            return git2::TreeWalkResult::Abort;
        }
        let Some(name) = entry.name() else {
            return git2::TreeWalkResult::Ok;
        };
        let path = format!("{parent}{name}");
        if limits.is_ignored(&path) {
            return git2::TreeWalkResult::Skip;
        }
        if entry.kind() != Some(git2::ObjectType::Blob) {
            return git2::TreeWalkResult::Ok;
        }
        if let Ok(object) = entry.to_object(&repo) {
            if let Some(blob) = object.as_blob() {
                if blob.size() as u64 <= limits.max_file_bytes {
                    if let Ok(text) = std::str::from_utf8(blob.content()) {
                        out.insert(path, text.to_string());
                    }
                }
            }
        }
        git2::TreeWalkResult::Ok
    })
    .map_err(internal_error)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    fn limits() -> IngestLimits {
        IngestLimits {
            max_archive_bytes: 1024 * 1024,
            max_file_bytes: 1024,
            max_files: 10,
            extra_ignores: vec![],
        }
    }

    #[test]
    fn extracts_text_files_and_skips_ignored_directories() {
        let bytes = zip_bytes(&[
            ("src/main.rs", b"fn main() {}"),
            ("node_modules/dep/index.js", b"module.exports = {}"),
            (".git/HEAD", b"ref: refs/heads/main"),
        ]);
        let tree = extract_archive(&bytes, &limits()).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.contains_key("src/main.rs"));
    }

    #[test]
    fn rejects_archives_over_the_byte_limit() {
        let bytes = zip_bytes(&[("a.txt", b"hi")]);
        let mut tight = limits();
        tight.max_archive_bytes = 1;
        assert!(extract_archive(&bytes, &tight).is_err());
    }

    #[test]
    fn skips_files_over_the_per_file_limit() {
        let bytes = zip_bytes(&[("big.txt", &[b'x'; 2048])]);
        let tree = extract_archive(&bytes, &limits()).unwrap();
        assert!(tree.is_empty());
    }
}
