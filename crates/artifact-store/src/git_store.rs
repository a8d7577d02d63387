use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use git2::{Oid, Repository, Signature};
use pipeline_core::ArtifactRef;
use tracing::warn;

use crate::error::ArtifactError;
use crate::traits::ArtifactStore;

pub struct GitArtifactStoreConfig {
    /// Directory holding the bare repository all requests commit into.
    pub repo_root: PathBuf,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl GitArtifactStoreConfig {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Local bare-git-backed artifact store. Each successful write resets
/// `req/<request_id>` to a single new commit whose tree contains exactly
/// the given files — no merge with whatever was on the branch before.
pub struct GitArtifactStore {
    config: GitArtifactStoreConfig,
}

impl GitArtifactStore {
    pub fn new(config: GitArtifactStoreConfig) -> Self {
        Self { config }
    }

    fn write_once(
        repo_root: &Path,
        request_id: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<ArtifactRef, ArtifactError> {
        if !repo_root.join("HEAD").exists() {
            std::fs::create_dir_all(repo_root)?;
            Repository::init_bare(repo_root)?;
        }
        let repo = Repository::open_bare(repo_root)?;

        let tree_oid = build_tree(&repo, files)?;
        let tree = repo.find_tree(tree_oid)?;

        let signature = Signature::now("pipeline-bot", "pipeline-bot@local")?;
        let branch_ref = format!("refs/heads/req/{request_id}");
        let parent = repo
            .find_reference(&branch_ref)
            .and_then(|r| r.peel_to_commit())
            .ok();
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let commit_oid = repo.commit(
            Some(&branch_ref),
            &signature,
            &signature,
            &format!("artifact for {request_id}"),
            &tree,
            &parents,
        )?;

        Ok(ArtifactRef {
            repo_url: repo_root.display().to_string(),
            branch: format!("req/{request_id}"),
            commit_hash: commit_oid.to_string(),
            paths: files.keys().cloned().collect(),
        })
    }
}

/// Recursively builds a tree from `/`-separated paths: git's treebuilder is
/// single-level, so paths are grouped by their first segment and each group
/// becomes a subtree built the same way.
fn build_tree(repo: &Repository, entries: &BTreeMap<String, String>) -> Result<Oid, ArtifactError> {
    let mut builder = repo.treebuilder(None)?;
    let mut subdirs: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

    for (path, content) in entries {
        match path.split_once('/') {
            Some((dir, rest)) => {
                subdirs
                    .entry(dir.to_string())
                    .or_default()
                    .insert(rest.to_string(), content.clone());
            }
            None => {
                let oid = repo.blob(content.as_bytes())?;
                builder.insert(path, oid, 0o100644)?;
            }
        }
    }

    for (dir, sub_entries) in subdirs {
        let sub_oid = build_tree(repo, &sub_entries)?;
        builder.insert(&dir, sub_oid, 0o040000)?;
    }

    Ok(builder.write()?)
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    base.saturating_mul(2_u32.saturating_pow(pow)).min(max)
}

#[async_trait]
impl ArtifactStore for GitArtifactStore {
    async fn write(
        &self,
        request_id: &str,
        files: &HashMap<String, String>,
    ) -> Result<ArtifactRef, ArtifactError> {
        let entries: BTreeMap<String, String> =
            files.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut attempt = 1;
        loop {
            let repo_root = self.config.repo_root.clone();
            let request_id_owned = request_id.to_string();
            let entries = entries.clone();

            let result = tokio::task::spawn_blocking(move || {
                GitArtifactStore::write_once(&repo_root, &request_id_owned, &entries)
            })
            .await
            .map_err(|e| ArtifactError::Exhausted(format!("artifact write task panicked: {e}")))?;

            match result {
                Ok(artifact_ref) => return Ok(artifact_ref),
                Err(err) if attempt < self.config.max_attempts => {
                    warn!(error = %err, attempt, "artifact write failed, retrying");
                    let delay = backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(ArtifactError::Exhausted(err.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_nested_files_and_returns_artifact_ref() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitArtifactStore::new(GitArtifactStoreConfig::new(dir.path()));

        let mut files = HashMap::new();
        files.insert("src/main.rs".to_string(), "fn main() {}".to_string());
        files.insert("README.md".to_string(), "# todo app".to_string());

        let artifact = store.write("req-1", &files).await.unwrap();
        assert_eq!(artifact.branch, "req/req-1");
        assert_eq!(artifact.paths.len(), 2);

        let repo = Repository::open_bare(dir.path()).unwrap();
        let commit = repo.find_commit(Oid::from_str(&artifact.commit_hash).unwrap()).unwrap();
        let tree = commit.tree().unwrap();
        assert!(tree.get_path(Path::new("src/main.rs")).is_ok());
    }

    #[tokio::test]
    async fn second_write_resets_the_branch_rather_than_merging() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitArtifactStore::new(GitArtifactStoreConfig::new(dir.path()));

        let mut first = HashMap::new();
        first.insert("a.txt".to_string(), "a".to_string());
        store.write("req-2", &first).await.unwrap();

        let mut second = HashMap::new();
        second.insert("b.txt".to_string(), "b".to_string());
        let artifact = store.write("req-2", &second).await.unwrap();

        let repo = Repository::open_bare(dir.path()).unwrap();
        let commit = repo.find_commit(Oid::from_str(&artifact.commit_hash).unwrap()).unwrap();
        let tree = commit.tree().unwrap();
        assert!(tree.get_path(Path::new("a.txt")).is_err());
        assert!(tree.get_path(Path::new("b.txt")).is_ok());
    }
}
