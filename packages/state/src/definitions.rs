// ABOUTME: Git-backed versioned definition store, one repository per application
// ABOUTME: Commits are built in the object database and published with a compare-and-swap on main

use chrono::{DateTime, Utc};
use corral_core::{normalize_repo_path, validate_app_id, CommitInfo, FileEntry, Revision};
use git2::build::{CheckoutBuilder, TreeUpdateBuilder};
use git2::{
    Commit, Diff, ErrorCode, FileMode, ObjectType, Oid, Repository, RepositoryInitOptions,
    ResetType, Signature, Sort, Tree, TreeWalkMode, TreeWalkResult,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

const MAIN_REF: &str = "refs/heads/main";
const BASELINE_GITIGNORE: &str = "runtime/*\n";

/// Attempts for writes that carry no expected revision before reporting a conflict
const MAX_CAS_ATTEMPTS: usize = 8;

/// Identity recorded on definition commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl CommitAuthor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now(&self.name, &self.email)?)
    }
}

/// Outcome of publishing a commit against the branch tip it was built on
enum Publish {
    Committed(Oid),
    /// Another writer moved the branch first
    Lost,
}

struct StoreInner {
    root: PathBuf,
    default_author: CommitAuthor,
    /// Serializes repository bootstrap and working-tree mirroring per app
    app_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Versioned definition store rooted at `{definition_root}/{app_id}`.
///
/// The working tree of each repository is only a mirror of `main`; reads and
/// writes go through the object database, so a failed write never leaves a
/// partially applied tree behind.
#[derive(Clone)]
pub struct DefinitionStore {
    inner: Arc<StoreInner>,
}

impl DefinitionStore {
    pub fn new(root: impl Into<PathBuf>, default_author: CommitAuthor) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root: root.into(),
                default_author,
                app_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }

    /// Bootstrap the app's repository if needed and return the current tip
    pub async fn ensure_repository(&self, app_id: &str) -> Result<Revision> {
        let app_id = app_id.to_string();
        self.run_blocking(move |store| {
            let repo = store.open_or_bootstrap(&app_id)?;
            let tip = head_commit(&repo)?.ok_or_else(|| {
                StateError::Internal(format!("repository for {} has no branch tip", app_id))
            })?;
            Ok(Revision::new(tip.id().to_string()))
        })
        .await
    }

    pub async fn read_file(
        &self,
        app_id: &str,
        path: &str,
        revision: Option<&Revision>,
    ) -> Result<Vec<u8>> {
        let app_id = app_id.to_string();
        let path = path.to_string();
        let revision = revision.map(|r| r.as_str().to_string());
        self.run_blocking(move |store| store.read_file(&app_id, &path, revision.as_deref()))
            .await
    }

    pub async fn write_file(
        &self,
        app_id: &str,
        path: &str,
        content: Vec<u8>,
        message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        let app_id = app_id.to_string();
        let path = path.to_string();
        let message = message.to_string();
        self.run_blocking(move |store| {
            store.write_file(&app_id, &path, &content, None, &message, author.as_ref())
        })
        .await
    }

    /// Write `path`, but only if HEAD is still `expected_base`
    pub async fn write_file_at(
        &self,
        app_id: &str,
        path: &str,
        content: Vec<u8>,
        expected_base: &Revision,
        message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        let app_id = app_id.to_string();
        let path = path.to_string();
        let expected_base = expected_base.as_str().to_string();
        let message = message.to_string();
        self.run_blocking(move |store| {
            store.write_file(
                &app_id,
                &path,
                &content,
                Some(&expected_base),
                &message,
                author.as_ref(),
            )
        })
        .await
    }

    /// Apply a unified diff confined to `path`, but only if HEAD is still `expected_base`
    pub async fn apply_diff(
        &self,
        app_id: &str,
        path: &str,
        diff: &str,
        expected_base: &Revision,
        message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        let app_id = app_id.to_string();
        let path = path.to_string();
        let diff = diff.to_string();
        let expected_base = expected_base.as_str().to_string();
        let message = message.to_string();
        self.run_blocking(move |store| {
            store.apply_diff(
                &app_id,
                &path,
                &diff,
                &expected_base,
                &message,
                author.as_ref(),
            )
        })
        .await
    }

    pub async fn delete_file(
        &self,
        app_id: &str,
        path: &str,
        message: &str,
        author: Option<CommitAuthor>,
    ) -> Result<Revision> {
        let app_id = app_id.to_string();
        let path = path.to_string();
        let message = message.to_string();
        self.run_blocking(move |store| {
            store.delete_file(&app_id, &path, &message, author.as_ref())
        })
        .await
    }

    pub async fn list_directory(
        &self,
        app_id: &str,
        path: &str,
        recursive: bool,
        revision: Option<&Revision>,
    ) -> Result<Vec<FileEntry>> {
        let app_id = app_id.to_string();
        let path = path.to_string();
        let revision = revision.map(|r| r.as_str().to_string());
        self.run_blocking(move |store| {
            store.list_directory(&app_id, &path, recursive, revision.as_deref())
        })
        .await
    }

    /// Current tip of `main`, or `None` if the app has never been written
    pub async fn head_revision(&self, app_id: &str) -> Result<Option<Revision>> {
        let app_id = app_id.to_string();
        self.run_blocking(move |store| {
            let repo = match store.open_existing(&app_id) {
                Ok(repo) => repo,
                Err(StateError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            let tip = head_commit(&repo)?;
            Ok(tip.map(|c| Revision::new(c.id().to_string())))
        })
        .await
    }

    /// Newest-first commit log, optionally limited to commits that changed `path`
    pub async fn history(
        &self,
        app_id: &str,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        let app_id = app_id.to_string();
        let path = path.map(|p| p.to_string());
        self.run_blocking(move |store| store.history(&app_id, path.as_deref(), limit))
            .await
    }
}

impl StoreInner {
    fn app_dir(&self, app_id: &str) -> Result<PathBuf> {
        validate_app_id(app_id)?;
        Ok(self.root.join(app_id))
    }

    fn app_lock(&self, app_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .app_locks
            .lock()
            .map_err(|_| StateError::Internal("app lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(app_id.to_string()).or_default()))
    }

    fn open_existing(&self, app_id: &str) -> Result<Repository> {
        let dir = self.app_dir(app_id)?;
        if !dir.exists() {
            return Err(StateError::NotFound(format!(
                "application {} has no definition repository",
                app_id
            )));
        }
        Repository::open(&dir).map_err(|e| match e.code() {
            ErrorCode::NotFound => StateError::NotFound(format!(
                "application {} has no definition repository",
                app_id
            )),
            _ => StateError::Git(e),
        })
    }

    /// Open the app's repository, creating and seeding it on first use.
    ///
    /// Safe under concurrent first writers: the initial branch is created without
    /// force, so a caller that loses the race simply adopts the existing history.
    fn open_or_bootstrap(&self, app_id: &str) -> Result<Repository> {
        let dir = self.app_dir(app_id)?;
        let lock = self.app_lock(app_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| StateError::Internal(format!("lock for {} poisoned", app_id)))?;

        std::fs::create_dir_all(&dir)?;
        let repo = match Repository::open(&dir) {
            Ok(repo) => repo,
            Err(_) => {
                debug!("Initializing definition repository at {}", dir.display());
                let mut opts = RepositoryInitOptions::new();
                opts.initial_head("main");
                Repository::init_opts(&dir, &opts)?
            }
        };

        if head_commit(&repo)?.is_none() {
            self.bootstrap(&repo, app_id)?;
        }

        Ok(repo)
    }

    fn bootstrap(&self, repo: &Repository, app_id: &str) -> Result<()> {
        let sig = self.default_author.signature()?;
        let blob = repo.blob(BASELINE_GITIGNORE.as_bytes())?;
        let mut builder = repo.treebuilder(None)?;
        builder.insert(".gitignore", blob, FileMode::Blob.into())?;
        let tree = repo.find_tree(builder.write()?)?;

        let message = format!("Initial commit for application {} definition state", app_id);
        let oid = repo.commit(None, &sig, &sig, &message, &tree, &[])?;

        match repo.reference(MAIN_REF, oid, false, &message) {
            Ok(_) => info!("Bootstrapped definition repository for {}", app_id),
            Err(e) if e.code() == ErrorCode::Exists => {
                debug!("Definition repository for {} already initialized", app_id);
            }
            Err(e) => return Err(e.into()),
        }

        mirror_head(repo)
    }

    fn refresh_worktree(&self, repo: &Repository, app_id: &str) -> Result<()> {
        let lock = self.app_lock(app_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| StateError::Internal(format!("lock for {} poisoned", app_id)))?;
        mirror_head(repo)
    }

    fn signature_for(&self, author: Option<&CommitAuthor>) -> Result<Signature<'static>> {
        author.unwrap_or(&self.default_author).signature()
    }

    /// Build a tree from the branch tip, commit it, and publish with a compare-and-swap.
    ///
    /// Nothing becomes visible until the branch moves; a failure in `build_tree`
    /// or in the commit leaves only unreachable objects behind.
    fn transact<F>(
        &self,
        repo: &Repository,
        app_id: &str,
        expected: Option<Oid>,
        message: &str,
        sig: &Signature<'_>,
        build_tree: F,
    ) -> Result<Publish>
    where
        F: FnOnce(&Repository, &Commit<'_>) -> Result<Oid>,
    {
        let tip = head_commit(repo)?.ok_or_else(|| {
            StateError::Internal(format!("repository for {} has no branch tip", app_id))
        })?;

        if let Some(expected) = expected {
            if tip.id() != expected {
                return Err(StateError::Conflict(format!(
                    "expected base revision {} but HEAD is {}",
                    expected,
                    tip.id()
                )));
            }
        }

        let tree = repo.find_tree(build_tree(repo, &tip)?)?;
        let oid = repo.commit(None, sig, sig, message, &tree, &[&tip])?;

        match repo.reference_matching(MAIN_REF, oid, true, tip.id(), message) {
            Ok(_) => {}
            Err(e) if matches!(e.code(), ErrorCode::Modified | ErrorCode::Locked) => {
                debug!("Lost branch update race for {}: {}", app_id, e.message());
                return Ok(Publish::Lost);
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.refresh_worktree(repo, app_id) {
            warn!("Failed to mirror working tree for {}: {}", app_id, e);
        }

        debug!("Committed {} to {}: {}", oid, app_id, message);
        Ok(Publish::Committed(oid))
    }

    fn read_file(&self, app_id: &str, path: &str, revision: Option<&str>) -> Result<Vec<u8>> {
        let path = file_path(path)?;
        let repo = self.open_existing(app_id)?;
        let commit = resolve_commit(&repo, revision)?;
        let entry = commit
            .tree()?
            .get_path(Path::new(&path))
            .map_err(|_| StateError::NotFound(format!("{} in application {}", path, app_id)))?;

        if entry.kind() != Some(ObjectType::Blob) {
            return Err(StateError::Validation(format!("{} is a directory", path)));
        }

        let blob = repo.find_blob(entry.id())?;
        Ok(blob.content().to_vec())
    }

    fn write_file(
        &self,
        app_id: &str,
        path: &str,
        content: &[u8],
        expected_base: Option<&str>,
        message: &str,
        author: Option<&CommitAuthor>,
    ) -> Result<Revision> {
        let path = file_path(path)?;
        let expected = expected_base
            .map(|base| {
                Oid::from_str(base).map_err(|_| StateError::InvalidRevision(base.to_string()))
            })
            .transpose()?;
        let sig = self.signature_for(author)?;
        let repo = self.open_or_bootstrap(app_id)?;

        // A pinned base never retries: losing the race means HEAD moved past it
        let attempts = if expected.is_some() { 1 } else { MAX_CAS_ATTEMPTS };
        for attempt in 1..=attempts {
            let outcome = self.transact(&repo, app_id, expected, message, &sig, |repo, tip| {
                let base = tip.tree()?;
                if let Ok(existing) = base.get_path(Path::new(&path)) {
                    if existing.kind() == Some(ObjectType::Tree) {
                        return Err(StateError::Validation(format!("{} is a directory", path)));
                    }
                }
                let blob = repo.blob(content)?;
                let mut update = TreeUpdateBuilder::new();
                update.upsert(path.as_str(), blob, FileMode::Blob);
                Ok(update.create_updated(repo, &base)?)
            })?;

            match outcome {
                Publish::Committed(oid) => return Ok(Revision::new(oid.to_string())),
                Publish::Lost => debug!("Retrying write of {} (attempt {})", path, attempt),
            }
        }

        match expected_base {
            Some(base) => Err(StateError::Conflict(format!(
                "HEAD moved past {} while writing {}",
                base, path
            ))),
            None => Err(StateError::Conflict(format!(
                "could not publish write to {} after {} attempts",
                path, MAX_CAS_ATTEMPTS
            ))),
        }
    }

    fn apply_diff(
        &self,
        app_id: &str,
        path: &str,
        diff_content: &str,
        expected_base: &str,
        message: &str,
        author: Option<&CommitAuthor>,
    ) -> Result<Revision> {
        let path = file_path(path)?;
        let expected = Oid::from_str(expected_base)
            .map_err(|_| StateError::InvalidRevision(expected_base.to_string()))?;

        let diff_content = with_git_header(diff_content, &path);
        let diff = Diff::from_buffer(diff_content.as_bytes())
            .map_err(|e| StateError::Validation(format!("malformed diff: {}", e.message())))?;
        if diff.deltas().len() == 0 {
            return Err(StateError::Validation("diff contains no changes".to_string()));
        }
        check_diff_scope(&diff, &path)?;

        let sig = self.signature_for(author)?;
        let repo = self.open_existing(app_id)?;

        let outcome = self.transact(&repo, app_id, Some(expected), message, &sig, |repo, tip| {
            let mut index = repo
                .apply_to_tree(&tip.tree()?, &diff, None)
                .map_err(|e| {
                    StateError::Conflict(format!(
                        "diff does not apply cleanly to {}: {}",
                        path,
                        e.message()
                    ))
                })?;
            Ok(index.write_tree_to(repo)?)
        })?;

        match outcome {
            Publish::Committed(oid) => Ok(Revision::new(oid.to_string())),
            Publish::Lost => Err(StateError::Conflict(format!(
                "HEAD moved past {} while applying diff",
                expected_base
            ))),
        }
    }

    fn delete_file(
        &self,
        app_id: &str,
        path: &str,
        message: &str,
        author: Option<&CommitAuthor>,
    ) -> Result<Revision> {
        let path = file_path(path)?;
        let sig = self.signature_for(author)?;
        let repo = self.open_existing(app_id)?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let outcome = self.transact(&repo, app_id, None, message, &sig, |repo, tip| {
                let base = tip.tree()?;
                match base.get_path(Path::new(&path)) {
                    Ok(entry) if entry.kind() == Some(ObjectType::Blob) => {}
                    Ok(_) => {
                        return Err(StateError::Validation(format!("{} is a directory", path)))
                    }
                    Err(_) => {
                        return Err(StateError::NotFound(format!(
                            "{} in application {}",
                            path, app_id
                        )))
                    }
                }
                let mut update = TreeUpdateBuilder::new();
                update.remove(path.as_str());
                Ok(update.create_updated(repo, &base)?)
            })?;

            match outcome {
                Publish::Committed(oid) => return Ok(Revision::new(oid.to_string())),
                Publish::Lost => debug!("Retrying delete of {} (attempt {})", path, attempt),
            }
        }

        Err(StateError::Conflict(format!(
            "could not publish delete of {} after {} attempts",
            path, MAX_CAS_ATTEMPTS
        )))
    }

    fn list_directory(
        &self,
        app_id: &str,
        path: &str,
        recursive: bool,
        revision: Option<&str>,
    ) -> Result<Vec<FileEntry>> {
        let path = normalize_repo_path(path)?;
        let repo = self.open_existing(app_id)?;
        let commit = resolve_commit(&repo, revision)?;
        let root = commit.tree()?;

        let target = if path.is_empty() {
            root
        } else {
            let entry = root
                .get_path(Path::new(&path))
                .map_err(|_| StateError::NotFound(format!("{} in application {}", path, app_id)))?;
            if entry.kind() != Some(ObjectType::Tree) {
                return Err(StateError::Validation(format!("{} is not a directory", path)));
            }
            repo.find_tree(entry.id())?
        };

        let mut entries = Vec::new();
        if recursive {
            target.walk(TreeWalkMode::PreOrder, |parent, entry| {
                if let Some(name) = entry.name() {
                    entries.push(FileEntry {
                        name: name.to_string(),
                        path: join_path(&path, &format!("{}{}", parent, name)),
                        is_directory: entry.kind() == Some(ObjectType::Tree),
                    });
                }
                TreeWalkResult::Ok
            })?;
        } else {
            for entry in target.iter() {
                if let Some(name) = entry.name() {
                    entries.push(FileEntry {
                        name: name.to_string(),
                        path: join_path(&path, name),
                        is_directory: entry.kind() == Some(ObjectType::Tree),
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn history(&self, app_id: &str, path: Option<&str>, limit: usize) -> Result<Vec<CommitInfo>> {
        let repo = self.open_existing(app_id)?;
        let path = path
            .map(normalize_repo_path)
            .transpose()?
            .filter(|p| !p.is_empty());

        let Some(tip) = head_commit(&repo)? else {
            return Ok(Vec::new());
        };

        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(tip.id())?;

        let mut history = Vec::new();
        for oid in walk {
            if history.len() >= limit {
                break;
            }
            let commit = repo.find_commit(oid?)?;
            if let Some(path) = &path {
                if !commit_touches(&commit, path)? {
                    continue;
                }
            }
            history.push(commit_info(&commit));
        }

        Ok(history)
    }
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>> {
    match repo.find_reference(MAIN_REF) {
        Ok(reference) => Ok(Some(reference.peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn resolve_commit<'r>(repo: &'r Repository, revision: Option<&str>) -> Result<Commit<'r>> {
    match revision {
        Some(rev) => repo
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit())
            .map_err(|_| StateError::InvalidRevision(rev.to_string())),
        None => head_commit(repo)?
            .ok_or_else(|| StateError::NotFound("definition repository has no commits".to_string())),
    }
}

/// Check out the branch tip into the working tree.
///
/// On failure the working tree is hard-reset to the tip, the last known-good
/// commit, so the mirror never shows a half-written state.
fn mirror_head(repo: &Repository) -> Result<()> {
    let mut checkout = CheckoutBuilder::new();
    checkout.force();

    if let Err(e) = repo.checkout_head(Some(&mut checkout)) {
        warn!("Working tree checkout failed, resetting: {}", e);
        if let Some(tip) = head_commit(repo)? {
            repo.reset(tip.as_object(), ResetType::Hard, None)?;
        }
    }

    Ok(())
}

fn file_path(path: &str) -> Result<String> {
    let normalized = normalize_repo_path(path)?;
    if normalized.is_empty() {
        return Err(StateError::Validation("file path is required".to_string()));
    }
    Ok(normalized)
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Plain `diff -u` output lacks the git header libgit2 requires; synthesize one for `path`
fn with_git_header<'a>(diff_content: &'a str, path: &str) -> Cow<'a, str> {
    if diff_content.lines().any(|line| line.starts_with("diff --git ")) {
        return Cow::Borrowed(diff_content);
    }

    let hunks_at = diff_content
        .match_indices("@@ ")
        .map(|(i, _)| i)
        .find(|&i| i == 0 || diff_content.as_bytes()[i - 1] == b'\n');
    let Some(hunks_at) = hunks_at else {
        return Cow::Borrowed(diff_content);
    };
    let (header, hunks) = diff_content.split_at(hunks_at);

    let header_path = |line: &str, marker: &str| {
        line.strip_prefix(marker)
            .map(|rest| rest.split('\t').next().unwrap_or_default().trim().to_string())
    };
    let old = header.lines().find_map(|line| header_path(line, "--- "));
    let new = header.lines().find_map(|line| header_path(line, "+++ "));
    let (Some(old), Some(new)) = (old, new) else {
        return Cow::Borrowed(diff_content);
    };

    let mut normalized = format!("diff --git a/{path} b/{path}\n");
    match (old == "/dev/null", new == "/dev/null") {
        (true, _) => normalized.push_str(&format!("new file mode 100644\n--- /dev/null\n+++ b/{path}\n")),
        (_, true) => normalized.push_str(&format!("deleted file mode 100644\n--- a/{path}\n+++ /dev/null\n")),
        _ => normalized.push_str(&format!("--- a/{path}\n+++ b/{path}\n")),
    }
    normalized.push_str(hunks);
    Cow::Owned(normalized)
}

/// Reject diffs that touch any file other than `path`
fn check_diff_scope(diff: &Diff<'_>, path: &str) -> Result<()> {
    for delta in diff.deltas() {
        for file in [delta.old_file(), delta.new_file()] {
            let Some(touched) = file.path() else {
                continue;
            };
            let touched = touched.to_string_lossy();
            if touched == "/dev/null" {
                continue;
            }
            if normalize_repo_path(&touched)? != path {
                return Err(StateError::Validation(format!(
                    "diff touches {} outside of {}",
                    touched, path
                )));
            }
        }
    }
    Ok(())
}

fn commit_touches(commit: &Commit<'_>, path: &str) -> Result<bool> {
    let current = entry_id(&commit.tree()?, path);
    let previous = match commit.parent(0) {
        Ok(parent) => entry_id(&parent.tree()?, path),
        Err(_) => None,
    };
    Ok(current != previous)
}

fn entry_id(tree: &Tree<'_>, path: &str) -> Option<Oid> {
    tree.get_path(Path::new(path)).ok().map(|entry| entry.id())
}

fn commit_info(commit: &Commit<'_>) -> CommitInfo {
    let author = commit.author();
    CommitInfo {
        revision: Revision::new(commit.id().to_string()),
        author: author.name().unwrap_or_default().to_string(),
        email: author.email().unwrap_or_default().to_string(),
        message: commit.message().unwrap_or_default().trim_end().to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILE_DIFF: &str = "\
diff --git a/a.yaml b/a.yaml
--- a/a.yaml
+++ b/a.yaml
@@ -1 +1 @@
-one
+two
diff --git a/b.yaml b/b.yaml
--- a/b.yaml
+++ b/b.yaml
@@ -1 +1 @@
-one
+two
";

    #[test]
    fn test_plain_unified_diff_gets_git_header() {
        let plain = "--- greeting.txt.orig\t2026-10-18 09:00:00\n+++ greeting.txt\t2026-10-18 09:01:00\n@@ -1 +1 @@\n-World\n+Ada\n";
        let normalized = with_git_header(plain, "greeting.txt");
        assert_eq!(
            normalized,
            "diff --git a/greeting.txt b/greeting.txt\n--- a/greeting.txt\n+++ b/greeting.txt\n@@ -1 +1 @@\n-World\n+Ada\n"
        );
        assert!(Diff::from_buffer(normalized.as_bytes()).is_ok());

        let created = with_git_header("--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+hi\n", "new.txt");
        assert!(created.contains("new file mode 100644\n--- /dev/null\n+++ b/new.txt\n"));

        assert!(matches!(with_git_header("not a diff", "greeting.txt"), Cow::Borrowed(_)));
        assert!(matches!(with_git_header(TWO_FILE_DIFF, "a.yaml"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_diff_scope_rejects_other_files() {
        let diff = Diff::from_buffer(TWO_FILE_DIFF.as_bytes()).unwrap();
        let err = check_diff_scope(&diff, "a.yaml").unwrap_err();
        assert!(matches!(err, StateError::Validation(_)));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a.yaml"), "a.yaml");
        assert_eq!(join_path("components", "a.yaml"), "components/a.yaml");
    }

    #[test]
    fn test_file_path_requires_a_name() {
        assert!(matches!(file_path("./"), Err(StateError::Validation(_))));
        assert!(matches!(file_path("../x"), Err(StateError::Validation(_))));
        assert_eq!(file_path("/a").ok(), None);
        assert_eq!(file_path("a//b").unwrap(), "a/b");
    }
}
