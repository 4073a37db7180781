//! git::interface
//!
//! Git interface implementation using git2.
//!
//! [`GitTree`] wraps exactly one working tree and exposes the closed set
//! of operations the rest of the crate is allowed to perform. Errors are
//! normalized into [`GitError`], which always names the failing operation
//! and attaches the backend's diagnostic message.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::core::types::{Oid, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The path does not hold a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
    },

    /// A commit was requested but the index matches HEAD.
    #[error("nothing to commit")]
    NothingToCommit,

    /// An object id produced by the backend failed validation.
    #[error("invalid object id: {oid}")]
    InvalidOid {
        /// The offending id string
        oid: String,
    },

    /// The backend rejected an operation.
    #[error("git {op} failed: {message}")]
    Backend {
        /// The operation that failed (e.g. `commit`, `status`)
        op: String,
        /// Backend diagnostic, the stderr equivalent
        message: String,
    },

    /// Filesystem error while reading tree content.
    #[error("git {op} failed on {path}: {source}")]
    Io {
        /// The operation that failed
        op: String,
        /// The file involved
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(oid) => GitError::InvalidOid { oid },
        }
    }
}

/// Convert a backend error, tagging it with the failing operation.
fn backend(op: &str) -> impl FnOnce(git2::Error) -> GitError {
    let op = op.to_string();
    move |e| GitError::Backend {
        op,
        message: e.message().to_string(),
    }
}

/// A committer/author identity written into per-repo Git config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// The fixed Production committer. Author alone records user identity
    /// on Production commits.
    pub fn production_admin() -> Self {
        Self::new("cccopy_admin", "admin@cccopy.com")
    }

    /// The Work-side identity for an OS user.
    pub fn for_user(user: &str) -> Self {
        Self::new(user, format!("{user}@cccopy.com"))
    }
}

/// One entry of a per-path history listing.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: Oid,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub time: DateTime<Utc>,
    pub summary: String,
}

/// A Git working tree (Work or Production) and its repository.
pub struct GitTree {
    repo: git2::Repository,
    root: PathBuf,
}

impl std::fmt::Debug for GitTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTree").field("root", &self.root).finish()
    }
}

impl GitTree {
    /// Open an existing repository rooted exactly at `root`.
    pub fn open(root: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::open(root).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                GitError::NotARepo {
                    path: root.to_path_buf(),
                }
            } else {
                backend("open")(e)
            }
        })?;
        Ok(Self {
            repo,
            root: root.to_path_buf(),
        })
    }

    /// Initialize a repository at `root` and write the given identity
    /// into its per-repo config.
    pub fn init(root: &Path, identity: &Identity) -> Result<Self, GitError> {
        let repo = git2::Repository::init(root).map_err(backend("init"))?;
        let tree = Self {
            repo,
            root: root.to_path_buf(),
        };
        tree.set_identity(identity)?;
        Ok(tree)
    }

    /// Whether `root` already holds a repository.
    pub fn is_repo(root: &Path) -> bool {
        root.join(".git").exists()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `user.name` / `user.email` into the per-repo config.
    pub fn set_identity(&self, identity: &Identity) -> Result<(), GitError> {
        let mut config = self.repo.config().map_err(backend("config"))?;
        config
            .set_str("user.name", &identity.name)
            .map_err(backend("config user.name"))?;
        config
            .set_str("user.email", &identity.email)
            .map_err(backend("config user.email"))?;
        Ok(())
    }

    /// Read the committer identity from config.
    pub fn identity(&self) -> Result<Identity, GitError> {
        let mut config = self.repo.config().map_err(backend("config"))?;
        let snapshot = config.snapshot().map_err(backend("config"))?;
        let name = snapshot
            .get_str("user.name")
            .map_err(backend("config user.name"))?
            .to_string();
        let email = snapshot
            .get_str("user.email")
            .map_err(backend("config user.email"))?
            .to_string();
        Ok(Identity { name, email })
    }

    /// Blob hash of the working copy of `rel`, or `None` when the path is
    /// absent (or a directory). Pure function of the file bytes; this is
    /// the canonical content identifier for comparisons.
    pub fn hash_file(&self, rel: &str) -> Result<Option<Oid>, GitError> {
        let path = self.root.join(rel);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            // Directories read as errors on most platforms; treat as absent content.
            Err(_) if path.is_dir() => return Ok(None),
            Err(e) => {
                return Err(GitError::Io {
                    op: "hash-object".into(),
                    path,
                    source: e,
                })
            }
        };
        let id = git2::Oid::hash_object(git2::ObjectType::Blob, &bytes)
            .map_err(backend("hash-object"))?;
        Ok(Some(Oid::new(id.to_string())?))
    }

    /// The commit id HEAD resolves to, or `None` on an unborn branch.
    pub fn head_oid(&self) -> Result<Option<Oid>, GitError> {
        match self.head_commit()? {
            Some(commit) => Ok(Some(Oid::new(commit.id().to_string())?)),
            None => Ok(None),
        }
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(reference) => {
                let commit = reference.peel_to_commit().map_err(backend("head"))?;
                Ok(Some(commit))
            }
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(backend("head")(e)),
        }
    }

    /// The authoritative tracked set: every blob recorded in HEAD, mapped
    /// to its recorded hash. Empty on an unborn branch.
    pub fn tracked_at_head(&self) -> Result<HashMap<String, Oid>, GitError> {
        let Some(commit) = self.head_commit()? else {
            return Ok(HashMap::new());
        };
        let tree = commit.tree().map_err(backend("ls-tree"))?;
        let mut map = HashMap::new();
        let mut bad_oid = None;
        tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                // Entries with non-UTF8 names cannot belong to a project
                // (patterns are UTF-8); skip them.
                if let Some(name) = entry.name() {
                    match Oid::new(entry.id().to_string()) {
                        Ok(oid) => {
                            map.insert(format!("{dir}{name}"), oid);
                        }
                        Err(e) => {
                            bad_oid = Some(e);
                            return git2::TreeWalkResult::Abort;
                        }
                    }
                }
            }
            git2::TreeWalkResult::Ok
        })
        .map_err(backend("ls-tree"))?;
        if let Some(e) = bad_oid {
            return Err(e.into());
        }
        Ok(map)
    }

    /// Relative paths that differ from HEAD/index, untracked included,
    /// ignored files excluded. The porcelain-status equivalent.
    pub fn status_paths(&self) -> Result<Vec<String>, GitError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(backend("status"))?;
        Ok(statuses
            .iter()
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect())
    }

    /// Stage every change in the tree, additions and deletions alike
    /// (`add --all .`). Ignore rules are honored.
    pub fn stage_all(&self) -> Result<(), GitError> {
        let mut index = self.repo.index().map_err(backend("add"))?;
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .map_err(backend("add"))?;
        index.update_all(["*"].iter(), None).map_err(backend("add"))?;
        index.write().map_err(backend("add"))?;
        Ok(())
    }

    /// Stage an explicit list of paths.
    pub fn stage_paths<I, S>(&self, paths: I) -> Result<(), GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = self.repo.index().map_err(backend("add"))?;
        for p in paths {
            index
                .add_path(Path::new(p.as_ref()))
                .map_err(backend("add"))?;
        }
        index.write().map_err(backend("add"))?;
        Ok(())
    }

    /// Drop the whole index and re-stage the tree so the index reflects
    /// the current ignore rules (`rm -r --cached . && add .`).
    pub fn reset_index(&self) -> Result<(), GitError> {
        let mut index = self.repo.index().map_err(backend("rm --cached"))?;
        index.clear().map_err(backend("rm --cached"))?;
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .map_err(backend("add"))?;
        index.write().map_err(backend("add"))?;
        Ok(())
    }

    /// Commit the index. The committer comes from per-repo config; when
    /// `author` is given the commit carries it explicitly, otherwise the
    /// author equals the committer.
    ///
    /// # Errors
    ///
    /// [`GitError::NothingToCommit`] when the staged tree equals HEAD's.
    pub fn commit(&self, message: &str, author: Option<&Identity>) -> Result<Oid, GitError> {
        let mut index = self.repo.index().map_err(backend("commit"))?;
        let tree_id = index.write_tree().map_err(backend("commit"))?;
        let parent = self.head_commit()?;
        if let Some(ref p) = parent {
            if p.tree_id() == tree_id {
                return Err(GitError::NothingToCommit);
            }
        }
        let tree = self.repo.find_tree(tree_id).map_err(backend("commit"))?;
        let committer_id = self.identity()?;
        let committer = git2::Signature::now(&committer_id.name, &committer_id.email)
            .map_err(backend("commit"))?;
        let author_sig = match author {
            Some(id) => git2::Signature::now(&id.name, &id.email).map_err(backend("commit"))?,
            None => committer.clone(),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let id = self
            .repo
            .commit(Some("HEAD"), &author_sig, &committer, message, &tree, &parents)
            .map_err(backend("commit"))?;
        Ok(Oid::new(id.to_string())?)
    }

    /// Commit exactly `paths` on top of HEAD, regardless of what else is
    /// staged. Built on a side index so a user's staged-but-unrelated
    /// changes never leak into the commit; the real index is then brought
    /// in step for the committed paths.
    ///
    /// # Errors
    ///
    /// [`GitError::NothingToCommit`] when the paths leave HEAD's tree
    /// unchanged.
    pub fn commit_paths<S: AsRef<str>>(
        &self,
        message: &str,
        paths: &[S],
        author: Option<&Identity>,
    ) -> Result<Oid, GitError> {
        let mut index = git2::Index::new().map_err(backend("commit"))?;
        let parent = self.head_commit()?;
        if let Some(ref p) = parent {
            let tree = p.tree().map_err(backend("commit"))?;
            index.read_tree(&tree).map_err(backend("commit"))?;
        }
        for rel in paths {
            let rel = rel.as_ref();
            let blob_id = self
                .repo
                .blob_path(&self.root.join(rel))
                .map_err(backend("commit"))?;
            let entry = git2::IndexEntry {
                ctime: git2::IndexTime::new(0, 0),
                mtime: git2::IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                file_size: 0,
                id: blob_id,
                flags: 0,
                flags_extended: 0,
                path: rel.as_bytes().to_vec(),
            };
            index.add(&entry).map_err(backend("commit"))?;
        }
        let tree_id = index
            .write_tree_to(&self.repo)
            .map_err(backend("commit"))?;
        if let Some(ref p) = parent {
            if p.tree_id() == tree_id {
                return Err(GitError::NothingToCommit);
            }
        }
        let tree = self.repo.find_tree(tree_id).map_err(backend("commit"))?;
        let committer_id = self.identity()?;
        let committer = git2::Signature::now(&committer_id.name, &committer_id.email)
            .map_err(backend("commit"))?;
        let author_sig = match author {
            Some(id) => git2::Signature::now(&id.name, &id.email).map_err(backend("commit"))?,
            None => committer.clone(),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let id = self
            .repo
            .commit(Some("HEAD"), &author_sig, &committer, message, &tree, &parents)
            .map_err(backend("commit"))?;
        self.stage_paths(paths)?;
        Ok(Oid::new(id.to_string())?)
    }

    /// Per-path commit history, newest first, capped at `limit`.
    /// With `path = None` the full log is returned.
    pub fn history(&self, path: Option<&str>, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }
        let mut walk = self.repo.revwalk().map_err(backend("log"))?;
        walk.push_head().map_err(backend("log"))?;
        walk.set_sorting(git2::Sort::TIME).map_err(backend("log"))?;

        let mut out = Vec::new();
        for id in walk {
            if out.len() >= limit {
                break;
            }
            let id = id.map_err(backend("log"))?;
            let commit = self.repo.find_commit(id).map_err(backend("log"))?;
            if let Some(rel) = path {
                let here = self.tree_blob_id(&commit, rel)?;
                let before = match commit.parent(0) {
                    Ok(parent) => self.tree_blob_id(&parent, rel)?,
                    Err(_) => None,
                };
                if here == before {
                    continue;
                }
            }
            let author = commit.author();
            let committer = commit.committer();
            let time = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_else(Utc::now);
            out.push(CommitInfo {
                id: Oid::new(id.to_string())?,
                author_name: author.name().unwrap_or("").to_string(),
                author_email: author.email().unwrap_or("").to_string(),
                committer_name: committer.name().unwrap_or("").to_string(),
                committer_email: committer.email().unwrap_or("").to_string(),
                time,
                summary: commit.summary().unwrap_or("").to_string(),
            });
        }
        Ok(out)
    }

    /// Distinct blob ids `rel` has pointed at across HEAD history, newest
    /// first. Walks at most `limit` commits. Used to decide which side of
    /// a both-committed divergence holds the older content.
    pub fn blob_history(&self, rel: &str, limit: usize) -> Result<Vec<Oid>, GitError> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }
        let mut walk = self.repo.revwalk().map_err(backend("log"))?;
        walk.push_head().map_err(backend("log"))?;
        walk.set_sorting(git2::Sort::TIME).map_err(backend("log"))?;

        let mut seen = Vec::new();
        for (walked, id) in walk.enumerate() {
            if walked >= limit {
                break;
            }
            let id = id.map_err(backend("log"))?;
            let commit = self.repo.find_commit(id).map_err(backend("log"))?;
            if let Some(blob) = self.tree_blob_id(&commit, rel)? {
                let oid = Oid::new(blob.to_string())?;
                if !seen.contains(&oid) {
                    seen.push(oid);
                }
            }
        }
        Ok(seen)
    }

    /// Whether the repository's ignore rules exclude `rel`.
    pub fn is_ignored(&self, rel: &str) -> Result<bool, GitError> {
        self.repo
            .status_should_ignore(Path::new(rel))
            .map_err(backend("status"))
    }

    fn tree_blob_id(
        &self,
        commit: &git2::Commit<'_>,
        rel: &str,
    ) -> Result<Option<git2::Oid>, GitError> {
        let tree = commit.tree().map_err(backend("log"))?;
        match tree.get_path(Path::new(rel)) {
            Ok(entry) => Ok(Some(entry.id())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(backend("log")(e)),
        }
    }

    /// Blob bytes of `rel` at revision `rev` (`show <rev>:<path>`), or
    /// `None` when the path is absent from that revision.
    pub fn blob_at(&self, rev: &str, rel: &str) -> Result<Option<Vec<u8>>, GitError> {
        let object = self.repo.revparse_single(rev).map_err(backend("show"))?;
        let commit = object.peel_to_commit().map_err(backend("show"))?;
        let tree = commit.tree().map_err(backend("show"))?;
        let entry = match tree.get_path(Path::new(rel)) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(backend("show")(e)),
        };
        let blob = entry
            .to_object(&self.repo)
            .map_err(backend("show"))?
            .peel_to_blob()
            .map_err(backend("show"))?;
        Ok(Some(blob.content().to_vec()))
    }
}
