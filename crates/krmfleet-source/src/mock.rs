//! Mock git backend for testing
//!
//! Repositories live in memory; clones and checkouts write real files so the
//! materializer can be exercised end to end without a git binary or network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::auth::GitAuth;
use crate::error::{Result, SourceError};
use crate::git::GitBackend;

/// An in-memory upstream repository
#[derive(Debug, Clone, Default)]
pub struct MockRepo {
    uri: String,
    head: Option<String>,
    /// ref name -> commit
    refs: HashMap<String, String>,
    /// refs that a shallow clone does not carry
    remote_only: HashSet<String>,
    /// commit -> (path -> content)
    commits: HashMap<String, BTreeMap<String, Vec<u8>>>,
    /// when set, only this agent key or an explicit private key may clone
    authorized_key: Option<String>,
}

impl MockRepo {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Add a commit with its complete file tree
    pub fn with_commit(mut self, commit: &str, files: &[(&str, &str)]) -> Self {
        let tree = files
            .iter()
            .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
            .collect();
        self.commits.insert(commit.to_string(), tree);
        self
    }

    /// Add a ref present in a fresh clone; the first one becomes HEAD
    pub fn with_ref(mut self, name: &str, commit: &str) -> Self {
        if self.head.is_none() {
            self.head = Some(commit.to_string());
        }
        self.refs.insert(name.to_string(), commit.to_string());
        self
    }

    /// Add a ref that must be fetched before it resolves
    pub fn with_remote_ref(mut self, name: &str, commit: &str) -> Self {
        self.refs.insert(name.to_string(), commit.to_string());
        self.remote_only.insert(name.to_string());
        self
    }

    /// Require a specific agent key
    pub fn with_authorized_key(mut self, public_key: &str) -> Self {
        self.authorized_key = Some(public_key.to_string());
        self
    }

    fn accepts(&self, auth: &GitAuth) -> bool {
        match (&self.authorized_key, auth) {
            (None, _) => true,
            (Some(key), GitAuth::SshAgentIdentity { public_key, .. }) => key == public_key,
            (Some(_), GitAuth::SshPrivateKey { .. }) => true,
            (Some(_), _) => false,
        }
    }
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    /// Successful clones
    pub clones: usize,
    /// Every clone attempt, including rejected ones
    pub clone_attempts: usize,
    pub fetches: usize,
    pub checkouts: usize,
    pub resolves: usize,
}

#[derive(Debug, Default)]
struct MockState {
    repos: HashMap<String, MockRepo>,
    /// working copy -> uri it was cloned from
    clones: HashMap<PathBuf, String>,
    /// working copy -> refs fetched into it
    fetched: HashMap<PathBuf, HashSet<String>>,
    agent_keys: Vec<String>,
    failing_checkouts: HashSet<String>,
    clone_auths: Vec<GitAuth>,
}

/// In-memory [`GitBackend`]
#[derive(Clone, Default)]
pub struct MockGitBackend {
    state: Arc<Mutex<MockState>>,
    operations: Arc<Mutex<OperationCounts>>,
}

impl MockGitBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(self, repo: MockRepo) -> Self {
        self.state
            .lock()
            .unwrap()
            .repos
            .insert(repo.uri.clone(), repo);
        self
    }

    /// Keys the simulated SSH agent offers, in order
    pub fn with_agent_keys(self, keys: &[&str]) -> Self {
        self.state.lock().unwrap().agent_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Make every checkout of `commit` fail
    pub fn fail_checkout(&self, commit: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_checkouts
            .insert(commit.to_string());
    }

    /// Allow checkouts of `commit` again
    pub fn allow_checkout(&self, commit: &str) {
        self.state.lock().unwrap().failing_checkouts.remove(commit);
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.lock().unwrap().clone()
    }

    /// Auth used by every clone attempt, in order
    pub fn clone_auths(&self) -> Vec<GitAuth> {
        self.state.lock().unwrap().clone_auths.clone()
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut self.operations.lock().unwrap());
    }
}

fn command_error(command: &str, message: impl Into<String>) -> SourceError {
    SourceError::GitCommand {
        command: command.to_string(),
        message: message.into(),
    }
}

/// Replace everything but `.git` in `dest` with `files`
fn write_tree(dest: &Path, files: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    if dest.exists() {
        for entry in fs::read_dir(dest)? {
            let entry = entry?;
            if entry.file_name() == ".git" {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
    }
    for (path, content) in files {
        let target = dest.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, content)?;
    }
    Ok(())
}

impl GitBackend for MockGitBackend {
    fn clone_repo(&self, uri: &str, auth: &GitAuth, dest: &Path) -> Result<()> {
        self.count(|c| c.clone_attempts += 1);
        let mut state = self.state.lock().unwrap();
        state.clone_auths.push(auth.clone());

        let repo = state
            .repos
            .get(uri)
            .ok_or_else(|| command_error("clone", format!("repository '{}' not found", uri)))?;
        if !repo.accepts(auth) {
            return Err(command_error("clone", "Permission denied (publickey)"));
        }
        let head = repo
            .head
            .clone()
            .ok_or_else(|| command_error("clone", "remote HEAD refers to nonexistent ref"))?;
        let files = repo.commits.get(&head).cloned().unwrap_or_default();

        fs::create_dir_all(dest.join(".git"))?;
        fs::write(dest.join(".git/HEAD"), format!("{}\n", head))?;
        write_tree(dest, &files)?;

        state.clones.insert(dest.to_path_buf(), uri.to_string());
        drop(state);
        self.count(|c| c.clones += 1);
        Ok(())
    }

    fn resolve_local(&self, repo: &Path, rev: &str) -> Result<Option<String>> {
        self.count(|c| c.resolves += 1);
        let state = self.state.lock().unwrap();
        let uri = state
            .clones
            .get(repo)
            .ok_or_else(|| command_error("rev-parse", "not a git repository"))?;
        let Some(upstream) = state.repos.get(uri) else {
            return Ok(None);
        };
        let fetched = state.fetched.get(repo);
        let is_fetched = |name: &str| fetched.is_some_and(|f| f.contains(name));

        if rev == "HEAD" {
            return Ok(upstream.head.clone());
        }
        if let Some(commit) = upstream.refs.get(rev) {
            if !upstream.remote_only.contains(rev) || is_fetched(rev) {
                return Ok(Some(commit.clone()));
            }
            return Ok(None);
        }
        if upstream.commits.contains_key(rev)
            && (upstream.head.as_deref() == Some(rev) || is_fetched(rev))
        {
            return Ok(Some(rev.to_string()));
        }
        Ok(None)
    }

    fn fetch_ref(&self, repo: &Path, _auth: &GitAuth, rev: &str) -> Result<()> {
        self.count(|c| c.fetches += 1);
        let mut state = self.state.lock().unwrap();
        let uri = state
            .clones
            .get(repo)
            .cloned()
            .ok_or_else(|| command_error("fetch", "not a git repository"))?;
        let known = state
            .repos
            .get(&uri)
            .is_some_and(|r| r.refs.contains_key(rev) || r.commits.contains_key(rev));
        if !known {
            return Err(command_error(
                "fetch",
                format!("couldn't find remote ref {}", rev),
            ));
        }
        state
            .fetched
            .entry(repo.to_path_buf())
            .or_default()
            .insert(rev.to_string());
        Ok(())
    }

    fn checkout(&self, repo: &Path, commit: &str) -> Result<()> {
        self.count(|c| c.checkouts += 1);
        let state = self.state.lock().unwrap();
        if state.failing_checkouts.contains(commit) {
            return Err(command_error(
                "checkout",
                format!("unable to checkout {}", commit),
            ));
        }
        let uri = state
            .clones
            .get(repo)
            .ok_or_else(|| command_error("checkout", "not a git repository"))?;
        let files = state
            .repos
            .get(uri)
            .and_then(|r| r.commits.get(commit))
            .ok_or_else(|| {
                command_error("checkout", format!("reference is not a tree: {}", commit))
            })?;
        write_tree(repo, files)
    }

    fn agent_identities(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().agent_keys.clone())
    }
}
