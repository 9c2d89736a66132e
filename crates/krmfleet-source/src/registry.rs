//! Source registry
//!
//! Holds one [`PackageSource`] (a local working copy) per distinct upstream
//! identity for the duration of a run. Upstreams are cloned the first time
//! they are resolved and checked out on demand afterwards.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use krmfleet_core::{FnResult, GitAuthMethod, Results, SourceRef, Upstream};

use crate::auth::{GitAuth, key_summary};
use crate::credentials::{CredentialProvider, git_auth};
use crate::error::{Result, SourceError};
use crate::git::{GitBackend, GitCli};

/// Ref a fresh clone is considered to be at
const HEAD: &str = "HEAD";

/// Normalize a repository URI for identity comparison
///
/// Surrounding whitespace, trailing slashes and a trailing `.git` are not
/// significant.
pub fn canonical_repo(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

/// What makes two upstream declarations share a working copy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamIdentity {
    repo: String,
    auth_method: GitAuthMethod,
    /// `namespace/name` of the credential object, if any
    credential: Option<String>,
}

impl UpstreamIdentity {
    pub fn from_upstream(upstream: &Upstream) -> Self {
        let git = &upstream.git;
        Self {
            repo: canonical_repo(&git.repo),
            auth_method: git.auth_method,
            credential: git
                .auth
                .as_ref()
                .map(|a| format!("{}/{}", a.namespace_or_default(), a.name)),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Stable directory name for this identity's working copy
    pub fn dir_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.repo.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.auth_method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.credential.as_deref().unwrap_or("").as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}

impl fmt::Display for UpstreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.repo, self.auth_method)?;
        if let Some(credential) = &self.credential {
            write!(f, " [{}]", credential)?;
        }
        Ok(())
    }
}

/// A local working copy of an upstream
#[derive(Debug)]
pub struct PackageSource {
    identity: UpstreamIdentity,
    /// URI as declared by the first upstream that created this source
    repo: String,
    path: PathBuf,
    auth: GitAuth,
    /// Checked-out ref and its commit
    current: (SourceRef, String),
    refs: BTreeSet<SourceRef>,
}

impl PackageSource {
    pub fn identity(&self) -> &UpstreamIdentity {
        &self.identity
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Root of the working copy
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn auth(&self) -> &GitAuth {
        &self.auth
    }

    pub fn current_ref(&self) -> &SourceRef {
        &self.current.0
    }

    pub fn current_commit(&self) -> &str {
        &self.current.1
    }

    /// Refs packages are expected to need from this source
    pub fn refs(&self) -> &BTreeSet<SourceRef> {
        &self.refs
    }
}

/// One working copy per upstream identity, cloned once per run
pub struct SourceRegistry<B: GitBackend = GitCli> {
    backend: B,
    base_dir: PathBuf,
    sources: HashMap<UpstreamIdentity, PackageSource>,
    results: Results,
}

impl<B: GitBackend> SourceRegistry<B> {
    /// Registry keeping its working copies under `base_dir`
    pub fn new(backend: B, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            base_dir: base_dir.into(),
            sources: HashMap::new(),
            results: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Existing working copy for an upstream
    pub fn get(&self, upstream: &Upstream) -> Option<&PackageSource> {
        self.sources.get(&UpstreamIdentity::from_upstream(upstream))
    }

    /// Progress messages collected since the last call
    pub fn take_results(&mut self) -> Results {
        std::mem::take(&mut self.results)
    }

    /// Return the working copy for `upstream`, cloning it on first use
    pub fn resolve(
        &mut self,
        upstream: &Upstream,
        credentials: &dyn CredentialProvider,
    ) -> Result<&PackageSource> {
        let identity = UpstreamIdentity::from_upstream(upstream);
        if self.sources.contains_key(&identity) {
            debug!(upstream = %upstream.name, identity = %identity, "reusing working copy");
            return self
                .sources
                .get(&identity)
                .ok_or_else(|| unknown_source(upstream));
        }

        let auth = git_auth(&upstream.git, credentials)?;
        let path = self.base_dir.join(identity.dir_name());
        if path.exists() {
            debug!(path = %path.display(), "removing stale working copy");
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&self.base_dir)?;

        let repo = upstream.git.repo.trim().to_string();
        let start = Instant::now();
        let auth = self.clone_with_retry(&repo, auth, &path)?;
        let head = self
            .backend
            .resolve_local(&path, HEAD)?
            .ok_or_else(|| SourceError::NoHead { path: path.clone() })?;
        let elapsed = start.elapsed();

        info!(repo = %repo, path = %path.display(), elapsed = ?elapsed, "cloned upstream");
        self.results
            .push(FnResult::info(format!("cloned {} in {:.2?}", repo, elapsed)));

        let source = PackageSource {
            identity: identity.clone(),
            repo,
            path,
            auth,
            current: (SourceRef::from(HEAD), head),
            refs: BTreeSet::new(),
        };
        Ok(self.sources.entry(identity).or_insert(source))
    }

    /// Record the refs packages will request from an upstream's working copy
    pub fn record_refs<'a>(
        &mut self,
        upstream: &Upstream,
        refs: impl IntoIterator<Item = &'a SourceRef>,
    ) -> Result<()> {
        let source = self
            .sources
            .get_mut(&UpstreamIdentity::from_upstream(upstream))
            .ok_or_else(|| unknown_source(upstream))?;
        source.refs.extend(refs.into_iter().cloned());
        debug!(
            repo = %source.repo,
            refs = ?source.refs.iter().map(SourceRef::as_str).collect::<Vec<_>>(),
            "recorded refs"
        );
        Ok(())
    }

    /// Check out `git_ref` in the upstream's working copy and return its commit
    ///
    /// Asking for the ref that is already checked out does nothing. The
    /// recorded ref only changes after a successful checkout.
    pub fn ensure_version(&mut self, upstream: &Upstream, git_ref: &SourceRef) -> Result<String> {
        let source = self
            .sources
            .get_mut(&UpstreamIdentity::from_upstream(upstream))
            .ok_or_else(|| unknown_source(upstream))?;

        if &source.current.0 == git_ref {
            debug!(repo = %source.repo, git_ref = %git_ref, "ref already checked out");
            return Ok(source.current.1.clone());
        }

        let start = Instant::now();
        let commit = match self.backend.resolve_local(&source.path, git_ref.as_str())? {
            Some(commit) => commit,
            None => {
                debug!(repo = %source.repo, git_ref = %git_ref, "ref not in working copy, fetching");
                self.backend
                    .fetch_ref(&source.path, &source.auth, git_ref.as_str())
                    .map_err(|e| SourceError::UnknownRef {
                        uri: source.repo.clone(),
                        git_ref: git_ref.to_string(),
                        message: e.detail(),
                    })?;
                self.backend
                    .resolve_local(&source.path, git_ref.as_str())?
                    .ok_or_else(|| SourceError::UnknownRef {
                        uri: source.repo.clone(),
                        git_ref: git_ref.to_string(),
                        message: "not found after fetch".to_string(),
                    })?
            }
        };

        self.backend
            .checkout(&source.path, &commit)
            .map_err(|e| SourceError::CheckoutFailed {
                uri: source.repo.clone(),
                git_ref: git_ref.to_string(),
                commit: commit.clone(),
                message: e.detail(),
            })?;
        source.current = (git_ref.clone(), commit.clone());

        let elapsed = start.elapsed();
        info!(repo = %source.repo, git_ref = %git_ref, commit = %commit, elapsed = ?elapsed, "checked out");
        self.results.push(FnResult::info(format!(
            "fetched {}@{} ({}) in {:.2?}",
            source.repo,
            git_ref,
            short_hash(&commit),
            elapsed
        )));
        Ok(commit)
    }

    /// Clone, retrying agent auth with each key the agent holds
    fn clone_with_retry(&self, repo: &str, auth: GitAuth, path: &Path) -> Result<GitAuth> {
        let err = match self.backend.clone_repo(repo, &auth, path) {
            Ok(()) => return Ok(auth),
            Err(err) => err,
        };

        let GitAuth::SshAgent { username } = &auth else {
            return Err(clone_failed(repo, &auth, &err));
        };

        let identities = self.backend.agent_identities().map_err(|e| {
            SourceError::CloneFailed {
                uri: repo.to_string(),
                auth_method: auth.method().to_string(),
                message: format!("{}; no agent keys to retry with: {}", err.detail(), e),
            }
        })?;

        for public_key in identities {
            warn!(repo = %repo, key = %key_summary(&public_key), "retrying clone with agent key");
            if path.exists() {
                fs::remove_dir_all(path)?;
            }
            let candidate = GitAuth::SshAgentIdentity {
                username: username.clone(),
                public_key,
            };
            match self.backend.clone_repo(repo, &candidate, path) {
                Ok(()) => return Ok(candidate),
                Err(e) => debug!(repo = %repo, error = %e, "agent key rejected"),
            }
        }

        Err(clone_failed(repo, &auth, &err))
    }
}

fn clone_failed(repo: &str, auth: &GitAuth, err: &SourceError) -> SourceError {
    SourceError::CloneFailed {
        uri: repo.to_string(),
        auth_method: auth.method().to_string(),
        message: err.detail(),
    }
}

fn unknown_source(upstream: &Upstream) -> SourceError {
    SourceError::UnknownSource {
        upstream: upstream.name.to_string(),
        uri: upstream.git.repo.clone(),
    }
}

fn short_hash(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{NoCredentials, SecretCredentials};
    use crate::mock::{MockGitBackend, MockRepo, OperationCounts};
    use krmfleet_core::{AuthRef, KubeObject, UpstreamGit, UpstreamId};
    use tempfile::TempDir;

    const REPO: &str = "https://example.com/catalog.git";

    fn upstream(name: &str, repo: &str) -> Upstream {
        Upstream {
            name: UpstreamId::from(name),
            git: UpstreamGit {
                repo: repo.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn catalog() -> MockRepo {
        MockRepo::new(REPO)
            .with_commit("c1", &[("p1/a.yaml", "a: 1\n")])
            .with_commit("c2", &[("p1/a.yaml", "a: 2\n")])
            .with_commit("c3", &[("p1/a.yaml", "a: 3\n")])
            .with_ref("main", "c1")
            .with_ref("v2", "c2")
            .with_remote_ref("feature", "c3")
    }

    fn registry(tmp: &TempDir, backend: &MockGitBackend) -> SourceRegistry<MockGitBackend> {
        SourceRegistry::new(backend.clone(), tmp.path().join("in"))
    }

    #[test]
    fn test_canonical_repo() {
        assert_eq!(canonical_repo(" https://example.com/repo.git/ "), "https://example.com/repo");
        assert_eq!(canonical_repo("https://example.com/repo"), "https://example.com/repo");
        assert_eq!(canonical_repo("git@example.com:org/repo.git"), "git@example.com:org/repo");
    }

    #[test]
    fn test_identity_equivalence() {
        let a = UpstreamIdentity::from_upstream(&upstream("a", "https://example.com/repo.git"));
        let b = UpstreamIdentity::from_upstream(&upstream("b", "https://example.com/repo/"));
        assert_eq!(a, b);
        assert_eq!(a.dir_name(), b.dir_name());
        assert_eq!(a.dir_name().len(), 16);

        let mut keyed = upstream("c", "https://example.com/repo.git");
        keyed.git.auth_method = GitAuthMethod::SshPrivateKey;
        keyed.git.auth = Some(AuthRef {
            kind: "Secret".to_string(),
            name: "key".to_string(),
            namespace: None,
        });
        let c = UpstreamIdentity::from_upstream(&keyed);
        assert_ne!(a, c);
        assert_ne!(a.dir_name(), c.dir_name());
        assert_eq!(c.to_string(), "https://example.com/repo (sshPrivateKey) [default/key]");
    }

    #[test]
    fn test_resolve_clones_once() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let mut registry = registry(&tmp, &backend);

        let first = upstream("first", REPO);
        let second = upstream("second", "https://example.com/catalog");

        let path = registry.resolve(&first, &NoCredentials).unwrap().path().to_path_buf();
        let again = registry.resolve(&second, &NoCredentials).unwrap().path().to_path_buf();
        assert_eq!(path, again);
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.operation_counts().clones, 1);

        let source = registry.get(&first).unwrap();
        assert_eq!(source.current_ref().as_str(), "HEAD");
        assert_eq!(source.current_commit(), "c1");
        assert!(source.path().join("p1/a.yaml").exists());

        let results = registry.take_results();
        assert_eq!(results.len(), 1);
        assert!(results[0].message.starts_with("cloned https://example.com/catalog.git in "));
        assert!(registry.take_results().is_empty());
    }

    #[test]
    fn test_ensure_version_short_circuits() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let mut registry = registry(&tmp, &backend);
        let up = upstream("catalog", REPO);
        registry.resolve(&up, &NoCredentials).unwrap();

        let main = SourceRef::from("main");
        assert_eq!(registry.ensure_version(&up, &main).unwrap(), "c1");
        assert_eq!(registry.ensure_version(&up, &main).unwrap(), "c1");

        let counts = backend.operation_counts();
        assert_eq!(counts.checkouts, 1);
        assert_eq!(counts.fetches, 0);
    }

    #[test]
    fn test_ensure_version_switches_and_fetches() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let mut registry = registry(&tmp, &backend);
        let up = upstream("catalog", REPO);
        let path = registry.resolve(&up, &NoCredentials).unwrap().path().to_path_buf();

        assert_eq!(registry.ensure_version(&up, &SourceRef::from("v2")).unwrap(), "c2");
        assert_eq!(std::fs::read_to_string(path.join("p1/a.yaml")).unwrap(), "a: 2\n");

        assert_eq!(registry.ensure_version(&up, &SourceRef::from("feature")).unwrap(), "c3");
        assert_eq!(std::fs::read_to_string(path.join("p1/a.yaml")).unwrap(), "a: 3\n");

        let counts = backend.operation_counts();
        assert_eq!(
            counts,
            OperationCounts {
                clones: 1,
                clone_attempts: 1,
                fetches: 1,
                checkouts: 2,
                resolves: 4,
            }
        );
    }

    #[test]
    fn test_unknown_ref() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let mut registry = registry(&tmp, &backend);
        let up = upstream("catalog", REPO);
        registry.resolve(&up, &NoCredentials).unwrap();

        let err = registry
            .ensure_version(&up, &SourceRef::from("missing"))
            .unwrap_err();
        assert!(matches!(err, SourceError::UnknownRef { ref git_ref, .. } if git_ref == "missing"));
        assert_eq!(registry.get(&up).unwrap().current_ref().as_str(), "HEAD");
    }

    #[test]
    fn test_failed_checkout_keeps_state() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let mut registry = registry(&tmp, &backend);
        let up = upstream("catalog", REPO);
        registry.resolve(&up, &NoCredentials).unwrap();
        registry.ensure_version(&up, &SourceRef::from("main")).unwrap();

        backend.fail_checkout("c2");
        let v2 = SourceRef::from("v2");
        let err = registry.ensure_version(&up, &v2).unwrap_err();
        assert!(matches!(err, SourceError::CheckoutFailed { .. }));

        let source = registry.get(&up).unwrap();
        assert_eq!(source.current_ref().as_str(), "main");
        assert_eq!(source.current_commit(), "c1");

        // the failed ref is retried rather than treated as checked out
        backend.allow_checkout("c2");
        assert_eq!(registry.ensure_version(&up, &v2).unwrap(), "c2");
        assert_eq!(backend.operation_counts().checkouts, 3);
    }

    #[test]
    fn test_missing_source_is_reported() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let mut registry = registry(&tmp, &backend);
        let err = registry
            .ensure_version(&upstream("catalog", REPO), &SourceRef::from("main"))
            .unwrap_err();
        assert!(matches!(err, SourceError::UnknownSource { .. }));
    }

    #[test]
    fn test_clone_failure_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new();
        let mut registry = registry(&tmp, &backend);

        let err = registry
            .resolve(&upstream("gone", "https://example.com/gone.git"), &NoCredentials)
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::CloneFailed { .. }));
        assert!(err.to_string().contains("https://example.com/gone.git"));
        assert_eq!(backend.operation_counts().clone_attempts, 1);
    }

    #[test]
    fn test_agent_retries_each_key() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new()
            .with_repo(catalog().with_authorized_key("ssh-ed25519 BBBB deploy"))
            .with_agent_keys(&["ssh-ed25519 AAAA personal", "ssh-ed25519 BBBB deploy"]);
        let mut registry = registry(&tmp, &backend);

        let mut up = upstream("catalog", REPO);
        up.git.auth_method = GitAuthMethod::SshAgent;

        let source = registry.resolve(&up, &NoCredentials).unwrap();
        assert_eq!(
            source.auth(),
            &GitAuth::SshAgentIdentity {
                username: "git".to_string(),
                public_key: "ssh-ed25519 BBBB deploy".to_string(),
            }
        );

        let auths = backend.clone_auths();
        assert_eq!(auths.len(), 3);
        assert_eq!(auths[0], GitAuth::ssh_agent());
        assert_eq!(backend.operation_counts().clones, 1);
    }

    #[test]
    fn test_agent_retry_exhausted() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new()
            .with_repo(catalog().with_authorized_key("ssh-ed25519 CCCC other"))
            .with_agent_keys(&["ssh-ed25519 AAAA personal"]);
        let mut registry = registry(&tmp, &backend);

        let mut up = upstream("catalog", REPO);
        up.git.auth_method = GitAuthMethod::SshAgent;

        let err = registry.resolve(&up, &NoCredentials).err().unwrap();
        assert!(matches!(err, SourceError::CloneFailed { ref auth_method, .. } if auth_method == "sshAgent"));
        assert_eq!(backend.operation_counts().clone_attempts, 2);
    }

    #[test]
    fn test_private_key_from_secret() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new()
            .with_repo(catalog().with_authorized_key("ssh-ed25519 CCCC other"));
        let mut registry = registry(&tmp, &backend);

        let items: Vec<KubeObject> = serde_yaml::from_str(
            r#"
- apiVersion: v1
  kind: Secret
  metadata:
    name: git-key
    namespace: infra
  data:
    ssh-username: Z2l0
    ssh-privatekey: UFJJVkFURSBLRVk=
"#,
        )
        .unwrap();

        let mut up = upstream("catalog", REPO);
        up.git.auth_method = GitAuthMethod::SshPrivateKey;
        up.git.auth = Some(AuthRef {
            kind: "Secret".to_string(),
            name: "git-key".to_string(),
            namespace: Some("infra".to_string()),
        });

        let source = registry.resolve(&up, &SecretCredentials::new(&items)).unwrap();
        assert_eq!(source.auth().method(), "sshPrivateKey");
        assert_eq!(source.auth().username(), Some("git"));
    }

    #[test]
    fn test_stale_working_copy_removed() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let up = upstream("catalog", REPO);

        let stale = tmp
            .path()
            .join("in")
            .join(UpstreamIdentity::from_upstream(&up).dir_name());
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("leftover.yaml"), "x: 1\n").unwrap();

        let mut registry = registry(&tmp, &backend);
        registry.resolve(&up, &NoCredentials).unwrap();
        assert!(!stale.join("leftover.yaml").exists());
        assert!(stale.join("p1/a.yaml").exists());
    }

    #[test]
    fn test_record_refs() {
        let tmp = TempDir::new().unwrap();
        let backend = MockGitBackend::new().with_repo(catalog());
        let mut registry = registry(&tmp, &backend);
        let up = upstream("catalog", REPO);
        registry.resolve(&up, &NoCredentials).unwrap();

        let refs: BTreeSet<SourceRef> = ["main", "v2"].into_iter().map(SourceRef::from).collect();
        registry.record_refs(&up, &refs).unwrap();
        assert_eq!(registry.get(&up).unwrap().refs(), &refs);
    }
}
