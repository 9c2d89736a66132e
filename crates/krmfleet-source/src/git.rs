//! Git plumbing
//!
//! [`GitBackend`] is the seam between the registry and the actual git
//! implementation. [`GitCli`] drives the `git` executable; authentication is
//! passed through `GIT_SSH_COMMAND` with key material in short-lived temporary
//! files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::auth::GitAuth;
use crate::error::{Result, SourceError};

/// Operations the registry needs from git
pub trait GitBackend {
    /// Shallow-clone `uri` into `dest`
    fn clone_repo(&self, uri: &str, auth: &GitAuth, dest: &Path) -> Result<()>;

    /// Resolve a revision to a commit using only local data
    fn resolve_local(&self, repo: &Path, rev: &str) -> Result<Option<String>>;

    /// Fetch a branch, tag or commit from `origin`
    fn fetch_ref(&self, repo: &Path, auth: &GitAuth, rev: &str) -> Result<()>;

    /// Detached, forced checkout of a commit
    fn checkout(&self, repo: &Path, commit: &str) -> Result<()>;

    /// Public keys offered by the SSH agent, one OpenSSH line each
    fn agent_identities(&self) -> Result<Vec<String>>;
}

/// [`GitBackend`] spawning the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check that git can be executed
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|e| SourceError::GitUnavailable {
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(SourceError::GitUnavailable {
                message: format_git_error(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run(&self, dir: Option<&Path>, args: &[&str], auth: Option<&GitAuth>) -> Result<Output> {
        let ssh = match auth {
            Some(auth) => SshCommand::for_auth(auth)?,
            None => SshCommand::none(),
        };

        let mut cmd = Command::new(&self.program);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());
        if let Some(command) = &ssh.command {
            cmd.env("GIT_SSH_COMMAND", command);
        }

        debug!(args = ?args, dir = ?dir, "running git");
        let output = cmd.output().map_err(|e| SourceError::GitUnavailable {
            message: e.to_string(),
        })?;
        // key files must outlive the child process
        drop(ssh);
        Ok(output)
    }

    fn run_checked(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        auth: Option<&GitAuth>,
    ) -> Result<Output> {
        let output = self.run(dir, args, auth)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(SourceError::GitCommand {
                command: subcommand(args).to_string(),
                message: format_git_error(&output),
            })
        }
    }
}

impl GitBackend for GitCli {
    fn clone_repo(&self, uri: &str, auth: &GitAuth, dest: &Path) -> Result<()> {
        let dest = dest.to_str().ok_or_else(|| SourceError::GitCommand {
            command: "clone".to_string(),
            message: format!("destination {} is not valid UTF-8", dest.display()),
        })?;
        self.run_checked(
            None,
            &["clone", "--quiet", "--depth", "1", "--", uri, dest],
            Some(auth),
        )?;
        Ok(())
    }

    fn resolve_local(&self, repo: &Path, rev: &str) -> Result<Option<String>> {
        let candidates = [
            format!("{}^{{commit}}", rev),
            format!("refs/remotes/origin/{}^{{commit}}", rev),
        ];
        for candidate in &candidates {
            let output = self.run(
                Some(repo),
                &["rev-parse", "--verify", "--quiet", candidate.as_str()],
                None,
            )?;
            if output.status.success() {
                let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !hash.is_empty() {
                    return Ok(Some(hash));
                }
            }
        }
        Ok(None)
    }

    fn fetch_ref(&self, repo: &Path, auth: &GitAuth, rev: &str) -> Result<()> {
        let refspecs = [
            format!("+refs/heads/{0}:refs/remotes/origin/{0}", rev),
            format!("+refs/tags/{0}:refs/tags/{0}", rev),
            rev.to_string(),
        ];

        let mut last_error = None;
        for refspec in &refspecs {
            match self.run_checked(
                Some(repo),
                &["fetch", "--quiet", "--depth", "1", "origin", refspec.as_str()],
                Some(auth),
            ) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    debug!(refspec = %refspec, error = %e, "fetch attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SourceError::GitCommand {
            command: "fetch".to_string(),
            message: format!("nothing fetched for {}", rev),
        }))
    }

    fn checkout(&self, repo: &Path, commit: &str) -> Result<()> {
        self.run_checked(
            Some(repo),
            &[
                "-c",
                "advice.detachedHead=false",
                "checkout",
                "--quiet",
                "--force",
                "--detach",
                commit,
            ],
            None,
        )?;
        Ok(())
    }

    fn agent_identities(&self) -> Result<Vec<String>> {
        let output = Command::new("ssh-add")
            .arg("-L")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SourceError::AuthSetup {
                message: format!("listing SSH agent keys: {}", e),
            })?;

        // exit code 1 means the agent holds no identities
        if !output.status.success() {
            if output.status.code() == Some(1) {
                return Ok(Vec::new());
            }
            return Err(SourceError::AuthSetup {
                message: format!("listing SSH agent keys: {}", format_git_error(&output)),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// `GIT_SSH_COMMAND` value plus the temporary key file it points at
///
/// The key file is deleted when this guard is dropped.
struct SshCommand {
    command: Option<String>,
    _key_file: Option<NamedTempFile>,
}

impl SshCommand {
    fn none() -> Self {
        Self {
            command: None,
            _key_file: None,
        }
    }

    fn for_auth(auth: &GitAuth) -> Result<Self> {
        let base = "ssh -o BatchMode=yes -o StrictHostKeyChecking=accept-new";
        match auth {
            GitAuth::Anonymous => Ok(Self::none()),
            GitAuth::SshAgent { username } => Ok(Self {
                command: Some(format!("{} -o User={}", base, shell_quote(username))),
                _key_file: None,
            }),
            GitAuth::SshAgentIdentity {
                username,
                public_key,
            } => {
                let file = key_file(public_key.as_bytes())?;
                Ok(Self {
                    command: Some(format!(
                        "{} -o User={} -o IdentitiesOnly=yes -i {}",
                        base,
                        shell_quote(username),
                        shell_quote(&file.path().to_string_lossy())
                    )),
                    _key_file: Some(file),
                })
            }
            GitAuth::SshPrivateKey {
                username,
                private_key,
            } => {
                let file = key_file(private_key)?;
                Ok(Self {
                    command: Some(format!(
                        "{} -o User={} -o IdentitiesOnly=yes -o IdentityAgent=none -i {}",
                        base,
                        shell_quote(username),
                        shell_quote(&file.path().to_string_lossy())
                    )),
                    _key_file: Some(file),
                })
            }
        }
    }
}

/// Write key material to an owner-only temporary file
fn key_file(contents: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("krmfleet-key-")
        .tempfile()
        .map_err(|e| SourceError::AuthSetup {
            message: format!("creating key file: {}", e),
        })?;
    file.write_all(contents)?;
    if !contents.ends_with(b"\n") {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file)
}

/// The git subcommand in an argument list, skipping `-c key=value` pairs
fn subcommand<'a>(args: &[&'a str]) -> &'a str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
        } else if !arg.starts_with('-') {
            return arg;
        }
    }
    ""
}

/// Quote a value for the shell that git runs `GIT_SSH_COMMAND` with
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Git's stderr (or stdout, or the exit code) as a single message
fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn git_available() -> bool {
        GitCli::new().version().is_ok()
    }

    /// Upstream repo with `main` (one commit) and, after cloning, a `feature` branch
    fn upstream_repo(dir: &Path) {
        fs::create_dir_all(dir.join("pkg")).unwrap();
        fs::write(dir.join("pkg/app.yaml"), "kind: ConfigMap\n").unwrap();
        git(dir, &["init", "--quiet", "--initial-branch=main"]);
        git(dir, &["add", "."]);
        git(dir, &["commit", "--quiet", "-m", "initial"]);
    }

    #[test]
    fn test_subcommand() {
        assert_eq!(subcommand(&["-c", "advice.detachedHead=false", "checkout", "x"]), "checkout");
        assert_eq!(subcommand(&["clone", "--depth", "1"]), "clone");
        assert_eq!(subcommand(&[]), "");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("git"), "'git'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_private_key_command_uses_key_file() {
        let auth = GitAuth::SshPrivateKey {
            username: "deploy".to_string(),
            private_key: b"KEY".to_vec(),
        };
        let ssh = SshCommand::for_auth(&auth).unwrap();
        let command = ssh.command.clone().unwrap();
        assert!(command.contains("-o User='deploy'"));
        assert!(command.contains("IdentitiesOnly=yes"));

        let path = ssh._key_file.as_ref().unwrap().path().to_path_buf();
        assert_eq!(fs::read(&path).unwrap(), b"KEY\n");
        drop(ssh);
        assert!(!path.exists());
    }

    #[test]
    fn test_anonymous_has_no_ssh_command() {
        assert!(SshCommand::for_auth(&GitAuth::Anonymous).unwrap().command.is_none());
    }

    #[test]
    fn test_clone_fetch_checkout() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let origin = tmp.path().join("origin");
        upstream_repo(&origin);
        let uri = format!("file://{}", origin.display());

        let cli = GitCli::new();
        let work = tmp.path().join("work");
        cli.clone_repo(&uri, &GitAuth::Anonymous, &work).unwrap();

        let head = cli.resolve_local(&work, "HEAD").unwrap().unwrap();
        assert_eq!(cli.resolve_local(&work, "main").unwrap(), Some(head.clone()));
        assert_eq!(cli.resolve_local(&work, "feature").unwrap(), None);

        // branch created after the shallow clone needs a fetch
        git(&origin, &["checkout", "--quiet", "-b", "feature"]);
        fs::write(origin.join("pkg/app.yaml"), "kind: Secret\n").unwrap();
        git(&origin, &["commit", "--quiet", "-am", "feature"]);
        git(&origin, &["tag", "v1"]);

        cli.fetch_ref(&work, &GitAuth::Anonymous, "feature").unwrap();
        let feature = cli.resolve_local(&work, "feature").unwrap().unwrap();
        assert_ne!(feature, head);

        cli.checkout(&work, &feature).unwrap();
        assert_eq!(fs::read_to_string(work.join("pkg/app.yaml")).unwrap(), "kind: Secret\n");

        cli.fetch_ref(&work, &GitAuth::Anonymous, "v1").unwrap();
        assert_eq!(cli.resolve_local(&work, "v1").unwrap(), Some(feature));

        cli.checkout(&work, &head).unwrap();
        assert_eq!(fs::read_to_string(work.join("pkg/app.yaml")).unwrap(), "kind: ConfigMap\n");

        assert!(cli.fetch_ref(&work, &GitAuth::Anonymous, "does-not-exist").is_err());
    }

    #[test]
    fn test_clone_failure_reports_git_error() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let err = GitCli::new()
            .clone_repo(
                &format!("file://{}/missing", tmp.path().display()),
                &GitAuth::Anonymous,
                &tmp.path().join("work"),
            )
            .unwrap_err();
        assert!(matches!(err, SourceError::GitCommand { ref command, .. } if command == "clone"));
    }
}
