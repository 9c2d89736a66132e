//! Credential lookup for git upstreams
//!
//! Keys for `sshPrivateKey` upstreams come from `v1/Secret` objects carried in
//! the resource list, addressed by name and namespace.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use krmfleet_core::{AuthRef, GitAuthMethod, KubeObject, UpstreamGit};

use crate::auth::{DEFAULT_SSH_USER, GitAuth};
use crate::error::{Result, SourceError};

/// Secret data key holding the SSH user
pub const SSH_USERNAME_KEY: &str = "ssh-username";

/// Secret data key holding the SSH private key
pub const SSH_PRIVATE_KEY_KEY: &str = "ssh-privatekey";

/// Decoded SSH credentials
#[derive(Clone)]
pub struct SshCredentials {
    pub username: String,
    pub private_key: Vec<u8>,
}

/// Source of credentials referenced from upstream declarations
pub trait CredentialProvider {
    fn ssh_credentials(&self, auth: &AuthRef) -> Result<SshCredentials>;
}

/// Looks credentials up in `Secret` items of a resource list
pub struct SecretCredentials<'a> {
    items: &'a [KubeObject],
}

impl<'a> SecretCredentials<'a> {
    pub fn new(items: &'a [KubeObject]) -> Self {
        Self { items }
    }

    fn find_secret(&self, name: &str, namespace: &str) -> Option<&'a KubeObject> {
        self.items.iter().find(|item| {
            item.is_gvk("v1", "Secret")
                && item.name() == Some(name)
                && secret_namespace(item) == namespace
        })
    }
}

fn secret_namespace(item: &KubeObject) -> &str {
    match item.namespace() {
        Some(ns) if !ns.is_empty() => ns,
        _ => "default",
    }
}

impl CredentialProvider for SecretCredentials<'_> {
    fn ssh_credentials(&self, auth: &AuthRef) -> Result<SshCredentials> {
        let namespace = auth.namespace_or_default();
        let secret =
            self.find_secret(&auth.name, namespace)
                .ok_or_else(|| SourceError::SecretNotFound {
                    namespace: namespace.to_string(),
                    name: auth.name.clone(),
                })?;

        let decode = |key: &str| -> Result<Vec<u8>> {
            let encoded = secret.get_str(&["data", key]).ok_or_else(|| {
                SourceError::SecretKeyMissing {
                    namespace: namespace.to_string(),
                    name: auth.name.clone(),
                    key: key.to_string(),
                }
            })?;
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| SourceError::SecretDecode {
                    namespace: namespace.to_string(),
                    name: auth.name.clone(),
                    key: key.to_string(),
                    message: e.to_string(),
                })
        };

        let username = decode(SSH_USERNAME_KEY)?;
        let private_key = decode(SSH_PRIVATE_KEY_KEY)?;

        Ok(SshCredentials {
            username: String::from_utf8_lossy(&username).trim().to_string(),
            private_key,
        })
    }
}

/// Provider for runs without a resource list
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn ssh_credentials(&self, auth: &AuthRef) -> Result<SshCredentials> {
        Err(SourceError::SecretNotFound {
            namespace: auth.namespace_or_default().to_string(),
            name: auth.name.clone(),
        })
    }
}

/// Turn an upstream's declared auth into concrete git auth
pub fn git_auth(git: &UpstreamGit, provider: &dyn CredentialProvider) -> Result<GitAuth> {
    match git.auth_method {
        GitAuthMethod::None => Ok(GitAuth::Anonymous),
        GitAuthMethod::SshAgent => Ok(GitAuth::ssh_agent()),
        GitAuthMethod::SshPrivateKey => {
            let auth = git.auth.as_ref().ok_or_else(|| SourceError::AuthSetup {
                message: format!("{}: sshPrivateKey requires an auth reference", git.repo),
            })?;
            let creds = provider.ssh_credentials(auth)?;
            let username = if creds.username.is_empty() {
                DEFAULT_SSH_USER.to_string()
            } else {
                creds.username
            };
            Ok(GitAuth::SshPrivateKey {
                username,
                private_key: creds.private_key,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ssh-username: git, ssh-privatekey: "PRIVATE KEY"
    const ITEMS: &str = r#"
- apiVersion: v1
  kind: Secret
  metadata:
    name: git-key
  data:
    ssh-username: Z2l0
    ssh-privatekey: UFJJVkFURSBLRVk=
- apiVersion: v1
  kind: Secret
  metadata:
    name: git-key
    namespace: team-a
  data:
    ssh-username: dGVhbS1h
    ssh-privatekey: dGVhbS1hLWtleQ==
- apiVersion: v1
  kind: Secret
  metadata:
    name: broken
  data:
    ssh-username: '!!!'
- apiVersion: v1
  kind: ConfigMap
  metadata:
    name: not-a-secret
  data:
    ssh-username: Z2l0
"#;

    fn items() -> Vec<KubeObject> {
        serde_yaml::from_str(ITEMS).unwrap()
    }

    fn auth_ref(name: &str, namespace: Option<&str>) -> AuthRef {
        AuthRef {
            kind: "Secret".to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    #[test]
    fn test_lookup_default_namespace() {
        let items = items();
        let creds = SecretCredentials::new(&items)
            .ssh_credentials(&auth_ref("git-key", None))
            .unwrap();
        assert_eq!(creds.username, "git");
        assert_eq!(creds.private_key, b"PRIVATE KEY");
    }

    #[test]
    fn test_lookup_explicit_namespace() {
        let items = items();
        let creds = SecretCredentials::new(&items)
            .ssh_credentials(&auth_ref("git-key", Some("team-a")))
            .unwrap();
        assert_eq!(creds.username, "team-a");
        assert_eq!(creds.private_key, b"team-a-key");
    }

    #[test]
    fn test_missing_secret() {
        let items = items();
        let provider = SecretCredentials::new(&items);

        let err = provider
            .ssh_credentials(&auth_ref("git-key", Some("other")))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::SecretNotFound { .. }));

        let err = provider
            .ssh_credentials(&auth_ref("not-a-secret", None))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Auth Secret default/not-a-secret not found");
    }

    #[test]
    fn test_undecodable_and_missing_keys() {
        let items = items();
        let err = SecretCredentials::new(&items)
            .ssh_credentials(&auth_ref("broken", None))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::SecretDecode { ref key, .. } if key == SSH_USERNAME_KEY));
    }

    #[test]
    fn test_git_auth_for_methods() {
        let items = items();
        let provider = SecretCredentials::new(&items);

        let mut git = UpstreamGit {
            repo: "git@example.com:org/repo.git".to_string(),
            ..Default::default()
        };
        assert_eq!(git_auth(&git, &provider).unwrap(), GitAuth::Anonymous);

        git.auth_method = GitAuthMethod::SshAgent;
        assert_eq!(git_auth(&git, &provider).unwrap(), GitAuth::ssh_agent());

        git.auth_method = GitAuthMethod::SshPrivateKey;
        git.auth = Some(auth_ref("git-key", None));
        let auth = git_auth(&git, &provider).unwrap();
        assert_eq!(
            auth,
            GitAuth::SshPrivateKey {
                username: "git".to_string(),
                private_key: b"PRIVATE KEY".to_vec(),
            }
        );

        assert!(git_auth(&git, &NoCredentials).is_err());
    }
}
