//! The security manager: every side-effecting operation passes through
//! here before it runs.
//!
//! Checks consult, in order: the static command classifier, the
//! environment's policy, the lock file's recorded approvals, and finally
//! the approval prompt. Granted approvals are persisted back to the lock
//! file.

use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use mlld_ast::Location;

use crate::error::{ErrorKind, MlldError, MlldResult};
use crate::lockfile::LockFile;
use crate::policy::{PolicyAction, PolicyConfig};

/// Operation-scoped context handed to checks and prompts.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    pub location: Option<Location>,
    /// Directive kind performing the operation.
    pub directive: String,
    pub trust: Option<String>,
    pub ttl: Option<String>,
    pub labels: Vec<String>,
}

/// Whether a path is being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Read,
    Write,
}

/// Decides interactive approvals. The CLI wires a real prompt; the API
/// and tests wire fixed deciders.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn approve_command(&self, signature: &str, cx: &SecurityContext) -> bool;
    async fn approve_import(&self, url: &str, advisories: &[String]) -> bool;
}

/// Approves everything. Used by permissive managers.
pub struct AllowAllPrompt;

#[async_trait]
impl ApprovalPrompt for AllowAllPrompt {
    async fn approve_command(&self, _signature: &str, _cx: &SecurityContext) -> bool {
        true
    }
    async fn approve_import(&self, _url: &str, _advisories: &[String]) -> bool {
        true
    }
}

/// Denies everything. The non-interactive default.
pub struct DenyAllPrompt;

#[async_trait]
impl ApprovalPrompt for DenyAllPrompt {
    async fn approve_command(&self, _signature: &str, _cx: &SecurityContext) -> bool {
        false
    }
    async fn approve_import(&self, _url: &str, _advisories: &[String]) -> bool {
        false
    }
}

/// Static classification of a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Curated read-only commands that run without approval.
    Safe,
    /// Runs only with a recorded or interactive approval.
    NeedsApproval,
    /// Never runs.
    Denied,
}

/// Classifies commands by their leading word plus a handful of
/// destructive-pattern checks on the full line.
#[derive(Debug)]
pub struct CommandClassifier {
    destructive: Vec<regex::Regex>,
}

const SAFE_COMMANDS: &[&str] = &[
    "cat", "date", "echo", "grep", "head", "ls", "printenv", "pwd", "rg", "sed", "sort", "tail",
    "tr", "uniq", "wc", "which",
];

const DENIED_COMMANDS: &[&str] = &[
    "mkfs", "reboot", "shutdown", "sudo", "su", "chown", "chroot",
];

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandClassifier {
    #[must_use]
    pub fn new() -> Self {
        let patterns = [
            r"rm\s+(-[a-zA-Z]*[rf][a-zA-Z]*\s+)+/",
            r"dd\s+.*of=/dev/",
            r">\s*/dev/sd",
            r":\(\)\s*\{.*\};\s*:",
        ];
        Self {
            destructive: patterns
                .iter()
                .filter_map(|p| regex::Regex::new(p).ok())
                .collect(),
        }
    }

    /// Classify a full command line.
    #[must_use]
    pub fn classify(&self, command: &str) -> CommandClass {
        let trimmed = command.trim();
        if self.destructive.iter().any(|re| re.is_match(trimmed)) {
            return CommandClass::Denied;
        }
        let word = trimmed.split_whitespace().next().unwrap_or_default();
        if DENIED_COMMANDS.contains(&word) {
            return CommandClass::Denied;
        }
        if SAFE_COMMANDS.contains(&word) {
            return CommandClass::Safe;
        }
        CommandClass::NeedsApproval
    }
}

/// Gates command execution, path access, and import approval.
pub struct SecurityManager {
    classifier: CommandClassifier,
    policy: Mutex<Option<PolicyConfig>>,
    lock: Mutex<LockFile>,
    lock_path: Option<PathBuf>,
    prompt: Box<dyn ApprovalPrompt>,
    project_root: PathBuf,
    allow_absolute: bool,
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityManager")
            .field("project_root", &self.project_root)
            .field("allow_absolute", &self.allow_absolute)
            .finish_non_exhaustive()
    }
}

impl SecurityManager {
    /// A manager that auto-approves prompts and keeps no lock file.
    /// Classifier denials and policy denials still apply.
    #[must_use]
    pub fn permissive(project_root: PathBuf) -> Self {
        Self {
            classifier: CommandClassifier::new(),
            policy: Mutex::new(None),
            lock: Mutex::new(LockFile::default()),
            lock_path: None,
            prompt: Box::new(AllowAllPrompt),
            project_root,
            allow_absolute: false,
        }
    }

    /// A manager backed by a lock file and a prompt.
    ///
    /// # Errors
    ///
    /// Fails when the lock file exists but cannot be parsed.
    pub fn with_lock_file(
        project_root: PathBuf,
        lock_path: PathBuf,
        prompt: Box<dyn ApprovalPrompt>,
    ) -> MlldResult<Self> {
        let lock = LockFile::load(&lock_path)?;
        Ok(Self {
            classifier: CommandClassifier::new(),
            policy: Mutex::new(None),
            lock: Mutex::new(lock),
            lock_path: Some(lock_path),
            prompt,
            project_root,
            allow_absolute: false,
        })
    }

    #[must_use]
    pub fn allow_absolute_paths(mut self, allow: bool) -> Self {
        self.allow_absolute = allow;
        self
    }

    /// Merge a policy into the manager's base policy (restrictive merge)
    /// and persist named policies to the lock file.
    ///
    /// # Errors
    ///
    /// Fails when the lock file cannot be written.
    pub fn install_policy(&self, policy: PolicyConfig) -> MlldResult<()> {
        if let Some(name) = &policy.name {
            let mut lock = self
                .lock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            lock.record_policy(name, policy.clone());
        }
        {
            let mut slot = self
                .policy
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *slot = Some(match slot.take() {
                Some(existing) => PolicyConfig::more_restrictive(existing, policy),
                None => policy,
            });
        }
        self.persist_lock()
    }

    fn policy(&self) -> Option<PolicyConfig> {
        self.policy
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn persist_lock(&self) -> MlldResult<()> {
        if let Some(path) = &self.lock_path {
            let lock = self
                .lock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            lock.save(path)?;
        }
        Ok(())
    }

    /// Gate a command execution.
    ///
    /// # Errors
    ///
    /// Returns `POLICY_DENIED` for classified-destructive commands, policy
    /// rule hits, and refused approvals.
    pub async fn check_command(&self, command: &str, cx: &SecurityContext) -> MlldResult<()> {
        match self.classifier.classify(command) {
            CommandClass::Denied => {
                return Err(MlldError::new(ErrorKind::PolicyDenied {
                    reason: format!("command is never permitted: {command}"),
                }));
            }
            CommandClass::Safe => return Ok(()),
            CommandClass::NeedsApproval => {}
        }

        let word = command.split_whitespace().next().unwrap_or_default();
        if let Some(policy) = self.policy() {
            if policy.commands.deny.iter().any(|p| p == word) {
                return Err(MlldError::new(ErrorKind::PolicyDenied {
                    reason: format!("policy denies command `{word}`"),
                }));
            }
            if !policy.commands.allow.is_empty() && !policy.commands.allow.iter().any(|p| p == word)
            {
                return Err(MlldError::new(ErrorKind::PolicyDenied {
                    reason: format!("policy allow-list does not include `{word}`"),
                }));
            }
            if policy.commands.allow.iter().any(|p| p == word) {
                return Ok(());
            }
            if policy.default_action == PolicyAction::Deny {
                return Err(MlldError::new(ErrorKind::PolicyDenied {
                    reason: format!("policy default denies `{word}`"),
                }));
            }
        }

        let prior = {
            let lock = self
                .lock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            lock.command_decision(command)
        };
        let approved = match prior {
            Some(decision) => decision,
            None => {
                let granted = self.prompt.approve_command(command, cx).await;
                {
                    let mut lock = self
                        .lock
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    lock.record_command(command, granted, None);
                }
                self.persist_lock()?;
                granted
            }
        };
        if approved {
            Ok(())
        } else {
            Err(MlldError::new(ErrorKind::PolicyDenied {
                reason: format!("command not approved: {command}"),
            }))
        }
    }

    /// Gate a filesystem access and return the normalized path.
    ///
    /// Relative paths resolve against the project root; absolute paths
    /// outside it require configuration.
    ///
    /// # Errors
    ///
    /// Returns `PATH_ACCESS_DENIED` for escapes and policy hits.
    pub fn check_path(&self, path: &Path, mode: PathMode) -> MlldResult<PathBuf> {
        let resolved = if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.project_root.join(path))
        };

        let root = normalize_path(&self.project_root);
        if !resolved.starts_with(&root) && !self.allow_absolute {
            return Err(MlldError::new(ErrorKind::PathAccessDenied {
                path: path.display().to_string(),
                reason: "outside the project root".into(),
            }));
        }

        if let Some(policy) = self.policy() {
            let text = resolved.to_string_lossy();
            for pattern in &policy.paths.deny {
                if glob::Pattern::new(pattern).is_ok_and(|p| p.matches(&text)) {
                    return Err(MlldError::new(ErrorKind::PathAccessDenied {
                        path: text.to_string(),
                        reason: format!("policy denies pattern `{pattern}`"),
                    }));
                }
            }
            if mode == PathMode::Write && policy.default_action == PolicyAction::Deny {
                let allowed = policy
                    .paths
                    .allow
                    .iter()
                    .any(|pattern| glob::Pattern::new(pattern).is_ok_and(|p| p.matches(&text)));
                if !allowed {
                    return Err(MlldError::new(ErrorKind::PathAccessDenied {
                        path: text.to_string(),
                        reason: "policy default denies writes".into(),
                    }));
                }
            }
        }

        Ok(resolved)
    }

    /// Gate an import: check the lock file first, then prompt; persist
    /// the approval.
    ///
    /// # Errors
    ///
    /// Returns `IMPORT_NOT_APPROVED` when the prompt refuses.
    pub async fn approve_import(
        &self,
        url: &str,
        hash: &str,
        advisories: &[String],
    ) -> MlldResult<()> {
        let already = {
            let lock = self
                .lock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            lock.import_approved(url, hash)
        };
        if already {
            return Ok(());
        }
        if self.prompt.approve_import(url, advisories).await {
            {
                let mut lock = self
                    .lock
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                lock.approve_import(url, hash, "user", None);
            }
            self.persist_lock()?;
            Ok(())
        } else {
            Err(MlldError::new(ErrorKind::ImportNotApproved {
                url: url.to_string(),
            }))
        }
    }
}

/// Lexical path normalization: resolves `.` and `..` without touching the
/// filesystem, so paths that do not exist yet can still be checked.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_tiers() {
        let classifier = CommandClassifier::new();
        assert_eq!(classifier.classify("ls -la"), CommandClass::Safe);
        assert_eq!(classifier.classify("curl https://x"), CommandClass::NeedsApproval);
        assert_eq!(classifier.classify("sudo rm thing"), CommandClass::Denied);
        assert_eq!(classifier.classify("rm -rf /"), CommandClass::Denied);
    }

    #[test]
    fn paths_are_contained() {
        let manager = SecurityManager::permissive(PathBuf::from("/work/project"));
        assert!(manager
            .check_path(Path::new("docs/out.md"), PathMode::Write)
            .is_ok());
        let err = manager
            .check_path(Path::new("../escape.md"), PathMode::Write)
            .expect_err("escape denied");
        assert_eq!(err.code(), "PATH_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn policy_denies_listed_commands() {
        let manager = SecurityManager::permissive(PathBuf::from("."));
        manager
            .install_policy(PolicyConfig {
                commands: crate::policy::RuleSet {
                    allow: vec![],
                    deny: vec!["curl".into()],
                },
                ..Default::default()
            })
            .expect("installs");
        let err = manager
            .check_command("curl https://example.com", &SecurityContext::default())
            .await
            .expect_err("denied");
        assert_eq!(err.code(), "POLICY_DENIED");
    }

    #[tokio::test]
    async fn deny_prompt_blocks_unlisted_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = SecurityManager::with_lock_file(
            dir.path().to_path_buf(),
            dir.path().join("mlld.lock.json"),
            Box::new(DenyAllPrompt),
        )
        .expect("constructs");
        let err = manager
            .check_command("make deploy", &SecurityContext::default())
            .await
            .expect_err("denied");
        assert_eq!(err.code(), "POLICY_DENIED");
        // The refusal is persisted.
        let lock = LockFile::load(&dir.path().join("mlld.lock.json")).expect("loads");
        assert_eq!(lock.command_decision("make deploy"), Some(false));
    }
}
