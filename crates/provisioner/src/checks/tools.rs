use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::issue::{IssueReport, IssueType};
use crate::console::Console;

/// Looks at the host a job would run on: required binaries and writable
/// state directories.
pub struct PreflightChecker {
    issues: IssueReport,
}

impl PreflightChecker {
    pub fn new(issues: IssueReport) -> Self {
        Self { issues }
    }

    pub fn check_binary(&self, binary: &str, issue_type: IssueType) -> Option<PathBuf> {
        let output = match std::process::Command::new("which").arg(binary).output() {
            Ok(output) => output,
            Err(e) => {
                self.issues.add_issue(
                    issue_type,
                    format!("Failed to execute 'which {binary}': {e}"),
                );
                return None;
            }
        };

        if !output.status.success() {
            self.issues
                .add_issue(issue_type, format!("{binary} is not installed or not on PATH"));
            return None;
        }

        let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        debug!("Found {binary} at {}", path.display());
        Console::info(binary, &path.display().to_string());
        Some(path)
    }

    pub fn check_writable_dir(&self, dir: &Path) {
        let probe = dir.join(".provisioner-write-test");
        let result = fs::create_dir_all(dir)
            .and_then(|_| fs::write(&probe, b"ok"))
            .and_then(|_| fs::remove_file(&probe));
        if let Err(e) = result {
            self.issues.add_issue(
                IssueType::StateDirNotWritable,
                format!("{} is not writable: {e}", dir.display()),
            );
        }
    }

    pub fn check_state_backend(&self, bucket: Option<&str>, state_dir: Option<&Path>) {
        match (bucket, state_dir) {
            (Some(bucket), _) => Console::info("State bucket", bucket),
            (None, Some(dir)) => self.check_writable_dir(dir),
            (None, None) => self.issues.add_issue(
                IssueType::NoBlobStore,
                "no state bucket or directory configured, jobs fall back to the local default",
            ),
        }
    }

    pub fn check_tools(&self, terraform: &str, ssh: &str) {
        self.check_binary(terraform, IssueType::TerraformNotInstalled);
        self.check_binary(ssh, IssueType::SshNotInstalled);
        self.check_binary("ssh-keygen", IssueType::KeygenNotInstalled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_reported() {
        let report = IssueReport::new();
        let checker = PreflightChecker::new(report.clone());
        assert!(checker
            .check_binary("definitely-not-a-real-binary-4821", IssueType::TerraformNotInstalled)
            .is_none());
        let issues = report.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type(), IssueType::TerraformNotInstalled);
    }

    #[test]
    fn test_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let report = IssueReport::new();
        PreflightChecker::new(report.clone()).check_writable_dir(&dir.path().join("workspaces"));
        assert!(report.issues().is_empty());
        assert!(dir.path().join("workspaces").is_dir());
    }

    #[test]
    fn test_missing_backend_is_a_warning() {
        let report = IssueReport::new();
        PreflightChecker::new(report.clone()).check_state_backend(None, None);
        let issues = report.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type(), IssueType::NoBlobStore);
        assert!(!report.has_critical_issues());
    }
}
