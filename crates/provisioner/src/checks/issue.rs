use crate::console::Console;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueType {
    TerraformNotInstalled, // Drives every cloud resource
    SshNotInstalled,       // Readiness probe and bootstrap
    KeygenNotInstalled,    // First job of an account creates keys
    StateDirNotWritable,   // Workspaces are hydrated here
    NoBlobStore,           // Nothing configured to keep state in
}

impl IssueType {
    pub const fn severity(&self) -> Severity {
        match self {
            Self::KeygenNotInstalled => Severity::Warning,
            Self::NoBlobStore => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Issue {
    issue_type: IssueType,
    message: String,
}

impl Issue {
    pub fn new(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            message: message.into(),
        }
    }

    pub const fn issue_type(&self) -> IssueType {
        self.issue_type
    }

    pub const fn severity(&self) -> Severity {
        self.issue_type.severity()
    }

    pub fn print(&self) {
        match self.severity() {
            Severity::Error => Console::user_error(&format!("{self}")),
            Severity::Warning => Console::warning(&format!("{self}")),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.issue_type, self.message)
    }
}

#[derive(Debug, Default, Clone)]
pub struct IssueReport {
    issues: Arc<RwLock<Vec<Issue>>>,
}

impl IssueReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_issue(&self, issue_type: IssueType, message: impl Into<String>) {
        if let Ok(mut issues) = self.issues.write() {
            issues.push(Issue::new(issue_type, message));
        }
    }

    pub fn issues(&self) -> Vec<Issue> {
        self.issues.read().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn print_issues(&self) {
        let issues = self.issues();
        if issues.is_empty() {
            Console::success("No issues found");
            return;
        }

        Console::section("Preflight Issues");
        for issue in issues.iter().filter(|i| i.severity() == Severity::Error) {
            issue.print();
        }
        for issue in issues.iter().filter(|i| i.severity() == Severity::Warning) {
            issue.print();
        }
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues()
            .iter()
            .any(|issue| matches!(issue.severity(), Severity::Error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_errors_are_critical() {
        let report = IssueReport::new();
        report.add_issue(IssueType::KeygenNotInstalled, "ssh-keygen missing");
        assert!(!report.has_critical_issues());

        report.add_issue(IssueType::TerraformNotInstalled, "terraform missing");
        assert!(report.has_critical_issues());
        assert_eq!(report.issues().len(), 2);
    }
}
