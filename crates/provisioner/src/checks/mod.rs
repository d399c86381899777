pub mod issue;
pub mod tools;

pub use issue::{IssueReport, IssueType};
pub use tools::PreflightChecker;
