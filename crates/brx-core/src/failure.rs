//! Closed classification of build-tool failures

use std::fmt;

/// Number of trailing diagnostic lines kept alongside a classified failure
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// What went wrong in a failed build, derived from the tool's diagnostic text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The destination's simulator runtime is not installed
    RuntimeMismatch { requested_version: String },
    /// The isolated build-output directory is unusable
    CorruptedCache,
    /// The scheme does not exist in the project
    MissingScheme { name: String },
    /// Code signing, provisioning or account problem
    SigningIssue,
    /// A module or symbol could not be resolved
    MissingDependency { module: String },
    /// The project metadata could not be parsed
    ProjectCorrupted,
    /// Anything else; carries the raw diagnostic
    Unknown { raw: String },
}

/// Payload-free discriminant, used to bound retries per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureTag {
    RuntimeMismatch,
    CorruptedCache,
    MissingScheme,
    SigningIssue,
    MissingDependency,
    ProjectCorrupted,
    Unknown,
}

impl FailureKind {
    pub fn tag(&self) -> FailureTag {
        match self {
            FailureKind::RuntimeMismatch { .. } => FailureTag::RuntimeMismatch,
            FailureKind::CorruptedCache => FailureTag::CorruptedCache,
            FailureKind::MissingScheme { .. } => FailureTag::MissingScheme,
            FailureKind::SigningIssue => FailureTag::SigningIssue,
            FailureKind::MissingDependency { .. } => FailureTag::MissingDependency,
            FailureKind::ProjectCorrupted => FailureTag::ProjectCorrupted,
            FailureKind::Unknown { .. } => FailureTag::Unknown,
        }
    }

    /// One-line summary for the operator
    pub fn summary(&self) -> String {
        match self {
            FailureKind::RuntimeMismatch { requested_version } => {
                format!("Simulator runtime mismatch: iOS {requested_version} is not available")
            }
            FailureKind::CorruptedCache => "Corrupted build cache detected".to_string(),
            FailureKind::MissingScheme { name } => format!("Scheme '{name}' not found"),
            FailureKind::SigningIssue => "Code signing issue detected".to_string(),
            FailureKind::MissingDependency { module } => format!("Missing dependency: {module}"),
            FailureKind::ProjectCorrupted => "Project file appears corrupted".to_string(),
            FailureKind::Unknown { .. } => "Build failed".to_string(),
        }
    }

    /// What the operator should do next, when there is anything to say
    pub fn remediation(&self) -> Option<String> {
        match self {
            FailureKind::RuntimeMismatch { .. } => Some(
                "Install the matching runtime: Xcode → Settings → Platforms".to_string(),
            ),
            FailureKind::CorruptedCache => Some("Delete .brx/DerivedData and rebuild".to_string()),
            FailureKind::MissingScheme { .. } | FailureKind::ProjectCorrupted => {
                Some("Regenerate the project from project.yml: xcodegen generate".to_string())
            }
            FailureKind::SigningIssue => Some(
                "Open the project in Xcode → Signing & Capabilities → enable \"Automatically manage signing\" and pick your team"
                    .to_string(),
            ),
            FailureKind::MissingDependency { .. } => Some(
                "Install with: swift package resolve\nOr add it to project.yml dependencies"
                    .to_string(),
            ),
            FailureKind::Unknown { raw } => Some(diagnostic_tail(raw, DIAGNOSTIC_TAIL_LINES)),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Keep the last `max_lines` non-empty lines of a build log.
///
/// Build tools print the actual error near the end, after pages of
/// compile invocations.
pub fn diagnostic_tail(raw: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_ignores_payload() {
        let a = FailureKind::MissingScheme {
            name: "A".to_string(),
        };
        let b = FailureKind::MissingScheme {
            name: "B".to_string(),
        };
        assert_eq!(a.tag(), b.tag());
        assert_ne!(a.tag(), FailureKind::ProjectCorrupted.tag());
    }

    #[test]
    fn test_missing_dependency_remediation() {
        let kind = FailureKind::MissingDependency {
            module: "Alamofire".to_string(),
        };
        assert_eq!(kind.summary(), "Missing dependency: Alamofire");
        assert!(kind.remediation().unwrap().contains("swift package resolve"));
    }

    #[test]
    fn test_diagnostic_tail_keeps_last_lines() {
        let raw = "line 1\n\nline 2\nline 3\nline 4\n";
        assert_eq!(diagnostic_tail(raw, 2), "line 3\nline 4");
        assert_eq!(diagnostic_tail(raw, 10), "line 1\nline 2\nline 3\nline 4");
        assert_eq!(diagnostic_tail("", 3), "");
    }

    #[test]
    fn test_unknown_remediation_is_raw_tail() {
        let kind = FailureKind::Unknown {
            raw: "** BUILD FAILED **".to_string(),
        };
        assert_eq!(kind.remediation().unwrap(), "** BUILD FAILED **");
        assert_eq!(kind.to_string(), "Build failed");
    }
}
