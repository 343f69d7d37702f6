//! Build failure classification
//!
//! Maps the build tool's diagnostic text to a [`FailureKind`]. Rules are
//! checked in priority order on the lowercased text; the first match wins.
//! Names and versions are captured from the original text so their case
//! survives.

use std::sync::LazyLock;

use brx_core::FailureKind;
use regex::Regex;

/// Placeholder when a rule matches but nothing could be captured
const UNKNOWN: &str = "unknown";

static IOS_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)iOS[-\s]?(\d+\.\d+)").expect("Invalid iOS version regex"));

/// Destination specifiers print the version as `OS:17.0`
static OS_FIELD_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bOS:(\d+\.\d+)").expect("Invalid OS field regex"));

static SCHEME_NAMED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)scheme named '([^']+)'").expect("Invalid scheme regex"));

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']+)'").expect("Invalid quoted name regex"));

static NO_SUCH_MODULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)no such module '([^']+)'").expect("Invalid missing module regex")
});

static CANNOT_FIND_IN_SCOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)cannot find (?:type )?'([^']+)' in scope").expect("Invalid scope regex")
});

const SIGNING_MARKERS: &[&str] = &[
    "code sign",
    "provisioning profile",
    "no account for team",
    "requires a development team",
    "no signing certificate",
];

/// Classify raw build output. Pure: equal input gives equal output.
pub fn classify(raw: &str) -> FailureKind {
    let text = raw.to_lowercase();

    if is_runtime_mismatch(&text) {
        return FailureKind::RuntimeMismatch {
            requested_version: capture(&IOS_VERSION, raw)
                .or_else(|| capture(&OS_FIELD_VERSION, raw))
                .unwrap_or_else(|| UNKNOWN.to_string()),
        };
    }

    if (text.contains("deriveddata") && (text.contains("corrupt") || text.contains("invalid")))
        || (text.contains("could not find") && text.contains("build products"))
    {
        return FailureKind::CorruptedCache;
    }

    if text.contains("scheme")
        && (text.contains("not found")
            || text.contains("does not exist")
            || text.contains("does not contain a scheme"))
    {
        return FailureKind::MissingScheme {
            name: capture(&SCHEME_NAMED, raw)
                .or_else(|| capture(&QUOTED, raw))
                .unwrap_or_else(|| UNKNOWN.to_string()),
        };
    }

    if SIGNING_MARKERS.iter().any(|m| text.contains(m)) {
        return FailureKind::SigningIssue;
    }

    if text.contains("no such module")
        || (text.contains("cannot find") && text.contains("in scope"))
    {
        return FailureKind::MissingDependency {
            module: capture(&NO_SUCH_MODULE, raw)
                .or_else(|| capture(&CANNOT_FIND_IN_SCOPE, raw))
                .unwrap_or_else(|| UNKNOWN.to_string()),
        };
    }

    if text.contains("project.pbxproj")
        && (text.contains("parse") || text.contains("invalid") || text.contains("corrupt"))
    {
        return FailureKind::ProjectCorrupted;
    }

    FailureKind::Unknown {
        raw: raw.to_string(),
    }
}

fn is_runtime_mismatch(text: &str) -> bool {
    text.contains("unable to find a destination")
        || text.contains("is not installed")
        || (text.contains("runtime") && text.contains("not available"))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
