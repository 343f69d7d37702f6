//! Code signing identity lookup

use std::sync::LazyLock;
use std::time::Duration;

use brx_core::prelude::*;
use brx_device::{CommandRunner, CommandSpec};
use regex::Regex;

const SECURITY: &str = "security";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// `1) 0123ABCD "Apple Development: dev@example.com (ABCDE12345)"`
static DEVELOPMENT_IDENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(Apple Development: [^"]*\(([A-Z0-9]+)\))""#)
        .expect("Invalid signing identity regex")
});

/// A usable development signing identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    /// Full keychain name, e.g. `Apple Development: dev@example.com (ABCDE12345)`
    pub name: String,
    pub team_id: String,
}

impl SigningIdentity {
    /// Build settings that select this identity with automatic signing
    pub fn build_settings(&self) -> Vec<String> {
        vec![
            "CODE_SIGN_STYLE=Automatic".to_string(),
            "CODE_SIGN_IDENTITY=Apple Development".to_string(),
            format!("DEVELOPMENT_TEAM={}", self.team_id),
        ]
    }
}

/// Parse `security find-identity -v -p codesigning` output
pub fn parse_identities(output: &str) -> Vec<SigningIdentity> {
    output
        .lines()
        .filter_map(|line| DEVELOPMENT_IDENTITY.captures(line))
        .filter_map(|caps| {
            Some(SigningIdentity {
                name: caps.get(1)?.as_str().to_string(),
                team_id: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Resolves the signing identity used for physical-device builds
#[trait_variant::make(SigningLookup: Send)]
pub trait LocalSigningLookup {
    async fn find_identity(&self) -> Result<Option<SigningIdentity>>;
}

/// Reads identities from the login keychain
#[derive(Debug, Clone)]
pub struct KeychainSigning<R> {
    runner: R,
}

impl<R> KeychainSigning<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner + Sync> SigningLookup for KeychainSigning<R> {
    async fn find_identity(&self) -> Result<Option<SigningIdentity>> {
        let spec = CommandSpec::new(SECURITY)
            .args(["find-identity", "-v", "-p", "codesigning"])
            .timeout(LOOKUP_TIMEOUT);
        let result = self.runner.run(&spec).await?;

        if !result.success() {
            warn!("security find-identity failed: {}", result.stderr.trim());
            return Ok(None);
        }

        let identity = parse_identities(&result.stdout).into_iter().next();
        match &identity {
            Some(id) => debug!("Using signing identity {} (team {})", id.name, id.team_id),
            None => debug!("No Apple Development identity in keychain"),
        }
        Ok(identity)
    }
}
