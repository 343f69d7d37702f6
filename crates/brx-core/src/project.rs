//! Project descriptor (`brx.yml`) loading

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::Destination;

/// Descriptor filename at the project root
pub const DESCRIPTOR_FILENAME: &str = "brx.yml";

/// Declarative project source consumed by the generator
pub const GENERATOR_SPEC_FILENAME: &str = "project.yml";

/// Raw shape of the file; required fields are checked after parsing so a
/// missing key produces a precise error instead of a serde message.
#[derive(Debug, Default, Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    bundle_id: Option<String>,
    project: Option<String>,
    scheme: Option<String>,
    destination: Option<String>,
    generator: Option<String>,
}

/// Declarative description of the app project being built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescriptor {
    /// Directory containing `brx.yml`
    pub root: PathBuf,
    pub name: String,
    pub bundle_id: String,
    pub project: Option<String>,
    pub scheme: Option<String>,
    pub destination: Option<String>,
    pub generator: Option<String>,
}

impl ProjectDescriptor {
    /// Load `brx.yml` from a project root
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(DESCRIPTOR_FILENAME);
        if !path.exists() {
            return Err(Error::ProjectSpecNotFound { path });
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(root, &path, &content)
    }

    fn parse(root: &Path, path: &Path, content: &str) -> Result<Self> {
        let raw: RawDescriptor = if content.trim().is_empty() {
            RawDescriptor::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let mut missing = Vec::new();
        if raw.name.as_deref().map_or(true, str::is_empty) {
            missing.push("name");
        }
        if raw.bundle_id.as_deref().map_or(true, str::is_empty) {
            missing.push("bundle_id");
        }
        if !missing.is_empty() {
            return Err(Error::ProjectSpecInvalid {
                path: path.to_path_buf(),
                missing,
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            name: raw.name.unwrap_or_default(),
            bundle_id: raw.bundle_id.unwrap_or_default(),
            project: raw.project,
            scheme: raw.scheme,
            destination: raw.destination,
            generator: raw.generator,
        })
    }

    /// `.xcodeproj` path, defaulting to `<name>.xcodeproj`
    pub fn project_path(&self) -> PathBuf {
        match &self.project {
            Some(project) => self.root.join(project),
            None => self.root.join(format!("{}.xcodeproj", self.name)),
        }
    }

    pub fn scheme(&self) -> &str {
        self.scheme.as_deref().unwrap_or(&self.name)
    }

    /// Destination override from the descriptor, if any
    pub fn destination_override(&self) -> Option<Destination> {
        self.destination.clone().map(Destination::Custom)
    }

    /// Whether metadata should be regenerated with XcodeGen
    pub fn uses_xcodegen(&self) -> bool {
        self.generator
            .as_deref()
            .is_some_and(|g| g.eq_ignore_ascii_case("xcodegen"))
    }

    /// `project.yml` next to the descriptor, if present
    pub fn generator_spec(&self) -> Option<PathBuf> {
        let path = self.root.join(GENERATOR_SPEC_FILENAME);
        path.exists().then_some(path)
    }

    /// Bundle name produced by the build
    pub fn app_bundle_name(&self) -> String {
        format!("{}.app", self.name)
    }
}
