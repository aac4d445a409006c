//! Project type detection.
//!
//! The manifest found at the repository root decides which commands
//! install dependencies and check the build, and which image a project
//! gets when none is configured.

use std::fmt;
use std::path::Path;

/// Manifests probed for, in priority order.
const MANIFESTS: &[(&str, ProjectKind)] = &[
    ("Cargo.toml", ProjectKind::Rust),
    ("package.json", ProjectKind::Node),
    ("go.mod", ProjectKind::Go),
    ("pyproject.toml", ProjectKind::Python),
    ("requirements.txt", ProjectKind::Python),
];

/// Shell snippet listing which manifests exist in the current directory.
pub(crate) const PROBE_COMMAND: &str = "for f in Cargo.toml package.json go.mod pyproject.toml requirements.txt; \
     do [ -f \"$f\" ] && echo \"$f\"; done; true";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProjectKind {
    Rust,
    Node,
    Go,
    Python,
    Unknown,
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rust => "rust",
            Self::Node => "node",
            Self::Go => "go",
            Self::Python => "python",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl ProjectKind {
    /// Picks the highest-priority kind among the manifest names given.
    pub fn from_manifests<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let names: Vec<&str> = names.into_iter().map(str::trim).collect();
        MANIFESTS
            .iter()
            .find(|(manifest, _)| names.contains(manifest))
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// Interprets the output of [`PROBE_COMMAND`].
    pub fn from_probe_output(stdout: &str) -> Self {
        Self::from_manifests(stdout.lines())
    }

    /// Detects the kind of a local checkout.
    pub fn detect_local(dir: &Path) -> Self {
        Self::from_manifests(
            MANIFESTS
                .iter()
                .map(|(manifest, _)| *manifest)
                .filter(|manifest| dir.join(manifest).is_file()),
        )
    }

    /// Image used when nothing else is configured.
    pub fn default_image(self) -> &'static str {
        match self {
            Self::Rust => "rust:1-bookworm",
            Self::Node => "node:20-bookworm",
            Self::Go => "golang:1.22-bookworm",
            Self::Python => "python:3.12-bookworm",
            Self::Unknown => "debian:bookworm-slim",
        }
    }

    pub fn install_commands(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["cargo fetch"],
            Self::Node => &["npm install"],
            Self::Go => &["go mod download"],
            Self::Python => &[
                "if [ -f requirements.txt ]; then pip install -r requirements.txt; else pip install -e .; fi",
            ],
            Self::Unknown => &[],
        }
    }

    /// Checks that the untouched base branch builds.
    pub fn setup_check_commands(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["cargo check --all-targets", "cargo test"],
            Self::Node => &["npm run build --if-present", "npm test"],
            Self::Go => &["go build ./...", "go test ./..."],
            Self::Python => &["python -m compileall -q ."],
            Self::Unknown => &[],
        }
    }

    /// Checks the agent's changes, including formatting where the toolchain has a checker.
    pub fn execute_check_commands(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "cargo fmt --check",
                "cargo check --all-targets",
                "cargo test",
            ],
            Self::Node => &["npm run build --if-present", "npm test"],
            Self::Go => &["test -z \"$(gofmt -l .)\"", "go build ./...", "go test ./..."],
            Self::Python => &["python -m compileall -q ."],
            Self::Unknown => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_probe_output_detection() {
        assert_eq!(ProjectKind::from_probe_output("Cargo.toml\n"), ProjectKind::Rust);
        assert_eq!(ProjectKind::from_probe_output("go.mod\n"), ProjectKind::Go);
        assert_eq!(
            ProjectKind::from_probe_output("requirements.txt\n"),
            ProjectKind::Python
        );
        assert_eq!(ProjectKind::from_probe_output(""), ProjectKind::Unknown);
    }

    #[test]
    fn test_manifest_priority() {
        // A Rust crate with a JS frontend is treated as Rust
        assert_eq!(
            ProjectKind::from_probe_output("package.json\nCargo.toml\n"),
            ProjectKind::Rust
        );
        assert_eq!(
            ProjectKind::from_manifests(["pyproject.toml", "go.mod"]),
            ProjectKind::Go
        );
    }

    #[test]
    fn test_detect_local() {
        let dir = tempdir().unwrap();
        assert_eq!(ProjectKind::detect_local(dir.path()), ProjectKind::Unknown);

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(ProjectKind::detect_local(dir.path()), ProjectKind::Node);
    }

    #[test]
    fn test_unknown_projects_have_no_checks() {
        let kind = ProjectKind::Unknown;
        assert!(kind.install_commands().is_empty());
        assert!(kind.setup_check_commands().is_empty());
        assert!(kind.execute_check_commands().is_empty());
        assert_eq!(kind.default_image(), "debian:bookworm-slim");
    }

    #[test]
    fn test_rust_execute_check_includes_format() {
        let steps = ProjectKind::Rust.execute_check_commands();
        assert_eq!(steps[0], "cargo fmt --check");
        assert!(!ProjectKind::Rust
            .setup_check_commands()
            .contains(&"cargo fmt --check"));
    }
}
