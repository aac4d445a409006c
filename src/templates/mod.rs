//! Embedded templates for `smith init`.

/// Default `smith.toml` configuration.
pub(crate) const SMITH_TOML: &str = include_str!("smith.toml");

/// Keeps run records and logs out of version control.
pub(crate) const SMITH_GITIGNORE: &str = "*\n";
