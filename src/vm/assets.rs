//! Asset resolution
//!
//! The runtime asks for every file it loads (wasm blobs, firmware, disk
//! images, its own bootstrap script) by logical name. A locator maps that
//! name onto a concrete location under a root fixed at construction. The
//! root is never taken from the runtime, so a misbehaving callback cannot
//! redirect loads outside it.

use serde::Serialize;
use tracing::debug;

use crate::error::LaunchError;

/// Logical asset name mapped to the location the runtime should fetch
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedAsset {
    logical_name: String,
    resolved_location: String,
}

impl ResolvedAsset {
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn resolved_location(&self) -> &str {
        &self.resolved_location
    }
}

impl std::fmt::Display for ResolvedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.logical_name, self.resolved_location)
    }
}

/// Maps logical asset names to retrievable locations
///
/// Implementations must be pure: the same name always resolves to the same
/// location, so callers may cache results.
pub trait AssetLocator: Send + Sync {
    /// Resolve `logical_name`
    ///
    /// `base_path_hint` is whatever prefix the runtime would have used on its
    /// own; it is diagnostic only.
    fn resolve(&self, logical_name: &str, base_path_hint: &str)
        -> Result<ResolvedAsset, LaunchError>;
}

/// Locator that places every asset directly under one root
///
/// # Example
///
/// ```
/// use astralvisor::vm::{AssetLocator, RootedLocator};
///
/// let locator = RootedLocator::new("/AstralOS/image/");
/// let asset = locator.resolve("out.js", "").unwrap();
/// assert_eq!(asset.resolved_location(), "/AstralOS/image/out.js");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootedLocator {
    /// Always empty or ending in '/'
    root: String,
}

impl RootedLocator {
    /// Create a locator rooted at `root` (a path or URL prefix)
    pub fn new(root: impl Into<String>) -> Self {
        let mut root = root.into();
        if !root.is_empty() && !root.ends_with('/') {
            root.push('/');
        }
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

impl AssetLocator for RootedLocator {
    fn resolve(
        &self,
        logical_name: &str,
        base_path_hint: &str,
    ) -> Result<ResolvedAsset, LaunchError> {
        validate_asset_name(logical_name)?;

        let resolved_location = format!("{}{}", self.root, logical_name);
        debug!(
            asset = logical_name,
            hint = base_path_hint,
            location = %resolved_location,
            "resolved asset"
        );

        Ok(ResolvedAsset {
            logical_name: logical_name.to_string(),
            resolved_location,
        })
    }
}

/// Accept bare file names only
///
/// Rejects empty names, `.`/`..`, path separators (plain or percent-encoded)
/// and NUL bytes.
pub fn validate_asset_name(name: &str) -> Result<(), LaunchError> {
    let decoded = name
        .to_ascii_lowercase()
        .replace("%2e", ".")
        .replace("%2f", "/")
        .replace("%5c", "\\");

    let invalid = name.is_empty()
        || decoded == "."
        || decoded == ".."
        || decoded.contains(['/', '\\', '\0']);

    if invalid {
        return Err(LaunchError::InvalidAssetName(name.to_string()));
    }
    Ok(())
}
