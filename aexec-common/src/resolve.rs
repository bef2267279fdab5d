//! Package path resolution.

use crate::toolchain::{Toolchain, ToolchainError};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("go list output has no ':' separator: {0:?}")]
    MissingSeparator(String),

    #[error("current directory does not have a Go import path")]
    NoImportPath,

    #[error("invalid standard flag {flag:?} for {import_path}")]
    BadStandardFlag { import_path: String, flag: String },
}

/// The Go package being tested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Canonical import path, e.g. `mime/multipart`.
    pub import_path: String,
    /// Whether the package belongs to the standard library.
    pub standard: bool,
}

/// Ask the toolchain which package lives in `dir`.
pub async fn resolve<T: Toolchain>(toolchain: &T, dir: &Path) -> Result<Package, ResolveError> {
    let raw = toolchain.list_package(dir).await?;
    let package = parse_package_info(&raw)?;
    debug!(
        "resolved {} to {} (standard: {})",
        dir.display(),
        package.import_path,
        package.standard
    );
    Ok(package)
}

/// Parse `<import path>:<standard>`.
///
/// The split is on the first `:`; the flag follows Go's boolean spelling.
pub fn parse_package_info(raw: &str) -> Result<Package, ResolveError> {
    let line = raw.trim();
    let (import_path, flag) = line
        .split_once(':')
        .ok_or_else(|| ResolveError::MissingSeparator(line.to_string()))?;
    if import_path.is_empty() || import_path == "." {
        return Err(ResolveError::NoImportPath);
    }
    let standard = parse_bool(flag).ok_or_else(|| ResolveError::BadStandardFlag {
        import_path: import_path.to_string(),
        flag: flag.to_string(),
    })?;
    Ok(Package {
        import_path: import_path.to_string(),
        standard,
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
