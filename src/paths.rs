// src/paths.rs

use crate::models::{CanonicalFile, Placement};
use deunicode::deunicode;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Folder used under each platform root for special-collection files that
/// match no regular purchase.
pub const SPECIAL_COLLECTION_DIR: &str = "trove";

/// Slug used when a name has no alphanumeric characters at all.
const EMPTY_SLUG: &str = "untitled";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("destination path is {len} bytes long, the limit is {max}: {path}")]
    TooLong { path: PathBuf, len: usize, max: usize },
    #[error("path component '{component}' is {len} bytes long, the limit is {max}")]
    ComponentTooLong {
        component: String,
        len: usize,
        max: usize,
    },
    #[error("invalid file name '{0}'")]
    InvalidFileName(String),
}

/// Filesystem length constraints a destination must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathLimits {
    pub max_path_len: usize,
    pub max_component_len: usize,
}

impl PathLimits {
    /// Limits for the platform this binary was built for.
    pub const fn native() -> Self {
        if cfg!(windows) {
            Self {
                max_path_len: 260,
                max_component_len: 255,
            }
        } else {
            Self {
                max_path_len: 4096,
                max_component_len: 255,
            }
        }
    }
}

impl Default for PathLimits {
    fn default() -> Self {
        Self::native()
    }
}

/// Transliterates to ASCII, lower-cases, drops apostrophes and collapses every
/// other run of non-alphanumeric characters into `-`.
pub fn slugify(name: &str) -> String {
    let ascii = deunicode(name);
    let mut slug = String::with_capacity(ascii.len());
    let mut separator = false;
    for c in ascii.chars() {
        if c == '\'' {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            if separator && !slug.is_empty() {
                slug.push('-');
            }
            separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            separator = true;
        }
    }
    if slug.is_empty() {
        slug.push_str(EMPTY_SLUG);
    }
    slug
}

/// Computes on-disk destinations beneath a download root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    limits: PathLimits,
}

impl PathResolver {
    /// A relative `root` is anchored at the working directory so that length
    /// limits apply to the path the operating system actually sees.
    pub fn new(root: impl Into<PathBuf>, limits: PathLimits) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root, limits }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/<platform>/<purchase label>/<item>/<file name>`
    pub fn resolve(&self, file: &CanonicalFile) -> Result<PathBuf, PathError> {
        let relative = self.relative(file)?;
        let path = self.root.join(relative);
        let len = path.as_os_str().len();
        if len > self.limits.max_path_len {
            return Err(PathError::TooLong {
                path,
                len,
                max: self.limits.max_path_len,
            });
        }
        Ok(path)
    }

    /// The destination relative to the download root.
    pub fn relative(&self, file: &CanonicalFile) -> Result<PathBuf, PathError> {
        check_file_name(&file.file_name)?;
        let label = purchase_label(file);
        let item = slugify(&file.item_name);
        let components: [&str; 4] = [
            file.platform.as_str(),
            label.as_str(),
            item.as_str(),
            file.file_name.as_str(),
        ];
        for component in components {
            if component.len() > self.limits.max_component_len {
                return Err(PathError::ComponentTooLong {
                    component: component.to_string(),
                    len: component.len(),
                    max: self.limits.max_component_len,
                });
            }
        }
        Ok(components.into_iter().collect())
    }
}

fn purchase_label(file: &CanonicalFile) -> String {
    match file.placement {
        Placement::Purchase => slugify(&format!(
            "{} {}",
            file.owner.purchased_at.format("%Y-%m-%d"),
            file.owner.bundle_name
        )),
        Placement::SpecialCollection => SPECIAL_COLLECTION_DIR.to_string(),
    }
}

fn check_file_name(name: &str) -> Result<(), PathError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(PathError::InvalidFileName(name.to_string()));
    }
    Ok(())
}
