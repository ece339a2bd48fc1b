//! Bundled resources and packaged assets read from local directories.

use std::path::{Component, Path, PathBuf};

use tracing::trace;

use crate::domain::entities::ImageInput;
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::ResourceProvider;

/// Resolves resource ids and asset names to files.
///
/// Resource `42` is the file named `42` (any extension) in the resources
/// directory. Asset names are relative paths under the assets directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryResources {
    resources_dir: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
}

impl DirectoryResources {
    /// Creates a provider; either directory may be absent.
    #[must_use]
    pub const fn new(resources_dir: Option<PathBuf>, assets_dir: Option<PathBuf>) -> Self {
        Self {
            resources_dir,
            assets_dir,
        }
    }

    fn find_resource(dir: &Path, id: u32) -> Option<PathBuf> {
        let name = id.to_string();
        let exact = dir.join(&name);
        if exact.is_file() {
            return Some(exact);
        }

        std::fs::read_dir(dir)
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(name.as_str())
            })
    }
}

impl ResourceProvider for DirectoryResources {
    fn open_resource(&self, id: u32) -> LoadResult<ImageInput> {
        let path = self
            .resources_dir
            .as_deref()
            .and_then(|dir| Self::find_resource(dir, id))
            .ok_or_else(|| LoadError::resource_not_found(format!("#{id}")))?;
        trace!(id = id, path = %path.display(), "Resolved resource");
        Ok(ImageInput::File(path))
    }

    fn open_asset(&self, name: &str) -> LoadResult<ImageInput> {
        let relative = Path::new(name);
        let confined = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(LoadError::resource_not_found(name));
        }

        let path = self
            .assets_dir
            .as_deref()
            .map(|dir| dir.join(relative))
            .filter(|path| path.is_file())
            .ok_or_else(|| LoadError::resource_not_found(name))?;
        trace!(name = %name, path = %path.display(), "Resolved asset");
        Ok(ImageInput::File(path))
    }
}
