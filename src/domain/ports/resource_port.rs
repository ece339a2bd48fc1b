//! Port definition for bundled resources and packaged assets.

use crate::domain::entities::ImageInput;
use crate::domain::errors::LoadResult;

/// Opens images that ship with the application.
pub trait ResourceProvider: Send + Sync {
    /// Opens a bundled resource by numeric id.
    ///
    /// # Errors
    /// Returns `ResourceNotFound` if no such resource exists.
    fn open_resource(&self, id: u32) -> LoadResult<ImageInput>;

    /// Opens a packaged asset by name.
    ///
    /// # Errors
    /// Returns `ResourceNotFound` if no such asset exists.
    fn open_asset(&self, name: &str) -> LoadResult<ImageInput>;
}
