//! Port definition for display surfaces.

use std::sync::Arc;

use crate::domain::entities::{DecodedImage, ScaleMode};

/// How a result should be presented on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayParams {
    /// Width to lay the image out at.
    pub width: u32,
    /// Height to lay the image out at.
    pub height: u32,
    /// Scale mode.
    pub scale: ScaleMode,
    /// Cross-fade steps; one means no fade.
    pub fade_steps: u32,
    /// Cross-fade duration in milliseconds.
    pub fade_duration_ms: u32,
}

/// A view that displays request results.
///
/// All methods are invoked on the interactive thread.
pub trait TargetSurface: Send + Sync {
    /// Shows a decoded result.
    fn attach(&self, image: &Arc<DecodedImage>, params: DisplayParams);

    /// Shows a placeholder while the real image loads.
    fn show_placeholder(&self, placeholder: &Arc<DecodedImage>);

    /// Removes any content.
    fn clear(&self);

    /// Current content size, used as the default decode target.
    fn current_content_size(&self) -> Option<(u32, u32)>;
}
