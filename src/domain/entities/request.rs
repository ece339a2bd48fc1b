//! Request descriptors and per-request options.

use super::image::TargetSize;

/// Suffix added to the cache key when animation is disabled, so a still
/// rendition never satisfies a request that expects animation (or vice versa).
pub const NO_ANIMATION_SUFFIX: &str = "#noanim";

/// Where an image is loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceDescriptor {
    /// A bundled resource addressed by numeric id.
    Resource(u32),
    /// A packaged asset addressed by name.
    Asset(String),
    /// A remote URL.
    Url(String),
}

impl SourceDescriptor {
    /// Key identifying the source when no override is configured.
    #[must_use]
    pub fn default_key(&self) -> String {
        match self {
            Self::Resource(id) => format!("#{id}"),
            Self::Asset(name) => name.clone(),
            Self::Url(url) => url.clone(),
        }
    }

    /// Returns the URL if this is a remote source.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            _ => None,
        }
    }

    /// Returns true if the source names nothing that could be opened.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Resource(_) => false,
            Self::Asset(name) | Self::Url(name) => name.trim().is_empty(),
        }
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "res#{id}"),
            Self::Asset(name) => write!(f, "asset {name}"),
            Self::Url(url) => write!(f, "url {url}"),
        }
    }
}

/// How the surface should fit the image into its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// Scale uniformly so the whole image fits.
    #[default]
    Fit,
    /// Scale uniformly so the image covers the bounds, cropping overflow.
    Fill,
    /// Center without scaling.
    Center,
    /// Scale each axis independently.
    Stretch,
}

/// Cross-fade parameters applied when attaching a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeSpec {
    /// Number of fade steps; one means no visible fade.
    pub steps: u32,
    /// Fade duration in milliseconds.
    pub duration_ms: u32,
    /// Fade even when the result comes straight from the memory cache.
    pub always: bool,
}

impl FadeSpec {
    /// Single step (instant) fade.
    pub const INSTANT: Self = Self {
        steps: 1,
        duration_ms: 0,
        always: false,
    };

    /// Returns the fade to use for a memory cache hit.
    #[must_use]
    pub const fn for_memory_hit(self) -> Self {
        if self.always {
            self
        } else {
            Self { steps: 1, ..self }
        }
    }
}

impl Default for FadeSpec {
    fn default() -> Self {
        Self::INSTANT
    }
}

/// Which cache tiers a request may read and write.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Consult the memory cache.
    pub ram_lookup: bool,
    /// Store decoded results in the memory cache.
    pub ram_store: bool,
    /// Reuse disk cache entries.
    pub disk_lookup: bool,
    /// Register downloads in the disk cache.
    pub disk_store: bool,
    /// Fail instead of downloading when nothing usable is cached.
    pub cached_only: bool,
}

impl CachePolicy {
    /// Policy with the given tiers skipped.
    #[must_use]
    pub const fn skipping(
        skip_ram_lookup: bool,
        skip_ram_store: bool,
        skip_disk_lookup: bool,
        skip_disk_store: bool,
    ) -> Self {
        Self {
            ram_lookup: !skip_ram_lookup,
            ram_store: !skip_ram_store,
            disk_lookup: !skip_disk_lookup,
            disk_store: !skip_disk_store,
            cached_only: false,
        }
    }

    /// Returns true if the disk index must be consulted before downloading.
    ///
    /// Even when lookups are off the row is needed for storing, otherwise a
    /// second row would be created for the same origin.
    #[must_use]
    pub const fn needs_disk_index(self) -> bool {
        self.disk_lookup || self.disk_store
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::skipping(false, false, false, false)
    }
}

/// Options that shape how a request is executed and delivered.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Decode target size.
    pub size: TargetSize,
    /// Scale mode passed to the surface.
    pub scale: ScaleMode,
    /// Decode animated formats as still images.
    pub disable_animation: bool,
    /// Cache tiers.
    pub cache: CachePolicy,
    /// Fade parameters.
    pub fade: FadeSpec,
    /// Explicit cache key replacing the source-derived one.
    pub cache_key: Option<String>,
    /// Application supplied numeric id.
    pub app_id: i64,
    /// Application supplied tag.
    pub app_tag: Option<String>,
}

impl RequestOptions {
    /// Origin key identifying the source content, without option suffixes.
    ///
    /// Returns `None` when the key is empty, which disables caching and
    /// coalescing for the request.
    #[must_use]
    pub fn origin_key(&self, source: &SourceDescriptor) -> Option<String> {
        let key = self
            .cache_key
            .clone()
            .unwrap_or_else(|| source.default_key());
        (!key.is_empty()).then_some(key)
    }

    /// Identity of the decoded result: the origin key plus option suffixes.
    #[must_use]
    pub fn cache_key(&self, source: &SourceDescriptor) -> Option<String> {
        self.origin_key(source).map(|key| {
            if self.disable_animation {
                format!("{key}{NO_ANIMATION_SUFFIX}")
            } else {
                key
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys() {
        assert_eq!(SourceDescriptor::Resource(42).default_key(), "#42");
        assert_eq!(
            SourceDescriptor::Asset("icons/a.png".into()).default_key(),
            "icons/a.png"
        );
        assert_eq!(
            SourceDescriptor::Url("https://example.com/a.png".into()).default_key(),
            "https://example.com/a.png"
        );
    }

    #[test]
    fn test_blank_sources() {
        assert!(SourceDescriptor::Url(String::new()).is_blank());
        assert!(SourceDescriptor::Asset("  ".into()).is_blank());
        assert!(!SourceDescriptor::Asset("a.png".into()).is_blank());
        assert!(!SourceDescriptor::Resource(0).is_blank());
    }

    #[test]
    fn test_cache_key_suffix_when_animation_disabled() {
        let source = SourceDescriptor::Url("https://example.com/a.gif".into());
        let mut options = RequestOptions::default();
        assert_eq!(
            options.cache_key(&source).as_deref(),
            Some("https://example.com/a.gif")
        );

        options.disable_animation = true;
        assert_eq!(
            options.cache_key(&source).as_deref(),
            Some("https://example.com/a.gif#noanim")
        );
        assert_eq!(
            options.origin_key(&source).as_deref(),
            Some("https://example.com/a.gif")
        );
    }

    #[test]
    fn test_empty_override_disables_key() {
        let options = RequestOptions {
            cache_key: Some(String::new()),
            ..RequestOptions::default()
        };
        assert!(options.cache_key(&SourceDescriptor::Resource(1)).is_none());
    }

    #[test]
    fn test_memory_hit_collapses_fade_unless_forced() {
        let fade = FadeSpec {
            steps: 8,
            duration_ms: 300,
            always: false,
        };
        assert_eq!(fade.for_memory_hit().steps, 1);

        let forced = FadeSpec {
            always: true,
            ..fade
        };
        assert_eq!(forced.for_memory_hit().steps, 8);
    }

    #[test]
    fn test_disk_index_needed_for_store_only() {
        let policy = CachePolicy::skipping(false, false, true, false);
        assert!(policy.needs_disk_index());
        let policy = CachePolicy::skipping(false, false, true, true);
        assert!(!policy.needs_disk_index());
    }
}
