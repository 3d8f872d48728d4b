use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

use {
    include_dir::{Dir, include_dir},
    tracing::debug,
};

pub const INDEX_HTML: &str = "ui/index.html";
pub const FAVICON: &str = "ui/favicon.ico";

/// Cache policy for static UI content compiled into the binary.
pub const CACHE_CONTROL_CONTENT: &str = "public, max-age=3600";

/// Cache policy for anything that must not be reused.
pub const CACHE_CONTROL_NONE: &str = "no-cache, private";

static EMBEDDED: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/assets");

/// Where the web UI files come from.
pub trait ContentSource: Send + Sync {
    /// Bytes of the named asset, `None` if it does not exist.
    fn get(&self, name: &str) -> Option<Cow<'static, [u8]>>;

    /// `Cache-Control` value for assets served from this source.
    fn cache_control(&self) -> &'static str;
}

/// UI compiled into the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedContent;

impl ContentSource for EmbeddedContent {
    fn get(&self, name: &str) -> Option<Cow<'static, [u8]>> {
        EMBEDDED
            .get_file(name)
            .map(|f| Cow::Borrowed(f.contents()))
    }

    fn cache_control(&self) -> &'static str {
        CACHE_CONTROL_CONTENT
    }
}

/// UI read from a directory on every request, for working on the UI
/// without rebuilding.
#[derive(Debug, Clone)]
pub struct DirContent {
    root: PathBuf,
}

impl DirContent {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContentSource for DirContent {
    fn get(&self, name: &str) -> Option<Cow<'static, [u8]>> {
        let path = self.root.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Some(Cow::Owned(bytes)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "asset not readable");
                None
            },
        }
    }

    fn cache_control(&self) -> &'static str {
        CACHE_CONTROL_NONE
    }
}
