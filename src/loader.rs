use std::fmt::Debug;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::value::{AssetKind, Value};

/// Produces the raw value of a declaration when the cache needs it. Held
/// behind an `Arc` so a declaration can be re-evaluated without reloading
/// its file.
pub type EvalFn = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

/// A single declaration as reported by a [`DeclarationLoader`], before any
/// refinement has looked at it.
#[derive(Clone)]
pub struct RawDeclaration {
    /// Declared asset name. Uniqueness across the project is checked by
    /// the cache, not the loader.
    pub name: String,
    pub kind: AssetKind,
    /// Files beyond the declaring one whose content this declaration
    /// depends on. Changes to any of them invalidate the cached asset.
    pub tracked_paths: Vec<Utf8PathBuf>,
    pub evaluate: EvalFn,
}

impl Debug for RawDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDeclaration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("tracked_paths", &self.tracked_paths)
            .finish_non_exhaustive()
    }
}

/// Parses declaration files into raw declarations.
///
/// The server is agnostic to the surface syntax; anything that can turn a
/// file into named, evaluatable declarations can back a project. Loaders
/// are shared across projects and may be called from multiple connections,
/// hence the `Send + Sync` bound.
pub trait DeclarationLoader: Send + Sync {
    fn load(&self, path: &Utf8Path) -> anyhow::Result<Vec<RawDeclaration>>;
}
