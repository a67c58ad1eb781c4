//! The project registry and asset cache. A project is rooted at a single
//! declaration file whose project declaration names the glob patterns for
//! the rest of the declaration files. Every asset's refined form is cached
//! against the content hashes of its declaring file and any extra tracked
//! paths; an asset is recomputed only when one of those hashes moves.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::Hash32;
use crate::error::{AssetError, FatalError, ServerError};
use crate::loader::{DeclarationLoader, EvalFn, RawDeclaration};
use crate::sequence::{CompiledSequence, compile_sequence};
use crate::value::{
    AssetKind, NodeInstance, NodeResolver, NodeSpec, refine_node_asset, refine_node_list,
    refine_project,
};

/// A file whose content participates in cache invalidation.
///
/// The modification time is only a gate: a matching mtime skips rehashing,
/// a differing one triggers it, and the content hash alone decides whether
/// anything actually changed.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub path: Utf8PathBuf,
    modified: Option<SystemTime>,
    pub hash: Hash32,
}

impl TrackedFile {
    pub fn new(path: impl Into<Utf8PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let modified = std::fs::metadata(&path)?.modified().ok();
        let hash = Hash32::hash_file(&path)?;
        Ok(Self {
            path,
            modified,
            hash,
        })
    }

    /// Re-stats the file and rehashes it if the mtime moved. Returns
    /// whether the content hash changed.
    pub fn refresh(&mut self) -> io::Result<bool> {
        let modified = std::fs::metadata(&self.path)?.modified().ok();
        if modified.is_some() && modified == self.modified {
            return Ok(false);
        }
        self.modified = modified;
        let hash = Hash32::hash_file(&self.path)?;
        let changed = hash != self.hash;
        self.hash = hash;
        Ok(changed)
    }
}

/// An asset's refined, cacheable form.
#[derive(Debug, Clone, PartialEq)]
pub enum RefinedAsset {
    Project { name: String },
    Node(NodeSpec),
    NodeList(Vec<NodeInstance>),
    Sequence(CompiledSequence),
}

struct CachedAsset {
    source_hash: Hash32,
    tracked_hashes: Vec<Hash32>,
    value: Arc<RefinedAsset>,
}

/// A registered declaration, plus its cached refinement when one exists.
pub struct AssetDescriptor {
    pub name: String,
    pub kind: AssetKind,
    /// The declaration file this asset came from.
    pub file: Utf8PathBuf,
    /// Extra files whose content feeds into the asset's value.
    pub tracked: Vec<TrackedFile>,
    evaluate: EvalFn,
    cached: Option<CachedAsset>,
}

/// One open project: the declaration registry plus the asset cache.
pub struct Project {
    loader: Arc<dyn DeclarationLoader>,
    root: TrackedFile,
    name: String,
    patterns: Vec<String>,
    files: BTreeMap<Utf8PathBuf, TrackedFile>,
    assets: BTreeMap<String, AssetDescriptor>,
}

impl Project {
    /// Opens the project rooted at `root`: reads the project declaration,
    /// then discovers and registers every matching declaration file.
    pub fn open(
        root: impl AsRef<Utf8Path>,
        loader: Arc<dyn DeclarationLoader>,
    ) -> Result<Self, ServerError> {
        let root = root.as_ref();
        let mut project = Self {
            loader,
            root: TrackedFile::new(root).map_err(FatalError::Io)?,
            name: String::new(),
            patterns: Vec::new(),
            files: BTreeMap::new(),
            assets: BTreeMap::new(),
        };
        project.reload_root()?;
        project.refresh()?;
        Ok(project)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root.path
    }

    /// Registered descriptors, in asset name order.
    pub fn list_assets(&self) -> impl Iterator<Item = &AssetDescriptor> {
        self.assets.values()
    }

    pub fn descriptor(&self, name: &str) -> Option<&AssetDescriptor> {
        self.assets.get(name)
    }

    /// An asset's id: its rank among same-kind assets in name order. Ids
    /// are not stable across registry changes; clients must not persist
    /// them beyond a response.
    pub fn asset_id(&self, kind: AssetKind, name: &str) -> Option<u32> {
        self.assets
            .values()
            .filter(|desc| desc.kind == kind)
            .position(|desc| desc.name == name)
            .map(|rank| rank as u32)
    }

    /// Brings the registry in line with the filesystem: re-reads a changed
    /// project root, drops assets of vanished or unmatched files, and
    /// registers new and changed ones. Cached refinements of untouched
    /// files survive.
    pub fn refresh(&mut self) -> Result<(), ServerError> {
        // Root first; a changed root can alter the discovery patterns.
        let before = self.root.clone();
        if self.root.refresh().map_err(FatalError::Io)? {
            debug!(root = %self.root.path, "project root changed, reloading");
            if let Err(err) = self.reload_root() {
                // Keep the old mtime and hash, otherwise the next refresh
                // would see an unchanged root and serve the stale
                // registry instead of retrying the reload.
                self.root = before;
                return Err(err.into());
            }
        }

        let sweep: Vec<(Utf8PathBuf, io::Result<bool>)> = self
            .files
            .par_iter_mut()
            .map(|(path, file)| (path.clone(), file.refresh()))
            .collect();

        let mut changed = Vec::new();
        for (path, status) in sweep {
            match status {
                Ok(true) => changed.push(path),
                Ok(false) => {}
                // Vanished files are dropped by the discovery pass below.
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(AssetError::new(format!("cannot read '{path}': {err}"))
                        .with_file(path)
                        .into());
                }
            }
        }

        let discovered = self.discover()?;

        let gone: Vec<Utf8PathBuf> = self
            .files
            .keys()
            .filter(|path| !discovered.contains(*path))
            .cloned()
            .collect();
        for path in gone {
            debug!(file = %path, "declaration file dropped");
            self.files.remove(&path);
            self.drop_file(&path);
        }

        for path in changed {
            if !self.files.contains_key(&path) {
                continue;
            }
            debug!(file = %path, "declaration file changed");
            self.drop_file(&path);
            self.register_file(&path)?;
        }

        for path in discovered {
            if self.files.contains_key(&path) {
                continue;
            }
            debug!(file = %path, "declaration file discovered");
            let tracked = TrackedFile::new(&path).map_err(|err| {
                AssetError::new(format!("cannot read '{path}': {err}")).with_file(path.clone())
            })?;
            self.files.insert(path.clone(), tracked);
            self.register_file(&path)?;
        }

        Ok(())
    }

    /// Produces the asset's refined form, reusing the cached value when
    /// the declaring file and every tracked path still hash the same.
    ///
    /// Tracked paths are re-hashed here on every call. The declaring
    /// file's hash is the one recorded by the last [`Project::refresh`],
    /// so callers that want source-file edits picked up must refresh
    /// first; the server does so once per request.
    pub fn retrieve_asset(
        &mut self,
        kind: AssetKind,
        name: &str,
    ) -> Result<Arc<RefinedAsset>, AssetError> {
        let root_path = self.root.path.clone();
        let root_hash = self.root.hash;

        let (file, evaluate, source_hash) = {
            let Some(desc) = self.assets.get_mut(name) else {
                return Err(AssetError::new(format!("no asset named '{name}'"))
                    .with_root(root_path)
                    .with_asset(name));
            };
            if desc.kind != kind {
                return Err(AssetError::new(format!(
                    "asset '{name}' is a {}, not a {kind}",
                    desc.kind
                ))
                .with_root(root_path)
                .with_file(desc.file.clone())
                .with_asset(name));
            }

            let source_hash = if desc.file == root_path {
                root_hash
            } else {
                match self.files.get(&desc.file) {
                    Some(file) => file.hash,
                    None => {
                        return Err(AssetError::new("declaring file is no longer tracked")
                            .with_root(root_path)
                            .with_file(desc.file.clone())
                            .with_asset(name));
                    }
                }
            };

            for tracked in &mut desc.tracked {
                tracked.refresh().map_err(|err| {
                    AssetError::new(format!("cannot read tracked path '{}': {err}", tracked.path))
                        .with_root(root_path.clone())
                        .with_file(desc.file.clone())
                        .with_asset(name)
                })?;
            }

            if let Some(cached) = &desc.cached {
                let fresh = cached.source_hash == source_hash
                    && cached.tracked_hashes.len() == desc.tracked.len()
                    && cached
                        .tracked_hashes
                        .iter()
                        .zip(&desc.tracked)
                        .all(|(hash, tracked)| *hash == tracked.hash);
                if fresh {
                    return Ok(Arc::clone(&cached.value));
                }
            }

            (desc.file.clone(), Arc::clone(&desc.evaluate), source_hash)
        };

        debug!(asset = name, %kind, "evaluating asset");
        let refined = self
            .evaluate_asset(kind, name, &evaluate)
            .map_err(|err| err.contextualize(&root_path, Some(&file), Some(name)))?;
        let refined = Arc::new(refined);

        if let Some(desc) = self.assets.get_mut(name) {
            desc.cached = Some(CachedAsset {
                source_hash,
                tracked_hashes: desc.tracked.iter().map(|tracked| tracked.hash).collect(),
                value: Arc::clone(&refined),
            });
        }
        Ok(refined)
    }

    fn evaluate_asset(
        &mut self,
        kind: AssetKind,
        name: &str,
        evaluate: &EvalFn,
    ) -> Result<RefinedAsset, AssetError> {
        let value = evaluate().map_err(|err| AssetError::new(format!("{err:#}")))?;
        Ok(match kind {
            AssetKind::Project => {
                let ext = self.root.path.extension().unwrap_or("");
                let decl = refine_project(&value, ext)?;
                RefinedAsset::Project { name: decl.name }
            }
            AssetKind::Node => RefinedAsset::Node(refine_node_asset(name, &value, self)?),
            AssetKind::NodeList => RefinedAsset::NodeList(refine_node_list(&value, self)?),
            AssetKind::Sequence => RefinedAsset::Sequence(compile_sequence(&value, self)?),
        })
    }

    /// Re-reads the project declaration and re-registers every asset the
    /// root file declares. Root failures are fatal: without a valid
    /// project declaration the registry has no shape.
    fn reload_root(&mut self) -> Result<(), FatalError> {
        let root_path = self.root.path.clone();
        let decls = self
            .loader
            .load(&root_path)
            .map_err(|err| FatalError::RootLoader(root_path.clone(), err))?;

        let count = decls
            .iter()
            .filter(|decl| decl.kind == AssetKind::Project)
            .count();
        let Some(project) = decls.iter().find(|decl| decl.kind == AssetKind::Project) else {
            return Err(FatalError::ProjectDeclaration(root_path, 0));
        };
        if count != 1 {
            return Err(FatalError::ProjectDeclaration(root_path, count));
        }

        let value = (project.evaluate)()
            .map_err(|err| FatalError::RootLoader(root_path.clone(), err))?;
        let refined = refine_project(&value, root_path.extension().unwrap_or(""))
            .map_err(|err| FatalError::MalformedProject(root_path.clone(), err))?;
        self.name = refined.name;
        self.patterns = refined.patterns;

        self.drop_file(&root_path);
        for decl in decls {
            self.register(&root_path, decl)
                .map_err(|err| FatalError::MalformedProject(root_path.clone(), err))?;
        }
        Ok(())
    }

    /// Runs the project's glob patterns over the root directory. The root
    /// declaration file never matches itself.
    fn discover(&self) -> Result<Vec<Utf8PathBuf>, AssetError> {
        let dir = self.root.path.parent().unwrap_or(Utf8Path::new(""));
        let mut found = Vec::new();
        for pattern in &self.patterns {
            let full = dir.join(pattern);
            let entries = glob::glob(full.as_str()).map_err(|err| {
                AssetError::new(format!("invalid asset pattern '{pattern}': {err}"))
                    .with_root(self.root.path.clone())
            })?;
            for entry in entries {
                let path = entry.map_err(|err| {
                    AssetError::new(err.to_string()).with_root(self.root.path.clone())
                })?;
                let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
                    warn!("skipping non-UTF-8 path under project root");
                    continue;
                };
                if path.is_file() && path != self.root.path && !found.contains(&path) {
                    found.push(path);
                }
            }
        }
        Ok(found)
    }

    fn register_file(&mut self, path: &Utf8Path) -> Result<(), AssetError> {
        let result = self.register_decls(path);
        if result.is_err() {
            // Unwind the partial registration and forget the file's hash,
            // so the next refresh rediscovers it and tries again.
            self.files.remove(path);
            self.drop_file(path);
        }
        result
    }

    fn register_decls(&mut self, path: &Utf8Path) -> Result<(), AssetError> {
        let decls = self
            .loader
            .load(path)
            .map_err(|err| AssetError::new(format!("{err:#}")).with_file(path))?;
        for decl in decls {
            if decl.kind == AssetKind::Project {
                return Err(AssetError::new(
                    "project declaration outside the project root",
                )
                .with_file(path)
                .with_asset(decl.name));
            }
            self.register(path, decl)?;
        }
        Ok(())
    }

    fn register(&mut self, file: &Utf8Path, decl: RawDeclaration) -> Result<(), AssetError> {
        let mut tracked = Vec::with_capacity(decl.tracked_paths.len());
        for path in &decl.tracked_paths {
            tracked.push(TrackedFile::new(path).map_err(|err| {
                AssetError::new(format!("cannot track '{path}': {err}"))
                    .with_file(file)
                    .with_asset(decl.name.clone())
            })?);
        }

        match self.assets.entry(decl.name.clone()) {
            Entry::Occupied(existing) => Err(AssetError::new(format!(
                "duplicate asset '{}', already declared in '{}'",
                decl.name,
                existing.get().file
            ))
            .with_file(file)),
            Entry::Vacant(slot) => {
                slot.insert(AssetDescriptor {
                    name: decl.name,
                    kind: decl.kind,
                    file: file.to_owned(),
                    tracked,
                    evaluate: decl.evaluate,
                    cached: None,
                });
                Ok(())
            }
        }
    }

    fn drop_file(&mut self, path: &Utf8Path) {
        self.assets.retain(|_, desc| desc.file != path);
    }
}

impl NodeResolver for Project {
    fn node_spec(&mut self, name: &str) -> Result<NodeSpec, AssetError> {
        match &*self.retrieve_asset(AssetKind::Node, name)? {
            RefinedAsset::Node(spec) => Ok(spec.clone()),
            _ => Err(AssetError::new(format!("asset '{name}' is not a node"))),
        }
    }

    fn asset_exists(&mut self, kind: AssetKind, name: &str) -> Result<bool, AssetError> {
        Ok(self
            .assets
            .get(name)
            .is_some_and(|desc| desc.kind == kind))
    }
}

/// Test scaffolding shared with the server tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::value::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves pre-registered declarations keyed by file path.
    #[derive(Default)]
    pub(crate) struct FakeLoader {
        decls: Mutex<HashMap<Utf8PathBuf, Vec<RawDeclaration>>>,
    }

    impl FakeLoader {
        pub(crate) fn set(&self, path: &Utf8Path, decls: Vec<RawDeclaration>) {
            self.decls.lock().unwrap().insert(path.to_owned(), decls);
        }
    }

    impl DeclarationLoader for FakeLoader {
        fn load(&self, path: &Utf8Path) -> anyhow::Result<Vec<RawDeclaration>> {
            self.decls
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no declarations registered for '{path}'"))
        }
    }

    pub(crate) fn project_decl(name: &str) -> RawDeclaration {
        let name_in_value = name.to_owned();
        RawDeclaration {
            name: name.to_owned(),
            kind: AssetKind::Project,
            tracked_paths: vec![],
            evaluate: Arc::new(move || {
                Ok(Value::list([Value::list([
                    Value::sym("name"),
                    Value::sym(name_in_value.clone()),
                ])]))
            }),
        }
    }

    pub(crate) fn node_decl(
        name: &str,
        evaluations: Arc<AtomicUsize>,
        tracked_paths: Vec<Utf8PathBuf>,
    ) -> RawDeclaration {
        RawDeclaration {
            name: name.to_owned(),
            kind: AssetKind::Node,
            tracked_paths,
            evaluate: Arc::new(move || {
                evaluations.fetch_add(1, Ordering::SeqCst);
                Ok(Value::list([Value::list([
                    Value::sym("properties"),
                    Value::list([Value::sym("hp"), Value::sym("u16")]),
                ])]))
            }),
        }
    }

    /// Writes the file and pushes its mtime strictly forward, so the
    /// mtime gate never masks a rewrite on coarse-grained filesystems.
    pub(crate) fn write_file(path: &Utf8Path, contents: &str) {
        static BUMP: AtomicU64 = AtomicU64::new(1);
        std::fs::write(path, contents).unwrap();
        let bump = BUMP.fetch_add(1, Ordering::SeqCst);
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(bump))
            .unwrap();
    }

    pub(crate) fn rig() -> (tempfile::TempDir, Utf8PathBuf, Arc<FakeLoader>) {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let root = dir_path.join("project.decl");
        write_file(&root, "root");
        let loader = Arc::new(FakeLoader::default());
        loader.set(&root, vec![project_decl("demo")]);
        (dir, root, loader)
    }
}
