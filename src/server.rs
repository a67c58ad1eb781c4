//! The request loop. A connection carries a stream of length-prefixed
//! requests; each request is answered with a status byte followed by the
//! response body, and a malformed asset produces an error response rather
//! than tearing the connection down. Only framing and I/O failures are
//! fatal.
//!
//! The server is transport-agnostic: anything `Read + Write` can carry a
//! connection, so callers typically accept on a `TcpListener` (or a Unix
//! socket) and hand each stream to [`AssetServer::handle_connection`],
//! stopping once it reports [`Outcome::Shutdown`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::codec::{Decode, Encode};
use crate::error::{AssetError, CodecError, FatalError, ServerError};
use crate::loader::DeclarationLoader;
use crate::project::{AssetDescriptor, Project, RefinedAsset};
use crate::value::{AssetKind, Variable};

const REQ_GET_ASSET: u8 = 0;
const REQ_LIST_ASSETS: u8 = 1;
const REQ_CLEAR_CACHE: u8 = 2;
const REQ_SHUTDOWN: u8 = 3;

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client hung up; keep accepting connections.
    Continue,
    /// The client asked the server to stop.
    Shutdown,
}

/// The connection handler. Projects are opened lazily on first request and
/// kept, with their caches, for the server's lifetime. A single lock
/// serializes requests across connections; every response is computed
/// against a registry state no older than its request.
pub struct AssetServer {
    loader: Arc<dyn DeclarationLoader>,
    projects: Mutex<HashMap<Utf8PathBuf, Project>>,
}

impl AssetServer {
    pub fn new(loader: Arc<dyn DeclarationLoader>) -> Self {
        Self {
            loader,
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Serves requests from `stream` until the client disconnects, asks
    /// for shutdown, or a fatal error occurs.
    pub fn handle_connection(
        &self,
        stream: &mut (impl Read + Write),
    ) -> Result<Outcome, FatalError> {
        loop {
            let mut tag = [0u8; 1];
            if let Err(err) = stream.read_exact(&mut tag) {
                return match err.kind() {
                    io::ErrorKind::UnexpectedEof => Ok(Outcome::Continue),
                    _ => Err(FatalError::Io(err)),
                };
            }

            // Responses are staged in a buffer so that a failure halfway
            // through encoding can still be turned into a clean error
            // response instead of desyncing the stream.
            let mut response = Vec::new();
            match tag[0] {
                REQ_GET_ASSET => {
                    let root = Utf8PathBuf::from(String::decode(stream)?);
                    let kind = AssetKind::decode(stream)?;
                    let name = String::decode(stream)?;
                    debug!(%root, %kind, name, "get-asset request");
                    let mut projects = self.projects();
                    let result = Self::write_asset(
                        &mut projects,
                        &self.loader,
                        &root,
                        kind,
                        &name,
                        &mut response,
                    );
                    Self::resolve(result, &mut response)?;
                }
                REQ_LIST_ASSETS => {
                    let root = Utf8PathBuf::from(String::decode(stream)?);
                    let kind = AssetKind::decode(stream)?;
                    debug!(%root, %kind, "list-assets request");
                    let mut projects = self.projects();
                    let result = Self::write_asset_list(
                        &mut projects,
                        &self.loader,
                        &root,
                        kind,
                        &mut response,
                    );
                    Self::resolve(result, &mut response)?;
                }
                REQ_CLEAR_CACHE => {
                    info!("clearing project cache");
                    self.projects().clear();
                    STATUS_OK.encode(&mut response)?;
                }
                REQ_SHUTDOWN => {
                    info!("shutdown requested");
                    STATUS_OK.encode(&mut response)?;
                    stream.write_all(&response)?;
                    stream.flush()?;
                    return Ok(Outcome::Shutdown);
                }
                other => return Err(CodecError::UnknownRequest(other).into()),
            }
            stream.write_all(&response)?;
            stream.flush()?;
        }
    }

    fn projects(&self) -> MutexGuard<'_, HashMap<Utf8PathBuf, Project>> {
        self.projects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the project on first use, refreshes it on every later one.
    fn ensure_project<'a>(
        projects: &'a mut HashMap<Utf8PathBuf, Project>,
        loader: &Arc<dyn DeclarationLoader>,
        root: &Utf8Path,
    ) -> Result<&'a mut Project, ServerError> {
        match projects.entry(root.to_owned()) {
            Entry::Occupied(entry) => {
                let project = entry.into_mut();
                project.refresh()?;
                Ok(project)
            }
            Entry::Vacant(slot) => {
                info!(%root, "opening project");
                Ok(slot.insert(Project::open(root, Arc::clone(loader))?))
            }
        }
    }

    fn write_asset(
        projects: &mut HashMap<Utf8PathBuf, Project>,
        loader: &Arc<dyn DeclarationLoader>,
        root: &Utf8Path,
        kind: AssetKind,
        name: &str,
        out: &mut Vec<u8>,
    ) -> Result<(), ServerError> {
        let project = Self::ensure_project(projects, loader, root)?;
        let asset = project.retrieve_asset(kind, name)?;
        let project = &*project;
        let desc = project
            .descriptor(name)
            .ok_or_else(|| AssetError::new(format!("no asset named '{name}'")))?;

        STATUS_OK.encode(out)?;
        Self::encode_meta(project, desc, out)?;

        let mut ids = |kind: AssetKind, name: &str| -> Option<u32> { project.asset_id(kind, name) };
        match &*asset {
            RefinedAsset::Project { name } => name.encode(out)?,
            RefinedAsset::Node(spec) => {
                Self::encode_variables(&spec.parameters, out)?;
                Self::encode_variables(&spec.properties, out)?;
            }
            RefinedAsset::NodeList(instances) => {
                (instances.len() as u32).encode(out)?;
                for instance in instances {
                    instance.node.encode(out)?;
                    let node_id = ids(AssetKind::Node, &instance.node).ok_or_else(|| {
                        AssetError::new(format!("unknown node '{}'", instance.node))
                    })?;
                    node_id.encode(out)?;
                    (instance.args.len() as u32).encode(out)?;
                    for (ty, value) in &instance.args {
                        ty.encode(out)?;
                        value.lower(&mut ids)?.encode(out)?;
                    }
                }
            }
            RefinedAsset::Sequence(sequence) => {
                sequence.node.encode(out)?;
                (sequence.ops.len() as u32).encode(out)?;
                for op in &sequence.ops {
                    op.lower(&mut ids)?.encode(out)?;
                }
            }
        }
        Ok(())
    }

    fn write_asset_list(
        projects: &mut HashMap<Utf8PathBuf, Project>,
        loader: &Arc<dyn DeclarationLoader>,
        root: &Utf8Path,
        kind: AssetKind,
        out: &mut Vec<u8>,
    ) -> Result<(), ServerError> {
        let project = &*Self::ensure_project(projects, loader, root)?;
        let matching = || project.list_assets().filter(|desc| desc.kind == kind);
        STATUS_OK.encode(out)?;
        (matching().count() as u32).encode(out)?;
        for desc in matching() {
            Self::encode_meta(project, desc, out)?;
        }
        Ok(())
    }

    /// Asset metadata: id, name, kind, then every path whose content the
    /// asset depends on, the declaring file last.
    fn encode_meta(
        project: &Project,
        desc: &AssetDescriptor,
        out: &mut impl Write,
    ) -> Result<(), ServerError> {
        let id = project
            .asset_id(desc.kind, &desc.name)
            .ok_or_else(|| AssetError::new(format!("asset '{}' is not registered", desc.name)))?;
        id.encode(out)?;
        desc.name.encode(out)?;
        desc.kind.encode(out)?;
        ((desc.tracked.len() + 1) as u32).encode(out)?;
        for tracked in &desc.tracked {
            tracked.path.as_str().encode(out)?;
        }
        desc.file.as_str().encode(out)?;
        Ok(())
    }

    fn encode_variables(variables: &[Variable], out: &mut impl Write) -> io::Result<()> {
        (variables.len() as u32).encode(out)?;
        for variable in variables {
            variable.name.encode(out)?;
            variable.ty.encode(out)?;
        }
        Ok(())
    }

    /// Turns an asset-level failure into an error response; lets fatal
    /// ones tear the connection down.
    fn resolve(result: Result<(), ServerError>, out: &mut Vec<u8>) -> Result<(), FatalError> {
        match result {
            Ok(()) => Ok(()),
            Err(ServerError::Asset(err)) => {
                warn!(%err, "request failed");
                out.clear();
                Self::encode_error(&err, out).map_err(FatalError::Io)
            }
            Err(ServerError::Fatal(err)) => Err(err),
        }
    }

    fn encode_error(err: &AssetError, out: &mut impl Write) -> io::Result<()> {
        STATUS_ERROR.encode(out)?;
        err.project_root
            .as_ref()
            .map(|path| path.as_str())
            .unwrap_or("")
            .encode(out)?;
        err.asset_file
            .as_ref()
            .map(|path| path.as_str())
            .unwrap_or("")
            .encode(out)?;
        err.asset.as_deref().unwrap_or("").encode(out)?;
        err.message.encode(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::testing::{node_decl, rig, write_file};
    use crate::value::Type;
    use std::sync::atomic::AtomicUsize;

    /// One scripted connection: requests in, captured responses out.
    struct Pipe {
        input: io::Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Pipe {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: io::Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn get_asset_request(root: &Utf8Path, kind: AssetKind, name: &str) -> Vec<u8> {
        let mut request = Vec::new();
        REQ_GET_ASSET.encode(&mut request).unwrap();
        root.as_str().encode(&mut request).unwrap();
        kind.encode(&mut request).unwrap();
        name.encode(&mut request).unwrap();
        request
    }

    #[test]
    fn get_asset_round_trips_over_the_wire() {
        let (_dir, root, loader) = rig();
        let file = root.parent().unwrap().join("hero.decl");
        write_file(&file, "decl");
        let evaluations = Arc::new(AtomicUsize::new(0));
        loader.set(&file, vec![node_decl("hero", evaluations, vec![])]);

        let server = AssetServer::new(loader);
        let mut pipe = Pipe::new(get_asset_request(&root, AssetKind::Node, "hero"));
        assert_eq!(
            server.handle_connection(&mut pipe).unwrap(),
            Outcome::Continue
        );

        let mut out = io::Cursor::new(pipe.output);
        assert_eq!(u8::decode(&mut out).unwrap(), STATUS_OK);
        assert_eq!(u32::decode(&mut out).unwrap(), 0);
        assert_eq!(String::decode(&mut out).unwrap(), "hero");
        assert_eq!(AssetKind::decode(&mut out).unwrap(), AssetKind::Node);
        assert_eq!(
            Vec::<String>::decode(&mut out).unwrap(),
            vec![file.to_string()]
        );
        // Node payload: no parameters, one property.
        assert_eq!(u32::decode(&mut out).unwrap(), 0);
        assert_eq!(u32::decode(&mut out).unwrap(), 1);
        assert_eq!(String::decode(&mut out).unwrap(), "hp");
        assert_eq!(Type::decode(&mut out).unwrap(), Type::U16);
        assert_eq!(out.position(), out.get_ref().len() as u64);
    }

    #[test]
    fn missing_assets_produce_an_error_response() {
        let (_dir, root, loader) = rig();
        let server = AssetServer::new(loader);
        let mut pipe = Pipe::new(get_asset_request(&root, AssetKind::Node, "ghost"));
        assert_eq!(
            server.handle_connection(&mut pipe).unwrap(),
            Outcome::Continue
        );

        let mut out = io::Cursor::new(pipe.output);
        assert_eq!(u8::decode(&mut out).unwrap(), STATUS_ERROR);
        assert_eq!(String::decode(&mut out).unwrap(), root.as_str());
        assert_eq!(String::decode(&mut out).unwrap(), "");
        assert_eq!(String::decode(&mut out).unwrap(), "ghost");
        assert!(!String::decode(&mut out).unwrap().is_empty());
    }

    #[test]
    fn list_assets_returns_metadata_in_name_order() {
        let (_dir, root, loader) = rig();
        let dir = root.parent().unwrap();
        let evaluations = Arc::new(AtomicUsize::new(0));
        for name in ["zeta", "alpha"] {
            let file = dir.join(format!("{name}.decl"));
            write_file(&file, name);
            loader.set(&file, vec![node_decl(name, evaluations.clone(), vec![])]);
        }

        let server = AssetServer::new(loader);
        let mut request = Vec::new();
        REQ_LIST_ASSETS.encode(&mut request).unwrap();
        root.as_str().encode(&mut request).unwrap();
        AssetKind::Node.encode(&mut request).unwrap();
        let mut pipe = Pipe::new(request);
        server.handle_connection(&mut pipe).unwrap();

        let mut out = io::Cursor::new(pipe.output);
        assert_eq!(u8::decode(&mut out).unwrap(), STATUS_OK);
        assert_eq!(u32::decode(&mut out).unwrap(), 2);
        let mut names = Vec::new();
        for id in 0..2u32 {
            assert_eq!(u32::decode(&mut out).unwrap(), id);
            names.push(String::decode(&mut out).unwrap());
            assert_eq!(AssetKind::decode(&mut out).unwrap(), AssetKind::Node);
            let _paths = Vec::<String>::decode(&mut out).unwrap();
        }
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn clear_cache_and_shutdown_are_acknowledged() {
        let (_dir, root, loader) = rig();
        let server = AssetServer::new(loader);

        // Prime the cache, then clear it and shut down on one connection.
        let mut request = Vec::new();
        REQ_LIST_ASSETS.encode(&mut request).unwrap();
        root.as_str().encode(&mut request).unwrap();
        AssetKind::Project.encode(&mut request).unwrap();
        REQ_CLEAR_CACHE.encode(&mut request).unwrap();
        REQ_SHUTDOWN.encode(&mut request).unwrap();

        let mut pipe = Pipe::new(request);
        assert_eq!(
            server.handle_connection(&mut pipe).unwrap(),
            Outcome::Shutdown
        );
        assert!(server.projects().is_empty());

        let mut out = io::Cursor::new(pipe.output);
        assert_eq!(u8::decode(&mut out).unwrap(), STATUS_OK);
        let _count = u32::decode(&mut out).unwrap();
        let _id = u32::decode(&mut out).unwrap();
        let _name = String::decode(&mut out).unwrap();
        let _kind = AssetKind::decode(&mut out).unwrap();
        let _paths = Vec::<String>::decode(&mut out).unwrap();
        assert_eq!(u8::decode(&mut out).unwrap(), STATUS_OK);
        assert_eq!(u8::decode(&mut out).unwrap(), STATUS_OK);
    }

    #[test]
    fn unknown_request_tags_are_fatal() {
        let (_dir, _root, loader) = rig();
        let server = AssetServer::new(loader);
        let mut pipe = Pipe::new(vec![99]);
        assert!(matches!(
            server.handle_connection(&mut pipe),
            Err(FatalError::Framing(CodecError::UnknownRequest(99)))
        ));
    }

    #[test]
    fn an_empty_connection_ends_cleanly() {
        let (_dir, _root, loader) = rig();
        let server = AssetServer::new(loader);
        let mut pipe = Pipe::new(Vec::new());
        assert_eq!(
            server.handle_connection(&mut pipe).unwrap(),
            Outcome::Continue
        );
        assert!(pipe.output.is_empty());
    }
}
