#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod codec;
mod error;
mod loader;
mod project;
mod sequence;
mod server;
mod value;

use std::fmt::Debug;

pub use crate::codec::{Comparison, Decode, Encode, TypedValue, WireOp};
pub use crate::error::{AssetError, CodecError, FatalError, ServerError};
pub use crate::loader::{DeclarationLoader, EvalFn, RawDeclaration};
pub use crate::project::{AssetDescriptor, Project, RefinedAsset, TrackedFile};
pub use crate::sequence::{CompiledOp, CompiledSequence, Op};
pub use crate::server::{AssetServer, Outcome};
pub use crate::value::{
    AssetKind, NodeInstance, NodeResolver, NodeSpec, RefinedValue, Type, Value, Variable,
};

/// 32 bytes length generic hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_mmap_rayon(path)?
            .finalize()
            .into())
    }

    fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Optional `tracing` subscriber setup, enabled with the `logging` feature.
#[cfg(feature = "logging")]
pub mod logging {
    use tracing_subscriber::EnvFilter;

    /// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
    pub fn init() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }
}
