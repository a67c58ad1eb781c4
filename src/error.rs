use camino::Utf8PathBuf;
use thiserror::Error;

/// An error tied to a particular asset or declaration file.
///
/// Carries as much context as the failing stage had available. These errors
/// are converted into wire `Error` responses at the request boundary and
/// never terminate a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetError {
    pub project_root: Option<Utf8PathBuf>,
    pub asset_file: Option<Utf8PathBuf>,
    pub asset: Option<String>,
    pub message: String,
}

impl AssetError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            project_root: None,
            asset_file: None,
            asset: None,
            message: message.into(),
        }
    }

    pub fn with_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<Utf8PathBuf>) -> Self {
        self.asset_file = Some(file.into());
        self
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    /// Attaches context only where the error doesn't already carry it, so
    /// the innermost stage wins.
    pub(crate) fn contextualize(
        mut self,
        root: &Utf8PathBuf,
        file: Option<&Utf8PathBuf>,
        asset: Option<&str>,
    ) -> Self {
        self.project_root.get_or_insert_with(|| root.clone());
        if let (None, Some(file)) = (&self.asset_file, file) {
            self.asset_file = Some(file.clone());
        }
        if let (None, Some(asset)) = (&self.asset, asset) {
            self.asset = Some(asset.to_owned());
        }
        self
    }
}

impl std::fmt::Display for AssetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(file) = self.asset_file.as_ref().or(self.project_root.as_ref()) {
            write!(f, "{file}")?;
            if self.asset.is_some() {
                write!(f, ", ")?;
            } else {
                write!(f, ": ")?;
            }
        }
        if let Some(asset) = &self.asset {
            write!(f, "{asset}: ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AssetError {}

/// A failure to decode bytes from the wire. Any decode error means the
/// reader has desynced, so these always surface as [`FatalError::Framing`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("string payload is not valid UTF-8.\n{0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("unknown type tag {0}")]
    UnknownTypeTag(u8),

    #[error("unknown asset type {0}")]
    UnknownAssetKind(u8),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("unknown comparison {0}")]
    UnknownComparison(u8),

    #[error("unknown request type {0}")]
    UnknownRequest(u8),
}

/// An error the server cannot recover from within a request. Ends the
/// connection (or, for a broken project root, makes the project unusable)
/// instead of producing a wire `Error` response.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed request.\n{0}")]
    Framing(#[from] CodecError),

    #[error("'{0}': project root must contain exactly one project declaration, found {1}")]
    ProjectDeclaration(Utf8PathBuf, usize),

    #[error("'{0}': malformed project declaration.\n{1}")]
    MalformedProject(Utf8PathBuf, AssetError),

    #[error("'{0}': failed to load declarations from project root.\n{1}")]
    RootLoader(Utf8PathBuf, anyhow::Error),
}

/// Either error class, as produced by the cache layer.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Fatal(FatalError::Io(err))
    }
}
