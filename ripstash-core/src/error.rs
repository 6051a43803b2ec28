use thiserror::Error;

/// Errors surfaced by the ripstash pipeline.
///
/// Drive-state variants are reported to the caller verbatim; the outer
/// API layer maps them onto its own status vocabulary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("the requested resource is not yet available")]
    NotReady,

    #[error("the requested resource is busy with another request")]
    Busy,

    #[error("no disc in drive")]
    NoDisc,

    #[error("drive tray open")]
    TrayOpen,

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("the requested resource was not found")]
    NotFound,

    #[error("blob {0} is missing from the filesystem")]
    BlobMissing(String),

    #[error("no subtitles were found")]
    NoSubtitles,

    #[error("subtitles were found, but were inconsistent")]
    UnreliableSubtitles,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("provider error: {0}")]
    Provider(#[from] reqwest::Error),

    #[error("received status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("analyzer failed: {0}")]
    Analysis(String),

    #[error("{op}: {source}")]
    Context {
        op: String,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Wraps the error with a description of the failing operation.
    pub fn context(self, op: impl Into<String>) -> Self {
        CoreError::Context {
            op: op.into(),
            source: Box::new(self),
        }
    }

    /// True when the underlying cause is a missing-row lookup.
    pub fn is_not_found(&self) -> bool {
        match self {
            CoreError::NotFound => true,
            CoreError::Storage(sqlx::Error::RowNotFound) => true,
            CoreError::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
