use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input type: expected a file path, a byte buffer, or a byte array (got {0})")]
    InvalidInputType(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("docx package error: {0}")]
    Package(String),

    #[error("docx package is missing required part {0}")]
    MissingPart(String),

    #[error("malformed xml in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("invalid options: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn xml(part: &str, err: impl std::fmt::Display) -> Self {
        Error::Xml {
            part: part.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Package(e.to_string())
    }
}
