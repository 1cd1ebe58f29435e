use std::path::PathBuf;

use thiserror::Error;

use crate::scratch::ScratchError;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("no canonical images in {dir}")]
    NoImages { dir: PathBuf },
    #[error("encoder failed ({command}), exit status {status:?}: {stderr}")]
    Encoding {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Scratch(#[from] ScratchError),
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;
