use thiserror::Error;

use crate::assembler::AssemblyError;
use crate::feed::FeedError;
use crate::media::{MediaError, PlaceholderError};
use crate::scratch::ScratchError;

/// Why a single channel run produced no video.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("scratch directory: {0}")]
    Scratch(#[from] ScratchError),
    #[error("feed: {0}")]
    Feed(#[from] FeedError),
    #[error("media: {0}")]
    Media(#[from] MediaError),
    #[error("placeholder: {0}")]
    Placeholder(#[from] PlaceholderError),
    #[error("assembly: {0}")]
    Assembly(#[from] AssemblyError),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Scratch(_) => "scratch",
            PipelineError::Feed(_) => "feed",
            PipelineError::Media(_) => "media",
            PipelineError::Placeholder(_) => "placeholder",
            PipelineError::Assembly(_) => "assembly",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
