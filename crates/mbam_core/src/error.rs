use thiserror::Error;

use crate::ftilde::FtildeError;
use crate::store::StoreError;
use crate::symbolic::AlgebraError;

#[derive(Debug, Error)]
pub enum ReductionError {
    #[error("no limit reached on geodesic {geodesic}: {reason}")]
    NoLimitReached { geodesic: String, reason: String },
    #[error("invalid theta substitution for {theta}: {reason}")]
    InvalidSubstitution { theta: String, reason: String },
    #[error("thetas still unresolved after {passes} passes: {unresolved:?}")]
    UnresolvedTheta {
        passes: usize,
        unresolved: Vec<String>,
    },
    #[error("invalid model {model}: {reason}")]
    InvalidModel { model: String, reason: String },
    #[error("no candidate reparameterization remains for {model} ({tried} tried)")]
    NoCandidatesRemain { model: String, tried: usize },
    #[error("limit type '{0}' has no entry in the template key legend")]
    MissingLegendEntry(String),
    #[error("parameter '{0}' is not a non-constant parameter of the model")]
    UnknownParameter(String),
    #[error("no reduced model to save")]
    NothingToSave,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Algebra(#[from] AlgebraError),
}

impl From<FtildeError> for ReductionError {
    fn from(err: FtildeError) -> Self {
        match err {
            FtildeError::InvalidSubstitution { theta, reason } => {
                ReductionError::InvalidSubstitution { theta, reason }
            }
            FtildeError::UnresolvedTheta { passes, unresolved } => {
                ReductionError::UnresolvedTheta { passes, unresolved }
            }
        }
    }
}
