//! Error types of the spatial-memory model.

use candle_util::candle_core;
use std::error::Error;
use std::fmt;

/// Errors arising from model construction or a forward pass.
#[derive(Debug)]
pub enum GtmError {
    /// Dimension relationships in the configuration are invalid.
    Config {
        /// Which invariant was violated.
        reason: String,
    },
    /// The input batch does not fit the patch geometry.
    ShapeMismatch {
        /// Human-readable description of the accepted shape.
        expected: String,
        /// The shape that was passed in.
        found: Vec<usize>,
    },
    /// The trajectory sampler could not find a move that stays on the grid.
    BoundaryRejectionExhausted {
        /// Number of draws before giving up.
        attempts: usize,
        /// Grid cell the walker was stuck at.
        position: [usize; 2],
    },
    /// Tensor computation failed.
    Candle(candle_core::Error),
    /// Nearest-neighbour index construction or search failed.
    Knn(String),
}

impl fmt::Display for GtmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::ShapeMismatch { expected, found } => {
                write!(f, "input shape {found:?} does not match {expected}")
            }
            Self::BoundaryRejectionExhausted { attempts, position } => write!(
                f,
                "no on-grid action found after {attempts} draws at position {position:?}"
            ),
            Self::Candle(e) => write!(f, "candle: {e}"),
            Self::Knn(reason) => write!(f, "nearest-neighbour search: {reason}"),
        }
    }
}

impl Error for GtmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Candle(e) => Some(e),
            _ => None,
        }
    }
}

impl From<candle_core::Error> for GtmError {
    fn from(e: candle_core::Error) -> Self {
        Self::Candle(e)
    }
}

pub type Result<T> = std::result::Result<T, GtmError>;

/// shorthand for configuration failures
pub(crate) fn config_error<S: Into<String>>(reason: S) -> GtmError {
    GtmError::Config {
        reason: reason.into(),
    }
}
