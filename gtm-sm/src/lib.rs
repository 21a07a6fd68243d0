pub mod config;
pub mod error;
pub mod image_sampler;
pub mod mixture_density;
pub mod model;
pub mod patches;
pub mod random_walk;
pub mod spatial_memory;
pub mod spatial_state;
pub mod train;

pub use config::GtmConfig;
pub use error::{GtmError, Result};
pub use model::GtmSm;
