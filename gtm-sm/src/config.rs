use crate::error::{config_error, Result};
use crate::random_walk::NUM_ACTIONS;

/// patch side length the encoder and decoder are built for
pub const PATCH_SIZE: usize = 8;

/// rollout length of the inference forward pass unless told otherwise
pub const DEFAULT_SAMPLE_HORIZON: usize = 512;

/// Model dimensions and rollout lengths
#[derive(Clone, Debug, PartialEq)]
pub struct GtmConfig {
    /// patch side length
    pub x_dim: usize,
    /// number of actions (four moves and stop)
    pub a_dim: usize,
    /// spatial-state dimension
    pub s_dim: usize,
    /// latent dimension
    pub z_dim: usize,
    /// observation horizon
    pub observe_dim: usize,
    /// observation + prediction horizon of a training pass
    pub total_dim: usize,
    /// transition noise standard deviation
    pub r_std: f64,
    /// number of memories retrieved per prediction step
    pub k_nearest_neighbour: usize,
    /// added to squared distances before inverting them
    pub delta: f64,
    /// Monte Carlo draws of the KL surrogate
    pub kl_samples: usize,
    pub batch_size: usize,
    /// grid side length of the random walk
    pub grid_size: usize,
    /// pixels between neighbouring grid cells
    pub patch_stride: usize,
    /// hidden width of the state gate
    pub gate_hidden: usize,
}

impl Default for GtmConfig {
    fn default() -> Self {
        Self {
            x_dim: PATCH_SIZE,
            a_dim: NUM_ACTIONS,
            s_dim: 2,
            z_dim: 16,
            observe_dim: 256,
            total_dim: 288,
            r_std: 0.001,
            k_nearest_neighbour: 5,
            delta: 1e-4,
            kl_samples: 1000,
            batch_size: 1,
            grid_size: 9,
            patch_stride: 3,
            gate_hidden: 5,
        }
    }
}

impl GtmConfig {
    /// Check every dimension relationship the model relies on
    pub fn validate(&self) -> Result<()> {
        if self.x_dim != PATCH_SIZE {
            return Err(config_error(format!(
                "x_dim must be {}, got {}",
                PATCH_SIZE, self.x_dim
            )));
        }
        if self.a_dim != NUM_ACTIONS {
            return Err(config_error(format!(
                "a_dim must be {}, got {}",
                NUM_ACTIONS, self.a_dim
            )));
        }
        for (name, value) in [
            ("s_dim", self.s_dim),
            ("z_dim", self.z_dim),
            ("observe_dim", self.observe_dim),
            ("kl_samples", self.kl_samples),
            ("batch_size", self.batch_size),
            ("patch_stride", self.patch_stride),
            ("gate_hidden", self.gate_hidden),
        ] {
            if value == 0 {
                return Err(config_error(format!("{} must be at least 1", name)));
            }
        }
        self.validate_horizon(self.total_dim)?;
        if self.k_nearest_neighbour == 0 || self.k_nearest_neighbour > self.observe_dim {
            return Err(config_error(format!(
                "k_nearest_neighbour must be in [1, observe_dim = {}], got {}",
                self.observe_dim, self.k_nearest_neighbour
            )));
        }
        if self.grid_size < 2 {
            return Err(config_error(format!(
                "grid_size must be at least 2, got {}",
                self.grid_size
            )));
        }
        if !self.r_std.is_finite() || self.r_std < 0. {
            return Err(config_error(format!(
                "r_std must be finite and non-negative, got {}",
                self.r_std
            )));
        }
        if !self.delta.is_finite() || self.delta <= 0. {
            return Err(config_error(format!(
                "delta must be finite and positive, got {}",
                self.delta
            )));
        }
        Ok(())
    }

    /// A rollout needs at least one prediction step after the observations
    pub fn validate_horizon(&self, horizon: usize) -> Result<()> {
        if self.observe_dim == 0 || horizon <= self.observe_dim {
            return Err(config_error(format!(
                "horizon {} must exceed observe_dim {} >= 1",
                horizon, self.observe_dim
            )));
        }
        Ok(())
    }

    /// side length of the image covered by the grid of patches
    pub fn image_size(&self) -> usize {
        self.patch_stride * self.grid_size.saturating_sub(1) + self.x_dim
    }

    /// number of prediction steps in a training pass
    pub fn predict_dim(&self) -> usize {
        self.total_dim.saturating_sub(self.observe_dim)
    }
}
