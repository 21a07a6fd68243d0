//! Mixture-of-Gaussians posterior over predicted latents.
//!
//! Each prediction step mixes the latent distributions of its K retrieved
//! memories. Component weights are inverse squared distances in
//! spatial-state space:
//!
//! ```text
//! w_k = 1 / (d_k² + δ),   ŵ_k = w_k / Σ_j w_j
//! p(z) = Σ_k ŵ_k N(z; μ_k, σ_k²)
//! ```

use crate::spatial_memory::RetrievalResult;
use candle_util::candle_core::{Result, Tensor, D};
use candle_util::candle_loss_functions::{
    log_gaussian_element_pdf, log_gaussian_pdf, log_sum_exp,
};
use candle_util::candle_sampling::{reparameterized_sample, reparameterized_sample_repeat};
use rand::Rng;

/// Rows of `x_of` picked by the retrieval, one block per prediction step
///
/// * `x_of` - per observation step features (o x f)
///
/// Returns (p x K x f)
pub fn gather_memories(x_of: &Tensor, retrieval: &RetrievalResult) -> Result<Tensor> {
    let np = retrieval.num_steps();
    let knn = retrieval.indices.first().map(|r| r.len()).unwrap_or(0);
    let nf = x_of.dim(1)?;
    let idx = Tensor::from_vec(retrieval.flat_indices(), np * knn, x_of.device())?;
    x_of.index_select(&idx, 0)?.reshape((np, knn, nf))
}

/// Squared distances between each predicted state and its memories
///
/// * `st_obs_os` - observation-phase states of one sample (o x s)
/// * `st_pred_ps` - prediction-phase states of the same sample (p x s)
///
/// Returns (p x K), differentiable in both state sequences
pub fn memory_sq_distances(
    st_obs_os: &Tensor,
    st_pred_ps: &Tensor,
    retrieval: &RetrievalResult,
) -> Result<Tensor> {
    let mem_pks = gather_memories(st_obs_os, retrieval)?;
    mem_pks
        .broadcast_sub(&st_pred_ps.unsqueeze(1)?)?
        .sqr()?
        .sum(D::Minus1)
}

/// ŵ_k = (d_k² + δ)⁻¹ / Σ_j (d_j² + δ)⁻¹ along the last axis
pub fn normalized_importance_weights(dk2: &Tensor, delta: f64) -> Result<Tensor> {
    let wk = (dk2 + delta)?.recip()?;
    wk.broadcast_div(&wk.sum_keepdim(D::Minus1)?)
}

/// Inverse-CDF categorical draw: the first component whose cumulative
/// weight exceeds `u`. Rounding that leaves the total just below `u`
/// falls back to the last component.
pub fn sample_component(weights: &[f32], u: f32) -> usize {
    let mut cumsum = 0f32;
    for (k, &w) in weights.iter().enumerate() {
        cumsum += w;
        if cumsum > u {
            return k;
        }
    }
    weights.len().saturating_sub(1)
}

/// The memory-based mixture posterior of one sample
pub struct MixtureDensityEstimator {
    pub delta: f64,
    pub kl_samples: usize,
}

impl MixtureDensityEstimator {
    pub fn new(delta: f64, kl_samples: usize) -> Self {
        Self { delta, kl_samples }
    }

    /// log ŵ (p x K)
    pub fn log_weights(&self, dk2_pk: &Tensor) -> Result<Tensor> {
        normalized_importance_weights(dk2_pk, self.delta)?.log()
    }

    /// log Σ_k ŵ_k N(z; μ_k, σ_k²), stabilised by the per-row maximum
    ///
    /// * `z_psz` - samples (p x S x z)
    /// * `log_w_pk` - log weights (p x K)
    /// * `mem_mean_pkz`, `mem_std_pkz` - memory latents (p x K x z)
    ///
    /// Returns (p x S)
    pub fn log_mixture_density(
        &self,
        z_psz: &Tensor,
        log_w_pk: &Tensor,
        mem_mean_pkz: &Tensor,
        mem_std_pkz: &Tensor,
    ) -> Result<Tensor> {
        let log_p_psk = log_gaussian_element_pdf(z_psz, mem_mean_pkz, mem_std_pkz)?
            .broadcast_add(&log_w_pk.unsqueeze(1)?)?;
        log_sum_exp(&log_p_psk, 2)
    }

    /// Monte Carlo KL surrogate of one sample
    ///
    /// Σ_t mean_s [ log q(z_ts) - log p_mix(z_ts) ],  z_ts ~ q_t
    ///
    /// * `log_w_pk` - log importance weights (p x K)
    /// * `q_mean_pz`, `q_std_pz` - prediction-phase posteriors (p x z)
    /// * `mem_mean_pkz`, `mem_std_pkz` - memory latents (p x K x z)
    pub fn kl_surrogate<R: Rng>(
        &self,
        log_w_pk: &Tensor,
        q_mean_pz: &Tensor,
        q_std_pz: &Tensor,
        mem_mean_pkz: &Tensor,
        mem_std_pkz: &Tensor,
        rng: &mut R,
    ) -> Result<Tensor> {
        let z_psz = reparameterized_sample_repeat(q_mean_pz, q_std_pz, self.kl_samples, rng)?;
        let log_q_ps = log_gaussian_pdf(&z_psz, q_mean_pz, q_std_pz)?;
        let log_mix_ps = self.log_mixture_density(&z_psz, log_w_pk, mem_mean_pkz, mem_std_pkz)?;
        (log_q_ps - log_mix_ps)?.mean(1)?.sum_all()
    }

    /// Ancestral draw from one step's mixture: pick a memory, then sample
    /// its Gaussian
    ///
    /// * `weights_k` - normalized importance weights
    /// * `mem_mean_kz`, `mem_std_kz` - memory latents (K x z)
    ///
    /// Returns the latent (z) and the chosen component
    pub fn sample_latent<R: Rng>(
        &self,
        weights_k: &[f32],
        mem_mean_kz: &Tensor,
        mem_std_kz: &Tensor,
        rng: &mut R,
    ) -> Result<(Tensor, usize)> {
        let u = rng.random::<f32>();
        let k = sample_component(weights_k, u);
        let z = reparameterized_sample(&mem_mean_kz.get(k)?, &mem_std_kz.get(k)?, rng)?;
        Ok((z, k))
    }
}
