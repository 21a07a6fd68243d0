use crate::config::GtmConfig;
use crate::error::{GtmError, Result};
use crate::mixture_density::{
    gather_memories, memory_sq_distances, normalized_importance_weights, MixtureDensityEstimator,
};
use crate::patches::{extract_patches, PatchGeometry};
use crate::random_walk::{random_walk, WalkBatch};
use crate::spatial_memory::{retrieve_memories, RetrievalResult};
use crate::spatial_state::SpatialStateTransition;

use candle_util::candle_core::{DType, Device, IndexOp, Tensor};
use candle_util::candle_loss_functions::gaussian_nll;
use candle_util::candle_model_traits::{PatchDecoderT, PatchEncoderT};
use candle_util::candle_nn::VarBuilder;
use candle_util::candle_patch_decoder::ConvPatchDecoder;
use candle_util::candle_patch_encoder::{ConvPatchEncoder, PATCH_CHANNELS};
use candle_util::candle_sampling::reparameterized_sample;
use log::{debug, warn};
use rand::Rng;
use std::ops::Range;

/// Actions and spatial states of one rollout
pub struct Rollout {
    pub walk: WalkBatch,
    /// one-hot actions (batch x a x horizon)
    pub actions: Tensor,
    /// one (batch x s) state per observation step
    pub st_observation: Vec<Tensor>,
    /// one (batch x s) state per prediction step
    pub st_prediction: Vec<Tensor>,
}

/// Latent posteriors of consecutive steps
pub struct LatentSteps {
    /// (steps x batch x z)
    pub mean: Tensor,
    /// (steps x batch x z)
    pub std: Tensor,
}

pub struct TrainOutput {
    /// KL surrogate summed over samples and prediction steps
    pub kld_loss: Tensor,
    /// squared reconstruction error summed over prediction steps
    pub nll_loss: Tensor,
    pub st_observation: Vec<Tensor>,
    pub st_prediction: Vec<Tensor>,
    /// one (batch x 3 x p x p) reconstruction per prediction step
    pub x_prediction: Vec<Tensor>,
    pub walk: WalkBatch,
}

pub struct SampleOutput {
    /// one (batch x 3 x p x p) synthesized patch per prediction step
    pub x_prediction: Vec<Tensor>,
    /// memory picked for each sample and prediction step
    pub components: Vec<Vec<usize>>,
    pub st_observation: Vec<Tensor>,
    pub st_prediction: Vec<Tensor>,
    pub walk: WalkBatch,
    pub horizon: usize,
}

/// Generative temporal model with spatial memory
///
/// A forward call samples a walk over the image grid, rolls the spatial
/// state along it, encodes the observed patches, and recalls latents for
/// the prediction steps from the observed steps whose spatial states lie
/// closest.
pub struct GtmSm {
    config: GtmConfig,
    geometry: PatchGeometry,
    encoder: ConvPatchEncoder,
    decoder: ConvPatchDecoder,
    transition: SpatialStateTransition,
    mixture: MixtureDensityEstimator,
    dtype: DType,
    device: Device,
}

impl GtmSm {
    /// Validate the configuration, then create the variables of the
    /// encoder (`enc.*`), decoder (`dec.*`) and state transition (`st.*`)
    pub fn new(config: GtmConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let encoder = ConvPatchEncoder::new(config.x_dim, config.z_dim, vb.clone())?;
        let decoder = ConvPatchDecoder::new(config.x_dim, config.z_dim, vb.clone())?;
        let transition = SpatialStateTransition::new(
            config.a_dim,
            config.s_dim,
            config.gate_hidden,
            config.r_std,
            vb.clone(),
        )?;
        let mixture = MixtureDensityEstimator::new(config.delta, config.kl_samples);

        Ok(Self {
            geometry: PatchGeometry::from_config(&config),
            dtype: vb.dtype(),
            device: vb.device().clone(),
            config,
            encoder,
            decoder,
            transition,
            mixture,
        })
    }

    pub fn config(&self) -> &GtmConfig {
        &self.config
    }

    pub fn geometry(&self) -> &PatchGeometry {
        &self.geometry
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Accept (batch x 3 x h x w), or (3 x h x w) when the batch size is
    /// one, with both sides covering the patch grid
    pub fn check_input(&self, x: &Tensor) -> Result<Tensor> {
        let side = self.geometry.image_size();
        let expected = || {
            format!(
                "({} x {} x h x w) with h, w >= {}",
                self.config.batch_size, PATCH_CHANNELS, side
            )
        };

        let x = match x.rank() {
            3 if self.config.batch_size == 1 => x.unsqueeze(0)?,
            4 => x.clone(),
            _ => {
                return Err(GtmError::ShapeMismatch {
                    expected: expected(),
                    found: x.dims().to_vec(),
                })
            }
        };

        let dims = x.dims();
        if dims[0] != self.config.batch_size
            || dims[1] != PATCH_CHANNELS
            || dims[2] < side
            || dims[3] < side
        {
            return Err(GtmError::ShapeMismatch {
                expected: expected(),
                found: dims.to_vec(),
            });
        }

        Ok(x.to_device(&self.device)?.to_dtype(self.dtype)?)
    }

    /// Sample a walk and roll the spatial state along it
    pub fn rollout<R: Rng>(&self, horizon: usize, rng: &mut R) -> Result<Rollout> {
        let config = &self.config;
        let walk = random_walk(config.batch_size, horizon, config.grid_size, rng)?;
        let actions = walk.action_one_hot(self.dtype, &self.device)?;

        let st_observation = self.transition.observe(&actions, config.observe_dim, rng)?;
        let s_last = st_observation
            .last()
            .ok_or_else(|| crate::error::config_error("empty observation phase"))?;
        let st_prediction = self
            .transition
            .predict(s_last, &actions, config.observe_dim, rng)?;

        Ok(Rollout {
            walk,
            actions,
            st_observation,
            st_prediction,
        })
    }

    /// Encode the patches visited during `steps` in one encoder call
    pub fn encode_steps(
        &self,
        x_bchw: &Tensor,
        walk: &WalkBatch,
        steps: Range<usize>,
    ) -> Result<LatentSteps> {
        let nt = steps.len();
        let nb = walk.batch_size();

        let patches = steps
            .map(|t| extract_patches(x_bchw, walk, t, &self.geometry))
            .collect::<candle_util::candle_core::Result<Vec<_>>>()?;

        let (mean, std) = self.encoder.forward(&Tensor::cat(&patches, 0)?)?;
        let nz = self.encoder.dim_latent();
        Ok(LatentSteps {
            mean: mean.reshape((nt, nb, nz))?,
            std: std.reshape((nt, nb, nz))?,
        })
    }

    /// Normalized importance weights of every sample's memories
    ///
    /// Returns one (prediction steps x K) tensor per sample, each row
    /// summing to one
    pub fn memory_weights(
        &self,
        st_observation: &[Tensor],
        st_prediction: &[Tensor],
        retrieval: &[RetrievalResult],
    ) -> Result<Vec<Tensor>> {
        let dk2 = self.memory_distances(st_observation, st_prediction, retrieval)?;
        dk2.iter()
            .map(|d| -> Result<Tensor> {
                Ok(normalized_importance_weights(d, self.config.delta)?)
            })
            .collect()
    }

    fn memory_distances(
        &self,
        st_observation: &[Tensor],
        st_prediction: &[Tensor],
        retrieval: &[RetrievalResult],
    ) -> Result<Vec<Tensor>> {
        let st_obs_obs = Tensor::stack(st_observation, 0)?;
        let st_pred_pbs = Tensor::stack(st_prediction, 0)?;

        retrieval
            .iter()
            .enumerate()
            .map(|(b, ret)| -> Result<Tensor> {
                Ok(memory_sq_distances(
                    &st_obs_obs.i((.., b))?.contiguous()?,
                    &st_pred_pbs.i((.., b))?.contiguous()?,
                    ret,
                )?)
            })
            .collect()
    }

    /// Training pass over a full `total_dim` rollout
    ///
    /// * `x` - images (batch x 3 x h x w)
    /// * `rng` - every random draw of the pass comes from here
    pub fn forward_train<R: Rng>(&self, x: &Tensor, rng: &mut R) -> Result<TrainOutput> {
        let x = self.check_input(x)?;
        let (nobs, horizon) = (self.config.observe_dim, self.config.total_dim);
        let npred = horizon - nobs;

        let Rollout {
            walk,
            st_observation,
            st_prediction,
            ..
        } = self.rollout(horizon, rng)?;

        let z_obs = self.encode_steps(&x, &walk, 0..nobs)?;
        let z_pred = self.encode_steps(&x, &walk, nobs..horizon)?;

        // reconstruction from each prediction step's own posterior
        let mut nll_loss = Tensor::zeros((), self.dtype, &self.device)?;
        let mut x_prediction = Vec::with_capacity(npred);
        for t in 0..npred {
            let z_bz = reparameterized_sample(&z_pred.mean.get(t)?, &z_pred.std.get(t)?, rng)?;
            let x_true = extract_patches(&x, &walk, nobs + t, &self.geometry)?;
            let (recon, nll_t) = self
                .decoder
                .forward_with_loss(&z_bz, &x_true, &gaussian_nll)?;
            nll_loss = (nll_loss + nll_t)?;
            x_prediction.push(recon);
        }

        let retrieval = retrieve_memories(
            &st_observation,
            &st_prediction,
            self.config.k_nearest_neighbour,
            rng.random::<u64>(),
        )?;

        let dk2 = self.memory_distances(&st_observation, &st_prediction, &retrieval)?;

        let mut kld_loss = Tensor::zeros((), self.dtype, &self.device)?;
        for (b, (ret, dk2_pk)) in retrieval.iter().zip(dk2.iter()).enumerate() {
            let log_w_pk = self.mixture.log_weights(dk2_pk)?;
            let mem_mean = gather_memories(&z_obs.mean.i((.., b))?.contiguous()?, ret)?;
            let mem_std = gather_memories(&z_obs.std.i((.., b))?.contiguous()?, ret)?;

            let kl_b = self.mixture.kl_surrogate(
                &log_w_pk,
                &z_pred.mean.i((.., b))?.contiguous()?,
                &z_pred.std.i((.., b))?.contiguous()?,
                &mem_mean,
                &mem_std,
                rng,
            )?;
            kld_loss = (kld_loss + kl_b)?;
        }

        let kld_val = kld_loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        let nll_val = nll_loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        if !kld_val.is_finite() || !nll_val.is_finite() {
            warn!("non-finite loss: kld {} nll {}", kld_val, nll_val);
        }
        debug!(
            "train pass: {} observed, {} predicted, kld {:.4}, nll {:.4}",
            nobs, npred, kld_val, nll_val
        );

        Ok(TrainOutput {
            kld_loss,
            nll_loss,
            st_observation,
            st_prediction,
            x_prediction,
            walk,
        })
    }

    /// Inference pass: encode only the observed steps and synthesize the
    /// rest of a `horizon`-step rollout from recalled memories
    ///
    /// * `x` - images (batch x 3 x h x w)
    /// * `horizon` - steps of this rollout; the configuration is untouched
    /// * `rng` - every random draw of the pass comes from here
    pub fn forward_sample<R: Rng>(
        &self,
        x: &Tensor,
        horizon: usize,
        rng: &mut R,
    ) -> Result<SampleOutput> {
        self.config.validate_horizon(horizon)?;
        let x = self.check_input(x)?;
        let nobs = self.config.observe_dim;
        let npred = horizon - nobs;
        let nb = self.config.batch_size;

        let Rollout {
            walk,
            st_observation,
            st_prediction,
            ..
        } = self.rollout(horizon, rng)?;

        let z_obs = self.encode_steps(&x, &walk, 0..nobs)?;

        let retrieval = retrieve_memories(
            &st_observation,
            &st_prediction,
            self.config.k_nearest_neighbour,
            rng.random::<u64>(),
        )?;

        let weights = self.memory_weights(&st_observation, &st_prediction, &retrieval)?;

        let mut z_samples = Vec::with_capacity(nb);
        let mut components = Vec::with_capacity(nb);

        for (b, (ret, w_pk)) in retrieval.iter().zip(weights.iter()).enumerate() {
            let w_pk = w_pk.to_dtype(DType::F32)?.to_vec2::<f32>()?;
            let mem_mean = gather_memories(&z_obs.mean.i((.., b))?.contiguous()?, ret)?;
            let mem_std = gather_memories(&z_obs.std.i((.., b))?.contiguous()?, ret)?;

            let mut z_b = Vec::with_capacity(npred);
            let mut k_b = Vec::with_capacity(npred);
            for (t, w_k) in w_pk.iter().enumerate() {
                let (z, k) =
                    self.mixture
                        .sample_latent(w_k, &mem_mean.get(t)?, &mem_std.get(t)?, rng)?;
                z_b.push(z);
                k_b.push(ret.indices[t][k]);
            }
            z_samples.push(Tensor::stack(&z_b, 0)?);
            components.push(k_b);
        }

        // (batch x pred x z) -> (pred * batch x z), decoded at once
        let nz = self.decoder.dim_latent();
        let z_all = Tensor::stack(&z_samples, 0)?
            .transpose(0, 1)?
            .contiguous()?
            .reshape((npred * nb, nz))?;
        let x_all = self.decoder.forward(&z_all)?;

        let x_prediction = (0..npred)
            .map(|t| x_all.narrow(0, t * nb, nb))
            .collect::<candle_util::candle_core::Result<Vec<_>>>()?;

        debug!(
            "sample pass: {} observed, {} synthesized over {} samples",
            nobs, npred, nb
        );

        Ok(SampleOutput {
            x_prediction,
            components,
            st_observation,
            st_prediction,
            walk,
            horizon,
        })
    }
}
