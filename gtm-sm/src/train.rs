use crate::image_sampler::ImageSampler;
use crate::model::GtmSm;

use candle_util::candle_core::{DType, Device};
use candle_util::candle_nn::{AdamW, Optimizer, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub device: Device,
    pub verbose: bool,
    pub show_progress: bool,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 1,
            num_epochs: 100,
            device: Device::Cpu,
            verbose: false,
            show_progress: true,
            seed: 42,
        }
    }
}

/// Per-epoch averages of both loss terms
#[derive(Clone, Debug, Default)]
pub struct TrainTrace {
    pub kld: Vec<f32>,
    pub nll: Vec<f32>,
}

impl TrainTrace {
    pub fn len(&self) -> usize {
        self.kld.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kld.is_empty()
    }
}

/// Fit every variable in `variable_map` by minimizing kld + nll
///
/// * `model` - built on `variable_map`
/// * `data` - image minibatches, re-dealt every epoch
/// * `train_config` - optimizer and reporting options; its `seed`
///   drives minibatches, walks, state noise and Monte Carlo draws
pub fn train_gtm_sm<DataS>(
    model: &GtmSm,
    variable_map: &VarMap,
    data: &mut DataS,
    train_config: &TrainConfig,
) -> anyhow::Result<TrainTrace>
where
    DataS: ImageSampler,
{
    if train_config.batch_size != model.config().batch_size {
        return Err(anyhow::anyhow!(
            "training batch size {} differs from the model's {}",
            train_config.batch_size,
            model.config().batch_size
        ));
    }

    let device = &train_config.device;
    let mut rng = StdRng::seed_from_u64(train_config.seed);
    let mut adam = AdamW::new_lr(variable_map.all_vars(), train_config.learning_rate.into())?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut trace = TrainTrace::default();

    for epoch in 0..train_config.num_epochs {
        data.shuffle_minibatch(train_config.batch_size, &mut rng)?;
        let num_minibatch = data.num_minibatch();

        let mut kld_tot = 0f32;
        let mut nll_tot = 0f32;

        for b in 0..num_minibatch {
            let x = data.minibatch_images(b, device)?;
            let out = model.forward_train(&x, &mut rng)?;

            let loss = (&out.kld_loss + &out.nll_loss)?;
            adam.backward_step(&loss)?;

            kld_tot += out.kld_loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
            nll_tot += out.nll_loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        }

        let denom = num_minibatch.max(1) as f32;
        trace.kld.push(kld_tot / denom);
        trace.nll.push(nll_tot / denom);
        pb.inc(1);

        let (kld, nll) = (kld_tot / denom, nll_tot / denom);
        if !kld.is_finite() || !nll.is_finite() {
            warn!("[{}] non-finite loss: kld {}, nll {}", epoch + 1, kld, nll);
        }
        if train_config.verbose {
            info!("[{}] kld: {}, nll: {}", epoch + 1, kld, nll);
        }
    } // each epoch

    pb.finish_and_clear();
    Ok(trace)
}
