use crate::cli_common::*;
use clap::Args;
use gtm_sm::config::DEFAULT_SAMPLE_HORIZON;
use gtm_sm::image_sampler::ImageSampler;
use gtm_sm::model::GtmSm;
use gtm_sm::patches::{assemble_image, extract_patches, write_image_tsv};
use matrix_util::common_io::write_lines;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results, per batch element {b}:\n\
		     - {out}.{b}.truth.ch{c}.tsv.gz: the input image\n\
		     - {out}.{b}.recon.ch{c}.tsv.gz: observed patches then synthesized ones\n\
		     - {out}.{b}.walk.tsv.gz: step, phase, row, col, recalled step\n"
    )]
    out: Box<str>,

    #[arg(
        long,
        short = 'w',
        help = "Fitted parameters (.safetensors)",
        long_help = "Parameters saved by `gtm-sm train`.\n\
		     Without them, the model keeps its random initialization."
    )]
    weights: Option<Box<str>>,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    data: ImageArgs,

    #[arg(
        long,
        default_value_t = DEFAULT_SAMPLE_HORIZON,
        help = "Steps of the sampled walk",
        long_help = "Observation plus synthesized steps of this run.\n\
		     Must exceed the observation horizon."
    )]
    horizon: usize,

    #[arg(long, default_value_t = 0.1, help = "Initial parameter std")]
    init_std: f64,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, short, default_value_t = false, help = "Verbose output")]
    verbose: bool,
}

pub fn sample_gtm_sm(args: &SampleArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let config = args.model.to_config();
    let dev = args.model.device()?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut parameters = candle_nn::VarMap::new();
    let param_builder =
        candle_nn::VarBuilder::from_varmap(&parameters, candle_core::DType::F32, &dev);
    let model = GtmSm::new(config.clone(), param_builder)?;

    match args.weights.as_deref() {
        Some(file) => {
            parameters.load(file)?;
            info!("loaded parameters from {}", file);
        }
        None => {
            candle_util::candle_sampling::reset_parameters(&parameters, args.init_std, &mut rng)?;
        }
    }

    let mut data = args.data.load(config.image_size(), args.seed)?;
    data.shuffle_minibatch(config.batch_size, &mut rng)?;
    let x = data.minibatch_images(0, &dev)?;

    let out = model.forward_sample(&x, args.horizon, &mut rng)?;
    let nobs = config.observe_dim;
    let geometry = model.geometry();

    let observed = (0..nobs)
        .map(|t| extract_patches(&x, &out.walk, t, geometry))
        .collect::<candle_core::Result<Vec<_>>>()?;
    let painted = observed
        .into_iter()
        .chain(out.x_prediction.iter().cloned())
        .collect::<Vec<_>>();

    let side = geometry.image_size();
    for b in 0..config.batch_size {
        let truth = x.get(b)?.narrow(1, 0, side)?.narrow(2, 0, side)?;
        write_image_tsv(&truth, &format!("{}.{}.truth", args.out, b), true)?;

        let recon = assemble_image(&painted, &out.walk, 0, b, geometry)?;
        write_image_tsv(&recon, &format!("{}.{}.recon", args.out, b), true)?;

        let walk = &out.walk.walks[b];
        let lines = std::iter::once("step\tphase\trow\tcol\trecalled".to_string())
            .chain(walk.positions.iter().enumerate().map(|(t, pos)| {
                if t < nobs {
                    format!("{}\tobserved\t{}\t{}\t{}", t, pos[0], pos[1], t)
                } else {
                    let recalled = out.components[b][t - nobs];
                    format!("{}\tpredicted\t{}\t{}\t{}", t, pos[0], pos[1], recalled)
                }
            }))
            .map(|s| s.into_boxed_str())
            .collect::<Vec<_>>();
        write_lines(&lines, &format!("{}.{}.walk.tsv.gz", args.out, b))?;
    }

    info!(
        "synthesized {} steps after {} observed for {} images",
        out.horizon - nobs,
        nobs,
        config.batch_size
    );
    Ok(())
}
