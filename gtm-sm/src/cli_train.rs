use crate::cli_common::*;
use clap::Args;
use gtm_sm::image_sampler::ImageSampler;
use gtm_sm::model::GtmSm;
use gtm_sm::train::{train_gtm_sm, TrainConfig};
use matrix_util::common_io::{mkdir, write_lines};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.safetensors: fitted parameters\n\
		     - {out}.trace.tsv.gz: per-epoch kld and nll\n"
    )]
    out: Box<str>,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    data: ImageArgs,

    #[arg(long, short = 'i', default_value_t = 100, help = "Number of epochs")]
    epochs: usize,

    #[arg(long, default_value_t = 1e-3, help = "Learning rate")]
    learning_rate: f32,

    #[arg(
        long,
        default_value_t = 0.1,
        help = "Initial parameter std",
        long_help = "Every parameter starts from N(0, std^2)."
    )]
    init_std: f64,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, short, default_value_t = false, help = "Verbose output")]
    verbose: bool,
}

pub fn fit_gtm_sm(args: &TrainArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let config = args.model.to_config();
    config.validate()?;
    let dev = args.model.device()?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut data = args.data.load(config.image_size(), args.seed)?;

    let parameters = candle_nn::VarMap::new();
    let param_builder =
        candle_nn::VarBuilder::from_varmap(&parameters, candle_core::DType::F32, &dev);

    let model = GtmSm::new(config.clone(), param_builder)?;
    candle_util::candle_sampling::reset_parameters(&parameters, args.init_std, &mut rng)?;

    info!(
        "training on {} images, {} observed / {} total steps",
        data.num_images(),
        config.observe_dim,
        config.total_dim
    );

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: config.batch_size,
        num_epochs: args.epochs,
        device: dev,
        verbose: args.verbose,
        show_progress: true,
        seed: args.seed.wrapping_add(1),
    };

    let trace = train_gtm_sm(&model, &parameters, &mut data, &train_config)?;

    let param_file = format!("{}.safetensors", args.out);
    mkdir(&param_file)?;
    parameters.save(&param_file)?;
    info!("saved parameters to {}", param_file);

    let lines = std::iter::once("epoch\tkld\tnll".to_string().into_boxed_str())
        .chain(
            trace
                .kld
                .iter()
                .zip(trace.nll.iter())
                .enumerate()
                .map(|(e, (kld, nll))| format!("{}\t{}\t{}", e + 1, kld, nll).into_boxed_str()),
        )
        .collect::<Vec<_>>();
    write_lines(&lines, &format!("{}.trace.tsv.gz", args.out))?;

    info!("done");
    Ok(())
}
