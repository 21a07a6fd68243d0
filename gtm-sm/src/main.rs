mod cli_common;
mod cli_sample;
mod cli_train;

use clap::{Parser, Subcommand};
use cli_sample::*;
use cli_train::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "GTM-SM",
    long_about = "Generative Temporal Model with Spatial Memory\n\
		  A walker reads 8 x 8 patches of an image along a random walk\n\
		  and predicts unseen patches from spatially recalled memories."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fit the model on images",
        long_about = "Fit encoder, decoder and spatial-state transition by\n\
		      minimizing the KL surrogate plus reconstruction error\n\
		      over random walks on each image.\n"
    )]
    Train(TrainArgs),

    #[command(
        about = "Synthesize unseen patches along a long walk",
        long_about = "Observe the first steps of a walk, then recall latents\n\
		      from the observed steps closest in spatial state and\n\
		      decode them for the remaining steps.\n"
    )]
    Sample(SampleArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Train(args) => {
            fit_gtm_sm(args)?;
        }
        Commands::Sample(args) => {
            sample_gtm_sm(args)?;
        }
    }

    Ok(())
}
