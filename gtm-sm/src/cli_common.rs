use clap::{Args, ValueEnum};
use gtm_sm::config::GtmConfig;
use gtm_sm::image_sampler::{generate_rectangle_scenes, InMemoryImages, SceneArgs};

pub use candle_util::{candle_core, candle_nn};
pub use log::info;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    #[arg(long, default_value_t = 2, help = "Spatial-state dimension")]
    pub s_dim: usize,

    #[arg(long, default_value_t = 16, help = "Latent dimension")]
    pub z_dim: usize,

    #[arg(
        long,
        default_value_t = 256,
        help = "Observation horizon",
        long_help = "Number of leading walk steps whose patches are seen.\n\
		     Their spatial states form the memory."
    )]
    pub observe_dim: usize,

    #[arg(
        long,
        default_value_t = 288,
        help = "Total horizon of a training walk",
        long_help = "Observation plus prediction steps during training.\n\
		     Must exceed the observation horizon."
    )]
    pub total_dim: usize,

    #[arg(long, short = 'k', default_value_t = 5, help = "Memories per prediction step")]
    pub knn: usize,

    #[arg(long, default_value_t = 0.001, help = "Transition noise std")]
    pub r_std: f64,

    #[arg(long, default_value_t = 1e-4, help = "Distance regulariser")]
    pub delta: f64,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Monte Carlo draws for the KL surrogate"
    )]
    pub kl_samples: usize,

    #[arg(long, short = 'b', default_value_t = 1, help = "Images per minibatch")]
    pub batch_size: usize,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    pub device: ComputeDevice,

    #[arg(
        long,
        default_value_t = 0,
        help = "A device for cuda",
        long_help = "For cuda or metal, we may want to choose a different device."
    )]
    pub device_no: usize,
}

impl ModelArgs {
    pub fn to_config(&self) -> GtmConfig {
        GtmConfig {
            s_dim: self.s_dim,
            z_dim: self.z_dim,
            observe_dim: self.observe_dim,
            total_dim: self.total_dim,
            k_nearest_neighbour: self.knn,
            r_std: self.r_std,
            delta: self.delta,
            kl_samples: self.kl_samples,
            batch_size: self.batch_size,
            ..Default::default()
        }
    }

    pub fn device(&self) -> anyhow::Result<candle_core::Device> {
        Ok(match self.device {
            ComputeDevice::Metal => candle_core::Device::new_metal(self.device_no)?,
            ComputeDevice::Cuda => candle_core::Device::new_cuda(self.device_no)?,
            _ => candle_core::Device::Cpu,
        })
    }
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    #[arg(
        long,
        help = "Image file (.safetensors)",
        long_help = "A safetensors file holding an (n x 3 x h x w) tensor.\n\
		     Without it, scenes of random rectangles are simulated."
    )]
    pub images: Option<Box<str>>,

    #[arg(long, help = "Tensor name inside the image file")]
    pub key: Option<Box<str>>,

    #[arg(long, default_value_t = 64, help = "Number of simulated scenes")]
    pub num_scenes: usize,

    #[arg(long, default_value_t = 6, help = "Rectangles per simulated scene")]
    pub num_rects: usize,
}

impl ImageArgs {
    pub fn load(&self, image_size: usize, rseed: u64) -> anyhow::Result<InMemoryImages> {
        match self.images.as_deref() {
            Some(file) => InMemoryImages::from_safetensors(file, self.key.as_deref()),
            None => generate_rectangle_scenes(&SceneArgs {
                num_images: self.num_scenes,
                image_size,
                num_rects: self.num_rects,
                rseed,
            }),
        }
    }
}

pub fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
