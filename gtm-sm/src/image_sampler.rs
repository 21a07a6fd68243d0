use candle_util::candle_core::{safetensors, DType, Device, Tensor};
use candle_util::candle_patch_encoder::PATCH_CHANNELS;
use log::info;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// `ImageSampler` for minibatch learning over whole images
pub trait ImageSampler {
    /// images of minibatch `batch_idx` (batch x 3 x h x w)
    fn minibatch_images(&self, batch_idx: usize, target_device: &Device)
        -> anyhow::Result<Tensor>;

    fn num_minibatch(&self) -> usize;

    fn num_images(&self) -> usize;

    /// Re-deal the images into minibatches of exactly `batch_size`
    fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R)
        -> anyhow::Result<()>;
}

/// Images held in memory as one (n x 3 x h x w) tensor
pub struct InMemoryImages {
    images: Tensor,
    minibatches: Minibatches,
}

pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    /// Shuffle, then cut into full chunks. With fewer samples than
    /// `batch_size` the shuffled order is cycled to fill one chunk.
    pub fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R) {
        self.samples.shuffle(rng);
        let nbatch = (self.size() / batch_size).max(1);

        self.chunks = (0..nbatch)
            .map(|b| {
                (b * batch_size..(b + 1) * batch_size)
                    .map(|i| self.samples[i % self.size()])
                    .collect()
            })
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

impl InMemoryImages {
    pub fn new(images: Tensor) -> anyhow::Result<Self> {
        let dims = images.dims();
        if dims.len() != 4 || dims[1] != PATCH_CHANNELS {
            return Err(anyhow::anyhow!(
                "expected (n x {} x h x w) images, got {:?}",
                PATCH_CHANNELS,
                dims
            ));
        }
        if dims[0] == 0 {
            return Err(anyhow::anyhow!("no images"));
        }

        let samples = (0..dims[0]).collect();
        Ok(Self {
            images: images.to_dtype(DType::F32)?,
            minibatches: Minibatches {
                samples,
                chunks: vec![],
            },
        })
    }

    /// Load the tensor named `key` from a safetensors file, or its only
    /// tensor when no key is given
    pub fn from_safetensors(file: &str, key: Option<&str>) -> anyhow::Result<Self> {
        let mut tensors = safetensors::load(file, &Device::Cpu)?;

        let images = match key {
            Some(key) => tensors
                .remove(key)
                .ok_or(anyhow::anyhow!("{} has no tensor named {}", file, key))?,
            None if tensors.len() == 1 => tensors
                .into_values()
                .next()
                .ok_or(anyhow::anyhow!("empty {}", file))?,
            None => {
                let mut names = tensors.keys().cloned().collect::<Vec<_>>();
                names.sort();
                return Err(anyhow::anyhow!(
                    "{} holds several tensors {:?}; pick one",
                    file,
                    names
                ));
            }
        };

        info!("loaded {:?} images from {}", images.dims(), file);
        Self::new(images)
    }

    pub fn images(&self) -> &Tensor {
        &self.images
    }
}

impl ImageSampler for InMemoryImages {
    fn minibatch_images(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<Tensor> {
        let chunk = self
            .minibatches
            .chunks
            .get(batch_idx)
            .ok_or(anyhow::anyhow!("no minibatch #{}; shuffle first", batch_idx))?;

        let idx = chunk.iter().map(|&i| i as u32).collect::<Vec<_>>();
        let idx = Tensor::from_vec(idx, chunk.len(), self.images.device())?;
        Ok(self.images.index_select(&idx, 0)?.to_device(target_device)?)
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn num_images(&self) -> usize {
        self.minibatches.size()
    }

    fn shuffle_minibatch<R: Rng>(
        &mut self,
        batch_size: usize,
        rng: &mut R,
    ) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }
        self.minibatches.shuffle_minibatch(batch_size, rng);
        Ok(())
    }
}

pub struct SceneArgs {
    pub num_images: usize,
    pub image_size: usize,
    /// rectangles painted over the background of each image
    pub num_rects: usize,
    pub rseed: u64,
}

/// Simulate scenes of coloured rectangles on a coloured background
///
/// ```text
/// x(c, i, j) = colour of the last rectangle covering (i, j), or the
///              background colour, all in [0, 1)
/// ```
pub fn generate_rectangle_scenes(args: &SceneArgs) -> anyhow::Result<InMemoryImages> {
    let s = args.image_size;
    if s == 0 || args.num_images == 0 {
        return Err(anyhow::anyhow!("need at least one non-empty image"));
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(args.rseed);
    let mut data = vec![0f32; args.num_images * PATCH_CHANNELS * s * s];

    for img in data.chunks_mut(PATCH_CHANNELS * s * s) {
        let background: [f32; PATCH_CHANNELS] = [rng.random(), rng.random(), rng.random()];
        for (c, plane) in img.chunks_mut(s * s).enumerate() {
            plane.fill(background[c]);
        }

        for _ in 0..args.num_rects {
            let colour: [f32; PATCH_CHANNELS] = [rng.random(), rng.random(), rng.random()];
            let r0 = rng.random_range(0..s);
            let c0 = rng.random_range(0..s);
            let r1 = rng.random_range(r0..s) + 1;
            let c1 = rng.random_range(c0..s) + 1;

            for (c, plane) in img.chunks_mut(s * s).enumerate() {
                for i in r0..r1 {
                    plane[i * s + c0..i * s + c1].fill(colour[c]);
                }
            }
        }
    }

    info!(
        "simulated {} scenes of {} x {} with {} rectangles",
        args.num_images, s, s, args.num_rects
    );

    let images = Tensor::from_vec(data, (args.num_images, PATCH_CHANNELS, s, s), &Device::Cpu)?;
    InMemoryImages::new(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn scenes(n: usize) -> anyhow::Result<InMemoryImages> {
        generate_rectangle_scenes(&SceneArgs {
            num_images: n,
            image_size: 32,
            num_rects: 4,
            rseed: 7,
        })
    }

    #[test]
    fn scenes_are_reproducible_and_in_range() -> anyhow::Result<()> {
        let a = scenes(3)?;
        let b = scenes(3)?;
        assert_eq!(a.images().dims(), &[3, 3, 32, 32]);

        let va = a.images().flatten_all()?.to_vec1::<f32>()?;
        let vb = b.images().flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(va, vb);
        assert!(va.iter().all(|&x| (0. ..1.).contains(&x)));
        Ok(())
    }

    #[test]
    fn minibatches_are_full() -> anyhow::Result<()> {
        let mut data = scenes(10)?;
        let mut rng = StdRng::seed_from_u64(0);
        data.shuffle_minibatch(4, &mut rng)?;
        assert_eq!(data.num_minibatch(), 2);
        for b in 0..data.num_minibatch() {
            let x = data.minibatch_images(b, &Device::Cpu)?;
            assert_eq!(x.dims(), &[4, 3, 32, 32]);
        }
        assert!(data.minibatch_images(2, &Device::Cpu).is_err());

        data.shuffle_minibatch(16, &mut rng)?;
        assert_eq!(data.num_minibatch(), 1);
        assert_eq!(data.minibatch_images(0, &Device::Cpu)?.dims()[0], 16);
        Ok(())
    }

    #[test]
    fn safetensors_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("images.safetensors");
        let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

        let images = scenes(2)?.images().clone();
        let mut tensors = HashMap::new();
        tensors.insert("images".to_string(), images.clone());
        safetensors::save(&tensors, file)?;

        let loaded = InMemoryImages::from_safetensors(file, None)?;
        assert_eq!(
            loaded.images().flatten_all()?.to_vec1::<f32>()?,
            images.flatten_all()?.to_vec1::<f32>()?
        );
        assert!(InMemoryImages::from_safetensors(file, Some("other")).is_err());
        Ok(())
    }

    #[test]
    fn rejects_grey_images() -> anyhow::Result<()> {
        let x = Tensor::zeros((2, 1, 32, 32), DType::F32, &Device::Cpu)?;
        assert!(InMemoryImages::new(x).is_err());
        Ok(())
    }
}
