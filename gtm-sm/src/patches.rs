//! Cropping patches out of images along a walk and painting them back.

use crate::config::GtmConfig;
use crate::random_walk::WalkBatch;
use candle_util::candle_core::{DType, Device, Result, Tensor};
use candle_util::candle_patch_encoder::PATCH_CHANNELS;
use matrix_util::common_io::mkdir;
use matrix_util::traits::IoOps;

/// Where the grid cells sit on the image
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchGeometry {
    pub patch_size: usize,
    pub stride: usize,
    pub grid_size: usize,
}

impl PatchGeometry {
    pub fn from_config(config: &GtmConfig) -> Self {
        Self {
            patch_size: config.x_dim,
            stride: config.patch_stride,
            grid_size: config.grid_size,
        }
    }

    /// smallest image side covering every cell
    pub fn image_size(&self) -> usize {
        self.stride * (self.grid_size.max(1) - 1) + self.patch_size
    }

    /// top-left pixel of the window at grid cell `[row, col]`
    pub fn origin(&self, pos: [usize; 2]) -> [usize; 2] {
        [pos[0] * self.stride, pos[1] * self.stride]
    }
}

/// Crop every sample's window at step `t`
///
/// * `x_bchw` - images (batch x 3 x h x w)
///
/// Returns (batch x 3 x patch x patch)
pub fn extract_patches(
    x_bchw: &Tensor,
    walk: &WalkBatch,
    t: usize,
    geometry: &PatchGeometry,
) -> Result<Tensor> {
    let p = geometry.patch_size;
    let patches = (0..walk.batch_size())
        .map(|b| {
            let [r0, c0] = geometry.origin(walk.position(b, t));
            x_bchw.get(b)?.narrow(1, r0, p)?.narrow(2, c0, p)
        })
        .collect::<Result<Vec<_>>>()?;
    Tensor::stack(&patches, 0)
}

/// An RGB image being painted patch by patch
pub struct Canvas {
    size: usize,
    data: Vec<f32>,
}

impl Canvas {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: vec![0f32; PATCH_CHANNELS * size * size],
        }
    }

    /// Overwrite the window at grid cell `pos` with a (3 x p x p) patch
    pub fn paint(&mut self, patch_chw: &Tensor, pos: [usize; 2], geometry: &PatchGeometry) -> Result<()> {
        let p = geometry.patch_size;
        let [r0, c0] = geometry.origin(pos);
        if r0 + p > self.size || c0 + p > self.size {
            candle_util::candle_core::bail!(
                "patch at {:?} does not fit a {} x {} canvas",
                pos,
                self.size,
                self.size
            );
        }

        let values = patch_chw.to_dtype(DType::F32)?.to_vec3::<f32>()?;
        for (c, rows) in values.iter().enumerate() {
            for (i, row) in rows.iter().enumerate() {
                let start = (c * self.size + r0 + i) * self.size + c0;
                self.data[start..(start + p)].copy_from_slice(row);
            }
        }
        Ok(())
    }

    /// (3 x size x size)
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Tensor::from_slice(&self.data, (PATCH_CHANNELS, self.size, self.size), device)
    }
}

/// Paint one sample's patches at the cells it visited
///
/// * `patches` - one (batch x 3 x p x p) tensor per step
/// * `first_step` - walk step of `patches[0]`
/// * `sample` - batch element to assemble
///
/// Later steps overwrite earlier ones where windows overlap.
pub fn assemble_image(
    patches: &[Tensor],
    walk: &WalkBatch,
    first_step: usize,
    sample: usize,
    geometry: &PatchGeometry,
) -> Result<Tensor> {
    let mut canvas = Canvas::new(geometry.image_size());
    for (t, patch_bchw) in patches.iter().enumerate() {
        let pos = walk.position(sample, first_step + t);
        canvas.paint(&patch_bchw.get(sample)?, pos, geometry)?;
    }
    let device = patches
        .first()
        .map(|x| x.device().clone())
        .unwrap_or(Device::Cpu);
    canvas.to_tensor(&device)
}

/// Write each channel of a (3 x h x w) image to `{prefix}.ch{c}.tsv`,
/// gzipped if `gz`
///
/// Returns the written file names
pub fn write_image_tsv(image_chw: &Tensor, prefix: &str, gz: bool) -> anyhow::Result<Vec<String>> {
    let dims = image_chw.dims();
    if dims.len() != 3 {
        return Err(anyhow::anyhow!(
            "expected a (channel x height x width) image, got {:?}",
            dims
        ));
    }

    mkdir(prefix)?;

    let ext = if gz { "tsv.gz" } else { "tsv" };
    let mut files = vec![];
    for c in 0..dims[0] {
        let file = format!("{}.ch{}.{}", prefix, c, ext);
        image_chw.get(c)?.to_tsv(&file)?;
        files.push(file);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random_walk::{Action, Trajectory};

    /// candle has no `to_vec4`; stack per-sample `to_vec3` results.
    trait ToVec4 {
        fn to_vec4<T: candle_util::candle_core::WithDType>(&self) -> Result<Vec<Vec<Vec<Vec<T>>>>>;
    }

    impl ToVec4 for Tensor {
        fn to_vec4<T: candle_util::candle_core::WithDType>(&self) -> Result<Vec<Vec<Vec<Vec<T>>>>> {
            (0..self.dim(0)?).map(|i| self.get(i)?.to_vec3::<T>()).collect()
        }
    }

    fn geometry() -> PatchGeometry {
        PatchGeometry {
            patch_size: 8,
            stride: 3,
            grid_size: 9,
        }
    }

    /// pixel value encodes its own (channel, row, col)
    fn indexed_image(n: usize) -> Result<Tensor> {
        let s = 32;
        let data = (0..n * 3 * s * s)
            .map(|i| (i % (3 * s * s)) as f32)
            .collect::<Vec<_>>();
        Tensor::from_vec(data, (n, 3, s, s), &Device::Cpu)
    }

    fn walk_of(positions: Vec<Vec<[usize; 2]>>) -> WalkBatch {
        let horizon = positions[0].len();
        WalkBatch {
            walks: positions
                .into_iter()
                .map(|positions| Trajectory {
                    actions: vec![Action::Stop; positions.len()],
                    positions,
                })
                .collect(),
            horizon,
        }
    }

    #[test]
    fn crops_the_stride_scaled_window() -> Result<()> {
        let x = indexed_image(2)?;
        let walk = walk_of(vec![vec![[0, 0], [2, 5]], vec![[8, 8], [1, 0]]]);
        let geom = geometry();
        assert_eq!(geom.image_size(), 32);

        let p = extract_patches(&x, &walk, 1, &geom)?;
        assert_eq!(p.dims(), &[2, 3, 8, 8]);

        let v = p.to_vec4::<f32>()?;
        // sample 0 at [2, 5]: top-left pixel (6, 15)
        assert_eq!(v[0][0][0][0], (6 * 32 + 15) as f32);
        // sample 1 at [1, 0], channel 2, bottom-right pixel (3 + 7, 7)
        assert_eq!(v[1][2][7][7], (2 * 1024 + 10 * 32 + 7) as f32);

        let corner = extract_patches(&x, &walk, 0, &geom)?.to_vec4::<f32>()?;
        assert_eq!(corner[1][0][7][7], (31 * 32 + 31) as f32);
        Ok(())
    }

    #[test]
    fn cropping_then_painting_restores_the_cells() -> Result<()> {
        let x = indexed_image(1)?;
        let cells = (0..9).flat_map(|r| (0..9).map(move |c| [r, c])).collect::<Vec<_>>();
        let walk = walk_of(vec![cells.clone()]);
        let geom = geometry();

        let patches = (0..cells.len())
            .map(|t| extract_patches(&x, &walk, t, &geom))
            .collect::<Result<Vec<_>>>()?;
        let img = assemble_image(&patches, &walk, 0, 0, &geom)?;

        assert_eq!(img.dims(), &[3, 32, 32]);
        assert_eq!(img.to_vec3::<f32>()?, x.get(0)?.to_vec3::<f32>()?);
        Ok(())
    }

    #[test]
    fn painting_outside_the_canvas_fails() -> Result<()> {
        let mut canvas = Canvas::new(16);
        let patch = Tensor::ones((3, 8, 8), DType::F32, &Device::Cpu)?;
        assert!(canvas.paint(&patch, [3, 0], &geometry()).is_err());
        assert!(canvas.paint(&patch, [2, 2], &geometry()).is_ok());
        Ok(())
    }

    #[test]
    fn channels_go_to_separate_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("out/recon");
        let prefix = prefix.to_str().ok_or(anyhow::anyhow!("path"))?;

        let img = Tensor::ones((3, 4, 5), DType::F32, &Device::Cpu)?;
        let files = write_image_tsv(&img, prefix, true)?;
        assert_eq!(files.len(), 3);
        for f in files.iter() {
            assert!(f.ends_with(".tsv.gz"));
            assert!(std::path::Path::new(f).exists());
        }
        assert!(write_image_tsv(&img.get(0)?, prefix, false).is_err());
        Ok(())
    }
}
