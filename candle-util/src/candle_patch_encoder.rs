use crate::candle_aux_layers::{Act, StackLayers};
use crate::candle_model_traits::PatchEncoderT;
use candle_core::{Result, Tensor};
use candle_nn::{Conv2d, Linear, Module, VarBuilder};

/// number of colour channels in a patch
pub const PATCH_CHANNELS: usize = 3;

const CONV_CHANNELS: usize = 8;
const CONV_KERNEL: usize = 3;
const POOL_SIZE: usize = 2;

/// Convolutional patch encoder
///
/// ```text
/// x (n x 3 x 8 x 8) -> conv 3x3 -> relu -> maxpool 2 -> flatten (n x 72)
///   -> linear          -> z_mean (n x k)
///   -> linear -> exp   -> z_std  (n x k)
/// ```
pub struct ConvPatchEncoder {
    patch_size: usize,
    n_latent: usize,
    conv: Conv2d,
    z_mean: Linear,
    z_std: StackLayers<Linear>,
}

impl PatchEncoderT for ConvPatchEncoder {
    fn forward(&self, x_nchw: &Tensor) -> Result<(Tensor, Tensor)> {
        let h_nf = self.features(x_nchw)?;
        let z_mean_nk = self.z_mean.forward(&h_nf)?;
        let z_std_nk = self.z_std.forward(&h_nf)?;
        Ok((z_mean_nk, z_std_nk))
    }

    fn dim_patch(&self) -> usize {
        self.patch_size
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl ConvPatchEncoder {
    /// flattened feature width after conv + pooling
    pub fn feature_dim(patch_size: usize) -> usize {
        let side = (patch_size - CONV_KERNEL + 1) / POOL_SIZE;
        CONV_CHANNELS * side * side
    }

    /// conv -> relu -> pool -> flatten
    pub fn features(&self, x_nchw: &Tensor) -> Result<Tensor> {
        self.conv
            .forward(x_nchw)?
            .relu()?
            .max_pool2d(POOL_SIZE)?
            .flatten_from(1)
    }

    /// Will create a new patch encoder with these variables:
    ///
    /// * `enc.conv.{weight,bias}`
    /// * `enc.z.mean.{weight,bias}`
    /// * `enc.z.std.{weight,bias}`
    pub fn new(patch_size: usize, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        if patch_size < CONV_KERNEL + 1 {
            candle_core::bail!("patch size {} is too small for the encoder", patch_size);
        }

        let conv = candle_nn::conv2d(
            PATCH_CHANNELS,
            CONV_CHANNELS,
            CONV_KERNEL,
            Default::default(),
            vs.pp("enc.conv"),
        )?;

        let d_feat = Self::feature_dim(patch_size);

        let z_mean = candle_nn::linear(d_feat, n_latent, vs.pp("enc.z.mean"))?;

        let mut z_std = StackLayers::<Linear>::new();
        z_std.push_with_act(
            candle_nn::linear(d_feat, n_latent, vs.pp("enc.z.std"))?,
            Act::Exp,
        );

        Ok(Self {
            patch_size,
            n_latent,
            conv,
            z_mean,
            z_std,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn encoder_output_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let enc = ConvPatchEncoder::new(8, 16, vb)?;

        assert_eq!(ConvPatchEncoder::feature_dim(8), 72);

        let x = Tensor::rand(0f32, 1f32, (4, 3, 8, 8), &dev)?;
        let (mean, std) = enc.forward(&x)?;
        assert_eq!(mean.dims(), &[4, 16]);
        assert_eq!(std.dims(), &[4, 16]);
        assert!(std.min_all()?.to_scalar::<f32>()? > 0.);
        Ok(())
    }
}
