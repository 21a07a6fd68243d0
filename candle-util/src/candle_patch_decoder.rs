use crate::candle_aux_layers::{Act, StackLayers};
use crate::candle_model_traits::PatchDecoderT;
use crate::candle_patch_encoder::PATCH_CHANNELS;
use candle_core::{Result, Tensor};
use candle_nn::{ConvTranspose2d, ConvTranspose2dConfig, Linear, Module, VarBuilder};

const DECONV_CHANNELS: usize = 8;
const DECONV_KERNEL: usize = 4;
const DECONV_STRIDE: usize = 2;

/// Transposed-convolution patch decoder
///
/// ```text
/// z (n x k) -> linear -> tanh -> reshape (n x 8 x 3 x 3)
///   -> conv_transpose 4x4, stride 2 -> x (n x 3 x 8 x 8)
/// ```
pub struct ConvPatchDecoder {
    patch_size: usize,
    n_latent: usize,
    side: usize,
    fc: StackLayers<Linear>,
    deconv: ConvTranspose2d,
}

impl PatchDecoderT for ConvPatchDecoder {
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor> {
        let n = z_nk.dim(0)?;
        let h = self
            .fc
            .forward(z_nk)?
            .reshape((n, DECONV_CHANNELS, self.side, self.side))?;
        self.deconv.forward(&h)
    }

    fn dim_patch(&self) -> usize {
        self.patch_size
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl ConvPatchDecoder {
    /// Will create a new patch decoder with these variables:
    ///
    /// * `dec.fc.0.{weight,bias}`
    /// * `dec.deconv.{weight,bias}`
    pub fn new(patch_size: usize, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        // (side - 1) * stride + kernel == patch_size
        if patch_size < DECONV_KERNEL || (patch_size - DECONV_KERNEL) % DECONV_STRIDE != 0 {
            candle_core::bail!("patch size {} is not reachable by the decoder", patch_size);
        }
        let side = (patch_size - DECONV_KERNEL) / DECONV_STRIDE + 1;

        let mut fc = StackLayers::<Linear>::new();
        fc.push_with_act(
            candle_nn::linear(
                n_latent,
                DECONV_CHANNELS * side * side,
                vs.pp("dec.fc.0"),
            )?,
            Act::Tanh,
        );

        let deconv_config = ConvTranspose2dConfig {
            stride: DECONV_STRIDE,
            ..Default::default()
        };

        let deconv = candle_nn::conv_transpose2d(
            DECONV_CHANNELS,
            PATCH_CHANNELS,
            DECONV_KERNEL,
            deconv_config,
            vs.pp("dec.deconv"),
        )?;

        Ok(Self {
            patch_size,
            n_latent,
            side,
            fc,
            deconv,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_loss_functions::gaussian_nll;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn decoder_output_shape() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let dec = ConvPatchDecoder::new(8, 16, vb)?;

        let z = Tensor::randn(0f32, 1f32, (5, 16), &dev)?;
        let x = dec.forward(&z)?;
        assert_eq!(x.dims(), &[5, 3, 8, 8]);

        let (recon, nll) = dec.forward_with_loss(&z, &x, &gaussian_nll)?;
        assert_eq!(recon.dims(), x.dims());
        assert!(nll.to_scalar::<f32>()?.abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn unreachable_patch_size_fails() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(ConvPatchDecoder::new(7, 4, vb).is_err());
    }
}
