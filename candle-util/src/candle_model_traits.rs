use candle_core::{Result, Tensor};

pub trait PatchEncoderT {
    /// An encoder that spits out a diagonal Gaussian over the latent code
    ///
    /// # Arguments
    /// * `x_nchw` - image patches (n x c x h x w)
    ///
    /// # Returns `(z_mean_nk, z_std_nk)`
    /// * `z_mean_nk` - latent mean (n x k)
    /// * `z_std_nk` - latent standard deviation (n x k), strictly positive
    fn forward(&self, x_nchw: &Tensor) -> Result<(Tensor, Tensor)>;

    fn dim_patch(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait PatchDecoderT {
    /// A decoder that spits out reconstructed patches (n x c x h x w)
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor>;

    /// A decoder that spits out reconstruction and a scalar loss
    /// * `z_nk` - latent codes
    /// * `x_nchw` - observed patches to validate with
    /// * `loss` - fn (reconstruction, observed) -> loss
    fn forward_with_loss<LossFn>(
        &self,
        z_nk: &Tensor,
        x_nchw: &Tensor,
        loss: &LossFn,
    ) -> Result<(Tensor, Tensor)>
    where
        LossFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let recon = self.forward(z_nk)?;
        let loss_val = loss(&recon, x_nchw)?;
        Ok((recon, loss_val))
    }

    fn dim_patch(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
