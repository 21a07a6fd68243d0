use candle_core::{Result, Tensor, D};

fn ln_two_pi() -> f64 {
    (2.0 * std::f64::consts::PI).ln()
}

/// Log-density of a diagonal Gaussian, summed over the latent axis
///
/// log N(z; μ, σ²) = -Σ_k (z_k - μ_k)² / (2σ_k²) - (K/2) log(2π) - Σ_k log σ_k
///
/// * `z_sk` - samples (s x k), or (p x s x k) for a batch of p distributions
/// * `mean_k` - mean (k), or (p x k)
/// * `std_k` - standard deviation (k), or (p x k)
///
/// Returns (s) or (p x s)
pub fn log_gaussian_pdf(z_sk: &Tensor, mean_k: &Tensor, std_k: &Tensor) -> Result<Tensor> {
    let dim_z = z_sk.dim(D::Minus1)? as f64;

    let mean_1k = mean_k.unsqueeze(mean_k.rank() - 1)?;
    let var_1k = std_k.sqr()?.unsqueeze(std_k.rank() - 1)?;

    let log_exp_term = (z_sk
        .broadcast_sub(&mean_1k)?
        .sqr()?
        .broadcast_div(&var_1k)?
        .sum(D::Minus1)?
        * (-0.5))?;

    let log_other_term = (std_k.log()?.sum_keepdim(D::Minus1)?.neg()? - 0.5 * dim_z * ln_two_pi())?;

    log_exp_term.broadcast_add(&log_other_term)
}

/// Log-density of every sample under every mixture component
///
/// * `z_sk` - samples (s x k), or (p x s x k)
/// * `mean_ck` - component means (c x k), or (p x c x k)
/// * `std_ck` - component standard deviations (c x k), or (p x c x k)
///
/// Returns (s x c) or (p x s x c)
pub fn log_gaussian_element_pdf(z_sk: &Tensor, mean_ck: &Tensor, std_ck: &Tensor) -> Result<Tensor> {
    let dim_z = z_sk.dim(D::Minus1)? as f64;

    // (.. x s x 1 x k) against (.. x 1 x c x k)
    let z_s1k = z_sk.unsqueeze(z_sk.rank() - 1)?;
    let mean_1ck = mean_ck.unsqueeze(mean_ck.rank() - 2)?;
    let var_1ck = std_ck.sqr()?.unsqueeze(std_ck.rank() - 2)?;

    let log_exp_term = (z_s1k
        .broadcast_sub(&mean_1ck)?
        .sqr()?
        .broadcast_div(&var_1ck)?
        .sum(D::Minus1)?
        * (-0.5))?;

    // (.. x 1 x c)
    let log_other_term = (std_ck.log()?.sum(D::Minus1)?.neg()? - 0.5 * dim_z * ln_two_pi())?
        .unsqueeze(std_ck.rank() - 2)?;

    log_exp_term.broadcast_add(&log_other_term)
}

/// Numerically stable log Σ exp(x) along `dim`
///
/// log Σ_j exp(x_j) = m + log Σ_j exp(x_j - m), m = max_j x_j
///
/// The reduced dimension is removed from the output.
pub fn log_sum_exp(x: &Tensor, dim: usize) -> Result<Tensor> {
    let max_keep = x.max_keepdim(dim)?;
    let sum_keep = x.broadcast_sub(&max_keep)?.exp()?.sum_keepdim(dim)?;
    (sum_keep.log()? + max_keep)?.squeeze(dim)
}

/// Gaussian negative log-likelihood up to constants
///
/// nll = Σ (x̂ - x)²
///
/// * `hat` - reconstruction
/// * `x` - observed data
pub fn gaussian_nll(hat: &Tensor, x: &Tensor) -> Result<Tensor> {
    hat.sub(x)?.sqr()?.sum_all()
}
