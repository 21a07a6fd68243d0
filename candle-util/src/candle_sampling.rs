//! Random tensors drawn from a caller-supplied `rand::Rng`.
//!
//! candle's own `randn`/`rand` use an internal generator that cannot be
//! seeded on every backend; everything here goes through the caller's
//! generator instead, so a seed pins down the whole computation.

use candle_core::{DType, Device, Result, Shape, Tensor};
use candle_nn::VarMap;
use log::debug;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// ε ~ N(0, I) with the given shape
pub fn randn_tensor<R, S>(shape: S, dtype: DType, device: &Device, rng: &mut R) -> Result<Tensor>
where
    R: Rng,
    S: Into<Shape>,
{
    let shape = shape.into();
    let data: Vec<f32> = (0..shape.elem_count())
        .map(|_| StandardNormal.sample(rng))
        .collect();
    Tensor::from_vec(data, shape, device)?.to_dtype(dtype)
}

/// u ~ Uniform[lb, ub) with the given shape
pub fn uniform_tensor<R, S>(
    shape: S,
    lb: f32,
    ub: f32,
    dtype: DType,
    device: &Device,
    rng: &mut R,
) -> Result<Tensor>
where
    R: Rng,
    S: Into<Shape>,
{
    let shape = shape.into();
    let data: Vec<f32> = (0..shape.elem_count())
        .map(|_| lb + (ub - lb) * rng.random::<f32>())
        .collect();
    Tensor::from_vec(data, shape, device)?.to_dtype(dtype)
}

///
/// z = μ + σ * ε
/// where ε ~ N(0, 1)
///
/// # Arguments
/// * `mean` - mean of Gaussian distribution
/// * `std` - standard deviation of Gaussian distribution
pub fn reparameterized_sample<R: Rng>(mean: &Tensor, std: &Tensor, rng: &mut R) -> Result<Tensor> {
    let eps = randn_tensor(std.shape(), std.dtype(), std.device(), rng)?;
    eps.mul(std)?.add(mean)
}

/// Draw `num_samples` reparameterized samples per distribution
///
/// * `mean` - (k) or (p x k)
/// * `std` - same shape as `mean`
///
/// Returns (num_samples x k) or (p x num_samples x k)
pub fn reparameterized_sample_repeat<R: Rng>(
    mean: &Tensor,
    std: &Tensor,
    num_samples: usize,
    rng: &mut R,
) -> Result<Tensor> {
    let mut dims = mean.dims().to_vec();
    dims.insert(dims.len() - 1, num_samples);

    let eps = randn_tensor(dims, mean.dtype(), mean.device(), rng)?;
    let axis = mean.rank() - 1;
    eps.broadcast_mul(&std.unsqueeze(axis)?)?
        .broadcast_add(&mean.unsqueeze(axis)?)
}

/// Fill every variable with N(0, stdv²) noise
///
/// Variables are visited in sorted-name order so that the same generator
/// state always yields the same parameters.
pub fn reset_parameters<R: Rng>(varmap: &VarMap, stdv: f64, rng: &mut R) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".to_string()))?;

    let mut names = data.keys().collect::<Vec<_>>();
    names.sort();

    for name in names {
        let var = &data[name];
        let noise = randn_tensor(var.shape(), var.dtype(), var.device(), rng)?;
        var.set(&(noise * stdv)?)?;
    }
    debug!("reset {} variables with std {}", data.len(), stdv);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarBuilder;
    use rand::SeedableRng;

    #[test]
    fn same_seed_same_noise() -> Result<()> {
        let dev = Device::Cpu;
        let mut rng_a = rand::rngs::StdRng::seed_from_u64(7);
        let mut rng_b = rand::rngs::StdRng::seed_from_u64(7);
        let a = randn_tensor((3, 4), DType::F32, &dev, &mut rng_a)?.to_vec2::<f32>()?;
        let b = randn_tensor((3, 4), DType::F32, &dev, &mut rng_b)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn uniform_range() -> Result<()> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let u = uniform_tensor(100, -1., 0., DType::F32, &Device::Cpu, &mut rng)?.to_vec1::<f32>()?;
        assert!(u.iter().all(|&x| (-1. ..0.).contains(&x)));
        Ok(())
    }

    #[test]
    fn repeated_sample_shape() -> Result<()> {
        let dev = Device::Cpu;
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mean = Tensor::zeros((2, 5), DType::F32, &dev)?;
        let std = Tensor::ones((2, 5), DType::F32, &dev)?;
        let z = reparameterized_sample_repeat(&mean, &std, 11, &mut rng)?;
        assert_eq!(z.dims(), &[2, 11, 5]);

        let z = reparameterized_sample_repeat(&mean.get(0)?, &std.get(0)?, 11, &mut rng)?;
        assert_eq!(z.dims(), &[11, 5]);
        Ok(())
    }

    #[test]
    fn zero_std_sample_is_mean() -> Result<()> {
        let dev = Device::Cpu;
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mean = Tensor::new(&[1f32, -2., 3.], &dev)?;
        let std = Tensor::zeros(3, DType::F32, &dev)?;
        let z = reparameterized_sample(&mean, &std, &mut rng)?.to_vec1::<f32>()?;
        assert_eq!(z, vec![1., -2., 3.]);
        Ok(())
    }

    #[test]
    fn reset_parameters_is_reproducible() -> Result<()> {
        let dev = Device::Cpu;
        let draw = |seed: u64| -> Result<Vec<f32>> {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
            let lin = candle_nn::linear(3, 2, vb.pp("a"))?;
            let _other = candle_nn::linear(2, 2, vb.pp("b"))?;
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            reset_parameters(&varmap, 0.1, &mut rng)?;
            lin.weight().flatten_all()?.to_vec1::<f32>()
        };
        assert_eq!(draw(42)?, draw(42)?);
        assert_ne!(draw(42)?, draw(43)?);
        Ok(())
    }
}
