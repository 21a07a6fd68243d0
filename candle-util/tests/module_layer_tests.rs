use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_util::candle_model_traits::*;
use candle_util::candle_patch_decoder::ConvPatchDecoder;
use candle_util::candle_patch_encoder::ConvPatchEncoder;

fn set_constant(varmap: &VarMap, name: &str, value: f64) -> Result<()> {
    let data = varmap.data().lock().expect("varmap lock");
    let var = data
        .get(name)
        .unwrap_or_else(|| panic!("no variable named {}", name));
    var.set(&(var.ones_like()? * value)?)
}

#[test]
fn constant_patch_round_trip_with_identity_like_fixture() -> Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let enc = ConvPatchEncoder::new(8, 16, vb.clone())?;
    let dec = ConvPatchDecoder::new(8, 16, vb)?;
    assert_eq!(enc.dim_latent(), dec.dim_latent());
    assert_eq!(enc.dim_patch(), dec.dim_patch());

    for var in varmap.all_vars() {
        var.set(&var.zeros_like()?)?;
    }

    // the only live parameter paints every pixel with the patch level
    let level = 0.375;
    set_constant(&varmap, "dec.deconv.bias", level)?;

    let x = (Tensor::ones((2, 3, 8, 8), DType::F32, &dev)? * level)?;
    let (z_mean, z_std) = enc.forward(&x)?;

    assert_abs_diff_eq!(z_mean.abs()?.max_all()?.to_scalar::<f32>()?, 0.0);
    assert_abs_diff_eq!(z_std.min_all()?.to_scalar::<f32>()?, 1.0);

    let x_hat = dec.forward(&z_mean)?;
    assert_eq!(x_hat.dims(), x.dims());
    assert_abs_diff_eq!(
        x_hat.mean_all()?.to_scalar::<f32>()?,
        x.mean_all()?.to_scalar::<f32>()?,
        epsilon = 1e-6
    );
    assert_abs_diff_eq!(
        (x_hat - &x)?.abs()?.max_all()?.to_scalar::<f32>()?,
        0.0,
        epsilon = 1e-6
    );
    Ok(())
}

#[test]
fn encoder_variables_are_named() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let _enc = ConvPatchEncoder::new(8, 4, vb.clone())?;
    let _dec = ConvPatchDecoder::new(8, 4, vb)?;

    let data = varmap.data().lock().expect("varmap lock");
    for name in [
        "enc.conv.weight",
        "enc.conv.bias",
        "enc.z.mean.weight",
        "enc.z.std.weight",
        "dec.fc.0.weight",
        "dec.deconv.weight",
        "dec.deconv.bias",
    ] {
        assert!(data.contains_key(name), "missing {}", name);
    }
    Ok(())
}
