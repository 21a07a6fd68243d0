use crate::common_io::write_rows;
use crate::traits::IoOps;
use candle_util::candle_core::{DType, Tensor};

impl IoOps for Tensor {
    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        if self.rank() != 2 {
            return Err(anyhow::anyhow!(
                "only (rows x cols) tensors can be written, got {:?}",
                self.dims()
            ));
        }
        let rows = self.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        write_rows(&rows, delim, file)
    }
}
