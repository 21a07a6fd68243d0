/// Matrices written as delimited text, one row per line
pub trait IoOps {
    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    /// tab-separated; a `.gz` name compresses the output
    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }
}
