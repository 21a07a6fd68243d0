use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Destination of text output, decided by its name
enum Sink {
    Stdout,
    Stderr,
    Gzip(PathBuf),
    Plain(PathBuf),
}

impl Sink {
    fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("stdout") {
            return Sink::Stdout;
        }
        if name.eq_ignore_ascii_case("stderr") {
            return Sink::Stderr;
        }
        let path = PathBuf::from(name);
        match path.extension().and_then(|x| x.to_str()) {
            Some("gz") => Sink::Gzip(path),
            _ => Sink::Plain(path),
        }
    }

    fn open(self) -> anyhow::Result<Box<dyn Write>> {
        Ok(match self {
            Sink::Stdout => Box::new(BufWriter::new(std::io::stdout())),
            Sink::Stderr => Box::new(BufWriter::new(std::io::stderr())),
            Sink::Gzip(path) => Box::new(BufWriter::new(GzEncoder::new(
                File::create(path)?,
                Compression::default(),
            ))),
            Sink::Plain(path) => Box::new(BufWriter::new(File::create(path)?)),
        })
    }
}

///
/// Open a buffered writer
/// * `output_file` - `stdout`, `stderr`, a `.gz` file, or a plain file
///
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    Sink::from_name(output_file).open()
}

///
/// Write one value per line
///
/// A closed pipe downstream ends the output quietly.
///
pub fn write_types<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        match writeln!(buf, "{}", line) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(anyhow::anyhow!("writing {}: {}", output_file, e)),
        }
    }
    buf.flush()?;
    Ok(())
}

pub fn write_lines(lines: &[Box<str>], output_file: &str) -> anyhow::Result<()> {
    write_types(lines, output_file)
}

///
/// Write rows of values joined by `delim`
///
pub fn write_rows<T>(rows: &[Vec<T>], delim: &str, output_file: &str) -> anyhow::Result<()>
where
    T: Display,
{
    let lines = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(delim)
                .into_boxed_str()
        })
        .collect::<Vec<_>>();
    write_lines(&lines, output_file)
}

///
/// Create the parent directory of `file` if needed
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let dir = Path::new(file)
        .parent()
        .ok_or(anyhow::anyhow!("{} has no parent directory", file))?;
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
