use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Install the global logger. Defaults to `info`; `RUST_LOG` overrides.
///
/// With a log directory, records also go to `<dir>/<run start>.log`.
pub fn init(log_dir: Option<&Path>, started: DateTime<Local>) -> Result<Option<PathBuf>> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    let path = match log_dir {
        Some(dir) => {
            let path = run_log_path(dir, started);
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            Some(path)
        }
        None => None,
    };
    builder.init();
    Ok(path)
}

pub fn run_log_path(dir: &Path, started: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}.log", started.format("%Y-%m-%d_%H-%M-%S")))
}

/// Copies every record to stderr as well as the run log.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // stderr is best effort; the file is the record.
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}
