use std::path::PathBuf;

use clap::Parser;
use clap::builder::RangedU64ValueParser;

use crate::extract::ExtractOptions;
use crate::iconv::DEFAULT_CHUNK_SIZE;

#[derive(Parser, Debug)]
#[command(name = "unzipconv")]
#[command(version)]
#[command(about = "List, test and extract ZIP archives with non-UTF-8 entry names")]
#[command(long_about = None)]
#[command(after_help = "Examples:\n  \
  unzipconv old.zip                list entry names decoded from GB18030\n  \
  unzipconv -x -c shift_jis jp.zip extract, decoding names from Shift_JIS\n  \
  unzipconv -x -k -d out a.zip     extract into out/, keeping partial output on failure")]
pub struct Cli {
    /// ZIP archives to process
    #[arg(value_name = "ARCHIVE", required = true)]
    pub archives: Vec<PathBuf>,

    /// Extract files
    #[arg(short = 'x', conflicts_with = "test")]
    pub extract: bool,

    /// Test archive integrity without writing anything
    #[arg(short = 't')]
    pub test: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Charset of entry names
    #[arg(short = 'c', value_name = "CHARSET", default_value = "gb18030")]
    pub charset: String,

    /// Also decode file contents from this charset to UTF-8
    #[arg(short = 'C', value_name = "CHARSET")]
    pub content_charset: Option<String>,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR", default_value = ".")]
    pub extract_dir: PathBuf,

    /// Keep partial output when extraction fails
    #[arg(short = 'k')]
    pub keep_partial: bool,

    /// Write directly into the destination instead of staging
    #[arg(long = "no-stage")]
    pub no_stage: bool,

    /// Converter chunk size in bytes
    #[arg(short = 'b', value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE,
          value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub chunk_size: usize,

    /// Quiet mode (warnings only)
    #[arg(short = 'q')]
    pub quiet: bool,
}

impl Cli {
    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            charset: self.charset.clone(),
            content_charset: self.content_charset.clone(),
            dest: self.extract_dir.clone(),
            staged: !self.no_stage,
            keep_partial: self.keep_partial,
            chunk_size: self.chunk_size,
        }
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet { "warn" } else { "info" }
    }
}
