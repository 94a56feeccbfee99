use std::path::PathBuf;

use arg::{parse_args, Args};

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

// -------------------------------------------------------------------------------------------------

/// Default program arguments for grainloop demo applications.
#[derive(Args, Debug, Default)]
#[allow(unused)]
pub struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Write the rendered audio into the given wav file. By default a file named after the
    /// demo gets written into the current directory.
    pub output_path: Option<PathBuf>,
    #[arg(short = "r", long = "sample-rate")]
    /// Sample rate of the rendered audio. 44100 by default.
    pub sample_rate: Option<u32>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    pub log_level: Option<log::Level>,
}

impl Arguments {
    #[allow(unused)]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(44100)
    }

    #[allow(unused)]
    pub fn output_path(&self, default_name: &str) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_name))
    }
}

/// Parse common demo arguments and apply the log-level arg to the logger.
#[allow(unused)]
pub fn parse() -> Arguments {
    let args = parse_args::<Arguments>();
    create_logger(args.log_level);
    args
}

// -------------------------------------------------------------------------------------------------

/// Create default logger from arguments. Invoked from `parse`.
#[allow(unused)]
pub fn create_logger(log_level: Option<log::Level>) {
    simple_logger::SimpleLogger::new()
        .with_level(log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .init()
        .expect("Failed to set logger");
}

// -------------------------------------------------------------------------------------------------

/// Create a mono 32-bit float wav writer.
#[allow(unused)]
pub fn new_wav_writer(
    path: &std::path::Path,
    sample_rate: u32,
) -> Result<hound::WavWriter<std::io::BufWriter<std::fs::File>>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    hound::WavWriter::create(path, spec)
}
