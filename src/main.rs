//! uvc-capture: grab frames from a V4L2 device into numbered files.

use std::path::PathBuf;

use clap::Parser;
use uvc_capture::config::{DEFAULT_DEVICE, DEFAULT_HEIGHT, DEFAULT_PREFIX, DEFAULT_WIDTH};
use uvc_capture::format::DEFAULT_PIXEL_FORMAT;
use uvc_capture::{CaptureConfig, FileSink, FrameCount, PIXEL_FORMATS};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture frames from a V4L2 video device")]
struct Args {
    /// Video device node.
    #[arg(short, long, env = "UVCCAP_DEVICE", default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Frame width in pixels.
    #[arg(short, long, env = "UVCCAP_WIDTH", default_value_t = DEFAULT_WIDTH)]
    width: u32,

    /// Frame height in pixels.
    #[arg(short = 'H', long, env = "UVCCAP_HEIGHT", default_value_t = DEFAULT_HEIGHT)]
    height: u32,

    /// Pixel format index (see --list-formats).
    #[arg(short, long, env = "UVCCAP_FORMAT", default_value_t = DEFAULT_PIXEL_FORMAT)]
    format: usize,

    /// Output file prefix; frame n is written to <prefix>.<n>.
    #[arg(short, long, env = "UVCCAP_PREFIX", default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Frames to capture; 0 or less captures until an error.
    #[arg(
        short = 'n',
        long,
        env = "UVCCAP_COUNT",
        default_value_t = 1,
        allow_negative_numbers = true
    )]
    count: i64,

    /// Print the pixel format table and exit.
    #[arg(long)]
    list_formats: bool,
}

impl Args {
    fn into_config(self) -> CaptureConfig {
        CaptureConfig {
            device: self.device,
            width: self.width,
            height: self.height,
            format_index: self.format,
            count: FrameCount::from_signed(self.count),
            prefix: self.prefix,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_formats {
        for (index, format) in PIXEL_FORMATS.iter().enumerate() {
            println!("{index} - {}", format.name);
        }
        return;
    }

    let config = args.into_config();
    let mut sink = FileSink::new(config.prefix.clone());
    match uvc_capture::run(&config, &mut sink) {
        Ok(delivered) => log::info!("wrote {delivered} frames with prefix {}", config.prefix),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}
