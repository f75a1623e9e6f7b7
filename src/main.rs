
#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use indicatif::{ProgressBar, ProgressStyle};

use avr_spi_isp::protocol::FLASH_SIZE;
use avr_spi_isp::{image, Error, Fuse, Options, Programmer, Progress};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Low fuse value to write (hex)
    #[structopt(long, parse(try_from_str = parse_fuse))]
    fuse_low: Option<u8>,

    /// High fuse value to write (hex)
    #[structopt(long, parse(try_from_str = parse_fuse))]
    fuse_high: Option<u8>,

    /// Raw binary image to write to flash
    #[structopt(long)]
    flash: Option<String>,

    /// File to dump flash contents into
    #[structopt(long)]
    read_flash: Option<String>,

    /// Number of bytes to dump
    #[structopt(long, default_value = "8192")]
    read_len: usize,

    /// SPI device to connect to
    #[structopt(long, default_value = "/dev/spidev0.0")]
    spi_device: String,

    /// SPI clock speed
    #[structopt(long, default_value = "100000")]
    spi_speed_hz: u32,

    /// GPIO connected to the target reset line
    #[structopt(long, default_value = "22")]
    reset_pin: u64,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Parse a fuse byte in hex, with or without a `0x` prefix
fn parse_fuse(s: &str) -> Result<u8, anyhow::Error> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s = if s.len() % 2 == 1 { format!("0{}", s) } else { s.to_string() };

    match hex::decode(&s)?.as_slice() {
        [v] => Ok(*v),
        _ => Err(anyhow::anyhow!("fuse value must be a single byte")),
    }
}

/// Progress bar per flash operation
struct BarProgress {
    label: String,
    bar: Option<ProgressBar>,
}

impl Progress for BarProgress {
    fn notify(&mut self, label: &str, units: &str, done: usize, total: usize) {
        if self.bar.is_none() || self.label != label {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(&format!(" {{msg}} [{{bar:40}}] {{pos}}/{{len}} {}", units))
                    .progress_chars("=> "),
            );
            bar.set_message(label);

            self.label = label.to_string();
            self.bar = Some(bar);
        }

        if let Some(bar) = &self.bar {
            bar.set_position(done as u64);
            if done >= total {
                bar.finish();
            }
        }
    }
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = run(o) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(o: Args) -> Result<(), anyhow::Error> {
    // Check the image before touching the target
    let data = match &o.flash {
        Some(path) => {
            let data = image::load::<_, std::io::Error>(path)?;
            info!("Loaded {} ({})", path, bytefmt::format(data.len() as u64));
            Some(data)
        }
        None => None,
    };

    if o.read_len > FLASH_SIZE {
        return Err(anyhow::anyhow!("read length {} exceeds flash size {}", o.read_len, FLASH_SIZE));
    }

    info!("Connecting to SPI device");

    let mut p = Programmer::linux(&o.spi_device, o.spi_speed_hz, o.reset_pin, o.options.clone())?
        .with_progress(BarProgress { label: String::new(), bar: None });

    info!("Entering programming mode");

    p.init()?;

    p.read_fuses()?;

    if let Some(v) = o.fuse_low {
        p.write_fuse(Fuse::Low, v)?;
    }

    if let Some(v) = o.fuse_high {
        p.write_fuse(Fuse::High, v)?;
    }

    let mut res = Ok(());

    if let Some(data) = &data {
        match p.program_flash(data) {
            Ok(()) => (),
            Err(e @ Error::VerifyMismatch(_)) => res = Err(e),
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(path) = &o.read_flash {
        let mut buff = vec![0u8; o.read_len];
        p.read_flash(0, &mut buff)?;
        std::fs::write(path, &buff)?;
        info!("Wrote {} to {}", bytefmt::format(buff.len() as u64), path);
    }

    // Hand the target back to its application
    p.release()?;

    res.map_err(anyhow::Error::from)
}
