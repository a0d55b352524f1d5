//! # XSUSB Bridge Service
//!
//! Linux service binary for the XSUSB JTAG bridge: accepts host connections
//! and drives an FPGA TAP through one of the GPIO backends in this crate.

pub mod backends;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;
use clap_num::maybe_hex;
use env_logger::Env;
use xsusb_bridge::Builder;

use crate::backends::gpiod::{GpioBoard, GpioPins};
use crate::backends::mmio::{MmioBoard, MmioLayout};

#[derive(Parser)]
enum BackendImpl {
    /// Bit-bang the TAP through a GPIO character device
    Gpiod {
        /// GPIO character device, e.g. /dev/gpiochip0
        chip: Option<PathBuf>,
        #[arg(long, help = "TCK line offset")]
        tck: u32,
        #[arg(long, help = "TMS line offset")]
        tms: u32,
        #[arg(long, help = "TDI line offset")]
        tdi: u32,
        #[arg(long, help = "TDO line offset")]
        tdo: u32,
        #[arg(long, help = "PROG# line offset")]
        prog: Option<u32>,
        #[arg(long, help = "Status LED line offset")]
        led: Option<u32>,
    },
    /// Drive a memory-mapped GPIO block through a UIO device
    Mmio {
        /// UIO device, e.g. /dev/uio0
        path: Option<PathBuf>,
        #[arg(long, value_parser = maybe_hex::<usize>, default_value = "0x0")]
        data_offset: usize,
        #[arg(long, value_parser = maybe_hex::<usize>, default_value = "0x8")]
        input_offset: usize,
        #[arg(long, value_parser = maybe_hex::<usize>)]
        dir_offset: Option<usize>,
        #[arg(long, default_value = "0")]
        tck_bit: u32,
        #[arg(long, default_value = "1")]
        tms_bit: u32,
        #[arg(long, default_value = "2")]
        tdi_bit: u32,
        #[arg(long, default_value = "3")]
        tdo_bit: u32,
        #[arg(long)]
        prog_bit: Option<u32>,
    },
}

#[derive(Parser)]
#[command(about = "XSUSB bridge: serves an FPGA JTAG port to a remote host", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "6671")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[clap(subcommand)]
    backend: Option<BackendImpl>,
}

/// Attempts to find a GPIO character device to bit-bang through.
fn gpiochip_path() -> Option<PathBuf> {
    let p = PathBuf::from("/dev/gpiochip0");
    if p.exists() { Some(p) } else { None }
}

/// Attempts to find a UIO device backed by a GPIO block.
fn uio_gpio_path() -> Option<PathBuf> {
    let uio_class_path = Path::new("/sys/class/uio");
    for entry in uio_class_path.read_dir().ok()? {
        use std::fs;

        let mut path = entry.ok()?.path();
        log::debug!("Looking at UIO path {}", path.display());
        path.push("name");
        let name = match fs::read_to_string(&path) {
            Ok(name) => name,
            Err(_) => continue,
        };
        let uio_name = name.trim();
        log::debug!("UIO has name {}", uio_name);
        if uio_name.contains("gpio") {
            let uio_indexed_name = path.parent()?.file_name()?;
            let mut dev_path = PathBuf::from("/dev");
            dev_path.push(uio_indexed_name);
            return Some(dev_path);
        }
    }
    None
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting XSUSB bridge");

    let args = Args::parse();
    log::debug!("Parsed arguments: ip={}, port={}", args.ip, args.port);

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);

    match args.backend {
        Some(BackendImpl::Gpiod {
            chip,
            tck,
            tms,
            tdi,
            tdo,
            prog,
            led,
        }) => {
            let chip_path = match chip.or_else(gpiochip_path) {
                None => {
                    println!(
                        "No GPIO chip could be detected. Explicitly specify a device using xsusb-bridge gpiod <path> to select one."
                    );
                    return Ok(());
                }
                Some(path) => path,
            };
            let pins = GpioPins {
                tck,
                tms,
                tdi,
                tdo,
                prog,
                led,
            };
            log::info!(
                "Initializing GPIO board from {} (tck={}, tms={}, tdi={}, tdo={})",
                chip_path.display(),
                pins.tck,
                pins.tms,
                pins.tdi,
                pins.tdo
            );
            let mut server = Builder::new().build(GpioBoard::open(chip_path, &pins)?)?;
            server.listen(addr)?;
        }
        Some(BackendImpl::Mmio {
            path,
            data_offset,
            input_offset,
            dir_offset,
            tck_bit,
            tms_bit,
            tdi_bit,
            tdo_bit,
            prog_bit,
        }) => {
            let uio_path = match path.or_else(uio_gpio_path) {
                None => {
                    println!(
                        "No UIO GPIO block could be detected. Explicitly specify a device using xsusb-bridge mmio <path> to select one."
                    );
                    return Ok(());
                }
                Some(path) => path,
            };
            let layout = MmioLayout {
                data_offset,
                input_offset,
                dir_offset,
                tck_bit,
                tms_bit,
                tdi_bit,
                tdo_bit,
                prog_bit,
            };
            log::info!(
                "Initializing memory-mapped board from {}",
                uio_path.display()
            );
            let mut server = Builder::new().build(MmioBoard::open(uio_path, layout)?)?;
            server.listen(addr)?;
        }
        None => {
            println!(
                "No backend specified. Use xsusb-bridge gpiod --tck <n> --tms <n> --tdi <n> --tdo <n> or xsusb-bridge mmio <path> to select one."
            )
        }
    }
    Ok(())
}
