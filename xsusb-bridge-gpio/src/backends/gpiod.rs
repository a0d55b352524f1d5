//! # GPIO Character-Device Backend
//!
//! Bit-bangs the TAP lines through the Linux GPIO character device
//! (`/dev/gpiochipN`), requesting one line handle per signal.
//!
//! ## Example Usage
//!
//! ```ignore
//! use xsusb_bridge::Builder;
//! use xsusb_bridge_gpio::backends::gpiod::{GpioBoard, GpioPins};
//!
//! let pins = GpioPins { tck: 17, tms: 27, tdi: 22, tdo: 23, prog: Some(24), led: Some(25) };
//! let board = GpioBoard::open("/dev/gpiochip0", &pins)?;
//! let mut server = Builder::new().build(board)?;
//! server.listen("127.0.0.1:6671")?;
//! ```
use std::ffi::c_int;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use nix::ioctl_readwrite_bad;

use xsusb_bridge::{Board, Port, StatusLed, TapPort};

const GPIOHANDLES_MAX: usize = 64;
const CONSUMER_LABEL_LEN: usize = 32;

const GPIOHANDLE_REQUEST_INPUT: u32 = 1 << 0;
const GPIOHANDLE_REQUEST_OUTPUT: u32 = 1 << 1;

/// Line-handle request passed to the character device.
#[repr(C)]
struct GpioHandleRequest {
    lineoffsets: [u32; GPIOHANDLES_MAX],
    flags: u32,
    default_values: [u8; GPIOHANDLES_MAX],
    consumer_label: [u8; CONSUMER_LABEL_LEN],
    lines: u32,
    fd: c_int,
}

#[repr(C)]
struct GpioHandleData {
    values: [u8; GPIOHANDLES_MAX],
}

// Request codes from <linux/gpio.h>. The _IOWR macro expansion is hardcoded
// so userland and kernel agree regardless of how the structs are wrapped.
const GPIO_GET_LINEHANDLE_NR: u32 = 0xC16C_B403;
const GPIOHANDLE_GET_LINE_VALUES_NR: u32 = 0xC040_B408;
const GPIOHANDLE_SET_LINE_VALUES_NR: u32 = 0xC040_B409;

ioctl_readwrite_bad!(gpio_get_linehandle, GPIO_GET_LINEHANDLE_NR, GpioHandleRequest);
ioctl_readwrite_bad!(gpiohandle_get_values, GPIOHANDLE_GET_LINE_VALUES_NR, GpioHandleData);
ioctl_readwrite_bad!(gpiohandle_set_values, GPIOHANDLE_SET_LINE_VALUES_NR, GpioHandleData);

/// One requested GPIO line.
struct Line {
    fd: OwnedFd,
}

impl Line {
    fn request(chip: &File, offset: u32, flags: u32, default: bool, label: &str) -> io::Result<Line> {
        let mut request = GpioHandleRequest {
            lineoffsets: [0; GPIOHANDLES_MAX],
            flags,
            default_values: [0; GPIOHANDLES_MAX],
            consumer_label: [0; CONSUMER_LABEL_LEN],
            lines: 1,
            fd: 0,
        };
        request.lineoffsets[0] = offset;
        request.default_values[0] = u8::from(default);
        let label = label.as_bytes();
        let label_len = label.len().min(CONSUMER_LABEL_LEN - 1);
        request.consumer_label[..label_len].copy_from_slice(&label[..label_len]);

        // SAFETY: The ioctl call is safe because:
        // - The chip file descriptor is valid (the file is open)
        // - The request struct matches the layout the driver expects
        unsafe {
            gpio_get_linehandle(chip.as_raw_fd(), &mut request)?;
        }
        // SAFETY: On success the driver returns a fresh line-handle fd that
        // this Line now owns.
        let fd = unsafe { OwnedFd::from_raw_fd(request.fd) };
        Ok(Line { fd })
    }

    fn set(&self, level: bool) -> io::Result<()> {
        let mut data = GpioHandleData {
            values: [0; GPIOHANDLES_MAX],
        };
        data.values[0] = u8::from(level);
        // SAFETY: fd is a valid line handle and the data struct matches the
        // driver's layout.
        unsafe {
            gpiohandle_set_values(self.fd.as_raw_fd(), &mut data)?;
        }
        Ok(())
    }

    fn get(&self) -> io::Result<bool> {
        let mut data = GpioHandleData {
            values: [0; GPIOHANDLES_MAX],
        };
        // SAFETY: As above.
        unsafe {
            gpiohandle_get_values(self.fd.as_raw_fd(), &mut data)?;
        }
        Ok(data.values[0] != 0)
    }
}

fn drive(line: &Line, level: bool, name: &str) {
    if let Err(e) = line.set(level) {
        log::error!("{} write failed: {}", name, e);
    }
}

/// Line offsets for a board wired to a GPIO chip.
#[derive(Copy, Clone, Debug)]
pub struct GpioPins {
    pub tck: u32,
    pub tms: u32,
    pub tdi: u32,
    pub tdo: u32,
    pub prog: Option<u32>,
    pub led: Option<u32>,
}

struct GpioTap {
    tck: Line,
    tms: Line,
    tdi: Line,
    tdo: Line,
}

impl TapPort for GpioTap {
    fn set_tms(&mut self, level: bool) {
        drive(&self.tms, level, "TMS");
    }

    fn set_tdi(&mut self, level: bool) {
        drive(&self.tdi, level, "TDI");
    }

    fn pulse_tck(&mut self) {
        drive(&self.tck, true, "TCK");
        drive(&self.tck, false, "TCK");
    }

    fn read_tdo(&mut self) -> bool {
        match self.tdo.get() {
            Ok(level) => level,
            Err(e) => {
                log::error!("TDO read failed: {}", e);
                false
            }
        }
    }
}

struct LedLine(Line);

impl StatusLed for LedLine {
    fn set(&mut self, on: bool) {
        drive(&self.0, on, "LED");
    }
}

/// A single-port board whose TAP, PROG# and LED lines hang off one GPIO
/// character device.
pub struct GpioBoard {
    tap: GpioTap,
    prog: Option<Line>,
    led: Option<LedLine>,
}

impl GpioBoard {
    pub fn open(chip_path: impl AsRef<Path>, pins: &GpioPins) -> io::Result<GpioBoard> {
        let path = chip_path.as_ref();
        log::debug!("Opening GPIO chip: {}", path.display());
        let chip = OpenOptions::new().read(true).write(true).open(path)?;

        let output = GPIOHANDLE_REQUEST_OUTPUT;
        let tap = GpioTap {
            tck: Line::request(&chip, pins.tck, output, false, "xsusb-tck")?,
            tms: Line::request(&chip, pins.tms, output, false, "xsusb-tms")?,
            tdi: Line::request(&chip, pins.tdi, output, false, "xsusb-tdi")?,
            tdo: Line::request(&chip, pins.tdo, GPIOHANDLE_REQUEST_INPUT, false, "xsusb-tdo")?,
        };
        let prog = match pins.prog {
            // PROG# idles high so the FPGA is not erased on startup.
            Some(offset) => Some(Line::request(&chip, offset, output, true, "xsusb-prog")?),
            None => None,
        };
        let led = match pins.led {
            Some(offset) => Some(LedLine(Line::request(&chip, offset, output, false, "xsusb-led")?)),
            None => None,
        };
        log::info!("GPIO board ready on {}", path.display());
        Ok(GpioBoard { tap, prog, led })
    }
}

impl Board for GpioBoard {
    fn tap(&mut self, _port: Port) -> &mut dyn TapPort {
        &mut self.tap
    }

    fn reset(&mut self) {
        if let Some(prog) = &self.prog {
            drive(prog, true, "PROG#");
        }
        drive(&self.tap.tck, false, "TCK");
        drive(&self.tap.tms, false, "TMS");
        drive(&self.tap.tdi, false, "TDI");
    }

    fn set_prog(&mut self, level: bool) {
        match &self.prog {
            Some(prog) => drive(prog, level, "PROG#"),
            None => log::warn!("PROG# requested but no line is configured"),
        }
    }

    fn take_led(&mut self) -> Option<Box<dyn StatusLed>> {
        self.led.take().map(|led| Box::new(led) as Box<dyn StatusLed>)
    }
}
