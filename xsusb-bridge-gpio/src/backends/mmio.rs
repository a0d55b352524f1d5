//! # Memory-Mapped GPIO Backend
//!
//! For boards whose TAP lines sit on a memory-mapped GPIO block exposed
//! through the Linux UIO subsystem. The block's data, readback and
//! direction registers are mapped once and driven with volatile accesses.
//!
//! ## Example Usage
//!
//! ```ignore
//! use xsusb_bridge::Builder;
//! use xsusb_bridge_gpio::backends::mmio::{MmioBoard, MmioLayout};
//!
//! let layout = MmioLayout {
//!     data_offset: 0x00,
//!     input_offset: 0x08,
//!     dir_offset: Some(0x04),
//!     tck_bit: 0,
//!     tms_bit: 1,
//!     tdi_bit: 2,
//!     tdo_bit: 3,
//!     prog_bit: Some(4),
//! };
//! let board = MmioBoard::open("/dev/uio0", layout)?;
//! let mut server = Builder::new().build(board)?;
//! server.listen("127.0.0.1:6671")?;
//! ```
use std::fs::OpenOptions;
use std::io;
use std::num::NonZero;
use std::path::Path;
use std::ptr::{NonNull, read_volatile, write_volatile};

use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

use xsusb_bridge::{Board, Port, TapPort};

const MAP_SIZE: usize = 0x10000;

/// Register layout of the mapped GPIO block. Offsets are in bytes from the
/// start of the mapping; bit numbers index into the 32-bit registers. A set
/// bit in the direction register makes the pin an output.
#[derive(Copy, Clone, Debug)]
pub struct MmioLayout {
    pub data_offset: usize,
    pub input_offset: usize,
    pub dir_offset: Option<usize>,
    pub tck_bit: u32,
    pub tms_bit: u32,
    pub tdi_bit: u32,
    pub tdo_bit: u32,
    pub prog_bit: Option<u32>,
}

/// A single-port board on memory-mapped GPIO registers.
///
/// The output register is shadowed so pins can be updated without
/// read-modify-write cycles on hardware whose data register is write-only.
pub struct MmioBoard {
    regs: *mut u32,
    layout: MmioLayout,
    shadow: u32,
}

impl MmioBoard {
    pub fn open(path: impl AsRef<Path>, layout: MmioLayout) -> io::Result<MmioBoard> {
        let device_path = path.as_ref();
        log::debug!("Opening UIO device: {}", device_path.display());
        let file = OpenOptions::new().read(true).write(true).open(device_path)?;

        let regs = unsafe {
            log::debug!("Mapping UIO memory (size=0x{:x})", MAP_SIZE);
            let ptr = mmap(
                None,
                NonZero::new(MAP_SIZE).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                0,
            )?;
            log::info!("UIO memory mapped successfully");
            ptr.as_ptr() as *mut u32
        };

        let mut board = MmioBoard {
            regs,
            layout,
            shadow: 0,
        };
        if let Some(prog_bit) = layout.prog_bit {
            // PROG# idles high so the FPGA is not erased on startup.
            board.shadow |= 1 << prog_bit;
        }
        board.write_outputs();

        if let Some(dir_offset) = layout.dir_offset {
            let mut outputs = (1 << layout.tck_bit) | (1 << layout.tms_bit) | (1 << layout.tdi_bit);
            if let Some(prog_bit) = layout.prog_bit {
                outputs |= 1 << prog_bit;
            }
            // SAFETY: dir_offset lies inside the block mapped above.
            unsafe {
                write_volatile(board.regs.add(dir_offset / 4), outputs);
            }
        }
        Ok(board)
    }

    fn write_outputs(&mut self) {
        // SAFETY: data_offset lies inside the mapped block.
        unsafe {
            write_volatile(self.regs.add(self.layout.data_offset / 4), self.shadow);
        }
    }

    fn set_bit(&mut self, bit: u32, level: bool) {
        if level {
            self.shadow |= 1 << bit;
        } else {
            self.shadow &= !(1 << bit);
        }
        self.write_outputs();
    }

    fn read_bit(&self, bit: u32) -> bool {
        // SAFETY: input_offset lies inside the mapped block.
        let levels = unsafe { read_volatile(self.regs.add(self.layout.input_offset / 4)) };
        levels & (1 << bit) != 0
    }
}

impl Drop for MmioBoard {
    fn drop(&mut self) {
        if let Some(ptr) = NonNull::new(self.regs) {
            unsafe {
                let _ = munmap(ptr.cast(), MAP_SIZE);
            }
        }
    }
}

impl TapPort for MmioBoard {
    fn set_tms(&mut self, level: bool) {
        self.set_bit(self.layout.tms_bit, level);
    }

    fn set_tdi(&mut self, level: bool) {
        self.set_bit(self.layout.tdi_bit, level);
    }

    fn pulse_tck(&mut self) {
        self.set_bit(self.layout.tck_bit, true);
        self.set_bit(self.layout.tck_bit, false);
    }

    fn read_tdo(&mut self) -> bool {
        self.read_bit(self.layout.tdo_bit)
    }
}

impl Board for MmioBoard {
    fn tap(&mut self, _port: Port) -> &mut dyn TapPort {
        self
    }

    fn reset(&mut self) {
        self.shadow = match self.layout.prog_bit {
            Some(prog_bit) => 1 << prog_bit,
            None => 0,
        };
        self.write_outputs();
    }

    fn set_prog(&mut self, level: bool) {
        match self.layout.prog_bit {
            Some(prog_bit) => self.set_bit(prog_bit, level),
            None => log::warn!("PROG# requested but no bit is configured"),
        }
    }
}
