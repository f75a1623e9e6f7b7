//! AVR SPI In-System Programmer.
//!
//! Drives the serial programming interface of an ATmega8 using a host SPI
//! controller and a GPIO connected to the target reset line.

use core::marker::PhantomData;

#[macro_use]
extern crate log;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod flash;
pub mod image;
pub mod protocol;

pub use flash::Mismatch;
pub use protocol::Fuse;
use protocol::{INSTRUCTION_SIZE, RESET_DELAY_MS, SIGNATURE, WRITE_DELAY_MS};

/// SPI port with an attached target reset line
pub trait IspPort<E>: Transfer<u8, Error = E> {
    /// Drive the reset control line, `true` releases the target
    fn set_reset(&mut self, level: bool) -> Result<(), E>;
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    /// Target not in programming mode
    Idle,
    /// Programming enable acknowledged
    Programming,
    Erased,
    Written,
    /// Read-back comparison complete
    Verified,
    Failed,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<E: core::fmt::Debug> {
    #[error("transport error: {0:?}")]
    Transport(E),

    #[error("programming enable not acknowledged (response: {response:02x?})")]
    Handshake { response: [u8; INSTRUCTION_SIZE] },

    #[error("device signature {signature:02x?} does not match ATmega8")]
    SignatureMismatch { signature: [u8; 3] },

    #[error("image of {len} bytes exceeds flash size of {max} bytes")]
    FileTooLarge { len: usize, max: usize },

    #[error("flash verification failed, {} bytes differ", .0.len())]
    VerifyMismatch(Vec<Mismatch>),

    #[error("transfer buffer of {size} bytes too small, at least {required} required")]
    BufferTooSmall { size: usize, required: usize },

    #[error("io error: {0:?}")]
    Io(std::io::ErrorKind),
}

impl<E: core::fmt::Debug> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::Transport(e)
    }
}

impl<E: core::fmt::Debug> Error<E> {
    /// Whether the error aborts the session.
    ///
    /// A verification mismatch is reported once the whole image has been
    /// compared, the target remains in programming mode.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::VerifyMismatch(_))
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Transfer buffer size in bytes, must hold a page of load instructions for writes
    // Default must match protocol::BUFFER_SIZE, checked in tests
    #[cfg_attr(feature = "structopt", structopt(long, default_value="256"))]
    pub buffer_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            buffer_size: protocol::BUFFER_SIZE,
        }
    }
}

/// Fuse register values
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Fuses {
    pub low: u8,
    pub high: u8,
}

/// Progress sink for flash reads and writes
pub trait Progress {
    fn notify(&mut self, label: &str, units: &str, done: usize, total: usize);
}

pub struct Programmer<P, D, E> {
    state: State,
    options: Options,
    port: P,
    delay: D,
    progress: Option<Box<dyn Progress>>,
    _err: PhantomData<E>,
}

impl <P, D, E> Programmer<P, D, E>
where
    P: IspPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self{state: State::Idle, options, port, delay, progress: None, _err: PhantomData}
    }

    /// Attach a progress sink for flash operations
    pub fn with_progress<G: Progress + 'static>(mut self, progress: G) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Fetch the programmer state
    pub fn state(&mut self) -> State {
        self.state
    }

    /// Release the underlying port and delay
    pub fn free(self) -> (P, D) {
        (self.port, self.delay)
    }

    /// Reset the target, enter programming mode and check the signature
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.reset_pulse()?;
        self.enable_programming()?;
        self.check_signature()?;

        Ok(())
    }

    /// Pulse the reset line, leaving the target held in reset
    pub fn reset_pulse(&mut self) -> Result<(), Error<E>> {
        debug!("Resetting device");

        self.port.set_reset(true)?;
        self.delay.delay_ms(RESET_DELAY_MS);
        self.port.set_reset(false)?;

        self.state = State::Idle;

        Ok(())
    }

    /// Issue the programming enable instruction.
    ///
    /// Must follow a reset pulse, responses to other instructions are
    /// undefined until this has been acknowledged.
    pub fn enable_programming(&mut self) -> Result<(), Error<E>> {
        debug!("Enabling programming mode");

        let resp = self.command(protocol::programming_enable())?;
        if resp[2] != protocol::opcode::PROGRAMMING_ENABLE {
            error!("Programming enable not acknowledged: {:02x?}", resp);
            return Err(Error::Handshake { response: resp });
        }

        self.state = State::Programming;

        Ok(())
    }

    pub fn read_signature_byte(&mut self, addr: u8) -> Result<u8, Error<E>> {
        let resp = self.command(protocol::read_signature(addr))?;
        Ok(protocol::decode_result(&resp))
    }

    /// Read the three signature bytes and check they match an ATmega8
    pub fn check_signature(&mut self) -> Result<[u8; 3], Error<E>> {
        let mut signature = [0u8; 3];
        for (addr, b) in signature.iter_mut().enumerate() {
            *b = self.read_signature_byte(addr as u8)?;
        }

        if signature != SIGNATURE {
            error!("Device signature {:02x?} does not match ATmega8", signature);
            return Err(Error::SignatureMismatch { signature });
        }

        info!("Device signature: {:02x?} (ATmega8)", signature);

        Ok(signature)
    }

    pub fn read_fuse_bits(&mut self, fuse: Fuse) -> Result<u8, Error<E>> {
        let resp = self.command(protocol::read_fuse(fuse))?;
        Ok(protocol::decode_result(&resp))
    }

    /// Read both fuse registers
    pub fn read_fuses(&mut self) -> Result<Fuses, Error<E>> {
        let low = self.read_fuse_bits(Fuse::Low)?;
        let high = self.read_fuse_bits(Fuse::High)?;

        info!("Fuses: high: 0x{:02x} low: 0x{:02x}", high, low);

        Ok(Fuses { low, high })
    }

    /// Write a fuse register.
    ///
    /// There is no completion flag, the write is given a fixed settle time and
    /// is not read back.
    pub fn write_fuse(&mut self, fuse: Fuse, value: u8) -> Result<(), Error<E>> {
        info!("Writing {} fuse: 0x{:02x}", fuse, value);

        self.command(protocol::write_fuse(fuse, value))?;
        self.delay.delay_ms(WRITE_DELAY_MS);

        Ok(())
    }

    /// Reset the target and release it to run the application
    pub fn release(&mut self) -> Result<(), Error<E>> {
        self.reset_pulse()?;

        debug!("Releasing device");
        self.port.set_reset(true)?;

        Ok(())
    }

    /// Issue a single instruction, returning the response frame
    fn command(&mut self, instruction: [u8; INSTRUCTION_SIZE]) -> Result<[u8; INSTRUCTION_SIZE], Error<E>> {
        let mut buff = instruction;
        self.transfer(&mut buff)?;
        Ok(buff)
    }

    /// Execute one bus transaction, replacing `buff` with the response
    fn transfer(&mut self, buff: &mut [u8]) -> Result<(), Error<E>> {
        for frame in buff.chunks(INSTRUCTION_SIZE) {
            trace!("tx: {:02x?}", frame);
        }

        self.port.transfer(buff)?;

        for frame in buff.chunks(INSTRUCTION_SIZE) {
            trace!("rx: {:02x?}", frame);
        }

        Ok(())
    }

    fn notify(&mut self, label: &str, done: usize, total: usize) {
        if let Some(p) = self.progress.as_mut() {
            p.notify(label, "bytes", done, total);
        }
    }
}
