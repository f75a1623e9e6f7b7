//! Program memory access: erase, page-wise writes, chunked reads and
//! read-back verification.

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{self, FLASH_SIZE, INSTRUCTION_SIZE, PAGE_SIZE_BYTES, WRITE_DELAY_MS};
use crate::{Error, IspPort, Programmer, State};

/// A byte that differs between the source image and flash read-back
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Mismatch {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

/// Collect every offset at which `actual` differs from `expected`
pub fn compare(expected: &[u8], actual: &[u8]) -> Vec<Mismatch> {
    expected
        .iter()
        .zip(actual.iter())
        .enumerate()
        .filter(|(_, (e, a))| e != a)
        .map(|(offset, (&expected, &actual))| Mismatch { offset, expected, actual })
        .collect()
}

impl <P, D, E> Programmer<P, D, E>
where
    P: IspPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Erase flash (and unlock lock bits), leaving all bytes at 0xFF
    pub fn erase_chip(&mut self) -> Result<(), Error<E>> {
        info!("Erasing chip");

        self.command(protocol::chip_erase())?;
        self.delay.delay_ms(WRITE_DELAY_MS);

        self.state = State::Erased;

        Ok(())
    }

    /// Read `data.len()` bytes of program memory starting at `word_address`.
    ///
    /// Each byte is one instruction, reads are split into chunks of
    /// `buffer_size / 4` bytes per transfer.
    pub fn read_flash(&mut self, word_address: u16, data: &mut [u8]) -> Result<(), Error<E>> {
        let chunk_len = self.options.buffer_size / INSTRUCTION_SIZE;
        if chunk_len == 0 {
            return Err(Error::BufferTooSmall {
                size: self.options.buffer_size,
                required: INSTRUCTION_SIZE,
            });
        }

        let len = data.len();
        debug!("Reading {} bytes from word address 0x{:04x}", len, word_address);

        for (n, chunk) in data.chunks_mut(chunk_len).enumerate() {
            let offset = n * chunk_len;

            let mut buff = Vec::with_capacity(chunk.len() * INSTRUCTION_SIZE);
            for i in 0..chunk.len() {
                buff.extend_from_slice(&protocol::read_program(word_address, offset + i));
            }

            self.transfer(&mut buff)?;

            for (b, resp) in chunk.iter_mut().zip(buff.chunks(INSTRUCTION_SIZE)) {
                *b = protocol::decode_result(resp);
            }

            self.notify("reading flash", offset + chunk.len(), len);
        }

        Ok(())
    }

    /// Write `data` to flash from address 0, one page at a time.
    ///
    /// A trailing partial page only loads the bytes present. Flash must have
    /// been erased beforehand.
    pub fn write_flash(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        let required = PAGE_SIZE_BYTES * INSTRUCTION_SIZE;
        if self.options.buffer_size < required {
            return Err(Error::BufferTooSmall {
                size: self.options.buffer_size,
                required,
            });
        }

        let len = data.len();
        debug!("Writing {} bytes", len);

        for (page, chunk) in data.chunks(PAGE_SIZE_BYTES).enumerate() {
            let mut buff = Vec::with_capacity(chunk.len() * INSTRUCTION_SIZE);
            for (i, b) in chunk.iter().enumerate() {
                buff.extend_from_slice(&protocol::load_page(i, *b));
            }

            self.transfer(&mut buff)?;
            self.write_page(page)?;

            self.notify("writing flash", page * PAGE_SIZE_BYTES + chunk.len(), len);
        }

        self.state = State::Written;

        Ok(())
    }

    /// Commit the loaded page buffer to flash page `page`
    fn write_page(&mut self, page: usize) -> Result<(), Error<E>> {
        trace!("Committing page {}", page);

        self.command(protocol::write_page(page))?;
        self.delay.delay_ms(WRITE_DELAY_MS);

        Ok(())
    }

    /// Read back `data.len()` bytes from the start of flash and compare
    pub fn verify(&mut self, data: &[u8]) -> Result<Vec<Mismatch>, Error<E>> {
        let mut readback = vec![0u8; data.len()];
        self.read_flash(0, &mut readback)?;

        let mismatches = compare(data, &readback);
        for m in &mismatches {
            warn!(
                "Data mismatch at byte {}: expected 0x{:02x}, got 0x{:02x}",
                m.offset, m.expected, m.actual
            );
        }

        Ok(mismatches)
    }

    /// Erase, write and verify a flash image.
    ///
    /// The target is reset and re-enters programming mode between writing and
    /// reading back. Differences are returned as `Error::VerifyMismatch` once
    /// the whole image has been compared, any other error aborts immediately
    /// and leaves the programmer `Failed`.
    pub fn program_flash(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        if data.len() > FLASH_SIZE {
            return Err(Error::FileTooLarge {
                len: data.len(),
                max: FLASH_SIZE,
            });
        }

        let mismatches = match self.program_and_verify(data) {
            Ok(m) => m,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };

        self.state = State::Verified;

        if !mismatches.is_empty() {
            error!("Flash programming failed, {} bytes differ", mismatches.len());
            return Err(Error::VerifyMismatch(mismatches));
        }

        info!("Flash programming OK");

        Ok(())
    }

    fn program_and_verify(&mut self, data: &[u8]) -> Result<Vec<Mismatch>, Error<E>> {
        self.erase_chip()?;
        self.write_flash(data)?;

        self.reset_pulse()?;
        self.enable_programming()?;

        self.verify(data)
    }
}
