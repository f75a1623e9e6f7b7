//! Simulated ATmega8 target for exercising the programmer without hardware.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;

use avr_spi_isp::protocol::{FLASH_SIZE, INSTRUCTION_SIZE, PAGE_SIZE_BYTES, SIGNATURE};
use avr_spi_isp::{IspPort, Options, Programmer};

#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    Transfer(Vec<u8>),
    Reset(bool),
    Delay(u32),
}

pub type Log = Rc<RefCell<Vec<Event>>>;

#[derive(Clone, PartialEq, Debug)]
pub struct SimError;

pub struct SimTarget {
    pub flash: Vec<u8>,
    pub page: Vec<u8>,
    pub signature: [u8; 3],
    pub fuse_low: u8,
    pub fuse_high: u8,
    pub programming: bool,
    /// Acknowledge programming enable
    pub ack: bool,
    /// Flash offset stuck at a value regardless of writes
    pub stuck: Option<(usize, u8)>,
    /// Fail transfers after this many have completed
    pub fail_after: Option<usize>,
    transfers: usize,
    log: Log,
}

impl SimTarget {
    pub fn new(log: Log) -> Self {
        Self {
            flash: vec![0xFF; FLASH_SIZE],
            page: vec![0xFF; PAGE_SIZE_BYTES],
            signature: SIGNATURE,
            fuse_low: 0xE1,
            fuse_high: 0xD9,
            programming: false,
            ack: true,
            stuck: None,
            fail_after: None,
            transfers: 0,
            log,
        }
    }

    fn execute(&mut self, tx: &[u8]) -> [u8; INSTRUCTION_SIZE] {
        let mut rx = [0x00, tx[0], tx[1], tx[2]];

        if tx[0] == 0xAC && tx[1] == 0x53 {
            if self.ack {
                self.programming = true;
            } else {
                rx = [0x00; INSTRUCTION_SIZE];
            }
            return rx;
        }

        if !self.programming {
            return [0x00; INSTRUCTION_SIZE];
        }

        match tx[0] {
            0xAC => match tx[1] {
                0x80 => self.flash.iter_mut().for_each(|b| *b = 0xFF),
                0xA0 => self.fuse_low = tx[3],
                0xA8 => self.fuse_high = tx[3],
                _ => (),
            },
            0x30 => rx[3] = self.signature.get(tx[2] as usize).copied().unwrap_or(0),
            0x50 => rx[3] = self.fuse_low,
            0x58 => rx[3] = self.fuse_high,
            0x20 | 0x28 => {
                let word = ((tx[1] as usize) << 8) | tx[2] as usize;
                let offset = word * 2 + if tx[0] & 0x08 != 0 { 1 } else { 0 };
                rx[3] = self.flash.get(offset).copied().unwrap_or(0xFF);
            }
            0x40 | 0x48 => {
                let offset = (tx[2] as usize % (PAGE_SIZE_BYTES / 2)) * 2
                    + if tx[0] & 0x08 != 0 { 1 } else { 0 };
                self.page[offset] = tx[3];
            }
            0x4C => {
                let word = ((tx[1] as usize) << 8) | tx[2] as usize;
                let base = word * 2;
                for (i, b) in self.page.iter().enumerate() {
                    // Programming can only clear bits
                    self.flash[base + i] &= *b;
                }
                self.page.iter_mut().for_each(|b| *b = 0xFF);

                if let Some((offset, value)) = self.stuck {
                    self.flash[offset] = value;
                }
            }
            _ => (),
        }

        rx
    }

    /// Transfers recorded in the log
    pub fn transfers(log: &Log) -> Vec<Vec<u8>> {
        log.borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Transfer(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// Page numbers of committed pages, in order
    pub fn commits(log: &Log) -> Vec<usize> {
        Self::transfers(log)
            .iter()
            .filter(|t| t.len() == INSTRUCTION_SIZE && t[0] == 0x4C)
            .map(|t| (((t[1] as usize) << 8) | t[2] as usize) / 32)
            .collect()
    }
}

impl Transfer<u8> for SimTarget {
    type Error = SimError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], SimError> {
        if let Some(n) = self.fail_after {
            if self.transfers >= n {
                return Err(SimError);
            }
        }
        self.transfers += 1;

        self.log.borrow_mut().push(Event::Transfer(words.to_vec()));

        assert_eq!(words.len() % INSTRUCTION_SIZE, 0, "partial instruction frame");
        for frame in words.chunks_mut(INSTRUCTION_SIZE) {
            let rx = self.execute(frame);
            frame.copy_from_slice(&rx);
        }

        Ok(words)
    }
}

impl IspPort<SimError> for SimTarget {
    fn set_reset(&mut self, level: bool) -> Result<(), SimError> {
        self.log.borrow_mut().push(Event::Reset(level));
        if level {
            self.programming = false;
        }
        Ok(())
    }
}

pub struct SimDelay {
    log: Log,
}

impl DelayMs<u32> for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.log.borrow_mut().push(Event::Delay(ms));
    }
}

pub type SimProgrammer = Programmer<SimTarget, SimDelay, SimError>;

/// Create a programmer attached to a fresh simulated target
pub fn programmer(options: Options) -> (SimProgrammer, Log) {
    let log = Log::default();
    let target = SimTarget::new(log.clone());
    let delay = SimDelay { log: log.clone() };
    (Programmer::new(target, delay, options), log)
}

/// Create a programmer with a customised target
pub fn programmer_with<F: FnOnce(&mut SimTarget)>(options: Options, f: F) -> (SimProgrammer, Log) {
    let log = Log::default();
    let mut target = SimTarget::new(log.clone());
    f(&mut target);
    let delay = SimDelay { log: log.clone() };
    (Programmer::new(target, delay, options), log)
}

/// Image filled with an incrementing pattern
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}
