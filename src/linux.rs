use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::Path;

use anyhow::Context;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{Delay, Spidev, SysfsPin};

use crate::{IspPort, Options, Programmer};

/// spidev port with a sysfs GPIO driving the target reset line
pub struct LinuxPort {
    spi: Spidev,
    reset: SysfsPin,
}

impl Transfer<u8> for LinuxPort {
    type Error = IoError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], IoError> {
        self.spi.transfer(words)
    }
}

impl IspPort<IoError> for LinuxPort {
    fn set_reset(&mut self, level: bool) -> Result<(), IoError> {
        let r = if level {
            self.reset.set_high()
        } else {
            self.reset.set_low()
        };
        r.map_err(|e| IoError::new(IoErrorKind::Other, format!("reset pin: {:?}", e)))
    }
}

impl Programmer<LinuxPort, Delay, IoError> {
    /// Create a new linux spidev programmer instance
    pub fn linux<P: AsRef<Path>>(
        device: P,
        speed_hz: u32,
        reset_pin: u64,
        options: Options,
    ) -> Result<Self, anyhow::Error> {
        let device = device.as_ref();

        // Open port
        let mut spi = Spidev::open(device)
            .with_context(|| format!("opening SPI device {}", device.display()))?;

        // Apply settings
        let settings = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();

        spi.0
            .configure(&settings)
            .with_context(|| format!("configuring SPI device {}", device.display()))?;

        // Setup reset pin
        let reset = SysfsPin::new(reset_pin);
        reset
            .0
            .export()
            .with_context(|| format!("exporting reset GPIO {}", reset_pin))?;
        reset
            .0
            .set_direction(Direction::Out)
            .with_context(|| format!("configuring reset GPIO {}", reset_pin))?;

        debug!(
            "Opened {} at {} Hz with reset on GPIO {}",
            device.display(),
            speed_hz,
            reset_pin
        );

        // Return instance
        Ok(Self::new(LinuxPort { spi, reset }, Delay {}, options))
    }
}
