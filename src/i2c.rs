//! Blocking I2C master.
mod registers;

pub use registers::{Status, Timing};

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, Operation, SevenBitAddress};
use fugit::HertzU32;

use crate::diag::{Diagnostics, Error, trace};
use crate::gpio::{
    GpioDriver, GpioManager, OutputType, PinAllocation, PinId, PinOption, Pull, Speed, find_af,
};
use crate::rcc::Clocks;
use crate::resource::{GroupClock, ResourceHandle, ResourceRegistry, unit_resource};

unit_resource! {
    /// I2C instance
    I2cId { I2c1 = 0, I2c2 = 1, I2c3 = 2 }
}

pub const NUM_I2CS: usize = I2cId::COUNT;

/// Longest transfer in one direction
pub const MAX_TRANSFER: usize = 255;

/// Bus allocation registry.
pub type I2cManager<'d, D> = ResourceRegistry<'d, I2cId, D, NUM_I2CS>;

/// Bus clock
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cSpeed {
    Speed10kHz,
    Speed100kHz,
    Speed400kHz,
    Speed1MHz,
}

struct SpeedParams {
    /// Highest prescaled kernel clock
    presc_target: u32,
    scll: u8,
    sclh: u8,
    sdadel: u8,
    scldel: u8,
}

// Reference timings for a 48 MHz kernel clock. The prescaler keeps the
// prescaled clock at or below the target for slower kernel clocks.
const SPEED_SETTINGS: [SpeedParams; 4] = [
    SpeedParams {
        presc_target: 4_000_000,
        scll: 0xc7,
        sclh: 0xc3,
        sdadel: 0x2,
        scldel: 0x4,
    },
    SpeedParams {
        presc_target: 4_000_000,
        scll: 0x13,
        sclh: 0xf,
        sdadel: 0x2,
        scldel: 0x4,
    },
    SpeedParams {
        presc_target: 8_000_000,
        scll: 0x9,
        sclh: 0x3,
        sdadel: 0x3,
        scldel: 0x3,
    },
    SpeedParams {
        presc_target: 8_000_000,
        scll: 0x3,
        sclh: 0x1,
        sdadel: 0x0,
        scldel: 0x1,
    },
];

impl I2cSpeed {
    /// TIMINGR value for a kernel clock of `pclk`.
    pub fn timing(self, pclk: HertzU32) -> Timing {
        let params = &SPEED_SETTINGS[self as usize];
        let mut presc = 0;
        while presc < 15 && pclk.raw() / (presc + 1) > params.presc_target {
            presc += 1;
        }

        let mut timing = Timing(0);
        timing.set_presc(presc as u8);
        timing.set_scll(params.scll);
        timing.set_sclh(params.sclh);
        timing.set_sdadel(params.sdadel);
        timing.set_scldel(params.scldel);
        timing
    }
}

/// Start condition parameters
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Request {
    /// 7-bit address
    pub address: u8,
    pub read: bool,
    pub len: u8,
    /// Send STOP after `len` bytes instead of waiting for a restart.
    pub autoend: bool,
}

/// Register access for I2C instances.
///
/// The group clock callback gates the kernel clock.
pub trait I2cDriver: GroupClock {
    fn sda_options(&self, bus: I2cId) -> &'static [PinOption];
    fn scl_options(&self, bus: I2cId) -> &'static [PinOption];
    /// Program the timing and enable the peripheral.
    fn enable(&self, bus: I2cId, timing: Timing);
    fn disable(&self, bus: I2cId);
    /// Generate a (repeated) start.
    fn start(&self, bus: I2cId, request: Request);
    /// Generate a stop after an aborted transfer.
    fn stop(&self, bus: I2cId);
    fn status(&self, bus: I2cId) -> Status;
    /// Clear NACK and STOP flags.
    fn clear_flags(&self, bus: I2cId);
    fn write_data(&self, bus: I2cId, byte: u8);
    fn read_data(&self, bus: I2cId) -> u8;
}

/// I2C bus master owning its bus and both pins.
pub struct I2c<'a, D: I2cDriver, G: GpioDriver> {
    handle: ResourceHandle<'a, I2cId, D, NUM_I2CS>,
    _sda: PinAllocation<'a, G>,
    _scl: PinAllocation<'a, G>,
}

impl<'a, D: I2cDriver, G: GpioDriver> I2c<'a, D, G> {
    pub fn new(
        manager: &'a I2cManager<'_, D>,
        gpio: &'a GpioManager<'_, G>,
        bus: I2cId,
        sda: PinId,
        scl: PinId,
        speed: I2cSpeed,
        clocks: &Clocks,
    ) -> Result<Self, Error> {
        let driver = manager.control();
        let diag = manager.diagnostics();
        let Some(sda_af) = find_af(driver.sda_options(bus), sda) else {
            diag.error(format_args!("{:?} SDA pin {:?} invalid", bus, sda));
            return Err(Error::InvalidPin);
        };
        let Some(scl_af) = find_af(driver.scl_options(bus), scl) else {
            diag.error(format_args!("{:?} SCL pin {:?} invalid", bus, scl));
            return Err(Error::InvalidPin);
        };

        let sda_pin = gpio.pin(sda)?;
        let scl_pin = gpio.pin(scl)?;
        let handle = manager.allocate(bus)?;

        for (pin, af) in [(&sda_pin, sda_af), (&scl_pin, scl_af)] {
            pin.set_speed(Speed::Low);
            pin.set_alternate(af, OutputType::OpenDrain, Pull::None);
        }

        let timing = speed.timing(clocks.pclk);
        trace!("{:?}: timing {:#010x}", bus, timing.0);
        driver.enable(bus, timing);

        Ok(Self {
            handle,
            _sda: sda_pin,
            _scl: scl_pin,
        })
    }

    fn driver(&self) -> &D {
        self.handle.registry().control()
    }

    fn diag(&self) -> &Diagnostics {
        self.handle.registry().diagnostics()
    }

    pub fn id(&self) -> I2cId {
        self.handle.key()
    }

    /// Write `data` to the 7-bit address `address`. Returns whether every
    /// byte was acknowledged.
    pub fn send(&mut self, address: u8, data: &[u8]) -> bool {
        self.send_receive(address, data, &mut [])
    }

    /// Read `buf.len()` bytes from `address`.
    pub fn receive(&mut self, address: u8, buf: &mut [u8]) -> bool {
        self.send_receive(address, &[], buf)
    }

    /// Write `data`, then read into `buf` after a repeated start.
    ///
    /// Each direction carries at most [`MAX_TRANSFER`] bytes. Failures are
    /// reported through the error sink.
    pub fn send_receive(&mut self, address: u8, data: &[u8], buf: &mut [u8]) -> bool {
        match self.try_send_receive(address, data, buf) {
            Ok(()) => true,
            Err(e) => {
                self.report(e, data.len().max(buf.len()));
                false
            }
        }
    }

    fn try_send_receive(&self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<(), Error> {
        if data.len() > MAX_TRANSFER || buf.len() > MAX_TRANSFER {
            return Err(Error::TransferTooLong);
        }

        let read = !buf.is_empty();
        if !data.is_empty() || !read {
            self.write_phase(address, data.len(), data.iter(), !read)?;
        }
        if read {
            self.read_phase(address, buf.len(), buf.iter_mut(), true)?;
        }
        Ok(())
    }

    fn report(&self, error: Error, len: usize) {
        match error {
            Error::TransferTooLong => self.diag().error(format_args!(
                "{:?} transfer of {} bytes exceeds {}",
                self.id(),
                len,
                MAX_TRANSFER
            )),
            _ => self
                .diag()
                .error(format_args!("{:?} {}", self.id(), error)),
        }
    }

    fn write_phase<'b>(
        &self,
        address: u8,
        len: usize,
        data: impl Iterator<Item = &'b u8>,
        last: bool,
    ) -> Result<(), Error> {
        self.driver().start(
            self.id(),
            Request {
                address,
                read: false,
                len: len as u8,
                autoend: last,
            },
        );
        for &byte in data {
            self.wait_for(Status::txis, last)?;
            self.driver().write_data(self.id(), byte);
        }
        self.finish(last)
    }

    fn read_phase<'b>(
        &self,
        address: u8,
        len: usize,
        buf: impl Iterator<Item = &'b mut u8>,
        last: bool,
    ) -> Result<(), Error> {
        self.driver().start(
            self.id(),
            Request {
                address,
                read: true,
                len: len as u8,
                autoend: last,
            },
        );
        for byte in buf {
            self.wait_for(Status::rxne, last)?;
            *byte = self.driver().read_data(self.id());
        }
        self.finish(last)
    }

    fn finish(&self, last: bool) -> Result<(), Error> {
        if last {
            self.wait_for(Status::stopf, last)?;
            self.driver().clear_flags(self.id());
            Ok(())
        } else {
            self.wait_for(Status::tc, last)
        }
    }

    /// Poll until `ready` or a NACK.
    fn wait_for(&self, ready: fn(&Status) -> bool, autoend: bool) -> Result<(), Error> {
        loop {
            let status = self.driver().status(self.id());
            if status.nackf() {
                if !autoend {
                    self.driver().stop(self.id());
                }
                self.driver().clear_flags(self.id());
                return Err(Error::Nack);
            }
            if ready(&status) {
                return Ok(());
            }
        }
    }
}

impl<D: I2cDriver, G: GpioDriver> Drop for I2c<'_, D, G> {
    fn drop(&mut self) {
        self.driver().disable(self.id());
    }
}

impl<D: I2cDriver, G: GpioDriver> embedded_hal::i2c::ErrorType for I2c<'_, D, G> {
    type Error = ErrorKind;
}

/// Index past the run of operations in the same direction starting at `start`.
fn run_end(operations: &[Operation<'_>], start: usize) -> usize {
    let read = matches!(operations[start], Operation::Read(_));
    operations[start..]
        .iter()
        .position(|op| matches!(op, Operation::Read(_)) != read)
        .map_or(operations.len(), |n| start + n)
}

fn run_len(run: &[Operation<'_>]) -> usize {
    run.iter()
        .map(|op| match op {
            Operation::Write(data) => data.len(),
            Operation::Read(buf) => buf.len(),
        })
        .sum()
}

impl<D: I2cDriver, G: GpioDriver> embedded_hal::i2c::I2c<SevenBitAddress> for I2c<'_, D, G> {
    /// Adjacent operations in the same direction form one phase without a
    /// new start. Phases are separated by a repeated start and the last one
    /// ends with a stop. Every phase is checked against [`MAX_TRANSFER`]
    /// before the bus is touched.
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let count = operations.len();

        let mut start = 0;
        while start < count {
            let end = run_end(operations, start);
            let len = run_len(&operations[start..end]);
            if len > MAX_TRANSFER {
                self.report(Error::TransferTooLong, len);
                return Err(ErrorKind::Other);
            }
            start = end;
        }

        let mut start = 0;
        while start < count {
            let end = run_end(operations, start);
            let last = end == count;
            let run = &mut operations[start..end];
            let len = run_len(run);

            let result = if matches!(run[0], Operation::Write(_)) {
                let data = run.iter().flat_map(|op| match op {
                    Operation::Write(data) => data.iter(),
                    Operation::Read(_) => Default::default(),
                });
                self.write_phase(address, len, data, last)
            } else {
                let buf = run.iter_mut().flat_map(|op| match op {
                    Operation::Read(buf) => buf.iter_mut(),
                    Operation::Write(_) => Default::default(),
                });
                self.read_phase(address, len, buf, last)
            };

            result.map_err(|e| match e {
                Error::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
                _ => ErrorKind::Other,
            })?;
            start = end;
        }
        Ok(())
    }
}
