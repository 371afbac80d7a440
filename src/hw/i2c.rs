use super::with_rcc;
use crate::gpio::{PA9, PA10, PA11, PA12, PB6, PB7, PB8, PB9, PB10, PB11, PB13, PB14, PinOption};
use crate::i2c::{I2cDriver, I2cId, Request, Status, Timing};
use crate::pac;
use crate::resource::GroupClock;

const fn af6(pin: crate::gpio::PinId) -> PinOption {
    PinOption { pin, af: 6 }
}

const I2C1_SDA: &[PinOption] = &[af6(PA10), af6(PB7), af6(PB9)];
const I2C1_SCL: &[PinOption] = &[af6(PA9), af6(PB6), af6(PB8)];
const I2C2_SDA: &[PinOption] = &[af6(PA12), af6(PB11), af6(PB14)];
const I2C2_SCL: &[PinOption] = &[af6(PA11), af6(PB10), af6(PB13)];
#[cfg(feature = "stm32g0b1")]
const I2C3_SDA: &[PinOption] = &[af6(crate::gpio::PB4), af6(crate::gpio::PC1)];
#[cfg(feature = "stm32g0b1")]
const I2C3_SCL: &[PinOption] = &[af6(crate::gpio::PB3), af6(crate::gpio::PC0)];

/// I2C instances, clocked from PCLK.
#[derive(Debug, Default, Clone, Copy)]
pub struct I2c;

/// Every instance shares the I2C1 register layout.
#[allow(unsafe_code)]
fn regs(bus: I2cId) -> Option<&'static pac::i2c1::RegisterBlock> {
    let rb = match bus {
        I2cId::I2c1 => pac::I2C1::ptr(),
        I2cId::I2c2 => pac::I2C2::ptr(),
        #[cfg(feature = "stm32g0b1")]
        I2cId::I2c3 => pac::I2C3::ptr(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(unsafe { &*rb })
}

fn with_bus<T: Default>(bus: I2cId, f: impl FnOnce(&pac::i2c1::RegisterBlock) -> T) -> T {
    regs(bus).map(f).unwrap_or_default()
}

impl GroupClock for I2c {
    fn set_group_clock(&self, group: usize, enabled: bool) {
        with_rcc(|rcc| {
            rcc.apbenr1().modify(|_, w| match group {
                0 => w.i2c1en().bit(enabled),
                1 => w.i2c2en().bit(enabled),
                #[cfg(feature = "stm32g0b1")]
                2 => w.i2c3en().bit(enabled),
                _ => w,
            });
        });
    }
}

impl I2cDriver for I2c {
    fn sda_options(&self, bus: I2cId) -> &'static [PinOption] {
        match bus {
            I2cId::I2c1 => I2C1_SDA,
            I2cId::I2c2 => I2C2_SDA,
            #[cfg(feature = "stm32g0b1")]
            I2cId::I2c3 => I2C3_SDA,
            #[allow(unreachable_patterns)]
            _ => &[],
        }
    }

    fn scl_options(&self, bus: I2cId) -> &'static [PinOption] {
        match bus {
            I2cId::I2c1 => I2C1_SCL,
            I2cId::I2c2 => I2C2_SCL,
            #[cfg(feature = "stm32g0b1")]
            I2cId::I2c3 => I2C3_SCL,
            #[allow(unreachable_patterns)]
            _ => &[],
        }
    }

    #[allow(unsafe_code)]
    fn enable(&self, bus: I2cId, timing: Timing) {
        with_bus(bus, |rb| {
            rb.cr1().modify(|_, w| w.pe().clear_bit());
            rb.timingr().write(|w| unsafe {
                w.presc()
                    .bits(timing.presc())
                    .scldel()
                    .bits(timing.scldel())
                    .sdadel()
                    .bits(timing.sdadel())
                    .sclh()
                    .bits(timing.sclh())
                    .scll()
                    .bits(timing.scll())
            });
            rb.cr1().modify(|_, w| w.pe().set_bit());
        })
    }

    fn disable(&self, bus: I2cId) {
        with_bus(bus, |rb| {
            rb.cr1().modify(|_, w| w.pe().clear_bit());
        })
    }

    #[allow(unsafe_code)]
    fn start(&self, bus: I2cId, request: Request) {
        with_bus(bus, |rb| {
            rb.cr2().write(|w| {
                unsafe {
                    w.sadd().bits(u16::from(request.address) << 1).nbytes().bits(request.len);
                }
                w.rd_wrn()
                    .bit(request.read)
                    .autoend()
                    .bit(request.autoend)
                    .start()
                    .set_bit()
            });
        })
    }

    fn stop(&self, bus: I2cId) {
        with_bus(bus, |rb| {
            rb.cr2().modify(|_, w| w.stop().set_bit());
        })
    }

    fn status(&self, bus: I2cId) -> Status {
        with_bus(bus, |rb| Status(rb.isr().read().bits()))
    }

    fn clear_flags(&self, bus: I2cId) {
        with_bus(bus, |rb| {
            rb.icr().write(|w| w.nackcf().set_bit().stopcf().set_bit());
        })
    }

    #[allow(unsafe_code)]
    fn write_data(&self, bus: I2cId, byte: u8) {
        with_bus(bus, |rb| {
            rb.txdr().write(|w| unsafe { w.txdata().bits(byte) });
        })
    }

    fn read_data(&self, bus: I2cId) -> u8 {
        with_bus(bus, |rb| rb.rxdr().read().rxdata().bits())
    }
}
