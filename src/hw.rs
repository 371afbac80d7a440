//! STM32G0 implementations of the driver traits.
//!
//! The drivers are zero sized and reach their peripherals through the PAC
//! register blocks, so they can be created wherever they are needed, including
//! in interrupt handlers. Peripheral clocks are gated through the resource
//! registries.
mod adc;
mod gpio;
mod i2c;
mod usart;

pub use adc::Adc;
pub use gpio::Gpio;
pub use i2c::I2c;
pub use usart::Usart;

use crate::pac;

/// RCC is shared by every driver. Enable bits are only changed through
/// [`with_rcc`].
#[allow(unsafe_code)]
fn rcc() -> &'static pac::rcc::RegisterBlock {
    unsafe { &*pac::RCC::ptr() }
}

/// Run `f` on the RCC registers inside a critical section.
fn with_rcc(f: impl FnOnce(&pac::rcc::RegisterBlock)) {
    critical_section::with(|_| f(rcc()));
}
