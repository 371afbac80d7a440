#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod adc;
pub mod diag;
pub mod gpio;
pub mod handoff;
#[cfg(any(feature = "stm32g071", feature = "stm32g0b1"))]
pub mod hw;
pub mod i2c;
pub mod queue;
pub mod rcc;
pub mod resource;
pub mod stream;
pub mod systick;
pub mod usart;
pub mod usb;

pub use diag::{Diagnostics, Error};

#[cfg(feature = "stm32g071")]
pub use stm32g0::stm32g071 as pac;

#[cfg(feature = "stm32g0b1")]
pub use stm32g0::stm32g0b1 as pac;
