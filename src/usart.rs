//! Interrupt driven USART with buffered streams.
//!
//! Received bytes are moved into a [`BufferedInputStream`] by the USART
//! interrupt handler, which calls [`on_interrupt`] (or
//! [`Usart::on_interrupt`]). Transmission goes through a
//! [`BufferedOutputStream`] that polls the transmit register.
//!
//! ```ignore
//! static RX: BufferedInputStream<1024> = BufferedInputStream::new(());
//!
//! #[interrupt]
//! fn USART2() {
//!     usart::on_interrupt(&hw::Usart, UsartId::Usart2, &RX);
//! }
//! ```
use core::convert::Infallible;
use core::fmt;

use fugit::HertzU32;

use crate::diag::{Diagnostics, Error, trace};
use crate::gpio::{GpioDriver, GpioManager, OutputType, PinAllocation, PinId, PinOption, Pull, Speed, find_af};
use crate::rcc::Clocks;
use crate::resource::{GroupClock, ResourceHandle, ResourceRegistry, unit_resource};
use crate::stream::{BlockWriter, BufferedInputStream, BufferedOutputStream, Inject};

unit_resource! {
    /// USART instance
    UsartId { Usart1 = 0, Usart2 = 1, Usart3 = 2, Usart4 = 3 }
}

pub const NUM_USARTS: usize = UsartId::COUNT;

/// USART allocation registry.
pub type UsartManager<'d, D> = ResourceRegistry<'d, UsartId, D, NUM_USARTS>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    Seven = 7,
    Eight = 8,
    Nine = 9,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    One,
    Two,
}

/// Line settings
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsartConfig {
    pub baudrate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for UsartConfig {
    fn default() -> Self {
        Self {
            baudrate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl UsartConfig {
    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Frame length in bits, parity included.
    pub fn word_length(&self) -> u8 {
        self.data_bits as u8 + u8::from(self.parity != Parity::None)
    }
}

/// BRR value for 16x oversampling, if `baudrate` is reachable from `pclk`.
pub fn brr(pclk: HertzU32, baudrate: u32) -> Option<u16> {
    if baudrate == 0 {
        return None;
    }
    let div = (pclk.raw() + baudrate / 2) / baudrate;
    if (16..=0xffff).contains(&div) {
        Some(div as u16)
    } else {
        None
    }
}

/// Register access for USART instances.
///
/// The group clock callback gates the peripheral clock.
pub trait UsartDriver: GroupClock {
    fn tx_options(&self, usart: UsartId) -> &'static [PinOption];
    fn rx_options(&self, usart: UsartId) -> &'static [PinOption];
    /// Program the frame format and baud rate, enable both directions and the
    /// receive interrupt.
    fn enable(&self, usart: UsartId, brr: u16, config: &UsartConfig);
    fn disable(&self, usart: UsartId);
    /// Transmit data register empty
    fn tx_ready(&self, usart: UsartId) -> bool;
    /// Last frame left the shift register.
    fn tx_complete(&self, usart: UsartId) -> bool;
    fn write_byte(&self, usart: UsartId, byte: u8);
    /// Take a received byte, clearing overrun and framing errors.
    fn read_byte(&self, usart: UsartId) -> Option<u8>;
}

/// Interrupt handler body: move every received byte of `usart` into `rx`.
pub fn on_interrupt<D: UsartDriver + ?Sized>(driver: &D, usart: UsartId, rx: &dyn Inject) {
    while let Some(byte) = driver.read_byte(usart) {
        rx.add_data_to_buffer(&[byte]);
    }
}

/// Transmit side, writing one byte at a time.
pub struct UsartWriter<'a, D> {
    driver: &'a D,
    usart: UsartId,
}

impl<D: UsartDriver> BlockWriter for UsartWriter<'_, D> {
    fn write_block(&mut self, data: &[u8]) {
        for &byte in data {
            while !self.driver.tx_ready(self.usart) {}
            self.driver.write_byte(self.usart, byte);
        }
    }

    // Only a full buffer, an explicit flush or a line end reach the wire.
    fn optimal_write_block_size(&self) -> usize {
        usize::MAX
    }
}

/// USART owning its instance and both pins.
///
/// The receive stream is borrowed so that the interrupt handler can reach it
/// while the foreground owns the `Usart`. Pending output is flushed on drop.
pub struct Usart<'a, D: UsartDriver, G: GpioDriver, const RX: usize = 1024, const TX: usize = 64> {
    output: BufferedOutputStream<TX, UsartWriter<'a, D>>,
    input: &'a BufferedInputStream<RX>,
    handle: ResourceHandle<'a, UsartId, D, NUM_USARTS>,
    _tx: PinAllocation<'a, G>,
    _rx: PinAllocation<'a, G>,
}

impl<'a, D: UsartDriver, G: GpioDriver, const RX: usize, const TX: usize> Usart<'a, D, G, RX, TX> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: &'a UsartManager<'_, D>,
        gpio: &'a GpioManager<'_, G>,
        usart: UsartId,
        tx: PinId,
        rx: PinId,
        config: UsartConfig,
        clocks: &Clocks,
        input: &'a BufferedInputStream<RX>,
    ) -> Result<Self, Error> {
        let driver = manager.control();
        let diag = manager.diagnostics();

        let word_length = config.word_length();
        if !(7..=9).contains(&word_length) {
            diag.error(format_args!(
                "{:?} {} bit frames not supported",
                usart, word_length
            ));
            return Err(Error::UnsupportedConfig);
        }
        let Some(brr) = brr(clocks.pclk, config.baudrate) else {
            diag.error(format_args!(
                "{:?} baud rate {} unreachable from {} Hz",
                usart,
                config.baudrate,
                clocks.pclk.raw()
            ));
            return Err(Error::UnsupportedConfig);
        };
        let Some(tx_af) = find_af(driver.tx_options(usart), tx) else {
            diag.error(format_args!("{:?} TX pin {:?} invalid", usart, tx));
            return Err(Error::InvalidPin);
        };
        let Some(rx_af) = find_af(driver.rx_options(usart), rx) else {
            diag.error(format_args!("{:?} RX pin {:?} invalid", usart, rx));
            return Err(Error::InvalidPin);
        };

        let tx_pin = gpio.pin(tx)?;
        let rx_pin = gpio.pin(rx)?;
        let handle = manager.allocate(usart)?;

        tx_pin.set_speed(Speed::Medium);
        tx_pin.set_alternate(tx_af, OutputType::PushPull, Pull::None);
        rx_pin.set_alternate(rx_af, OutputType::PushPull, Pull::Up);

        trace!("{:?}: brr {:#06x}", usart, brr);
        driver.enable(usart, brr, &config);

        Ok(Self {
            output: BufferedOutputStream::new(UsartWriter { driver, usart }),
            input,
            handle,
            _tx: tx_pin,
            _rx: rx_pin,
        })
    }

    fn driver(&self) -> &D {
        self.handle.registry().control()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.handle.registry().diagnostics()
    }

    pub fn id(&self) -> UsartId {
        self.handle.key()
    }

    /// Poll the receiver, for use from the interrupt handler or when the
    /// interrupt is not wired.
    pub fn on_interrupt(&self) {
        on_interrupt(self.driver(), self.id(), self.input);
    }

    pub fn input(&self) -> &'a BufferedInputStream<RX> {
        self.input
    }

    pub fn output(&mut self) -> &mut BufferedOutputStream<TX, UsartWriter<'a, D>> {
        &mut self.output
    }

    pub fn data_available(&self) -> usize {
        self.input.data_available()
    }

    pub fn read_exact(&self, buf: &mut [u8]) {
        self.input.read_exact(buf);
    }

    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        self.input.try_read(buf)
    }

    pub fn write(&mut self, data: &[u8]) {
        self.output.write(data);
    }

    pub fn flush(&mut self) {
        self.output.flush();
    }

    pub fn end_line(&mut self) {
        self.output.end_line();
    }
}

impl<D: UsartDriver, G: GpioDriver, const RX: usize, const TX: usize> Drop for Usart<'_, D, G, RX, TX> {
    fn drop(&mut self) {
        self.output.flush();
        while !self.driver().tx_complete(self.id()) {}
        self.driver().disable(self.id());
    }
}

impl<D: UsartDriver, G: GpioDriver, const RX: usize, const TX: usize> fmt::Write
    for Usart<'_, D, G, RX, TX>
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}

impl<D: UsartDriver, G: GpioDriver, const RX: usize, const TX: usize> embedded_io::ErrorType
    for Usart<'_, D, G, RX, TX>
{
    type Error = Infallible;
}

impl<D: UsartDriver, G: GpioDriver, const RX: usize, const TX: usize> embedded_io::Read
    for Usart<'_, D, G, RX, TX>
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.input.read_byte();
        Ok(1 + self.input.try_read(&mut buf[1..]))
    }
}

impl<D: UsartDriver, G: GpioDriver, const RX: usize, const TX: usize> embedded_io::Write
    for Usart<'_, D, G, RX, TX>
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.output.write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.output.flush();
        Ok(())
    }
}
