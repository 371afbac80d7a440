//! Pin allocation and general purpose I/O.
//!
//! Pins are allocated from a [`GpioManager`], which keeps a port clock enabled
//! for as long as at least one pin of that port is allocated.
use core::convert::Infallible;

use paste::paste;

use crate::diag::Error;
use crate::resource::{GroupClock, Resource, ResourceHandle, ResourceRegistry};

/// Number of GPIO ports
pub const NUM_PORTS: usize = 6;

/// GPIO port
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
    E = 4,
    F = 5,
}

/// One pin of one port
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinId {
    port: Port,
    pin: u8,
}

impl PinId {
    pub const fn new(port: Port, pin: u8) -> Self {
        Self {
            port,
            pin: pin & 0xf,
        }
    }

    pub fn port(self) -> Port {
        self.port
    }

    pub fn pin(self) -> u8 {
        self.pin
    }
}

impl Resource for PinId {
    fn group(&self) -> usize {
        self.port as usize
    }

    fn mask(&self) -> u32 {
        1 << self.pin
    }
}

macro_rules! pin_ids {
    ($($port:ident),+) => {
        $(pin_ids!(@port $port [0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15]);)+
    };
    (@port $port:ident [$($n:literal)+]) => {
        paste! {
            $(
                pub const [<P $port $n>]: PinId = PinId::new(Port::$port, $n);
            )+
        }
    };
}

pin_ids!(A, B, C, D, E, F);

/// Pin mode
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Input,
    Output,
    /// Alternate function with its number
    Alternate(u8),
    Analog,
}

/// Pull resistor
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Output driver type
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputType {
    PushPull,
    OpenDrain,
}

/// Output slew rate
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    Low = 0,
    Medium = 1,
    High = 2,
    VeryHigh = 3,
}

/// Pin usable for a peripheral signal, with its alternate function.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinOption {
    pub pin: PinId,
    pub af: u8,
}

/// Find the alternate function of `pin` in `options`.
pub fn find_af(options: &[PinOption], pin: PinId) -> Option<u8> {
    options.iter().find(|option| option.pin == pin).map(|option| option.af)
}

/// Register access for GPIO ports.
///
/// The group clock callback gates the port clock.
pub trait GpioDriver: GroupClock {
    /// Whether the chip has `port` at all.
    fn port_available(&self, _port: Port) -> bool {
        true
    }
    fn set_mode(&self, pin: PinId, mode: Mode);
    fn set_pull(&self, pin: PinId, pull: Pull);
    fn set_output_type(&self, pin: PinId, output_type: OutputType);
    fn set_speed(&self, pin: PinId, speed: Speed);
    fn set_output(&self, pin: PinId, high: bool);
    /// Input data register bit
    fn input(&self, pin: PinId) -> bool;
    /// Output data register bit
    fn output(&self, pin: PinId) -> bool;
}

/// Pin allocation registry with one group per port.
pub type GpioManager<'d, D> = ResourceRegistry<'d, PinId, D, NUM_PORTS>;

/// Exclusively owned pin.
pub type PinAllocation<'a, D> = ResourceHandle<'a, PinId, D, NUM_PORTS>;

impl<'d, D: GpioDriver> ResourceRegistry<'d, PinId, D, NUM_PORTS> {
    /// Allocate a pin, turning on its port clock if needed.
    pub fn pin(&self, id: PinId) -> Result<PinAllocation<'_, D>, Error> {
        if !self.control().port_available(id.port) {
            self.diagnostics()
                .error(format_args!("GPIO port {:?} is not available", id.port));
            return Err(Error::InvalidPin);
        }
        self.allocate(id)
    }
}

impl<D: GpioDriver> ResourceHandle<'_, PinId, D, NUM_PORTS> {
    fn driver(&self) -> &D {
        self.registry().control()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.driver().set_mode(self.key(), mode);
    }

    pub fn set_pull(&self, pull: Pull) {
        self.driver().set_pull(self.key(), pull);
    }

    pub fn set_output_type(&self, output_type: OutputType) {
        self.driver().set_output_type(self.key(), output_type);
    }

    pub fn set_speed(&self, speed: Speed) {
        self.driver().set_speed(self.key(), speed);
    }

    /// Route the pin to a peripheral.
    pub fn set_alternate(&self, af: u8, output_type: OutputType, pull: Pull) {
        self.set_output_type(output_type);
        self.set_pull(pull);
        self.set_mode(Mode::Alternate(af));
    }

    /// Disconnect the digital input for ADC use.
    pub fn set_analog(&self) {
        self.set_pull(Pull::None);
        self.set_mode(Mode::Analog);
    }

    pub fn set_output(&self, high: bool) {
        self.driver().set_output(self.key(), high);
    }

    pub fn input(&self) -> bool {
        self.driver().input(self.key())
    }

    pub fn output(&self) -> bool {
        self.driver().output(self.key())
    }
}

/// Output pin
pub struct OutputPin<'a, D: GpioDriver> {
    pin: PinAllocation<'a, D>,
}

impl<'a, D: GpioDriver> OutputPin<'a, D> {
    /// Allocate `id` as a push-pull output.
    pub fn new(gpio: &'a GpioManager<'_, D>, id: PinId, pull: Pull) -> Result<Self, Error> {
        let pin = gpio.pin(id)?;
        pin.set_output_type(OutputType::PushPull);
        pin.set_pull(pull);
        pin.set_mode(Mode::Output);
        Ok(Self { pin })
    }

    /// Allocate `id` as an open-drain output.
    pub fn new_open_drain(
        gpio: &'a GpioManager<'_, D>,
        id: PinId,
        pull: Pull,
    ) -> Result<Self, Error> {
        let pin = gpio.pin(id)?;
        pin.set_output_type(OutputType::OpenDrain);
        pin.set_pull(pull);
        pin.set_mode(Mode::Output);
        Ok(Self { pin })
    }

    pub fn set(&mut self, high: bool) {
        self.pin.set_output(high);
    }

    pub fn allocation(&self) -> &PinAllocation<'a, D> {
        &self.pin
    }

    pub fn release(self) -> PinAllocation<'a, D> {
        self.pin
    }
}

impl<D: GpioDriver> embedded_hal::digital::ErrorType for OutputPin<'_, D> {
    type Error = Infallible;
}

impl<D: GpioDriver> embedded_hal::digital::OutputPin for OutputPin<'_, D> {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }
}

impl<D: GpioDriver> embedded_hal::digital::StatefulOutputPin for OutputPin<'_, D> {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pin.output())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pin.output())
    }
}

/// Input pin
pub struct InputPin<'a, D: GpioDriver> {
    pin: PinAllocation<'a, D>,
}

impl<'a, D: GpioDriver> InputPin<'a, D> {
    pub fn new(gpio: &'a GpioManager<'_, D>, id: PinId, pull: Pull) -> Result<Self, Error> {
        let pin = gpio.pin(id)?;
        pin.set_pull(pull);
        pin.set_mode(Mode::Input);
        Ok(Self { pin })
    }

    pub fn value(&self) -> bool {
        self.pin.input()
    }

    pub fn release(self) -> PinAllocation<'a, D> {
        self.pin
    }
}

impl<D: GpioDriver> embedded_hal::digital::ErrorType for InputPin<'_, D> {
    type Error = Infallible;
}

impl<D: GpioDriver> embedded_hal::digital::InputPin for InputPin<'_, D> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.value())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.value())
    }
}
