//! Single conversion ADC access.
use core::cell::Cell;

use embedded_hal::delay::DelayNs;
use fugit::HertzU32;

use crate::diag::{Diagnostics, Error, trace};
use crate::gpio::{GpioDriver, GpioManager, PinAllocation, PinId};
use crate::rcc::Clocks;
use crate::resource::{GroupClock, ResourceHandle, ResourceRegistry, unit_resource};

unit_resource! {
    /// ADC instance
    AdcId { Adc1 = 0 }
}

pub const NUM_ADCS: usize = AdcId::COUNT;

/// Full scale of a 12-bit conversion
pub const FULL_SCALE: u16 = 4096;

/// Internal channel settling time after enabling its source
const INTERNAL_STARTUP_US: u32 = 10;
/// Sampling time of internal channels
const INTERNAL_SAMPLING_NS: u32 = 10_000;

/// What an ADC input channel is connected to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelKind {
    Gpio(PinId),
    Temperature,
    Vrefint,
    Vbat,
    NotConnected,
}

/// One selectable sampling time.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SamplingTime {
    /// Duration in half ADC clock cycles
    pub half_cycles: u32,
    /// Hardware encoding
    pub setting: u8,
}

/// Internal sources that can be powered together.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Internal {
    Off,
    VrefTemperature,
    Vbat,
}

/// Register access for ADC instances.
///
/// The group clock callback gates the ADC kernel clock.
pub trait AdcDriver: GroupClock {
    /// Clock dividers from the peripheral clock, in order of preference.
    const DIVIDERS: &'static [u32];
    /// Sampling times, shortest first.
    const SAMPLING_TIMES: &'static [SamplingTime];

    fn channel_kind(&self, adc: AdcId, channel: u8) -> ChannelKind;
    /// Select `DIVIDERS[index]`.
    fn set_clock_divider(&self, adc: AdcId, index: usize);
    /// Calibrate and enable for software triggered single conversions with the
    /// shortest sampling time.
    fn power_up(&self, adc: AdcId);
    fn power_down(&self, adc: AdcId);
    fn set_sampling_time(&self, adc: AdcId, channel: u8, setting: u8);
    /// Power the Vrefint and temperature sensor pair and the Vbat divider.
    fn set_internal_sources(&self, adc: AdcId, vref_temperature: bool, vbat: bool);
    fn start_conversion(&self, adc: AdcId, channel: u8);
    fn conversion_done(&self, adc: AdcId) -> bool;
    fn read_result(&self, adc: AdcId) -> u16;
}

/// Highest ADC clock allowed at the given supply voltage.
pub fn max_adc_clock(vdd_mv: u32) -> HertzU32 {
    if vdd_mv > 2400 {
        HertzU32::MHz(36)
    } else {
        HertzU32::MHz(18)
    }
}

/// Pick the first divider that keeps the ADC clock within limits.
pub fn select_divider(pclk: HertzU32, vdd_mv: u32, dividers: &[u32]) -> Option<(usize, HertzU32)> {
    let max = max_adc_clock(vdd_mv);
    dividers
        .iter()
        .position(|&div| pclk / div <= max)
        .map(|index| (index, pclk / dividers[index]))
}

/// Pick the shortest sampling time covering `ns`, or the longest one.
pub fn select_sampling_time(options: &[SamplingTime], adc_clock: HertzU32, ns: u32) -> Option<SamplingTime> {
    // half_cycles / (2 * f) >= ns / 1e9
    let required = u64::from(ns) * 2 * u64::from(adc_clock.raw());
    options
        .iter()
        .find(|option| u64::from(option.half_cycles) * 1_000_000_000 >= required)
        .or(options.last())
        .copied()
}

/// ADC allocation and clock selection.
pub struct AdcManager<'d, D> {
    registry: ResourceRegistry<'d, AdcId, D, NUM_ADCS>,
    divider: usize,
    adc_clock: HertzU32,
}

impl<'d, D: AdcDriver> AdcManager<'d, D> {
    /// Fails if no divider brings the peripheral clock within the ADC limits.
    pub fn new(driver: D, clocks: &Clocks, diag: &'d Diagnostics) -> Result<Self, Error> {
        let Some((divider, adc_clock)) = select_divider(clocks.pclk, clocks.vdd_mv, D::DIVIDERS)
        else {
            diag.error(format_args!("No valid ADC divider found for {} Hz", clocks.pclk.raw()));
            return Err(Error::UnsupportedConfig);
        };
        trace!("ADC clock {} Hz", adc_clock.raw());

        Ok(Self {
            registry: ResourceRegistry::new("ADC", driver, diag),
            divider,
            adc_clock,
        })
    }

    pub fn adc_clock(&self) -> HertzU32 {
        self.adc_clock
    }

    pub fn registry(&self) -> &ResourceRegistry<'d, AdcId, D, NUM_ADCS> {
        &self.registry
    }
}

/// ADC doing one software triggered conversion at a time.
pub struct SingleConversionAdc<'a, D: AdcDriver> {
    handle: ResourceHandle<'a, AdcId, D, NUM_ADCS>,
    adc_clock: HertzU32,
    internal: Cell<Internal>,
}

impl<'a, D: AdcDriver> SingleConversionAdc<'a, D> {
    pub fn new(manager: &'a AdcManager<'_, D>, id: AdcId) -> Result<Self, Error> {
        let handle = manager.registry.allocate(id)?;
        let driver = handle.registry().control();
        driver.set_clock_divider(id, manager.divider);
        driver.power_up(id);

        Ok(Self {
            handle,
            adc_clock: manager.adc_clock,
            internal: Cell::new(Internal::Off),
        })
    }

    fn driver(&self) -> &D {
        self.handle.registry().control()
    }

    fn diag(&self) -> &Diagnostics {
        self.handle.registry().diagnostics()
    }

    pub fn id(&self) -> AdcId {
        self.handle.key()
    }

    /// Sample a GPIO connected channel. The pin is held in analog mode until
    /// the sampler is dropped.
    pub fn gpio_input<'s, G: GpioDriver>(
        &'s self,
        gpio: &'s GpioManager<'_, G>,
        channel: u8,
    ) -> Result<ChannelSampler<'s, D, PinAllocation<'s, G>>, Error> {
        let ChannelKind::Gpio(pin_id) = self.driver().channel_kind(self.id(), channel) else {
            self.diag().error(format_args!(
                "{:?} channel {} is not a GPIO input",
                self.id(),
                channel
            ));
            return Err(Error::InvalidPin);
        };

        let pin = gpio.pin(pin_id)?;
        pin.set_analog();
        Ok(ChannelSampler {
            adc: self,
            channel,
            _pin: Some(pin),
        })
    }

    /// Sample the temperature sensor, Vrefint or Vbat.
    ///
    /// Vbat cannot be sampled while Vrefint and the temperature sensor are
    /// powered and vice versa. Switching between them waits for the sources to
    /// settle.
    pub fn internal_input<'s>(
        &'s self,
        channel: u8,
        delay: &mut impl DelayNs,
    ) -> Result<ChannelSampler<'s, D, ()>, Error> {
        let wanted = match self.driver().channel_kind(self.id(), channel) {
            ChannelKind::Temperature | ChannelKind::Vrefint => Internal::VrefTemperature,
            ChannelKind::Vbat => Internal::Vbat,
            _ => {
                self.diag().error(format_args!(
                    "{:?} channel {} is not an internal input",
                    self.id(),
                    channel
                ));
                return Err(Error::InvalidPin);
            }
        };

        if self.internal.get() != wanted {
            self.driver().set_internal_sources(
                self.id(),
                wanted == Internal::VrefTemperature,
                wanted == Internal::Vbat,
            );
            self.internal.set(wanted);
            delay.delay_us(INTERNAL_STARTUP_US);
        }

        let sampler = ChannelSampler {
            adc: self,
            channel,
            _pin: None,
        };
        sampler.set_sampling_time(INTERNAL_SAMPLING_NS);
        Ok(sampler)
    }

    fn set_sampling_time(&self, channel: u8, ns: u32) {
        if let Some(option) = select_sampling_time(D::SAMPLING_TIMES, self.adc_clock, ns) {
            self.driver().set_sampling_time(self.id(), channel, option.setting);
        }
    }

    fn read_channel(&self, channel: u8) -> u16 {
        let driver = self.driver();
        driver.start_conversion(self.id(), channel);
        while !driver.conversion_done(self.id()) {
            core::hint::spin_loop();
        }
        driver.read_result(self.id())
    }
}

impl<D: AdcDriver> Drop for SingleConversionAdc<'_, D> {
    fn drop(&mut self) {
        if self.internal.get() != Internal::Off {
            self.driver().set_internal_sources(self.id(), false, false);
        }
        self.driver().power_down(self.id());
    }
}

/// Conversions of one channel. `P` holds the input pin, if there is one.
pub struct ChannelSampler<'s, D: AdcDriver, P> {
    adc: &'s SingleConversionAdc<'s, D>,
    channel: u8,
    _pin: Option<P>,
}

impl<D: AdcDriver, P> ChannelSampler<'_, D, P> {
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Set the shortest sampling time of at least `ns`.
    pub fn set_sampling_time(&self, ns: u32) {
        self.adc.set_sampling_time(self.channel, ns);
    }

    /// Raw 12-bit conversion.
    pub fn read_u16(&self) -> u16 {
        self.adc.read_channel(self.channel)
    }

    /// Conversion scaled to `0.0..1.0`.
    pub fn read_normalized(&self) -> f32 {
        f32::from(self.read_u16()) / f32::from(FULL_SCALE)
    }
}
