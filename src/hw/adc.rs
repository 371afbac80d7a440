use super::with_rcc;
use crate::adc::{AdcDriver, AdcId, ChannelKind, SamplingTime};
use crate::gpio::{PA0, PA1, PA2, PA3, PA4, PA5, PA6, PA7, PB0, PB1, PB2, PB10, PB11, PB12, PC4, PC5};
use crate::pac;
use crate::resource::GroupClock;

/// Regulator startup time in core clocks at the highest SYSCLK
const REGULATOR_STARTUP_CYCLES: u32 = 64 * 20;

/// ADC kernel clock modes in CFGR2.CKMODE for the dividers
const CKMODE: [u8; 3] = [0b11, 0b01, 0b10];

/// The ADC, clocked synchronously from PCLK.
#[derive(Debug, Default, Clone, Copy)]
pub struct Adc;

#[allow(unsafe_code)]
fn regs() -> &'static pac::adc::RegisterBlock {
    unsafe { &*pac::ADC::ptr() }
}

impl GroupClock for Adc {
    fn set_group_clock(&self, _group: usize, enabled: bool) {
        with_rcc(|rcc| {
            rcc.apbenr2().modify(|_, w| w.adcen().bit(enabled));
        });
    }
}

impl AdcDriver for Adc {
    const DIVIDERS: &'static [u32] = &[1, 2, 4];
    const SAMPLING_TIMES: &'static [SamplingTime] = &[
        SamplingTime { half_cycles: 3, setting: 0 },
        SamplingTime { half_cycles: 7, setting: 1 },
        SamplingTime { half_cycles: 15, setting: 2 },
        SamplingTime { half_cycles: 25, setting: 3 },
        SamplingTime { half_cycles: 39, setting: 4 },
        SamplingTime { half_cycles: 79, setting: 5 },
        SamplingTime { half_cycles: 159, setting: 6 },
        SamplingTime { half_cycles: 321, setting: 7 },
    ];

    fn channel_kind(&self, _adc: AdcId, channel: u8) -> ChannelKind {
        let pin = match channel {
            0 => PA0,
            1 => PA1,
            2 => PA2,
            3 => PA3,
            4 => PA4,
            5 => PA5,
            6 => PA6,
            7 => PA7,
            8 => PB0,
            9 => PB1,
            10 => PB2,
            11 => PB10,
            12 => return ChannelKind::Temperature,
            13 => return ChannelKind::Vrefint,
            14 => return ChannelKind::Vbat,
            15 => PB11,
            16 => PB12,
            17 => PC4,
            18 => PC5,
            _ => return ChannelKind::NotConnected,
        };
        ChannelKind::Gpio(pin)
    }

    #[allow(unsafe_code)]
    fn set_clock_divider(&self, _adc: AdcId, index: usize) {
        if let Some(&mode) = CKMODE.get(index) {
            regs().cfgr2().modify(|_, w| unsafe { w.ckmode().bits(mode) });
        }
    }

    #[allow(unsafe_code)]
    fn power_up(&self, _adc: AdcId) {
        let rb = regs();
        rb.cr().modify(|_, w| w.advregen().set_bit());
        cortex_m::asm::delay(REGULATOR_STARTUP_CYCLES);

        rb.cr().modify(|_, w| w.adcal().set_bit());
        while rb.cr().read().adcal().bit_is_set() {}

        rb.isr().write(|w| w.adrdy().set_bit());
        rb.cr().modify(|_, w| w.aden().set_bit());
        while rb.isr().read().adrdy().bit_is_clear() {}

        rb.smpr().modify(|_, w| unsafe { w.smp1().bits(0) });
    }

    fn power_down(&self, _adc: AdcId) {
        let rb = regs();
        if rb.cr().read().aden().bit_is_set() {
            rb.cr().modify(|_, w| w.addis().set_bit());
            while rb.cr().read().aden().bit_is_set() {}
        }
        rb.cr().modify(|_, w| w.advregen().clear_bit());
    }

    // A single conversion uses one channel, so the shared SMP1 setting is
    // enough. SMPSEL stays at zero for every channel.
    #[allow(unsafe_code)]
    fn set_sampling_time(&self, _adc: AdcId, _channel: u8, setting: u8) {
        regs().smpr().modify(|_, w| unsafe { w.smp1().bits(setting) });
    }

    fn set_internal_sources(&self, _adc: AdcId, vref_temperature: bool, vbat: bool) {
        regs().ccr().modify(|_, w| {
            w.vrefen()
                .bit(vref_temperature)
                .tsen()
                .bit(vref_temperature)
                .vbaten()
                .bit(vbat)
        });
    }

    #[allow(unsafe_code)]
    fn start_conversion(&self, _adc: AdcId, channel: u8) {
        let rb = regs();
        rb.isr().write(|w| w.ccrdy().set_bit());
        rb.chselr().write(|w| unsafe { w.chsel().bits(1 << channel) });
        while rb.isr().read().ccrdy().bit_is_clear() {}
        rb.cr().modify(|_, w| w.adstart().set_bit());
    }

    fn conversion_done(&self, _adc: AdcId) -> bool {
        regs().isr().read().eoc().bit_is_set()
    }

    fn read_result(&self, _adc: AdcId) -> u16 {
        regs().dr().read().data().bits()
    }
}
