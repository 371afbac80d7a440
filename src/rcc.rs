pub mod config;

use self::config::Config;
#[cfg(any(feature = "stm32g071", feature = "stm32g0b1"))]
use self::config::{ApbPrescaler, Prescaler};

use fugit::HertzU32;

/// HSI frequency
pub const HSI_FREQ: HertzU32 = HertzU32::MHz(16);
/// LSI frequency
pub const LSI_FREQ: HertzU32 = HertzU32::kHz(32);

/// Bus frequencies derived from a [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clocks {
    pub sysclk: HertzU32,
    /// Core and SysTick clock
    pub ahb: HertzU32,
    /// Peripheral clock of the ADC, I2C and USART kernels
    pub pclk: HertzU32,
    /// Core clocks between SysTick interrupts
    pub systick_period: u32,
    pub vdd_mv: u32,
}

impl Clocks {
    pub fn from_config(config: &Config) -> Self {
        // HSI is a default clock source, AHB runs undivided.
        let sysclk = HSI_FREQ / config.hsisys_prescaler.divisor();
        let ahb = sysclk;
        let pclk = ahb / config.apb_prescaler.divisor();
        let systick_period = ahb.raw() / config.systick_rate.raw().max(1);

        Self {
            sysclk,
            ahb,
            pclk,
            systick_period,
            vdd_mv: config.vdd_mv,
        }
    }
}

impl Default for Clocks {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Extension trait for RCC
#[cfg(any(feature = "stm32g071", feature = "stm32g0b1"))]
pub trait RccExt {
    /// Constrain the peripheral and configure clocks.
    fn constrain(self, config: Config) -> Rcc;
}

#[cfg(any(feature = "stm32g071", feature = "stm32g0b1"))]
impl RccExt for crate::pac::RCC {
    fn constrain(self, config: Config) -> Rcc {
        let clocks = Clocks::from_config(&config);

        // Set HSI prescaler.
        self.cr().modify(|_, w| {
            let hsidiv = w.hsidiv();
            match config.hsisys_prescaler {
                Prescaler::Div1 => hsidiv.div1(),
                Prescaler::Div2 => hsidiv.div2(),
                Prescaler::Div4 => hsidiv.div4(),
                Prescaler::Div8 => hsidiv.div8(),
                Prescaler::Div16 => hsidiv.div16(),
                Prescaler::Div32 => hsidiv.div32(),
                Prescaler::Div64 => hsidiv.div64(),
                Prescaler::Div128 => hsidiv.div128(),
            }
        });
        // Set APB prescaler.
        self.cfgr().modify(|_, w| {
            let ppre = w.ppre();
            match config.apb_prescaler {
                ApbPrescaler::Div1 => ppre.div1(),
                ApbPrescaler::Div2 => ppre.div2(),
                ApbPrescaler::Div4 => ppre.div4(),
                ApbPrescaler::Div8 => ppre.div8(),
                ApbPrescaler::Div16 => ppre.div16(),
            }
        });

        if config.lsi_enabled {
            // Enable LSI and wait for it to be ready.
            self.csr().modify(|_, w| w.lsion().set_bit());
            while self.csr().read().lsirdy().bit_is_clear() {}
        }

        Rcc {
            _rcc: self,
            clocks,
        }
    }
}

/// Constrained RCC peripheral
#[cfg(any(feature = "stm32g071", feature = "stm32g0b1"))]
#[derive(Debug)]
pub struct Rcc {
    _rcc: crate::pac::RCC,
    clocks: Clocks,
}

#[cfg(any(feature = "stm32g071", feature = "stm32g0b1"))]
impl Rcc {
    pub fn clocks(&self) -> &Clocks {
        &self.clocks
    }

    /// Get system clock frequency.
    pub fn sysclk(&self) -> HertzU32 {
        self.clocks.sysclk
    }
}
