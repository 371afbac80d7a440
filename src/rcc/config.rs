use fugit::HertzU32;

/// HSISYS divider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    Div1 = 0,
    Div2 = 1,
    Div4 = 2,
    Div8 = 3,
    Div16 = 4,
    Div32 = 5,
    Div64 = 6,
    Div128 = 7,
}

impl Prescaler {
    pub fn divisor(self) -> u32 {
        1 << self as u32
    }
}

/// APB divider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApbPrescaler {
    Div1,
    Div2,
    Div4,
    Div8,
    Div16,
}

impl ApbPrescaler {
    pub fn divisor(self) -> u32 {
        match self {
            ApbPrescaler::Div1 => 1,
            ApbPrescaler::Div2 => 2,
            ApbPrescaler::Div4 => 4,
            ApbPrescaler::Div8 => 8,
            ApbPrescaler::Div16 => 16,
        }
    }
}

/// Board clock configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub hsisys_prescaler: Prescaler,
    pub apb_prescaler: ApbPrescaler,
    pub lsi_enabled: bool,
    /// SysTick interrupt rate
    pub systick_rate: HertzU32,
    /// Supply voltage in millivolts. Analog timing limits depend on it.
    pub vdd_mv: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hsisys_prescaler: Prescaler::Div1,
            apb_prescaler: ApbPrescaler::Div1,
            lsi_enabled: false,
            systick_rate: HertzU32::kHz(1),
            vdd_mv: 3300,
        }
    }
}

impl Config {
    pub fn hsisys_prescaler(mut self, prescaler: Prescaler) -> Self {
        self.hsisys_prescaler = prescaler;
        self
    }

    pub fn apb_prescaler(mut self, prescaler: ApbPrescaler) -> Self {
        self.apb_prescaler = prescaler;
        self
    }

    pub fn lsi_enabled(mut self, enabled: bool) -> Self {
        self.lsi_enabled = enabled;
        self
    }

    pub fn systick_rate(mut self, rate: HertzU32) -> Self {
        self.systick_rate = rate;
        self
    }

    pub fn vdd_mv(mut self, vdd_mv: u32) -> Self {
        self.vdd_mv = vdd_mv;
        self
    }
}
