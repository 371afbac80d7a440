use super::with_rcc;
use crate::gpio::{PA0, PA1, PA2, PA3, PA9, PA10, PA14, PA15, PB6, PB7, PB10, PB11, PC4, PC5, PC10, PC11, PinId, PinOption};
use crate::pac;
use crate::resource::GroupClock;
use crate::usart::{Parity, StopBits, UsartConfig, UsartDriver, UsartId};

const fn af(pin: PinId, af: u8) -> PinOption {
    PinOption { pin, af }
}

const USART1_TX: &[PinOption] = &[af(PA9, 1), af(PB6, 0), af(PC4, 1)];
const USART1_RX: &[PinOption] = &[af(PA10, 1), af(PB7, 0), af(PC5, 1)];
const USART2_TX: &[PinOption] = &[af(PA2, 1), af(PA14, 1)];
const USART2_RX: &[PinOption] = &[af(PA3, 1), af(PA15, 1)];
const USART3_TX: &[PinOption] = &[af(PB10, 4), af(PC10, 0)];
const USART3_RX: &[PinOption] = &[af(PB11, 4), af(PC11, 0)];
const USART4_TX: &[PinOption] = &[af(PA0, 4), af(PC10, 1)];
const USART4_RX: &[PinOption] = &[af(PA1, 4), af(PC11, 1)];

/// USART instances, clocked from PCLK.
#[derive(Debug, Default, Clone, Copy)]
pub struct Usart;

/// All instances share the USART1 register layout.
#[allow(unsafe_code)]
fn regs(usart: UsartId) -> &'static pac::usart1::RegisterBlock {
    let rb = match usart {
        UsartId::Usart1 => pac::USART1::ptr(),
        UsartId::Usart2 => pac::USART2::ptr(),
        UsartId::Usart3 => pac::USART3::ptr(),
        UsartId::Usart4 => pac::USART4::ptr(),
    };
    unsafe { &*rb }
}

impl GroupClock for Usart {
    fn set_group_clock(&self, group: usize, enabled: bool) {
        with_rcc(|rcc| match group {
            0 => {
                rcc.apbenr2().modify(|_, w| w.usart1en().bit(enabled));
            }
            1 => {
                rcc.apbenr1().modify(|_, w| w.usart2en().bit(enabled));
            }
            2 => {
                rcc.apbenr1().modify(|_, w| w.usart3en().bit(enabled));
            }
            3 => {
                rcc.apbenr1().modify(|_, w| w.usart4en().bit(enabled));
            }
            _ => {}
        });
    }
}

impl UsartDriver for Usart {
    fn tx_options(&self, usart: UsartId) -> &'static [PinOption] {
        match usart {
            UsartId::Usart1 => USART1_TX,
            UsartId::Usart2 => USART2_TX,
            UsartId::Usart3 => USART3_TX,
            UsartId::Usart4 => USART4_TX,
        }
    }

    fn rx_options(&self, usart: UsartId) -> &'static [PinOption] {
        match usart {
            UsartId::Usart1 => USART1_RX,
            UsartId::Usart2 => USART2_RX,
            UsartId::Usart3 => USART3_RX,
            UsartId::Usart4 => USART4_RX,
        }
    }

    #[allow(unsafe_code)]
    fn enable(&self, usart: UsartId, brr: u16, config: &UsartConfig) {
        let rb = regs(usart);
        rb.cr1().reset();

        rb.cr2().modify(|_, w| match config.stop_bits {
            StopBits::One => w.stop().stop1(),
            StopBits::Two => w.stop().stop2(),
        });
        rb.brr().write(|w| unsafe { w.brr().bits(brr) });
        rb.cr1().write(|w| {
            // M1:M0 selects 7, 8 or 9 bit frames.
            match config.word_length() {
                7 => w.m1().set_bit().m0().clear_bit(),
                9 => w.m1().clear_bit().m0().set_bit(),
                _ => w.m1().clear_bit().m0().clear_bit(),
            };
            match config.parity {
                Parity::None => w.pce().clear_bit(),
                Parity::Even => w.pce().set_bit().ps().clear_bit(),
                Parity::Odd => w.pce().set_bit().ps().set_bit(),
            };
            w.re().set_bit().te().set_bit().rxneie().set_bit()
        });
        rb.cr1().modify(|_, w| w.ue().set_bit());
    }

    fn disable(&self, usart: UsartId) {
        regs(usart).cr1().reset();
    }

    fn tx_ready(&self, usart: UsartId) -> bool {
        regs(usart).isr().read().txe().bit_is_set()
    }

    fn tx_complete(&self, usart: UsartId) -> bool {
        regs(usart).isr().read().tc().bit_is_set()
    }

    #[allow(unsafe_code)]
    fn write_byte(&self, usart: UsartId, byte: u8) {
        regs(usart).tdr().write(|w| unsafe { w.tdr().bits(u16::from(byte)) });
    }

    fn read_byte(&self, usart: UsartId) -> Option<u8> {
        let rb = regs(usart);
        let isr = rb.isr().read();
        if isr.ore().bit_is_set() || isr.fe().bit_is_set() || isr.ne().bit_is_set() || isr.pe().bit_is_set() {
            rb.icr()
                .write(|w| w.orecf().set_bit().fecf().set_bit().necf().set_bit().pecf().set_bit());
        }
        if isr.rxne().bit_is_set() {
            Some(rb.rdr().read().rdr().bits() as u8)
        } else {
            None
        }
    }
}
