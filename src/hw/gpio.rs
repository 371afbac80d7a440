use super::with_rcc;
use crate::gpio::{GpioDriver, Mode, OutputType, PinId, Port, Pull, Speed};
use crate::pac;
use crate::resource::GroupClock;

/// GPIO ports
#[derive(Debug, Default, Clone, Copy)]
pub struct Gpio;

/// Alternate function numbers
enum AltFunction {
    AF0,
    AF1,
    AF2,
    AF3,
    AF4,
    AF5,
    AF6,
    AF7,
}

impl AltFunction {
    fn from_number(af: u8) -> Option<Self> {
        Some(match af {
            0 => AltFunction::AF0,
            1 => AltFunction::AF1,
            2 => AltFunction::AF2,
            3 => AltFunction::AF3,
            4 => AltFunction::AF4,
            5 => AltFunction::AF5,
            6 => AltFunction::AF6,
            7 => AltFunction::AF7,
            _ => return None,
        })
    }
}

macro_rules! gpio_af {
    ($ENUM:ty) => {
        impl From<AltFunction> for $ENUM {
            fn from(af: AltFunction) -> Self {
                match af {
                    AltFunction::AF0 => <$ENUM>::Af0,
                    AltFunction::AF1 => <$ENUM>::Af1,
                    AltFunction::AF2 => <$ENUM>::Af2,
                    AltFunction::AF3 => <$ENUM>::Af3,
                    AltFunction::AF4 => <$ENUM>::Af4,
                    AltFunction::AF5 => <$ENUM>::Af5,
                    AltFunction::AF6 => <$ENUM>::Af6,
                    AltFunction::AF7 => <$ENUM>::Af7,
                }
            }
        }
    };
}

gpio_af!(pac::gpioa::afrl::AFSEL0);
gpio_af!(pac::gpioa::afrh::AFSEL8);
gpio_af!(pac::gpiob::afrl::AFSEL0);
gpio_af!(pac::gpiob::afrh::AFSEL8);

// Register access for one port layout, with the pin selected at runtime.
macro_rules! port_pins {
    ($block:ident, [$($i:literal: $afreg:ident,)+]) => {
    paste::paste! {
        mod $block {
            use super::AltFunction;
            use crate::gpio::{Mode, OutputType, Pull, Speed};
            use crate::pac::$block::RegisterBlock;

            pub(super) fn set_mode(rb: &RegisterBlock, pin: u8, mode: Mode) {
                match pin {
                    $(
                        $i => {
                            if let Mode::Alternate(af) = mode {
                                if let Some(af) = AltFunction::from_number(af) {
                                    rb.$afreg().modify(|_, w| w.[<afrel $i>]().variant(af.into()));
                                }
                            }
                            rb.moder().modify(|_, w| {
                                let moder = w.[<moder $i>]();
                                match mode {
                                    Mode::Input => moder.input(),
                                    Mode::Output => moder.output(),
                                    Mode::Alternate(_) => moder.alternate(),
                                    Mode::Analog => moder.analog(),
                                }
                            });
                        }
                    )+
                    _ => {}
                }
            }

            pub(super) fn set_pull(rb: &RegisterBlock, pin: u8, pull: Pull) {
                match pin {
                    $(
                        $i => {
                            rb.pupdr().modify(|_, w| {
                                let pupdr = w.[<pupdr $i>]();
                                match pull {
                                    Pull::None => pupdr.floating(),
                                    Pull::Up => pupdr.pull_up(),
                                    Pull::Down => pupdr.pull_down(),
                                }
                            });
                        }
                    )+
                    _ => {}
                }
            }

            pub(super) fn set_output_type(rb: &RegisterBlock, pin: u8, output_type: OutputType) {
                match pin {
                    $(
                        $i => {
                            rb.otyper().modify(|_, w| {
                                let ot = w.[<ot $i>]();
                                match output_type {
                                    OutputType::PushPull => ot.push_pull(),
                                    OutputType::OpenDrain => ot.open_drain(),
                                }
                            });
                        }
                    )+
                    _ => {}
                }
            }

            pub(super) fn set_speed(rb: &RegisterBlock, pin: u8, speed: Speed) {
                match pin {
                    $(
                        $i => {
                            rb.ospeedr().modify(|_, w| {
                                let ospeedr = w.[<ospeedr $i>]();
                                match speed {
                                    Speed::Low => ospeedr.low_speed(),
                                    Speed::Medium => ospeedr.medium_speed(),
                                    Speed::High => ospeedr.high_speed(),
                                    Speed::VeryHigh => ospeedr.very_high_speed(),
                                }
                            });
                        }
                    )+
                    _ => {}
                }
            }

            pub(super) fn set_output(rb: &RegisterBlock, pin: u8, high: bool) {
                match pin {
                    $(
                        $i => {
                            if high {
                                rb.bsrr().write(|w| w.[<bs $i>]().set_bit());
                            } else {
                                rb.bsrr().write(|w| w.[<br $i>]().set_bit());
                            }
                        }
                    )+
                    _ => {}
                }
            }

            pub(super) fn input(rb: &RegisterBlock, pin: u8) -> bool {
                match pin {
                    $($i => rb.idr().read().[<idr $i>]().is_high(),)+
                    _ => false,
                }
            }

            pub(super) fn output(rb: &RegisterBlock, pin: u8) -> bool {
                match pin {
                    $($i => rb.odr().read().[<odr $i>]().is_high(),)+
                    _ => false,
                }
            }
        }
    }
    };
}

port_pins!(gpioa, [
    0: afrl, 1: afrl, 2: afrl, 3: afrl, 4: afrl, 5: afrl, 6: afrl, 7: afrl,
    8: afrh, 9: afrh, 10: afrh, 11: afrh, 12: afrh, 13: afrh, 14: afrh, 15: afrh,
]);

port_pins!(gpiob, [
    0: afrl, 1: afrl, 2: afrl, 3: afrl, 4: afrl, 5: afrl, 6: afrl, 7: afrl,
    8: afrh, 9: afrh, 10: afrh, 11: afrh, 12: afrh, 13: afrh, 14: afrh, 15: afrh,
]);

#[allow(unsafe_code)]
fn port_a() -> &'static pac::gpioa::RegisterBlock {
    unsafe { &*pac::GPIOA::ptr() }
}

/// Ports B and up share the port B register layout.
#[allow(unsafe_code)]
fn port_b(port: Port) -> Option<&'static pac::gpiob::RegisterBlock> {
    let rb = match port {
        Port::B => pac::GPIOB::ptr(),
        Port::C => pac::GPIOC::ptr(),
        Port::D => pac::GPIOD::ptr(),
        #[cfg(feature = "stm32g0b1")]
        Port::E => pac::GPIOE::ptr(),
        Port::F => pac::GPIOF::ptr(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(unsafe { &*rb })
}

// Run one of the per-layout accessors on the port of `$pin`.
macro_rules! on_pin {
    ($pin:expr, $op:ident($($arg:expr),*)) => {{
        let pin: PinId = $pin;
        match pin.port() {
            Port::A => gpioa::$op(port_a(), pin.pin() $(, $arg)*),
            port => port_b(port)
                .map(|rb| gpiob::$op(rb, pin.pin() $(, $arg)*))
                .unwrap_or_default(),
        }
    }};
}

impl GroupClock for Gpio {
    fn set_group_clock(&self, group: usize, enabled: bool) {
        with_rcc(|rcc| {
            rcc.iopenr().modify(|_, w| match group {
                0 => w.gpioaen().bit(enabled),
                1 => w.gpioben().bit(enabled),
                2 => w.gpiocen().bit(enabled),
                3 => w.gpioden().bit(enabled),
                #[cfg(feature = "stm32g0b1")]
                4 => w.gpioeen().bit(enabled),
                5 => w.gpiofen().bit(enabled),
                _ => w,
            });
        });
    }
}

impl GpioDriver for Gpio {
    fn port_available(&self, port: Port) -> bool {
        port == Port::A || port_b(port).is_some()
    }

    fn set_mode(&self, pin: PinId, mode: Mode) {
        on_pin!(pin, set_mode(mode))
    }

    fn set_pull(&self, pin: PinId, pull: Pull) {
        on_pin!(pin, set_pull(pull))
    }

    fn set_output_type(&self, pin: PinId, output_type: OutputType) {
        on_pin!(pin, set_output_type(output_type))
    }

    fn set_speed(&self, pin: PinId, speed: Speed) {
        on_pin!(pin, set_speed(speed))
    }

    fn set_output(&self, pin: PinId, high: bool) {
        on_pin!(pin, set_output(high))
    }

    fn input(&self, pin: PinId) -> bool {
        on_pin!(pin, input())
    }

    fn output(&self, pin: PinId) -> bool {
        on_pin!(pin, output())
    }
}
