//! 64-bit time base built on SysTick reload interrupts.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::SYST;
use cortex_m::peripheral::syst::SystClkSource;
use embedded_hal::delay::DelayNs;

use crate::rcc::Clocks;

/// Count of SysTick reloads, split into two 32-bit halves.
///
/// Only the SysTick handler calls [`on_reload`](Self::on_reload). Readers use
/// [`reloads`](Self::reloads) from any context.
pub struct TickCounter {
    high: AtomicU32,
    low: AtomicU32,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            high: AtomicU32::new(0),
            low: AtomicU32::new(0),
        }
    }

    /// SysTick exception body.
    pub fn on_reload(&self) {
        // High half is written before the low half.
        let low = self.low.load(Ordering::Relaxed);
        if low == u32::MAX {
            let high = self.high.load(Ordering::Relaxed);
            self.high.store(high.wrapping_add(1), Ordering::Release);
            self.low.store(0, Ordering::Release);
        } else {
            self.low.store(low + 1, Ordering::Release);
        }
    }

    pub fn reloads(&self) -> u64 {
        self.read_with(|| {})
    }

    /// Read high, then low, then high again until both high reads agree.
    /// `between` runs after the first high read.
    fn read_with(&self, mut between: impl FnMut()) -> u64 {
        loop {
            let high = self.high.load(Ordering::Acquire);
            between();
            let low = self.low.load(Ordering::Acquire);
            if self.high.load(Ordering::Acquire) == high {
                return (u64::from(high) << 32) | u64::from(low);
            }
        }
    }

    #[cfg(test)]
    fn preset(reloads: u64) -> Self {
        Self {
            high: AtomicU32::new((reloads >> 32) as u32),
            low: AtomicU32::new(reloads as u32),
        }
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The down-counting SysTick hardware.
pub trait SysTickSource {
    /// Current counter value, counting down from `period - 1`.
    fn current_value(&mut self) -> u32;
    /// Whether the counter reached zero since the last call. Reading clears it.
    fn take_count_flag(&mut self) -> bool;
}

impl SysTickSource for SYST {
    fn current_value(&mut self) -> u32 {
        SYST::get_current()
    }

    fn take_count_flag(&mut self) -> bool {
        self.has_wrapped()
    }
}

/// Monotonic clock and delay provider.
pub struct SysTick<'t, S> {
    source: S,
    counter: &'t TickCounter,
    period: u32,
    ahb_hz: u32,
}

impl<'t> SysTick<'t, SYST> {
    /// Program SysTick for `clocks.systick_period` core clocks per reload and
    /// enable its interrupt. The exception handler must call
    /// [`TickCounter::on_reload`] on `counter`.
    pub fn start(mut syst: SYST, counter: &'t TickCounter, clocks: &Clocks) -> Self {
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(clocks.systick_period.saturating_sub(1));
        syst.clear_current();
        syst.enable_counter();
        syst.enable_interrupt();
        Self::new(syst, counter, clocks)
    }
}

impl<'t, S: SysTickSource> SysTick<'t, S> {
    pub fn new(source: S, counter: &'t TickCounter, clocks: &Clocks) -> Self {
        Self {
            source,
            counter,
            period: clocks.systick_period,
            ahb_hz: clocks.ahb.raw(),
        }
    }

    /// Core clocks since start.
    pub fn now_clocks(&mut self) -> u64 {
        self.source.take_count_flag();
        loop {
            let reloads = self.counter.reloads();
            let value = self.source.current_value();

            // A reload in between makes the pair inconsistent.
            if !self.source.take_count_flag() {
                let period = u64::from(self.period);
                return reloads * period + (period - u64::from(value));
            }
        }
    }

    pub fn now_millis(&mut self) -> u64 {
        self.now_clocks() * 1_000 / u64::from(self.ahb_hz)
    }

    pub fn now_micros(&mut self) -> u64 {
        self.now_clocks() * 1_000_000 / u64::from(self.ahb_hz)
    }

    pub fn free(self) -> S {
        self.source
    }
}

impl<S: SysTickSource> DelayNs for SysTick<'_, S> {
    fn delay_ns(&mut self, ns: u32) {
        let clocks = (u64::from(ns) * u64::from(self.ahb_hz)).div_ceil(1_000_000_000);
        let end = self.now_clocks() + clocks;
        while self.now_clocks() < end {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::rcc::config::Config;
    use fugit::HertzU32;

    /// Counter hardware advancing `step` clocks per access and running the
    /// exception handler on every reload.
    struct FakeSysTick<'a> {
        counter: &'a TickCounter,
        period: u32,
        value: u32,
        step: u32,
        count_flag: bool,
    }

    impl<'a> FakeSysTick<'a> {
        fn new(counter: &'a TickCounter, period: u32, step: u32) -> Self {
            Self {
                counter,
                period,
                value: period - 1,
                step,
                count_flag: false,
            }
        }

        fn advance(&mut self) {
            let mut step = self.step;
            while step > self.value {
                step -= self.value + 1;
                self.value = self.period - 1;
                self.count_flag = true;
                self.counter.on_reload();
            }
            self.value -= step;
        }
    }

    impl SysTickSource for FakeSysTick<'_> {
        fn current_value(&mut self) -> u32 {
            self.advance();
            self.value
        }

        fn take_count_flag(&mut self) -> bool {
            self.advance();
            core::mem::replace(&mut self.count_flag, false)
        }
    }

    fn clocks(period: u32) -> Clocks {
        let config = Config::default().systick_rate(HertzU32::Hz(16_000_000 / period));
        Clocks::from_config(&config)
    }

    #[test]
    fn test_reload_carry() {
        let counter = TickCounter::preset(u64::from(u32::MAX) - 1);

        counter.on_reload();
        assert_eq!(counter.reloads(), u64::from(u32::MAX));
        counter.on_reload();
        assert_eq!(counter.reloads(), 1 << 32);
        counter.on_reload();
        assert_eq!(counter.reloads(), (1 << 32) + 1);
    }

    #[test]
    fn test_reload_between_halves() {
        let counter = TickCounter::preset(u64::from(u32::MAX));
        let mut fired = false;

        // The carry lands between the high and low reads of the first attempt.
        let value = counter.read_with(|| {
            if !fired {
                fired = true;
                counter.on_reload();
            }
        });
        assert_eq!(value, 1 << 32);
    }

    #[test]
    fn test_monotonic_while_ticking() {
        let counter = TickCounter::preset(u64::from(u32::MAX) - 3);
        let start = counter.reloads();
        let fake = FakeSysTick::new(&counter, 1000, 377);
        let mut systick = SysTick::new(fake, &counter, &clocks(1000));

        let mut last = systick.now_clocks();
        for _ in 0..200 {
            let now = systick.now_clocks();
            assert!(now >= last, "time went backwards: {now} < {last}");
            last = now;
        }
        assert!(counter.reloads() > start + 4);
        assert!(last >= (1 << 32) * 1000);
    }

    #[test]
    fn test_time_units() {
        let counter = TickCounter::new();
        let fake = FakeSysTick::new(&counter, 16_000, 0);
        let mut systick = SysTick::new(fake, &counter, &clocks(16_000));

        for _ in 0..5 {
            counter.on_reload();
        }
        // Five full periods plus one clock into the sixth.
        assert_eq!(systick.now_clocks(), 5 * 16_000 + 1);
        assert_eq!(systick.now_millis(), 5);
        assert_eq!(systick.now_micros(), 5_000);
    }

    #[test]
    fn test_delay() {
        let counter = TickCounter::new();
        let fake = FakeSysTick::new(&counter, 16_000, 1_000);
        let mut systick = SysTick::new(fake, &counter, &clocks(16_000));

        let start = systick.now_clocks();
        systick.delay_us(100);
        assert!(systick.now_clocks() - start >= 1_600);
    }
}
