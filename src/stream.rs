//! Buffered byte streams between interrupt handlers and the foreground loop.
mod input;
mod output;

pub use input::{BufferedInputStream, Inject, InputHooks, MAX_NUMBER_LEN};
pub use output::{BlockWriter, BufferedOutputStream, UnbufferedOutputStream};

/// Sleep until the next interrupt.
///
/// Off target this is a spin hint, so the blocking stream calls still work in
/// host tests with a producer thread.
pub fn wait_for_interrupt() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::asm::wfi();

    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    core::hint::spin_loop();
}
