//! USB device classes.
//!
//! The classes run on any [`usb_device::bus::UsbBus`] implementation and are
//! polled through [`usb_device::device::UsbDevice::poll`].
mod serial;

pub use serial::{CdcReceiver, CdcWriter, LineCoding, PACKET_SIZE, UsbSerial};

/// Testing VID/PID pair from pid.codes. Replace before shipping devices.
pub const TEST_VID_PID: usb_device::device::UsbVidPid = usb_device::device::UsbVidPid(0x1209, 0x0001);
