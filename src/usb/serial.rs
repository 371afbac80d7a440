use core::cell::Cell;
use core::convert::Infallible;
use core::fmt;

use usb_device::class_prelude::*;
use usb_device::control::{Recipient, Request, RequestType};

use crate::diag::trace;
use crate::stream::{BlockWriter, BufferedInputStream, BufferedOutputStream, Inject, InputHooks};

/// Full speed bulk packet size
pub const PACKET_SIZE: usize = 64;

const USB_CLASS_CDC: u8 = 0x02;
const USB_CLASS_CDC_DATA: u8 = 0x0a;
const CDC_SUBCLASS_ACM: u8 = 0x02;
const CDC_PROTOCOL_NONE: u8 = 0x00;

const CS_INTERFACE: u8 = 0x24;
const CDC_TYPE_HEADER: u8 = 0x00;
const CDC_TYPE_CALL_MANAGEMENT: u8 = 0x01;
const CDC_TYPE_ACM: u8 = 0x02;
const CDC_TYPE_UNION: u8 = 0x06;

const REQ_SET_LINE_CODING: u8 = 0x20;
const REQ_GET_LINE_CODING: u8 = 0x21;
const REQ_SET_CONTROL_LINE_STATE: u8 = 0x22;
const REQ_SEND_BREAK: u8 = 0x23;

/// Line coding requested by the host. It has no effect on the USB link.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineCoding {
    pub baud_rate: u32,
    /// 0: 1 stop bit, 1: 1.5 stop bits, 2: 2 stop bits
    pub stop_bits: u8,
    /// 0: none, 1: odd, 2: even, 3: mark, 4: space
    pub parity: u8,
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    fn from_bytes(data: &[u8]) -> Option<Self> {
        let bytes: &[u8; 7] = data.get(..7)?.try_into().ok()?;
        Some(Self {
            baud_rate: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            stop_bits: bytes[4],
            parity: bytes[5],
            data_bits: bytes[6],
        })
    }

    fn to_bytes(self) -> [u8; 7] {
        let baud = self.baud_rate.to_le_bytes();
        [
            baud[0],
            baud[1],
            baud[2],
            baud[3],
            self.stop_bits,
            self.parity,
            self.data_bits,
        ]
    }
}

/// Receive hooks owning the bulk OUT endpoint.
///
/// A packet is only taken from the endpoint when the receive buffer can hold
/// all of it. Until then the endpoint keeps NAKing the host, and the packet is
/// picked up once the consumer has made room.
pub struct CdcReceiver<'a, B: UsbBus> {
    ep: EndpointOut<'a, B>,
    deferred: Cell<bool>,
}

impl<B: UsbBus> CdcReceiver<'_, B> {
    fn receive(&self, rx: &dyn Inject) {
        if rx.receive_buffer_space() < PACKET_SIZE {
            if !self.deferred.replace(true) {
                trace!("cdc: receive buffer full, deferring");
            }
            return;
        }

        let mut packet = [0; PACKET_SIZE];
        if let Ok(len) = self.ep.read(&mut packet) {
            rx.add_data_to_buffer(&packet[..len]);
        }
        self.deferred.set(false);
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.get()
    }
}

impl<B: UsbBus> InputHooks for CdcReceiver<'_, B> {
    fn input_data(&self, _requested: usize, rx: &dyn Inject) {
        self.receive(rx);
    }

    fn input_data_read(&self, rx: &dyn Inject) {
        if self.deferred.get() {
            self.receive(rx);
        }
    }

    // The endpoint is polled directly, no interrupt is needed to make progress.
    fn wait_for_input(&self) {
        core::hint::spin_loop();
    }
}

/// Transmit side owning the bulk IN endpoint.
pub struct CdcWriter<'a, B: UsbBus> {
    ep: EndpointIn<'a, B>,
    open: bool,
}

impl<B: UsbBus> CdcWriter<'_, B> {
    /// Wait for the endpoint and send one packet.
    fn send_packet(&self, packet: &[u8]) -> usb_device::Result<()> {
        loop {
            match self.ep.write(packet) {
                Ok(_) => return Ok(()),
                Err(UsbError::WouldBlock) => core::hint::spin_loop(),
                Err(e) => return Err(e),
            }
        }
    }
}

impl<B: UsbBus> BlockWriter for CdcWriter<'_, B> {
    /// Split `data` into packets, waiting for the endpoint between them.
    /// Output is dropped while no host application has the port open.
    fn write_block(&mut self, data: &[u8]) {
        if !self.open || data.is_empty() {
            return;
        }
        for packet in data.chunks(PACKET_SIZE) {
            if self.send_packet(packet).is_err() {
                return;
            }
        }
        // A full last packet does not end the transfer on the host side.
        if data.len() % PACKET_SIZE == 0 {
            let _ = self.send_packet(&[]);
        }
    }

    fn optimal_write_block_size(&self) -> usize {
        PACKET_SIZE
    }
}

/// CDC-ACM virtual serial port.
///
/// Received data is buffered in an `RX` slot stream and output is collected in
/// a `TX` slot stream. The port must be polled through the
/// [`UsbDevice`](usb_device::device::UsbDevice) that owns it.
pub struct UsbSerial<'a, B: UsbBus, const RX: usize = 512, const TX: usize = 64> {
    comm_if: InterfaceNumber,
    comm_ep: EndpointIn<'a, B>,
    data_if: InterfaceNumber,
    input: BufferedInputStream<RX, CdcReceiver<'a, B>>,
    output: BufferedOutputStream<TX, CdcWriter<'a, B>>,
    line_coding: LineCoding,
    dtr: bool,
    rts: bool,
}

impl<'a, B: UsbBus, const RX: usize, const TX: usize> UsbSerial<'a, B, RX, TX> {
    pub fn new(alloc: &'a UsbBusAllocator<B>) -> Self {
        Self {
            comm_if: alloc.interface(),
            comm_ep: alloc.interrupt(16, 255),
            data_if: alloc.interface(),
            input: BufferedInputStream::new(CdcReceiver {
                ep: alloc.bulk(PACKET_SIZE as u16),
                deferred: Cell::new(false),
            }),
            output: BufferedOutputStream::new(CdcWriter {
                ep: alloc.bulk(PACKET_SIZE as u16),
                open: false,
            }),
            line_coding: LineCoding::default(),
            dtr: false,
            rts: false,
        }
    }

    /// A host application has opened the port (DTR set).
    pub fn port_open(&self) -> bool {
        self.dtr
    }

    pub fn rts(&self) -> bool {
        self.rts
    }

    pub fn baud_rate(&self) -> u32 {
        self.line_coding.baud_rate
    }

    pub fn line_coding(&self) -> LineCoding {
        self.line_coding
    }

    pub fn input(&self) -> &BufferedInputStream<RX, CdcReceiver<'a, B>> {
        &self.input
    }

    pub fn output(&mut self) -> &mut BufferedOutputStream<TX, CdcWriter<'a, B>> {
        &mut self.output
    }

    pub fn data_available(&self) -> usize {
        self.input.data_available()
    }

    pub fn read_exact(&self, buf: &mut [u8]) {
        self.input.read_exact(buf);
    }

    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        self.input.try_read(buf)
    }

    pub fn write(&mut self, data: &[u8]) {
        self.output.write(data);
    }

    pub fn flush(&mut self) {
        self.output.flush();
    }

    pub fn end_line(&mut self) {
        self.output.end_line();
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) {
        if dtr != self.dtr {
            trace!("cdc: dtr {}", dtr);
        }
        self.dtr = dtr;
        self.rts = rts;
        self.output.writer_mut().open = dtr;
    }

    fn is_class_request(&self, req: &Request) -> bool {
        req.request_type == RequestType::Class
            && req.recipient == Recipient::Interface
            && req.index == u16::from(u8::from(self.comm_if))
    }

    /// Reply to a class IN request, `None` to reject it.
    fn class_request_in(&self, req: &Request) -> Option<[u8; 7]> {
        match req.request {
            REQ_GET_LINE_CODING => Some(self.line_coding.to_bytes()),
            _ => None,
        }
    }

    /// Apply a class OUT request, returning whether it is accepted.
    fn class_request_out(&mut self, req: &Request, data: &[u8]) -> bool {
        match req.request {
            REQ_SET_LINE_CODING => match LineCoding::from_bytes(data) {
                Some(coding) => {
                    trace!("cdc: baud rate {}", coding.baud_rate);
                    self.line_coding = coding;
                    true
                }
                None => false,
            },
            REQ_SET_CONTROL_LINE_STATE => {
                self.set_control_lines(req.value & 1 != 0, req.value & 2 != 0);
                true
            }
            REQ_SEND_BREAK => true,
            _ => false,
        }
    }
}

impl<B: UsbBus, const RX: usize, const TX: usize> UsbClass<B> for UsbSerial<'_, B, RX, TX> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        writer.iad(
            self.comm_if,
            2,
            USB_CLASS_CDC,
            CDC_SUBCLASS_ACM,
            CDC_PROTOCOL_NONE,
            None,
        )?;

        writer.interface(self.comm_if, USB_CLASS_CDC, CDC_SUBCLASS_ACM, CDC_PROTOCOL_NONE)?;
        // CDC 1.10
        writer.write(CS_INTERFACE, &[CDC_TYPE_HEADER, 0x10, 0x01])?;
        writer.write(
            CS_INTERFACE,
            &[CDC_TYPE_CALL_MANAGEMENT, 0x00, u8::from(self.data_if)],
        )?;
        // Line coding and serial state requests
        writer.write(CS_INTERFACE, &[CDC_TYPE_ACM, 0x02])?;
        writer.write(
            CS_INTERFACE,
            &[CDC_TYPE_UNION, u8::from(self.comm_if), u8::from(self.data_if)],
        )?;
        writer.endpoint(&self.comm_ep)?;

        writer.interface(self.data_if, USB_CLASS_CDC_DATA, 0x00, 0x00)?;
        writer.endpoint(&self.input.hooks().ep)?;
        writer.endpoint(&self.output.writer().ep)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.line_coding = LineCoding::default();
        self.set_control_lines(false, false);
        self.input.hooks().deferred.set(false);
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();
        if !self.is_class_request(&req) {
            return;
        }

        let _ = match self.class_request_in(&req) {
            Some(reply) => xfer.accept_with(&reply),
            None => xfer.reject(),
        };
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();
        if !self.is_class_request(&req) {
            return;
        }

        let _ = if self.class_request_out(&req, xfer.data()) {
            xfer.accept()
        } else {
            xfer.reject()
        };
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr == self.input.hooks().ep.address() {
            self.input.hooks().receive(&self.input);
        }
    }

    fn poll(&mut self) {
        let hooks = self.input.hooks();
        if hooks.deferred.get() {
            hooks.receive(&self.input);
        }
    }
}

impl<B: UsbBus, const RX: usize, const TX: usize> fmt::Write for UsbSerial<'_, B, RX, TX> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}

impl<B: UsbBus, const RX: usize, const TX: usize> embedded_io::ErrorType for UsbSerial<'_, B, RX, TX> {
    type Error = Infallible;
}

impl<B: UsbBus, const RX: usize, const TX: usize> embedded_io::Read for UsbSerial<'_, B, RX, TX> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        embedded_io::Read::read(&mut self.input, buf)
    }
}

impl<B: UsbBus, const RX: usize, const TX: usize> embedded_io::Write for UsbSerial<'_, B, RX, TX> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.output.write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.output.flush();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use core::fmt::Write as _;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use usb_device::UsbDirection;
    use usb_device::bus::PollResult;
    use usb_device::device::{UsbDevice, UsbDeviceBuilder};

    #[derive(Default)]
    struct Endpoints {
        next: usize,
        out_packets: VecDeque<Vec<u8>>,
        in_packets: Vec<(usize, Vec<u8>)>,
        in_busy: u32,
    }

    type Shared = Arc<Mutex<Endpoints>>;

    /// Bus with one host-to-device packet queue and a log of sent packets.
    struct MockBus(Shared);

    fn with<T>(state: &Shared, f: impl FnOnce(&mut Endpoints) -> T) -> T {
        f(&mut state.lock().expect("lock unexpectedly poisoned"))
    }

    fn mock_bus() -> (UsbBusAllocator<MockBus>, Shared) {
        let state = Shared::default();
        (UsbBusAllocator::new(MockBus(state.clone())), state)
    }

    /// Finish endpoint allocation so the class endpoints can reach the bus.
    fn device(alloc: &UsbBusAllocator<MockBus>) -> UsbDevice<'_, MockBus> {
        UsbDeviceBuilder::new(alloc, crate::usb::TEST_VID_PID).build()
    }

    impl UsbBus for MockBus {
        fn alloc_ep(
            &mut self,
            ep_dir: UsbDirection,
            ep_addr: Option<EndpointAddress>,
            _ep_type: EndpointType,
            _max_packet_size: u16,
            _interval: u8,
        ) -> usb_device::Result<EndpointAddress> {
            if let Some(addr) = ep_addr {
                return Ok(addr);
            }
            with(&self.0, |eps| {
                eps.next += 1;
                Ok(EndpointAddress::from_parts(eps.next, ep_dir))
            })
        }

        fn enable(&mut self) {}

        fn reset(&self) {}

        fn set_device_address(&self, _addr: u8) {}

        fn write(&self, ep_addr: EndpointAddress, buf: &[u8]) -> usb_device::Result<usize> {
            with(&self.0, |eps| {
                if eps.in_busy > 0 {
                    eps.in_busy -= 1;
                    return Err(UsbError::WouldBlock);
                }
                eps.in_packets.push((ep_addr.index(), buf.to_vec()));
                Ok(buf.len())
            })
        }

        fn read(&self, _ep_addr: EndpointAddress, buf: &mut [u8]) -> usb_device::Result<usize> {
            with(&self.0, |eps| {
                let packet = eps.out_packets.pop_front().ok_or(UsbError::WouldBlock)?;
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            })
        }

        fn set_stalled(&self, _ep_addr: EndpointAddress, _stalled: bool) {}

        fn is_stalled(&self, _ep_addr: EndpointAddress) -> bool {
            false
        }

        fn suspend(&self) {}

        fn resume(&self) {}

        fn poll(&self) -> PollResult {
            PollResult::None
        }
    }

    fn class_request(request: u8, value: u16, length: u16) -> Request {
        Request {
            direction: UsbDirection::Out,
            request_type: RequestType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index: 0,
            length,
        }
    }

    fn send_packets(state: &Shared, packets: &[&[u8]]) {
        with(state, |eps| eps.out_packets.extend(packets.iter().map(|p| p.to_vec())));
    }

    fn sent_packets(state: &Shared) -> Vec<(usize, Vec<u8>)> {
        with(state, |eps| core::mem::take(&mut eps.in_packets))
    }

    #[test]
    fn test_line_coding() {
        let (alloc, _) = mock_bus();
        let mut serial: UsbSerial<'_, _> = UsbSerial::new(&alloc);
        assert_eq!(serial.baud_rate(), 9600);

        let coding = [0x00, 0xc2, 0x01, 0x00, 0x00, 0x02, 0x07];
        assert!(serial.class_request_out(&class_request(REQ_SET_LINE_CODING, 0, 7), &coding));
        assert_eq!(serial.baud_rate(), 115_200);
        assert_eq!(serial.line_coding().parity, 2);
        assert_eq!(serial.line_coding().data_bits, 7);
        assert_eq!(
            serial.class_request_in(&class_request(REQ_GET_LINE_CODING, 0, 7)),
            Some(coding)
        );

        // Short payloads are rejected and leave the coding alone.
        assert!(!serial.class_request_out(&class_request(REQ_SET_LINE_CODING, 0, 4), &coding[..4]));
        assert_eq!(serial.baud_rate(), 115_200);
        assert!(!serial.class_request_out(&class_request(0x42, 0, 0), &[]));

        serial.reset();
        assert_eq!(serial.line_coding(), LineCoding::default());
    }

    #[test]
    fn test_control_lines() {
        let (alloc, _) = mock_bus();
        let mut serial: UsbSerial<'_, _> = UsbSerial::new(&alloc);
        assert!(!serial.port_open());

        assert!(serial.class_request_out(&class_request(REQ_SET_CONTROL_LINE_STATE, 3, 0), &[]));
        assert!(serial.port_open());
        assert!(serial.rts());

        assert!(serial.class_request_out(&class_request(REQ_SET_CONTROL_LINE_STATE, 2, 0), &[]));
        assert!(!serial.port_open());

        let other = Request {
            index: 5,
            ..class_request(REQ_SET_CONTROL_LINE_STATE, 1, 0)
        };
        assert!(!serial.is_class_request(&other));
        assert!(serial.is_class_request(&class_request(REQ_SET_CONTROL_LINE_STATE, 1, 0)));
    }

    #[test]
    fn test_write_packets() {
        let (alloc, state) = mock_bus();
        let mut serial: UsbSerial<'_, _, 512, 128> = UsbSerial::new(&alloc);
        let _device = device(&alloc);
        let write_ep = serial.output.writer().ep.address().index();

        // Dropped while the port is closed.
        serial.write(b"lost");
        serial.flush();
        assert!(sent_packets(&state).is_empty());

        serial.class_request_out(&class_request(REQ_SET_CONTROL_LINE_STATE, 1, 0), &[]);
        with(&state, |eps| eps.in_busy = 3);
        let data: Vec<u8> = (0..100).collect();
        serial.write(&data);
        assert_eq!(
            sent_packets(&state),
            [(write_ep, data[..64].to_vec()), (write_ep, data[64..].to_vec())]
        );

        write!(serial, "ok").expect("write unexpectedly failed");
        assert!(sent_packets(&state).is_empty());
        serial.end_line();
        assert_eq!(sent_packets(&state), [(write_ep, b"ok\n".to_vec())]);
    }

    #[test]
    fn test_full_packet_ends_with_zero_length_packet() {
        let (alloc, state) = mock_bus();
        let mut serial: UsbSerial<'_, _, 512, 256> = UsbSerial::new(&alloc);
        let _device = device(&alloc);
        let write_ep = serial.output.writer().ep.address().index();
        serial.class_request_out(&class_request(REQ_SET_CONTROL_LINE_STATE, 1, 0), &[]);

        serial.write(&[7; 128]);
        assert_eq!(
            sent_packets(&state),
            [(write_ep, [7; 64].to_vec()), (write_ep, [7; 64].to_vec()), (write_ep, Vec::new())]
        );

        serial.write(&[8; 70]);
        assert_eq!(
            sent_packets(&state),
            [(write_ep, [8; 64].to_vec()), (write_ep, [8; 6].to_vec())]
        );
    }

    #[test]
    fn test_receive_backpressure() {
        let (alloc, state) = mock_bus();
        let mut serial: UsbSerial<'_, _, 128> = UsbSerial::new(&alloc);
        let _device = device(&alloc);
        let read_ep = serial.input.hooks().ep.address();

        send_packets(&state, &[&[b'a'; 64], &[b'b'; 64], &[b'c'; 10]]);

        serial.endpoint_out(read_ep);
        assert_eq!(serial.data_available(), 64);
        // 63 free slots are not enough for the next packet.
        serial.endpoint_out(read_ep);
        assert_eq!(serial.data_available(), 64);
        assert!(serial.input().hooks().is_deferred());

        let mut buf = [0; 1];
        serial.read_exact(&mut buf);
        assert_eq!(buf, [b'a']);
        assert_eq!(serial.data_available(), 127);
        assert!(!serial.input().hooks().is_deferred());

        // The third packet waits until the consumer has made room.
        serial.endpoint_out(read_ep);
        assert!(serial.input().hooks().is_deferred());
        let mut drained = [0; 100];
        serial.read_exact(&mut drained);
        assert!(!serial.input().hooks().is_deferred());

        let mut rest = [0; 37];
        serial.read_exact(&mut rest);
        assert!(rest[..27].iter().all(|&b| b == b'b'));
        assert!(rest[27..].iter().all(|&b| b == b'c'));
        assert_eq!(serial.data_available(), 0);
        assert_eq!(serial.input().dropped_bytes(), 0);
    }

    #[test]
    fn test_poll_resumes_deferred() {
        let (alloc, state) = mock_bus();
        let mut serial: UsbSerial<'_, _, 128> = UsbSerial::new(&alloc);
        let _device = device(&alloc);
        let read_ep = serial.input.hooks().ep.address();
        send_packets(&state, &[&[1; 64], &[2; 64]]);

        serial.endpoint_out(read_ep);
        serial.endpoint_out(read_ep);
        assert!(serial.input().hooks().is_deferred());

        // Still no room.
        serial.poll();
        assert_eq!(serial.data_available(), 64);

        serial.reset();
        assert!(!serial.input().hooks().is_deferred());
    }

    #[test]
    fn test_blocking_read_polls_endpoint() {
        let (alloc, state) = mock_bus();
        let serial: UsbSerial<'_, _> = UsbSerial::new(&alloc);
        let _device = device(&alloc);
        send_packets(&state, &[b"12 ", b"hello\n"]);

        // No endpoint callback ran, the reader pulls packets itself.
        assert_eq!(serial.input().read_parsed::<u8>(), Some(12));
        assert_eq!(serial.input().read_line::<16>().as_slice(), b" hello");
    }
}
