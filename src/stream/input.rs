use core::str::FromStr;
use core::sync::atomic::{AtomicUsize, Ordering};

use heapless::Vec;

use crate::queue::CircularQueue;

/// Longest token accepted by the numeric parsers.
pub const MAX_NUMBER_LEN: usize = 32;

/// Producer side of an input stream.
pub trait Inject {
    /// Queue as much of `data` as fits and return the accepted length.
    /// The rest is dropped.
    fn add_data_to_buffer(&self, data: &[u8]) -> usize;

    /// Free slots in the receive buffer.
    fn receive_buffer_space(&self) -> usize;
}

/// Extension points of [`BufferedInputStream`].
///
/// All methods run in the consumer context.
pub trait InputHooks {
    /// The consumer needs `requested` more bytes. Polled sources can feed
    /// them through `rx` right away. Sources fed from an interrupt ignore this.
    fn input_data(&self, _requested: usize, _rx: &dyn Inject) {}

    /// A byte has been consumed, so a source throttled on a full buffer may
    /// resume.
    fn input_data_read(&self, _rx: &dyn Inject) {}

    /// Wait for the producer to make progress.
    fn wait_for_input(&self) {
        super::wait_for_interrupt();
    }
}

impl InputHooks for () {}

/// Input stream over a `K` slot receive ring.
///
/// The producer calls [`Inject::add_data_to_buffer`], the consumer uses the
/// blocking readers. A reader never returns fewer bytes than it was asked for.
pub struct BufferedInputStream<const K: usize, H = ()> {
    queue: CircularQueue<K>,
    dropped: AtomicUsize,
    truncated: AtomicUsize,
    hooks: H,
}

impl<const K: usize, H: InputHooks> BufferedInputStream<K, H> {
    pub const fn new(hooks: H) -> Self {
        Self {
            queue: CircularQueue::new(),
            dropped: AtomicUsize::new(0),
            truncated: AtomicUsize::new(0),
            hooks,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Bytes ready to be read.
    pub fn data_available(&self) -> usize {
        self.queue.available()
    }

    /// Total number of bytes dropped because the buffer was full.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total number of bytes discarded by line and token reads that did not
    /// fit their result.
    pub fn truncated_bytes(&self) -> usize {
        self.truncated.load(Ordering::Relaxed)
    }

    /// Fill `buf` completely, waiting for data as needed.
    pub fn read_exact(&self, buf: &mut [u8]) {
        let len = buf.len();
        for (i, byte) in buf.iter_mut().enumerate() {
            self.wait_for_data(len - i);
            *byte = self.next_byte();
        }
    }

    /// Next raw byte.
    pub fn read_byte(&self) -> u8 {
        self.wait_for_data(1);
        self.next_byte()
    }

    /// Copy whatever is buffered into `buf` without waiting.
    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.queue.available());
        for byte in &mut buf[..len] {
            *byte = self.next_byte();
        }
        len
    }

    /// Read up to and including the next `\n`, returning the line without it.
    ///
    /// Bytes past the capacity `L` are consumed and discarded.
    pub fn read_line<const L: usize>(&self) -> Vec<u8, L> {
        let mut line = Vec::new();
        loop {
            match self.read_byte() {
                b'\n' => return line,
                byte => self.keep(&mut line, byte),
            }
        }
    }

    /// Read a whitespace separated token.
    pub fn read_token<const L: usize>(&self) -> Vec<u8, L> {
        self.read_token_with(|b| b.is_ascii_whitespace())
    }

    /// Skip leading delimiters, then collect bytes up to the next delimiter.
    ///
    /// The terminating delimiter stays in the buffer. Bytes past the capacity
    /// `L` are consumed and discarded.
    pub fn read_token_with<const L: usize>(&self, is_delim: impl Fn(u8) -> bool) -> Vec<u8, L> {
        loop {
            self.wait_for_data(1);
            if !is_delim(self.queue.peek()) {
                break;
            }
            self.next_byte();
        }

        let mut token = Vec::new();
        loop {
            self.wait_for_data(1);
            if is_delim(self.queue.peek()) {
                return token;
            }
            let byte = self.next_byte();
            self.keep(&mut token, byte);
        }
    }

    /// Read a token and parse it, e.g. as an integer or a float.
    ///
    /// The token is consumed even if it does not parse.
    pub fn read_parsed<T: FromStr>(&self) -> Option<T> {
        let token = self.read_token::<MAX_NUMBER_LEN>();
        core::str::from_utf8(&token).ok()?.parse().ok()
    }

    /// Read an integer token, any nonzero value is `true`.
    pub fn read_bool(&self) -> bool {
        self.read_parsed::<i64>().is_some_and(|v| v != 0)
    }

    fn wait_for_data(&self, requested: usize) {
        while self.queue.is_empty() {
            self.hooks.input_data(requested, self);
            if self.queue.is_empty() {
                self.hooks.wait_for_input();
            }
        }
    }

    fn keep<const L: usize>(&self, out: &mut Vec<u8, L>, byte: u8) {
        if out.push(byte).is_err() {
            let total = self.truncated.load(Ordering::Relaxed);
            self.truncated.store(total + 1, Ordering::Relaxed);
        }
    }

    fn next_byte(&self) -> u8 {
        let byte = self.queue.pop();
        self.hooks.input_data_read(self);
        byte
    }
}

impl<const K: usize, H: InputHooks> Inject for BufferedInputStream<K, H> {
    fn add_data_to_buffer(&self, data: &[u8]) -> usize {
        let accepted = data.len().min(self.queue.space());
        for &byte in &data[..accepted] {
            self.queue.push(byte);
        }

        let dropped = data.len() - accepted;
        if dropped != 0 {
            let total = self.dropped.load(Ordering::Relaxed);
            self.dropped.store(total + dropped, Ordering::Relaxed);
        }
        accepted
    }

    fn receive_buffer_space(&self) -> usize {
        self.queue.space()
    }
}

impl<const K: usize, H: InputHooks + Default> Default for BufferedInputStream<K, H> {
    fn default() -> Self {
        Self::new(H::default())
    }
}

impl<const K: usize, H> embedded_io::ErrorType for BufferedInputStream<K, H> {
    type Error = core::convert::Infallible;
}

impl<const K: usize, H: InputHooks> embedded_io::Read for BufferedInputStream<K, H> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.wait_for_data(buf.len());
        Ok(self.try_read(buf))
    }
}

impl<const K: usize, H: InputHooks> embedded_io::ReadReady for BufferedInputStream<K, H> {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.queue.is_empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use core::cell::{Cell, RefCell};
    use std::vec::Vec as StdVec;

    /// Feeds one byte of `data` each time the consumer asks for input.
    struct Trickle {
        data: StdVec<u8>,
        next: Cell<usize>,
        reads: Cell<usize>,
    }

    impl Trickle {
        fn new(data: &[u8]) -> Self {
            Self {
                data: data.to_vec(),
                next: Cell::new(0),
                reads: Cell::new(0),
            }
        }
    }

    impl InputHooks for Trickle {
        fn input_data(&self, _requested: usize, rx: &dyn Inject) {
            let next = self.next.get();
            if next < self.data.len() {
                assert_eq!(rx.add_data_to_buffer(&self.data[next..next + 1]), 1);
                self.next.set(next + 1);
            }
        }

        fn input_data_read(&self, _rx: &dyn Inject) {
            self.reads.set(self.reads.get() + 1);
        }

        fn wait_for_input(&self) {
            panic!("input requested past the end of the data");
        }
    }

    fn stream_with<const K: usize>(data: &[u8]) -> BufferedInputStream<K> {
        let stream = BufferedInputStream::new(());
        assert_eq!(stream.add_data_to_buffer(data), data.len());
        stream
    }

    #[test]
    fn test_tokens_then_line() {
        let stream = stream_with::<16>(b"  42 17\n");

        assert_eq!(stream.read_token::<8>(), b"42");
        assert_eq!(stream.read_token::<8>(), b"17");
        assert_eq!(stream.data_available(), 1);
        assert!(stream.read_line::<8>().is_empty());
        assert_eq!(stream.data_available(), 0);
    }

    #[test]
    fn test_typed_reads() {
        let stream = stream_with::<64>(b"-12 3.5 0 7 x nope\nab");

        assert_eq!(stream.read_parsed::<i32>(), Some(-12));
        assert_eq!(stream.read_parsed::<f32>(), Some(3.5));
        assert!(!stream.read_bool());
        assert!(stream.read_bool());
        assert_eq!(stream.read_parsed::<u8>(), None);
        assert_eq!(stream.read_parsed::<u16>(), None);
        assert_eq!(stream.read_byte(), b'\n');
        assert_eq!(stream.read_byte(), b'a');
        assert_eq!(stream.data_available(), 1);
    }

    #[test]
    fn test_custom_delimiter() {
        let stream = stream_with::<32>(b",,a b,c");

        assert_eq!(stream.read_token_with::<8>(|b| b == b','), b"a b");
        assert_eq!(stream.read_byte(), b',');
    }

    #[test]
    fn test_long_line_truncated() {
        let stream = stream_with::<32>(b"0123456789\nnext\n");

        assert_eq!(stream.read_line::<4>(), b"0123");
        assert_eq!(stream.truncated_bytes(), 6);
        assert_eq!(stream.read_line::<8>(), b"next");
        assert_eq!(stream.truncated_bytes(), 6);
        assert_eq!(stream.dropped_bytes(), 0);
    }

    #[test]
    fn test_long_token_truncated() {
        let stream = stream_with::<32>(b"abcdefgh ij ");

        assert_eq!(stream.read_token::<3>(), b"abc");
        assert_eq!(stream.truncated_bytes(), 5);
        assert_eq!(stream.read_token::<3>(), b"ij");
        assert_eq!(stream.truncated_bytes(), 5);
        assert_eq!(stream.read_byte(), b' ');
    }

    #[test]
    fn test_overflow_drops_tail() {
        let stream = BufferedInputStream::<8>::new(());

        assert_eq!(stream.receive_buffer_space(), 7);
        assert_eq!(stream.add_data_to_buffer(b"abcde"), 5);
        assert_eq!(stream.add_data_to_buffer(b"fghij"), 2);
        assert_eq!(stream.dropped_bytes(), 3);
        assert_eq!(stream.receive_buffer_space(), 0);

        let mut buf = [0; 7];
        stream.read_exact(&mut buf);
        assert_eq!(&buf, b"abcdefg");
    }

    #[test]
    fn test_interleaved_production() {
        let data: StdVec<u8> = (0..100).map(|i| i * 2 + 1).collect();
        let stream = BufferedInputStream::<64, _>::new(Trickle::new(&data));

        let mut buf = [0; 100];
        stream.read_exact(&mut buf);
        assert_eq!(&buf[..], &data[..]);
        assert_eq!(stream.hooks().reads.get(), 100);
        assert_eq!(stream.dropped_bytes(), 0);
    }

    #[test]
    fn test_threaded_producer() {
        let stream = BufferedInputStream::<64>::new(());
        let data: StdVec<u8> = (0..100).collect();

        std::thread::scope(|s| {
            s.spawn(|| {
                for chunk in data.chunks(7) {
                    while stream.receive_buffer_space() < chunk.len() {
                        std::thread::yield_now();
                    }
                    stream.add_data_to_buffer(chunk);
                }
            });

            let mut buf = [0; 100];
            stream.read_exact(&mut buf);
            assert_eq!(&buf[..], &data[..]);
        });
    }

    #[test]
    fn test_embedded_io_read() {
        use embedded_io::Read;

        let mut stream = stream_with::<16>(b"hello");
        let mut buf = [0; 8];
        assert_eq!(stream.read(&mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_read_notifies_hooks() {
        struct Count(RefCell<usize>);
        impl InputHooks for Count {
            fn input_data_read(&self, rx: &dyn Inject) {
                *self.0.borrow_mut() = rx.receive_buffer_space();
            }
        }

        let stream = BufferedInputStream::<4, _>::new(Count(RefCell::new(0)));
        stream.add_data_to_buffer(b"xyz");
        stream.read_byte();
        assert_eq!(*stream.hooks().0.borrow(), 1);
    }
}
