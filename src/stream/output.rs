use core::fmt;

use crate::queue::CircularQueue;

/// Hardware write primitive behind [`BufferedOutputStream`].
pub trait BlockWriter {
    /// Hand `data` to the hardware, blocking until it is accepted.
    fn write_block(&mut self, data: &[u8]);

    /// Number of bytes worth collecting before a write.
    fn optimal_write_block_size(&self) -> usize {
        1
    }
}

impl<W: BlockWriter + ?Sized> BlockWriter for &mut W {
    fn write_block(&mut self, data: &[u8]) {
        (**self).write_block(data)
    }

    fn optimal_write_block_size(&self) -> usize {
        (**self).optimal_write_block_size()
    }
}

/// Output stream collecting bytes in an `M` slot ring before writing them out.
///
/// The ring is flushed when it fills up, when it holds at least
/// [`BlockWriter::optimal_write_block_size`] bytes after a write, and on
/// [`flush`](Self::flush) or [`end_line`](Self::end_line). A single
/// `write_block` call never gets more than `M - 1` bytes. With `M == 0` every
/// write goes straight to the writer.
pub struct BufferedOutputStream<const M: usize, W> {
    queue: CircularQueue<M>,
    writer: W,
}

/// Output stream without buffering.
pub type UnbufferedOutputStream<W> = BufferedOutputStream<0, W>;

impl<const M: usize, W: BlockWriter> BufferedOutputStream<M, W> {
    pub const fn new(writer: W) -> Self {
        Self {
            queue: CircularQueue::new(),
            writer,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Bytes waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.available()
    }

    pub fn write(&mut self, data: &[u8]) {
        if M == 0 {
            self.writer.write_block(data);
            return;
        }

        for &byte in data {
            if self.queue.is_full() {
                self.flush();
            }
            self.queue.push(byte);
        }

        if self.queue.available() >= self.writer.optimal_write_block_size() {
            self.flush();
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.write(&[byte]);
    }

    /// Write `1` or `0`.
    pub fn write_bool(&mut self, value: bool) {
        self.write(if value { b"1" } else { b"0" });
    }

    /// Pass the buffered bytes to the writer.
    ///
    /// Only the bytes queued when the flush starts are written.
    pub fn flush(&mut self) {
        let len = self.queue.available();
        if len == 0 {
            return;
        }

        let mut block = [0; M];
        for byte in &mut block[..len] {
            *byte = self.queue.pop();
        }
        self.writer.write_block(&block[..len]);
    }

    /// Write a line feed and flush.
    pub fn end_line(&mut self) {
        self.write(b"\n");
        self.flush();
    }

    pub fn into_inner(mut self) -> W {
        self.flush();
        self.writer
    }
}

impl<const M: usize, W: BlockWriter> fmt::Write for BufferedOutputStream<M, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}

impl<const M: usize, W> embedded_io::ErrorType for BufferedOutputStream<M, W> {
    type Error = core::convert::Infallible;
}

impl<const M: usize, W: BlockWriter> embedded_io::Write for BufferedOutputStream<M, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        BufferedOutputStream::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        BufferedOutputStream::flush(self);
        Ok(())
    }
}
