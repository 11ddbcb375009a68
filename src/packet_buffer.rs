use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes};

use crate::error::RtpCodecError;

/// A read cursor over a region of packet data.  The position is the only state the codecs mutate:
/// every read advances it, and a codec leaves it immediately past the data it consumed.
pub trait PacketBuffer: Buf {
    /// Return the current cursor position of this buffer
    fn position(&self) -> usize;

    /// Move the position back by one byte, so the last byte read will be returned again by the
    /// next read.
    fn rewind_one_byte(&mut self);

    /// Get a view of the next `len` bytes of this buffer.  Note that advances in the returned
    /// view's position will _not_ be reflected in this buffer; the caller needs to advance this
    /// buffer manually.
    fn sub_buffer(&self, len: usize) -> Result<Cursor<&[u8]>, RtpCodecError>;

    /// Return the next byte without advancing the position.
    fn peek_u8(&self) -> Option<u8> {
        self.chunk().first().copied()
    }

    fn ensure_remaining(&self, needed: usize) -> Result<(), RtpCodecError> {
        if self.remaining() < needed {
            return Err(RtpCodecError::BufferUnderrun {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, RtpCodecError> {
        self.ensure_remaining(1)?;
        Ok(self.get_u8())
    }

    fn read_u16(&mut self) -> Result<u16, RtpCodecError> {
        self.ensure_remaining(2)?;
        Ok(self.get_u16())
    }

    fn read_i16(&mut self) -> Result<i16, RtpCodecError> {
        self.ensure_remaining(2)?;
        Ok(self.get_i16())
    }

    fn read_u24(&mut self) -> Result<u32, RtpCodecError> {
        self.ensure_remaining(3)?;
        Ok(self.get_uint(3) as u32)
    }

    fn read_u32(&mut self) -> Result<u32, RtpCodecError> {
        self.ensure_remaining(4)?;
        Ok(self.get_u32())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes, RtpCodecError> {
        self.ensure_remaining(len)?;
        Ok(self.copy_to_bytes(len))
    }
}

impl<T: AsRef<[u8]>> PacketBuffer for Cursor<T> {
    fn position(&self) -> usize {
        Cursor::position(self) as usize
    }

    fn rewind_one_byte(&mut self) {
        let position = Cursor::position(self);
        self.set_position(position.saturating_sub(1));
    }

    fn sub_buffer(&self, len: usize) -> Result<Cursor<&[u8]>, RtpCodecError> {
        self.ensure_remaining(len)?;
        let start = PacketBuffer::position(self);
        Ok(Cursor::new(&self.get_ref().as_ref()[start..start + len]))
    }
}

/// Write-side helpers.  All network order.
pub trait PacketBufferMut: BufMut {
    fn ensure_space(&self, needed: usize) -> Result<(), RtpCodecError> {
        if self.remaining_mut() < needed {
            return Err(RtpCodecError::BufferOverflow {
                needed,
                remaining: self.remaining_mut(),
            });
        }
        Ok(())
    }

    fn put_u24(&mut self, value: u32) {
        self.put_uint(u64::from(value & 0xFF_FFFF), 3);
    }

    fn put_padding(&mut self, num_bytes: usize) {
        self.put_bytes(0x00, num_bytes);
    }
}

impl<T> PacketBufferMut for T where T: BufMut + ?Sized {}
