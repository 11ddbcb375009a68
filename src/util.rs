use crate::packet_buffer::PacketBuffer;

/// Move `buf` past any padding (zero) bytes, but never beyond `max_position`.  If a non-zero byte
/// is hit, it belongs to whatever comes next, so the buffer is rewound to just before it.
pub fn consume_padding<B: PacketBuffer>(buf: &mut B, max_position: usize) {
    while buf.position() < max_position {
        match buf.read_u8() {
            Ok(0x00) => {}
            Ok(_) => {
                // We found the first non-padding byte, rewind back before it
                buf.rewind_one_byte();
                break;
            }
            Err(_) => break,
        }
    }
}

/// The number of zero bytes needed to bring `len` up to a 4-byte boundary.
pub fn padding_needed(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// `len`, rounded up to the next 4-byte boundary.
pub fn word_aligned(len: usize) -> usize {
    len + padding_needed(len)
}

/// Signed distance from `from` to `to` using serial number arithmetic (RFC 1982), i.e. the
/// shortest way around the 16-bit sequence number space.
pub fn seq_num_delta(from: u16, to: u16) -> i16 {
    to.wrapping_sub(from) as i16
}
