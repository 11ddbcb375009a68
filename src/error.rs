use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RtpCodecError {
    #[error("Malformed header extension: length field showed {length_field_bytes} bytes, but buffer only had {buf_remaining_bytes} bytes remaining")]
    MalformedExtension {
        length_field_bytes: usize,
        buf_remaining_bytes: usize,
    },
    #[error("Unsupported header extension cookie {0:#06x}")]
    UnsupportedExtensionCookie(u16),
    #[error("Invalid header extension value: {0}")]
    InvalidExtensionValue(String),
    #[error("Truncated transport-cc block: needed {needed} more bytes, but buffer only had {remaining} bytes remaining")]
    TruncatedTccBlock { needed: usize, remaining: usize },
    #[error("Transport-cc delta for packet {seq_num} is {delta_ticks} ticks, which doesn't fit in 16 bits")]
    TccDeltaOutOfRange { seq_num: u16, delta_ticks: i64 },
    #[error("Transport-cc feedback covers {num_packets} packets, but at most 65535 fit in one FCI")]
    TccTooManyPackets { num_packets: usize },
    #[error("Buffer underrun: needed {needed} bytes, but buffer only had {remaining} bytes remaining")]
    BufferUnderrun { needed: usize, remaining: usize },
    #[error("Buffer overflow: needed {needed} bytes of space, but buffer only had {remaining} bytes remaining")]
    BufferOverflow { needed: usize, remaining: usize },
}
