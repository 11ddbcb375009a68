pub mod error;
pub mod packet_buffer;
pub mod rtcp;
pub mod rtp;
pub mod util;

pub use error::RtpCodecError;
pub use packet_buffer::{PacketBuffer, PacketBufferMut};
