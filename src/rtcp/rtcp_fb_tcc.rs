use anyhow::{Context, Result};
use bitvec::{field::BitField, order::Msb0, view::BitView};
use bytes::BufMut;
use tracing::{debug, trace};

use crate::{
    error::RtpCodecError,
    packet_buffer::{PacketBuffer, PacketBufferMut},
    util::{consume_padding, word_aligned},
};

/// https://datatracker.ietf.org/doc/html/draft-holmer-rmcat-transport-wide-cc-extensions-01#section-3.1
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      base sequence number     |      packet status count      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 reference time                | fb pkt. count |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          packet chunk         |         packet chunk          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// .                                                               .
/// .                                                               .
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         packet chunk          |  recv delta   |  recv delta   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// .                                                               .
/// .                                                               .
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           recv delta          |  recv delta   | zero padding  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
/// packet status count:  16 bits The number of packets this feedback
///  contains status for, starting with the packet identified
///  by the base sequence number.
///
/// reference time:  24 bits Signed integer indicating an absolute
///  reference time in some (unknown) time base chosen by the
///  sender of the feedback packets.  The value is to be
///  interpreted in multiples of 64ms.
///
/// feedback packet count:  8 bits A counter incremented by one for each
///  feedback packet sent.  Used to detect feedback packet
///  losses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpFbTccFci {
    pub base_seq_num: u16,
    pub packet_status_count: u16,
    /// In units of [`RtcpFbTccFci::REFERENCE_TIME_UNIT_MS`]; only the low 24 bits are used
    pub reference_time: u32,
    pub feedback_packet_count: u8,
    pub chunks: Vec<SomePacketStatusChunk>,
    pub deltas: Vec<SomeRecvDelta>,
}

impl RtcpFbTccFci {
    pub const HEADER_SIZE_BYTES: usize = 8;
    pub const CHUNK_SIZE_BYTES: usize = 2;
    pub const REFERENCE_TIME_UNIT_MS: i64 = 64;
    /// Receive deltas are expressed in multiples of 250us
    pub const TICK_US: i64 = 250;

    /// Size of the FCI on the wire, including padding.
    pub fn size_bytes(&self) -> usize {
        let deltas_size_bytes: usize = self.deltas.iter().map(SomeRecvDelta::size_bytes).sum();
        word_aligned(
            Self::HEADER_SIZE_BYTES + self.chunks.len() * Self::CHUNK_SIZE_BYTES + deltas_size_bytes,
        )
    }

    /// The status symbol of every packet this FCI describes, in sequence number order.
    pub fn symbols(&self) -> impl Iterator<Item = PacketStatusSymbol> + '_ {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.symbols())
            .take(self.packet_status_count as usize)
    }

    /// Pair each status symbol with its sequence number and receive delta, if it has one.
    pub fn packet_reports(&self) -> Vec<PacketReport> {
        let mut deltas = self.deltas.iter();
        let mut packet_reports = Vec::with_capacity(self.packet_status_count as usize);
        let mut seq_num = self.base_seq_num;
        for symbol in self.symbols() {
            let packet_report = if symbol == PacketStatusSymbol::NotReceived {
                PacketReport::UnreceivedPacket { seq_num }
            } else {
                let Some(delta) = deltas.next() else {
                    debug!(
                        "transport-cc fci ran out of receive deltas at seq num {seq_num}, \
                        dropping the remaining {} packet reports",
                        self.packet_status_count as usize - packet_reports.len()
                    );
                    break;
                };
                match *delta {
                    SomeRecvDelta::Small(delta_ticks) => {
                        PacketReport::ReceivedPacketSmallDelta {
                            seq_num,
                            delta_ticks,
                        }
                    }
                    SomeRecvDelta::LargeOrNegative(delta_ticks) => {
                        PacketReport::ReceivedPacketLargeOrNegativeDelta {
                            seq_num,
                            delta_ticks,
                        }
                    }
                }
            };
            packet_reports.push(packet_report);
            seq_num = seq_num.wrapping_add(1);
        }
        packet_reports
    }

    /// Write this FCI, including trailing padding, to `buf`.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let size_bytes = self.size_bytes();
        buf.ensure_space(size_bytes).context("transport-cc fci")?;
        buf.put_u16(self.base_seq_num);
        buf.put_u16(self.packet_status_count);
        buf.put_u24(self.reference_time);
        buf.put_u8(self.feedback_packet_count);
        let mut bytes_written = Self::HEADER_SIZE_BYTES;
        for chunk in &self.chunks {
            buf.put_u16(chunk.to_u16());
            bytes_written += Self::CHUNK_SIZE_BYTES;
        }
        for delta in &self.deltas {
            write_some_recv_delta(buf, *delta);
            bytes_written += delta.size_bytes();
        }
        buf.put_padding(size_bytes - bytes_written);
        Ok(())
    }
}

/// Read a transport-cc FCI.  [`buf`] should start at the base sequence number, and is left just
/// after the FCI's padding (or at the end of the buffer, if the padding isn't there).
pub fn read_rtcp_fb_tcc_fci<B: PacketBuffer>(buf: &mut B) -> Result<RtcpFbTccFci> {
    let start_position = buf.position();
    let base_seq_num = buf.read_u16().context("base seq num")?;
    let packet_status_count = buf.read_u16().context("packet status count")?;
    let reference_time = buf.read_u24().context("reference time")?;
    let feedback_packet_count = buf.read_u8().context("feedback packet count")?;

    let mut num_status_remaining = packet_status_count as usize;
    let mut chunks: Vec<SomePacketStatusChunk> = Vec::new();
    while num_status_remaining > 0 {
        let chunk = read_some_packet_status_chunk(buf, num_status_remaining)
            .with_context(|| format!("packet status chunk {}", chunks.len()))?;
        num_status_remaining -= chunk.num_symbols();
        chunks.push(chunk);
    }

    let mut deltas: Vec<SomeRecvDelta> = Vec::new();
    let symbols = chunks
        .iter()
        .flat_map(|chunk| chunk.symbols())
        .enumerate();
    for (i, symbol) in symbols {
        let delta = read_some_recv_delta(buf, symbol).with_context(|| {
            format!(
                "delta for packet {}",
                base_seq_num.wrapping_add(i as u16)
            )
        })?;
        deltas.extend(delta);
    }

    let end_position = start_position + word_aligned(buf.position() - start_position);
    consume_padding(buf, end_position);
    trace!(
        "read transport-cc fci: base seq num {base_seq_num}, {packet_status_count} statuses, \
        {} chunks, {} deltas",
        chunks.len(),
        deltas.len()
    );

    Ok(RtcpFbTccFci {
        base_seq_num,
        packet_status_count,
        reference_time,
        feedback_packet_count,
        chunks,
        deltas,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketReport {
    UnreceivedPacket { seq_num: u16 },
    ReceivedPacketSmallDelta { seq_num: u16, delta_ticks: u8 },
    ReceivedPacketLargeOrNegativeDelta { seq_num: u16, delta_ticks: i16 },
}

impl PacketReport {
    pub fn seq_num(&self) -> u16 {
        match self {
            PacketReport::UnreceivedPacket { seq_num }
            | PacketReport::ReceivedPacketSmallDelta { seq_num, .. }
            | PacketReport::ReceivedPacketLargeOrNegativeDelta { seq_num, .. } => *seq_num,
        }
    }

    /// The receive delta of this packet in microseconds, or None if it wasn't received
    pub fn delta_us(&self) -> Option<i64> {
        match self {
            PacketReport::UnreceivedPacket { .. } => None,
            PacketReport::ReceivedPacketSmallDelta { delta_ticks, .. } => {
                Some(*delta_ticks as i64 * RtcpFbTccFci::TICK_US)
            }
            PacketReport::ReceivedPacketLargeOrNegativeDelta { delta_ticks, .. } => {
                Some(*delta_ticks as i64 * RtcpFbTccFci::TICK_US)
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketStatusSymbol {
    NotReceived = 0,
    ReceivedSmallDelta = 1,
    ReceivedLargeOrNegativeDelta = 2,
}

impl PacketStatusSymbol {
    pub fn delta_size_bytes(&self) -> usize {
        match self {
            PacketStatusSymbol::NotReceived => 0,
            PacketStatusSymbol::ReceivedSmallDelta => 1,
            PacketStatusSymbol::ReceivedLargeOrNegativeDelta => 2,
        }
    }

    /// The symbol for a received packet whose delta is `delta_ticks`
    pub fn for_delta_ticks(delta_ticks: i64) -> PacketStatusSymbol {
        if (0..=u8::MAX as i64).contains(&delta_ticks) {
            PacketStatusSymbol::ReceivedSmallDelta
        } else {
            PacketStatusSymbol::ReceivedLargeOrNegativeDelta
        }
    }

    fn from_one_bit(value: bool) -> PacketStatusSymbol {
        if value {
            PacketStatusSymbol::ReceivedSmallDelta
        } else {
            PacketStatusSymbol::NotReceived
        }
    }

    /// The 2 bit value 3 is reserved.  Senders shouldn't use it, but if one does it's read as
    /// 'not received' rather than failing the whole packet.
    fn from_two_bit(value: u8) -> PacketStatusSymbol {
        match value {
            0 => PacketStatusSymbol::NotReceived,
            1 => PacketStatusSymbol::ReceivedSmallDelta,
            2 => PacketStatusSymbol::ReceivedLargeOrNegativeDelta,
            pss => {
                debug!("reserved 2 bit packet status symbol {pss}, treating as not received");
                PacketStatusSymbol::NotReceived
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SymbolSize {
    OneBit,
    TwoBit,
}

impl SymbolSize {
    pub fn capacity(&self) -> usize {
        match self {
            SymbolSize::OneBit => StatusVectorChunk::MAX_ONE_BIT_CAPACITY,
            SymbolSize::TwoBit => StatusVectorChunk::MAX_TWO_BIT_CAPACITY,
        }
    }
}

/// A status vector chunk starts with a 1 bit to identify it as a vector
/// chunk, followed by a symbol size bit and then 7 or 14 symbols,
/// depending on the size bit.
///
/// ```text
///      0                   1
///      0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |T|S|       symbol list         |
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
/// chunk type (T):  1 bit A one identifies this as a status vector
///             chunk.
///
/// symbol size (S):  1 bit A zero means this vector contains only
///             "packet received" (1) and "packet not received" (0)
///             symbols.  This means we can compress each symbol to just
///             one bit, 14 in total.  A one means this vector contains
///             the normal 2-bit symbols, 7 in total.
///
/// symbol list:  14 bits A list of packet status symbols, 7 or 14 in
///             total.
/// ```
///
/// Only the final chunk of an FCI may hold fewer symbols than its capacity; the unused slots are
/// written as zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusVectorChunk {
    pub symbol_size: SymbolSize,
    pub symbols: Vec<PacketStatusSymbol>,
}

impl StatusVectorChunk {
    pub const MAX_ONE_BIT_CAPACITY: usize = 14;
    pub const MAX_TWO_BIT_CAPACITY: usize = 7;
}

/// A run length chunk starts with 0 bit, followed by a packet status
/// symbol and the run length of that symbol.
/// ```text
///     0                   1
///     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |T| S |       Run Length        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
/// chunk type (T):  1 bit A zero identifies this as a run length chunk.
///
/// packet status symbol (S):  2 bits The symbol repeated in this run.
///             See above.
///
/// run length (L):  13 bits An unsigned integer denoting the run length.
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLengthEncodingChunk {
    pub symbol: PacketStatusSymbol,
    pub run_length: u16,
}

impl RunLengthEncodingChunk {
    pub const MAX_RUN_LENGTH: usize = 0x1FFF;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SomePacketStatusChunk {
    StatusVectorChunk(StatusVectorChunk),
    RunLengthEncodingChunk(RunLengthEncodingChunk),
}

impl SomePacketStatusChunk {
    pub fn num_symbols(&self) -> usize {
        match self {
            SomePacketStatusChunk::StatusVectorChunk(svc) => svc.symbols.len(),
            SomePacketStatusChunk::RunLengthEncodingChunk(rlec) => rlec.run_length as usize,
        }
    }

    pub fn symbols(&self) -> Box<dyn Iterator<Item = PacketStatusSymbol> + '_> {
        match self {
            SomePacketStatusChunk::StatusVectorChunk(svc) => Box::new(svc.symbols.iter().copied()),
            SomePacketStatusChunk::RunLengthEncodingChunk(rlec) => Box::new(
                std::iter::repeat(rlec.symbol).take(rlec.run_length as usize),
            ),
        }
    }

    /// The wire representation of this chunk
    pub fn to_u16(&self) -> u16 {
        let mut value = 0u16;
        let bits = value.view_bits_mut::<Msb0>();
        match self {
            SomePacketStatusChunk::RunLengthEncodingChunk(rlec) => {
                bits[1..3].store_be(rlec.symbol as u8);
                bits[3..].store_be(rlec.run_length);
            }
            SomePacketStatusChunk::StatusVectorChunk(svc) => {
                bits.set(0, true);
                match svc.symbol_size {
                    SymbolSize::OneBit => {
                        for (i, symbol) in svc.symbols.iter().enumerate() {
                            bits.set(2 + i, *symbol != PacketStatusSymbol::NotReceived);
                        }
                    }
                    SymbolSize::TwoBit => {
                        bits.set(1, true);
                        for (i, symbol) in svc.symbols.iter().enumerate() {
                            bits[2 + 2 * i..4 + 2 * i].store_be(*symbol as u8);
                        }
                    }
                }
            }
        }
        value
    }

    /// Parse a chunk from its wire representation.  Only the first `max_symbol_count` symbols are
    /// kept: slots beyond the FCI's packet status count carry no meaning.
    pub fn from_u16(value: u16, max_symbol_count: usize) -> SomePacketStatusChunk {
        let bits = value.view_bits::<Msb0>();
        if !bits[0] {
            let run_length = bits[3..].load_be::<u16>().min(max_symbol_count as u16);
            return SomePacketStatusChunk::RunLengthEncodingChunk(RunLengthEncodingChunk {
                symbol: PacketStatusSymbol::from_two_bit(bits[1..3].load_be::<u8>()),
                run_length,
            });
        }
        // Even when the number of packet status symbols is less than the entire 14 bits, the
        // whole chunk is consumed; the symbols that shouldn't be included are dropped here.
        let (symbol_size, symbols) = if !bits[1] {
            let symbols = bits[2..]
                .iter()
                .by_vals()
                .take(max_symbol_count)
                .map(PacketStatusSymbol::from_one_bit)
                .collect();
            (SymbolSize::OneBit, symbols)
        } else {
            let symbols = bits[2..]
                .chunks(2)
                .take(max_symbol_count)
                .map(|symbol_bits| PacketStatusSymbol::from_two_bit(symbol_bits.load_be::<u8>()))
                .collect();
            (SymbolSize::TwoBit, symbols)
        };
        SomePacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
            symbol_size,
            symbols,
        })
    }
}

fn read_some_packet_status_chunk<B: PacketBuffer>(
    buf: &mut B,
    max_symbol_count: usize,
) -> Result<SomePacketStatusChunk> {
    if buf.remaining() < RtcpFbTccFci::CHUNK_SIZE_BYTES {
        return Err(RtpCodecError::TruncatedTccBlock {
            needed: RtcpFbTccFci::CHUNK_SIZE_BYTES,
            remaining: buf.remaining(),
        }
        .into());
    }
    let value = buf.read_u16()?;
    Ok(SomePacketStatusChunk::from_u16(value, max_symbol_count))
}

/// A receive delta, in multiples of [`RtcpFbTccFci::TICK_US`].  The variant always matches the
/// status symbol of the packet it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SomeRecvDelta {
    Small(u8),
    LargeOrNegative(i16),
}

impl SomeRecvDelta {
    pub fn size_bytes(&self) -> usize {
        match self {
            SomeRecvDelta::Small(_) => 1,
            SomeRecvDelta::LargeOrNegative(_) => 2,
        }
    }

    pub fn ticks(&self) -> i64 {
        match self {
            SomeRecvDelta::Small(d) => *d as i64,
            SomeRecvDelta::LargeOrNegative(d) => *d as i64,
        }
    }
}

fn read_some_recv_delta<B: PacketBuffer>(
    buf: &mut B,
    symbol: PacketStatusSymbol,
) -> Result<Option<SomeRecvDelta>> {
    let needed = symbol.delta_size_bytes();
    if buf.remaining() < needed {
        return Err(RtpCodecError::TruncatedTccBlock {
            needed,
            remaining: buf.remaining(),
        }
        .into());
    }
    let delta = match symbol {
        PacketStatusSymbol::NotReceived => None,
        PacketStatusSymbol::ReceivedSmallDelta => Some(SomeRecvDelta::Small(buf.read_u8()?)),
        PacketStatusSymbol::ReceivedLargeOrNegativeDelta => {
            Some(SomeRecvDelta::LargeOrNegative(buf.read_i16()?))
        }
    };
    Ok(delta)
}

fn write_some_recv_delta<B: BufMut>(buf: &mut B, delta: SomeRecvDelta) {
    match delta {
        SomeRecvDelta::Small(d) => buf.put_u8(d),
        SomeRecvDelta::LargeOrNegative(d) => buf.put_i16(d),
    }
}
