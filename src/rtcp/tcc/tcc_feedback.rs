use std::{cell::Cell, collections::BTreeMap};

use anyhow::{Context, Result};
use bytes::BufMut;
use tracing::trace;

use crate::{
    error::RtpCodecError,
    packet_buffer::PacketBuffer,
    rtcp::rtcp_fb_tcc::{read_rtcp_fb_tcc_fci, PacketStatusSymbol, RtcpFbTccFci, SomeRecvDelta},
    util::{seq_num_delta, word_aligned},
};

use super::chunk::encode_chunks;

const TICK_US: i64 = RtcpFbTccFci::TICK_US;
const REFERENCE_TIME_UNIT_US: i64 = RtcpFbTccFci::REFERENCE_TIME_UNIT_MS * 1000;
const REFERENCE_TIME_MASK: i64 = 0xFF_FFFF;

/// The logical contents of a transport-cc feedback message: which packets in a range of transport
/// sequence numbers were received, and when.
///
/// Built up one received packet at a time with [`TccFeedback::add_packet`] (gaps in the sequence
/// numbers are reported as not received), or parsed from the wire with [`read_tcc_feedback`].
/// Receive times are in microseconds, in whatever time base the caller uses.
///
/// Adding packets in increasing sequence number order never shrinks [`TccFeedback::size_bytes`].
/// Filling in a gap can: chunks on either side of it may merge into one.
#[derive(Debug, Clone, Default)]
pub struct TccFeedback {
    feedback_packet_count: u8,
    /// Set when parsed from the wire, so re-serializing keeps the same reference time
    reference_time_us: Option<i64>,
    /// The sequence number the keys in `packets` are relative to
    anchor_seq_num: Option<u16>,
    packets: BTreeMap<i32, Option<i64>>,
    /// The FCI this feedback was parsed from, written back as-is until the feedback changes
    parsed_fci: Option<RtcpFbTccFci>,
    size_bytes: Cell<Option<usize>>,
}

impl TccFeedback {
    pub fn new(feedback_packet_count: u8) -> Self {
        Self {
            feedback_packet_count,
            ..Default::default()
        }
    }

    /// Use `reference_time_us` (rounded down to a multiple of 64ms) as the reference time instead
    /// of deriving it from the first received packet.
    pub fn with_reference_time_us(mut self, reference_time_us: i64) -> Self {
        self.reference_time_us =
            Some(reference_time_us - reference_time_us.rem_euclid(REFERENCE_TIME_UNIT_US));
        self.parsed_fci = None;
        self.size_bytes.set(None);
        self
    }

    /// Record that `seq_num` was received at `timestamp_us`.  Sequence numbers are ordered using
    /// serial number arithmetic relative to the first one added, so they may roll over.
    pub fn add_packet(&mut self, seq_num: u16, timestamp_us: i64) {
        let anchor_seq_num = *self.anchor_seq_num.get_or_insert(seq_num);
        let offset = seq_num_delta(anchor_seq_num, seq_num) as i32;
        self.packets.insert(offset, Some(timestamp_us));
        self.parsed_fci = None;
        self.size_bytes.set(None);
    }

    pub fn feedback_packet_count(&self) -> u8 {
        self.feedback_packet_count
    }

    fn bounds(&self) -> Option<(i32, i32)> {
        let first = *self.packets.first_key_value()?.0;
        let last = *self.packets.last_key_value()?.0;
        Some((first, last))
    }

    fn anchor_seq_num(&self) -> u16 {
        self.anchor_seq_num.unwrap_or_default()
    }

    pub fn base_seq_num(&self) -> u16 {
        let first = self.bounds().map(|(first, _)| first).unwrap_or(0);
        self.anchor_seq_num().wrapping_add(first as u16)
    }

    /// The number of packets this feedback has a status for: every sequence number from the base
    /// through the highest one, received or not.
    pub fn num_packets(&self) -> usize {
        self.bounds()
            .map(|(first, last)| (last - first + 1) as usize)
            .unwrap_or(0)
    }

    pub fn num_received(&self) -> usize {
        self.packets.values().filter(|ts| ts.is_some()).count()
    }

    /// The receive time of `seq_num`, if it's covered by this feedback and was received.
    pub fn receive_time_us(&self, seq_num: u16) -> Option<i64> {
        let (first, last) = self.bounds()?;
        let offset = first + seq_num.wrapping_sub(self.base_seq_num()) as i32;
        if offset > last {
            return None;
        }
        self.packets.get(&offset).copied().flatten()
    }

    /// Every sequence number this feedback covers, in order, along with its receive time in
    /// microseconds (or None if it wasn't received).
    pub fn iter(&self) -> impl Iterator<Item = (u16, Option<i64>)> + '_ {
        let anchor_seq_num = self.anchor_seq_num();
        self.bounds()
            .into_iter()
            .flat_map(|(first, last)| first..=last)
            .map(move |offset| {
                (
                    anchor_seq_num.wrapping_add(offset as u16),
                    self.packets.get(&offset).copied().flatten(),
                )
            })
    }

    /// The reference time in microseconds; always a multiple of 64ms.  Unless one was set
    /// explicitly, this is the receive time of the first received packet, rounded down.
    pub fn reference_time_us(&self) -> i64 {
        if let Some(reference_time_us) = self.reference_time_us {
            return reference_time_us;
        }
        self.packets
            .values()
            .flatten()
            .next()
            .map(|ts| ts - ts.rem_euclid(REFERENCE_TIME_UNIT_US))
            .unwrap_or(0)
    }

    pub fn reference_time_ms(&self) -> i64 {
        self.reference_time_us() / 1000
    }

    /// The receive delta, in ticks, of every packet.  Each delta is relative to the previous
    /// packet's time as it will be decoded, not its exact time, so rounding never accumulates.
    fn delta_ticks(&self) -> impl Iterator<Item = (u16, Option<i64>)> + '_ {
        let mut running_us = self.reference_time_us();
        self.iter().map(move |(seq_num, timestamp_us)| {
            let delta_ticks = timestamp_us.map(|ts| {
                let delta_ticks = (ts - running_us).div_euclid(TICK_US);
                running_us += delta_ticks * TICK_US;
                delta_ticks
            });
            (seq_num, delta_ticks)
        })
    }

    fn symbol(delta_ticks: Option<i64>) -> PacketStatusSymbol {
        match delta_ticks {
            Some(delta_ticks) => PacketStatusSymbol::for_delta_ticks(delta_ticks),
            None => PacketStatusSymbol::NotReceived,
        }
    }

    /// The size of this feedback's FCI on the wire, including padding.  Cached until the next
    /// change.
    pub fn size_bytes(&self) -> usize {
        if let Some(size_bytes) = self.size_bytes.get() {
            return size_bytes;
        }
        if let Some(fci) = &self.parsed_fci {
            let size_bytes = fci.size_bytes();
            self.size_bytes.set(Some(size_bytes));
            return size_bytes;
        }
        let symbols: Vec<PacketStatusSymbol> = self
            .delta_ticks()
            .map(|(_, delta_ticks)| Self::symbol(delta_ticks))
            .collect();
        let deltas_size_bytes: usize = symbols.iter().map(|s| s.delta_size_bytes()).sum();
        let size_bytes = word_aligned(
            RtcpFbTccFci::HEADER_SIZE_BYTES
                + encode_chunks(&symbols).len() * RtcpFbTccFci::CHUNK_SIZE_BYTES
                + deltas_size_bytes,
        );
        self.size_bytes.set(Some(size_bytes));
        size_bytes
    }

    /// Encode this feedback into its wire-level FCI.  Fails if a packet's receive time is too far
    /// from the previous one's to be expressed as a delta, or if it covers more packets than the
    /// status count can hold.  Feedback that was parsed and not changed since gives back the FCI
    /// it was parsed from.
    pub fn to_fci(&self) -> Result<RtcpFbTccFci> {
        if let Some(fci) = &self.parsed_fci {
            return Ok(fci.clone());
        }
        let num_packets = self.num_packets();
        let packet_status_count = u16::try_from(num_packets)
            .map_err(|_| RtpCodecError::TccTooManyPackets { num_packets })?;
        let mut symbols = Vec::with_capacity(num_packets);
        let mut deltas = Vec::with_capacity(self.num_received());
        for (seq_num, delta_ticks) in self.delta_ticks() {
            let symbol = Self::symbol(delta_ticks);
            if let Some(delta_ticks) = delta_ticks {
                let delta = if symbol == PacketStatusSymbol::ReceivedSmallDelta {
                    SomeRecvDelta::Small(delta_ticks as u8)
                } else {
                    let delta_ticks = i16::try_from(delta_ticks).map_err(|_| {
                        RtpCodecError::TccDeltaOutOfRange {
                            seq_num,
                            delta_ticks,
                        }
                    })?;
                    SomeRecvDelta::LargeOrNegative(delta_ticks)
                };
                deltas.push(delta);
            }
            symbols.push(symbol);
        }
        let chunks = encode_chunks(&symbols);
        trace!(
            "encoded transport-cc feedback: {} packets, {} chunks, {} deltas",
            symbols.len(),
            chunks.len(),
            deltas.len()
        );

        Ok(RtcpFbTccFci {
            base_seq_num: self.base_seq_num(),
            packet_status_count,
            reference_time: (self.reference_time_us().div_euclid(REFERENCE_TIME_UNIT_US)
                & REFERENCE_TIME_MASK) as u32,
            feedback_packet_count: self.feedback_packet_count,
            chunks,
            deltas,
        })
    }

    /// Write this feedback's FCI to `buf`, leaving it just past the padding.
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        self.to_fci()
            .and_then(|fci| fci.write_to(buf))
            .context("transport-cc feedback")
    }

    /// Recover the logical feedback from a parsed FCI.  Receive times are rebuilt by adding each
    /// delta to the reference time in turn.
    pub fn from_fci(fci: &RtcpFbTccFci) -> Self {
        let reference_time_us = fci.reference_time as i64 * REFERENCE_TIME_UNIT_US;
        let mut running_us = reference_time_us;
        let packets = fci
            .packet_reports()
            .iter()
            .enumerate()
            .map(|(i, packet_report)| {
                let timestamp_us = packet_report.delta_us().map(|delta_us| {
                    running_us += delta_us;
                    running_us
                });
                (i as i32, timestamp_us)
            })
            .collect();
        Self {
            feedback_packet_count: fci.feedback_packet_count,
            reference_time_us: Some(reference_time_us),
            anchor_seq_num: Some(fci.base_seq_num),
            packets,
            parsed_fci: Some(fci.clone()),
            size_bytes: Cell::new(None),
        }
    }
}

/// Read a transport-cc FCI from `buf` and recover its logical contents.
pub fn read_tcc_feedback<B: PacketBuffer>(buf: &mut B) -> Result<TccFeedback> {
    let fci = read_rtcp_fb_tcc_fci(buf).context("transport-cc feedback")?;
    Ok(TccFeedback::from_fci(&fci))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use proptest::prelude::*;

    use crate::rtcp::rtcp_fb_tcc::{PacketReport, RunLengthEncodingChunk, SomePacketStatusChunk};

    use super::*;

    #[rustfmt::skip]
    const FCI: [u8; 33] = [
        0x00, 0x04, 0x17, 0x29,
        0x29, 0x87, 0x10, 0x01,
        0xa0, 0x00, 0xa0, 0x00,
        0x16, 0xfe, 0xe5, 0x55,
        0xb9, 0x40, 0x2c, 0x78,
        0xff, 0x64, 0x04, 0x04,
        0x00, 0x00, 0x04, 0x00,
        0x04, 0x04, 0x00, 0x1c,
        0x34
    ];

    #[rustfmt::skip]
    const FCI_NEGATIVE_DELTA: [u8; 24] = [
        0x01, 0x81, 0x00, 0x08,
        0x19, 0xAE, 0xE8, 0x45,
        0xD9, 0x55, 0x20, 0x01,
        0xA8, 0xFF, 0xFC, 0x04,
        0x00, 0x50, 0x04, 0x00,
        0x00, 0x00, 0x00, 0x00
    ];

    #[rustfmt::skip]
    const FCI_ALL_2_BIT_VECTOR_CHUNKS: [u8; 40] = [
        // base=4, pkt status count=30
        0x00, 0x04, 0x00, 0x1E,
        // ref time=0x298710, fb pkt count=1
        0x29, 0x87, 0x10, 0x01,
        // 2 bit vector: 1 large + 6 small, twice
        0xe5, 0x55, 0xe5, 0x55,
        // 2 bit vector: 7 not received, twice
        0xc0, 0x00, 0xc0, 0x00,
        // 2 bit vector: 1 large + 1 small
        0xe4, 0x00,
        // Deltas
        0x7d, 0x00, 0x04, 0x04, 0x00, 0x00, 0x04, 0x00,
        0x7d, 0x00, 0x04, 0x04, 0x00, 0x00, 0x04, 0x00,
        0x7d, 0x00, 0x04,
        // Padding
        0x00, 0x00, 0x00
    ];

    #[rustfmt::skip]
    const SEQ_NUMS_AND_TIMESTAMPS_MS: [(u16, i64); 20] = [
        (2585, 1537916094447),
        (2586, 1537916094452),
        (2587, 1537916094475),
        (2588, 1537916094475),
        (2589, 1537916094481),
        (2590, 1537916094481),
        (2591, 1537916094486),
        (2592, 1537916094504),
        (2593, 1537916094504),
        (2594, 1537916094509),
        (2595, 1537916094509),
        (2596, 1537916094515),
        (2597, 1537916094536),
        (2598, 1537916094536),
        (2599, 1537916094542),
        (2600, 1537916094543),
        // 64ms after the previous packet, just too large for a small delta
        (2601, 1537916094607),
        (2602, 1537916094607),
        (2603, 1537916094613),
        (2604, 1537916094614),
    ];

    fn twenty_packet_feedback() -> TccFeedback {
        let mut feedback = TccFeedback::new(136);
        for (seq_num, timestamp_ms) in SEQ_NUMS_AND_TIMESTAMPS_MS {
            feedback.add_packet(seq_num, timestamp_ms * 1000);
        }
        feedback
    }

    #[test]
    fn test_read_one_and_two_bit_symbols() {
        let mut buf = Cursor::new(&FCI[..]);
        let feedback = read_tcc_feedback(&mut buf).unwrap();
        assert_eq!(feedback.reference_time_ms(), 174179328);
        assert_eq!(feedback.feedback_packet_count(), 1);
        assert_eq!(feedback.base_seq_num(), 4);
        assert_eq!(feedback.num_packets(), 5929);
        assert_eq!(feedback.num_received(), 14);
        assert_eq!(feedback.iter().count(), 5929);
        assert_eq!(buf.position(), 33);
    }

    #[test]
    fn test_read_negative_delta() {
        let mut buf = Cursor::new(&FCI_NEGATIVE_DELTA[..]);
        let feedback = read_tcc_feedback(&mut buf).unwrap();
        let reference_time_ms = 1683176i64 << 6;
        assert_eq!(feedback.reference_time_ms(), reference_time_ms);

        let deltas_ms = [42, -1, 1, 0, 20, 1, 0, 0];
        let expected: Vec<(u16, Option<i64>)> = deltas_ms
            .iter()
            .scan(reference_time_ms, |timestamp_ms, delta_ms| {
                *timestamp_ms += delta_ms;
                Some(*timestamp_ms * 1000)
            })
            .enumerate()
            .map(|(i, timestamp_us)| (385 + i as u16, Some(timestamp_us)))
            .collect();
        assert_eq!(feedback.iter().collect::<Vec<_>>(), expected);
        assert_eq!(feedback.receive_time_us(386), Some((reference_time_ms + 41) * 1000));
    }

    #[test]
    fn test_all_2_bit_vector_chunks() {
        let mut buf = Cursor::new(&FCI_ALL_2_BIT_VECTOR_CHUNKS[..]);
        let feedback = read_tcc_feedback(&mut buf).unwrap();
        assert_eq!(buf.position(), 40);
        assert_eq!(feedback.num_packets(), 30);
        assert_eq!(feedback.num_received(), 16);
        assert_eq!(feedback.receive_time_us(18), None);
        assert_eq!(
            feedback.receive_time_us(4),
            Some(feedback.reference_time_us() + 8_000_000)
        );

        // Unchanged since it was parsed, so it's written back exactly as it was read
        let mut written = Vec::new();
        feedback.write_to(&mut written).unwrap();
        assert_eq!(written, FCI_ALL_2_BIT_VECTOR_CHUNKS);
        assert_eq!(feedback.size_bytes(), 40);
    }

    #[test]
    fn test_all_2_bit_vector_chunks_reencoded_after_change() {
        let mut feedback =
            read_tcc_feedback(&mut Cursor::new(&FCI_ALL_2_BIT_VECTOR_CHUNKS[..])).unwrap();
        assert_eq!(feedback.size_bytes(), 40);
        // Re-adding a packet with the time it already has doesn't change the contents, but the
        // chunks have to be rebuilt
        let receive_time_us = feedback.receive_time_us(4).unwrap();
        feedback.add_packet(4, receive_time_us);

        // The two 2-bit chunks of 'not received' are written as a single run length chunk
        let mut written = Vec::new();
        feedback.write_to(&mut written).unwrap();
        #[rustfmt::skip]
        let expected = [
            0x00u8, 0x04, 0x00, 0x1E,
            0x29, 0x87, 0x10, 0x01,
            0xe5, 0x55, 0xe5, 0x55,
            0x00, 0x0e, 0xe4, 0x00,
            0x7d, 0x00, 0x04, 0x04, 0x00, 0x00, 0x04, 0x00,
            0x7d, 0x00, 0x04, 0x04, 0x00, 0x00, 0x04, 0x00,
            0x7d, 0x00, 0x04,
            0x00,
        ];
        assert_eq!(written, expected);
        assert_eq!(feedback.size_bytes(), 36);

        let reparsed = read_tcc_feedback(&mut Cursor::new(&written[..])).unwrap();
        assert_eq!(
            reparsed.iter().collect::<Vec<_>>(),
            feedback.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_receive_time_past_half_the_seq_num_space() {
        // 39999 packets not received, then one received 4 ticks after the reference time
        let not_received = |run_length| {
            SomePacketStatusChunk::RunLengthEncodingChunk(RunLengthEncodingChunk {
                symbol: PacketStatusSymbol::NotReceived,
                run_length,
            })
        };
        let fci = RtcpFbTccFci {
            base_seq_num: 0,
            packet_status_count: 40000,
            reference_time: 0,
            feedback_packet_count: 0,
            chunks: vec![
                not_received(8191),
                not_received(8191),
                not_received(8191),
                not_received(8191),
                not_received(7235),
                SomePacketStatusChunk::RunLengthEncodingChunk(RunLengthEncodingChunk {
                    symbol: PacketStatusSymbol::ReceivedSmallDelta,
                    run_length: 1,
                }),
            ],
            deltas: vec![SomeRecvDelta::Small(4)],
        };
        let feedback = TccFeedback::from_fci(&fci);
        assert_eq!(feedback.num_packets(), 40000);
        assert_eq!(feedback.receive_time_us(39999), Some(1000));
        assert_eq!(feedback.receive_time_us(32768), None);
        assert_eq!(feedback.receive_time_us(40000), None);
        assert_eq!(feedback.iter().last(), Some((39999, Some(1000))));
    }

    #[test]
    fn test_receive_time_outside_range() {
        let mut feedback = TccFeedback::new(0);
        assert_eq!(feedback.receive_time_us(0), None);
        feedback.add_packet(65535, 1_000_000);
        feedback.add_packet(2, 1_001_000);
        assert_eq!(feedback.receive_time_us(65535), Some(1_000_000));
        assert_eq!(feedback.receive_time_us(0), None);
        assert_eq!(feedback.receive_time_us(2), Some(1_001_000));
        assert_eq!(feedback.receive_time_us(3), None);
        assert_eq!(feedback.receive_time_us(65534), None);
    }

    #[test]
    fn test_reference_time() {
        let feedback = twenty_packet_feedback();
        assert_eq!(feedback.reference_time_ms(), (1537916094447i64 >> 6) << 6);
        assert_eq!(feedback.base_seq_num(), 2585);
        assert_eq!(feedback.num_packets(), 20);
        assert_eq!(feedback.num_received(), 20);
    }

    #[test]
    fn test_round_trip_truncates_reference_time() {
        let feedback = twenty_packet_feedback();
        let mut written = Vec::new();
        feedback.write_to(&mut written).unwrap();
        assert_eq!(written.len(), feedback.size_bytes());

        let recreated = read_tcc_feedback(&mut Cursor::new(&written[..])).unwrap();
        // Only 24 bits of the reference time (in units of 64ms) make it onto the wire
        assert_eq!(recreated.reference_time_ms(), 317802432);
        assert_eq!(recreated.feedback_packet_count(), 136);
        assert_eq!(recreated.base_seq_num(), 2585);

        // Receive times keep their offsets from the reference time
        let offsets = |feedback: &TccFeedback| -> Vec<(u16, Option<i64>)> {
            let reference_time_us = feedback.reference_time_us();
            feedback
                .iter()
                .map(|(seq_num, ts)| (seq_num, ts.map(|ts| ts - reference_time_us)))
                .collect()
        };
        assert_eq!(offsets(&recreated), offsets(&feedback));

        // And serializing the parsed feedback reproduces the same bytes
        let mut rewritten = Vec::new();
        recreated.write_to(&mut rewritten).unwrap();
        assert_eq!(rewritten, written);
    }

    #[test]
    fn test_large_delta_on_the_boundary() {
        let fci = twenty_packet_feedback().to_fci().unwrap();
        let reports = fci.packet_reports();
        // 2601 arrived 64ms (256 ticks) after 2600
        assert_eq!(
            reports[16],
            PacketReport::ReceivedPacketLargeOrNegativeDelta {
                seq_num: 2601,
                delta_ticks: 256
            }
        );
    }

    #[test]
    fn test_write_to_existing_buffer() {
        let feedback = twenty_packet_feedback();
        let mut storage = [0u8; 1024];
        {
            let mut buf: &mut [u8] = &mut storage[8..];
            feedback.write_to(&mut buf).unwrap();
            assert_eq!(buf.len(), 1024 - 8 - feedback.size_bytes());
        }
        assert_eq!(&storage[..8], &[0u8; 8]);
        assert_eq!(&storage[8..10], &2585u16.to_be_bytes());
    }

    #[test]
    fn test_write_to_buffer_too_small() {
        let feedback = twenty_packet_feedback();
        let mut storage = [0u8; 8];
        let mut buf: &mut [u8] = &mut storage;
        let err = feedback.write_to(&mut buf).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RtpCodecError>(),
            Some(RtpCodecError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_size_updates_with_each_change() {
        let mut feedback = TccFeedback::new(0);
        let size1 = feedback.size_bytes();
        assert_eq!(size1, 8);

        feedback.add_packet(10, 100_000);
        let size2 = feedback.size_bytes();
        assert!(size2 > size1);

        feedback.add_packet(11, 200_000);
        let size3 = feedback.size_bytes();
        assert!(size3 > size2);
        assert_eq!(size3, 16);
    }

    #[test]
    fn test_gaps_are_not_received() {
        let mut feedback = TccFeedback::new(3);
        feedback.add_packet(100, 1_000_000);
        feedback.add_packet(103, 1_002_000);
        assert_eq!(
            feedback.iter().collect::<Vec<_>>(),
            vec![
                (100, Some(1_000_000)),
                (101, None),
                (102, None),
                (103, Some(1_002_000)),
            ]
        );
        assert_eq!(feedback.num_packets(), 4);
        assert_eq!(feedback.num_received(), 2);
    }

    #[test]
    fn test_seq_num_rollover() {
        let mut feedback = TccFeedback::new(0);
        feedback.add_packet(0, 1_000_000);
        feedback.add_packet(65534, 999_000);
        feedback.add_packet(1, 1_001_000);
        assert_eq!(feedback.base_seq_num(), 65534);
        assert_eq!(
            feedback.iter().map(|(seq_num, _)| seq_num).collect::<Vec<_>>(),
            vec![65534, 65535, 0, 1]
        );

        let mut written = Vec::new();
        feedback.write_to(&mut written).unwrap();
        let recreated = read_tcc_feedback(&mut Cursor::new(&written[..])).unwrap();
        assert_eq!(recreated.base_seq_num(), 65534);
        assert_eq!(recreated.receive_time_us(1), Some(1_001_000));
    }

    #[test]
    fn test_explicit_reference_time() {
        let mut feedback = TccFeedback::new(0).with_reference_time_us(130_000);
        assert_eq!(feedback.reference_time_ms(), 128);
        feedback.add_packet(1, 129_000);
        let fci = feedback.to_fci().unwrap();
        assert_eq!(fci.reference_time, 2);
        assert_eq!(fci.deltas, vec![SomeRecvDelta::Small(4)]);
    }

    #[test]
    fn test_negative_delta_written_as_large() {
        let mut feedback = TccFeedback::new(0);
        feedback.add_packet(1, 64_000);
        feedback.add_packet(2, 63_000);
        let fci = feedback.to_fci().unwrap();
        assert_eq!(
            fci.deltas,
            vec![SomeRecvDelta::Small(0), SomeRecvDelta::LargeOrNegative(-4)]
        );
    }

    #[test]
    fn test_delta_out_of_range() {
        let mut feedback = TccFeedback::new(0);
        feedback.add_packet(1, 0);
        // 10 seconds is 40000 ticks, more than an i16 can hold
        feedback.add_packet(2, 10_000_000);
        let mut buf = Vec::new();
        let err = feedback.write_to(&mut buf).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RtpCodecError>(),
            Some(&RtpCodecError::TccDeltaOutOfRange {
                seq_num: 2,
                delta_ticks: 40000
            })
        );
    }

    #[test]
    fn test_too_many_packets() {
        let mut feedback = TccFeedback::new(0);
        feedback.add_packet(0, 0);
        feedback.add_packet(32767, 1_000);
        feedback.add_packet(32768, 2_000);
        assert_eq!(feedback.num_packets(), 65536);

        let mut buf = Vec::new();
        let err = feedback.write_to(&mut buf).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RtpCodecError>(),
            Some(&RtpCodecError::TccTooManyPackets { num_packets: 65536 })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_filling_a_gap() {
        let mut feedback = TccFeedback::new(0);
        for seq_num in (1000u16..=1040).filter(|seq_num| *seq_num != 1020) {
            feedback.add_packet(seq_num, 1_000_000 + seq_num as i64 * 1_000);
        }
        assert_eq!(feedback.receive_time_us(1020), None);
        let mut written = Vec::new();
        feedback.write_to(&mut written).unwrap();
        assert_eq!(written.len(), feedback.size_bytes());
        assert_eq!(feedback.size_bytes(), 56);

        feedback.add_packet(1020, 2_020_000);
        assert_eq!(feedback.receive_time_us(1020), Some(2_020_000));
        assert_eq!(feedback.num_packets(), 41);
        assert_eq!(feedback.num_received(), 41);
        // Every symbol is now 'received, small delta', so the three chunks around the gap become
        // a single run length chunk and the FCI gets smaller
        let mut written = Vec::new();
        feedback.write_to(&mut written).unwrap();
        assert_eq!(written.len(), feedback.size_bytes());
        assert_eq!(feedback.size_bytes(), 52);

        let recreated = read_tcc_feedback(&mut Cursor::new(&written[..])).unwrap();
        assert_eq!(
            recreated.iter().collect::<Vec<_>>(),
            feedback.iter().collect::<Vec<_>>()
        );
    }

    proptest! {
        #[test]
        fn test_size_never_decreases(
            start_seq_num in any::<u16>(),
            start_us in 0i64..10_000_000_000,
            steps in prop::collection::vec((1u16..5, -20_000i64..200_000), 1..100),
        ) {
            let mut feedback = TccFeedback::new(0);
            let mut seq_num = start_seq_num;
            let mut timestamp_us = start_us;
            feedback.add_packet(seq_num, timestamp_us);
            let mut last_size_bytes = feedback.size_bytes();
            for (seq_num_step, timestamp_step_us) in steps {
                seq_num = seq_num.wrapping_add(seq_num_step);
                timestamp_us += timestamp_step_us;
                feedback.add_packet(seq_num, timestamp_us);
                let size_bytes = feedback.size_bytes();
                prop_assert!(size_bytes >= last_size_bytes);
                last_size_bytes = size_bytes;
            }
        }

        #[test]
        fn test_round_trip(
            start_seq_num in any::<u16>(),
            start_ticks in 0i64..4_000_000_000,
            steps in prop::collection::vec((1u16..20, -100i64..2_000), 1..200),
        ) {
            let mut feedback = TccFeedback::new(7);
            let mut seq_num = start_seq_num;
            let mut ticks = start_ticks;
            feedback.add_packet(seq_num, ticks * TICK_US);
            for (seq_num_step, tick_step) in steps {
                seq_num = seq_num.wrapping_add(seq_num_step);
                ticks += tick_step;
                feedback.add_packet(seq_num, ticks * TICK_US);
            }

            let mut written = Vec::new();
            feedback.write_to(&mut written).unwrap();
            prop_assert_eq!(written.len(), feedback.size_bytes());
            prop_assert_eq!(written.len() % 4, 0);

            let mut buf = Cursor::new(&written[..]);
            let recreated = read_tcc_feedback(&mut buf).unwrap();
            prop_assert_eq!(buf.position() as usize, written.len());
            prop_assert_eq!(recreated.feedback_packet_count(), 7);
            prop_assert_eq!(
                recreated.iter().collect::<Vec<_>>(),
                feedback.iter().collect::<Vec<_>>()
            );
        }
    }
}
