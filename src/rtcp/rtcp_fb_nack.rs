use anyhow::{Context, Result};
use bytes::BufMut;
use tracing::trace;

use crate::packet_buffer::{PacketBuffer, PacketBufferMut};

/// https://datatracker.ietf.org/doc/html/rfc4585#section-6.2.1
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            PID                |             BLP               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///
/// Packet ID (PID): 16 bits The PID field is used to specify a lost packet.
///
/// bitmask of following lost packets (BLP): 16 bits The BLP allows for
///  reporting losses of any of the 16 RTP packets immediately following
///  the RTP packet indicated by the PID.  Denoting the BLP's least
///  significant bit as bit 1, and its most significant bit as bit 16,
///  then bit i of the bit mask is set to 1 if the receiver has not
///  received RTP packet number (PID+i) (modulo 2^16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackBlock {
    pub packet_id: u16,
    pub blp: u16,
}

impl NackBlock {
    pub const SIZE_BYTES: usize = 4;
    /// The furthest a sequence number can be from the packet id and still be in the same block
    pub const MAX_OFFSET: u16 = 16;

    pub fn new(packet_id: u16) -> Self {
        Self { packet_id, blp: 0 }
    }

    /// Try to mark `seq_num` as missing in this block.  Returns false if it's too far from the
    /// packet id to be represented here.
    fn try_add(&mut self, seq_num: u16) -> bool {
        match seq_num.wrapping_sub(self.packet_id) {
            // Already covered by the packet id itself
            0 => true,
            offset @ 1..=Self::MAX_OFFSET => {
                self.blp |= 1 << (offset - 1);
                true
            }
            _ => false,
        }
    }

    /// All sequence numbers marked as missing by this block, in ascending order starting with the
    /// packet id.
    pub fn missing_seq_nums(&self) -> impl Iterator<Item = u16> + '_ {
        std::iter::once(self.packet_id).chain(
            (0..Self::MAX_OFFSET)
                .filter(|shift_amount| (self.blp >> shift_amount) & 0x1 == 1)
                .map(|shift_amount| self.packet_id.wrapping_add(shift_amount + 1)),
        )
    }

    pub fn read<B: PacketBuffer>(buf: &mut B) -> Result<NackBlock> {
        let packet_id = buf.read_u16().context("packet id")?;
        let blp = buf.read_u16().context("blp")?;
        Ok(NackBlock { packet_id, blp })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.ensure_space(Self::SIZE_BYTES).context("nack block")?;
        buf.put_u16(self.packet_id);
        buf.put_u16(self.blp);
        Ok(())
    }
}

/// Group `missing_seq_nums` into as few [`NackBlock`]s as possible.  The sequence numbers must
/// already be in ascending order (with respect to rollover); duplicates are ignored.
pub fn nack_blocks_from_missing<I: IntoIterator<Item = u16>>(
    missing_seq_nums: I,
) -> Vec<NackBlock> {
    let mut blocks: Vec<NackBlock> = Vec::new();
    for seq_num in missing_seq_nums {
        if !blocks
            .last_mut()
            .is_some_and(|block| block.try_add(seq_num))
        {
            blocks.push(NackBlock::new(seq_num));
        }
    }
    blocks
}

/// Expand `blocks` back into the list of missing sequence numbers, preserving block order.
pub fn missing_from_nack_blocks(blocks: &[NackBlock]) -> Vec<u16> {
    blocks
        .iter()
        .flat_map(|block| block.missing_seq_nums())
        .collect()
}

/// The FCI of a generic NACK feedback message: one or more [`NackBlock`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NackFci {
    pub blocks: Vec<NackBlock>,
}

impl NackFci {
    pub fn from_missing_seq_nums<I: IntoIterator<Item = u16>>(missing_seq_nums: I) -> Self {
        Self {
            blocks: nack_blocks_from_missing(missing_seq_nums),
        }
    }

    pub fn missing_seq_nums(&self) -> Vec<u16> {
        missing_from_nack_blocks(&self.blocks)
    }

    pub fn size_bytes(&self) -> usize {
        self.blocks.len() * NackBlock::SIZE_BYTES
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.ensure_space(self.size_bytes()).context("nack fci")?;
        for block in &self.blocks {
            block.write_to(buf)?;
        }
        Ok(())
    }
}

/// Write the NACK blocks for `missing_seq_nums` to `buf`.
pub fn write_nack_fci<I: IntoIterator<Item = u16>, B: BufMut>(
    missing_seq_nums: I,
    buf: &mut B,
) -> Result<()> {
    NackFci::from_missing_seq_nums(missing_seq_nums).write_to(buf)
}

/// Read NACK blocks until fewer than [`NackBlock::SIZE_BYTES`] remain in `buf`.  [`buf`] should
/// be limited to the FCI of a single feedback message.
pub fn read_nack_fci<B: PacketBuffer>(buf: &mut B) -> Result<NackFci> {
    let mut blocks = Vec::new();
    while buf.remaining() >= NackBlock::SIZE_BYTES {
        let block =
            NackBlock::read(buf).with_context(|| format!("nack block {}", blocks.len()))?;
        blocks.push(block);
    }
    trace!("read {} nack blocks", blocks.len());
    Ok(NackFci { blocks })
}
