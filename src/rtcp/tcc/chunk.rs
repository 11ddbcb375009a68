use std::cmp::min;

use crate::rtcp::rtcp_fb_tcc::{
    PacketStatusSymbol, RunLengthEncodingChunk, SomePacketStatusChunk, StatusVectorChunk,
    SymbolSize,
};

const MAX_ONE_BIT_CAPACITY: usize = StatusVectorChunk::MAX_ONE_BIT_CAPACITY;
const MAX_RUN_LENGTH_CAPACITY: usize = RunLengthEncodingChunk::MAX_RUN_LENGTH;

/// Group `symbols` into packet status chunks.
///
/// Working from the front, a run of identical symbols at least as long as the vector chunk that
/// could be used in its place (or one that covers every remaining symbol) is written as a
/// run-length chunk.  Otherwise a status vector chunk is filled: 1-bit symbols if no large delta
/// shows up in the next 14 symbols, 2-bit symbols if one does.  Only the last chunk can end up
/// with unused vector slots.
pub(crate) fn encode_chunks(symbols: &[PacketStatusSymbol]) -> Vec<SomePacketStatusChunk> {
    let mut chunks = Vec::new();
    let mut remaining = symbols;
    while let Some(&first) = remaining.first() {
        let run_length = remaining
            .iter()
            .take(MAX_RUN_LENGTH_CAPACITY)
            .take_while(|s| **s == first)
            .count();
        let symbol_size = if remaining
            .iter()
            .take(MAX_ONE_BIT_CAPACITY)
            .any(|s| *s == PacketStatusSymbol::ReceivedLargeOrNegativeDelta)
        {
            SymbolSize::TwoBit
        } else {
            SymbolSize::OneBit
        };

        let consumed = if run_length >= symbol_size.capacity() || run_length == remaining.len() {
            chunks.push(encode_run_length(first, run_length));
            run_length
        } else {
            let num_symbols = min(symbol_size.capacity(), remaining.len());
            chunks.push(encode_vector(symbol_size, &remaining[..num_symbols]));
            num_symbols
        };
        remaining = &remaining[consumed..];
    }
    chunks
}

fn encode_run_length(symbol: PacketStatusSymbol, run_length: usize) -> SomePacketStatusChunk {
    SomePacketStatusChunk::RunLengthEncodingChunk(RunLengthEncodingChunk {
        symbol,
        run_length: run_length as u16,
    })
}

fn encode_vector(
    symbol_size: SymbolSize,
    symbols: &[PacketStatusSymbol],
) -> SomePacketStatusChunk {
    SomePacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
        symbol_size,
        symbols: symbols.to_vec(),
    })
}
