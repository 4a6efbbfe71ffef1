//! Bit-level encoding of DCC packets into half-cycle durations.
//!
//! A DCC "1" bit is two half-cycles of 58 µs; a "0" bit is two half-cycles
//! of at least 100 µs. The encoder turns a composed packet - preamble,
//! each byte framed by a leading "0" start bit, and a trailing "1" end bit
//! - into an ordered list of per-bit durations measured in timer ticks.
//! The waveform generator plays each duration twice (once per half-cycle),
//! toggling the output phase in between.
//!
//! The matching [`decode`] exists for test purposes: framing is stripped
//! and the packet bytes recovered, so `decode(encode(p)) == p` can be
//! checked for any valid packet.

use crate::errors::ErrorCode;
use crate::packets::PacketBytes;
use heapless::Vec;

/// Duration of each half-cycle of a "1" bit, in timer ticks (1 µs).
pub const BIT_ONE_TICKS: u8 = 58;
/// Duration of each half-cycle of a "0" bit, in timer ticks (1 µs).
pub const BIT_ZERO_TICKS: u8 = 100;

/// Preamble length for operations-mode packets.
pub const SHORT_PREAMBLE: u8 = 15;
/// Preamble length for service-mode packets.
pub const LONG_PREAMBLE: u8 = 20;

/// Upper bound on bits per packet: 20 preamble + 7 framed bytes + end bit.
pub const MAX_STREAM_BITS: usize = 96;

/// Encoded packet: one duration per bit, transmission order.
pub type BitStream = Vec<u8, MAX_STREAM_BITS>;

fn push_bit(stream: &mut BitStream, one: bool) -> Result<(), ErrorCode> {
    let ticks = if one { BIT_ONE_TICKS } else { BIT_ZERO_TICKS };
    stream.push(ticks).map_err(|_| ErrorCode::BitstreamOverflow)
}

/// Encode a composed packet into its half-cycle duration list.
///
/// `bytes` is the full packet including the checksum byte. Packets longer
/// than the encoding buffer fail with
/// [`BitstreamOverflow`](ErrorCode::BitstreamOverflow) and are dropped by
/// the caller.
pub fn encode(bytes: &[u8], preamble: u8) -> Result<BitStream, ErrorCode> {
    let mut stream = BitStream::new();
    for _ in 0..preamble {
        push_bit(&mut stream, true)?;
    }
    for &byte in bytes {
        push_bit(&mut stream, false)?; // start bit
        for bit in (0..8).rev() {
            push_bit(&mut stream, byte & (1 << bit) != 0)?;
        }
    }
    push_bit(&mut stream, true)?; // end bit
    Ok(stream)
}

/// Recover packet bytes and preamble length from an encoded stream.
///
/// Used by tests to establish the round-trip law; the firmware itself only
/// ever encodes.
pub fn decode(stream: &[u8]) -> Result<(PacketBytes, u8), ErrorCode> {
    let is_one = |ticks: u8| ticks == BIT_ONE_TICKS;

    let mut pos = 0;
    while pos < stream.len() && is_one(stream[pos]) {
        pos += 1;
    }
    let preamble = pos as u8;
    if preamble < 14 {
        return Err(ErrorCode::BitstreamOverflow);
    }

    let mut bytes = PacketBytes::new();
    loop {
        if pos >= stream.len() {
            return Err(ErrorCode::BitstreamOverflow);
        }
        if is_one(stream[pos]) {
            // End bit: packet complete.
            pos += 1;
            break;
        }
        pos += 1; // start bit
        if pos + 8 > stream.len() {
            return Err(ErrorCode::BitstreamOverflow);
        }
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | is_one(stream[pos]) as u8;
            pos += 1;
        }
        bytes.push(byte).map_err(|_| ErrorCode::BitstreamOverflow)?;
    }
    if pos != stream.len() || bytes.is_empty() {
        return Err(ErrorCode::BitstreamOverflow);
    }
    Ok((bytes, preamble))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{self, Direction};

    #[test]
    fn stream_opens_with_preamble_and_closes_with_one() {
        let pkt = packets::speed_and_direction(3, 14, Direction::Forward).unwrap();
        let stream = encode(&pkt, SHORT_PREAMBLE).unwrap();

        for i in 0..SHORT_PREAMBLE as usize {
            assert_eq!(stream[i], BIT_ONE_TICKS);
        }
        assert_eq!(stream[SHORT_PREAMBLE as usize], BIT_ZERO_TICKS);
        assert_eq!(*stream.last().unwrap(), BIT_ONE_TICKS);
    }

    #[test]
    fn stream_length_accounts_for_framing() {
        let pkt = packets::idle();
        let stream = encode(&pkt, SHORT_PREAMBLE).unwrap();
        // preamble + 3 framed bytes + end bit
        assert_eq!(stream.len(), SHORT_PREAMBLE as usize + 3 * 9 + 1);
    }

    #[test]
    fn round_trip_operations_packet() {
        let pkt = packets::speed_and_direction(2000, 9, Direction::Reverse).unwrap();
        let stream = encode(&pkt, SHORT_PREAMBLE).unwrap();
        let (decoded, preamble) = decode(&stream).unwrap();
        assert_eq!(decoded, pkt);
        assert_eq!(preamble, SHORT_PREAMBLE);
    }

    #[test]
    fn round_trip_service_packet_long_preamble() {
        let pkt = packets::service_write_byte(17, 0xC7).unwrap();
        let stream = encode(&pkt, LONG_PREAMBLE).unwrap();
        let (decoded, preamble) = decode(&stream).unwrap();
        assert_eq!(decoded, pkt);
        assert_eq!(preamble, LONG_PREAMBLE);
    }

    #[test]
    fn msb_is_transmitted_first() {
        let stream = encode(&[0x80], 14).unwrap();
        // After the preamble and start bit, the first data bit is a one.
        assert_eq!(stream[15], BIT_ONE_TICKS);
        assert_eq!(stream[16], BIT_ZERO_TICKS);
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let bytes = [0u8; 9];
        assert_eq!(
            encode(&bytes, LONG_PREAMBLE),
            Err(ErrorCode::BitstreamOverflow)
        );
    }

    #[test]
    fn short_preamble_fails_decode() {
        let stream = encode(&[0xFF, 0x00, 0xFF], 10).unwrap();
        assert!(decode(&stream).is_err());
    }
}
