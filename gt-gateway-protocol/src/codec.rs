use crate::frame::{
    crc::crc_itu, Frame, ACCEPTED_STOP_BITS, HEADER_EXTENDED, HEADER_STANDARD, MAX_FRAME_LENGTH,
    MIN_FRAME_LENGTH,
};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Tunable acceptance policy for the frame decoder.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Hard cap on a single frame's total wire size.
    pub max_frame_length: usize,
    /// Reject frames whose CRC mismatches instead of logging.
    pub strict_crc: bool,
    /// Reject frames whose stop bits fall outside the accepted set.
    pub strict_stop_bits: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            max_frame_length: MAX_FRAME_LENGTH,
            strict_crc: false,
            strict_stop_bits: false,
        }
    }
}

/// GT06 frame codec for `tokio_util::codec::Framed`.
///
/// The decode path is deliberately infallible: it yields a frame, asks
/// for more bytes, or advances the buffer past garbage. A malformed
/// burst can therefore never tear down the transport; rejected frame
/// candidates advance the read pointer by a single byte and the scan
/// resumes, which keeps subsequent frames decodable.
#[derive(Debug, Clone, Default)]
pub struct Gt06Codec {
    config: CodecConfig,
}

impl Gt06Codec {
    pub fn new(config: CodecConfig) -> Self {
        Gt06Codec { config }
    }

    fn try_extract(&self, src: &mut BytesMut) -> Option<Frame> {
        while src.len() >= MIN_FRAME_LENGTH {
            // Hunt for a header. Bytes before it are garbage from partial
            // writes or the tail of a rejected frame.
            let Some(at) = find_header(src) else {
                // Keep the last byte: it may be the first half of a
                // header still in flight.
                let garbage = src.len() - 1;
                if garbage > 0 {
                    debug!(skipped = garbage, "no frame header in buffer, discarding");
                    src.advance(garbage);
                }
                return None;
            };
            if at > 0 {
                debug!(skipped = at, "skipped garbage bytes to reach frame header");
                src.advance(at);
            }

            let header = u16::from_be_bytes([src[0], src[1]]);
            let length_field_width = if header == HEADER_EXTENDED { 2 } else { 1 };

            // Header found but the length field is still incomplete.
            if src.len() < 2 + length_field_width {
                return None;
            }

            let length = if length_field_width == 1 {
                src[2] as usize
            } else {
                ((src[2] as usize) << 8) | src[3] as usize
            };
            // Declared length covers protocol + body + serial + crc; the
            // two stop bytes sit outside it.
            let total = 2 + length_field_width + length + 2;

            if length < 5 || total < MIN_FRAME_LENGTH || total > self.config.max_frame_length {
                debug!(length, total, "implausible frame length, advancing one byte");
                src.advance(1);
                continue;
            }

            if src.len() < total {
                return None;
            }

            let stop_bits = u16::from_be_bytes([src[total - 2], src[total - 1]]);
            if !ACCEPTED_STOP_BITS.contains(&stop_bits) {
                if self.config.strict_stop_bits {
                    debug!(stop_bits = format_args!("{stop_bits:04X}"), "rejecting frame with unexpected stop bits");
                    src.advance(1);
                    continue;
                }
                debug!(stop_bits = format_args!("{stop_bits:04X}"), "non-standard stop bits, accepting frame");
            }

            let crc_start = total - 4;
            let reported_crc = u16::from_be_bytes([src[crc_start], src[crc_start + 1]]);
            let computed_crc = crc_itu(&src[2..crc_start]);
            if reported_crc != computed_crc {
                if self.config.strict_crc {
                    debug!(
                        reported = format_args!("{reported_crc:04X}"),
                        computed = format_args!("{computed_crc:04X}"),
                        "rejecting frame with CRC mismatch"
                    );
                    src.advance(1);
                    continue;
                }
                debug!(
                    reported = format_args!("{reported_crc:04X}"),
                    computed = format_args!("{computed_crc:04X}"),
                    "CRC mismatch, accepting frame"
                );
            }

            let raw = src.split_to(total).freeze();
            let protocol = raw[2 + length_field_width];
            let body = raw.slice(2 + length_field_width + 1..crc_start - 2);
            let serial = u16::from_be_bytes([raw[crc_start - 2], raw[crc_start - 1]]);

            return Some(Frame {
                start_bits: header,
                length: length as u16,
                protocol,
                body,
                serial,
                crc: reported_crc,
                stop_bits,
            });
        }
        None
    }
}

fn find_header(buf: &[u8]) -> Option<usize> {
    buf.windows(2)
        .position(|w| (w[0] == 0x78 && w[1] == 0x78) || (w[0] == 0x79 && w[1] == 0x79))
}

impl Decoder for Gt06Codec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.try_extract(src))
    }
}

/// Outbound frames are pre-serialized (`frame::encode`, `build_ack`,
/// `builder::build_command`), so the write half passes bytes through.
impl Encoder<Bytes> for Gt06Codec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
