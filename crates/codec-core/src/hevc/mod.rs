//! HEVC decoder configuration support
//!
//! Parses the binary `HEVCDecoderConfigurationRecord` (the hvcC box body)
//! that encoders attach to their first config emission, and derives the
//! codec identifier string decoders expect.

pub mod bit_reader;
pub mod record;

pub use bit_reader::BitReader;
pub use record::{HevcDecoderConfigurationRecord, HevcNalUnitType, NalArray};

use crate::error::Result;

/// Parse an hvcC record and build its codec string in one step
pub fn codec_string_from_description(description: &[u8]) -> Result<String> {
    HevcDecoderConfigurationRecord::demux(description)?.to_codec_string()
}
