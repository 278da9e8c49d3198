//! HEVCDecoderConfigurationRecord (hvcC) parsing

use std::fmt::Write as _;

use tracing::debug;

use super::bit_reader::BitReader;
use crate::error::{CodecError, Result};

/// The only configuration version this parser understands
pub const CONFIGURATION_VERSION: u8 = 1;

/// Reserved value of `length_size_minus_one`
const RESERVED_LENGTH_SIZE: u8 = 2;

/// NAL unit types expected inside hvcC parameter-set arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HevcNalUnitType {
    /// Video parameter set
    Vps,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Prefix SEI
    PrefixSei,
    /// Suffix SEI
    SuffixSei,
}

impl HevcNalUnitType {
    /// Map a raw NAL unit type value to a known parameter-set type
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            32 => Some(Self::Vps),
            33 => Some(Self::Sps),
            34 => Some(Self::Pps),
            39 => Some(Self::PrefixSei),
            40 => Some(Self::SuffixSei),
            _ => None,
        }
    }

    /// Raw NAL unit type value
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Vps => 32,
            Self::Sps => 33,
            Self::Pps => 34,
            Self::PrefixSei => 39,
            Self::SuffixSei => 40,
        }
    }
}

/// One array of NAL units sharing a NAL unit type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalArray {
    /// All NAL units of this type are in the array
    pub array_completeness: bool,
    /// Raw NAL unit type (6 bits)
    pub nal_unit_type: u8,
    /// NAL unit payloads in stream order
    pub nal_units: Vec<Vec<u8>>,
}

impl NalArray {
    /// Whether the type is one of the parameter-set/SEI types hvcC defines
    pub fn is_standard_type(&self) -> bool {
        HevcNalUnitType::from_u8(self.nal_unit_type).is_some()
    }
}

/// Parsed hvcC box contents
///
/// Field names follow ISO/IEC 14496-15.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcDecoderConfigurationRecord {
    pub configuration_version: u8,
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    /// 48-bit constraint indicator flags in the low bits
    pub general_constraint_indicator_flags: u64,
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    pub length_size_minus_one: u8,
    pub nal_arrays: Vec<NalArray>,
}

impl HevcDecoderConfigurationRecord {
    /// Parse a binary hvcC record
    ///
    /// Fails with [`CodecError::MalformedConfig`] if the version byte is not 1,
    /// if the buffer ends before the record does, or if
    /// `length_size_minus_one` holds the reserved value 2. NAL arrays with
    /// non-standard types are kept as-is.
    pub fn demux(data: &[u8]) -> Result<Self> {
        let mut reader = BitReader::new(data);

        let configuration_version = reader.read_u8()?;
        if configuration_version != CONFIGURATION_VERSION {
            return Err(CodecError::malformed_config(format!(
                "unsupported configuration version {}",
                configuration_version
            )));
        }

        let general_profile_space = reader.read_bits(2)? as u8;
        let general_tier_flag = reader.read_flag()?;
        let general_profile_idc = reader.read_bits(5)? as u8;
        let general_profile_compatibility_flags = reader.read_bits(32)?;

        let constraint_high = u64::from(reader.read_bits(16)?);
        let constraint_low = u64::from(reader.read_bits(32)?);
        let general_constraint_indicator_flags = (constraint_high << 32) | constraint_low;

        let general_level_idc = reader.read_u8()?;

        reader.skip_bits(4)?;
        let min_spatial_segmentation_idc = reader.read_bits(12)? as u16;
        reader.skip_bits(6)?;
        let parallelism_type = reader.read_bits(2)? as u8;
        reader.skip_bits(6)?;
        let chroma_format_idc = reader.read_bits(2)? as u8;
        reader.skip_bits(5)?;
        let bit_depth_luma_minus8 = reader.read_bits(3)? as u8;
        reader.skip_bits(5)?;
        let bit_depth_chroma_minus8 = reader.read_bits(3)? as u8;

        let avg_frame_rate = reader.read_u16()?;
        let constant_frame_rate = reader.read_bits(2)? as u8;
        let num_temporal_layers = reader.read_bits(3)? as u8;
        let temporal_id_nested = reader.read_flag()?;
        let length_size_minus_one = reader.read_bits(2)? as u8;

        if length_size_minus_one == RESERVED_LENGTH_SIZE {
            return Err(CodecError::malformed_config(
                "length_size_minus_one uses reserved value 2",
            ));
        }

        let num_of_arrays = reader.read_u8()?;
        let mut nal_arrays = Vec::with_capacity(num_of_arrays as usize);

        for _ in 0..num_of_arrays {
            let array_completeness = reader.read_flag()?;
            reader.skip_bits(1)?;
            let nal_unit_type = reader.read_bits(6)? as u8;
            let num_nalus = reader.read_u16()?;

            let mut nal_units = Vec::with_capacity(num_nalus as usize);
            for _ in 0..num_nalus {
                let nal_unit_length = reader.read_u16()? as usize;
                nal_units.push(reader.read_bytes(nal_unit_length)?);
            }

            let array = NalArray {
                array_completeness,
                nal_unit_type,
                nal_units,
            };
            if !array.is_standard_type() {
                debug!(
                    "hvcC array with non-standard NAL unit type {} ({} units)",
                    nal_unit_type,
                    array.nal_units.len()
                );
            }
            nal_arrays.push(array);
        }

        Ok(Self {
            configuration_version,
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_profile_compatibility_flags,
            general_constraint_indicator_flags,
            general_level_idc,
            min_spatial_segmentation_idc,
            parallelism_type,
            chroma_format_idc,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            avg_frame_rate,
            constant_frame_rate,
            num_temporal_layers,
            temporal_id_nested,
            length_size_minus_one,
            nal_arrays,
        })
    }

    /// NAL units of the given parameter-set type across all arrays
    pub fn nal_units(&self, nal_type: HevcNalUnitType) -> impl Iterator<Item = &[u8]> + '_ {
        let raw = nal_type.to_u8();
        self.nal_arrays
            .iter()
            .filter(move |array| array.nal_unit_type == raw)
            .flat_map(|array| array.nal_units.iter().map(Vec::as_slice))
    }

    /// Byte length of the NAL unit size prefix used in samples
    pub fn nal_length_size(&self) -> usize {
        self.length_size_minus_one as usize + 1
    }

    /// Build an RFC 6381 style codec string, e.g. `hev1.1.6.L93`
    ///
    /// Compatibility flag nibbles are bit-reversed and emitted most
    /// significant nibble first with trailing zero digits removed (the first
    /// digit always stays). Of the six constraint bytes only indices 2..=5
    /// are considered and zero bytes are left out.
    pub fn to_codec_string(&self) -> Result<String> {
        let space = match self.general_profile_space {
            0 => "",
            1 => "A",
            2 => "B",
            3 => "C",
            other => return Err(CodecError::UnknownProfileSpace { space: other }),
        };

        let mut codec = format!("hev1.{}{}", space, self.general_profile_idc);

        codec.push('.');
        codec.push_str(&compatibility_digits(self.general_profile_compatibility_flags));

        let tier = if self.general_tier_flag { 'H' } else { 'L' };
        let _ = write!(codec, ".{}{}", tier, self.general_level_idc);

        let constraint_bytes = self.general_constraint_indicator_flags.to_be_bytes();
        // to_be_bytes yields 8 bytes; the 48-bit field occupies the last six
        for byte in constraint_bytes[2..].iter().skip(2) {
            if *byte != 0 {
                let _ = write!(codec, ".{:02X}", byte);
            }
        }

        Ok(codec)
    }
}

fn compatibility_digits(flags: u32) -> String {
    let mut digits: Vec<char> = (0..8)
        .map(|index| {
            let nibble = ((flags >> (28 - index * 4)) & 0xF) as u8;
            let reversed = reverse_nibble(nibble);
            char::from_digit(u32::from(reversed), 16)
                .unwrap_or('0')
                .to_ascii_uppercase()
        })
        .collect();

    while digits.len() > 1 && digits.last() == Some(&'0') {
        digits.pop();
    }
    digits.into_iter().collect()
}

fn reverse_nibble(nibble: u8) -> u8 {
    ((nibble & 0b0001) << 3) | ((nibble & 0b0010) << 1) | ((nibble & 0b0100) >> 1) | ((nibble & 0b1000) >> 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(space: u8, tier: bool, idc: u8, compat: u32, constraints: u64, level: u8) -> HevcDecoderConfigurationRecord {
        HevcDecoderConfigurationRecord {
            configuration_version: 1,
            general_profile_space: space,
            general_tier_flag: tier,
            general_profile_idc: idc,
            general_profile_compatibility_flags: compat,
            general_constraint_indicator_flags: constraints,
            general_level_idc: level,
            min_spatial_segmentation_idc: 0,
            parallelism_type: 0,
            chroma_format_idc: 1,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            avg_frame_rate: 0,
            constant_frame_rate: 0,
            num_temporal_layers: 1,
            temporal_id_nested: true,
            length_size_minus_one: 3,
            nal_arrays: Vec::new(),
        }
    }

    #[test]
    fn test_main_profile_codec_string() {
        let rec = record(0, false, 1, 0x6000_0000, 0, 93);
        assert_eq!(rec.to_codec_string().unwrap(), "hev1.1.6.L93");
    }

    #[test]
    fn test_profile_space_and_tier() {
        let rec = record(2, true, 2, 0x2000_0000, 0, 120);
        assert_eq!(rec.to_codec_string().unwrap(), "hev1.B2.4.H120");
    }

    #[test]
    fn test_unknown_profile_space() {
        let rec = record(4, false, 1, 0x6000_0000, 0, 93);
        assert!(matches!(
            rec.to_codec_string(),
            Err(CodecError::UnknownProfileSpace { space: 4 })
        ));
    }

    #[test]
    fn test_zero_compatibility_keeps_one_digit() {
        let rec = record(0, false, 1, 0, 0, 93);
        assert_eq!(rec.to_codec_string().unwrap(), "hev1.1.0.L93");
    }

    #[test]
    fn test_constraint_bytes_skip_leading_pair_and_zeros() {
        // bytes: B0 11 | 00 22 00 33
        let rec = record(0, false, 1, 0x6000_0000, 0xB011_0022_0033, 93);
        assert_eq!(rec.to_codec_string().unwrap(), "hev1.1.6.L93.22.33");
    }

    #[test]
    fn test_reverse_nibble() {
        assert_eq!(reverse_nibble(0b0001), 0b1000);
        assert_eq!(reverse_nibble(0b0110), 0b0110);
        assert_eq!(reverse_nibble(0b1100), 0b0011);
    }
}
