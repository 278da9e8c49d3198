//! Codec String Mapping
//!
//! This module maps short or legacy codec names, as some peers send them in
//! config frames, to fully qualified codec strings a decoder accepts. It is
//! the fallback used when a codec string cannot be derived from a binary
//! description record.

use std::collections::HashMap;
use tracing::{debug, warn};

/// Prefixes of strings that are already fully qualified
const QUALIFIED_PREFIXES: &[&str] = &["avc1.", "avc3.", "hev1.", "hvc1.", "vp09.", "av01.", "mp4a."];

/// Codec families whose decoder needs a binary description record
const BYTE_CONFIGURED: &[&str] = &["hev1", "hvc1", "hevc", "h265"];

/// Maps codec names to full codec strings
#[derive(Debug, Clone)]
pub struct CodecStringMapper {
    /// Lower-cased short name to full codec string
    name_to_codec: HashMap<String, String>,
}

impl CodecStringMapper {
    /// Create a mapper with the default table
    pub fn new() -> Self {
        let mut mapper = Self {
            name_to_codec: HashMap::new(),
        };

        // Video
        mapper.register("h264", "avc1.42E01F");
        mapper.register("avc", "avc1.42E01F");
        mapper.register("hevc", "hev1.1.6.L93.B0");
        mapper.register("h265", "hev1.1.6.L93.B0");
        mapper.register("vp8", "vp8");
        mapper.register("vp9", "vp09.00.10.08");
        mapper.register("av1", "av01.0.04M.08");

        // Audio
        mapper.register("opus", "opus");
        mapper.register("aac", "mp4a.40.2");
        mapper.register("pcmu", "ulaw");
        mapper.register("pcma", "alaw");

        debug!("Initialized CodecStringMapper with {} names", mapper.name_to_codec.len());
        mapper
    }

    /// Register or replace a mapping
    pub fn register(&mut self, name: &str, codec: &str) {
        self.name_to_codec
            .insert(name.to_ascii_lowercase(), codec.to_string());
    }

    /// Whether `codec` already names a concrete profile
    pub fn is_qualified(codec: &str) -> bool {
        let lower = codec.to_ascii_lowercase();
        QUALIFIED_PREFIXES
            .iter()
            .any(|prefix| lower.starts_with(prefix))
    }

    /// Whether decoders of this family are configured from a description blob
    pub fn is_byte_configured(codec: &str) -> bool {
        let family = codec
            .split('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        BYTE_CONFIGURED.contains(&family.as_str())
    }

    /// Best-effort full codec string for `codec`
    ///
    /// Qualified strings pass through. Unknown names pass through unchanged
    /// with a warning so the decoder can still try them.
    pub fn resolve(&self, codec: &str) -> String {
        if Self::is_qualified(codec) {
            return codec.to_string();
        }

        match self.name_to_codec.get(&codec.to_ascii_lowercase()) {
            Some(mapped) => {
                debug!("Mapped codec '{}' to '{}'", codec, mapped);
                mapped.clone()
            }
            None => {
                warn!("No codec string mapping for '{}', passing through", codec);
                codec.to_string()
            }
        }
    }

    /// Get all registered short names
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.name_to_codec.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CodecStringMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_resolve() {
        let mapper = CodecStringMapper::new();
        assert_eq!(mapper.resolve("H264"), "avc1.42E01F");
        assert_eq!(mapper.resolve("hevc"), "hev1.1.6.L93.B0");
        assert_eq!(mapper.resolve("opus"), "opus");
    }

    #[test]
    fn test_qualified_strings_pass_through() {
        let mapper = CodecStringMapper::new();
        assert_eq!(mapper.resolve("hev1.2.4.L120"), "hev1.2.4.L120");
        assert_eq!(mapper.resolve("avc1.64001F"), "avc1.64001F");
    }

    #[test]
    fn test_unknown_passes_through() {
        let mapper = CodecStringMapper::new();
        assert_eq!(mapper.resolve("theora"), "theora");
    }

    #[test]
    fn test_byte_configured_families() {
        assert!(CodecStringMapper::is_byte_configured("hev1.1.6.L93"));
        assert!(CodecStringMapper::is_byte_configured("HEVC"));
        assert!(!CodecStringMapper::is_byte_configured("avc1.42E01F"));
        assert!(!CodecStringMapper::is_byte_configured("vp8"));
    }

    #[test]
    fn test_register_overrides() {
        let mut mapper = CodecStringMapper::new();
        mapper.register("H264", "avc1.640028");
        assert_eq!(mapper.resolve("h264"), "avc1.640028");
        assert!(mapper.registered_names().contains(&"h264".to_string()));
    }
}
