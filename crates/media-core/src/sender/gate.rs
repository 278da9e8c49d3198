//! Config-before-data gate
//!
//! A peer cannot decode anything until it has the decoder configuration for
//! that kind. With audio and video attached, both configurations must be out
//! before any data frame of either kind is sent.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::MediaKind;

#[derive(Debug, Default)]
struct KindFlags {
    active: AtomicBool,
    config_sent: AtomicBool,
}

/// Tracks attached kinds and which of them have had their config sent
#[derive(Debug, Default)]
pub struct ConfigGate {
    audio: KindFlags,
    video: KindFlags,
}

impl ConfigGate {
    /// Create a closed gate with nothing attached
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self, kind: MediaKind) -> &KindFlags {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    /// Mark `kind` as attached
    pub fn activate(&self, kind: MediaKind) {
        self.flags(kind).active.store(true, Ordering::Release);
    }

    /// Mark `kind` as detached and forget that its config was sent
    pub fn deactivate(&self, kind: MediaKind) {
        let flags = self.flags(kind);
        flags.active.store(false, Ordering::Release);
        flags.config_sent.store(false, Ordering::Release);
    }

    /// Whether `kind` is attached
    pub fn is_active(&self, kind: MediaKind) -> bool {
        self.flags(kind).active.load(Ordering::Acquire)
    }

    /// Record that the config for `kind` has gone out
    pub fn mark_sent(&self, kind: MediaKind) {
        self.flags(kind).config_sent.store(true, Ordering::Release);
    }

    /// Whether the config for `kind` has gone out
    pub fn is_sent(&self, kind: MediaKind) -> bool {
        self.flags(kind).config_sent.load(Ordering::Acquire)
    }

    /// Whether data frames may be sent
    ///
    /// Recomputed from the currently attached kinds on every call. Closed
    /// while nothing is attached.
    pub fn is_open(&self) -> bool {
        let mut any_active = false;
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if self.is_active(kind) {
                any_active = true;
                if !self.is_sent(kind) {
                    return false;
                }
            }
        }
        any_active
    }

    /// Detach everything
    pub fn reset(&self) {
        self.deactivate(MediaKind::Audio);
        self.deactivate(MediaKind::Video);
    }
}
