use rivulet_abr::{AbrReason, SwitchDirection};
use rivulet_core::MediaType;

/// Adaptation decisions.
#[derive(Clone, Debug, PartialEq)]
pub enum AbrEvent {
    /// Quality index changed for one media type.
    QualityChanged {
        media: MediaType,
        from: usize,
        to: usize,
        direction: SwitchDirection,
        reason: AbrReason,
    },
    /// Smoothed throughput estimate after a fragment completed.
    Throughput { media: MediaType, bits_per_second: f64 },
}

impl AbrEvent {
    pub fn media(&self) -> MediaType {
        match self {
            AbrEvent::QualityChanged { media, .. } | AbrEvent::Throughput { media, .. } => *media,
        }
    }
}
