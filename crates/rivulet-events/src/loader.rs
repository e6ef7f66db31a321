use rivulet_core::MediaType;

/// Fragment transfer lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum LoaderEvent {
    Started {
        media: MediaType,
        request_id: u64,
        quality: usize,
        start_time: f64,
    },
    Loaded {
        media: MediaType,
        request_id: u64,
        quality: usize,
        start_time: f64,
        bytes: u64,
    },
    Aborted {
        media: MediaType,
        request_id: u64,
        start_time: f64,
    },
    /// Every origin and fallback quality failed for one fragment.
    Exhausted {
        media: MediaType,
        start_time: f64,
        attempts: u32,
    },
}

impl LoaderEvent {
    pub fn media(&self) -> MediaType {
        match self {
            LoaderEvent::Started { media, .. }
            | LoaderEvent::Loaded { media, .. }
            | LoaderEvent::Aborted { media, .. }
            | LoaderEvent::Exhausted { media, .. } => *media,
        }
    }
}
