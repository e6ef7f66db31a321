use rivulet_core::MediaType;

/// Buffer controller state changes.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferEvent {
    /// Buffered seconds ahead of the playhead.
    Level { media: MediaType, seconds: f64 },
    Stalled { media: MediaType, position: f64 },
    Resumed { media: MediaType, position: f64 },
    Seeked { media: MediaType, position: f64 },
    /// Playhead jumped over an unbuffered gap.
    GapSkipped { media: MediaType, from: f64, to: f64 },
    /// Live edge resolved to a fragment start time.
    LiveEdgeFound { media: MediaType, time: f64 },
    /// Last fragment of the presentation has been appended.
    StreamCompleted { media: MediaType },
    /// Streaming stopped on an unrecoverable error.
    Failed { media: MediaType, error: String },
}

impl BufferEvent {
    pub fn media(&self) -> MediaType {
        match self {
            BufferEvent::Level { media, .. }
            | BufferEvent::Stalled { media, .. }
            | BufferEvent::Resumed { media, .. }
            | BufferEvent::Seeked { media, .. }
            | BufferEvent::GapSkipped { media, .. }
            | BufferEvent::LiveEdgeFound { media, .. }
            | BufferEvent::StreamCompleted { media }
            | BufferEvent::Failed { media, .. } => *media,
        }
    }
}
