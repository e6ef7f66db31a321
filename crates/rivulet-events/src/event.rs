use crate::{AbrEvent, BufferEvent, LoaderEvent};

/// Pipeline event. Each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Abr(AbrEvent),
    Loader(LoaderEvent),
    Buffer(BufferEvent),
}

impl From<AbrEvent> for Event {
    fn from(e: AbrEvent) -> Self {
        Self::Abr(e)
    }
}

impl From<LoaderEvent> for Event {
    fn from(e: LoaderEvent) -> Self {
        Self::Loader(e)
    }
}

impl From<BufferEvent> for Event {
    fn from(e: BufferEvent) -> Self {
        Self::Buffer(e)
    }
}

impl Event {
    /// Media type the event refers to.
    pub fn media(&self) -> rivulet_core::MediaType {
        match self {
            Event::Abr(e) => e.media(),
            Event::Loader(e) => e.media(),
            Event::Buffer(e) => e.media(),
        }
    }
}
