#![forbid(unsafe_code)]

//! Event bus for the rivulet streaming pipeline.

mod abr;
mod buffer;
mod bus;
mod event;
mod loader;

pub use abr::AbrEvent;
pub use buffer::BufferEvent;
pub use bus::EventBus;
pub use event::Event;
pub use loader::LoaderEvent;
