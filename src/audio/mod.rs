//! Audio source: device capture, frame types, and the buffers between the
//! capture worker and the pipeline worker.

pub mod buffer;
pub mod capture;
pub mod conflict;
pub mod frame;
pub mod queue;
pub mod ring_buffer;

pub use buffer::DictationBuffer;
pub use capture::{spawn_capture_supervisor, AudioEvent, DeviceError};
pub use frame::AudioFrame;
pub use queue::FrameQueue;
pub use ring_buffer::PreRollBuffer;
