pub mod export;
pub mod frame_decoder;
pub mod job_poller;
pub mod streaming_session;

pub use export::{export_with_fallback, ExportError, ExportedFile};
pub use frame_decoder::{Frame, FrameDecoder, FrameParseError};
pub use job_poller::JobPoller;
pub use streaming_session::{SessionError, StreamEnd, StreamOutcome, StreamingChatSession};
