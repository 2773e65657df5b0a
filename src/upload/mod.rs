//! Upload leg: turns an inbound audio payload into a streaming multipart
//! request body.

pub mod multipart;
pub mod pipe;
pub mod pump;
pub mod remote;
pub mod source;

pub use multipart::{file_form, transcription_form};
pub use pipe::{PipeFault, PipeReader, PipeWriter, pipe};
pub use pump::UploadPump;
pub use source::{AudioSource, ByteStream, UploadDescriptor};
