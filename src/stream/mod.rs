//! Stream plumbing: opening generation streams and decoding their frames.

pub mod codec;
pub mod http;
pub mod transport;

pub use codec::FrameCodec;
pub use http::HttpTransport;
pub use transport::{ByteStream, OpenFuture, OpenRequest, StreamTransport};
