mod http;
mod stream;

pub use http::HttpRemoteStore;
pub use stream::CountingStream;
