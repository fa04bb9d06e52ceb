pub mod chunked;
pub mod multipart;
pub mod simple;

pub use chunked::{chunk_request, ChunkedUploader};
pub use multipart::MultipartTransport;
pub use simple::{whole_file_request, SimpleUploader};
