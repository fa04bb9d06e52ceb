mod progress_stream;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;
use crate::core::{ChunkRequest, ProgressCallback, Result, TransportAdapter, UploadError, WholeFileRequest};

pub use progress_stream::CountingStream;

const OCTET_STREAM: &str = "application/octet-stream";

/// multipart/form-data 传输层
#[derive(Clone)]
pub struct MultipartTransport {
    client: Client,
}

impl MultipartTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn create_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_str(name)
                .map_err(|err| UploadError::invalid_config(format!("header {}: {}", name, err)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|err| UploadError::invalid_config(format!("header {}: {}", name, err)))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    async fn post(&self, endpoint: &str, headers: &HashMap<String, String>, form: Form) -> Result<u16> {
        let response = self.client
            .post(endpoint)
            .headers(Self::create_header_map(headers)?)
            .multipart(form)
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl TransportAdapter for MultipartTransport {
    async fn send_chunk(&self, request: &ChunkRequest) -> Result<u16> {
        let part = Part::bytes(request.bytes.to_vec())
            .file_name(request.file_name.clone())
            .mime_str(OCTET_STREAM)?;

        let mut form = Form::new().part("file", part);
        for (name, value) in &request.fields {
            form = form.text(name.clone(), value.clone());
        }

        let status = self.post(&request.endpoint, &request.headers, form).await?;
        debug!(chunk = ?request.field("chunkIndex"), status, "chunk response");
        Ok(status)
    }

    async fn send_whole(&self, request: &WholeFileRequest, on_progress: ProgressCallback) -> Result<u16> {
        let file = match File::open(&request.file_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UploadError::FileMissing(request.file_path.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        let total = file.metadata().await?.len();

        let stream = CountingStream::new(ReaderStream::new(file), total, on_progress);
        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(request.file_name.clone())
            .mime_str(OCTET_STREAM)?;

        let mut form = Form::new();
        for (name, value) in &request.fields {
            form = form.text(name.clone(), value.clone());
        }
        form = form.part("file", part);

        let status = self.post(&request.endpoint, &request.headers, form).await?;
        debug!(file = %request.file_path.display(), status, "upload response");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        headers.insert("X-Client".to_string(), "ferry".to_string());

        let map = MultipartTransport::create_header_map(&headers).unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(map.get("x-client").unwrap(), "ferry");

        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            MultipartTransport::create_header_map(&headers),
            Err(UploadError::InvalidConfig(_))
        ));
    }
}
