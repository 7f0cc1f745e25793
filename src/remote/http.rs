use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::core::{
    BulkResponse, FileSource, MediaRecord, ProgressSink, QueueError, RecordPatch, RemoteStore,
    Result, SourcePayload,
};
use super::stream::CountingStream;

/// 上传体每个 chunk 的大小
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkUpdateRequest<'a> {
    ids: &'a [String],
    patch: &'a RecordPatch,
}

#[derive(Serialize)]
struct BulkDeleteRequest<'a> {
    ids: &'a [String],
}

/// 远端边界的 HTTP 实现。
///
/// 上传走 multipart，载荷以流式提交并在途上报真实字节数；
/// 批量更新/删除各是一次 JSON 调用，逐项结果由服务端返回。
/// 超时由底层 client 负责，以错误的形式浮出。
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Bearer token 鉴权
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| QueueError::internal(format!("invalid endpoint {path}: {err}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(QueueError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upload(&self, file: &FileSource, progress: ProgressSink) -> Result<MediaRecord> {
        let url = self.endpoint("media")?;
        debug!(name = %file.name, size = file.size, "uploading file");

        let body = match &file.payload {
            SourcePayload::Path(path) => {
                let handle = tokio::fs::File::open(path).await?;
                let stream = ReaderStream::with_capacity(handle, CHUNK_SIZE);
                reqwest::Body::wrap_stream(CountingStream::new(stream, progress))
            }
            SourcePayload::Memory(bytes) => {
                let chunks = chunk_bytes(bytes.clone());
                let stream =
                    futures::stream::iter(chunks.into_iter().map(std::io::Result::<Bytes>::Ok));
                reqwest::Body::wrap_stream(CountingStream::new(stream, progress))
            }
        };

        let part = Part::stream_with_length(body, file.size)
            .file_name(file.name.clone())
            .mime_str(&file.mime)?;
        let form = Form::new().part("file", part);

        let response = self
            .authorize(self.client.post(url).multipart(form))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn bulk_update(&self, ids: &[String], patch: &RecordPatch) -> Result<BulkResponse> {
        let url = self.endpoint("media/bulk")?;
        debug!(count = ids.len(), "bulk update");

        let response = self
            .authorize(self.client.patch(url).json(&BulkUpdateRequest { ids, patch }))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn bulk_delete(&self, ids: &[String]) -> Result<BulkResponse> {
        let url = self.endpoint("media/bulk-delete")?;
        debug!(count = ids.len(), "bulk delete");

        let response = self
            .authorize(self.client.post(url).json(&BulkDeleteRequest { ids }))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }
}

/// 把内存载荷切成与文件流一致的 chunk 粒度，保证进度粒度一致
fn chunk_bytes(bytes: Bytes) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / CHUNK_SIZE + 1);
    let mut rest = bytes;
    while rest.len() > CHUNK_SIZE {
        chunks.push(rest.split_to(CHUNK_SIZE));
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_bytes_preserves_content() {
        let data = Bytes::from(vec![7u8; CHUNK_SIZE * 2 + 5]);
        let chunks = chunk_bytes(data.clone());
        assert_eq!(chunks.len(), 3);

        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, data.len());
    }

    #[test]
    fn test_chunk_bytes_empty() {
        assert!(chunk_bytes(Bytes::new()).is_empty());
    }
}
