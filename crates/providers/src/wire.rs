//! Response plumbing shared by the HTTP adapters.

use crate::traits::ProviderError;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

/// Fail on non-2xx with the response body attached.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Split a streaming body into text lines as they arrive.
pub(crate) fn line_stream(response: reqwest::Response) -> BoxStream<'static, Result<String, ProviderError>> {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    let lines = tokio::io::BufReader::new(StreamReader::new(byte_stream)).lines();

    stream::unfold(lines, |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(line), lines)),
            Ok(None) => None,
            Err(e) => Some((Err(ProviderError::Stream(e.to_string())), lines)),
        }
    })
    .boxed()
}
