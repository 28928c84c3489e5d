//! reqwest-backed sources talking to the delivery service

use crate::{CacheError, CacheResult, HistorySource, LiveSource, LiveStream, Page};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use message_identity::LiveEvent;
use std::collections::VecDeque;
use uuid::Uuid;

async fn error_for_status(response: reqwest::Response) -> CacheResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CacheError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Clone)]
pub struct HttpHistorySource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHistorySource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch_page(
        &self,
        workspace_id: Uuid,
        conversation_id: Uuid,
        limit: u32,
        before: Option<&str>,
    ) -> CacheResult<Page> {
        let url = format!(
            "{}/api/v1/conversations/{}/messages",
            self.base_url, conversation_id
        );
        let mut query = vec![
            ("limit", limit.to_string()),
            ("workspace_id", workspace_id.to_string()),
        ];
        if let Some(cursor) = before {
            query.push(("before", cursor.to_string()));
        }

        let response = self.client.get(url).query(&query).send().await?;
        let page = error_for_status(response).await?.json::<Page>().await?;
        Ok(page)
    }
}

#[derive(Clone)]
pub struct SseLiveSource {
    client: reqwest::Client,
    base_url: String,
}

impl SseLiveSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl LiveSource for SseLiveSource {
    async fn subscribe(&self, workspace_id: Uuid) -> CacheResult<LiveStream> {
        let url = format!("{}/api/v1/workspaces/{}/live", self.base_url, workspace_id);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(decode_events(body))
    }
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

fn decode_events(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> LiveStream {
    let state = SseState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.pending.pop_front() {
                let event = serde_json::from_str::<LiveEvent>(&data).map_err(CacheError::from);
                return Some((event, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.push(&chunk)),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(CacheError::Http(e)), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

/// Incremental `text/event-stream` parser yielding each event's `data` payload.
///
/// Buffers raw bytes and decodes only complete blocks, so a chunk boundary
/// inside a multibyte character is harmless.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // CR never occurs inside a UTF-8 sequence
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&block);
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|value| value.strip_prefix(' ').unwrap_or(value))
                .collect();
            // comment-only blocks are keep-alives
            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\n\n: ping\n\ndata: {\"b\":2}\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_decoder_joins_multiline_data() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"event: message\r\ndata: line1\r\ndata: line2\r\n\r\n");
        assert_eq!(events, vec!["line1\nline2".to_string()]);
    }

    #[test]
    fn test_decoder_keeps_multibyte_char_split_across_chunks() {
        let frame = "data: {\"content\":\"Áudio\"}\n\n".as_bytes();
        let split = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&frame[..split]).is_empty());
        let events = decoder.push(&frame[split..]);
        assert_eq!(events, vec!["{\"content\":\"Áudio\"}".to_string()]);
    }

    #[test]
    fn test_decoder_handles_crlf_split_between_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: x\r\n\r").is_empty());
        assert_eq!(decoder.push(b"\n"), vec!["x".to_string()]);
    }
}
