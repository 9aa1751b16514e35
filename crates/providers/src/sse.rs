//! Streaming plumbing shared by the HTTP providers: SSE framing, tool
//! argument decoding and status-code error mapping.

use dawpilot_core::error::ProviderError;
use tracing::warn;

/// Buffers raw bytes and yields the payload of each complete `data:` line.
///
/// Bytes are buffered until a newline so multi-byte UTF-8 sequences split
/// across network chunks decode correctly.
#[derive(Debug, Default)]
pub(crate) struct SseDataLines {
    buffer: Vec<u8>,
}

impl SseDataLines {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Blank separators, comments and `event:` names carry nothing we need
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }

        payloads
    }
}

/// Parse accumulated tool-call argument text.
///
/// Empty input means "no arguments". Malformed JSON is logged and replaced by
/// an empty object rather than failing the whole response.
pub(crate) fn parse_tool_arguments(tool: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(tool, error = %e, "Malformed tool arguments from model, using {{}}");
            serde_json::json!({})
        }
    }
}

/// Turn a non-success HTTP response into a classified provider error.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status, body = %body, "Provider returned error status");

    match ProviderError::from_status(status, body) {
        ProviderError::RateLimited { .. } => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(0),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_data_lines_across_chunks() {
        let mut sse = SseDataLines::default();
        assert!(sse.push(b"event: ping\ndata: {\"a\"").is_empty());
        let out = sse.push(b":1}\r\n\ndata: [DONE]\n");
        assert_eq!(out, vec![r#"{"a":1}"#.to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let mut sse = SseDataLines::default();
        let out = sse.push(b": keep-alive\n\n\ndata:\n");
        assert!(out.is_empty());
    }

    #[test]
    fn multibyte_split_is_preserved() {
        let mut sse = SseDataLines::default();
        let text = "data: {\"t\":\"é\"}\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(sse.push(&text[..split]).is_empty());
        let out = sse.push(&text[split..]);
        assert_eq!(out, vec![r#"{"t":"é"}"#.to_string()]);
    }

    #[test]
    fn argument_parsing_tolerates_garbage() {
        assert_eq!(parse_tool_arguments("x", ""), serde_json::json!({}));
        assert_eq!(parse_tool_arguments("x", "{\"bpm\": 90"), serde_json::json!({}));
        assert_eq!(
            parse_tool_arguments("x", r#"{"bpm": 90}"#),
            serde_json::json!({"bpm": 90})
        );
    }
}
