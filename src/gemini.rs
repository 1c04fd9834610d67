//! Streaming chat adapter: Gemini `streamGenerateContent` with Google Search
//! grounding, decoded from server-sent events into text/citation fragments.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::GeminiConfig;
use crate::constants::SYSTEM_INSTRUCTION;
use crate::credentials::ApiKeySource;
use crate::error::{FitStreamError, Result};
use crate::message::{GroundingSource, Message};

/// One incremental piece of a grounded response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    /// Text delta; may be empty when the fragment only carries citations.
    pub text: String,
    /// Full citation set as of this fragment, if the fragment carried one.
    pub citations: Option<Vec<GroundingSource>>,
}

impl ChatChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: None,
        }
    }

    pub fn with_citations(mut self, citations: Vec<GroundingSource>) -> Self {
        self.citations = Some(citations);
        self
    }
}

/// Lazy, finite, single-use sequence of response fragments.
pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(&self, prompt: &str, history: &[Message]) -> Result<ChatStream>;
}

// Request wire types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: SystemInstruction<'a>,
    tools: Vec<Tool>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Serialize)]
struct GoogleSearch {}

// Response wire types

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    grounding_chunks: Option<Vec<GroundingChunk>>,
}

#[derive(Deserialize, Debug)]
struct GroundingChunk {
    web: Option<WebReference>,
}

#[derive(Deserialize, Debug)]
struct WebReference {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl GenerateContentResponse {
    fn into_chunk(self) -> Result<ChatChunk> {
        if let Some(err) = self.error {
            return Err(FitStreamError::Api {
                status: err.code,
                message: err.message,
            });
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(ChatChunk::default());
        };
        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        let citations = candidate
            .grounding_metadata
            .and_then(|m| m.grounding_chunks)
            .map(|chunks| {
                chunks
                    .into_iter()
                    .filter_map(|chunk| {
                        let web = chunk.web?;
                        let uri = web.uri.filter(|u| !u.is_empty())?;
                        let title = web.title.unwrap_or_else(|| uri.clone());
                        Some(GroundingSource { uri, title })
                    })
                    .collect()
            });
        Ok(ChatChunk { text, citations })
    }
}

/// Incremental `text/event-stream` decoder. Bytes may be split anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed raw bytes and return the payloads of every event completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flush whatever is left once the body has ended.
    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            self.line(rest.trim_end_matches('\r'), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Comments, `event:`, `id:` and `retry:` lines carry nothing we use.
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data.is_empty() {
            events.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

struct FragmentState<B> {
    body: BoxStream<'static, reqwest::Result<B>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
    endpoint: String,
}

/// Turn an SSE response body into a stream of chat fragments.
fn decode_fragments<B>(body: BoxStream<'static, reqwest::Result<B>>, endpoint: String) -> ChatStream
where
    B: AsRef<[u8]> + Send + 'static,
{
    let state = FragmentState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
        endpoint,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(payload) = state.pending.pop_front() {
                match serde_json::from_str::<GenerateContentResponse>(&payload) {
                    Ok(response) => {
                        let chunk = response.into_chunk();
                        if let Err(e) = &chunk {
                            error!("Gemini stream reported an error: {}", e);
                            state.pending.clear();
                            state.finished = true;
                        }
                        return Some((chunk, state));
                    }
                    Err(e) => {
                        error!("Unparsable stream payload: {} - Error: {}", payload, e);
                        state.pending.clear();
                        state.finished = true;
                        let err = FitStreamError::Malformed(format!(
                            "stream payload from {}: {}",
                            state.endpoint, e
                        ));
                        return Some((Err(err), state));
                    }
                }
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    error!("Gemini stream error: {}", e);
                    state.finished = true;
                    let endpoint = state.endpoint.clone();
                    return Some((Err(FitStreamError::http(endpoint, e)), state));
                }
                None => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}

/// Grounded chat against the Gemini REST API.
pub struct GeminiChat {
    config: GeminiConfig,
    api_key: Arc<dyn ApiKeySource>,
}

impl GeminiChat {
    pub fn new(config: GeminiConfig, api_key: Arc<dyn ApiKeySource>) -> Self {
        Self { config, api_key }
    }

    fn build_request<'a>(prompt: &'a str, history: &'a [Message]) -> GenerateContentRequest<'a> {
        let mut contents: Vec<Content<'a>> = history
            .iter()
            .filter(|m| !m.text.is_empty())
            .map(|m| Content {
                role: m.role.as_str(),
                parts: vec![TextPart { text: &m.text }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![TextPart { text: prompt }],
        });
        GenerateContentRequest {
            contents,
            system_instruction: SystemInstruction {
                parts: vec![TextPart {
                    text: SYSTEM_INSTRUCTION,
                }],
            },
            tools: vec![Tool {
                google_search: GoogleSearch {},
            }],
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiChat {
    #[instrument(skip(self, history), fields(model = %self.config.chat_model, turns = history.len()))]
    async fn stream_chat(&self, prompt: &str, history: &[Message]) -> Result<ChatStream> {
        let api_key = self.api_key.api_key().ok_or_else(|| {
            error!("Gemini chat requested without an API key");
            FitStreamError::MissingApiKey
        })?;

        // A fresh client per call so a newly selected key takes effect immediately.
        let client = Client::new();
        let endpoint = self.config.endpoint(&format!(
            "v1beta/models/{}:streamGenerateContent",
            self.config.chat_model
        ));
        let request = Self::build_request(prompt, history);

        let response = client
            .post(&endpoint)
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                FitStreamError::http(&endpoint, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Gemini API request failed");
            return Err(FitStreamError::from_api_body(status.as_u16(), &body));
        }

        debug!("Gemini stream opened");
        Ok(decode_fragments(response.bytes_stream().boxed(), endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageId;

    fn fragments_from(parts: Vec<&'static str>) -> ChatStream {
        let body = futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, reqwest::Error>(p.as_bytes().to_vec())),
        )
        .boxed();
        decode_fragments(body, "test".to_string())
    }

    #[test]
    fn test_sse_decoder_handles_split_events() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\r\n\r\ndata: {\"b\":2}\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string()]);
        let events = decoder.push(b"\n");
        assert_eq!(events, vec!["{\"b\":2}".to_string()]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_sse_decoder_joins_multiline_data_and_flushes_tail() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keepalive\nevent: message\ndata: one\ndata: two\n\ndata: tail");
        assert_eq!(events, vec!["one\ntwo".to_string()]);
        assert_eq!(decoder.finish(), vec!["tail".to_string()]);
    }

    #[test]
    fn test_sse_decoder_keeps_split_utf8_intact() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: café\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["café".to_string()]);
    }

    #[test]
    fn test_chunk_extraction_filters_malformed_citations() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Squat "},{"text":"deep"}]},
            "groundingMetadata":{"groundingChunks":[
                {"web":{"uri":"https://a.example","title":"A"}},
                {"retrievedContext":{"uri":"x"}},
                {"web":{"title":"no uri"}},
                {"web":{"uri":"https://b.example"}}
            ]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(payload).unwrap();
        let chunk = response.into_chunk().unwrap();
        assert_eq!(chunk.text, "Squat deep");
        assert_eq!(
            chunk.citations,
            Some(vec![
                GroundingSource::new("https://a.example", "A"),
                GroundingSource::new("https://b.example", "https://b.example"),
            ])
        );
    }

    #[test]
    fn test_chunk_without_metadata_has_no_citations() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#).unwrap();
        let chunk = response.into_chunk().unwrap();
        assert_eq!(chunk.text, "hi");
        assert!(chunk.citations.is_none());
    }

    #[test]
    fn test_request_maps_history_in_order() {
        let history = vec![
            Message::user("How do I squat?"),
            Message::model("Keep your chest up."),
            Message::placeholder(MessageId::new()),
        ];
        let request = GeminiChat::build_request("And lunges?", &history);
        let json = serde_json::to_value(&request).unwrap();
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "Keep your chest up.");
        assert_eq!(contents[2]["parts"][0]["text"], "And lunges?");
        assert!(json["tools"][0].get("googleSearch").is_some());
        assert!(json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("FitStream AI"));
    }

    #[tokio::test]
    async fn test_fragments_yield_every_event_in_order() {
        let stream = fragments_from(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"groundingMetadata\":{\"groundingChunks\":[]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"llo\"}]}}]}",
        ]);
        let chunks: Vec<ChatChunk> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "He");
        assert_eq!(chunks[1].text, "");
        assert_eq!(chunks[1].citations, Some(vec![]));
        assert_eq!(chunks[2].text, "llo");
    }

    #[tokio::test]
    async fn test_unparsable_payload_ends_stream_with_error() {
        let stream = fragments_from(vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"llo\"\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"late\"}]}}]}\n\n",
        ]);
        let items: Vec<Result<ChatChunk>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().text, "He");
        assert!(matches!(items[1], Err(FitStreamError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_in_stream_error_ends_stream() {
        let stream = fragments_from(vec![
            "data: {\"error\":{\"code\":503,\"message\":\"overloaded\"}}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"late\"}]}}]}\n\n",
        ]);
        let items: Vec<Result<ChatChunk>> = stream.collect().await;
        assert_eq!(items.len(), 1);
        let err = items.into_iter().next().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "API request failed with status 503: overloaded");
    }
}
