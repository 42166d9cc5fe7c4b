//! Worker stdout protocol: newline-delimited JSON events.

use serde::Deserialize;

/// Reassembles lines from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed (without the newline).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The residual partial line, if any. Called once when the stream closes.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let s = String::from_utf8_lossy(&rest).trim().to_string();
        (!s.is_empty()).then_some(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    #[serde(rename = "message_end")]
    MessageEnd { message: RawMessage },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMessage {
    role: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<RawUsage>,
    #[serde(default)]
    content: Vec<RawContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input: u64,
    #[serde(default)]
    output: u64,
    #[serde(default)]
    cost: Option<RawCost>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawCost {
    #[serde(default)]
    total: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// One completed assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_total: Option<f64>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    TurnCompleted(AssistantTurn),
    Unknown,
}

impl WorkerEvent {
    /// Decode one line. `None` means the line is not valid JSON for any event shape.
    pub fn decode(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let raw: RawEvent = match serde_json::from_str(line) {
            Ok(ev) => ev,
            Err(e) => {
                // Valid JSON with an unexpected shape is still just an event we don't use.
                return serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .filter(|v| v.is_object())
                    .map(|_| {
                        tracing::trace!(error = %e, "unrecognized worker event shape");
                        WorkerEvent::Unknown
                    });
            }
        };
        match raw {
            RawEvent::MessageEnd { message } if message.role == "assistant" => {
                let text = message
                    .content
                    .iter()
                    .filter(|c| c.kind == "text")
                    .filter_map(|c| c.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n");
                let usage = message.usage;
                Some(WorkerEvent::TurnCompleted(AssistantTurn {
                    model: message.model.filter(|m| !m.trim().is_empty()),
                    input_tokens: usage.as_ref().map(|u| u.input),
                    output_tokens: usage.as_ref().map(|u| u.output),
                    cost_total: usage
                        .as_ref()
                        .and_then(|u| u.cost.as_ref())
                        .map(|c| c.total),
                    text,
                }))
            }
            _ => Some(WorkerEvent::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let mut d = LineDecoder::new();
        assert!(d.push(b"{\"type\":\"a").is_empty());
        assert_eq!(d.push(b"\"}\n{\"type\""), vec!["{\"type\":\"a\"}".to_string()]);
        assert_eq!(
            d.push(b":\"b\"}\r\nfirst\nsecond\n"),
            vec![
                "{\"type\":\"b\"}".to_string(),
                "first".to_string(),
                "second".to_string()
            ]
        );
        assert!(d.finish().is_none());
    }

    #[test]
    fn decoder_flushes_trailing_partial_line() {
        let mut d = LineDecoder::new();
        assert!(d.push(b"one\ntwo").len() == 1);
        assert_eq!(d.finish().as_deref(), Some("two"));
        assert!(d.finish().is_none());
    }

    #[test]
    fn decoder_handles_multibyte_split() {
        let s = "héllo\n".as_bytes();
        let mut d = LineDecoder::new();
        assert!(d.push(&s[..2]).is_empty());
        assert_eq!(d.push(&s[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn decodes_assistant_message_end() {
        let line = r#"{"type":"message_end","message":{"role":"assistant","model":"m-1",
            "usage":{"input":120,"output":30,"cost":{"total":0.0015}},
            "content":[{"type":"text","text":"part one"},{"type":"toolCall","id":"x"},{"type":"text","text":"part two"}]}}"#;
        let line = line.replace('\n', " ");
        match WorkerEvent::decode(&line) {
            Some(WorkerEvent::TurnCompleted(t)) => {
                assert_eq!(t.model.as_deref(), Some("m-1"));
                assert_eq!(t.input_tokens, Some(120));
                assert_eq!(t.output_tokens, Some(30));
                assert_eq!(t.cost_total, Some(0.0015));
                assert_eq!(t.text, "part one\npart two");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn usage_is_optional() {
        let line = r#"{"type":"message_end","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}"#;
        let Some(WorkerEvent::TurnCompleted(t)) = WorkerEvent::decode(line) else {
            panic!("expected a turn");
        };
        assert_eq!(t.input_tokens, None);
        assert_eq!(t.cost_total, None);
        assert_eq!(t.text, "hi");
    }

    #[test]
    fn non_assistant_and_unknown_types_are_ignored() {
        let user = r#"{"type":"message_end","message":{"role":"user","content":[]}}"#;
        assert_eq!(WorkerEvent::decode(user), Some(WorkerEvent::Unknown));
        assert_eq!(
            WorkerEvent::decode(r#"{"type":"tool_execution_start","toolName":"web_fetch"}"#),
            Some(WorkerEvent::Unknown)
        );
        // message_end with a shape we cannot read is still valid JSON.
        assert_eq!(
            WorkerEvent::decode(r#"{"type":"message_end","message":42}"#),
            Some(WorkerEvent::Unknown)
        );
    }

    #[test]
    fn malformed_lines_decode_to_none() {
        assert_eq!(WorkerEvent::decode("not json"), None);
        assert_eq!(WorkerEvent::decode("{\"type\":"), None);
        assert_eq!(WorkerEvent::decode("   "), None);
        assert_eq!(WorkerEvent::decode("[1,2]"), None);
    }
}
