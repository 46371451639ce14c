//! Streaming response aggregation.
//!
//! A completion stream is a sequence of [`StreamDelta`]s: text fragments to
//! show as they arrive, and tool-call fragments whose argument strings are
//! only complete once the stream ends. [`DeltaAggregator`] does the
//! bookkeeping; [`ResponseStream`] puts it behind a `Stream` of text
//! fragments so a caller can render while the response is still arriving.

use crate::backend::DeltaStream;
use crate::error::LlmError;
use futures::{Stream, StreamExt};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tickertalk_conversation::ToolCall;

/// One incremental unit of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamDelta {
    /// A piece of assistant text.
    Text { text: String },
    /// A piece of a tool call.
    ToolCall(ToolCallFragment),
}

impl StreamDelta {
    /// Creates a text delta.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A partial tool call.
///
/// Providers announce a call with its id and name, then send the argument
/// string in pieces. Later pieces may omit the id; they belong to the call
/// last announced at the same `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Position of the call within the response.
    pub index: u32,
    /// Call id, present at least on the first fragment of a call.
    #[serde(default)]
    pub id: Option<String>,
    /// Tool name, present at least on the first fragment of a call.
    #[serde(default)]
    pub name: Option<String>,
    /// Piece of the serialized argument string.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallFragment {
    /// Creates the opening fragment of a call.
    #[must_use]
    pub fn start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: String::new(),
        }
    }

    /// Creates a continuation fragment carrying more of the arguments.
    #[must_use]
    pub fn arguments(index: u32, arguments: impl Into<String>) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: arguments.into(),
        }
    }

    /// Attaches the call id to this fragment.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl From<ToolCallFragment> for StreamDelta {
    fn from(fragment: ToolCallFragment) -> Self {
        Self::ToolCall(fragment)
    }
}

/// Everything a finished stream produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedResponse {
    /// The concatenated assistant text.
    pub text: String,
    /// Tool calls in order of first appearance.
    pub tool_calls: Vec<ToolCall>,
}

impl AggregatedResponse {
    /// Returns true if the model asked for at least one tool.
    #[must_use]
    pub fn requested_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates deltas into text and complete tool calls.
///
/// Argument strings are concatenated as received and never parsed here.
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    text: String,
    calls: Vec<PendingCall>,
    by_id: HashMap<String, usize>,
    by_index: HashMap<u32, usize>,
}

impl DeltaAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one delta. Returns the text fragment to display, if any.
    pub fn push(&mut self, delta: StreamDelta) -> Option<String> {
        match delta {
            StreamDelta::Text { text } if text.is_empty() => None,
            StreamDelta::Text { text } => {
                self.text.push_str(&text);
                Some(text)
            }
            StreamDelta::ToolCall(fragment) => {
                self.push_tool_fragment(fragment);
                None
            }
        }
    }

    fn push_tool_fragment(&mut self, fragment: ToolCallFragment) {
        let id = fragment.id.filter(|id| !id.is_empty());
        let position = match id {
            Some(id) => match self.by_id.get(&id) {
                Some(&position) => position,
                None => {
                    self.calls.push(PendingCall {
                        id: id.clone(),
                        ..PendingCall::default()
                    });
                    self.by_id.insert(id, self.calls.len() - 1);
                    self.calls.len() - 1
                }
            },
            None => match self.by_index.get(&fragment.index) {
                Some(&position) => position,
                None => {
                    // Anonymous call; an id is assigned in `finish`.
                    self.calls.push(PendingCall::default());
                    self.calls.len() - 1
                }
            },
        };
        self.by_index.insert(fragment.index, position);

        let call = &mut self.calls[position];
        if let Some(name) = fragment.name
            && call.name.is_empty()
        {
            call.name = name;
        }
        call.arguments.push_str(&fragment.arguments);
    }

    /// Finishes aggregation.
    ///
    /// Calls that never received an id get `call_<position>`, suffixed when
    /// the provider already used that id for another call.
    #[must_use]
    pub fn finish(self) -> AggregatedResponse {
        let mut taken: HashSet<String> = self.by_id.into_keys().collect();
        let tool_calls = self
            .calls
            .into_iter()
            .enumerate()
            .map(|(position, call)| {
                let id = if call.id.is_empty() {
                    let mut id = format!("call_{position}");
                    let mut suffix = 1;
                    while taken.contains(&id) {
                        id = format!("call_{position}_{suffix}");
                        suffix += 1;
                    }
                    taken.insert(id.clone());
                    id
                } else {
                    call.id
                };
                ToolCall::new(id, call.name, call.arguments)
            })
            .collect();
        AggregatedResponse {
            text: self.text,
            tool_calls,
        }
    }
}

/// A backend response exposed as a stream of text fragments.
///
/// Tool-call fragments are absorbed silently. Once the stream yields `None`,
/// [`finish`](Self::finish) returns the aggregated response. The stream ends
/// after the first error.
pub struct ResponseStream {
    inner: DeltaStream,
    aggregator: DeltaAggregator,
    done: bool,
}

impl ResponseStream {
    /// Wraps a backend delta stream.
    #[must_use]
    pub fn new(inner: DeltaStream) -> Self {
        Self {
            inner,
            aggregator: DeltaAggregator::new(),
            done: false,
        }
    }

    /// Returns true once the underlying stream is exhausted or failed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the aggregated response.
    ///
    /// Calling this before the stream is exhausted returns what has arrived
    /// so far.
    #[must_use]
    pub fn finish(self) -> AggregatedResponse {
        self.aggregator.finish()
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("aggregator", &self.aggregator)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Stream for ResponseStream {
    type Item = Result<String, Report<LlmError>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(delta)) => {
                    if let Some(text) = this.aggregator.push(delta) {
                        return Poll::Ready(Some(Ok(text)));
                    }
                }
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.done = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
