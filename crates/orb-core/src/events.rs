// SPDX-License-Identifier: Apache-2.0
//! Sequenced event bus for one agent run: a bounded ring buffer, a
//! subscriber list, and an async iterator that terminates on the run's
//! closing lifecycle event.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

/// One event on the bus. `sequence` is strictly increasing per handler.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub sequence: u64,
    pub event_type: String,
    pub data: Value,
    pub metadata: Value,
}

fn is_terminal(event_type: &str) -> bool {
    matches!(event_type, "lifecycle:end" | "lifecycle:error")
}

/// A sequenced bus with a bounded ring buffer of recent events (for late
/// subscribers to backfill from) and a list of live subscriber channels.
/// Producers never block: a subscriber whose channel is full has its oldest
/// buffered event dropped and a counter incremented.
pub struct StreamHandler {
    sequence: AtomicU64,
    buffer_size: usize,
    recent: Mutex<VecDeque<StreamEvent>>,
    subscribers: Mutex<Vec<mpsc::Sender<StreamEvent>>>,
    dropped_events: AtomicU64,
    channel_capacity: usize,
}

impl StreamHandler {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            buffer_size,
            recent: Mutex::new(VecDeque::with_capacity(buffer_size)),
            subscribers: Mutex::new(Vec::new()),
            dropped_events: AtomicU64::new(0),
            channel_capacity: buffer_size.max(8),
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Emit an event: assign the next sequence number, buffer it, and fan it
    /// out to every live subscriber without blocking.
    pub async fn emit(&self, event_type: impl Into<String>, data: Value, metadata: Value) -> StreamEvent {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = StreamEvent { sequence: seq, event_type: event_type.into(), data, metadata };

        {
            let mut recent = self.recent.lock().await;
            if recent.len() >= self.buffer_size {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        let mut subs = self.subscribers.lock().await;
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        event
    }

    /// Subscribe and get a stream that yields events from now on (not the
    /// backfilled buffer — call `recent_events` first if replay is needed).
    pub async fn subscribe(&self) -> impl Stream<Item = StreamEvent> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.subscribers.lock().await.push(tx);
        ReceiverStream::new(rx)
    }

    pub async fn recent_events(&self) -> Vec<StreamEvent> {
        self.recent.lock().await.iter().cloned().collect()
    }

    /// An async iterator over events that stops after the first terminal
    /// lifecycle event (`lifecycle:end` or `lifecycle:error`).
    pub async fn events(self: Arc<Self>) -> impl Stream<Item = StreamEvent> {
        let inner = self.subscribe().await;
        inner.take_until_terminal()
    }
}

/// Extension used to stop the stream right after (inclusive of) the first
/// terminal lifecycle event, rather than before it.
trait TakeUntilTerminal: Stream<Item = StreamEvent> + Sized {
    fn take_until_terminal(self) -> TakeUntilTerminalStream<Self> {
        TakeUntilTerminalStream { inner: self, done: false }
    }
}

impl<S: Stream<Item = StreamEvent>> TakeUntilTerminal for S {}

struct TakeUntilTerminalStream<S> {
    inner: S,
    done: bool,
}

impl<S: Stream<Item = StreamEvent> + Unpin> Stream for TakeUntilTerminalStream<S> {
    type Item = StreamEvent;

    fn poll_next(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        use std::pin::Pin;
        use std::task::Poll;
        if self.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if is_terminal(&event.event_type) {
                    self.done = true;
                }
                Poll::Ready(Some(event))
            }
            other => other,
        }
    }
}

/// Splits long assistant replies into chunks within `min_chunk_size
/// ..max_chunk_size`, preferring a paragraph, then newline, then sentence
/// boundary before falling back to a forced character cut.
pub struct ChunkingHandler {
    min_chunk_size: usize,
    max_chunk_size: usize,
}

impl ChunkingHandler {
    pub fn new(min_chunk_size: usize, max_chunk_size: usize) -> Self {
        Self { min_chunk_size, max_chunk_size }
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.chars().count() <= self.max_chunk_size {
            return vec![text.to_string()];
        }

        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let remaining = chars.len() - start;
            if remaining <= self.max_chunk_size {
                chunks.push(chars[start..].iter().collect());
                break;
            }

            let window_end = (start + self.max_chunk_size).min(chars.len());
            let window = &chars[start..window_end];
            let split_at = find_break(window, self.min_chunk_size).unwrap_or(window.len());
            let end = start + split_at;
            chunks.push(chars[start..end].iter().collect());
            start = end;
        }

        chunks
    }
}

fn find_break(window: &[char], min_size: usize) -> Option<usize> {
    let search_from = min_size.min(window.len());
    let paragraph = rfind_slice(window, &['\n', '\n'], search_from);
    if let Some(p) = paragraph {
        return Some(p);
    }
    if let Some(pos) = window[search_from..].iter().rposition(|c| *c == '\n') {
        return Some(search_from + pos + 1);
    }
    if let Some(pos) = window[search_from..].iter().rposition(|c| matches!(c, '.' | '!' | '?')) {
        return Some(search_from + pos + 1);
    }
    None
}

fn rfind_slice(window: &[char], pattern: &[char], search_from: usize) -> Option<usize> {
    if window.len() < pattern.len() || search_from >= window.len() {
        return None;
    }
    let mut i = window.len().saturating_sub(pattern.len());
    while i >= search_from {
        if &window[i..i + pattern.len()] == pattern {
            return Some(i + pattern.len());
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }
    None
}
