//! The stream marker engine.
//!
//! The upstream echoes prompt scaffolding before the actual reply and
//! sometimes keeps going with a hallucinated next turn. The engine pulls raw
//! items from the upstream channel and yields only the reply:
//!
//! 1. Nothing is delivered until the reply begins: either the first `A:`
//!    marker shows up (everything up to and including it is dropped), or the
//!    text grows past the begin threshold without one.
//! 2. After that, further `A:` markers are redacted.
//! 3. A terminator (`H:`, and `System:` when enabled) at or after the begin
//!    offset ends the reply; the text before it is delivered and the stream
//!    is abandoned.
//!
//! A trailing fragment that could still grow into a marker is held back
//! until the next item decides it, so a marker split across two items never
//! leaks to the client. Trailing whitespace is held back too, so the blank
//! lines in front of a terminator are never delivered.

use crate::buffer::CacheBuffer;
use crate::matcher::{self, RuleSet};
use std::sync::Arc;
use tokenrelay_core::{Locale, MessageKey, StreamItem, StreamMode, TransformOptions, UpstreamError};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info};

/// Returns `true` once the consumer is gone and pulling should stop.
pub type CancelProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Default number of characters after which a reply is assumed to have begun
/// without an `A:` marker.
pub const DEFAULT_BEGIN_THRESHOLD: usize = 200;

/// Pull-based transformer over one upstream stream.
pub struct MarkerEngine {
    rx: Receiver<StreamItem>,
    options: TransformOptions,
    rules: RuleSet,
    buffer: CacheBuffer,
    began: bool,
    begin_index: usize,
    /// Characters of the snapshot transcript already consumed.
    position: usize,
    begin_threshold: usize,
    cancel: Option<CancelProbe>,
    locale: Locale,
    finished: bool,
}

impl MarkerEngine {
    pub fn new(rx: Receiver<StreamItem>, options: TransformOptions) -> Self {
        Self {
            rx,
            rules: RuleSet::for_options(&options),
            options,
            buffer: CacheBuffer::new(),
            began: false,
            begin_index: 0,
            position: 0,
            begin_threshold: DEFAULT_BEGIN_THRESHOLD,
            cancel: None,
            locale: Locale::default(),
            finished: false,
        }
    }

    pub fn with_cancel(mut self, probe: CancelProbe) -> Self {
        self.cancel = Some(probe);
        self
    }

    pub fn with_begin_threshold(mut self, threshold: usize) -> Self {
        self.begin_threshold = threshold;
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Whether the reply has begun.
    pub fn began(&self) -> bool {
        self.began
    }

    /// Everything delivered so far.
    pub fn delivered(&self) -> &str {
        self.buffer.complete()
    }

    /// Next piece of the reply, `Ok(None)` once the reply is over.
    ///
    /// An upstream error item closes the engine and is returned as-is.
    pub async fn next_chunk(&mut self) -> Result<Option<String>, UpstreamError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if self.buffer.is_closed() {
                self.finished = true;
                return Ok(self.buffer.release(0));
            }

            if self.cancel.as_ref().is_some_and(|probe| probe()) {
                debug!(delivered = self.buffer.complete().len(), "Consumer gone, abandoning stream");
                self.buffer.close();
                self.finished = true;
                return Ok(None);
            }

            match self.rx.recv().await {
                Some(Ok(text)) => {
                    self.ingest(&text);
                    if let Some(chunk) = self.flush() {
                        return Ok(Some(chunk));
                    }
                }
                Some(Err(e)) => {
                    self.buffer.close();
                    self.finished = true;
                    return Err(e);
                }
                None => self.finish_stream(),
            }
        }
    }

    /// Drain the stream and return the whole reply.
    pub async fn collect(mut self) -> Result<String, UpstreamError> {
        while self.next_chunk().await?.is_some() {}
        Ok(self.buffer.complete().to_string())
    }

    fn ingest(&mut self, item: &str) {
        match self.options.mode {
            StreamMode::Delta => self.buffer.push(item),
            StreamMode::Snapshot => {
                let fresh: String = item.chars().skip(self.position).collect();
                self.position = self.position.max(item.chars().count());
                self.buffer.push(&fresh);
            }
        }

        if !self.began {
            self.try_begin();
            if !self.began {
                self.trace("waiting");
                return;
            }
        }

        self.buffer.redact(matcher::ASSISTANT);

        let merged = self.buffer.merged();
        if let Some((at, marker)) = self.rules.first_terminator(&merged, self.begin_index) {
            let key = if marker == matcher::SYSTEM {
                MessageKey::SystemMarker
            } else {
                MessageKey::HumanMarker
            };
            info!(offset = at, "{}", self.locale.text(key));
            self.buffer.terminate_at(at);
        }

        self.trace("ingested");
    }

    fn try_begin(&mut self) {
        if let Some(at) = self.buffer.cache().find(matcher::ASSISTANT) {
            self.buffer.discard_through(at + matcher::ASSISTANT.len());
            self.began = true;
            self.begin_index = self.buffer.complete().len();
            debug!(begin_index = self.begin_index, "Reply began at marker");
        } else if self.buffer.merged().chars().count() > self.begin_threshold {
            self.began = true;
            self.begin_index = self.buffer.merged_len();
            debug!(begin_index = self.begin_index, "Reply began without marker");
        }
    }

    fn flush(&mut self) -> Option<String> {
        if !self.began {
            return None;
        }
        let cache = self.buffer.cache();
        let partial = self.rules.partial_suffix_len(cache);
        let hold = cache.len() - cache[..cache.len() - partial].trim_end().len();
        self.buffer.release(hold)
    }

    fn finish_stream(&mut self) {
        if self.began {
            self.buffer.trim_end();
        } else {
            self.buffer.trim();
        }
        self.buffer.trim_suffix(matcher::ASSISTANT);
        self.buffer.trim_suffix(matcher::SYSTEM);
        self.buffer.trim_end();
        self.buffer.close();
        self.trace("upstream finished");
    }

    fn trace(&self, step: &str) {
        if self.options.debug {
            let merged = self.buffer.merged();
            let (human, system) = sentinel_offsets(&merged);
            info!(
                step,
                began = self.began,
                begin_index = self.begin_index,
                ?human,
                ?system,
                merged = %merged,
                cache = %self.buffer.cache(),
                "Marker engine state"
            );
        }
    }
}

/// Last `H:` and `System:` offsets in `merged`, for debug traces.
fn sentinel_offsets(merged: &str) -> (Option<usize>, Option<usize>) {
    (merged.rfind(matcher::HUMAN), merged.rfind(matcher::SYSTEM))
}
