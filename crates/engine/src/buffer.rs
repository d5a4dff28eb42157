//! The marker engine's working buffer.
//!
//! `complete` holds everything already handed to the client, `cache` what is
//! still pending. Their concatenation is the reply seen so far, after
//! scaffolding removal and redaction.

/// Delivered text plus pending text.
#[derive(Debug, Clone, Default)]
pub struct CacheBuffer {
    complete: String,
    cache: String,
    closed: bool,
}

impl CacheBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append upstream text. Ignored once closed.
    pub fn push(&mut self, text: &str) {
        if !self.closed {
            self.cache.push_str(text);
        }
    }

    pub fn cache(&self) -> &str {
        &self.cache
    }

    pub fn complete(&self) -> &str {
        &self.complete
    }

    /// Delivered text followed by pending text.
    pub fn merged(&self) -> String {
        let mut merged = String::with_capacity(self.complete.len() + self.cache.len());
        merged.push_str(&self.complete);
        merged.push_str(&self.cache);
        merged
    }

    pub fn merged_len(&self) -> usize {
        self.complete.len() + self.cache.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// No more input is accepted and nothing is held back.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Drop pending text up to byte `end`, then leading whitespace.
    pub fn discard_through(&mut self, end: usize) {
        let rest = self.cache.get(end..).unwrap_or_default().trim_start();
        self.cache = rest.to_string();
    }

    /// Remove every occurrence of `marker` from pending text.
    pub fn redact(&mut self, marker: &str) {
        if self.cache.contains(marker) {
            self.cache = self.cache.replace(marker, "");
        }
    }

    /// Cut pending text at byte `at` of the merged text, drop trailing
    /// whitespace, and close.
    pub fn terminate_at(&mut self, at: usize) {
        let local = at.saturating_sub(self.complete.len());
        if let Some(kept) = self.cache.get(..local) {
            self.cache = kept.trim_end().to_string();
        }
        self.closed = true;
    }

    /// Drop `suffix` from the end of pending text if present.
    pub fn trim_suffix(&mut self, suffix: &str) {
        if let Some(kept) = self.cache.strip_suffix(suffix) {
            self.cache.truncate(kept.len());
        }
    }

    pub fn trim(&mut self) {
        self.cache = self.cache.trim().to_string();
    }

    pub fn trim_end(&mut self) {
        let len = self.cache.trim_end().len();
        self.cache.truncate(len);
    }

    /// Move pending text to `complete`, keeping back the last `hold` bytes
    /// unless the buffer is closed. The first release skips leading
    /// whitespace.
    pub fn release(&mut self, hold: usize) -> Option<String> {
        if self.complete.is_empty() {
            let start = self.cache.len() - self.cache.trim_start().len();
            self.cache.drain(..start);
        }

        let hold = if self.closed { 0 } else { hold.min(self.cache.len()) };
        let split = self.cache.len() - hold;
        if split == 0 || !self.cache.is_char_boundary(split) {
            return None;
        }

        let rest = self.cache.split_off(split);
        let chunk = std::mem::replace(&mut self.cache, rest);
        self.complete.push_str(&chunk);
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_holds_back_and_trims_first_delivery() {
        let mut buf = CacheBuffer::new();
        buf.push("  hello H");
        assert_eq!(buf.release(1).as_deref(), Some("hello "));
        assert_eq!(buf.cache(), "H");
        buf.push("i");
        assert_eq!(buf.release(0).as_deref(), Some("Hi"));
        assert_eq!(buf.complete(), "hello Hi");
        assert_eq!(buf.release(0), None);
    }

    #[test]
    fn whitespace_only_prefix_is_not_released() {
        let mut buf = CacheBuffer::new();
        buf.push("   ");
        assert_eq!(buf.release(0), None);
        buf.push(" text");
        assert_eq!(buf.release(0).as_deref(), Some("text"));
    }

    #[test]
    fn closed_buffer_releases_everything_and_rejects_input() {
        let mut buf = CacheBuffer::new();
        buf.push("abc S");
        buf.close();
        buf.push("ignored");
        assert_eq!(buf.release(1).as_deref(), Some("abc S"));
    }

    #[test]
    fn terminate_uses_merged_offsets() {
        let mut buf = CacheBuffer::new();
        buf.push("one ");
        buf.release(0);
        buf.push("two  H: three");
        let at = buf.merged().find("H:").unwrap();
        buf.terminate_at(at);
        assert!(buf.is_closed());
        assert_eq!(buf.cache(), "two");
        assert_eq!(buf.merged(), "one two");
    }

    #[test]
    fn discard_and_redact() {
        let mut buf = CacheBuffer::new();
        buf.push("Human: q\n\nA:   answer A: more");
        let end = buf.cache().find("A:").unwrap() + 2;
        buf.discard_through(end);
        assert_eq!(buf.cache(), "answer A: more");
        buf.redact("A:");
        assert_eq!(buf.cache(), "answer  more");
    }

    #[test]
    fn trim_suffix_only_strips_exact_suffix() {
        let mut buf = CacheBuffer::new();
        buf.push("reply System:");
        buf.trim_suffix("A:");
        buf.trim_suffix("System:");
        buf.trim_end();
        assert_eq!(buf.cache(), "reply");
    }
}
