use std::borrow::Cow;

/// Rough bytes-per-token ratio used for output budgeting.
pub const APPROX_BYTES_PER_TOKEN: usize = 4;

// ---------------------------------------------------------------------------
// HeadTailBuffer
// ---------------------------------------------------------------------------

/// A bounded rendering of multi-line output: the first and last lines are
/// kept verbatim and everything in between collapses into one marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadTailBuffer {
    /// Number of lines in the original text.
    pub total_lines: usize,
    /// Whether any lines were dropped.
    pub truncated: bool,
    /// Lines kept from the start of the text.
    pub head_lines: usize,
    /// Lines kept from the end of the text.
    pub tail_lines: usize,
    /// The rendered text.
    pub text: String,
}

impl HeadTailBuffer {
    /// Render `text` within `max_lines` lines.
    ///
    /// Lines are the `\n`-terminated pieces of `text`; a trailing piece
    /// without a terminator counts as a line. When the text fits it is
    /// returned unchanged. Otherwise the first `max_lines / 2` lines and the
    /// last `max_lines - max_lines / 2` lines are kept byte-for-byte with an
    /// omission marker between them.
    pub fn build(text: &str, max_lines: usize) -> Self {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let total_lines = lines.len();

        if total_lines <= max_lines {
            return Self {
                total_lines,
                truncated: false,
                head_lines: total_lines,
                tail_lines: 0,
                text: text.to_string(),
            };
        }

        let head_lines = max_lines / 2;
        let tail_lines = max_lines - head_lines;
        let omitted = total_lines - head_lines - tail_lines;

        let mut rendered = String::with_capacity(text.len().min(4096));
        for line in &lines[..head_lines] {
            rendered.push_str(line);
        }
        rendered.push_str(&omission_marker(omitted));
        if tail_lines > 0 {
            rendered.push('\n');
            for line in &lines[total_lines - tail_lines..] {
                rendered.push_str(line);
            }
        }

        Self {
            total_lines,
            truncated: true,
            head_lines,
            tail_lines,
            text: rendered,
        }
    }

    /// Number of lines replaced by the marker.
    pub fn omitted_lines(&self) -> usize {
        if self.truncated {
            self.total_lines - self.head_lines - self.tail_lines
        } else {
            0
        }
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// The single line inserted in place of omitted output.
pub fn omission_marker(omitted: usize) -> String {
    format!("[... {omitted} lines omitted ...]")
}

// ---------------------------------------------------------------------------
// Token budget
// ---------------------------------------------------------------------------

/// Estimate the token count of `text` (`ceil(bytes / 4)`).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(APPROX_BYTES_PER_TOKEN)
}

/// Result of [`truncate_to_token_budget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTruncation<'a> {
    pub text: Cow<'a, str>,
    /// Token estimate of the input.
    pub original_tokens: usize,
    /// Token estimate of the bytes that were cut, zero when nothing was.
    pub tokens_truncated: usize,
}

impl TokenTruncation<'_> {
    pub fn truncated(&self) -> bool {
        self.tokens_truncated > 0
    }
}

/// Cut the middle out of `text` so that roughly `max_tokens` tokens remain.
///
/// The byte budget `max_tokens * 4` is split evenly between a prefix and a
/// suffix, both snapped to UTF-8 character boundaries. A marker line stating
/// the estimated number of removed tokens separates them.
pub fn truncate_to_token_budget(text: &str, max_tokens: usize) -> TokenTruncation<'_> {
    let original_tokens = estimate_tokens(text);
    if original_tokens <= max_tokens {
        return TokenTruncation {
            text: Cow::Borrowed(text),
            original_tokens,
            tokens_truncated: 0,
        };
    }

    let budget = max_tokens.saturating_mul(APPROX_BYTES_PER_TOKEN);
    let head_budget = budget / 2;
    let tail_budget = budget - head_budget;

    let head_end = floor_char_boundary(text, head_budget);
    let tail_start = ceil_char_boundary(text, text.len().saturating_sub(tail_budget)).max(head_end);
    let tokens_truncated = estimate_tokens(&text[head_end..tail_start]).max(1);

    let head = &text[..head_end];
    let tail = &text[tail_start..];
    let mut out = String::with_capacity(head.len() + tail.len() + 48);
    out.push_str(head);
    if !head.is_empty() && !head.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("[... ~{tokens_truncated} tokens truncated ...]"));
    if !tail.is_empty() {
        out.push('\n');
        out.push_str(tail);
    }

    TokenTruncation {
        text: Cow::Owned(out),
        original_tokens,
        tokens_truncated,
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
