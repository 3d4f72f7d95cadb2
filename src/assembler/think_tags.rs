//! Streaming extraction of `<think>...</think>` spans.

use crate::types::ContentBlock;

pub const OPEN_TAG: &str = "<think>";
pub const CLOSE_TAG: &str = "</think>";

/// Output of the scanner, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    EnterReasoning,
    Reasoning(String),
    ExitReasoning,
}

/// Incremental think-tag scanner.
///
/// While no marker is found, everything except the last `marker.len() - 1`
/// bytes is released, so a marker split across chunks is still recognised.
/// Output is independent of how the input was chunked.
#[derive(Debug, Default, Clone)]
pub struct ThinkTagScanner {
    buffer: String,
    inside: bool,
}

impl ThinkTagScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside(&self) -> bool {
        self.inside
    }

    /// Bytes held back waiting for a possible marker.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn marker(&self) -> &'static str {
        if self.inside {
            CLOSE_TAG
        } else {
            OPEN_TAG
        }
    }

    fn segment(&self, chunk: String) -> Segment {
        if self.inside {
            Segment::Reasoning(chunk)
        } else {
            Segment::Text(chunk)
        }
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        loop {
            let marker = self.marker();
            if let Some(idx) = self.buffer.find(marker) {
                let before: String = self.buffer.drain(..idx).collect();
                self.buffer.drain(..marker.len());
                if !before.is_empty() {
                    out.push(self.segment(before));
                }
                out.push(if self.inside {
                    Segment::ExitReasoning
                } else {
                    Segment::EnterReasoning
                });
                self.inside = !self.inside;
                continue;
            }

            let keep = marker.len() - 1;
            if self.buffer.len() > keep {
                let mut cut = self.buffer.len() - keep;
                while !self.buffer.is_char_boundary(cut) {
                    cut -= 1;
                }
                if cut > 0 {
                    let head: String = self.buffer.drain(..cut).collect();
                    out.push(self.segment(head));
                }
            }
            return out;
        }
    }

    /// Release held-back bytes without leaving the current sub-state.
    pub fn drain_pending(&mut self) -> Option<Segment> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(self.segment(rest))
    }

    /// End of input: leftover bytes belong to the current sub-state, and an
    /// unterminated reasoning span is closed.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out: Vec<Segment> = self.drain_pending().into_iter().collect();
        if self.inside {
            out.push(Segment::ExitReasoning);
            self.inside = false;
        }
        out
    }
}

/// Split complete content into text and reasoning blocks.
///
/// Never returns an empty list: content with nothing in it yields a single
/// empty text block.
pub fn parse_think_tags(content: &str) -> Vec<ContentBlock> {
    let mut scanner = ThinkTagScanner::new();
    let mut segments = scanner.push(content);
    segments.extend(scanner.finish());

    let mut blocks = Vec::new();
    let mut text = String::new();
    let mut reasoning = String::new();
    for segment in segments {
        match segment {
            Segment::Text(chunk) => text.push_str(&chunk),
            Segment::Reasoning(chunk) => reasoning.push_str(&chunk),
            Segment::EnterReasoning => {
                if !text.is_empty() {
                    blocks.push(ContentBlock::text(std::mem::take(&mut text)));
                }
            }
            Segment::ExitReasoning => {
                if !reasoning.is_empty() {
                    blocks.push(ContentBlock::reasoning(std::mem::take(&mut reasoning)));
                }
            }
        }
    }
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    if blocks.is_empty() {
        blocks.push(ContentBlock::text(""));
    }
    blocks
}
