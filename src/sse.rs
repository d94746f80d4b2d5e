//! Server-sent event framing for workflow streams.
//!
//! [`FrameAssembler`] turns transport chunks of any size into blank-line delimited
//! frames; [`parse_frame`] decodes one frame into a [`WorkflowEvent`].

use crate::{
    errors::Result,
    events::{WorkflowEvent, WorkflowEventKind},
};

const ID_PREFIX: &str = "id: ";
const EVENT_PREFIX: &str = "event: ";
const DATA_PREFIX: &str = "data: ";

/// Incremental splitter from raw body bytes to complete frames.
///
/// Bytes are buffered until a full line is seen and only then decoded, so a
/// multi-byte character split across chunks survives intact. `\n`, `\r` and
/// `\r\n` each end a line, also when a `\r\n` pair is split across chunks.
/// Emitted frames are the frame's lines joined by `\n`, without the
/// terminating blank line.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    line: Vec<u8>,
    frame: String,
    /// Last byte seen was `\r`; a following `\n` belongs to the same terminator.
    after_cr: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every frame it completes, in wire order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        for &byte in chunk {
            let after_cr = std::mem::replace(&mut self.after_cr, false);
            match byte {
                b'\n' if after_cr => {}
                b'\n' => self.end_line(&mut frames),
                b'\r' => {
                    self.after_cr = true;
                    self.end_line(&mut frames);
                }
                _ => self.line.push(byte),
            }
        }
        frames
    }

    /// Flush at end of stream: residual content becomes a final frame even
    /// without its terminating blank line.
    pub fn finish(&mut self) -> Option<String> {
        self.after_cr = false;
        if !self.line.is_empty() {
            let line = self.take_line();
            if !line.is_empty() {
                self.push_line(&line);
            }
        }
        self.take_frame()
    }

    fn end_line(&mut self, frames: &mut Vec<String>) {
        let line = self.take_line();
        if line.is_empty() {
            if let Some(frame) = self.take_frame() {
                frames.push(frame);
            }
        } else {
            self.push_line(&line);
        }
    }

    fn take_line(&mut self) -> String {
        let raw = std::mem::take(&mut self.line);
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn push_line(&mut self, line: &str) {
        if !self.frame.is_empty() {
            self.frame.push('\n');
        }
        self.frame.push_str(line);
    }

    fn take_frame(&mut self) -> Option<String> {
        let frame = std::mem::take(&mut self.frame);
        if frame.trim().is_empty() {
            None
        } else {
            Some(frame)
        }
    }
}

/// Decode one frame into a typed event.
///
/// Fields are read in order of appearance: the `data:` payload is decoded with
/// whatever event kind is current when it is reached, so the server's
/// `id`, `event`, `data` ordering is assumed. Unknown fields and comments are
/// skipped. A malformed payload for a known kind is a decode error.
pub fn parse_frame(frame: &str) -> Result<WorkflowEvent> {
    let mut event = WorkflowEvent::default();

    for line in frame
        .split(|c: char| c == '\n' || c == '\r')
        .filter(|line| !line.trim().is_empty())
    {
        if let Some(rest) = line.strip_prefix(ID_PREFIX) {
            if let Ok(id) = rest.trim().parse::<i64>() {
                event.id = id;
            }
        } else if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
            event.kind = WorkflowEventKind::from_event_name(rest.trim());
        } else if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            event.data = event.kind.decode_data(rest.trim())?;
        }
    }

    Ok(event)
}
