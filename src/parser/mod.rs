//! The streaming gadget-call parser.
//!
//! A single-threaded incremental state machine: `OUTSIDE` (plain text),
//! `HEADER`/`BODY` (inside a call). Lines are the unit of recognition — a
//! start marker, an arg marker, and the end marker must each appear alone
//! at the start of a line, so the parser buffers incoming chunks until a
//! full line is available rather than scanning byte-by-byte. This keeps the
//! chunk-partitioning invariant (same events regardless of how the input is
//! split across `feed()` calls) for free, since line reassembly is
//! independent of where chunk boundaries fall.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::MarkerConfig;
use crate::error::Error;
use crate::markers::{resolve_parameters, ParameterTree};

static INVOCATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns the next globally unique auto-generated invocation id
/// (`gadget_1`, `gadget_2`, ...). Shared process-wide so parsers created for
/// different turns never collide.
pub fn next_invocation_id() -> String {
    let n = INVOCATION_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
    format!("gadget_{n}")
}

/// Resets the global invocation counter. Not called by [`Parser::reset`] —
/// tests that need deterministic IDs call this explicitly.
pub fn reset_invocation_counter() {
    INVOCATION_COUNTER.store(0, Ordering::SeqCst);
}

/// One parsed gadget invocation. `parameters` is `None` exactly when
/// `parse_error` is `Some`, per the "event still fires, parameters undefined"
/// emission rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GadgetCall {
    pub gadget_name: String,
    pub invocation_id: String,
    pub dependencies: Vec<String>,
    pub parameters: Option<ParameterTree>,
    pub parse_error: Option<String>,
    pub parameters_raw: Option<String>,
    #[serde(skip)]
    pub(crate) raw_pairs: Vec<(String, String)>,
}

impl GadgetCall {
    /// The flattened `(path, raw value)` pairs that produced `parameters`,
    /// letting a caller re-resolve with a different coercion policy without
    /// re-parsing the wire text.
    pub fn parameters_raw_pairs(&self) -> &[(String, String)] {
        &self.raw_pairs
    }
}

/// An event emitted by the parser, in strict input order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text(String),
    GadgetCall(GadgetCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Outside,
    Body,
}

struct InProgress {
    gadget_name: String,
    invocation_id: String,
    dependencies: Vec<String>,
    arg_pairs: Vec<(String, String)>,
    current_arg: Option<(String, Vec<String>)>,
    raw_lines: Vec<String>,
}

pub struct Parser {
    markers: MarkerConfig,
    buffer: String,
    mode: Mode,
    pending_text_lines: Vec<String>,
    current: Option<InProgress>,
}

impl Parser {
    pub fn new(markers: MarkerConfig) -> Result<Self, Error> {
        markers.validate()?;
        Ok(Self {
            markers,
            buffer: String::new(),
            mode: Mode::Outside,
            pending_text_lines: Vec::new(),
            current: None,
        })
    }

    /// Discards all buffers and partial state. Does **not** reset the
    /// global invocation counter — call [`reset_invocation_counter`]
    /// explicitly for that.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.mode = Mode::Outside;
        self.pending_text_lines.clear();
        self.current = None;
    }

    /// Feeds an arbitrary chunk of text into the parser, returning any
    /// events that become emittable as a result (a chunk may complete zero,
    /// one, or several calls, and may yield no events at all if it only
    /// extends a partial line).
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let raw_line: String = self.buffer.drain(..=pos).collect();
            let mut line = raw_line.strip_suffix('\n').unwrap_or(&raw_line).to_string();
            if line.ends_with('\r') {
                line.pop();
            }
            self.process_line(&line, &mut events);
        }
        events
    }

    /// Ends the stream: processes any trailing partial line as a complete
    /// one, flushes pending text, and emits an unterminated final call (if
    /// one was open) as its own `gadget_call` event.
    pub fn finalize(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut events);
        }
        match self.mode {
            Mode::Outside => self.flush_pending_text(&mut events),
            Mode::Body => {
                if self.current.is_some() {
                    self.close_call(&mut events);
                }
                self.mode = Mode::Outside;
            }
        }
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        match self.mode {
            Mode::Outside => {
                if let Some(header) = line.strip_prefix(self.markers.start_prefix.as_str()) {
                    self.flush_pending_text(events);
                    self.start_call(header);
                } else {
                    self.pending_text_lines.push(line.to_string());
                }
            }
            Mode::Body => {
                if line == self.markers.end_prefix {
                    self.close_call(events);
                    self.mode = Mode::Outside;
                } else if let Some(header) = line.strip_prefix(self.markers.start_prefix.as_str())
                {
                    self.close_call(events);
                    self.start_call(header);
                } else if let Some(path) = line.strip_prefix(self.markers.arg_prefix.as_str()) {
                    self.close_current_arg();
                    self.open_arg(path.trim().to_string());
                } else {
                    self.push_body_line(line);
                }
            }
        }
    }

    fn flush_pending_text(&mut self, events: &mut Vec<StreamEvent>) {
        if !self.pending_text_lines.is_empty() {
            let content = self.pending_text_lines.join("\n");
            self.pending_text_lines.clear();
            events.push(StreamEvent::Text(content));
        }
    }

    fn start_call(&mut self, header: &str) {
        let (name, id, deps) = parse_header(header);
        let invocation_id = id.unwrap_or_else(next_invocation_id);
        self.current = Some(InProgress {
            gadget_name: name,
            invocation_id,
            dependencies: deps,
            arg_pairs: Vec::new(),
            current_arg: None,
            raw_lines: Vec::new(),
        });
        self.mode = Mode::Body;
    }

    fn open_arg(&mut self, path: String) {
        if let Some(call) = &mut self.current {
            call.current_arg = Some((path, Vec::new()));
        }
    }

    fn close_current_arg(&mut self) {
        if let Some(call) = &mut self.current {
            if let Some((path, lines)) = call.current_arg.take() {
                call.arg_pairs.push((path, lines.join("\n")));
            }
        }
    }

    fn push_body_line(&mut self, line: &str) {
        if let Some(call) = &mut self.current {
            call.raw_lines.push(line.to_string());
            if let Some((_, lines)) = &mut call.current_arg {
                lines.push(line.to_string());
            }
        }
    }

    fn close_call(&mut self, events: &mut Vec<StreamEvent>) {
        self.close_current_arg();
        let Some(call) = self.current.take() else {
            return;
        };
        let raw = call.raw_lines.join("\n");
        let resolved = resolve_parameters(&call.arg_pairs);
        let (parameters, parse_error, parameters_raw) = match resolved {
            Ok(tree) => (Some(tree), None, None),
            Err(e) => (None, Some(e.to_string()), Some(raw)),
        };
        events.push(StreamEvent::GadgetCall(GadgetCall {
            gadget_name: call.gadget_name,
            invocation_id: call.invocation_id,
            dependencies: call.dependencies,
            parameters,
            parse_error,
            parameters_raw,
            raw_pairs: call.arg_pairs,
        }));
    }
}

fn parse_header(header: &str) -> (String, Option<String>, Vec<String>) {
    let mut parts = header.splitn(3, ':');
    let name = parts.next().unwrap_or_default().trim().to_string();
    let id = parts
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let deps_part = parts.next().unwrap_or_default();
    let deps = deps_part
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (name, id, deps)
}

/// Strips a single pair of triple-backtick fences (with an optional
/// language tag on the opening line) surrounding `input`, trimming outer
/// whitespace. Leaves `input` trimmed but otherwise unchanged if it is not
/// fenced.
pub fn strip_code_fence(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(nl) = rest.find('\n') {
            let body_and_close = &rest[nl + 1..];
            if let Some(body) = body_and_close.strip_suffix("```") {
                return body.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}
