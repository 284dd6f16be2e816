//! Incremental framer for the INDI byte stream
//!
//! The stream is a sequence of top-level elements, not one document, so
//! quick-xml only tokenizes one logical line at a time and the open-tag stack
//! lives here. A logical line ends at a newline that is not inside an
//! unterminated tag, which lets drivers spread attributes over several lines.
//!
//! Inside a `setBLOBVector`/`newBLOBVector`, the line that follows a `oneBLOB`
//! open tag is the base64 payload and is taken verbatim without tokenizing.

use crate::element::ProtocolElement;
use crate::error::FramingError;
use crate::protocol::tags;
use bytes::BytesMut;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::VecDeque;

const STRAY_TEXT_PREVIEW: usize = 64;

#[derive(Debug, Default)]
pub struct StreamFramer {
    buffer: BytesMut,
    stack: Vec<ProtocolElement>,
    ready: VecDeque<ProtocolElement>,
    blob_pending: bool,
    /// Bytes of `buffer` already searched without finding a line end
    scanned: usize,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next completed top-level element, if the buffered bytes hold one
    ///
    /// On error the open-tag stack is discarded and parsing resumes at the
    /// next line; elements completed before the error are still returned by
    /// later calls.
    pub fn next_element(&mut self) -> Result<Option<ProtocolElement>, FramingError> {
        loop {
            if let Some(element) = self.ready.pop_front() {
                return Ok(Some(element));
            }
            let Some(line) = self.take_line() else {
                return Ok(None);
            };
            if self.blob_pending {
                self.attach_payload(&line);
                continue;
            }
            if let Err(e) = self.process_line(&line) {
                tracing::warn!("INDI framing error, resetting parser: {}", e);
                self.stack.clear();
                self.blob_pending = false;
                return Err(e);
            }
        }
    }

    /// Push `bytes` and drain every element they complete
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<ProtocolElement, FramingError>> {
        self.push(bytes);
        let mut out = Vec::new();
        loop {
            match self.next_element() {
                Ok(Some(element)) => out.push(Ok(element)),
                Ok(None) => break,
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    /// Drop all buffered bytes and any partially built element
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stack.clear();
        self.ready.clear();
        self.blob_pending = false;
        self.scanned = 0;
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True while an element is partially received
    pub fn is_mid_element(&self) -> bool {
        !self.stack.is_empty() || self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }

    /// True while waiting for the raw payload line of a BLOB leaf
    pub fn in_blob_payload(&self) -> bool {
        self.blob_pending
    }

    /// Name of the innermost open tag
    pub fn current_tag(&self) -> Option<&str> {
        self.stack.last().map(|e| e.tag_name.as_str())
    }

    fn take_line(&mut self) -> Option<BytesMut> {
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buffer.len();
                return None;
            };
            let end = self.scanned + offset;
            self.scanned = end + 1;
            if !self.blob_pending && tag_left_open(&self.buffer[..end]) {
                continue;
            }
            let mut line = self.buffer.split_to(end + 1);
            line.truncate(end);
            self.scanned = 0;
            return Some(line);
        }
    }

    fn attach_payload(&mut self, line: &[u8]) {
        self.blob_pending = false;
        let payload = trim_ascii_whitespace(line);
        match self.stack.last_mut() {
            Some(leaf) => leaf.payload.extend_from_slice(payload),
            None => tracing::warn!("INDI BLOB payload with no open element, dropped"),
        }
    }

    fn process_line(&mut self, line: &[u8]) -> Result<(), FramingError> {
        let text = std::str::from_utf8(line).map_err(|_| FramingError::InvalidUtf8(line.len()))?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let mut reader = Reader::from_str(text);
        reader.trim_text(true);
        reader.check_end_names(false);

        let mut opened_blob_leaf = false;
        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let element = element_from_start(&start)?;
                    opened_blob_leaf = element.tag_name == tags::ONE_BLOB;
                    self.stack.push(element);
                }
                Ok(Event::Empty(start)) => {
                    let element = element_from_start(&start)?;
                    self.complete(element);
                }
                Ok(Event::End(end)) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    self.close(name)?;
                }
                Ok(Event::Text(raw)) => {
                    let content = match raw.unescape() {
                        Ok(unescaped) => unescaped.into_owned(),
                        Err(_) => String::from_utf8_lossy(&raw).into_owned(),
                    };
                    self.append_text(&content)?;
                }
                Ok(Event::CData(raw)) => {
                    let content = String::from_utf8_lossy(&raw).into_owned();
                    self.append_text(&content)?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(FramingError::MalformedTag(format!("{}: {}", e, text))),
            }
        }

        if opened_blob_leaf && self.blob_leaf_awaiting_payload() {
            self.blob_pending = true;
        }
        Ok(())
    }

    /// A `oneBLOB` opened on this line with nothing after it
    fn blob_leaf_awaiting_payload(&self) -> bool {
        let depth = self.stack.len();
        let leaf = match self.stack.last() {
            Some(leaf) if depth >= 2 && leaf.tag_name == tags::ONE_BLOB => leaf,
            _ => return false,
        };
        if !leaf.payload.is_empty() || leaf.text.is_some() {
            return false;
        }
        let parent = self.stack[depth - 2].tag_name.as_str();
        parent == tags::SET_BLOB_VECTOR || parent == tags::NEW_BLOB_VECTOR
    }

    fn complete(&mut self, element: ProtocolElement) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => self.ready.push_back(element),
        }
    }

    fn close(&mut self, name: String) -> Result<(), FramingError> {
        match self.stack.pop() {
            Some(element) if element.tag_name == name => {
                self.complete(element);
                Ok(())
            }
            Some(element) => Err(FramingError::MismatchedClose {
                expected: element.tag_name,
                found: name,
            }),
            None => Err(FramingError::UnexpectedClose(name)),
        }
    }

    fn append_text(&mut self, content: &str) -> Result<(), FramingError> {
        if content.is_empty() {
            return Ok(());
        }
        match self.stack.last_mut() {
            Some(leaf) if leaf.tag_name == tags::ONE_BLOB => {
                leaf.payload.extend_from_slice(content.as_bytes());
                Ok(())
            }
            Some(element) => {
                element.append_text(content);
                Ok(())
            }
            None => Err(FramingError::StrayText(
                content.chars().take(STRAY_TEXT_PREVIEW).collect(),
            )),
        }
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<ProtocolElement, FramingError> {
    let mut element = ProtocolElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr
            .map_err(|e| FramingError::MalformedTag(format!("<{}>: {}", element.tag_name, e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        element.attributes.insert(key, value);
    }
    Ok(element)
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// True if `line` ends inside a tag (quoted `>` does not close it)
fn tag_left_open(line: &[u8]) -> bool {
    let mut in_tag = false;
    let mut quote: Option<u8> = None;
    for &b in line {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'<' => in_tag = true,
                b'>' => in_tag = false,
                b'\'' | b'"' if in_tag => quote = Some(b),
                _ => {}
            },
        }
    }
    in_tag
}
