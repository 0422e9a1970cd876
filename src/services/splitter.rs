// src/services/splitter.rs

//! Multi-record stream splitting for composite feeds.
//!
//! One fetched document can hold thousands of logical entries. The splitter
//! walks the markup as a flat event stream and yields each record as a
//! self-contained document, re-wrapped with the feed's root header so it
//! stays independently parseable. No parse tree is built; memory stays
//! bounded by the largest single record.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::models::Record;

/// One record cut out of a composite document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecord {
    /// Value of the identifying attribute on the record element
    pub id: String,
    /// Complete re-wrapped document bytes
    pub payload: Vec<u8>,
}

impl SplitRecord {
    /// Promote this split record into a forwardable [`Record`].
    pub fn into_record(self, feed_uri: &str, content_type: &str) -> Record {
        let source_id = format!("{}#{}", feed_uri, self.id);
        Record::new(self.payload, source_id, content_type)
    }
}

/// A record currently being buffered.
struct OpenRecord {
    /// Byte offset of the record's `<` in the document
    start: usize,
    /// Identifying attribute value
    id: String,
    /// Depth of child elements below the record element
    nested: usize,
}

/// Lazy, single-pass iterator over the records of one document.
///
/// Tag names that never match the configured root/record names simply never
/// trigger buffering, so an unexpected schema degrades to zero records
/// instead of an error; so does structurally broken markup.
pub struct FeedSplitter<'a> {
    document: &'a [u8],
    reader: Reader<&'a [u8]>,
    root_tag: Vec<u8>,
    record_tag: Vec<u8>,
    id_attr: Vec<u8>,
    /// Exact serialized root start tag, namespaces included
    root_header: Option<Vec<u8>>,
    root_close: Vec<u8>,
    open: Option<OpenRecord>,
    emitted: usize,
}

/// Split one document into independently parseable records.
pub fn split<'a>(
    document: &'a [u8],
    root_tag: &str,
    record_tag: &str,
    id_attr: &str,
) -> FeedSplitter<'a> {
    FeedSplitter {
        document,
        reader: Reader::from_reader(document),
        root_tag: root_tag.as_bytes().to_vec(),
        record_tag: record_tag.as_bytes().to_vec(),
        id_attr: id_attr.as_bytes().to_vec(),
        root_header: None,
        root_close: Vec::new(),
        open: None,
        emitted: 0,
    }
}

impl FeedSplitter<'_> {
    /// Records emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn byte_offset(&self) -> usize {
        self.reader.buffer_position() as usize
    }

    /// The identifying attribute value, or None when the element carries
    /// none and must be skipped.
    fn id_attribute(&self, element: &BytesStart<'_>) -> Option<String> {
        for attr in element.attributes().flatten() {
            if attr.key.as_ref() == self.id_attr.as_slice() {
                return Some(String::from_utf8_lossy(&attr.value).into_owned());
            }
        }
        None
    }

    fn finalize(&mut self, open: OpenRecord, end: usize) -> SplitRecord {
        let header = self.root_header.as_deref().unwrap_or_default();
        let body = &self.document[open.start..end];
        let mut payload = Vec::with_capacity(header.len() + body.len() + self.root_close.len());
        payload.extend_from_slice(header);
        payload.extend_from_slice(body);
        payload.extend_from_slice(&self.root_close);
        self.emitted += 1;
        SplitRecord {
            id: open.id,
            payload,
        }
    }
}

impl Iterator for FeedSplitter<'_> {
    type Item = SplitRecord;

    fn next(&mut self) -> Option<SplitRecord> {
        loop {
            let start = self.byte_offset();
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    // Unparseable remainder: whatever was emitted stands,
                    // the rest of the document yields nothing.
                    log::debug!("Feed markup error at byte {start}: {e}");
                    return None;
                }
            };

            match event {
                Event::Eof => return None,

                Event::Start(element) => {
                    let name = element.name().as_ref().to_vec();

                    if let Some(open) = self.open.as_mut() {
                        open.nested += 1;
                        continue;
                    }

                    if self.root_header.is_none() && name == self.root_tag {
                        // Verbatim capture of the root start tag.
                        let end = self.byte_offset();
                        self.root_header = Some(self.document[start..end].to_vec());
                        let mut close = Vec::with_capacity(name.len() + 3);
                        close.extend_from_slice(b"</");
                        close.extend_from_slice(&name);
                        close.push(b'>');
                        self.root_close = close;
                        continue;
                    }

                    if self.root_header.is_some() && name == self.record_tag {
                        match self.id_attribute(&element) {
                            Some(id) => {
                                self.open = Some(OpenRecord {
                                    start,
                                    id,
                                    nested: 0,
                                });
                            }
                            None => {
                                log::debug!(
                                    "Skipping record without identifying attribute at byte {start}"
                                );
                            }
                        }
                    }
                }

                Event::End(element) => {
                    let Some(mut open) = self.open.take() else {
                        continue;
                    };
                    if open.nested > 0 {
                        open.nested -= 1;
                        self.open = Some(open);
                    } else if element.name().as_ref() == self.record_tag.as_slice() {
                        let end = self.byte_offset();
                        return Some(self.finalize(open, end));
                    } else {
                        // The record's container closed first; drop it.
                        log::debug!("Discarding unterminated record '{}'", open.id);
                    }
                }

                Event::Empty(element) => {
                    if self.open.is_none()
                        && self.root_header.is_some()
                        && element.name().as_ref() == self.record_tag.as_slice()
                    {
                        if let Some(id) = self.id_attribute(&element) {
                            let end = self.byte_offset();
                            let open = OpenRecord {
                                start,
                                id,
                                nested: 0,
                            };
                            return Some(self.finalize(open, end));
                        }
                    }
                }

                _ => {}
            }
        }
    }
}
