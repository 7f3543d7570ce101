//! Read-only seekable stream decoding the concatenated text content of an
//! element's descendant text nodes as base64. Book formats embed binary
//! payloads (cover images, fonts) this way; the stream decodes lazily, one
//! 4-character quantum into a 3-byte window, instead of materializing the
//! whole payload.

use std::io::{Read, Seek, SeekFrom};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::document::Document;
use crate::dom::handle::NodeHandle;

/// Characters that participate in decoding; everything else (newlines,
/// indentation) is skipped.
fn is_base64_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'+' || byte == b'/' || byte == b'='
}

pub struct Base64NodeStream<'a> {
    doc: &'a Document,
    nodes: Vec<NodeHandle>,
    size: u64,
    pos: u64,

    node_index: usize,
    current_text: Vec<u8>,
    byte_index: usize,

    window: [u8; 3],
    window_len: usize,
    window_pos: usize,
    finished: bool,
}

impl<'a> Base64NodeStream<'a> {
    /// Builds a stream over the text content below `root` (usually a
    /// `<binary>`-style element). The decoded size is computed up front so
    /// `SeekFrom::End` works without decoding.
    pub fn new(doc: &'a Document, root: NodeHandle) -> Self {
        let nodes = collect_text_nodes(doc, root);

        let mut chars = 0u64;
        let mut padding = 0u64;
        for &node in &nodes {
            for byte in doc.text(node).bytes().filter(|&b| is_base64_char(b)) {
                chars += 1;
                if byte == b'=' {
                    padding += 1;
                }
            }
        }
        let size = (chars / 4) * 3 - padding.min(2);

        let mut stream = Self {
            doc,
            nodes,
            size,
            pos: 0,
            node_index: 0,
            current_text: Vec::new(),
            byte_index: 0,
            window: [0; 3],
            window_len: 0,
            window_pos: 0,
            finished: false,
        };
        stream.load_node(0);
        stream
    }

    /// Decoded payload size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn load_node(&mut self, index: usize) {
        self.node_index = index;
        self.byte_index = 0;
        self.current_text = match self.nodes.get(index) {
            Some(&node) => self.doc.text(node).into_bytes(),
            None => Vec::new(),
        };
    }

    /// Next base64-alphabet character, hopping across text nodes.
    fn next_char(&mut self) -> Option<u8> {
        loop {
            match self.current_text.get(self.byte_index) {
                Some(&byte) => {
                    self.byte_index += 1;
                    if is_base64_char(byte) {
                        return Some(byte);
                    }
                }
                None => {
                    if self.node_index + 1 >= self.nodes.len() {
                        return None;
                    }
                    self.load_node(self.node_index + 1);
                }
            }
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        if self.window_pos < self.window_len {
            let byte = self.window[self.window_pos];
            self.window_pos += 1;
            self.pos += 1;
            return Some(byte);
        }
        if self.finished {
            return None;
        }

        let mut quantum = [0u8; 4];
        for slot in quantum.iter_mut() {
            match self.next_char() {
                Some(ch) => *slot = ch,
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
        if quantum.contains(&b'=') {
            // Padding closes the payload; whatever follows is ignored.
            self.finished = true;
        }

        match STANDARD.decode_slice(quantum, &mut self.window) {
            Ok(len) => {
                self.window_len = len;
                self.window_pos = 0;
            }
            Err(err) => {
                tracing::warn!(%err, "malformed base64 quantum, truncating stream");
                self.finished = true;
                return None;
            }
        }
        self.next_byte()
    }

    fn rewind_to_start(&mut self) {
        self.pos = 0;
        self.window_len = 0;
        self.window_pos = 0;
        self.finished = false;
        self.load_node(0);
    }
}

impl Read for Base64NodeStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            match self.next_byte() {
                Some(byte) => {
                    buf[written] = byte;
                    written += 1;
                }
                None => break,
            }
        }
        Ok(written)
    }
}

impl Seek for Base64NodeStream<'_> {
    /// Forward seeks decode and discard; backward seeks rewind to the start
    /// and decode forward to the target.
    fn seek(&mut self, target: SeekFrom) -> std::io::Result<u64> {
        let target = match target {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let target = (target as u64).min(self.size);

        if target < self.pos {
            self.rewind_to_start();
        }
        while self.pos < target {
            if self.next_byte().is_none() {
                break;
            }
        }
        Ok(self.pos)
    }
}

/// Descendant text nodes of `root` in document order.
fn collect_text_nodes(doc: &Document, root: NodeHandle) -> Vec<NodeHandle> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_text() {
            out.push(node);
            continue;
        }
        for child in doc.children(node).into_iter().rev() {
            stack.push(child);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::known::EL_P;

    fn encoded_doc(payload: &[u8], chunk: usize) -> (Document, NodeHandle) {
        let encoded = STANDARD.encode(payload);
        let mut doc = Document::new();
        let root = doc.root();
        let binary = doc.append_child_element(root, 0, EL_P);
        // Split the encoding across several text children with embedded
        // newlines, the way book formats wrap payload lines.
        for piece in encoded.as_bytes().chunks(chunk) {
            let mut text = String::from_utf8(piece.to_vec()).unwrap();
            text.push('\n');
            doc.append_child_text(binary, &text);
        }
        (doc, binary)
    }

    #[test]
    fn decodes_across_text_nodes() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let (doc, binary) = encoded_doc(&payload, 17);

        let mut stream = Base64NodeStream::new(&doc, binary);
        assert_eq!(stream.size(), payload.len() as u64);

        let mut decoded = Vec::new();
        stream.read_to_end(&mut decoded).expect("read");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn padding_variants() {
        for len in [1usize, 2, 3, 4, 5] {
            let payload: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let (doc, binary) = encoded_doc(&payload, 7);
            let mut stream = Base64NodeStream::new(&doc, binary);
            assert_eq!(stream.size(), len as u64, "len={len}");
            let mut decoded = Vec::new();
            stream.read_to_end(&mut decoded).expect("read");
            assert_eq!(decoded, payload, "len={len}");
        }
    }

    #[test]
    fn seek_forward_and_backward() {
        let payload: Vec<u8> = (0u8..120).collect();
        let (doc, binary) = encoded_doc(&payload, 11);
        let mut stream = Base64NodeStream::new(&doc, binary);

        assert_eq!(stream.seek(SeekFrom::Start(40)).unwrap(), 40);
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).expect("read");
        assert_eq!(byte[0], payload[40]);

        // Backward: rewind-and-redecode.
        assert_eq!(stream.seek(SeekFrom::Start(5)).unwrap(), 5);
        stream.read_exact(&mut byte).expect("read");
        assert_eq!(byte[0], payload[5]);

        assert_eq!(stream.seek(SeekFrom::End(-1)).unwrap(), 119);
        stream.read_exact(&mut byte).expect("read");
        assert_eq!(byte[0], payload[119]);

        // Seeking past the end clamps.
        assert_eq!(stream.seek(SeekFrom::Start(10_000)).unwrap(), 120);
        assert_eq!(stream.read(&mut byte).unwrap(), 0);
    }

    #[test]
    fn empty_element_yields_empty_stream() {
        let mut doc = Document::new();
        let root = doc.root();
        let binary = doc.append_child_element(root, 0, EL_P);
        let mut stream = Base64NodeStream::new(&doc, binary);
        assert_eq!(stream.size(), 0);
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).expect("read");
        assert!(buf.is_empty());
    }
}
