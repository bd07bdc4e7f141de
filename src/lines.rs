/// Incremental NDJSON line splitter.
///
/// Bytes are buffered until a `\n` arrives. Splitting on the raw byte is safe
/// for UTF-8 because a newline byte never appears inside a multi-byte
/// sequence, so a character cut in half by a chunk boundary is rejoined
/// before it is decoded.
#[derive(Debug, Default)]
pub struct LineReassembler {
    carry: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed, trimmed and
    /// with empty lines removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(line) = decode(&self.carry[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.carry.drain(..start);

        lines
    }

    /// Flush the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.carry);
        decode(&tail)
    }
}

fn decode(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
