//! Capped rolling buffer of terminal output.

/// Holds the most recent `cap_chars` characters of decoded output.
///
/// Bytes are decoded incrementally, so a multi-byte character split across
/// two reads is carried over instead of being replaced.
#[derive(Debug)]
pub struct OutputBuffer {
    text: String,
    char_len: usize,
    cap_chars: usize,
    total_bytes: u64,
    total_chars: u64,
    carry: Vec<u8>,
}

impl OutputBuffer {
    pub fn new(cap_chars: usize) -> Self {
        Self {
            text: String::new(),
            char_len: 0,
            cap_chars: cap_chars.max(1),
            total_bytes: 0,
            total_chars: 0,
            carry: Vec::new(),
        }
    }

    /// Append raw bytes and return the newly decoded text.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.total_bytes += bytes.len() as u64;
        let chunk = self.decode(bytes);
        if chunk.is_empty() {
            return chunk;
        }

        let chunk_chars = chunk.chars().count();
        self.text.push_str(&chunk);
        self.char_len += chunk_chars;
        self.total_chars += chunk_chars as u64;

        if self.char_len > self.cap_chars {
            let excess = self.char_len - self.cap_chars;
            match self.text.char_indices().nth(excess) {
                Some((idx, _)) => {
                    self.text.drain(..idx);
                }
                None => self.text.clear(),
            }
            self.char_len = self.cap_chars.min(self.char_len);
        }
        chunk
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        match std::str::from_utf8(&self.carry) {
            Ok(text) => {
                let out = text.to_string();
                self.carry.clear();
                out
            }
            // Incomplete trailing sequence: keep it for the next read.
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let out = String::from_utf8_lossy(&self.carry[..valid]).into_owned();
                self.carry.drain(..valid);
                out
            }
            Err(_) => {
                let out = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                out
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bytes received over the buffer's lifetime, including dropped ones.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Decoded characters over the buffer's lifetime. Usable as a position mark.
    pub fn total_chars(&self) -> u64 {
        self.total_chars
    }

    /// Text appended after the position `mark` (see [`total_chars`]).
    ///
    /// When the mark has already scrolled out, the whole retained text is returned.
    ///
    /// [`total_chars`]: OutputBuffer::total_chars
    pub fn text_since(&self, mark: u64) -> &str {
        let start = self.total_chars - self.char_len as u64;
        if mark <= start {
            return &self.text;
        }
        let skip = usize::try_from(mark - start).unwrap_or(usize::MAX);
        match self.text.char_indices().nth(skip) {
            Some((idx, _)) => &self.text[idx..],
            None => "",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_newest_characters() {
        let mut buffer = OutputBuffer::new(5);
        buffer.push(b"abc");
        buffer.push(b"defg");
        assert_eq!(buffer.text(), "cdefg");
        assert_eq!(buffer.total_bytes(), 7);
    }

    #[test]
    fn test_cap_counts_characters_not_bytes() {
        let mut buffer = OutputBuffer::new(3);
        buffer.push("❯❯❯❯".as_bytes());
        assert_eq!(buffer.text(), "❯❯❯");
    }

    #[test]
    fn test_split_multibyte_character_is_carried() {
        let bytes = "❯ ".as_bytes();
        let mut buffer = OutputBuffer::new(100);
        assert_eq!(buffer.push(&bytes[..1]), "");
        assert_eq!(buffer.push(&bytes[1..]), "❯ ");
        assert_eq!(buffer.text(), "❯ ");
    }

    #[test]
    fn test_text_since_mark() {
        let mut buffer = OutputBuffer::new(6);
        buffer.push("ab❯".as_bytes());
        let mark = buffer.total_chars();
        assert_eq!(buffer.text_since(mark), "");

        buffer.push(b"cd");
        assert_eq!(buffer.text_since(mark), "cd");

        buffer.push(b"efgh");
        assert_eq!(buffer.text(), "cdefgh");
        assert_eq!(buffer.text_since(mark), "cdefgh");
        assert_eq!(buffer.text_since(0), "cdefgh");
        assert_eq!(buffer.total_chars(), 9);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut buffer = OutputBuffer::new(100);
        buffer.push(&[0xff, b'o', b'k']);
        assert_eq!(buffer.text(), "\u{fffd}ok");
    }
}
