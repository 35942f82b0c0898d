//! Purpose: Decode raw dump bytes into text lines under a fixed encoding.
//! Exports: `DumpEncoding`, `DumpLines`, `decode_line`, `encode_latin1`.
//! Role: Byte boundary in front of the statement scanner.
//! Invariants: Decoding never fails; undecodable UTF-8 becomes U+FFFD.
//! Invariants: Latin-1 is a bijection between bytes and U+0000..=U+00FF.
use std::io::BufRead;

use bstr::ByteSlice;

use crate::core::error::Error;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DumpEncoding {
    /// UTF-8 with lossy replacement of invalid sequences.
    #[default]
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
}

pub fn decode_line(bytes: &[u8], encoding: DumpEncoding) -> String {
    match encoding {
        DumpEncoding::Utf8 => bytes.to_str_lossy().into_owned(),
        DumpEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Inverse of Latin-1 decoding. `None` when a character has no single-byte form.
pub fn encode_latin1(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|ch| u8::try_from(ch).ok()).collect()
}

/// Iterator of decoded lines; each line keeps its trailing newline, like `read_line`.
pub struct DumpLines<R> {
    reader: R,
    encoding: DumpEncoding,
    buf: Vec<u8>,
    line_no: u64,
    done: bool,
}

impl<R: BufRead> DumpLines<R> {
    pub fn new(reader: R, encoding: DumpEncoding) -> Self {
        Self {
            reader,
            encoding,
            buf: Vec::new(),
            line_no: 0,
            done: false,
        }
    }

    /// Number of lines read so far.
    pub fn line_no(&self) -> u64 {
        self.line_no
    }
}

impl<R: BufRead> Iterator for DumpLines<R> {
    type Item = Result<String, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                self.line_no += 1;
                Some(Ok(decode_line(&self.buf, self.encoding)))
            }
            Err(err) => {
                self.done = true;
                Some(Err(Error::io(err, "failed to read dump").with_line(self.line_no + 1)))
            }
        }
    }
}
