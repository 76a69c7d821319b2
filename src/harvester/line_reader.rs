use super::encoding::encoded_newline;
use encoding_rs::{CoderResult, Decoder, Encoding, UTF_16BE, UTF_16LE};
use std::io::{self, Read};
use std::time::Instant;

/// Splits a raw byte stream into decoded lines.
///
/// Raw bytes are accumulated until the encoded newline shows up, then exactly
/// the bytes up to and including it are pushed through the decoder. Every line
/// reports how many raw bytes it consumed so the caller can keep an exact
/// file offset regardless of encoding.
pub struct LineReader<R> {
    input: R,
    decoder: Decoder,
    newline: Vec<u8>,
    /// Code unit width; newline matches must sit on a unit boundary.
    unit: usize,
    read_buf: Vec<u8>,
    in_buffer: Vec<u8>,
    /// Position in `in_buffer` before which no newline can start.
    search_offset: usize,
    out_buffer: String,
    /// Raw bytes decoded into `out_buffer` since the last complete line.
    byte_count: usize,
    last_read: Instant,
}

impl<R: Read> LineReader<R> {
    pub fn new(input: R, encoding: &'static Encoding, buffer_size: usize) -> Self {
        let unit = if encoding == UTF_16LE || encoding == UTF_16BE {
            2
        } else {
            1
        };

        Self {
            input,
            decoder: encoding.new_decoder_without_bom_handling(),
            newline: encoded_newline(encoding),
            unit,
            read_buf: vec![0; buffer_size.max(1)],
            in_buffer: Vec::new(),
            search_offset: 0,
            out_buffer: String::new(),
            byte_count: 0,
            last_read: Instant::now(),
        }
    }

    /// Next complete line with its terminator stripped, and the number of raw
    /// bytes it consumed.
    ///
    /// `Ok(None)` means the input has no more bytes for now; the bytes read so
    /// far stay buffered and are picked up by the next call.
    pub fn next(&mut self) -> io::Result<Option<(String, usize)>> {
        loop {
            if let Some(idx) = self.find_newline() {
                self.decode(idx + self.newline.len());

                let mut line = std::mem::take(&mut self.out_buffer);
                let size = std::mem::replace(&mut self.byte_count, 0);
                strip_line_ending(&mut line);
                return Ok(Some((line, size)));
            }

            // Everything before this point has been checked already
            let checked = self.in_buffer.len().saturating_sub(self.newline.len() - 1);
            if checked > self.search_offset {
                self.search_offset = checked;
            }

            let n = match self.input.read(&mut self.read_buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if n == 0 {
                return Ok(None);
            }

            self.last_read = Instant::now();
            self.in_buffer.extend_from_slice(&self.read_buf[..n]);
        }
    }

    /// Everything read since the last complete line, decoded.
    ///
    /// Nothing is consumed: the same text comes back, possibly longer, from
    /// the next `partial` or `next` call.
    pub fn partial(&mut self) -> (String, usize) {
        let end = self.in_buffer.len();
        self.decode(end);
        (self.out_buffer.clone(), self.byte_count)
    }

    /// Raw bytes held for an unfinished line.
    pub fn pending(&self) -> usize {
        self.byte_count + self.in_buffer.len()
    }

    /// When bytes were last received from the input.
    pub fn last_read(&self) -> Instant {
        self.last_read
    }

    /// Drop all buffered state, e.g. after the input was rewound.
    pub fn reset(&mut self) {
        self.decoder = self.decoder.encoding().new_decoder_without_bom_handling();
        self.in_buffer.clear();
        self.search_offset = 0;
        self.out_buffer.clear();
        self.byte_count = 0;
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.input
    }

    pub fn into_inner(self) -> R {
        self.input
    }

    fn find_newline(&self) -> Option<usize> {
        let nl = self.newline.as_slice();
        if self.in_buffer.len() < nl.len() {
            return None;
        }

        let last_start = self.in_buffer.len() - nl.len();
        let mut idx = self.search_offset;
        while idx <= last_start {
            if (self.byte_count + idx) % self.unit == 0
                && &self.in_buffer[idx..idx + nl.len()] == nl
            {
                return Some(idx);
            }
            idx += 1;
        }
        None
    }

    /// Decode `in_buffer[..end]` into `out_buffer` and drop those bytes.
    fn decode(&mut self, end: usize) {
        let mut start = 0;
        while start < end {
            let needed = self
                .decoder
                .max_utf8_buffer_length(end - start)
                .unwrap_or(end - start);
            self.out_buffer.reserve(needed);

            let (result, read, _) = self.decoder.decode_to_string(
                &self.in_buffer[start..end],
                &mut self.out_buffer,
                false,
            );
            start += read;

            if let CoderResult::OutputFull = result {
                self.out_buffer.reserve(needed.max(16));
            }
        }

        self.in_buffer.drain(..end);
        self.byte_count += end;
        self.search_offset = 0;
    }
}

fn strip_line_ending(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}
