use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is kept. Multi-line data is joined with `\n`,
/// comments and the other fields are skipped, and an event without data
/// is not reported. Lines may end with LF or CRLF.
pub struct Sse {
    buf: Vec<u8>,
    data: Option<String>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            data: None,
            chunks,
        }
    }

    /// Returns the data of the next event, or `None` at the end of stream.
    ///
    /// An event cut off by the end of stream is dropped.
    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            while let Some(line) = self.next_line()? {
                if line.is_empty() {
                    if let Some(mut data) = self.data.take() {
                        data.pop();
                        return Ok(Some(data));
                    }
                    continue;
                }
                if line.starts_with(':') {
                    continue;
                }

                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => {
                        (field, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line.as_str(), ""),
                };
                if field == "data" {
                    let data = self.data.get_or_insert_default();
                    data.push_str(value);
                    data.push('\n');
                } else {
                    trace!("skipped sse field {field:?}");
                }
            }

            match self.chunks.next_chunk().await.map_err(Error::ChunksError)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => return Ok(None),
            }
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, Error> {
        let Some(eol_idx) = self.buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let mut line: Vec<u8> = self.buf.drain(..=eol_idx).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|_| Error::InvalidPayload)
    }
}
