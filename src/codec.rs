//! CRLF line framing for the chat socket

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Lines longer than this are discarded (IRC caps lines at 512 bytes,
/// IRCv3 tags add up to 8191 more)
pub const MAX_LINE_LENGTH: usize = 8704;

/// Decodes `\n`-terminated lines (stripping an optional `\r`) and encodes
/// lines with a `\r\n` terminator.
///
/// Invalid UTF-8 is replaced rather than rejected so one bad line cannot
/// take the connection down.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Set while skipping the remainder of an overlong line
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_line(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            match src.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    let frame = src.split_to(end + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if end > MAX_LINE_LENGTH {
                        tracing::warn!("discarding overlong line ({} bytes)", end);
                        continue;
                    }
                    return Ok(Some(Self::to_line(&frame[..end])));
                }
                None => {
                    if src.len() > MAX_LINE_LENGTH {
                        tracing::warn!("discarding overlong line ({} bytes so far)", src.len());
                        self.discarding = true;
                        src.advance(src.len());
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() || self.discarding => {
                src.clear();
                Ok(None)
            }
            None => {
                let rest = src.split_to(src.len());
                Ok(Some(Self::to_line(&rest)))
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = line.trim_end_matches(['\r', '\n']);
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
