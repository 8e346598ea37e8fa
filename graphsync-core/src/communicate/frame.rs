/*
    frame.rs - Line framing with optional compression

    Compressed frames are bzip2 (level 9) then base64. Every bzip2 stream
    at level 9 that carries data opens with the same bytes, so the base64
    prefix `QlpoOTFBWSZTW` is elided; a frame that does not start with it
    is sent whole behind a `=` marker instead. Frames never contain CR or
    LF and end with a single `\n`.
*/

use crate::error::{SyncError, SyncResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::io::{Read, Write};

const ELIDED_PREFIX: &str = "QlpoOTFBWSZTW";
const WHOLE_MARKER: char = '=';

#[derive(Debug, Clone, Copy)]
pub struct Framing {
    compress: bool,
}

impl Framing {
    pub fn new(compress: bool) -> Self {
        Framing { compress }
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    pub fn encode(&self, text: &str) -> SyncResult<Vec<u8>> {
        let mut line = if self.compress {
            let encoded = STANDARD.encode(compress(text.as_bytes())?);
            match encoded.strip_prefix(ELIDED_PREFIX) {
                Some(rest) => rest.to_string(),
                None => format!("{}{}", WHOLE_MARKER, encoded),
            }
        } else {
            text.to_string()
        };
        line.retain(|c| c != '\r' && c != '\n');
        line.push('\n');
        Ok(line.into_bytes())
    }

    pub fn decode(&self, frame: &[u8]) -> SyncResult<String> {
        let raw = String::from_utf8_lossy(frame);
        let line: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        if line.is_empty() {
            return Err(SyncError::Recv("connection closed".to_string()));
        }
        if !self.compress {
            return Ok(line);
        }

        let encoded = match line.strip_prefix(WHOLE_MARKER) {
            Some(rest) => rest.to_string(),
            None => format!("{}{}", ELIDED_PREFIX, line),
        };
        let compressed = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| SyncError::Recv(format!("{} {}", e, line)))?;
        let mut text = String::new();
        BzDecoder::new(compressed.as_slice())
            .read_to_string(&mut text)
            .map_err(|e| SyncError::Recv(format!("{} {}", e, line)))?;
        Ok(text)
    }
}

fn compress(data: &[u8]) -> SyncResult<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).map_err(|e| SyncError::Send(e.to_string()))?;
    encoder.finish().map_err(|e| SyncError::Send(e.to_string()))
}
