// src/gps/decoder.rs
//! Reassembles NMEA sentences from an arbitrarily chunked byte stream

use super::nmea::{parse_sentence, NmeaSentence};
use crate::error::{GpsError, Result};

/// Longest line accepted before it is thrown away. NMEA caps sentences at
/// 82 characters; some receivers overrun that slightly.
pub const MAX_SENTENCE_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Waiting for a `$` or `!` to start the next sentence
    Idle,
    /// Collecting the bytes of the current sentence
    Accumulating,
}

/// Byte-to-sentence decoder.
///
/// Feed it whatever the serial port returns; a sentence split across reads
/// is emitted once its line terminator arrives. Each flushed line yields one
/// result, and a bad line never affects the ones after it.
#[derive(Debug)]
pub struct StreamDecoder {
    state: DecoderState,
    buffer: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            buffer: Vec::with_capacity(MAX_SENTENCE_LEN),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<NmeaSentence>> {
        let mut results = Vec::new();

        for &byte in chunk {
            match (self.state, byte) {
                (DecoderState::Idle, b'$' | b'!') => {
                    self.buffer.push(byte);
                    self.state = DecoderState::Accumulating;
                }
                (DecoderState::Idle, _) => {}
                (DecoderState::Accumulating, b'\r' | b'\n') => {
                    results.push(self.flush());
                }
                (DecoderState::Accumulating, b'$' | b'!') => {
                    // Start of a new sentence before the old one ended
                    results.push(Err(self.discard("sentence interrupted by a new start delimiter")));
                    self.buffer.push(byte);
                    self.state = DecoderState::Accumulating;
                }
                (DecoderState::Accumulating, _) => {
                    if self.buffer.len() == MAX_SENTENCE_LEN {
                        results.push(Err(self.discard("sentence exceeds maximum length")));
                    } else {
                        self.buffer.push(byte);
                    }
                }
            }
        }

        results
    }

    fn flush(&mut self) -> Result<NmeaSentence> {
        self.state = DecoderState::Idle;
        let line = std::mem::take(&mut self.buffer);
        let text = std::str::from_utf8(&line)
            .map_err(|_| GpsError::Decode(format!("non UTF-8 sentence: {:?}", String::from_utf8_lossy(&line))))?;
        parse_sentence(text)
    }

    fn discard(&mut self, reason: &str) -> GpsError {
        self.state = DecoderState::Idle;
        let line = std::mem::take(&mut self.buffer);
        GpsError::Decode(format!("{}: {:?}", reason, String::from_utf8_lossy(&line)))
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
