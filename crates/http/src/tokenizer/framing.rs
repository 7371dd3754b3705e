//! Incremental body framers for the bundled HTTP/1.x tokenizer.
//!
//! Two framings exist for request bodies: a fixed Content-Length span and
//! chunked transfer encoding ([RFC 7230 Section 4.1]). Both operate on a
//! working buffer owned by the caller and hand back decoded body spans one
//! at a time, retaining their own state across partial inputs.
//!
//! [RFC 7230 Section 4.1]: https://tools.ietf.org/html/rfc7230#section-4.1

use std::cmp;
use std::io;
use std::io::ErrorKind;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use ChunkState::*;

/// One step of body framing: a decoded span, or the end of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BodyItem {
    Chunk(Bytes),
    End,
}

/// Framer for bodies with a known Content-Length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LengthFramer {
    remaining: u64,
}

impl LengthFramer {
    pub(super) fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    /// Takes the next body span out of `src`.
    ///
    /// Returns `None` when more input is needed, `Some(BodyItem::End)` once
    /// the full length has been delivered.
    pub(super) fn advance(&mut self, src: &mut BytesMut) -> Option<BodyItem> {
        if self.remaining == 0 {
            return Some(BodyItem::End);
        }

        if src.is_empty() {
            return None;
        }

        let len = cmp::min(self.remaining, src.len() as u64);
        let bytes = src.split_to(len as usize).freeze();
        self.remaining -= bytes.len() as u64;
        Some(BodyItem::Chunk(bytes))
    }
}

/// Framer for chunked transfer encoding.
///
/// Each chunk carries its size in hex, optional extensions, the data and a
/// trailing CRLF; a zero-sized chunk ends the body, optionally followed by
/// trailer fields. Trailers and extensions are validated but discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ChunkedFramer {
    state: ChunkState,
    chunk_remaining: u64,
}

impl ChunkedFramer {
    pub(super) fn new() -> Self {
        Self { state: Size, chunk_remaining: 0 }
    }

    /// Takes the next body span out of `src`.
    ///
    /// Returns `None` when more input is needed, `Some(BodyItem::End)` after
    /// the terminating chunk, or an error on malformed encoding.
    pub(super) fn advance(&mut self, src: &mut BytesMut) -> io::Result<Option<BodyItem>> {
        loop {
            if self.state == Done {
                trace!("finished reading chunked body");
                return Ok(Some(BodyItem::End));
            }

            if src.is_empty() {
                return Ok(None);
            }

            let mut data = None;
            self.state = match self.state.step(src, &mut self.chunk_remaining, &mut data)? {
                Some(next) => next,
                // ran out of input mid-element
                None => return Ok(None),
            };

            if let Some(bytes) = data {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(BodyItem::Chunk(bytes)));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Chunk size in hex
    Size,
    /// Whitespace after the size
    SizeWs,
    /// Chunk extensions, skipped
    Extension,
    /// LF closing the size line
    SizeLf,
    /// Chunk data
    Data,
    /// CR after chunk data
    DataCr,
    /// LF after chunk data
    DataLf,
    /// Trailer fields after the last chunk, skipped
    Trailer,
    /// LF closing a trailer line
    TrailerLf,
    /// Final CR
    EndCr,
    /// Final LF
    EndLf,
    /// Terminal state
    Done,
}

macro_rules! next_byte {
    ($src:ident) => {{
        if $src.is_empty() {
            return Ok(None);
        }
        $src.get_u8()
    }};
}

fn bad_chunk(reason: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, format!("invalid chunked encoding: {reason}"))
}

impl ChunkState {
    /// Runs one step of the chunked state machine.
    ///
    /// `Ok(None)` means the input ran dry before the element completed; the
    /// state is unchanged and the caller should supply more bytes.
    fn step(self, src: &mut BytesMut, remaining: &mut u64, data: &mut Option<Bytes>) -> io::Result<Option<ChunkState>> {
        match self {
            Size => Self::read_size(src, remaining),
            SizeWs => Self::read_size_ws(src),
            Extension => Self::read_extension(src),
            SizeLf => Self::read_size_lf(src, *remaining),
            Data => Ok(Self::read_data(src, remaining, data)),
            DataCr => Self::read_data_cr(src),
            DataLf => Self::read_data_lf(src),
            Trailer => Self::read_trailer(src),
            TrailerLf => Self::read_trailer_lf(src),
            EndCr => Self::read_end_cr(src),
            EndLf => Self::read_end_lf(src),
            Done => Ok(Some(Done)),
        }
    }

    fn read_size(src: &mut BytesMut, size: &mut u64) -> io::Result<Option<ChunkState>> {
        let radix = 16;
        let digit = match next_byte!(src) {
            b @ b'0'..=b'9' => b - b'0',
            b @ b'a'..=b'f' => b + 10 - b'a',
            b @ b'A'..=b'F' => b + 10 - b'A',
            b'\t' | b' ' => return Ok(Some(SizeWs)),
            b';' => return Ok(Some(Extension)),
            b'\r' => return Ok(Some(SizeLf)),
            _ => return Err(bad_chunk("invalid size digit")),
        };

        *size = size
            .checked_mul(radix)
            .and_then(|s| s.checked_add(u64::from(digit)))
            .ok_or_else(|| bad_chunk("size overflow"))?;

        Ok(Some(Size))
    }

    fn read_size_ws(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        // whitespace may follow the size, but no further digits
        match next_byte!(src) {
            b'\t' | b' ' => Ok(Some(SizeWs)),
            b';' => Ok(Some(Extension)),
            b'\r' => Ok(Some(SizeLf)),
            _ => Err(bad_chunk("invalid size line whitespace")),
        }
    }

    fn read_extension(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        // Extensions are ignored; they end at CRLF. A bare LF inside an
        // extension is rejected so sloppy peers cannot smuggle a line end.
        match next_byte!(src) {
            b'\r' => Ok(Some(SizeLf)),
            b'\n' => Err(bad_chunk("extension contains bare newline")),
            _ => Ok(Some(Extension)),
        }
    }

    fn read_size_lf(src: &mut BytesMut, size: u64) -> io::Result<Option<ChunkState>> {
        match next_byte!(src) {
            b'\n' if size == 0 => Ok(Some(EndCr)),
            b'\n' => Ok(Some(Data)),
            _ => Err(bad_chunk("missing LF after size")),
        }
    }

    fn read_data(src: &mut BytesMut, remaining: &mut u64, data: &mut Option<Bytes>) -> Option<ChunkState> {
        if src.is_empty() {
            return Some(Data);
        }

        if *remaining == 0 {
            return Some(DataCr);
        }

        let available = match *remaining {
            r if r > usize::MAX as u64 => usize::MAX,
            r => r as usize,
        };
        let take = cmp::min(available, src.len());

        *remaining -= take as u64;
        *data = Some(src.split_to(take).freeze());

        if *remaining > 0 { Some(Data) } else { Some(DataCr) }
    }

    fn read_data_cr(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        match next_byte!(src) {
            b'\r' => Ok(Some(DataLf)),
            _ => Err(bad_chunk("missing CR after data")),
        }
    }

    fn read_data_lf(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        match next_byte!(src) {
            b'\n' => Ok(Some(Size)),
            _ => Err(bad_chunk("missing LF after data")),
        }
    }

    fn read_trailer(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        match next_byte!(src) {
            b'\r' => Ok(Some(TrailerLf)),
            _ => Ok(Some(Trailer)),
        }
    }

    fn read_trailer_lf(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        match next_byte!(src) {
            b'\n' => Ok(Some(EndCr)),
            _ => Err(bad_chunk("missing LF after trailer")),
        }
    }

    fn read_end_cr(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        match next_byte!(src) {
            b'\r' => Ok(Some(EndLf)),
            _ => Ok(Some(Trailer)),
        }
    }

    fn read_end_lf(src: &mut BytesMut) -> io::Result<Option<ChunkState>> {
        match next_byte!(src) {
            b'\n' => Ok(Some(Done)),
            _ => Err(bad_chunk("missing final LF")),
        }
    }
}
