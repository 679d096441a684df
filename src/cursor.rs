use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u8, le_u16, le_u32, le_u64},
    IResult,
};

use crate::error::CursorError;

type NomError<'a> = nom::error::Error<&'a [u8]>;

/// Bounds-checked forward reader over a borrowed buffer.
///
/// A failed read leaves the position untouched.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn parse<T, P>(&mut self, needed: usize, parser: P) -> Result<T, CursorError>
    where
        P: FnOnce(&'a [u8]) -> IResult<&'a [u8], T, NomError<'a>>,
    {
        match parser(self.rest()) {
            Ok((rest, value)) => {
                self.pos = self.buf.len() - rest.len();
                Ok(value)
            }
            Err(_) => Err(CursorError {
                needed,
                remaining: self.remaining(),
            }),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        self.parse(1, be_u8::<&'a [u8], NomError<'a>>)
    }

    pub fn read_u16le(&mut self) -> Result<u16, CursorError> {
        self.parse(2, le_u16::<&'a [u8], NomError<'a>>)
    }

    /// Network byte order, for the link and network layer headers.
    pub fn read_u16be(&mut self) -> Result<u16, CursorError> {
        self.parse(2, be_u16::<&'a [u8], NomError<'a>>)
    }

    pub fn read_u32le(&mut self) -> Result<u32, CursorError> {
        self.parse(4, le_u32::<&'a [u8], NomError<'a>>)
    }

    pub fn read_u64le(&mut self) -> Result<u64, CursorError> {
        self.parse(8, le_u64::<&'a [u8], NomError<'a>>)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CursorError> {
        self.parse(n, take::<usize, &'a [u8], NomError<'a>>(n))
    }

    /// Reads an `n` byte ASCII field, dropping trailing space and NUL padding.
    pub fn read_fixed_ascii(&mut self, n: usize) -> Result<String, CursorError> {
        let raw = self.read_bytes(n)?;
        let end = raw
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |i| i + 1);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CursorError> {
        self.read_bytes(n).map(|_| ())
    }
}
