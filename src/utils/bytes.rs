//! Bounds-checked little-endian reads over untrusted buffers.
//!
//! Every accessor returns `None` instead of panicking when the requested
//! range does not lie entirely inside the buffer, including when
//! `offset + len` would overflow.

pub fn slice_at(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    buf.get(offset..end)
}

pub fn u8_at(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

pub fn u16_at(buf: &[u8], offset: usize) -> Option<u16> {
    let b = slice_at(buf, offset, 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

pub fn u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let b = slice_at(buf, offset, 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn i32_at(buf: &[u8], offset: usize) -> Option<i32> {
    u32_at(buf, offset).map(|v| v as i32)
}

/// Reads a NUL-terminated single-byte string starting at `offset`.
pub fn cstr_at(buf: &[u8], offset: usize) -> Option<String> {
    let tail = buf.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Reads a NUL-terminated UTF-16LE string starting at `offset`.
pub fn wstr_at(buf: &[u8], offset: usize) -> Option<String> {
    let tail = buf.get(offset..)?;
    let mut units = Vec::new();
    for c in tail.chunks_exact(2) {
        let unit = u16::from_le_bytes([c[0], c[1]]);
        if unit == 0 {
            return Some(String::from_utf16_lossy(&units));
        }
        units.push(unit);
    }
    None
}

/// Sequential reader used by the parsers that walk a format front to back.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let out = slice_at(self.buf, self.pos, len)?;
        self.pos += len;
        Some(out)
    }

    pub fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    pub fn u8(&mut self) -> Option<u8> {
        let v = u8_at(self.buf, self.pos)?;
        self.pos += 1;
        Some(v)
    }

    pub fn u16(&mut self) -> Option<u16> {
        let v = u16_at(self.buf, self.pos)?;
        self.pos += 2;
        Some(v)
    }

    pub fn u32(&mut self) -> Option<u32> {
        let v = u32_at(self.buf, self.pos)?;
        self.pos += 4;
        Some(v)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }
}
