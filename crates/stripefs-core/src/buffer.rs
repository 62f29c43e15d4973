//! Cursor-based byte buffer used by the packet codecs.
//!
//! All multi-byte integers are big-endian. Writes overwrite at the cursor and
//! grow the buffer as needed; reads never grow it and fail with
//! [`BufferError::OutOfBounds`] instead.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("index {index} out of bounds for buffer of size {size}")]
    OutOfBounds { index: usize, size: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    /// Wrap existing bytes with the cursor at the start.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    /// Truncate or zero-extend to `len` and rewind the cursor.
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0);
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Move the cursor. Positions past the end are allowed; the next write
    /// zero-fills the gap.
    pub fn seek(&mut self, pos: usize) {
        self.cursor = pos;
    }

    /// Skip `n` bytes (padding).
    pub fn step(&mut self, n: usize) {
        self.cursor += n;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8], BufferError> {
        let end = self.cursor.checked_add(n).ok_or(BufferError::OutOfBounds {
            index: usize::MAX,
            size: self.data.len(),
        })?;
        if end > self.data.len() {
            return Err(BufferError::OutOfBounds {
                index: end - 1,
                size: self.data.len(),
            });
        }
        let start = self.cursor;
        self.cursor = end;
        Ok(&self.data[start..end])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    // ── Patches ───────────────────────────────────────────────────────────────

    fn patch(&mut self, pos: usize, bytes: &[u8]) -> Result<(), BufferError> {
        let end = pos + bytes.len();
        if end > self.data.len() {
            return Err(BufferError::OutOfBounds {
                index: end - 1,
                size: self.data.len(),
            });
        }
        self.data[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrite a byte that was already written. The cursor does not move.
    pub fn set_u8(&mut self, pos: usize, v: u8) -> Result<(), BufferError> {
        self.patch(pos, &[v])
    }

    /// Backfill a 16-bit field, typically a length known only after the
    /// payload has been written. The cursor does not move.
    pub fn set_u16(&mut self, pos: usize, v: u16) -> Result<(), BufferError> {
        self.patch(pos, &v.to_be_bytes())
    }

    pub fn set_u32(&mut self, pos: usize, v: u32) -> Result<(), BufferError> {
        self.patch(pos, &v.to_be_bytes())
    }
}
