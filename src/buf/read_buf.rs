use super::padding_to;
use crate::error::UnmarshallError;
use crate::protocol::Endianness;

/// A random-access consumer of bytes with alignment-aware readers,
/// mirroring [`PutBuf`](super::PutBuf) on the decode side.
#[derive(Debug, Clone, Copy)]
pub struct ReadBuf<'a> {
    data: &'a [u8],
    base: usize,
    pos: usize,
    endianness: Endianness,
}

type Result<T> = std::result::Result<T, UnmarshallError>;

impl<'a> ReadBuf<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ReadBuf { data, base: 0, pos: 0, endianness: Endianness::Little }
    }

    /// Construct a reader over `data` whose alignment is computed as if it
    /// started at logical offset `base`.
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        ReadBuf { data, base, pos: 0, endianness: Endianness::Little }
    }

    /// Reinterpret every remaining multi-byte field as encoded in
    /// `endianness` rather than the little-endian default. Used once the
    /// fixed header byte reveals a big-endian peer frame.
    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn align(&mut self, align: usize) -> Result<()> {
        let pad = padding_to(self.offset(), align);
        if self.pos + pad > self.data.len() {
            return Err(UnmarshallError::BufferUnderflow);
        }
        self.pos += pad;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(UnmarshallError::BufferUnderflow);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(match self.endianness {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(match self.endianness {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(match self.endianness {
            Endianness::Little => u64::from_le_bytes(bytes),
            Endianness::Big => u64::from_be_bytes(bytes),
        })
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a raw byte slice of exactly `len` bytes, with no alignment.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }
}
