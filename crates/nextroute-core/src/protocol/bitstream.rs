//! Bit-packed stream primitives (panic-free).
//!
//! Bits are packed least-significant first. An aligned run of 8-bit writes
//! produces exactly the bytes of a plain copy, so `u64` fields land on the
//! wire as little-endian bytes and can be peeked at fixed offsets.
//!
//! Rules:
//! - Readers never index raw slices; every read is bounds-checked and
//!   reports `Malformed` instead of panicking.
//! - Bounded integers are checked on both sides: the writer refuses values
//!   outside `[min, max]`, the reader refuses decoded values above `max`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{NextRouteError, Result};

const ADDRESS_NONE: u32 = 0;
const ADDRESS_IPV4: u32 = 1;
const ADDRESS_IPV6: u32 = 2;

/// Number of bits needed to represent any value in `[min, max]`.
pub fn bits_required(min: u32, max: u32) -> u32 {
    if max <= min {
        0
    } else {
        32 - (max - min).leading_zeros()
    }
}

fn past_end() -> NextRouteError {
    NextRouteError::Malformed("would read past end of buffer".into())
}

/// Growable bit writer with a hard byte limit.
#[derive(Debug)]
pub struct BitWriter {
    data: Vec<u8>,
    scratch: u64,
    scratch_bits: u32,
    max_bytes: usize,
}

impl BitWriter {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(max_bytes.min(1500)),
            scratch: 0,
            scratch_bits: 0,
            max_bytes,
        }
    }

    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.scratch_bits as usize
    }

    /// Bytes the stream occupies once flushed.
    pub fn bytes_written(&self) -> usize {
        self.bits_written().div_ceil(8)
    }

    fn ensure_room(&self, bits: usize) -> Result<()> {
        if self.bits_written() + bits > self.max_bytes * 8 {
            return Err(NextRouteError::OutOfRange(format!(
                "write exceeds {} byte limit",
                self.max_bytes
            )));
        }
        Ok(())
    }

    /// Write the low `bits` bits of `value` (1..=32).
    pub fn write_bits(&mut self, value: u32, bits: u32) -> Result<()> {
        if bits == 0 || bits > 32 {
            return Err(NextRouteError::Internal(format!("invalid bit count {bits}")));
        }
        self.ensure_room(bits as usize)?;

        let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
        self.scratch |= u64::from(value & mask) << self.scratch_bits;
        self.scratch_bits += bits;

        while self.scratch_bits >= 8 {
            self.data.push((self.scratch & 0xFF) as u8);
            self.scratch >>= 8;
            self.scratch_bits -= 8;
        }
        Ok(())
    }

    pub fn write_align(&mut self) -> Result<()> {
        let pad = (8 - self.scratch_bits % 8) % 8;
        if pad > 0 {
            self.write_bits(0, pad)?;
        }
        Ok(())
    }

    /// Write `value` as an integer in `[min, max]` using the minimum bit width.
    pub fn write_integer(&mut self, value: u32, min: u32, max: u32) -> Result<()> {
        if min >= max {
            return Err(NextRouteError::Internal(format!(
                "integer range [{min}, {max}] is empty"
            )));
        }
        if value < min || value > max {
            return Err(NextRouteError::OutOfRange(format!(
                "{value} not in [{min}, {max}]"
            )));
        }
        self.write_bits(value - min, bits_required(min, max))
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bits(u32::from(value), 8)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bits(value, 32)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bits((value & 0xFFFF_FFFF) as u32, 32)?;
        self.write_bits((value >> 32) as u32, 32)
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bits(value.to_bits(), 32)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_bits(u32::from(value), 1)
    }

    /// Align, then copy `bytes` verbatim. Empty input is a caller bug.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(NextRouteError::Internal("write_bytes with empty input".into()));
        }
        self.write_align()?;
        self.ensure_room(bytes.len() * 8)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Length in `[0, max_len - 1]` followed by the raw bytes.
    pub fn write_string(&mut self, value: &str, max_len: usize) -> Result<()> {
        let max = u32::try_from(max_len.saturating_sub(1))
            .map_err(|_| NextRouteError::Internal("string limit too large".into()))?;
        let len = u32::try_from(value.len())
            .map_err(|_| NextRouteError::OutOfRange("string too long".into()))?;
        self.write_integer(len, 0, max)?;
        if len > 0 {
            self.write_bytes(value.as_bytes())?;
        }
        Ok(())
    }

    pub fn write_address(&mut self, addr: Option<&SocketAddr>) -> Result<()> {
        match addr {
            None => self.write_bits(ADDRESS_NONE, 2),
            Some(SocketAddr::V4(v4)) => {
                self.write_bits(ADDRESS_IPV4, 2)?;
                self.write_bytes(&v4.ip().octets())?;
                self.write_bits(u32::from(v4.port()), 16)
            }
            Some(SocketAddr::V6(v6)) => {
                self.write_bits(ADDRESS_IPV6, 2)?;
                for segment in v6.ip().segments() {
                    self.write_bits(u32::from(segment), 16)?;
                }
                self.write_bits(u32::from(v6.port()), 16)
            }
        }
    }

    /// Flush the partial byte and return the encoded buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.scratch_bits > 0 {
            self.data.push((self.scratch & 0xFF) as u8);
        }
        self.data
    }
}

/// Bounds-checked bit reader over a borrowed buffer.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bits_read: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bits_read: 0 }
    }

    pub fn bits_read(&self) -> usize {
        self.bits_read
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bits_read
    }

    pub fn read_bits(&mut self, bits: u32) -> Result<u32> {
        if bits == 0 || bits > 32 {
            return Err(NextRouteError::Internal(format!("invalid bit count {bits}")));
        }
        if bits as usize > self.bits_remaining() {
            return Err(past_end());
        }

        let mut value: u64 = 0;
        let mut got: u32 = 0;
        while got < bits {
            let byte = *self.data.get(self.bits_read / 8).ok_or_else(past_end)?;
            let offset = (self.bits_read % 8) as u32;
            let take = (8 - offset).min(bits - got);
            let chunk = (u32::from(byte) >> offset) & ((1u32 << take) - 1);
            value |= u64::from(chunk) << got;
            got += take;
            self.bits_read += take as usize;
        }
        Ok(value as u32)
    }

    /// Skip to the next byte boundary; padding bits must be zero.
    pub fn read_align(&mut self) -> Result<()> {
        let pad = ((8 - self.bits_read % 8) % 8) as u32;
        if pad > 0 && self.read_bits(pad)? != 0 {
            return Err(NextRouteError::Malformed("non-zero alignment padding".into()));
        }
        Ok(())
    }

    pub fn read_integer(&mut self, min: u32, max: u32) -> Result<u32> {
        if min >= max {
            return Err(NextRouteError::Internal(format!(
                "integer range [{min}, {max}] is empty"
            )));
        }
        let raw = self.read_bits(bits_required(min, max))?;
        let value = u64::from(raw) + u64::from(min);
        if value > u64::from(max) {
            return Err(NextRouteError::OutOfRange(format!(
                "{value} not in [{min}, {max}]"
            )));
        }
        Ok(value as u32)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_bits(32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let lo = self.read_bits(32)?;
        let hi = self.read_bits(32)?;
        Ok(u64::from(lo) | (u64::from(hi) << 32))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_bits(32)?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Align, then borrow `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.read_align()?;
        if len * 8 > self.bits_remaining() {
            return Err(past_end());
        }
        let start = self.bits_read / 8;
        let out = self.data.get(start..start + len).ok_or_else(past_end)?;
        self.bits_read += len * 8;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_string(&mut self, max_len: usize) -> Result<String> {
        let max = u32::try_from(max_len.saturating_sub(1))
            .map_err(|_| NextRouteError::Internal("string limit too large".into()))?;
        let len = self.read_integer(0, max)? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| NextRouteError::Malformed(format!("string is not utf-8: {e}")))
    }

    pub fn read_address(&mut self) -> Result<Option<SocketAddr>> {
        match self.read_bits(2)? {
            ADDRESS_NONE => Ok(None),
            ADDRESS_IPV4 => {
                let octets = self.read_array::<4>()?;
                let port = self.read_bits(16)? as u16;
                Ok(Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port)))
            }
            ADDRESS_IPV6 => {
                let mut segments = [0u16; 8];
                for segment in segments.iter_mut() {
                    *segment = self.read_bits(16)? as u16;
                }
                let port = self.read_bits(16)? as u16;
                Ok(Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(segments)), port)))
            }
            other => Err(NextRouteError::Malformed(format!("unknown address type {other}"))),
        }
    }
}
