//! TLV primitives shared by the message codec and oracle structures.
//!
//! All multi-byte integers are network byte order. Lengths and counts use
//! the variable-length "bigsize" encoding: values below 0xFD are a single
//! byte, then 0xFD + u16, 0xFE + u32, 0xFF + u64, always minimally encoded.

use secp::Point;

use crate::errors::Error;

/// Wire type tags, one per record kind, written before the record body.
pub(crate) mod type_ids {
    pub const CONTRACT_DESCRIPTOR_ENUM: u16 = 42768;
    pub const CONTRACT_DESCRIPTOR_NUMERIC: u16 = 42770;
    pub const FUNDING_INPUT: u16 = 42772;
    pub const ORACLE_INFO_SINGLE: u16 = 42774;
    pub const ORACLE_INFO_MULTI: u16 = 42776;
    pub const OFFER_DLC: u16 = 42778;
    pub const ACCEPT_DLC: u16 = 42780;
    pub const SIGN_DLC: u16 = 42782;
    pub const ENUM_EVENT_DESCRIPTOR: u16 = 55302;
    pub const DIGIT_EVENT_DESCRIPTOR: u16 = 55306;
    pub const ORACLE_EVENT: u16 = 55330;
    pub const ORACLE_ANNOUNCEMENT: u16 = 55332;
    pub const ORACLE_ATTESTATION: u16 = 55400;
}

/// Append-only encoder. Field order is fixed by the caller and must match
/// the declaration order of the struct being encoded.
#[derive(Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Writer::default()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_bigsize(&mut self, value: u64) {
        match value {
            0..=0xFC => self.write_u8(value as u8),
            0xFD..=0xFFFF => {
                self.write_u8(0xFD);
                self.write_u16(value as u16);
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.write_u8(0xFE);
                self.write_u32(value as u32);
            }
            _ => {
                self.write_u8(0xFF);
                self.write_u64(value);
            }
        }
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bigsize length prefix followed by the raw bytes.
    pub(crate) fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_bigsize(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub(crate) fn write_string(&mut self, s: &str) {
        self.write_var_bytes(s.as_bytes());
    }

    pub(crate) fn write_point(&mut self, point: Point) {
        self.write_bytes(&point.serialize());
    }

    pub(crate) fn write_xonly(&mut self, point: Point) {
        self.write_bytes(&point.serialize_xonly());
    }
}

/// Bounded cursor over received wire bytes. Every failure carries the
/// byte offset and what the decoder expected there.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn fail(&self, context: &'static str) -> Error {
        Error::Serialization {
            offset: self.pos,
            context,
        }
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], Error> {
        if self.buf.len() - self.pos < n {
            return Err(self.fail(context));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub(crate) fn read_u8(&mut self, context: &'static str) -> Result<u8, Error> {
        Ok(self.take(1, context)?[0])
    }

    pub(crate) fn read_u16(&mut self, context: &'static str) -> Result<u16, Error> {
        let bytes = self.take(2, context)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self, context: &'static str) -> Result<u32, Error> {
        let bytes = self.take(4, context)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4 bytes")))
    }

    pub(crate) fn read_u64(&mut self, context: &'static str) -> Result<u64, Error> {
        let bytes = self.take(8, context)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("8 bytes")))
    }

    pub(crate) fn read_bigsize(&mut self, context: &'static str) -> Result<u64, Error> {
        let discriminant = self.read_u8(context)?;
        let value = match discriminant {
            0xFF => self.read_u64(context)?,
            0xFE => self.read_u32(context)? as u64,
            0xFD => self.read_u16(context)? as u64,
            byte => return Ok(byte as u64),
        };

        // Reject non-minimal encodings so the codec stays canonical.
        let minimal = match discriminant {
            0xFF => value > 0xFFFF_FFFF,
            0xFE => value > 0xFFFF,
            _ => value >= 0xFD,
        };
        if !minimal {
            return Err(self.fail("minimally encoded bigsize"));
        }
        Ok(value)
    }

    /// Read a bigsize count, bounded by the bytes actually remaining so a
    /// hostile length cannot trigger a huge allocation.
    pub(crate) fn read_count(&mut self, context: &'static str) -> Result<usize, Error> {
        let count = self.read_bigsize(context)?;
        if count > (self.buf.len() - self.pos) as u64 {
            return Err(self.fail(context));
        }
        Ok(count as usize)
    }

    pub(crate) fn read_var_bytes(&mut self, context: &'static str) -> Result<Vec<u8>, Error> {
        let len = self.read_count(context)?;
        Ok(self.take(len, context)?.to_vec())
    }

    pub(crate) fn read_string(&mut self, context: &'static str) -> Result<String, Error> {
        let bytes = self.read_var_bytes(context)?;
        String::from_utf8(bytes).map_err(|_| self.fail(context))
    }

    pub(crate) fn read_array<const N: usize>(
        &mut self,
        context: &'static str,
    ) -> Result<[u8; N], Error> {
        let bytes = self.take(N, context)?;
        Ok(bytes.try_into().expect("length checked"))
    }

    pub(crate) fn read_point(&mut self, context: &'static str) -> Result<Point, Error> {
        let bytes = self.take(33, context)?;
        Point::from_slice(bytes).map_err(|_| Error::Serialization {
            offset: self.pos - 33,
            context,
        })
    }

    /// Read a BIP340 x-only public key, lifted to its even-y point.
    pub(crate) fn read_xonly(&mut self, context: &'static str) -> Result<Point, Error> {
        let start = self.pos;
        let bytes = self.take(32, context)?;
        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(bytes);
        Point::from_slice(&compressed).map_err(|_| Error::Serialization {
            offset: start,
            context,
        })
    }

    /// Consume a type tag, failing if it does not match.
    pub(crate) fn expect_type(&mut self, type_id: u16, context: &'static str) -> Result<(), Error> {
        let start = self.pos;
        let found = self.read_u16(context)?;
        if found != type_id {
            return Err(Error::Serialization {
                offset: start,
                context,
            });
        }
        Ok(())
    }

    /// Peek at the next type tag without consuming it.
    pub(crate) fn peek_type(&mut self, context: &'static str) -> Result<u16, Error> {
        let pos = self.pos;
        let type_id = self.read_u16(context)?;
        self.pos = pos;
        Ok(type_id)
    }

    /// Assert the reader consumed its entire input.
    pub(crate) fn finish(&self, context: &'static str) -> Result<(), Error> {
        if self.pos != self.buf.len() {
            return Err(self.fail(context));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigsize_round_trip() {
        for value in [0u64, 1, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, u64::MAX] {
            let mut w = Writer::new();
            w.write_bigsize(value);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_bigsize("bigsize").unwrap(), value);
            r.finish("trailing").unwrap();
        }
    }

    #[test]
    fn bigsize_rejects_non_minimal() {
        // 0xFC encoded with the u16 form.
        let bytes = [0xFD, 0x00, 0xFC];
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.read_bigsize("bigsize"),
            Err(Error::Serialization { .. })
        ));
    }

    #[test]
    fn reader_reports_offset() {
        let bytes = [0x01, 0x02];
        let mut r = Reader::new(&bytes);
        r.read_u16("u16").unwrap();
        let err = r.read_u32("missing field").unwrap_err();
        assert_eq!(
            err,
            Error::Serialization {
                offset: 2,
                context: "missing field"
            }
        );
    }

    #[test]
    fn hostile_length_is_bounded() {
        // Claims 2^32 bytes follow; reader must refuse without allocating.
        let bytes = [0xFE, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut r = Reader::new(&bytes);
        assert!(r.read_var_bytes("var bytes").is_err());
    }
}
