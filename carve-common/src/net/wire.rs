use std::io::{Read, Write};

use crate::prelude::Result;

/// why a buffer failed to decode. any of these on a live connection is a
/// protocol violation and the peer gets disconnected.
#[derive(Debug)]
pub enum WireError {
    UnexpectedEof,
    UnknownTag(u8),
    BadField(&'static str),
    Io(std::io::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "message ended before all fields were read"),
            WireError::UnknownTag(tag) => write!(f, "unknown message tag {:#04x}", tag),
            WireError::BadField(what) => write!(f, "field out of range: {}", what),
            WireError::Io(err) => write!(f, "read failed: {}", err),
        }
    }
}

impl std::error::Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => WireError::UnexpectedEof,
            _ => WireError::Io(err),
        }
    }
}

pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> Result<()> {
    writer.write_all(&[value])?;
    Ok(())
}

pub fn write_u16<W: Write>(writer: &mut W, value: u16) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_i16<W: Write>(writer: &mut W, value: i16) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N], WireError> {
    let mut buf = [0; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, WireError> {
    Ok(read_array::<1, R>(reader)?[0])
}

pub fn read_u16<R: Read>(reader: &mut R) -> Result<u16, WireError> {
    Ok(u16::from_le_bytes(read_array(reader)?))
}

pub fn read_i16<R: Read>(reader: &mut R) -> Result<i16, WireError> {
    Ok(i16::from_le_bytes(read_array(reader)?))
}

pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, WireError> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

pub fn read_f32<R: Read>(reader: &mut R) -> Result<f32, WireError> {
    Ok(f32::from_le_bytes(read_array(reader)?))
}

pub fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, WireError> {
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 0x1234).unwrap();
        write_i16(&mut buf, -2).unwrap();
        write_u32(&mut buf, 0xdead_beef).unwrap();
        assert_eq!(&buf[..2], &[0x34, 0x12]);
        assert_eq!(&buf[2..4], &[0xfe, 0xff]);
        assert_eq!(&buf[4..], &[0xef, 0xbe, 0xad, 0xde]);

        let mut cursor = &buf[..];
        assert_eq!(read_u16(&mut cursor).unwrap(), 0x1234);
        assert_eq!(read_i16(&mut cursor).unwrap(), -2);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0xdead_beef);
    }

    #[test]
    fn short_reads_are_typed() {
        let buf = [0x01u8];
        let mut cursor = &buf[..];
        assert!(matches!(read_u32(&mut cursor), Err(WireError::UnexpectedEof)));
    }
}
