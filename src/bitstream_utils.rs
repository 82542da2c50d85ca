// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Helpers to read IVF containers and to synthesize bitstreams.

use std::io::Cursor;
use std::io::Read;
use std::io::Write;

use byteorder::ByteOrder;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IvfError {
    #[error("the IVF file header is truncated")]
    Truncated,
    #[error("invalid IVF signature {0:02x?}")]
    InvalidMagic([u8; 4]),
    #[error("invalid IVF header size {0}")]
    InvalidHeaderSize(u16),
}

/// Iterator over the frames of an IVF file.
///
/// Iteration stops at the first truncated frame.
pub struct IvfIterator<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> IvfIterator<'a> {
    /// Creates an iterator over `data`, which must start with a valid IVF file header.
    pub fn new(data: &'a [u8]) -> Result<Self, IvfError> {
        let header = IvfFileHeader::parse(data)?;
        let mut cursor = Cursor::new(data);
        cursor.set_position(u64::from(header.header_size));

        Ok(Self { cursor })
    }
}

impl<'a> Iterator for IvfIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.cursor.read_u32::<LittleEndian>().ok()? as usize;
        // Skip the timestamp.
        self.cursor.read_u64::<LittleEndian>().ok()?;

        let data = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let end = start.checked_add(len)?;
        if end > data.len() {
            return None;
        }
        self.cursor.set_position(end as u64);

        Some(&data[start..end])
    }
}

/// IVF file header, used both to read and to synthesize IVF files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IvfFileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub header_size: u16,
    pub codec: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub framerate: u32,
    pub timescale: u32,
    pub frame_count: u32,
    pub unused: u32,
}

impl Default for IvfFileHeader {
    fn default() -> Self {
        Self {
            magic: Self::MAGIC,
            version: 0,
            header_size: Self::SIZE as u16,
            codec: Self::CODEC_VP9,
            width: 320,
            height: 240,
            framerate: 1,
            timescale: 1000,
            frame_count: 1,
            unused: Default::default(),
        }
    }
}

impl IvfFileHeader {
    pub const MAGIC: [u8; 4] = *b"DKIF";
    pub const CODEC_VP9: [u8; 4] = *b"VP90";
    pub const SIZE: usize = 32;

    pub fn new(codec: [u8; 4], width: u16, height: u16, framerate: u32, frame_count: u32) -> Self {
        let default = Self::default();

        Self {
            codec,
            width,
            height,
            framerate: framerate * default.timescale,
            frame_count,
            ..default
        }
    }

    /// Reads the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, IvfError> {
        if data.len() < Self::SIZE {
            return Err(IvfError::Truncated);
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != Self::MAGIC {
            return Err(IvfError::InvalidMagic(magic));
        }

        let header_size = LittleEndian::read_u16(&data[6..8]);
        if (header_size as usize) < Self::SIZE || header_size as usize > data.len() {
            return Err(IvfError::InvalidHeaderSize(header_size));
        }

        let mut codec = [0u8; 4];
        codec.copy_from_slice(&data[8..12]);

        Ok(Self {
            magic,
            version: LittleEndian::read_u16(&data[4..6]),
            header_size,
            codec,
            width: LittleEndian::read_u16(&data[12..14]),
            height: LittleEndian::read_u16(&data[14..16]),
            framerate: LittleEndian::read_u32(&data[16..20]),
            timescale: LittleEndian::read_u32(&data[20..24]),
            frame_count: LittleEndian::read_u32(&data[24..28]),
            unused: LittleEndian::read_u32(&data[28..32]),
        })
    }

    /// Serializes the header, little-endian like every IVF field.
    pub fn write_into(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u16::<LittleEndian>(self.header_size)?;
        writer.write_all(&self.codec)?;
        writer.write_u16::<LittleEndian>(self.width)?;
        writer.write_u16::<LittleEndian>(self.height)?;
        for field in [self.framerate, self.timescale, self.frame_count, self.unused] {
            writer.write_u32::<LittleEndian>(field)?;
        }

        Ok(())
    }
}

/// Writes the 12 byte header that precedes every frame of an IVF file.
fn write_frame_header(size: u32, timestamp: u64, writer: &mut impl Write) -> std::io::Result<()> {
    writer.write_u32::<LittleEndian>(size)?;
    writer.write_u64::<LittleEndian>(timestamp)
}

/// Wraps `frames` into an IVF file of the given size, one frame per timestamp.
pub fn write_ivf<'a>(
    width: u16,
    height: u16,
    frames: impl ExactSizeIterator<Item = &'a [u8]>,
    writer: &mut impl Write,
) -> std::io::Result<()> {
    IvfFileHeader::new(IvfFileHeader::CODEC_VP9, width, height, 30, frames.len() as u32)
        .write_into(writer)?;

    for (timestamp, frame) in frames.enumerate() {
        write_frame_header(frame.len() as u32, timestamp as u64, writer)?;
        writer.write_all(frame)?;
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum BitWriterError {
    #[error("cannot write more than 32 bits at once")]
    InvalidBitCount,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Writes bits MSB first, the order of the VP9 uncompressed header. Pending bits are flushed on
/// drop, padded with zeros.
pub struct BitWriter<W: Write> {
    out: W,
    /// Bits of the current byte, in the low `pending` bits.
    acc: u8,
    pending: u8,
}

impl<W: Write> BitWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            acc: 0,
            pending: 0,
        }
    }

    /// Writes the low `bits` bits of `value`. Returns the number of bits written.
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> Result<usize, BitWriterError> {
        if bits > 32 {
            return Err(BitWriterError::InvalidBitCount);
        }

        let value = value.into();
        for shift in (0..bits).rev() {
            self.write_bit((value >> shift) & 1 == 1)?;
        }

        Ok(bits)
    }

    /// Writes the magnitude of `value` on `bits` bits followed by its sign.
    pub fn write_signed(&mut self, bits: usize, value: i32) -> Result<usize, BitWriterError> {
        let written = self.write_f(bits, value.unsigned_abs())?;
        self.write_bit(value < 0)?;
        Ok(written + 1)
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<(), BitWriterError> {
        self.acc = (self.acc << 1) | bit as u8;
        self.pending += 1;

        if self.pending == 8 {
            self.out.write_u8(self.acc)?;
            self.acc = 0;
            self.pending = 0;
        }

        Ok(())
    }

    /// Pads the current byte with zeros and writes it out.
    pub fn flush(&mut self) -> Result<(), BitWriterError> {
        if self.pending > 0 {
            self.out.write_u8(self.acc << (8 - self.pending))?;
            self.acc = 0;
            self.pending = 0;
        }

        Ok(self.out.flush()?)
    }
}

impl<W: Write> Drop for BitWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("failed to flush bit writer: {}", e);
        }
    }
}

/// Reads a whole IVF file from `reader` and returns its frames.
pub fn read_ivf_frames(reader: &mut impl Read) -> anyhow::Result<(IvfFileHeader, Vec<Vec<u8>>)> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    let header = IvfFileHeader::parse(&data)?;
    let frames = IvfIterator::new(&data)?.map(<[u8]>::to_vec).collect();

    Ok((header, frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ivf_layout() {
        let mut buf = Vec::new();
        write_ivf(1920, 800, [&[0xaa, 0xbb][..]].into_iter(), &mut buf).unwrap();

        const EXPECTED: [u8; 46] = [
            // File header.
            0x44, 0x4b, 0x49, 0x46, 0x00, 0x00, 0x20, 0x00, 0x56, 0x50, 0x39, 0x30, 0x80, 0x07,
            0x20, 0x03, 0x30, 0x75, 0x00, 0x00, 0xe8, 0x03, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Frame header and payload.
            0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xaa, 0xbb,
        ];

        assert_eq!(buf, EXPECTED);

        let header = IvfFileHeader::parse(&buf).unwrap();
        assert_eq!((header.width, header.height), (1920, 800));
        assert_eq!(header.framerate, 30_000);
    }

    #[test]
    fn ivf_frames_are_iterated_in_order() {
        let frames: [&[u8]; 3] = [&[1, 2, 3], &[], &[4]];
        let mut buf = Vec::new();
        write_ivf(64, 64, frames.iter().copied(), &mut buf).unwrap();

        let read: Vec<&[u8]> = IvfIterator::new(&buf).unwrap().collect();
        assert_eq!(read, frames);

        let (header, owned) = read_ivf_frames(&mut buf.as_slice()).unwrap();
        assert_eq!((header.width, header.height, header.frame_count), (64, 64, 3));
        assert_eq!(owned.len(), 3);
    }

    #[test]
    fn truncated_ivf_frame_ends_iteration() {
        let mut buf = Vec::new();
        write_ivf(64, 64, [&[1u8, 2, 3, 4][..]].into_iter(), &mut buf).unwrap();
        buf.truncate(buf.len() - 1);

        assert_eq!(IvfIterator::new(&buf).unwrap().count(), 0);
    }

    #[test]
    fn invalid_ivf_header() {
        assert_eq!(IvfIterator::new(&[0u8; 8]).err(), Some(IvfError::Truncated));
        assert_eq!(
            IvfFileHeader::parse(&[0u8; 32]),
            Err(IvfError::InvalidMagic([0; 4]))
        );
    }

    #[test]
    fn bitwriter_single_bits() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_f(1, true).unwrap();
            writer.write_f(1, false).unwrap();
            writer.write_f(1, false).unwrap();
            writer.write_f(1, false).unwrap();
            writer.write_f(1, true).unwrap();
            writer.write_f(1, true).unwrap();
            writer.write_f(1, true).unwrap();
            writer.write_f(1, true).unwrap();
        }
        assert_eq!(buf, vec![0b10001111u8]);
    }

    #[test]
    fn bitwriter_pads_the_last_byte() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_f(3, 0b100u8).unwrap();
            writer.write_f(3, 0b101u8).unwrap();
            writer.write_f(3, 0b011u8).unwrap();
        }
        assert_eq!(buf, vec![0b10010101u8, 0b10000000u8]);
    }

    #[test]
    fn bitwriter_signed_values() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = BitWriter::new(&mut buf);
            writer.write_signed(3, -5).unwrap();
            writer.write_signed(3, 2).unwrap();
        }
        assert_eq!(buf, vec![0b10110100u8]);
    }
}
