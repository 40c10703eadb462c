use anyhow::{Result, bail, ensure};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::{fmt::Debug, io::Cursor};

/// Offset and length of a section of the archive.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteRange {
	pub offset: u64,
	pub length: u64,
}

impl ByteRange {
	pub fn new(offset: u64, length: u64) -> ByteRange {
		ByteRange { offset, length }
	}

	/// The range as slice bounds, shifted by `base`.
	pub fn bounds(&self, base: u64) -> Result<std::ops::Range<usize>> {
		let start = base
			.checked_add(self.offset)
			.and_then(|v| usize::try_from(v).ok());
		let end = start.and_then(|start| start.checked_add(usize::try_from(self.length).ok()?));
		match (start, end) {
			(Some(start), Some(end)) => Ok(start..end),
			_ => bail!("byte range {self:?} + {base} overflows"),
		}
	}
}

impl Debug for ByteRange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "ByteRange[{},{}]", self.offset, self.length)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
	Unknown = 0x0,
	None = 0x1,
	Gzip = 0x2,
	Brotli = 0x3,
	Zstd = 0x4,
}

impl Compression {
	pub fn from_u8(value: u8) -> Result<Compression> {
		Ok(match value {
			0 => Compression::Unknown,
			1 => Compression::None,
			2 => Compression::Gzip,
			3 => Compression::Brotli,
			4 => Compression::Zstd,
			_ => bail!("Unknown value {value} for PMTiles compression"),
		})
	}
}

/// The fixed-size header at the start of every PMTiles v3 archive.
#[derive(Debug, PartialEq)]
pub struct Header {
	pub root_dir: ByteRange,
	pub metadata: ByteRange,
	pub leaf_dirs: ByteRange,
	pub tile_data: ByteRange,
	pub addressed_tiles_count: u64,
	pub tile_entries_count: u64,
	pub tile_contents_count: u64,
	pub clustered: bool,
	pub internal_compression: Compression,
	pub tile_compression: Compression,
	pub tile_type: u8,
	pub min_zoom: u8,
	pub max_zoom: u8,
	pub min_lon_e7: i32,
	pub min_lat_e7: i32,
	pub max_lon_e7: i32,
	pub max_lat_e7: i32,
	pub center_zoom: u8,
	pub center_lon_e7: i32,
	pub center_lat_e7: i32,
}

impl Header {
	pub const LEN: usize = 127;

	pub fn deserialize(buffer: &[u8]) -> Result<Header> {
		ensure!(buffer.len() >= Header::LEN, "pmtiles header too short");
		ensure!(&buffer[0..7] == b"PMTiles", "pmtiles magic number exception");
		ensure!(buffer[7] == 3, "pmtiles version: must be 3");

		let mut reader = Cursor::new(&buffer[8..Header::LEN]);
		let range = |reader: &mut Cursor<&[u8]>| -> Result<ByteRange> {
			Ok(ByteRange::new(reader.read_u64::<LE>()?, reader.read_u64::<LE>()?))
		};

		Ok(Header {
			root_dir: range(&mut reader)?,
			metadata: range(&mut reader)?,
			leaf_dirs: range(&mut reader)?,
			tile_data: range(&mut reader)?,
			addressed_tiles_count: reader.read_u64::<LE>()?,
			tile_entries_count: reader.read_u64::<LE>()?,
			tile_contents_count: reader.read_u64::<LE>()?,
			clustered: reader.read_u8()? == 1,
			internal_compression: Compression::from_u8(reader.read_u8()?)?,
			tile_compression: Compression::from_u8(reader.read_u8()?)?,
			tile_type: reader.read_u8()?,
			min_zoom: reader.read_u8()?,
			max_zoom: reader.read_u8()?,
			min_lon_e7: reader.read_i32::<LE>()?,
			min_lat_e7: reader.read_i32::<LE>()?,
			max_lon_e7: reader.read_i32::<LE>()?,
			max_lat_e7: reader.read_i32::<LE>()?,
			center_zoom: reader.read_u8()?,
			center_lon_e7: reader.read_i32::<LE>()?,
			center_lat_e7: reader.read_i32::<LE>()?,
		})
	}

	pub fn serialize(&self) -> Result<Vec<u8>> {
		let mut writer: Vec<u8> = Vec::with_capacity(Header::LEN);
		writer.extend_from_slice(b"PMTiles");
		writer.write_u8(3)?;
		for range in [self.root_dir, self.metadata, self.leaf_dirs, self.tile_data] {
			writer.write_u64::<LE>(range.offset)?;
			writer.write_u64::<LE>(range.length)?;
		}
		writer.write_u64::<LE>(self.addressed_tiles_count)?;
		writer.write_u64::<LE>(self.tile_entries_count)?;
		writer.write_u64::<LE>(self.tile_contents_count)?;
		writer.write_u8(u8::from(self.clustered))?;
		writer.write_u8(self.internal_compression as u8)?;
		writer.write_u8(self.tile_compression as u8)?;
		writer.write_u8(self.tile_type)?;
		writer.write_u8(self.min_zoom)?;
		writer.write_u8(self.max_zoom)?;
		writer.write_i32::<LE>(self.min_lon_e7)?;
		writer.write_i32::<LE>(self.min_lat_e7)?;
		writer.write_i32::<LE>(self.max_lon_e7)?;
		writer.write_i32::<LE>(self.max_lat_e7)?;
		writer.write_u8(self.center_zoom)?;
		writer.write_i32::<LE>(self.center_lon_e7)?;
		writer.write_i32::<LE>(self.center_lat_e7)?;
		Ok(writer)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> Header {
		Header {
			root_dir: ByteRange::new(127, 2271),
			metadata: ByteRange::new(2398, 592),
			leaf_dirs: ByteRange::new(2990, 0),
			tile_data: ByteRange::new(2990, 25869006),
			addressed_tiles_count: 878,
			tile_entries_count: 878,
			tile_contents_count: 876,
			clustered: true,
			internal_compression: Compression::Gzip,
			tile_compression: Compression::Gzip,
			tile_type: 1,
			min_zoom: 0,
			max_zoom: 14,
			min_lon_e7: 130828300,
			min_lat_e7: 523344600,
			max_lon_e7: 137622450,
			max_lat_e7: 526783000,
			center_zoom: 7,
			center_lon_e7: 134225380,
			center_lat_e7: 525063800,
		}
	}

	#[test]
	fn layout() -> Result<()> {
		let bytes = sample().serialize()?;
		assert_eq!(bytes.len(), Header::LEN);
		assert_eq!(&bytes[0..8], b"PMTiles\x03");
		// addressed_tiles_count starts after magic, version and four ranges
		assert_eq!(&bytes[72..80], &878u64.to_le_bytes());
		assert_eq!(bytes[96], 1, "clustered");
		assert_eq!(Header::deserialize(&bytes)?, sample());
		Ok(())
	}

	#[test]
	fn rejects_invalid_headers() -> Result<()> {
		let bytes = sample().serialize()?;
		assert!(Header::deserialize(&bytes[0..100]).is_err());

		let mut wrong_magic = bytes.clone();
		wrong_magic[0] = b'X';
		assert!(Header::deserialize(&wrong_magic).is_err());

		let mut wrong_version = bytes;
		wrong_version[7] = 2;
		let error = Header::deserialize(&wrong_version).unwrap_err();
		assert_eq!(error.to_string(), "pmtiles version: must be 3");
		Ok(())
	}

	#[test]
	fn byte_range_bounds() -> Result<()> {
		assert_eq!(ByteRange::new(5, 10).bounds(100)?, 105..115);
		assert!(ByteRange::new(u64::MAX, 10).bounds(1).is_err());
		assert_eq!(format!("{:?}", ByteRange::new(1, 2)), "ByteRange[1,2]");
		Ok(())
	}
}
