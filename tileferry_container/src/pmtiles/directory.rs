//! PMTiles v3 directories: varint-encoded, column-oriented lists of entries.
//!
//! Layout: entry count, then per column: tile id deltas, run lengths, lengths, offsets. An offset
//! of `0` (for any entry but the first) means "directly after the previous entry"; every other
//! offset is stored plus one.

use super::ByteRange;
use anyhow::{Result, bail, ensure};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// One directory entry. A `run_length` of `0` points to a leaf directory; otherwise the entry
/// addresses `run_length` consecutive tile ids sharing the same data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
	pub tile_id: u64,
	pub range: ByteRange,
	pub run_length: u32,
}

impl Entry {
	pub fn new(tile_id: u64, offset: u64, length: u64, run_length: u32) -> Entry {
		Entry {
			tile_id,
			range: ByteRange::new(offset, length),
			run_length,
		}
	}

	pub fn is_leaf_pointer(&self) -> bool {
		self.run_length == 0
	}
}

fn read_varint(reader: &mut impl Read) -> Result<u64> {
	let mut value = 0;
	let mut shift = 0;
	loop {
		let byte = reader.read_u8()?;
		value |= (u64::from(byte) & 0x7F) << shift;
		if byte & 0x80 == 0 {
			break;
		}
		shift += 7;
		if shift >= 70 {
			bail!("Varint too long");
		}
	}
	Ok(value)
}

fn write_varint(writer: &mut impl Write, mut value: u64) -> Result<()> {
	while value >= 0x80 {
		writer.write_u8((value as u8 & 0x7F) | 0x80)?;
		value >>= 7;
	}
	writer.write_u8(value as u8)?;
	Ok(())
}

/// Decodes an uncompressed directory.
pub fn parse_entries(data: &[u8]) -> Result<Vec<Entry>> {
	let mut reader = Cursor::new(data);
	let count = read_varint(&mut reader)?;
	ensure!(
		count <= data.len() as u64,
		"directory claims {count} entries in {} bytes",
		data.len()
	);
	let count = count as usize;

	let mut entries: Vec<Entry> = Vec::with_capacity(count);
	let mut last_id: u64 = 0;
	for _ in 0..count {
		last_id += read_varint(&mut reader)?;
		entries.push(Entry::new(last_id, 0, 0, 0));
	}
	for entry in &mut entries {
		entry.run_length = u32::try_from(read_varint(&mut reader)?)?;
	}
	for entry in &mut entries {
		entry.range.length = read_varint(&mut reader)?;
	}
	for i in 0..count {
		let value = read_varint(&mut reader)?;
		entries[i].range.offset = if i > 0 && value == 0 {
			entries[i - 1].range.offset + entries[i - 1].range.length
		} else {
			value
				.checked_sub(1)
				.ok_or_else(|| anyhow::anyhow!("first directory entry has offset 0"))?
		};
	}
	Ok(entries)
}

/// Encodes entries sorted by tile id into an uncompressed directory.
pub fn serialize_entries(entries: &[Entry]) -> Result<Vec<u8>> {
	let mut writer = Vec::new();
	write_varint(&mut writer, entries.len() as u64)?;

	let mut last_id = 0;
	for entry in entries {
		ensure!(entry.tile_id >= last_id, "entries must be sorted by tile id");
		write_varint(&mut writer, entry.tile_id - last_id)?;
		last_id = entry.tile_id;
	}
	for entry in entries {
		write_varint(&mut writer, u64::from(entry.run_length))?;
	}
	for entry in entries {
		write_varint(&mut writer, entry.range.length)?;
	}
	for (i, entry) in entries.iter().enumerate() {
		let previous = i.checked_sub(1).map(|p| entries[p].range);
		match previous {
			Some(previous) if entry.range.offset == previous.offset + previous.length => write_varint(&mut writer, 0)?,
			_ => write_varint(&mut writer, entry.range.offset + 1)?,
		}
	}
	Ok(writer)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn varints() -> Result<()> {
		for value in [0, 1, 127, 128, 300, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
			let mut buffer = Vec::new();
			write_varint(&mut buffer, value)?;
			assert_eq!(read_varint(&mut Cursor::new(buffer))?, value);
		}

		let mut buffer = Vec::new();
		write_varint(&mut buffer, 300)?;
		assert_eq!(buffer, vec![0xAC, 0x02]);

		assert!(read_varint(&mut Cursor::new(vec![0xFF; 11])).is_err());
		Ok(())
	}

	#[test]
	fn known_directory() -> Result<()> {
		// two tiles stored back to back, then a run of three
		let bytes = [3, 0, 1, 4, 1, 1, 3, 10, 20, 5, 1, 0, 0];
		let entries = parse_entries(&bytes)?;
		assert_eq!(
			entries,
			vec![
				Entry::new(0, 0, 10, 1),
				Entry::new(1, 10, 20, 1),
				Entry::new(5, 30, 5, 3),
			]
		);
		assert_eq!(serialize_entries(&entries)?, bytes);
		Ok(())
	}

	#[test]
	fn non_contiguous_offsets() -> Result<()> {
		let entries = vec![Entry::new(3, 100, 10, 1), Entry::new(9, 5, 7, 0)];
		let bytes = serialize_entries(&entries)?;
		assert_eq!(parse_entries(&bytes)?, entries);
		assert!(entries[1].is_leaf_pointer());
		Ok(())
	}

	#[test]
	fn invalid_directories() {
		assert!(parse_entries(&[]).is_err());
		assert!(parse_entries(&[200]).is_err());
		assert!(parse_entries(&[1, 0, 1, 1]).is_err());
		assert!(serialize_entries(&[Entry::new(5, 0, 1, 1), Entry::new(1, 1, 1, 1)]).is_err());
	}
}
