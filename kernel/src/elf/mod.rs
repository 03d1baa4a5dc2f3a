/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Minimal ELF32 parsing: just enough of the header and program header table to load an
//! executable's `PT_LOAD` segments (§4.9). No relocation, no dynamic linking, no section headers.

use alloc::vec::Vec;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;
const PF_W: u32 = 1 << 1;

/// Why an ELF image could not be parsed.
#[derive(Clone, Copy, Debug)]
pub enum ElfError {
	/// Missing or malformed `\x7fELF` magic.
	BadMagic,
	/// Not a 32-bit little-endian executable.
	UnsupportedFormat,
	/// The file is too short to contain its own declared header/segment tables.
	Truncated,
}

/// A single `PT_LOAD` program header entry.
#[derive(Clone, Copy, Debug)]
pub struct ProgramHeader {
	pub offset: u32,
	pub vaddr: u32,
	pub file_size: u32,
	pub mem_size: u32,
	pub writable: bool,
}

/// A parsed ELF32 executable image.
pub struct Image {
	pub entry: u32,
	segments: Vec<ProgramHeader>,
}

impl Image {
	/// Parses `data` as an ELF32 executable, validating the header and program header table are
	/// in bounds.
	pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
		if data.len() < 52 {
			return Err(ElfError::Truncated);
		}
		if data[0..4] != ELF_MAGIC {
			return Err(ElfError::BadMagic);
		}
		let ei_class = data[4];
		let ei_data = data[5];
		if ei_class != 1 || ei_data != 1 {
			// Only 32-bit, little-endian is supported.
			return Err(ElfError::UnsupportedFormat);
		}
		let e_type = u16::from_le_bytes([data[16], data[17]]);
		if e_type != ET_EXEC {
			return Err(ElfError::UnsupportedFormat);
		}
		let entry = u32::from_le_bytes(data[24..28].try_into().unwrap());
		let phoff = u32::from_le_bytes(data[28..32].try_into().unwrap()) as usize;
		let phentsize = u16::from_le_bytes([data[42], data[43]]) as usize;
		let phnum = u16::from_le_bytes([data[44], data[45]]) as usize;

		let mut segments = Vec::with_capacity(phnum);
		for i in 0..phnum {
			let base = phoff + i * phentsize;
			if base + 32 > data.len() {
				return Err(ElfError::Truncated);
			}
			let p_type = u32::from_le_bytes(data[base..base + 4].try_into().unwrap());
			if p_type != PT_LOAD {
				continue;
			}
			let p_offset = u32::from_le_bytes(data[base + 4..base + 8].try_into().unwrap());
			let p_vaddr = u32::from_le_bytes(data[base + 8..base + 12].try_into().unwrap());
			let p_filesz = u32::from_le_bytes(data[base + 16..base + 20].try_into().unwrap());
			let p_memsz = u32::from_le_bytes(data[base + 20..base + 24].try_into().unwrap());
			let p_flags = u32::from_le_bytes(data[base + 24..base + 28].try_into().unwrap());
			segments.push(ProgramHeader {
				offset: p_offset,
				vaddr: p_vaddr,
				file_size: p_filesz,
				mem_size: p_memsz,
				writable: p_flags & PF_W != 0,
			});
		}
		Ok(Self { entry, segments })
	}

	/// Iterates the executable's loadable segments in program-header order.
	pub fn loadable_segments(&self) -> impl Iterator<Item = ProgramHeader> + '_ {
		self.segments.iter().copied()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn minimal_header(e_type: u16, phnum: u16) -> Vec<u8> {
		let mut h = alloc::vec![0u8; 52 + phnum as usize * 32];
		h[0..4].copy_from_slice(&ELF_MAGIC);
		h[4] = 1;
		h[5] = 1;
		h[16..18].copy_from_slice(&e_type.to_le_bytes());
		h[24..28].copy_from_slice(&0x1000u32.to_le_bytes());
		h[28..32].copy_from_slice(&52u32.to_le_bytes());
		h[42..44].copy_from_slice(&32u16.to_le_bytes());
		h[44..46].copy_from_slice(&phnum.to_le_bytes());
		h
	}

	#[test_case]
	fn rejects_bad_magic() {
		let mut data = minimal_header(ET_EXEC, 0);
		data[0] = 0;
		assert!(matches!(Image::parse(&data), Err(ElfError::BadMagic)));
	}

	#[test_case]
	fn rejects_non_executable_type() {
		let data = minimal_header(3, 0);
		assert!(matches!(Image::parse(&data), Err(ElfError::UnsupportedFormat)));
	}

	#[test_case]
	fn parses_entry_point() {
		let data = minimal_header(ET_EXEC, 0);
		let image = Image::parse(&data).unwrap();
		assert_eq!(image.entry, 0x1000);
	}
}
