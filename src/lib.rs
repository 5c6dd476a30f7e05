//! Reading, building and reconciling SARC archives.
//!
//! A SARC archive is a flat table of named byte blobs. Entries are located by
//! a polynomial hash of their name, keyed by a multiplier stored in the
//! archive itself. [`Sarc`] is a read-only view over a whole archive,
//! [`SarcWriter`] lays out and materializes a new one, and [`reconcile`]
//! derives a writer entry list that mirrors the slot order of a reference
//! archive.
use binread::BinRead;
use binwrite::BinWrite;
mod parse;
pub mod preprocess;
mod reconcile;
mod writer;
pub mod zlib;
pub use parse::{File, Node, Sarc, SarcError};
pub use reconcile::{is_glob_pattern, normalize_path, reconcile, ReconcileError};
pub use writer::{BuildEntry, SarcWriteError, SarcWriter};

const SARC_MAGIC: [u8; 4] = *b"SARC";
const SFAT_MAGIC: [u8; 4] = *b"SFAT";
const SFNT_MAGIC: [u8; 4] = *b"SFNT";

const SARC_HEADER_SIZE: usize = 0x14;
const SFAT_HEADER_SIZE: usize = 0x0C;
const SFAT_ENTRY_SIZE: usize = 0x10;
const SFNT_HEADER_SIZE: usize = 0x08;
const SARC_VERSION: u16 = 0x0100;

/// Hash multiplier used by the format's producer.
pub const DEFAULT_HASH_KEY: u32 = 0x65;

/// Hashes an entry name with the given multiplier.
///
/// Bytes are sign-extended before accumulation, so names containing
/// non-ASCII bytes hash the same way the format's producer hashes them.
pub fn hash_name<N: AsRef<[u8]>>(multiplier: u32, name: N) -> u32 {
    name.as_ref().iter().fold(0u32, |hash, &b| {
        hash.wrapping_mul(multiplier).wrapping_add(b as i8 as u32)
    })
}

/// Byte order of an archive, as declared by its byte-order marker.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// The byte order of the running target.
    pub fn native() -> Endian {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// Decodes the two raw marker bytes at offset 6 of the file header.
    pub fn from_bom(bom: [u8; 2]) -> Option<Endian> {
        match bom {
            [0xFE, 0xFF] => Some(Endian::Big),
            [0xFF, 0xFE] => Some(Endian::Little),
            _ => None,
        }
    }

    pub fn bom(self) -> [u8; 2] {
        match self {
            Endian::Big => [0xFE, 0xFF],
            Endian::Little => [0xFF, 0xFE],
        }
    }

    pub fn swapped(self) -> Endian {
        match self {
            Endian::Big => Endian::Little,
            Endian::Little => Endian::Big,
        }
    }

    fn u16_from(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Big => u16::from_be_bytes(bytes),
            Endian::Little => u16::from_le_bytes(bytes),
        }
    }

    fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            Endian::Big => u32::from_be_bytes(bytes),
            Endian::Little => u32::from_le_bytes(bytes),
        }
    }

    fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        }
    }

    fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        }
    }
}

impl Default for Endian {
    fn default() -> Self {
        Endian::native()
    }
}

/// Layout of the 4-byte name locator in each FAT entry.
///
/// Two incompatible layouts exist in the wild and nothing inside an archive
/// tells them apart, so the caller has to choose one.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum NameLocator {
    /// A 16-bit name offset (in words) followed by a 16-bit availability flag.
    Split16,
    /// A single 32-bit word: flags in the top byte, name offset (in words)
    /// in the low 24 bits. Zero means the entry has no name.
    Attributes32,
}

impl NameLocator {
    /// Largest name offset, in 4-byte words, this layout can address.
    pub fn max_word_offset(self) -> u32 {
        match self {
            NameLocator::Split16 => 0xFFFF,
            NameLocator::Attributes32 => 0x00FF_FFFF,
        }
    }

    /// Returns the byte offset into the name pool, if the entry carries one.
    fn decode(self, raw: [u8; 4], endian: Endian) -> Option<u32> {
        match self {
            NameLocator::Split16 => {
                let offset = endian.u16_from([raw[0], raw[1]]);
                let available = endian.u16_from([raw[2], raw[3]]);
                if available != 0 {
                    Some(offset as u32 * 4)
                } else {
                    None
                }
            }
            NameLocator::Attributes32 => {
                let attributes = endian.u32_from(raw);
                if attributes != 0 {
                    Some((attributes & 0x00FF_FFFF) * 4)
                } else {
                    None
                }
            }
        }
    }

    /// Encodes a present name at `word_offset` (byte offset / 4).
    fn encode(self, word_offset: u32, endian: Endian) -> [u8; 4] {
        let mut raw = [0u8; 4];
        match self {
            NameLocator::Split16 => {
                raw[..2].copy_from_slice(&endian.u16_bytes(word_offset as u16));
                raw[2..].copy_from_slice(&endian.u16_bytes(0x0100));
            }
            NameLocator::Attributes32 => {
                raw = endian.u32_bytes(1 << 24 | word_offset);
            }
        }
        raw
    }

    /// Reverses the byte order of an encoded locator in place.
    fn swap(self, raw: &mut [u8]) {
        match self {
            NameLocator::Split16 => {
                raw[..2].reverse();
                raw[2..4].reverse();
            }
            NameLocator::Attributes32 => raw[..4].reverse(),
        }
    }
}

/// Size = 0x14
#[derive(Debug, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
struct ResHeader {
    magic: [u8; 4],
    header_size: u16,
    bom: [u8; 2],
    file_size: u32,
    data_offset: u32,
    version: u16,
    reserved: u16,
}

/// Size = 0x0C
#[derive(Debug, Copy, Clone, Eq, PartialEq, BinRead, BinWrite)]
struct ResFatHeader {
    magic: [u8; 4],
    header_size: u16,
    num_files: u16,
    hash_multiplier: u32,
}

/// Size = 0x10
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct ResFatEntry {
    name_hash: u32,
    name_locator: [u8; 4],
    data_begin: u32,
    data_end: u32,
}

/// Size = 0x8
#[derive(Debug, PartialEq, Eq, Copy, Clone, BinRead, BinWrite)]
struct ResFntHeader {
    magic: [u8; 4],
    header_size: u16,
    reserved: u16,
}

fn align(pos: usize, alignment: usize) -> usize {
    (pos + alignment - 1) & !(alignment - 1)
}

fn is_valid_alignment(alignment: usize) -> bool {
    alignment != 0 && (alignment & (alignment - 1)) == 0
}
