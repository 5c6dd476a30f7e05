use crate::*;
use std::collections::TryReserveError;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, trace};

type Result<T> = core::result::Result<T, SarcWriteError>;

/// Name written for placeholder slots. Together with its terminator it
/// fills exactly one name slot.
const NIL_NAME: &str = "DMY";
const NAME_ALIGNMENT: usize = 4;
const DATA_ALIGNMENT: usize = 0x80;
const DATA_OFFSET_ALIGNMENT: usize = 0x20;
const MAX_FILES: usize = 0x3FFF;

#[derive(Debug, Error)]
pub enum SarcWriteError {
    #[error("{0} files exceed the maximum of 0x3FFF")]
    TooManyFiles(usize),
    #[error("File name {0:?} contains a NUL byte")]
    InvalidName(String),
    #[error("Archive layout does not fit in 32-bit offsets")]
    OffsetOverflow,
    #[error("Name offset {0:#x} cannot be encoded as {1:?}")]
    NameOffsetOverflow(usize, NameLocator),
    #[error("Failed to allocate the archive buffer")]
    Allocation(#[from] TryReserveError),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// One logical entry of an archive being built.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BuildEntry {
    /// A named file and its payload
    File { name: String, data: Vec<u8> },
    /// A positional placeholder with no content. Written as the name `DMY`
    /// and 128 zero bytes.
    Nil,
}

impl BuildEntry {
    pub fn file<N: Into<String>, D: Into<Vec<u8>>>(name: N, data: D) -> BuildEntry {
        BuildEntry::File {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, BuildEntry::Nil)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            BuildEntry::File { name, .. } => Some(name),
            BuildEntry::Nil => None,
        }
    }
}

/// Slot sizes and record of one entry, computed by the layout pass.
struct Slot {
    entry: ResFatEntry,
    name_offset: usize,
    data_offset: usize,
}

/// Builds SARC archives, keeping entries in insertion order.
///
/// Every entry's name slot is padded to 4 bytes and its data slot to 128
/// bytes, except the last entry's, which are written unpadded.
#[derive(Debug, PartialEq, Clone)]
pub struct SarcWriter {
    endian: Endian,
    locator: NameLocator,
    hash_multiplier: u32,
    entries: Vec<BuildEntry>,
}

impl Default for SarcWriter {
    fn default() -> Self {
        SarcWriter::new(Endian::native())
    }
}

impl SarcWriter {
    pub fn new(endian: Endian) -> SarcWriter {
        SarcWriter {
            endian,
            locator: NameLocator::Split16,
            hash_multiplier: DEFAULT_HASH_KEY,
            entries: Vec::new(),
        }
    }

    /// Creates a writer that hashes names with the same multiplier, and
    /// encodes records the same way, as `sarc`.
    pub fn like(sarc: &Sarc) -> SarcWriter {
        SarcWriter {
            endian: Endian::native(),
            locator: sarc.locator(),
            hash_multiplier: sarc.hash_multiplier(),
            entries: Vec::new(),
        }
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian
    }

    pub fn set_locator(&mut self, locator: NameLocator) {
        self.locator = locator
    }

    pub fn set_hash_multiplier(&mut self, multiplier: u32) {
        self.hash_multiplier = multiplier
    }

    pub fn hash_multiplier(&self) -> u32 {
        self.hash_multiplier
    }

    pub fn add_entry(&mut self, entry: BuildEntry) {
        self.entries.push(entry)
    }

    pub fn add_file<N: Into<String>, D: Into<Vec<u8>>>(&mut self, name: N, data: D) {
        self.entries.push(BuildEntry::file(name, data))
    }

    pub fn entries(&self) -> &[BuildEntry] {
        &self.entries
    }

    fn layout(&self) -> Result<(Vec<Slot>, usize, usize)> {
        let nil_hash = hash_name(self.hash_multiplier, NIL_NAME);
        let mut slots = Vec::with_capacity(self.entries.len());
        let mut rel_string_offset = 0usize;
        let mut rel_data_offset = 0usize;
        for (i, entry) in self.entries.iter().enumerate() {
            if let BuildEntry::File { name, .. } = entry {
                if name.contains('\0') {
                    return Err(SarcWriteError::InvalidName(name.clone()));
                }
            }
            let is_last = i + 1 == self.entries.len();
            let (hash, name_size, data_size) = match entry {
                BuildEntry::Nil => (nil_hash, NAME_ALIGNMENT, DATA_ALIGNMENT),
                BuildEntry::File { name, data } if is_last => {
                    (hash_name(self.hash_multiplier, name), name.len() + 1, data.len())
                }
                BuildEntry::File { name, data } => (
                    hash_name(self.hash_multiplier, name),
                    align(name.len() + 1, NAME_ALIGNMENT),
                    align(data.len(), DATA_ALIGNMENT),
                ),
            };

            let word_offset = rel_string_offset / NAME_ALIGNMENT;
            if word_offset > self.locator.max_word_offset() as usize {
                return Err(SarcWriteError::NameOffsetOverflow(
                    rel_string_offset,
                    self.locator,
                ));
            }
            let data_len = match entry {
                BuildEntry::Nil => DATA_ALIGNMENT,
                BuildEntry::File { data, .. } => data.len(),
            };
            let data_end = rel_data_offset + data_len;
            if data_end > u32::MAX as usize {
                return Err(SarcWriteError::OffsetOverflow);
            }
            slots.push(Slot {
                entry: ResFatEntry {
                    name_hash: hash,
                    name_locator: self.locator.encode(word_offset as u32, self.endian),
                    data_begin: rel_data_offset as u32,
                    data_end: data_end as u32,
                },
                name_offset: rel_string_offset,
                data_offset: rel_data_offset,
            });
            trace!(
                "Slot {}: name @{:#x} ({} bytes), data @{:#x} ({} bytes)",
                i,
                rel_string_offset,
                name_size,
                rel_data_offset,
                data_size
            );

            rel_string_offset += name_size;
            rel_data_offset += data_size;
        }
        Ok((slots, rel_string_offset, rel_data_offset))
    }

    /// Lays out and writes the archive into a newly allocated buffer
    pub fn write_to_bytes(&self) -> Result<Vec<u8>> {
        if self.entries.len() > MAX_FILES {
            return Err(SarcWriteError::TooManyFiles(self.entries.len()));
        }
        let (slots, names_size, data_size) = self.layout()?;

        let names_offset = SARC_HEADER_SIZE
            + SFAT_HEADER_SIZE
            + SFAT_ENTRY_SIZE * slots.len()
            + SFNT_HEADER_SIZE;
        let data_offset = align(names_offset + names_size, DATA_OFFSET_ALIGNMENT);
        let file_size = data_offset + data_size;
        if file_size > u32::MAX as usize {
            return Err(SarcWriteError::OffsetOverflow);
        }
        debug!(
            "Building archive: {} entries, data at {:#x}, {} bytes",
            slots.len(),
            data_offset,
            file_size
        );

        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(file_size)?;
        buf.resize(file_size, 0);

        let mut opts = binwrite::WriterOption::default();
        opts.endian = match self.endian {
            Endian::Big => binwrite::Endian::Big,
            Endian::Little => binwrite::Endian::Little,
        };
        {
            let mut writer = Cursor::new(&mut buf);
            ResHeader {
                magic: SARC_MAGIC,
                header_size: SARC_HEADER_SIZE as u16,
                bom: self.endian.bom(),
                file_size: file_size as u32,
                data_offset: data_offset as u32,
                version: SARC_VERSION,
                reserved: 0,
            }
            .write_options(&mut writer, &opts)?;
            ResFatHeader {
                magic: SFAT_MAGIC,
                header_size: SFAT_HEADER_SIZE as u16,
                num_files: slots.len() as u16,
                hash_multiplier: self.hash_multiplier,
            }
            .write_options(&mut writer, &opts)?;
            for slot in &slots {
                slot.entry.write_options(&mut writer, &opts)?;
            }
            ResFntHeader {
                magic: SFNT_MAGIC,
                header_size: SFNT_HEADER_SIZE as u16,
                reserved: 0,
            }
            .write_options(&mut writer, &opts)?;
            debug_assert_eq!(writer.position(), names_offset as u64);
        }

        // The buffer is zero-filled, so padding and terminators are implicit.
        for (entry, slot) in self.entries.iter().zip(slots.iter()) {
            let name = entry.name().unwrap_or(NIL_NAME);
            let name_start = names_offset + slot.name_offset;
            buf[name_start..name_start + name.len()].copy_from_slice(name.as_bytes());
            if let BuildEntry::File { data, .. } = entry {
                let data_start = data_offset + slot.data_offset;
                buf[data_start..data_start + data.len()].copy_from_slice(data);
            }
        }
        Ok(buf)
    }
}
