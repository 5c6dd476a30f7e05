use crate::*;
use binread::{BinRead, BinReaderExt};
use derivative::*;
use std::{borrow::Cow, io::Cursor, ops::Range};
use thiserror::Error;

#[derive(Error, Debug)]
/// An enum representing all possible errors when reading a SARC archive
pub enum SarcError {
    #[error("Invalid {section} magic: {found:02X?}")]
    InvalidMagic {
        section: &'static str,
        found: [u8; 4],
    },
    #[error("Invalid byte order mark: {0:02X?}")]
    InvalidByteOrderMark([u8; 2]),
    #[error("File index {0} out of range")]
    OutOfRange(usize),
    #[error("Invalid {0} value: \"{1}\"")]
    InvalidData(String, String),
    #[error("A string in the name table was not terminated")]
    UnterminatedStringError,
    #[error("Invalid UTF file name")]
    InvalidFileName(#[from] std::str::Utf8Error),
    #[error(transparent)]
    ParseError(#[from] binread::Error),
}

pub type Result<T> = core::result::Result<T, SarcError>;

fn find_null(data: &[u8]) -> Result<usize> {
    data.iter()
        .position(|b| b == &0u8)
        .ok_or(SarcError::UnterminatedStringError)
}

fn read<T: BinRead>(endian: Endian, reader: &mut Cursor<&[u8]>) -> Result<T> {
    Ok(match endian {
        Endian::Big => reader.read_be()?,
        Endian::Little => reader.read_le()?,
    })
}

fn check_magic(section: &'static str, found: [u8; 4], expected: [u8; 4]) -> Result<()> {
    if found != expected {
        return Err(SarcError::InvalidMagic { section, found });
    }
    Ok(())
}

/// Section positions of a validated archive, decoded in the archive's own
/// byte order.
pub(crate) struct Layout {
    pub(crate) endian: Endian,
    pub(crate) header: ResHeader,
    pub(crate) fat_header: ResFatHeader,
    pub(crate) entries_offset: usize,
    pub(crate) fnt_header_offset: usize,
    pub(crate) names_offset: usize,
}

/// Validates the three section headers and the byte-order marker.
pub(crate) fn read_layout(data: &[u8]) -> Result<Layout> {
    let mut reader = Cursor::new(data);
    let magic: [u8; 4] = reader.read_be()?;
    check_magic("SARC", magic, SARC_MAGIC)?;
    reader.set_position(6);
    let bom: [u8; 2] = reader.read_be()?;
    let endian = Endian::from_bom(bom).ok_or(SarcError::InvalidByteOrderMark(bom))?;
    reader.set_position(0);

    let header: ResHeader = read(endian, &mut reader)?;
    if header.header_size as usize != SARC_HEADER_SIZE {
        return Err(SarcError::InvalidData(
            "SARC header size".to_owned(),
            header.header_size.to_string(),
        ));
    }

    let fat_header: ResFatHeader = read(endian, &mut reader)?;
    check_magic("SFAT", fat_header.magic, SFAT_MAGIC)?;
    if fat_header.header_size as usize != SFAT_HEADER_SIZE {
        return Err(SarcError::InvalidData(
            "SFAT header size".to_owned(),
            fat_header.header_size.to_string(),
        ));
    }
    if (fat_header.num_files >> 0xE) != 0 {
        return Err(SarcError::InvalidData(
            "SFAT file count".to_owned(),
            fat_header.num_files.to_string(),
        ));
    }

    let entries_offset = reader.position() as usize;
    let fnt_header_offset = entries_offset + SFAT_ENTRY_SIZE * fat_header.num_files as usize;
    reader.set_position(fnt_header_offset as u64);
    let fnt_header: ResFntHeader = read(endian, &mut reader)?;
    check_magic("SFNT", fnt_header.magic, SFNT_MAGIC)?;
    if fnt_header.header_size as usize != SFNT_HEADER_SIZE {
        return Err(SarcError::InvalidData(
            "SFNT header size".to_owned(),
            fnt_header.header_size.to_string(),
        ));
    }

    let names_offset = reader.position() as usize;
    if (header.data_offset as usize) < names_offset || header.data_offset as usize > data.len() {
        return Err(SarcError::InvalidData(
            "data offset".to_owned(),
            header.data_offset.to_string(),
        ));
    }

    Ok(Layout {
        endian,
        header,
        fat_header,
        entries_offset,
        fnt_header_offset,
        names_offset,
    })
}

/// One FAT record, decoded to native order.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Node {
    /// Stored name hash.
    pub hash: u32,
    /// Byte offset into the name pool, when the record carries one.
    pub name_offset: Option<u32>,
    /// Start of the data, relative to the data section.
    pub data_begin: u32,
    /// End of the data (exclusive), relative to the data section.
    pub data_end: u32,
}

impl Node {
    pub fn len(&self) -> usize {
        self.data_end.saturating_sub(self.data_begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file stored in an archive
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct File<'a> {
    pub name: Option<&'a str>,
    pub data: &'a [u8],
}

/// Walks the name pool in pool order, one NUL-terminated entry at a time.
struct NamePool<'a> {
    pool: &'a [u8],
    pos: usize,
    remaining: usize,
}

impl<'a> Iterator for NamePool<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.pos >= self.pool.len() {
            return None;
        }
        self.remaining -= 1;
        let rest = &self.pool[self.pos..];
        match find_null(rest) {
            Ok(len) => {
                self.pos += align(len + 1, 4);
                Some(Ok(&rest[..len]))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
/// A read-only SARC archive view
///
/// Headers and FAT records are decoded into native order up front; the
/// underlying bytes are never modified, whatever their byte order.
pub struct Sarc<'a> {
    endian: Endian,
    locator: NameLocator,
    hash_multiplier: u32,
    data_offset: u32,
    names_offset: u32,
    nodes: Vec<Node>,
    #[derivative(Debug = "ignore")]
    data: Cow<'a, [u8]>,
}

impl PartialEq for Sarc<'_> {
    /// Returns true if and only if the raw archive data is identical
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'a> Sarc<'a> {
    /// Parses a SARC archive from binary data.
    ///
    /// `locator` selects how FAT records encode their name offset; see
    /// [`NameLocator`].
    pub fn new<T>(data: T, locator: NameLocator) -> Result<Sarc<'a>>
    where
        T: Into<Cow<'a, [u8]>>,
    {
        let data = data.into();
        let layout = read_layout(&data)?;
        let endian = layout.endian;
        let data_offset = layout.header.data_offset;
        let names_offset = layout.names_offset as u32;

        let mut reader = Cursor::new(data.as_ref());
        reader.set_position(layout.entries_offset as u64);
        let mut nodes = Vec::with_capacity(layout.fat_header.num_files as usize);
        for index in 0..layout.fat_header.num_files as usize {
            let entry: ResFatEntry = read(endian, &mut reader)?;
            if entry.data_end < entry.data_begin
                || data_offset as usize + entry.data_end as usize > data.len()
            {
                return Err(SarcError::InvalidData(
                    format!("SFAT entry {} data range", index),
                    format!("{}..{}", entry.data_begin, entry.data_end),
                ));
            }
            nodes.push(Node {
                hash: entry.name_hash,
                name_offset: locator.decode(entry.name_locator, endian),
                data_begin: entry.data_begin,
                data_end: entry.data_end,
            });
        }

        Ok(Sarc {
            endian,
            locator,
            hash_multiplier: layout.fat_header.hash_multiplier,
            data_offset,
            names_offset,
            nodes,
            data,
        })
    }

    /// Returns true if the data starts like a raw (unwrapped) SARC archive
    pub fn is_sarc(data: &[u8]) -> bool {
        data.len() >= SARC_HEADER_SIZE && data[0..4] == SARC_MAGIC
    }

    /// Get the number of files that are stored in the archive
    pub fn file_count(&self) -> u16 {
        self.nodes.len() as u16
    }

    /// Get the offset to the beginning of file data
    pub fn data_offset(&self) -> usize {
        self.data_offset as usize
    }

    /// Get the archive endianness
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn locator(&self) -> NameLocator {
        self.locator
    }

    /// Get the name hash multiplier stored in the FAT header
    pub fn hash_multiplier(&self) -> u32 {
        self.hash_multiplier
    }

    /// FAT records in table order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// The raw archive bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn pool(&self) -> &[u8] {
        &self.data[self.names_offset as usize..self.data_offset as usize]
    }

    fn pool_entries(&self) -> NamePool<'_> {
        NamePool {
            pool: self.pool(),
            pos: 0,
            remaining: self.nodes.len(),
        }
    }

    fn name_at_offset(&self, offset: u32) -> Result<&str> {
        let pool = self.pool();
        let start = offset as usize;
        if start >= pool.len() {
            return Err(SarcError::InvalidData(
                "name offset".to_owned(),
                offset.to_string(),
            ));
        }
        let term_pos = find_null(&pool[start..])?;
        Ok(std::str::from_utf8(&pool[start..start + term_pos])?)
    }

    /// Returns the first name in the pool whose hash equals `hash`
    pub fn name_from_hash(&self, hash: u32) -> Result<Option<&str>> {
        for name in self.pool_entries() {
            let name = name?;
            if hash_name(self.hash_multiplier, name) == hash {
                return Ok(Some(std::str::from_utf8(name)?));
            }
        }
        Ok(None)
    }

    /// Resolves the name of the file at `index`.
    ///
    /// Records without a name offset are resolved by scanning the pool for
    /// a name with the record's hash. `None` if the index is out of range or
    /// no name matches.
    pub fn name_at(&self, index: usize) -> Result<Option<&str>> {
        let node = match self.nodes.get(index) {
            Some(node) => node,
            None => return Ok(None),
        };
        match node.name_offset {
            Some(offset) => self.name_at_offset(offset).map(Some),
            None => self.name_from_hash(node.hash),
        }
    }

    /// Absolute byte range of the data of the file at `index`
    pub fn data_range(&self, index: usize) -> Option<Range<usize>> {
        self.nodes.get(index).map(|node| {
            let start = self.data_offset as usize + node.data_begin as usize;
            start..start + node.len()
        })
    }

    /// Data of the file at `index`
    pub fn data_at(&self, index: usize) -> Option<&[u8]> {
        self.data_range(index).map(|range| &self.data[range])
    }

    /// Index of the first FAT record whose hash matches `path`.
    ///
    /// This compares hashes only, so distinct names that collide are
    /// indistinguishable.
    pub fn find_index(&self, path: &str) -> Option<usize> {
        let needle_hash = hash_name(self.hash_multiplier, path);
        self.nodes.iter().position(|node| node.hash == needle_hash)
    }

    /// Data of the first file whose hash matches `path`
    pub fn find_by_path(&self, path: &str) -> Option<&[u8]> {
        self.find_index(path).and_then(|index| self.data_at(index))
    }

    /// Get a file by name
    pub fn get_file(&self, file: &str) -> Result<Option<File>> {
        match self.find_index(file) {
            Some(index) => self.file_at(index).map(Some),
            None => Ok(None),
        }
    }

    /// Get a file by index. Returns error if index > file count.
    pub fn file_at(&self, index: usize) -> Result<File> {
        let data = self.data_at(index).ok_or(SarcError::OutOfRange(index))?;
        Ok(File {
            name: self.name_at(index)?,
            data,
        })
    }

    /// Returns an iterator over the contained files
    pub fn files(&'_ self) -> impl Iterator<Item = File<'_>> {
        (0..self.nodes.len()).flat_map(move |i| self.file_at(i).ok())
    }

    /// Guess the minimum data alignment for files that are stored in the archive
    pub fn guess_min_alignment(&self) -> usize {
        const MIN_ALIGNMENT: u32 = 4;
        let gcd = self.nodes.iter().fold(0, |gcd, node| {
            num::integer::gcd(gcd, self.data_offset + node.data_begin)
        });

        if gcd < MIN_ALIGNMENT || !is_valid_alignment(gcd as usize) {
            return MIN_ALIGNMENT as usize;
        }
        gcd as usize
    }

    /// Returns true is each archive contains the same files
    pub fn are_files_equal(sarc1: &Sarc, sarc2: &Sarc) -> bool {
        sarc1.file_count() == sarc2.file_count()
            && sarc1.files().zip(sarc2.files()).all(|(f1, f2)| f1 == f2)
    }
}

#[cfg(test)]
mod tests {
    use crate::{hash_name, BuildEntry, Endian, NameLocator, Node, Sarc, SarcError, SarcWriter};

    fn sample() -> Vec<u8> {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.add_file("foo.bin", vec![1u8; 10]);
        writer.add_file("bar/baz.bin", (0..300).map(|i| i as u8).collect::<Vec<u8>>());
        writer.write_to_bytes().unwrap()
    }

    #[test]
    fn parse_sarc() {
        let data = sample();
        let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        assert_eq!(sarc.endian(), Endian::Little);
        assert_eq!(sarc.file_count(), 2);
        assert_eq!(sarc.hash_multiplier(), 0x65);
        assert_eq!(sarc.data_offset() % 32, 0);
        assert_eq!(sarc.name_at(0).unwrap(), Some("foo.bin"));
        assert_eq!(sarc.name_at(1).unwrap(), Some("bar/baz.bin"));
        assert_eq!(sarc.data_at(0).unwrap(), &[1u8; 10][..]);
        assert_eq!(sarc.find_by_path("bar/baz.bin").unwrap().len(), 300);
        assert_eq!(sarc.guess_min_alignment(), 32);
    }

    #[test]
    fn lookups_out_of_range_are_absent() {
        let data = sample();
        let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        assert_eq!(sarc.name_at(2).unwrap(), None);
        assert_eq!(sarc.data_at(2), None);
        assert_eq!(sarc.data_range(usize::MAX), None);
        assert!(matches!(sarc.file_at(2), Err(SarcError::OutOfRange(2))));
        assert_eq!(sarc.find_by_path("missing.bin"), None);
        assert!(sarc.get_file("missing.bin").unwrap().is_none());
    }

    #[test]
    fn data_slices_match_record_lengths() {
        let data = sample();
        let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        for (index, node) in sarc.nodes().iter().enumerate() {
            assert_eq!(sarc.data_at(index).unwrap().len(), node.len());
        }
    }

    #[test]
    fn name_from_hash_scans_pool() {
        let data = sample();
        let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        let hash = hash_name(0x65, "bar/baz.bin");
        assert_eq!(sarc.name_from_hash(hash).unwrap(), Some("bar/baz.bin"));
        assert_eq!(sarc.name_from_hash(hash.wrapping_add(1)).unwrap(), None);
    }

    #[test]
    fn names_without_offsets_resolve_by_hash() {
        let mut data = sample();
        // Clear the name locator of both records
        for index in 0..2 {
            let at = 0x20 + 0x10 * index + 4;
            data[at..at + 4].copy_from_slice(&[0; 4]);
        }
        let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        assert_eq!(sarc.nodes()[0].name_offset, None);
        assert_eq!(sarc.name_at(0).unwrap(), Some("foo.bin"));
        assert_eq!(sarc.name_at(1).unwrap(), Some("bar/baz.bin"));
    }

    #[test]
    fn first_hash_match_wins() {
        // With a multiplier of 1 the hash is the byte sum, so "ab" and "ba" collide
        let mut writer = SarcWriter::new(Endian::Little);
        writer.set_hash_multiplier(1);
        writer.add_file("ab", vec![1u8]);
        writer.add_file("ba", vec![2u8, 2]);
        writer.add_file("ab", vec![3u8, 3, 3]);
        let mut data = writer.write_to_bytes().unwrap();

        {
            let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
            assert_eq!(sarc.find_by_path("ab"), Some(&[1u8][..]));
            assert_eq!(sarc.find_by_path("ba"), Some(&[1u8][..]));
            assert_eq!(sarc.find_index("ba"), Some(0));
            assert_eq!(sarc.name_from_hash(hash_name(1, "ba")).unwrap(), Some("ab"));
        }

        // Records without a locator resolve to the first pool entry with their hash
        for index in 1..3 {
            let at = 0x20 + 0x10 * index + 4;
            data[at..at + 4].copy_from_slice(&[0; 4]);
        }
        let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        assert_eq!(sarc.name_at(0).unwrap(), Some("ab"));
        assert_eq!(sarc.name_at(1).unwrap(), Some("ab"));
        assert_eq!(sarc.name_at(2).unwrap(), Some("ab"));
        assert_eq!(sarc.data_at(2).unwrap(), &[3u8, 3, 3][..]);
    }

    #[test]
    fn inverted_node_has_zero_length() {
        let node = Node {
            hash: 0,
            name_offset: None,
            data_begin: 10,
            data_end: 4,
        };
        assert_eq!(node.len(), 0);
        assert!(node.is_empty());
    }

    #[test]
    fn reads_both_byte_orders_without_mutation() {
        let mut writer = SarcWriter::new(Endian::Big);
        writer.set_locator(NameLocator::Attributes32);
        writer.add_file("a.txt", b"hello".to_vec());
        let data = writer.write_to_bytes().unwrap();
        let copy = data.clone();
        let sarc = Sarc::new(&data[..], NameLocator::Attributes32).unwrap();
        assert_eq!(sarc.endian(), Endian::Big);
        assert_eq!(sarc.name_at(0).unwrap(), Some("a.txt"));
        assert_eq!(sarc.find_by_path("a.txt"), Some(&b"hello"[..]));
        assert_eq!(sarc.as_bytes(), &copy[..]);
    }

    #[test]
    fn rejects_bad_magics() {
        let data = sample();
        for (at, section) in [(0usize, "SARC"), (0x14, "SFAT"), (0x40, "SFNT")].iter() {
            let mut broken = data.clone();
            broken[*at] = b'X';
            match Sarc::new(broken, NameLocator::Split16) {
                Err(SarcError::InvalidMagic { section: s, .. }) => assert_eq!(s, *section),
                other => panic!("expected magic error for {}, got {:?}", section, other),
            }
        }
    }

    #[test]
    fn rejects_bad_byte_order_mark() {
        let mut data = sample();
        data[6] = 0x12;
        assert!(matches!(
            Sarc::new(data, NameLocator::Split16),
            Err(SarcError::InvalidByteOrderMark(_))
        ));
    }

    #[test]
    fn rejects_out_of_bounds_data_range() {
        let mut data = sample();
        let at = 0x20 + 0x10 + 0xC;
        data[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Sarc::new(data, NameLocator::Split16),
            Err(SarcError::InvalidData(..))
        ));
    }

    #[test]
    fn rejects_truncated_archive() {
        let data = sample();
        assert!(Sarc::new(&data[..0x18], NameLocator::Split16).is_err());
    }

    #[test]
    fn nil_slots_read_back_as_placeholder() {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.add_entry(BuildEntry::Nil);
        writer.add_file("b.bin", vec![7u8; 3]);
        let data = writer.write_to_bytes().unwrap();
        let sarc = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        assert_eq!(sarc.name_at(0).unwrap(), Some("DMY"));
        assert_eq!(sarc.data_at(0).unwrap(), &[0u8; 128][..]);
        assert_eq!(sarc.data_at(1).unwrap(), &[7u8; 3][..]);
    }

    #[test]
    fn are_files_equal_compares_contents() {
        let data = sample();
        let a = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        let b = Sarc::new(data.clone(), NameLocator::Split16).unwrap();
        assert!(Sarc::are_files_equal(&a, &b));
        assert_eq!(a, b);
    }
}
