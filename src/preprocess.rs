//! In-place byte-order normalization of archive buffers.
//!
//! [`Sarc`](crate::Sarc) reads either byte order without touching its input,
//! so normalization is only needed when a caller wants the raw buffer itself
//! in native order, e.g. to hand it to code that reads the structures
//! directly.
use crate::parse::{read_layout, Result};
use crate::*;
use tracing::debug;

/// Checks the section magics and byte-order marker without modifying the
/// buffer, returning the declared byte order.
pub fn validate(data: &[u8]) -> Result<Endian> {
    Ok(read_layout(data)?.endian)
}

/// Validates `data` and rewrites every header and FAT field in native byte
/// order.
///
/// Name pool and payload bytes are left untouched. Returns the byte order
/// the buffer had before the call; a buffer that is already native is not
/// modified, so calling this repeatedly is harmless.
pub fn normalize(data: &mut [u8], locator: NameLocator) -> Result<Endian> {
    let layout = read_layout(data)?;
    let native = Endian::native();
    if layout.endian == native {
        return Ok(layout.endian);
    }

    debug!(
        "Swapping {} FAT entries from {:?} to {:?} byte order",
        layout.fat_header.num_files, layout.endian, native
    );

    // File header: header size, file size, data offset, version, reserved
    for field in &[4..6, 8..12, 12..16, 16..18, 18..20] {
        data[field.clone()].reverse();
    }

    // FAT header: header size, file count, hash multiplier
    let fat = SARC_HEADER_SIZE;
    for field in &[4..6, 6..8, 8..12] {
        data[fat + field.start..fat + field.end].reverse();
    }

    for index in 0..layout.fat_header.num_files as usize {
        let entry = layout.entries_offset + SFAT_ENTRY_SIZE * index;
        data[entry..entry + 4].reverse();
        locator.swap(&mut data[entry + 4..entry + 8]);
        data[entry + 8..entry + 12].reverse();
        data[entry + 12..entry + 16].reverse();
    }

    // FNT header: header size, reserved
    let fnt = layout.fnt_header_offset;
    data[fnt + 4..fnt + 6].reverse();
    data[fnt + 6..fnt + 8].reverse();

    data[6..8].copy_from_slice(&native.bom());
    Ok(layout.endian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Sarc, SarcError, SarcWriter};

    fn build(endian: Endian, locator: NameLocator) -> Vec<u8> {
        let mut writer = SarcWriter::new(endian);
        writer.set_locator(locator);
        writer.add_file("Layout/main.bflyt", vec![0xAB; 200]);
        writer.add_entry(BuildEntry::Nil);
        writer.add_file("Timg/icon.bflim", (0..=255u8).collect::<Vec<u8>>());
        writer.write_to_bytes().unwrap()
    }

    #[test]
    fn native_buffer_is_untouched() {
        let native = build(Endian::native(), NameLocator::Split16);
        let mut data = native.clone();
        assert_eq!(normalize(&mut data, NameLocator::Split16).unwrap(), Endian::native());
        assert_eq!(data, native);
    }

    #[test]
    fn normalization_is_idempotent() {
        let foreign = build(Endian::native().swapped(), NameLocator::Split16);
        let mut once = foreign.clone();
        normalize(&mut once, NameLocator::Split16).unwrap();
        let mut twice = once.clone();
        assert_eq!(
            normalize(&mut twice, NameLocator::Split16).unwrap(),
            Endian::native()
        );
        assert_eq!(once, twice);
    }

    #[test]
    fn foreign_buffer_matches_native_build() {
        for locator in [NameLocator::Split16, NameLocator::Attributes32].iter() {
            let native = build(Endian::native(), *locator);
            let mut foreign = build(Endian::native().swapped(), *locator);
            assert_ne!(foreign, native);
            assert_eq!(
                normalize(&mut foreign, *locator).unwrap(),
                Endian::native().swapped()
            );
            assert_eq!(foreign, native);
        }
    }

    #[test]
    fn normalized_buffer_parses_identically() {
        let foreign = build(Endian::native().swapped(), NameLocator::Split16);
        let before = Sarc::new(&foreign[..], NameLocator::Split16).unwrap();
        let mut data = foreign.clone();
        normalize(&mut data, NameLocator::Split16).unwrap();
        let after = Sarc::new(&data[..], NameLocator::Split16).unwrap();
        assert_eq!(after.endian(), Endian::native());
        assert_eq!(before.nodes(), after.nodes());
        assert!(Sarc::are_files_equal(&before, &after));
    }

    #[test]
    fn invalid_input_is_left_alone() {
        let mut data = build(Endian::native().swapped(), NameLocator::Split16);
        data[0x14] = b'X';
        let copy = data.clone();
        assert!(matches!(
            normalize(&mut data, NameLocator::Split16),
            Err(SarcError::InvalidMagic { section: "SFAT", .. })
        ));
        assert_eq!(data, copy);
    }

    #[test]
    fn validate_reports_byte_order() {
        let data = build(Endian::Big, NameLocator::Split16);
        assert_eq!(validate(&data).unwrap(), Endian::Big);
        assert!(validate(b"SARC").is_err());
    }
}
