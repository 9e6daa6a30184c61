//! Image file formats
use std::str;
use std::{borrow::Cow, path::Path};

use anyhow::Result;

use crate::device::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    IntelHex,
    Binary,
}

/// Reads a firmware image, raw binary or Intel HEX (as produced by SDCC).
///
/// Images shorter than the main block are accepted.
pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    let image = match format {
        ImageFormat::IntelHex => read_ihex(str::from_utf8(&raw)?)?,
        ImageFormat::Binary => raw,
    };

    let max = Region::MainFlash.size();
    anyhow::ensure!(
        !image.is_empty() && image.len() <= max,
        "firmware image is {} bytes, expected 1..={} bytes",
        image.len(),
        max
    );
    Ok(image)
}

/// Reads a raw image that must fill `region` exactly.
pub fn read_image<P: AsRef<Path>>(path: P, region: Region) -> Result<Vec<u8>> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;
    anyhow::ensure!(
        raw.len() == region.size(),
        "{} is {} bytes, a {} image must be exactly {} bytes",
        p.display(),
        raw.len(),
        region,
        region.size()
    );
    Ok(raw)
}

pub fn write_image<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let p = path.as_ref();
    std::fs::write(p, data)?;
    log::info!("Saved {} bytes to {}", data.len(), p.display());
    Ok(())
}

pub fn guess_format(path: &Path, raw: &[u8]) -> ImageFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihx", "hex"].contains(&&*ext) {
        return ImageFormat::IntelHex;
    }

    if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|&c| (c as char).is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        ImageFormat::IntelHex
    } else {
        ImageFormat::Binary
    }
}

pub fn read_ihex(data: &str) -> Result<Vec<u8>> {
    use ihex::Record;

    let mut base_address = 0;

    let mut records = vec![];
    for record in ihex::Reader::new(data) {
        let record = record?;
        use Record::*;
        match record {
            Data { offset, value } => {
                let offset = base_address + offset as u32;

                records.push((offset, value.into()));
            }
            EndOfFile => (),
            ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            StartSegmentAddress { .. } => (),
            ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            StartLinearAddress(_) => (),
        };
    }
    merge_sections(records)
}

/// Lays the sections out at their absolute flash addresses, gaps left erased.
fn merge_sections(mut sections: Vec<(u32, Cow<[u8]>)>) -> Result<Vec<u8>> {
    anyhow::ensure!(!sections.is_empty(), "no data records in image");
    sections.sort(); // order by start address

    let end_address = sections
        .iter()
        .map(|(addr, sect)| *addr as usize + sect.len())
        .max()
        .unwrap_or(0);
    anyhow::ensure!(
        end_address <= Region::MainFlash.size(),
        "image data ends at 0x{:04X}, beyond program memory",
        end_address
    );

    let mut binary = vec![0xffu8; end_address];
    for (addr, sect) in sections {
        let start = addr as usize;
        binary[start..start + sect.len()].copy_from_slice(&sect);
    }
    Ok(binary)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::NamedTempFile;

    /// Removed again when dropped
    fn temp_file(suffix: &str, data: &[u8]) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn ihex_is_placed_at_absolute_addresses() {
        let hex = ":03000000020003F8\n:02001000AABB89\n:00000001FF\n";
        let image = read_ihex(hex).unwrap();
        assert_eq!(image.len(), 0x12);
        assert_eq!(image[..3], [0x02, 0x00, 0x03]);
        assert!(image[3..0x10].iter().all(|&b| b == 0xff));
        assert_eq!(image[0x10..], [0xaa, 0xbb]);
    }

    #[test]
    fn guess_by_extension_and_content() {
        assert_eq!(
            guess_format(Path::new("main.ihx"), b"\x02\x00"),
            ImageFormat::IntelHex
        );
        assert_eq!(
            guess_format(Path::new("main.bin"), b":00000001FF\r\n"),
            ImageFormat::IntelHex
        );
        assert_eq!(
            guess_format(Path::new("main.bin"), b"\x02\x00\x03"),
            ImageFormat::Binary
        );
        assert_eq!(guess_format(Path::new("main.bin"), b""), ImageFormat::Binary);
    }

    #[test]
    fn region_images_must_match_size() {
        let file = temp_file(".bin", &[0u8; 511]);
        assert!(read_image(file.path(), Region::InfoPage).is_err());

        let file = temp_file(".bin", &[0x5a; 512]);
        assert_eq!(read_image(file.path(), Region::InfoPage).unwrap(), vec![0x5a; 512]);
    }

    #[test]
    fn firmware_size_limits() {
        let file = temp_file(".bin", &[]);
        assert!(read_firmware_from_file(file.path()).is_err());

        let file = temp_file(".bin", &vec![0u8; Region::MainFlash.size() + 1]);
        assert!(read_firmware_from_file(file.path()).is_err());

        let file = temp_file(".bin", &[0x02, 0x00, 0x03]);
        assert_eq!(read_firmware_from_file(file.path()).unwrap(), [0x02, 0x00, 0x03]);

        let file = temp_file(".ihx", b":03000000020003F8\n:00000001FF\n");
        assert_eq!(read_firmware_from_file(file.path()).unwrap(), [0x02, 0x00, 0x03]);
    }
}
