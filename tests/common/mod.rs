/// Common test utilities
///
/// - `faulty_device`: in-memory source with injected bad ranges
/// - image and journal helpers shared by the integration tests
pub mod faulty_device;

#[allow(unused_imports)]
pub use faulty_device::{pattern_byte, FaultyDevice, ReadRecord};

use salvage_copy::{Journal, SectorStatus, SECTOR_SIZE};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Image file whose sectors follow `pattern_byte`
#[allow(dead_code)]
pub fn pattern_image(sectors: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create image");
    let mut data = Vec::with_capacity((sectors * SECTOR_SIZE) as usize);
    for lba in 0..sectors {
        data.extend(std::iter::repeat(pattern_byte(lba)).take(SECTOR_SIZE as usize));
    }
    file.write_all(&data).expect("write image");
    file.flush().expect("flush image");
    file
}

/// Contents of one sector of an image file
#[allow(dead_code)]
pub fn sector(image: &[u8], lba: u64) -> &[u8] {
    let start = (lba * SECTOR_SIZE) as usize;
    &image[start..start + SECTOR_SIZE as usize]
}

/// Per-sector journal classification
#[allow(dead_code)]
pub fn classification(journal: &Journal) -> Vec<SectorStatus> {
    (0..journal.total_sectors())
        .map(|lba| journal.status(lba).expect("status in range"))
        .collect()
}

/// Check every ReadOk sector of the destination against the pattern
#[allow(dead_code)]
pub fn assert_ok_sectors_copied(destination: &Path, statuses: &[SectorStatus]) {
    let image = fs::read(destination).expect("read destination");
    for (lba, status) in statuses.iter().enumerate() {
        if *status == SectorStatus::ReadOk {
            let lba = lba as u64;
            assert!(
                sector(&image, lba).iter().all(|&b| b == pattern_byte(lba)),
                "sector {} was not copied",
                lba
            );
        }
    }
}

/// True if the file holds only zero bytes
#[allow(dead_code)]
pub fn is_all_zeros(path: &Path) -> bool {
    fs::read(path)
        .map(|data| data.iter().all(|&b| b == 0))
        .unwrap_or(false)
}
