// Raw device handle - open flags, block ioctls, read-ahead bookkeeping
//
// Regular files are accepted everywhere a block device is, so images and
// tests run without hardware. The block-only ioctls are skipped for them.

use crate::{SalvageError, SalvageResult, SECTOR_SIZE};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

mod ioctls {
    nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);
    nix::ioctl_none!(blkflsbuf, 0x12, 97);
    nix::ioctl_read_bad!(blkraget, nix::request_code_none!(0x12, 99), libc::c_long);
    nix::ioctl_write_int_bad!(blkraset, nix::request_code_none!(0x12, 98));
}

/// Open file or block device
#[derive(Debug)]
pub struct RawDevice {
    file: File,
    path: PathBuf,
    block_device: bool,
    capacity_bytes: u64,
    saved_readahead: Option<libc::c_long>,
}

impl RawDevice {
    /// Open for unbuffered reading. Block devices get `O_DIRECT | O_NOATIME`.
    pub fn open_read(path: &Path) -> SalvageResult<Self> {
        Self::open(path, false)
    }

    /// Open for writing in place, never truncating
    pub fn open_write(path: &Path) -> SalvageResult<Self> {
        Self::open(path, true)
    }

    fn open(path: &Path, write: bool) -> SalvageResult<Self> {
        let open_err = |source| SalvageError::Open {
            path: path.to_path_buf(),
            source,
        };
        let block_device = std::fs::metadata(path)
            .map_err(open_err)?
            .file_type()
            .is_block_device();

        let mut opts = OpenOptions::new();
        opts.read(true).write(write);
        let file = if block_device {
            let direct = opts
                .clone()
                .custom_flags(libc::O_DIRECT | libc::O_NOATIME)
                .open(path);
            match direct {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(
                        device = %path.display(),
                        error = %e,
                        "Direct open failed, falling back to buffered access"
                    );
                    opts.open(path).map_err(open_err)?
                }
            }
        } else {
            opts.open(path).map_err(open_err)?
        };

        let capacity_bytes = if block_device {
            let mut size: u64 = 0;
            unsafe { ioctls::blkgetsize64(file.as_raw_fd(), &mut size) }
                .map_err(|e| open_err(std::io::Error::from(e)))?;
            size
        } else {
            file.metadata().map_err(open_err)?.len()
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_device,
            capacity_bytes,
            saved_readahead: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn is_block_device(&self) -> bool {
        self.block_device
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_bytes / SECTOR_SIZE
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        self.file.write_at(buf, offset)
    }

    /// Drop cached pages and switch read-ahead off for the duration of a copy
    pub fn prepare_for_copy(&mut self) {
        if !self.block_device {
            return;
        }
        let fd = self.file.as_raw_fd();

        if let Err(e) = unsafe { ioctls::blkflsbuf(fd) } {
            tracing::warn!(device = %self.path.display(), error = %e, "Failed to flush buffers");
        }

        let mut readahead: libc::c_long = 0;
        match unsafe { ioctls::blkraget(fd, &mut readahead) } {
            Ok(_) => {
                if self.saved_readahead.is_none() {
                    self.saved_readahead = Some(readahead);
                }
                match unsafe { ioctls::blkraset(fd, 0) } {
                    Ok(_) => tracing::debug!(
                        device = %self.path.display(),
                        previous = readahead,
                        "Read-ahead disabled"
                    ),
                    Err(e) => tracing::warn!(
                        device = %self.path.display(),
                        error = %e,
                        "Failed to disable read-ahead"
                    ),
                }
            }
            Err(e) => {
                tracing::warn!(device = %self.path.display(), error = %e, "Failed to get read-ahead")
            }
        }
    }

    /// Put back the read-ahead value saved by `prepare_for_copy`
    pub fn restore_readahead(&mut self) {
        let Some(saved) = self.saved_readahead.take() else {
            return;
        };
        let value = libc::c_int::try_from(saved).unwrap_or(libc::c_int::MAX);
        if let Err(e) = unsafe { ioctls::blkraset(self.file.as_raw_fd(), value) } {
            tracing::warn!(
                device = %self.path.display(),
                error = %e,
                "Failed to restore read-ahead"
            );
        }
    }
}

impl AsRawFd for RawDevice {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.file.as_raw_fd()
    }
}

impl Drop for RawDevice {
    fn drop(&mut self) {
        self.restore_readahead();
    }
}

/// What a controller needs to know about a source before opening it
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub capacity_bytes: u64,
    pub is_block_device: bool,
    /// Reachable through ATA PASS-THROUGH
    pub ata_capable: bool,
    pub model: Option<String>,
}

impl DeviceInfo {
    pub fn probe(path: &Path) -> SalvageResult<Self> {
        let device = RawDevice::open(path, false)?;
        let sysfs = path
            .file_name()
            .map(|name| PathBuf::from("/sys/block").join(name).join("device"));

        let read_attr = |attr: &str| -> Option<String> {
            let dir = sysfs.as_ref()?;
            std::fs::read_to_string(dir.join(attr))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let ata_capable = device.is_block_device()
            && read_attr("vendor").is_some_and(|vendor| vendor == "ATA");

        Ok(Self {
            path: path.to_path_buf(),
            capacity_bytes: device.capacity_bytes(),
            is_block_device: device.is_block_device(),
            ata_capable,
            model: read_attr("model"),
        })
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_bytes / SECTOR_SIZE
    }
}
