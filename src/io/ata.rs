// Hardware-direct access path: ATA PASS-THROUGH(16) over SG_IO
//
// Reads use READ DMA EXT, surface verification uses READ VERIFY SECTORS EXT.
// The ATA status and error registers come back in the sense buffer's ATA
// return descriptor, which is what gives the finer per-block classification.

use super::{BlockAccessor, BlockOutcome, BlockStatus, DeviceInfo, RawDevice};
use crate::options::Api;
use crate::{SalvageError, SalvageResult, SECTOR_SIZE};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Instant;

pub const ATA_TIMEOUT_MS: u32 = 1000;

const ATA_PASS_THROUGH_16: u8 = 0x85;
const PROTOCOL_NON_DATA: u8 = 3;
const PROTOCOL_DMA: u8 = 6;
/// CK_COND, no transfer
const FLAGS_NON_DATA: u8 = 0x20;
/// CK_COND, T_DIR in, BYT_BLOK, length in sector count
const FLAGS_DATA_IN: u8 = 0x2e;

pub const CMD_READ_DMA_EXT: u8 = 0x25;
pub const CMD_READ_VERIFY_EXT: u8 = 0x42;

const SG_DXFER_NONE: i32 = -1;
const SG_DXFER_FROM_DEV: i32 = -3;
const SG_FLAG_DIRECT_IO: u32 = 1;
const SENSE_LEN: usize = 32;

const STATUS_ERR: u8 = 1 << 0;
const STATUS_DF: u8 = 1 << 5;
const ERROR_AMNF: u8 = 1 << 0;
const ERROR_ABRT: u8 = 1 << 2;
const ERROR_IDNF: u8 = 1 << 4;
const ERROR_UNC: u8 = 1 << 6;

const SENSE_KEY_RECOVERED_ERROR: u8 = 0x01;
const SENSE_KEY_ABORTED_COMMAND: u8 = 0x0b;

/// Linux `sg_io_hdr_t`
#[repr(C)]
#[derive(Debug)]
pub struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *mut libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

nix::ioctl_readwrite_bad!(sg_io, 0x2285, SgIoHdr);

/// Build the 16-byte pass-through CDB for a 48-bit command
pub fn build_cdb(command: u8, lba: u64, sectors: u16, data_in: bool) -> [u8; 16] {
    let (protocol, flags) = if data_in {
        (PROTOCOL_DMA, FLAGS_DATA_IN)
    } else {
        (PROTOCOL_NON_DATA, FLAGS_NON_DATA)
    };
    let lba = lba.to_le_bytes();
    let count = sectors.to_le_bytes();

    let mut cdb = [0u8; 16];
    cdb[0] = ATA_PASS_THROUGH_16;
    cdb[1] = (protocol << 1) | 1;
    cdb[2] = flags;
    cdb[5] = count[1];
    cdb[6] = count[0];
    cdb[7] = lba[3];
    cdb[8] = lba[0];
    cdb[9] = lba[4];
    cdb[10] = lba[1];
    cdb[11] = lba[5];
    cdb[12] = lba[2];
    cdb[13] = 0x40;
    cdb[14] = command;
    cdb
}

/// Sense key of fixed or descriptor format sense data
pub fn sense_key(sense: &[u8]) -> u8 {
    match sense.first().map(|b| b & 0x7f) {
        Some(0x72) | Some(0x73) => sense.get(1).map_or(0, |b| b & 0x0f),
        Some(0x70) | Some(0x71) => sense.get(2).map_or(0, |b| b & 0x0f),
        _ => 0,
    }
}

/// Completion of one pass-through command
#[derive(Debug, Clone, Copy)]
pub struct Completion<'a> {
    pub ioctl_ok: bool,
    pub duration_ms: u32,
    pub timeout_ms: u32,
    pub sense: &'a [u8],
    pub resid: i32,
}

/// Map a completion onto the block status taxonomy
pub fn classify(c: &Completion<'_>) -> BlockStatus {
    if !c.ioctl_ok {
        return BlockStatus::Error;
    }
    if c.duration_ms >= c.timeout_ms {
        return BlockStatus::Timeout;
    }

    // ATA return descriptor starts after the 8-byte sense header
    let descriptor = c.sense.get(8..).unwrap_or(&[]);
    let error = descriptor.get(3).copied().unwrap_or(0);
    let status = descriptor.get(13).copied().unwrap_or(0);

    if status & STATUS_ERR != 0 {
        return if error & ERROR_UNC != 0 {
            BlockStatus::Unc
        } else if error & ERROR_IDNF != 0 {
            BlockStatus::Idnf
        } else if error & ERROR_ABRT != 0 {
            BlockStatus::Abrt
        } else if error & ERROR_AMNF != 0 {
            BlockStatus::Amnf
        } else {
            BlockStatus::Error
        };
    }
    if status & STATUS_DF != 0 {
        return BlockStatus::Error;
    }

    match sense_key(c.sense) {
        0 | SENSE_KEY_RECOVERED_ERROR => {}
        SENSE_KEY_ABORTED_COMMAND => return BlockStatus::Abrt,
        _ => return BlockStatus::Error,
    }

    if c.resid != 0 {
        return BlockStatus::Error;
    }
    BlockStatus::Ok
}

pub struct AtaAccessor {
    device: RawDevice,
}

impl AtaAccessor {
    /// Open a device that answers ATA PASS-THROUGH
    pub fn open(path: &Path) -> SalvageResult<Self> {
        let info = DeviceInfo::probe(path)?;
        if !info.ata_capable {
            return Err(SalvageError::UnsupportedApi(format!(
                "{} does not support ATA pass-through",
                path.display()
            )));
        }
        Ok(Self {
            device: RawDevice::open_read(path)?,
        })
    }

    fn execute(&mut self, command: u8, lba: u64, sectors: u64, data: Option<&mut [u8]>) -> BlockOutcome {
        let count = u16::try_from(sectors).unwrap_or(u16::MAX);
        let mut cdb = build_cdb(command, lba, count, data.is_some());
        let mut sense = [0u8; SENSE_LEN];

        let (direction, dxferp, dxfer_len) = match data {
            Some(buf) => (
                SG_DXFER_FROM_DEV,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len() as libc::c_uint,
            ),
            None => (SG_DXFER_NONE, std::ptr::null_mut(), 0),
        };

        let mut hdr = SgIoHdr {
            interface_id: b'S' as libc::c_int,
            dxfer_direction: direction,
            cmd_len: cdb.len() as libc::c_uchar,
            mx_sb_len: SENSE_LEN as libc::c_uchar,
            iovec_count: 0,
            dxfer_len,
            dxferp,
            cmdp: cdb.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: ATA_TIMEOUT_MS,
            flags: SG_FLAG_DIRECT_IO,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        let start = Instant::now();
        let result = unsafe { sg_io(self.device.as_raw_fd(), &mut hdr) };
        let elapsed = start.elapsed();

        if let Err(e) = result {
            tracing::debug!(lba, error = %e, "SG_IO ioctl failed");
        }
        let status = classify(&Completion {
            ioctl_ok: result.is_ok(),
            duration_ms: hdr.duration,
            timeout_ms: hdr.timeout,
            sense: &sense,
            resid: hdr.resid,
        });
        BlockOutcome::new(status, elapsed)
    }
}

impl BlockAccessor for AtaAccessor {
    fn api(&self) -> Api {
        Api::Ata
    }

    fn capacity_sectors(&self) -> u64 {
        self.device.capacity_sectors()
    }

    fn prepare_for_copy(&mut self) {
        self.device.prepare_for_copy();
    }

    fn read(&mut self, lba: u64, buf: &mut [u8]) -> BlockOutcome {
        let sectors = buf.len() as u64 / SECTOR_SIZE;
        self.execute(CMD_READ_DMA_EXT, lba, sectors, Some(buf))
    }

    fn verify(&mut self, lba: u64, sectors: u64, _scratch: &mut [u8]) -> BlockOutcome {
        self.execute(CMD_READ_VERIFY_EXT, lba, sectors, None)
    }

    fn close(&mut self) -> SalvageResult<()> {
        self.device.restore_readahead();
        Ok(())
    }
}
