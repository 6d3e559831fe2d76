//! Shared-memory regions published by the agent
//!
//! Every access is attach, copy a snapshot, detach. There is no in-band
//! locking; the agent publishes a complete region before it signals.

use crate::config::{RegionConfig, SharedMemoryConfig};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};
use wavepoint_common::wire::{ByteReader, ByteWriter};
use wavepoint_common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    BinaryImage,
    WaveInfo,
    LoadMap,
    MomentaryBreakpoints,
}

impl Region {
    pub const ALL: [Region; 4] = [
        Region::BinaryImage,
        Region::WaveInfo,
        Region::LoadMap,
        Region::MomentaryBreakpoints,
    ];

    pub fn config(self, shm: &SharedMemoryConfig) -> RegionConfig {
        match self {
            Region::BinaryImage => shm.binary,
            Region::WaveInfo => shm.wave_info,
            Region::LoadMap => shm.loadmap,
            Region::MomentaryBreakpoints => shm.momentary,
        }
    }
}

/// Access to the agent's shared-memory regions
pub trait SharedMemory {
    /// Snapshot a region. `None` means the region does not exist yet, which
    /// is the normal state while no dispatch is active.
    fn read_region(&self, region: Region) -> Result<Option<Vec<u8>>>;

    /// Overwrite the start of a region, creating it if needed
    fn write_region(&self, region: Region, bytes: &[u8]) -> Result<()>;

    /// Remove a region. Returns false if it did not exist.
    fn remove_region(&self, region: Region) -> Result<bool>;
}

/// System V shared memory, keyed by the configured region keys
pub struct SysvSharedMemory {
    config: SharedMemoryConfig,
}

impl SysvSharedMemory {
    pub fn new(config: SharedMemoryConfig) -> Self {
        Self { config }
    }

    fn lookup(&self, region: Region, size: usize, flags: libc::c_int) -> Option<libc::c_int> {
        let key = region.config(&self.config).key;
        // SAFETY: shmget has no memory-safety preconditions
        let id = unsafe { libc::shmget(key as libc::key_t, size, flags | 0o666) };
        (id >= 0).then_some(id)
    }

    fn segment_size(id: libc::c_int) -> Result<usize> {
        // SAFETY: shmid_ds is plain data and IPC_STAT fills it in
        let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::shmctl(id, libc::IPC_STAT, &mut stat) };
        if rc != 0 {
            return Err(Error::SharedMemory(format!(
                "shmctl(IPC_STAT) failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(stat.shm_segsz as usize)
    }
}

/// Attached mapping, detached on drop
struct Attachment {
    addr: *mut libc::c_void,
}

impl Attachment {
    fn new(id: libc::c_int, flags: libc::c_int) -> Result<Self> {
        // SAFETY: a null address lets the kernel choose the mapping
        let addr = unsafe { libc::shmat(id, std::ptr::null(), flags) };
        if addr as isize == -1 {
            return Err(Error::SharedMemory(format!(
                "shmat failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self { addr })
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        // SAFETY: addr came from a successful shmat
        if unsafe { libc::shmdt(self.addr) } != 0 {
            warn!(target: "wavepoint_core::shm", "shmdt failed: {}", std::io::Error::last_os_error());
        }
    }
}

impl SharedMemory for SysvSharedMemory {
    fn read_region(&self, region: Region) -> Result<Option<Vec<u8>>> {
        let Some(id) = self.lookup(region, 0, 0) else {
            return Ok(None);
        };
        let size = Self::segment_size(id)?.min(region.config(&self.config).max_size);
        let attachment = Attachment::new(id, libc::SHM_RDONLY)?;
        let mut snapshot = vec![0u8; size];
        // SAFETY: the segment is at least `size` bytes and stays mapped until
        // `attachment` is dropped
        unsafe {
            std::ptr::copy_nonoverlapping(
                attachment.addr as *const u8,
                snapshot.as_mut_ptr(),
                size,
            );
        }
        debug!(target: "wavepoint_core::shm", ?region, size, "Region snapshot taken");
        Ok(Some(snapshot))
    }

    fn write_region(&self, region: Region, bytes: &[u8]) -> Result<()> {
        let max = region.config(&self.config).max_size;
        if bytes.len() > max {
            return Err(Error::SharedMemory(format!(
                "{:?} region overflow: {} bytes, limit {}",
                region,
                bytes.len(),
                max
            )));
        }
        let id = self.lookup(region, max, libc::IPC_CREAT).ok_or_else(|| {
            Error::SharedMemory(format!(
                "shmget({:?}) failed: {}",
                region,
                std::io::Error::last_os_error()
            ))
        })?;
        if Self::segment_size(id)? < bytes.len() {
            return Err(Error::SharedMemory(format!(
                "{:?} region is smaller than {} bytes",
                region,
                bytes.len()
            )));
        }
        let attachment = Attachment::new(id, 0)?;
        // SAFETY: size checked above, mapping is writable
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), attachment.addr as *mut u8, bytes.len());
        }
        Ok(())
    }

    fn remove_region(&self, region: Region) -> Result<bool> {
        let Some(id) = self.lookup(region, 0, 0) else {
            return Ok(false);
        };
        // SAFETY: IPC_RMID ignores the buffer argument
        let rc = unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(Error::SharedMemory(format!(
                "shmctl(IPC_RMID) failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(true)
    }
}

/// In-process regions. Clones share storage, so a loopback agent can publish
/// into a session that owns another handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySharedMemory {
    regions: Rc<RefCell<HashMap<Region, Vec<u8>>>>,
    limits: Option<SharedMemoryConfig>,
}

impl MemorySharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(config: SharedMemoryConfig) -> Self {
        Self {
            regions: Rc::default(),
            limits: Some(config),
        }
    }

    pub fn contains(&self, region: Region) -> bool {
        self.regions.borrow().contains_key(&region)
    }
}

impl SharedMemory for MemorySharedMemory {
    fn read_region(&self, region: Region) -> Result<Option<Vec<u8>>> {
        Ok(self.regions.borrow().get(&region).cloned())
    }

    fn write_region(&self, region: Region, bytes: &[u8]) -> Result<()> {
        if let Some(limits) = &self.limits {
            let max = region.config(limits).max_size;
            if bytes.len() > max {
                return Err(Error::SharedMemory(format!(
                    "{:?} region overflow: {} bytes, limit {}",
                    region,
                    bytes.len(),
                    max
                )));
            }
        }
        let mut regions = self.regions.borrow_mut();
        let slot = regions.entry(region).or_default();
        if slot.len() < bytes.len() {
            slot.resize(bytes.len(), 0);
        }
        slot[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn remove_region(&self, region: Region) -> Result<bool> {
        Ok(self.regions.borrow_mut().remove(&region).is_some())
    }
}

/// Read the code object from the binary region, laid out as `[u64 size][bytes]`.
///
/// A size outside `(0, max_size)` breaks the agent contract.
pub fn read_binary_image(shm: &dyn SharedMemory, max_size: usize) -> Result<Option<Vec<u8>>> {
    let Some(raw) = shm.read_region(Region::BinaryImage)? else {
        return Ok(None);
    };
    let mut r = ByteReader::new(&raw);
    let size = r.u64()? as usize;
    if size == 0 || size >= max_size || size > r.remaining() {
        return Err(Error::InvalidPacket(format!(
            "binary region declares {} bytes (region holds {}, limit {})",
            size,
            r.remaining(),
            max_size
        )));
    }
    Ok(Some(raw[8..8 + size].to_vec()))
}

/// Publish a code object the way the agent does
pub fn write_binary_image(shm: &dyn SharedMemory, image: &[u8]) -> Result<()> {
    let mut w = ByteWriter::with_capacity(8 + image.len());
    w.u64(image.len() as u64);
    let mut bytes = w.into_bytes();
    bytes.extend_from_slice(image);
    shm.write_region(Region::BinaryImage, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_region_is_none() {
        let shm = MemorySharedMemory::new();
        assert!(shm.read_region(Region::WaveInfo).unwrap().is_none());
        assert!(!shm.remove_region(Region::WaveInfo).unwrap());
    }

    #[test]
    fn test_clones_share_storage() {
        let shm = MemorySharedMemory::new();
        let agent = shm.clone();
        agent.write_region(Region::LoadMap, &[1, 2, 3]).unwrap();
        assert_eq!(shm.read_region(Region::LoadMap).unwrap(), Some(vec![1, 2, 3]));
        assert!(shm.remove_region(Region::LoadMap).unwrap());
        assert!(!agent.contains(Region::LoadMap));
    }

    #[test]
    fn test_limits_enforced() {
        let mut config = SharedMemoryConfig::default();
        config.momentary.max_size = 4;
        let shm = MemorySharedMemory::with_limits(config);
        assert!(shm.write_region(Region::MomentaryBreakpoints, &[0; 4]).is_ok());
        assert!(shm.write_region(Region::MomentaryBreakpoints, &[0; 5]).is_err());
    }

    #[test]
    fn test_binary_image_layout() {
        let shm = MemorySharedMemory::new();
        write_binary_image(&shm, b"\x7fELF....").unwrap();
        let image = read_binary_image(&shm, 1024).unwrap().unwrap();
        assert_eq!(image, b"\x7fELF....");
    }

    #[test]
    fn test_binary_image_bounds() {
        let shm = MemorySharedMemory::new();
        assert!(read_binary_image(&shm, 16).unwrap().is_none());

        write_binary_image(&shm, &[0xaa; 16]).unwrap();
        assert!(matches!(
            read_binary_image(&shm, 16),
            Err(Error::InvalidPacket(_))
        ));

        shm.write_region(Region::BinaryImage, &[0u8; 8]).unwrap();
        assert!(read_binary_image(&shm, 16).is_err());
    }
}
