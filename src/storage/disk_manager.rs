use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use parking_lot::Mutex;

use crate::buffer::{PageId, PAGE_SIZE};
use crate::error::{GraniteError, GraniteResult};

/// Byte-level page I/O over a single database file. Pages are addressed by
/// their id times the page size; reads past the end of the file return
/// zeroed bytes so freshly allocated pages behave like empty pages.
#[derive(Debug)]
pub struct DiskManager {
    db_file: Mutex<File>,
    num_writes: AtomicU32,
}

impl DiskManager {
    pub fn try_new(db_path: impl AsRef<Path>) -> GraniteResult<Self> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path.as_ref())?;
        debug!("opened database file {:?}", db_path.as_ref());
        Ok(Self {
            db_file: Mutex::new(db_file),
            num_writes: AtomicU32::new(0),
        })
    }

    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> GraniteResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let offset = Self::page_offset(page_id)?;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                // Short read past EOF; the rest of the page is zeroes.
                buf[total..].fill(0);
                break;
            }
            total += n;
        }
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> GraniteResult<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let offset = Self::page_offset(page_id)?;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        self.num_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Number of page writes issued so far.
    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::SeqCst)
    }

    fn page_offset(page_id: PageId) -> GraniteResult<u64> {
        if page_id < 0 {
            return Err(GraniteError::Storage(format!(
                "invalid page id {}",
                page_id
            )));
        }
        Ok(page_id as u64 * PAGE_SIZE as u64)
    }
}
