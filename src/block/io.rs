//! 字节范围读写
//!
//! 在缓冲区缓存之上按字节偏移读写一个设备，自动处理跨块情况。
//! `pos` 随传输前进，调用者可以连续调用。

use super::DevId;
use crate::cache::BufferCache;
use crate::consts::BLOCK_SIZE;
use crate::error::{Error, ErrorKind, Result};

/// 从 `*pos` 开始读取
///
/// # 返回
///
/// 成功返回读取的字节数。中途遇到读不出来的块时返回已完成的字节数；
/// 一个字节都没读到则返回 `ErrorKind::Io`。
///
/// # 示例
///
/// ```rust,ignore
/// let mut pos = 1000;
/// let mut buf = vec![0u8; 100];
/// block_read(&cache, ROOT_DEV, &mut pos, &mut buf)?;
/// assert_eq!(pos, 1100);
/// ```
pub fn block_read(cache: &BufferCache, dev: DevId, pos: &mut u64, buf: &mut [u8]) -> Result<usize> {
    let mut done = 0;

    while done < buf.len() {
        let block = (*pos / BLOCK_SIZE as u64) as u32;
        let offset = (*pos % BLOCK_SIZE as u64) as usize;
        let chars = (BLOCK_SIZE - offset).min(buf.len() - done);

        let Some(handle) = cache.read(dev, block) else {
            return partial(done, "block_read: unreadable block");
        };
        cache.with_data(handle, |data| {
            buf[done..done + chars].copy_from_slice(&data[offset..offset + chars]);
        });
        cache.release(handle);

        *pos += chars as u64;
        done += chars;
    }

    Ok(done)
}

/// 从 `*pos` 开始写入
///
/// 整块覆盖时不读盘；部分覆盖先把块读进来。写入的块只标记为脏，
/// 实际落盘发生在回收或 `sync` 时。
///
/// # 返回
///
/// 同 [`block_read`]。
pub fn block_write(cache: &BufferCache, dev: DevId, pos: &mut u64, buf: &[u8]) -> Result<usize> {
    let mut done = 0;

    while done < buf.len() {
        let block = (*pos / BLOCK_SIZE as u64) as u32;
        let offset = (*pos % BLOCK_SIZE as u64) as usize;
        let chars = (BLOCK_SIZE - offset).min(buf.len() - done);

        if chars == BLOCK_SIZE {
            let handle = cache.acquire(dev, block);
            cache.overwrite(handle, &buf[done..done + BLOCK_SIZE]);
            cache.release(handle);
        } else {
            let Some(handle) = cache.read(dev, block) else {
                return partial(done, "block_write: unreadable block");
            };
            cache.with_data_mut(handle, |data| {
                data[offset..offset + chars].copy_from_slice(&buf[done..done + chars]);
            });
            cache.release(handle);
        }

        *pos += chars as u64;
        done += chars;
    }

    Ok(done)
}

fn partial(done: usize, message: &'static str) -> Result<usize> {
    if done == 0 {
        log::warn!("[BLKDEV] {}", message);
        Err(Error::new(ErrorKind::Io, message))
    } else {
        Ok(done)
    }
}
