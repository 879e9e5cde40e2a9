//! 块设备层
//!
//! block/dispatch.rs 按主设备号把缓冲区的读写请求分派给驱动
//! block/device.rs 是驱动背后的存储介质抽象
//!
//! block/io.rs 提供按字节范围读写设备的函数，全部经过缓冲区缓存
//! block/handle 提供对某块缓存的 RAII 引用

mod device;
mod dispatch;
mod handle;
mod io;

pub use device::{BlockDevice, MemDisk};
pub use dispatch::{major, minor, mkdev, BlockDriver, Command, DevId, DeviceTable};
pub use handle::Block;
pub use io::{block_read, block_write};
