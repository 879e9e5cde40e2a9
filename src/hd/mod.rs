//! 硬盘驱动
//!
//! - [`regs`] - 控制器寄存器协议和 [`DiskController`] 抽象
//! - [`geometry`] - 驱动器几何参数、CHS 换算、分区表
//! - `request` - 请求池和电梯排序
//! - [`driver`] - [`HardDisk`]：提交、中断处理、出错重试
//! - [`sim`] - 内存中的控制器模拟器和中断送达线程

pub mod driver;
pub mod geometry;
pub mod regs;
mod request;
pub mod sim;

pub use driver::HardDisk;
pub use geometry::{Chs, DriveGeometry, Partition};
pub use regs::{DiskController, HdCommand, Status, TaskFile};
pub use sim::{IrqThread, SimController};
