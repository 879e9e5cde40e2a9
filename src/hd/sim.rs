//! 硬盘控制器模拟器
//!
//! [`SimController`] 在内存里实现 [`DiskController`]：命令和数据端口的
//! 行为与真实控制器一致（读命令在第一个扇区就绪时中断，写命令先置 `DRQ`
//! 等待数据，每传完一个扇区中断一次），背后的盘片是任意 [`BlockDevice`]。
//!
//! 中断不会同步送达：控制器只是记下"有一次待处理的中断"，由
//! [`IrqThread`] 在另一个线程里调用 [`HardDisk::interrupt`]。测试可以用
//! [`hold_irqs`](SimController::hold_irqs) 暂时扣住中断，把队列摆成想要的
//! 形状后再放开。

use super::driver::HardDisk;
use super::geometry::{Chs, DriveGeometry};
use super::regs::{DiskController, HdCommand, Status, TaskFile};
use crate::block::BlockDevice;
use crate::consts::SECTOR_SIZE;
use crate::error::{Error, ErrorKind, Result};
use crate::sync::{lock, WaitQueue};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// 错误寄存器：扇区 ID 未找到
const ERR_IDNF: u8 = 0x10;
/// 错误寄存器：不可纠正的数据错误
const ERR_UNC: u8 = 0x40;
/// 错误寄存器：命令被中止
const ERR_ABRT: u8 = 0x04;
/// 复位后的诊断码：无错误
const DIAG_OK: u8 = 0x01;

#[derive(Debug, Clone, Copy)]
enum Transfer {
    Read {
        drive: usize,
        lba: u64,
        remaining: u8,
    },
    Write {
        drive: usize,
        lba: u64,
        remaining: u8,
        fail: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    command: HdCommand,
    cylinder: u16,
    remaining: usize,
}

struct SimDrive<D> {
    geometry: DriveGeometry,
    disk: D,
}

struct SimState<D> {
    drives: Vec<SimDrive<D>>,
    status: Status,
    error: u8,
    transfer: Option<Transfer>,
    sector: [u8; SECTOR_SIZE],
    pending_irqs: usize,
    held: bool,
    shutdown: bool,
    faults: Vec<Fault>,
    commands: Vec<TaskFile>,
    resets: usize,
}

impl<D: BlockDevice> SimState<D> {
    fn fail(&mut self, error: u8) {
        self.transfer = None;
        self.status = Status::READY | Status::SEEK | Status::ERR;
        self.error = error;
    }

    /// 任务文件 → (驱动器, 线性扇区号)
    fn locate(&self, task: &TaskFile) -> Option<(usize, u64)> {
        let drive = self.drives.get(task.drive as usize)?;
        let geo = &drive.geometry;
        if task.nsect == 0
            || task.sector == 0
            || task.sector > geo.sectors
            || task.head >= geo.heads
            || task.cylinder >= geo.cylinders
        {
            return None;
        }
        let lba = geo.lba(Chs {
            cylinder: task.cylinder,
            head: task.head,
            sector: task.sector,
        }) as u64;
        (lba + task.nsect as u64 <= drive.disk.total_sectors()).then_some((task.drive as usize, lba))
    }

    fn take_fault(&mut self, command: HdCommand, cylinder: u16) -> bool {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.command == command && f.cylinder == cylinder && f.remaining > 0);
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                true
            }
            None => false,
        }
    }

    fn load_sector(&mut self, drive: usize, lba: u64) -> bool {
        let Self { drives, sector, .. } = self;
        drives[drive].disk.read_sectors(lba, 1, sector).is_ok()
    }
}

/// 硬盘控制器模拟器
pub struct SimController<D: BlockDevice> {
    state: Mutex<SimState<D>>,
    irq: WaitQueue,
}

impl<D: BlockDevice> core::fmt::Debug for SimController<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimController")
            .field("drives", &state.drives.len())
            .field("status", &state.status)
            .field("pending_irqs", &state.pending_irqs)
            .field("held", &state.held)
            .finish()
    }
}

impl<D: BlockDevice> SimController<D> {
    /// 每个驱动器一组几何参数和盘片
    pub fn new(drives: Vec<(DriveGeometry, D)>) -> Self {
        Self {
            state: Mutex::new(SimState {
                drives: drives
                    .into_iter()
                    .map(|(geometry, disk)| SimDrive { geometry, disk })
                    .collect(),
                status: Status::READY | Status::SEEK,
                error: DIAG_OK,
                transfer: None,
                sector: [0u8; SECTOR_SIZE],
                pending_irqs: 0,
                held: false,
                shutdown: false,
                faults: Vec::new(),
                commands: Vec::new(),
                resets: 0,
            }),
            irq: WaitQueue::new(),
        }
    }

    /// 让 `command` 在 `cylinder` 上的接下来 `times` 次执行失败
    pub fn inject_fault(&self, command: HdCommand, cylinder: u16, times: usize) {
        lock(&self.state).faults.push(Fault {
            command,
            cylinder,
            remaining: times,
        });
    }

    /// 收到过的全部命令
    pub fn commands(&self) -> Vec<TaskFile> {
        lock(&self.state).commands.clone()
    }

    /// 复位次数
    pub fn resets(&self) -> usize {
        lock(&self.state).resets
    }

    /// 访问某个驱动器的盘片
    pub fn with_disk<R>(&self, drive: usize, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut lock(&self.state).drives[drive].disk)
    }

    /// 扣住中断，暂不送达
    pub fn hold_irqs(&self) {
        lock(&self.state).held = true;
    }

    /// 放开中断
    pub fn release_irqs(&self) {
        lock(&self.state).held = false;
        self.irq.wake_up();
    }

    /// 待送达的中断数
    pub fn pending_irqs(&self) -> usize {
        lock(&self.state).pending_irqs
    }

    /// 等待下一次中断；停机后返回 `false`
    pub fn wait_irq(&self) -> bool {
        let mut state = lock(&self.state);
        loop {
            if state.shutdown {
                return false;
            }
            if !state.held && state.pending_irqs > 0 {
                state.pending_irqs -= 1;
                return true;
            }
            state = self.irq.sleep_on(state);
        }
    }

    /// 停止中断送达
    pub fn shutdown(&self) {
        lock(&self.state).shutdown = true;
        self.irq.wake_up();
    }

    fn raise(&self, state: &mut SimState<D>) {
        state.pending_irqs += 1;
        self.irq.wake_up();
    }
}

impl<D: BlockDevice> DiskController for SimController<D> {
    fn status(&self) -> Status {
        lock(&self.state).status
    }

    fn error(&self) -> u8 {
        lock(&self.state).error
    }

    fn command(&self, _ctl: u8, regs: &[u8; 7]) {
        let mut state = lock(&self.state);
        let task = match TaskFile::from_registers(regs) {
            Ok(task) => task,
            Err(_) => {
                log::warn!("[HDSIM] unknown command {:#04x}", regs[6]);
                state.fail(ERR_ABRT);
                self.raise(&mut state);
                return;
            }
        };
        log::trace!("[HDSIM] {:?}", task);
        state.commands.push(task);
        state.transfer = None;

        match task.command {
            HdCommand::Read | HdCommand::Write => {
                let Some((drive, lba)) = state.locate(&task) else {
                    log::warn!("[HDSIM] {:?} outside drive geometry", task);
                    state.fail(ERR_IDNF);
                    self.raise(&mut state);
                    return;
                };
                let fail = state.take_fault(task.command, task.cylinder);

                if task.command == HdCommand::Write {
                    // 不中断，等数据
                    state.transfer = Some(Transfer::Write {
                        drive,
                        lba,
                        remaining: task.nsect,
                        fail,
                    });
                    state.status = Status::READY | Status::SEEK | Status::DRQ;
                    return;
                }

                if fail || !state.load_sector(drive, lba) {
                    log::debug!("[HDSIM] read at cylinder {} fails", task.cylinder);
                    state.fail(ERR_UNC);
                } else {
                    state.transfer = Some(Transfer::Read {
                        drive,
                        lba,
                        remaining: task.nsect,
                    });
                    state.status = Status::READY | Status::SEEK | Status::DRQ;
                }
                self.raise(&mut state);
            }
            _ => {
                state.status = Status::READY | Status::SEEK;
                self.raise(&mut state);
            }
        }
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        state.resets += 1;
        state.transfer = None;
        state.pending_irqs = 0;
        state.status = Status::READY | Status::SEEK;
        state.error = DIAG_OK;
        log::debug!("[HDSIM] reset #{}", state.resets);
    }

    fn read_data(&self, buf: &mut [u8]) {
        let mut state = lock(&self.state);
        let Some(Transfer::Read {
            drive,
            lba,
            remaining,
        }) = state.transfer
        else {
            log::warn!("[HDSIM] data port read without a read in progress");
            buf.fill(0);
            return;
        };

        buf[..SECTOR_SIZE].copy_from_slice(&state.sector);
        if remaining <= 1 {
            state.transfer = None;
            state.status = Status::READY | Status::SEEK;
            return;
        }

        if state.load_sector(drive, lba + 1) {
            state.transfer = Some(Transfer::Read {
                drive,
                lba: lba + 1,
                remaining: remaining - 1,
            });
            state.status = Status::READY | Status::SEEK | Status::DRQ;
        } else {
            state.fail(ERR_UNC);
        }
        self.raise(&mut state);
    }

    fn write_data(&self, buf: &[u8]) {
        let mut state = lock(&self.state);
        let Some(Transfer::Write {
            drive,
            lba,
            remaining,
            fail,
        }) = state.transfer
        else {
            log::warn!("[HDSIM] data port write without a write in progress");
            return;
        };

        let written = !fail && state.drives[drive].disk.write_sectors(lba, 1, buf).is_ok();
        if !written {
            log::debug!("[HDSIM] write at lba {} fails", lba);
            state.fail(ERR_UNC);
        } else if remaining > 1 {
            state.transfer = Some(Transfer::Write {
                drive,
                lba: lba + 1,
                remaining: remaining - 1,
                fail,
            });
            state.status = Status::READY | Status::SEEK | Status::DRQ;
        } else {
            state.transfer = None;
            state.status = Status::READY | Status::SEEK;
        }
        self.raise(&mut state);
    }
}

/// 中断送达线程
///
/// 丢弃时停止送达并回收线程；中断处理里的 panic 会在这里重新抛出。
pub struct IrqThread<D: BlockDevice + 'static> {
    ctrl: Arc<SimController<D>>,
    handle: Option<JoinHandle<()>>,
}

impl<D: BlockDevice + 'static> IrqThread<D> {
    /// 启动线程，把 `ctrl` 的中断送给 `hd`
    pub fn spawn(ctrl: Arc<SimController<D>>, hd: Arc<HardDisk>) -> Result<Self> {
        let irq = ctrl.clone();
        let handle = thread::Builder::new()
            .name("hd-irq".into())
            .spawn(move || {
                while irq.wait_irq() {
                    hd.interrupt();
                }
                log::debug!("[HDSIM] interrupt thread stopped");
            })
            .map_err(|_| Error::new(ErrorKind::Io, "cannot spawn interrupt thread"))?;
        Ok(Self {
            ctrl,
            handle: Some(handle),
        })
    }
}

impl<D: BlockDevice + 'static> Drop for IrqThread<D> {
    fn drop(&mut self) {
        self.ctrl.shutdown();
        if let Some(handle) = self.handle.take() {
            if let Err(panic) = handle.join() {
                if !thread::panicking() {
                    std::panic::resume_unwind(panic);
                }
            }
        }
    }
}
