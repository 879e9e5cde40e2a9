//! 硬盘驱动
//!
//! 提交路径（[`HardDisk::rw_abs`]）和中断路径（[`HardDisk::interrupt`]）
//! 共用一把队列锁，它只包住短小的链表操作和寄存器写入，从不跨越睡眠。
//! 同一时刻只有链表头的请求交给控制器。
//!
//! 每次中断执行当前挂着的处理函数：
//!
//! - `Read`：读出一个扇区；两个扇区都到齐后完成请求并启动下一个；
//! - `Write`：写完一个扇区；第一个扇区在发命令时就已经推给控制器；
//! - `Specify`：复位后重新设置驱动器参数完成，从链表头重新开始。
//!
//! 出错时错误计数加一并复位控制器，复位完成的中断会把同一个请求重新
//! 发出；超过 `MAX_ERRORS` 次就放弃该请求，缓冲区以失败状态解锁。

use super::geometry::{DriveGeometry, Partition};
use super::regs::{DiskController, HdCommand, Status, TaskFile};
use super::request::{Request, RequestQueue};
use crate::block::{BlockDriver, Command};
use crate::cache::Buffer;
use crate::config::HdConfig;
use crate::consts::{
    DRQ_RETRIES, MAX_ERRORS, MINORS_PER_HD, READY_RETRIES, SECTORS_PER_BLOCK, SECTOR_SIZE,
};
use crate::error::{Error, ErrorKind, Result};
use crate::sync::{lock, WaitQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 下一次中断要执行的处理函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IrqHandler {
    Read,
    Write,
    Specify,
}

struct HdQueue {
    requests: RequestQueue,
    /// `None` 表示控制器空闲
    handler: Option<IrqHandler>,
}

/// 硬盘驱动
pub struct HardDisk {
    ctrl: Arc<dyn DiskController>,
    drives: Vec<DriveGeometry>,
    /// 每块盘 5 项：整盘 + 4 个主分区
    partitions: Mutex<Vec<Partition>>,
    queue: Mutex<HdQueue>,
    /// 等待空闲请求槽位
    wait_for_request: WaitQueue,
    setup_done: AtomicBool,
}

impl core::fmt::Debug for HardDisk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let queue = lock(&self.queue);
        f.debug_struct("HardDisk")
            .field("drives", &self.drives)
            .field("queued", &queue.requests.len())
            .field("handler", &queue.handler)
            .finish()
    }
}

impl HardDisk {
    /// 创建驱动
    ///
    /// 整盘分区项按几何参数初始化；主分区要等 [`setup`](Self::setup)
    /// 读出分区表后才可用。
    pub fn new(config: &HdConfig, ctrl: Arc<dyn DiskController>) -> Result<Self> {
        config.validate()?;

        let mut partitions = vec![Partition::default(); MINORS_PER_HD * config.drives.len()];
        for (drive, geo) in config.drives.iter().enumerate() {
            partitions[drive * MINORS_PER_HD] = Partition {
                start_sect: 0,
                nr_sects: geo.total_sectors(),
            };
            log::info!(
                "[HD] drive {}: {} cylinders, {} heads, {} sectors/track",
                drive,
                geo.cylinders,
                geo.heads,
                geo.sectors
            );
        }

        Ok(Self {
            ctrl,
            drives: config.drives.clone(),
            partitions: Mutex::new(partitions),
            queue: Mutex::new(HdQueue {
                requests: RequestQueue::new(config.nr_request),
                handler: None,
            }),
            wait_for_request: WaitQueue::new(),
            setup_done: AtomicBool::new(false),
        })
    }

    /// 驱动器数
    pub fn nr_drives(&self) -> usize {
        self.drives.len()
    }

    /// 驱动器参数
    pub fn geometry(&self, drive: usize) -> Option<DriveGeometry> {
        self.drives.get(drive).copied()
    }

    /// 次设备号对应的分区
    pub fn partition(&self, minor: u8) -> Option<Partition> {
        lock(&self.partitions).get(minor as usize).copied()
    }

    /// 排队中的请求数（含正在处理的）
    pub fn queued(&self) -> usize {
        lock(&self.queue).requests.len()
    }

    /// 读入每块盘的分区表，只能调用一次
    ///
    /// 需要中断已经能够送达：读分区表本身就是一次普通的请求。
    pub fn setup(&self) -> Result<()> {
        if self.setup_done.swap(true, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::InvalidState, "setup already done"));
        }

        let scratch = Arc::new(Buffer::new(usize::MAX));
        for drive in 0..self.drives.len() {
            scratch.reset_contents();
            scratch.lock_buffer();
            self.rw_abs(Command::Read, drive as u8, 1, 0, 0, &scratch);
            if !scratch.is_uptodate() {
                log::error!("[HD] Unable to read partition table of drive {}", drive);
                return Err(Error::new(ErrorKind::Io, "unable to read partition table"));
            }

            let table = {
                let state = scratch.wait_unlocked();
                Partition::parse_table(&state.data[..SECTOR_SIZE])
            };
            let table = table.inspect_err(|_| {
                log::error!("[HD] Bad partition table on drive {}", drive);
            })?;

            let mut partitions = lock(&self.partitions);
            for (i, part) in table.iter().enumerate() {
                partitions[drive * MINORS_PER_HD + 1 + i] = *part;
                log::debug!("[HD] hd{}{}: start {} size {}", drive, i + 1, part.start_sect, part.nr_sects);
            }
        }

        log::info!(
            "[HD] Partition table{} ok.",
            if self.drives.len() > 1 { "s" } else { "" }
        );
        Ok(())
    }

    /// 提交一次整块传输并等待完成
    ///
    /// `buf` 必须已经加锁。请求池满时睡眠等待。返回时缓冲区已经解锁，
    /// 结果看 `UPTODATE`/`DIRTY`。
    pub fn rw_abs(&self, cmd: Command, drive: u8, sector: u8, head: u8, cyl: u16, buf: &Arc<Buffer>) {
        let mut queue = lock(&self.queue);
        let idx = loop {
            if let Some(idx) = queue.requests.alloc() {
                break idx;
            }
            log::debug!("[HD] request pool exhausted, waiting");
            queue = self.wait_for_request.sleep_on(queue);
        };

        queue.requests.add(
            idx,
            Request {
                drive,
                nsector: SECTORS_PER_BLOCK,
                sector,
                head,
                cyl,
                cmd,
                errors: 0,
                buf: buf.clone(),
            },
        );
        if queue.handler.is_none() {
            self.do_request(&mut queue);
        }
        drop(queue);

        buf.wait_on_buffer();
    }

    /// 中断入口
    ///
    /// 不会睡眠。
    ///
    /// # Panics
    ///
    /// 没有挂着处理函数。
    pub fn interrupt(&self) {
        let mut queue = lock(&self.queue);
        let Some(handler) = queue.handler else {
            drop(queue);
            log::error!("[HD] interrupt with no handler armed");
            panic!("Unexpected HD interrupt");
        };
        log::trace!("[HD] interrupt -> {:?}", handler);

        match handler {
            IrqHandler::Specify => self.do_request(&mut queue),
            IrqHandler::Read => self.read_intr(&mut queue),
            IrqHandler::Write => self.write_intr(&mut queue),
        }
    }

    fn read_intr(&self, queue: &mut HdQueue) {
        if !self.win_result() {
            self.bad_rw_intr(queue);
            return;
        }
        let req = Self::in_flight(queue);
        req.buf
            .with_sector((req.nsector & 1) as usize, |sector| self.ctrl.read_data(sector));
        req.errors = 0;
        req.nsector -= 1;
        if req.nsector > 0 {
            return;
        }
        self.end_request(queue, true);
        self.do_request(queue);
    }

    fn write_intr(&self, queue: &mut HdQueue) {
        if !self.win_result() {
            self.bad_rw_intr(queue);
            return;
        }
        let req = Self::in_flight(queue);
        req.nsector -= 1;
        if req.nsector > 0 {
            req.buf.with_sector(1, |sector| self.ctrl.write_data(sector));
            return;
        }
        self.end_request(queue, true);
        self.do_request(queue);
    }

    fn in_flight(queue: &mut HdQueue) -> &mut Request {
        match queue.requests.current_mut() {
            Some(req) => req,
            None => {
                log::error!("[HD] transfer interrupt with an empty queue");
                panic!("Unexpected HD interrupt");
            }
        }
    }

    fn bad_rw_intr(&self, queue: &mut HdQueue) {
        let req = Self::in_flight(queue);
        let drive = req.drive;
        req.errors += 1;
        if req.errors > MAX_ERRORS {
            log::error!(
                "[HD] {:?} drive {} cyl {} head {} sector {}: giving up after {} errors",
                req.cmd,
                req.drive,
                req.cyl,
                req.head,
                req.sector,
                req.errors
            );
            self.end_request(queue, false);
        } else {
            log::warn!(
                "[HD] {:?} drive {} cyl {} failed (attempt {}), resetting",
                req.cmd,
                req.drive,
                req.cyl,
                req.errors
            );
            // 从第一个扇区重来
            req.nsector = SECTORS_PER_BLOCK;
        }
        self.reset_hd(queue, drive);
    }

    /// 摘下当前请求，解锁缓冲区并唤醒等待请求槽位的调用者
    fn end_request(&self, queue: &mut HdQueue, ok: bool) {
        if let Some(req) = queue.requests.retire_current() {
            req.buf.end_io(req.cmd, ok);
        }
        self.wait_for_request.wake_up();
    }

    /// 把链表头交给控制器；链表空时标记控制器空闲
    fn do_request(&self, queue: &mut HdQueue) {
        let Some(req) = queue.requests.current() else {
            queue.handler = None;
            return;
        };
        let (cmd, drive, nsector, sector, head, cyl) =
            (req.cmd, req.drive, req.nsector, req.sector, req.head, req.cyl);
        let buf = req.buf.clone();

        match cmd {
            Command::Write => {
                self.hd_out(queue, drive, nsector as u8, sector, head, cyl, HdCommand::Write, IrqHandler::Write);
                if !self.wait_drq() {
                    log::warn!("[HD] no DRQ after write command, resetting");
                    self.reset_hd(queue, drive);
                    return;
                }
                buf.with_sector((nsector & 1) as usize, |data| self.ctrl.write_data(data));
            }
            Command::Read => {
                self.hd_out(queue, drive, nsector as u8, sector, head, cyl, HdCommand::Read, IrqHandler::Read);
            }
        }
    }

    /// 写任务文件并挂上处理函数
    #[allow(clippy::too_many_arguments)]
    fn hd_out(
        &self,
        queue: &mut HdQueue,
        drive: u8,
        nsect: u8,
        sector: u8,
        head: u8,
        cyl: u16,
        command: HdCommand,
        handler: IrqHandler,
    ) {
        if drive > 1 || drive as usize >= self.drives.len() || head > 15 {
            log::error!("[HD] bad address drive {} head {}", drive, head);
            panic!("Trying to write bad sector");
        }
        if !self.controller_ready() {
            log::error!("[HD] controller stuck with status {:?}", self.ctrl.status());
            panic!("HD controller not ready");
        }

        queue.handler = Some(handler);
        let geo = &self.drives[drive as usize];
        let task = TaskFile {
            precomp: (geo.wpcom >> 2) as u8,
            nsect,
            sector,
            cylinder: cyl,
            drive,
            head,
            command,
        };
        log::trace!("[HD] out {:?}", task);
        self.ctrl.command(geo.ctl, &task.registers());
    }

    fn controller_ready(&self) -> bool {
        (0..READY_RETRIES).any(|_| self.ctrl.status().is_ready())
    }

    fn wait_drq(&self) -> bool {
        (0..DRQ_RETRIES).any(|_| self.ctrl.status().contains(Status::DRQ))
    }

    fn win_result(&self) -> bool {
        let status = self.ctrl.status();
        if status.is_ok_result() {
            return true;
        }
        if status.contains(Status::ERR) {
            log::warn!("[HD] status {:?}, error {:#04x}", status, self.ctrl.error());
        } else {
            log::warn!("[HD] status {:?}", status);
        }
        false
    }

    fn reset_controller(&self) {
        self.ctrl.reset();
        let settled = (0..READY_RETRIES).any(|_| {
            self.ctrl.status() & (Status::BUSY | Status::READY | Status::SEEK)
                == Status::READY | Status::SEEK
        });
        if !settled {
            log::warn!("[HD] HD-controller still busy");
        }
        let err = self.ctrl.error();
        if err != 1 {
            log::warn!("[HD] HD-controller reset failed: {:02x}", err);
        }
    }

    /// 复位控制器并重新设置驱动器参数，完成中断会重新启动队列
    fn reset_hd(&self, queue: &mut HdQueue, drive: u8) {
        self.reset_controller();
        let geo = self.drives[drive as usize];
        self.hd_out(
            queue,
            drive,
            geo.sectors,
            geo.sectors,
            geo.heads - 1,
            geo.cylinders,
            HdCommand::Specify,
            IrqHandler::Specify,
        );
    }
}

impl BlockDriver for HardDisk {
    /// 块号 → 分区内扇区 → CHS
    ///
    /// 次设备号或块号越界时不发请求，直接以失败结束传输。
    fn rw_block(&self, cmd: Command, minor: u8, block: u32, buf: &Arc<Buffer>) {
        let sect = block as u64 * SECTORS_PER_BLOCK as u64;
        let part = self
            .partition(minor)
            .filter(|part| sect + SECTORS_PER_BLOCK as u64 <= part.nr_sects as u64);
        let Some(part) = part else {
            log::warn!("[HD] minor {} block {} out of range", minor, block);
            buf.end_io(cmd, false);
            return;
        };

        let Ok(lba) = u32::try_from(part.start_sect as u64 + sect) else {
            log::warn!("[HD] minor {} block {} beyond addressable range", minor, block);
            buf.end_io(cmd, false);
            return;
        };
        let drive = minor as usize / MINORS_PER_HD;
        let chs = self.drives[drive].chs(lba);
        self.rw_abs(cmd, drive as u8, chs.sector, chs.head, chs.cylinder, buf);
    }
}
