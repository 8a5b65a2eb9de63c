//! Tape drives: `/dev/st<N>` (rewind on close) and `/dev/nst<N>`.
//!
//! Reads and writes go through a [`RawBuffer`] sized from the drive: the
//! media block size in fixed-block mode, the drive's maximum block size in
//! variable-block mode. Every driver primitive runs inside [`retry`], so a
//! media change or bus reset below the retry bound is invisible.
//!
//! End conditions are recorded, not reported: a positioning operation that
//! stops at a filemark or at the end of data succeeds, resets the buffer and
//! remembers the condition for `MTIOCGET`. A read that meets the end of data
//! with nothing to return yields 0 once; the next read fails with `ENOSPC`.

use std::sync::Arc;

use ntposix_native::tape::{
    TapeDriveSettings, TapeDriver, TapeErase, TapeMark, TapePrepare, TapeSeek,
};
use ntposix_native::{Partial, Process, WinError};
use parking_lot::Mutex;

use crate::device::{DeviceClass, DeviceId, DevicePath};
use crate::env::Env;
use crate::errno::Errno;
use crate::fhandler::raw::{RawBuffer, retry};
use crate::fhandler::{FhBase, Fhandler, NtHandle};
use crate::flags::{O_APPEND, O_CLOEXEC, Stat, Whence};
use crate::ioctl::{
    GMT_BOT, GMT_DR_OPEN, GMT_EOD, GMT_EOF, GMT_EOT, GMT_HW_COMP, GMT_ONLINE, GMT_SM,
    GMT_WR_PROT, IoctlArg, MT_ISSCSI2, MT_ST_AUTO_LOCK, MT_ST_BOOLEANS, MT_ST_BUFFER_WRITES,
    MT_ST_CLEARBOOLEANS, MT_ST_ECC, MT_ST_OPTIONS, MT_ST_PADDING, MT_ST_REPORT_SM,
    MT_ST_SETBOOLEANS, MT_ST_TWO_FM, MTBSF, MTBSFM, MTBSR, MTBSS, MTCOMPRESSION, MTEOM,
    MTERASE, MTFSF, MTFSFM, MTFSR, MTFSS, MTIOCGET, MTIOCPOS, MTIOCTOP, MTLOAD, MTLOCK, MTNOP,
    MTOFFL, MTRESET, MTRETEN, MTREW, MTSEEK, MTSETBLK, MTSETDENSITY, MTSETDRVBUFFER, MTTELL,
    MTUNLOAD, MTUNLOCK, MTWEOF, MTWSM, MtGet, MtOp, RDIOCDOP, RDIOCGET, RDSETBLK,
};

/// Where the last positioning or transfer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cond {
    None,
    Eof,
    Eod,
    Setmark,
    Bot,
}

#[derive(Debug)]
struct TapeState {
    buf: RawBuffer,
    file_no: i32,
    block_no: i32,
    cond: Cond,
    lasterr: u32,
    two_fm: bool,
    buffer_writes: bool,
    auto_lock: bool,
    /// The last transfer was a write: close owes a filemark.
    last_write: bool,
}

impl TapeState {
    fn new(bufsize: usize, varblk: bool) -> Self {
        Self {
            buf: RawBuffer::new(bufsize, varblk),
            file_no: 0,
            block_no: 0,
            cond: Cond::None,
            lasterr: 0,
            two_fm: false,
            buffer_writes: true,
            auto_lock: false,
            last_write: false,
        }
    }

    /// Fresh buffer, same position bookkeeping.
    fn copy_counters(&self) -> Self {
        Self {
            buf: RawBuffer::new(self.buf.bufsize(), self.buf.varblk),
            file_no: self.file_no,
            block_no: self.block_no,
            cond: self.cond,
            lasterr: self.lasterr,
            two_fm: self.two_fm,
            buffer_writes: self.buffer_writes,
            auto_lock: self.auto_lock,
            last_write: false,
        }
    }

    fn at_start(&mut self) {
        self.file_no = 0;
        self.block_no = 0;
    }

    fn unknown_position(&mut self) {
        self.file_no = -1;
        self.block_no = -1;
    }

    fn note_error(&mut self, error: WinError) -> Errno {
        self.lasterr = error.0;
        Errno::from(error)
    }
}

fn to_i32(n: i64) -> i32 {
    i32::try_from(n).unwrap_or(if n < 0 { i32::MIN } else { i32::MAX })
}

pub struct TapeHandler {
    base: FhBase,
    unit: usize,
    rewind_on_close: bool,
    handle: NtHandle,
    state: Mutex<TapeState>,
}

impl TapeHandler {
    #[must_use]
    pub fn new(env: &Arc<Env>, name: &str, unit: usize, rewind: bool, flags: i32) -> Self {
        let dev = DevicePath::Tape { unit, rewind }.device_id();
        let bufsize = env.config.tape_default_block_size as usize;
        Self {
            base: FhBase::new(env, DeviceClass::Tape, dev, name, flags),
            unit,
            rewind_on_close: rewind,
            handle: NtHandle::empty(),
            state: Mutex::new(TapeState::new(bufsize, false)),
        }
    }

    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.base.dev()
    }

    fn limit(&self) -> u32 {
        self.base.env().config.device_retry_limit
    }

    fn driver(&self) -> Result<Arc<dyn TapeDriver>, Errno> {
        let object = self.handle.object()?;
        Ok(Arc::clone(object.as_tape()?))
    }

    fn open_drive(&self, flags: i32) -> Result<(), Errno> {
        let env = self.base.env();
        let owned = env
            .kernel
            .open_tape(&env.process, self.unit, flags & O_CLOEXEC == 0)?;
        self.handle.bind(owned);
        let drive = self.driver()?;
        let limit = self.limit();
        let mut st = self.state.lock();
        retry(limit, "tape status", || drive.status()).map_err(|e| st.note_error(e))?;
        let params = retry(limit, "tape drive parameters", || drive.drive_parameters())
            .map_err(|e| st.note_error(e))?;
        let media = retry(limit, "tape media parameters", || drive.media_parameters())
            .map_err(|e| st.note_error(e))?;
        st.buf = if media.block_size == 0 {
            RawBuffer::new(params.maximum_block_size as usize, true)
        } else {
            RawBuffer::new(media.block_size as usize, false)
        };
        st.two_fm = false;
        if flags & O_APPEND != 0 {
            self.position(&drive, &mut st, TapeSeek::EndOfData)?;
        }
        log::debug!(
            "{}: open, {} block mode, buffer {}",
            self.base.name(),
            if st.buf.varblk { "variable" } else { "fixed" },
            st.buf.bufsize()
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Positioning
    // -----------------------------------------------------------------------

    /// Move the tape. Marks and the end of data are recorded in `cond` and
    /// reset the buffer; hitting the beginning of the medium is `ESPIPE`.
    fn position(
        &self,
        drive: &Arc<dyn TapeDriver>,
        st: &mut TapeState,
        seek: TapeSeek,
    ) -> Result<(), Errno> {
        self.flush(drive, st)?;
        st.last_write = false;
        let result = retry(self.limit(), "tape position", || drive.set_position(seek));
        st.buf.reset();
        match result {
            Ok(()) => {
                st.cond = Cond::None;
                match seek {
                    TapeSeek::Rewind => st.at_start(),
                    TapeSeek::LogicalBlock(0) => st.at_start(),
                    TapeSeek::LogicalBlock(_) | TapeSeek::EndOfData => st.unknown_position(),
                    TapeSeek::RelativeBlocks(n) => {
                        st.block_no = to_i32(i64::from(st.block_no) + n);
                    }
                    TapeSeek::Filemarks(n) => {
                        st.file_no = to_i32(i64::from(st.file_no) + n);
                        st.block_no = if n > 0 { 0 } else { -1 };
                        if n < 0 {
                            st.cond = Cond::Eof;
                        }
                    }
                    TapeSeek::Setmarks(_) => st.block_no = -1,
                }
                Ok(())
            }
            Err(WinError::FILEMARK_DETECTED) => {
                match seek {
                    TapeSeek::RelativeBlocks(n) if n < 0 => {
                        st.file_no -= 1;
                        st.block_no = -1;
                    }
                    _ => {
                        st.file_no += 1;
                        st.block_no = 0;
                    }
                }
                st.cond = Cond::Eof;
                Ok(())
            }
            Err(WinError::SETMARK_DETECTED) => {
                st.block_no = -1;
                st.cond = Cond::Setmark;
                Ok(())
            }
            Err(e) if e.is_end_of_medium() => {
                log::debug!("{}: end of data while positioning", self.base.name());
                st.file_no = -1;
                st.block_no = -1;
                st.cond = Cond::Eod;
                Ok(())
            }
            Err(WinError::BEGINNING_OF_MEDIA) => {
                st.at_start();
                st.cond = Cond::Bot;
                Err(st.note_error(WinError::BEGINNING_OF_MEDIA))
            }
            Err(e) => Err(st.note_error(e)),
        }
    }

    fn prepare(
        &self,
        drive: &Arc<dyn TapeDriver>,
        st: &mut TapeState,
        op: TapePrepare,
    ) -> Result<(), Errno> {
        self.flush(drive, st)?;
        retry(self.limit(), "tape prepare", || drive.prepare(op)).map_err(|e| st.note_error(e))?;
        if matches!(op, TapePrepare::Load | TapePrepare::Unload | TapePrepare::Tension) {
            st.buf.reset();
            st.at_start();
            st.cond = Cond::None;
        }
        Ok(())
    }

    fn write_marks(
        &self,
        drive: &Arc<dyn TapeDriver>,
        st: &mut TapeState,
        mark: TapeMark,
        count: i32,
    ) -> Result<(), Errno> {
        let count = u32::try_from(count).map_err(|_| Errno::EINVAL)?;
        self.flush(drive, st)?;
        st.last_write = false;
        match retry(self.limit(), "tape write marks", || drive.write_marks(mark, count)) {
            Ok(()) => {
                if mark != TapeMark::Setmark {
                    st.file_no += to_i32(i64::from(count));
                    st.block_no = 0;
                }
                Ok(())
            }
            Err(e) if e.is_end_of_medium() => {
                st.buf.eom_detected = true;
                Err(st.note_error(e))
            }
            Err(e) => Err(st.note_error(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Push buffered write data to the tape as one padded block.
    fn flush(&self, drive: &Arc<dyn TapeDriver>, st: &mut TapeState) -> Result<(), Errno> {
        if !st.buf.is_writing {
            return Ok(());
        }
        if st.buf.buffered() == 0 {
            st.buf.is_writing = false;
            return Ok(());
        }
        let block = st.buf.padded_block();
        let result = retry(self.limit(), "tape flush", || drive.write(&block));
        st.buf.written();
        st.buf.is_writing = false;
        match result {
            Ok(_) => {
                st.block_no += 1;
                Ok(())
            }
            Err(p) if p.error.is_end_of_medium() => {
                st.buf.eom_detected = true;
                Err(st.note_error(p.error))
            }
            Err(p) => Err(st.note_error(p.error)),
        }
    }

    /// Settle a device read that stopped early after `done` bytes.
    fn read_stopped(&self, st: &mut TapeState, done: usize, error: WinError) -> Result<usize, Errno> {
        match error {
            WinError::FILEMARK_DETECTED | WinError::SETMARK_DETECTED => {
                st.file_no += i32::from(error == WinError::FILEMARK_DETECTED);
                st.block_no = 0;
                st.cond = if error == WinError::FILEMARK_DETECTED {
                    Cond::Eof
                } else {
                    Cond::Setmark
                };
                if done > 0 {
                    st.buf.eof_detected = true;
                }
                Ok(done)
            }
            e if e.is_end_of_medium() => {
                st.cond = Cond::Eod;
                if done == 0 {
                    st.buf.eom_detected = true;
                }
                Ok(done)
            }
            e => {
                let errno = st.note_error(e);
                if done > 0 { Ok(done) } else { Err(errno) }
            }
        }
    }

    fn read_locked(
        &self,
        drive: &Arc<dyn TapeDriver>,
        st: &mut TapeState,
        buf: &mut [u8],
    ) -> Result<usize, Errno> {
        let limit = self.limit();
        let bufsize = st.buf.bufsize();
        let mut done = st.buf.take(buf);
        if st.buf.varblk {
            // One record per read.
            if done > 0 || buf.is_empty() {
                return Ok(done);
            }
            let result = if buf.len() >= bufsize {
                retry(limit, "tape read", || drive.read(buf))
            } else {
                match retry(limit, "tape read", || drive.read(st.buf.fill_space())) {
                    Ok(n) => {
                        st.buf.set_filled(n);
                        Ok(st.buf.take(buf))
                    }
                    Err(p) => {
                        st.buf.set_filled(p.transferred);
                        Err(Partial::new(st.buf.take(buf), p.error))
                    }
                }
            };
            return match result {
                Ok(n) => {
                    st.block_no += 1;
                    Ok(n)
                }
                Err(p) => self.read_stopped(st, p.transferred, p.error),
            };
        }
        // Fixed blocks: whole blocks straight to the caller, the tail via devbuf.
        let whole = (buf.len() - done) / bufsize * bufsize;
        if whole > 0 {
            let target = &mut buf[done..done + whole];
            match retry(limit, "tape read", || drive.read(target)) {
                Ok(n) => {
                    done += n;
                    st.block_no += to_i32((n / bufsize) as i64);
                }
                Err(p) => {
                    st.block_no += to_i32((p.transferred / bufsize) as i64);
                    return self.read_stopped(st, done + p.transferred, p.error);
                }
            }
        }
        if done < buf.len() {
            let r = retry(limit, "tape read", || drive.read(st.buf.fill_space()));
            match r {
                Ok(n) => {
                    st.buf.set_filled(n);
                    st.block_no += 1;
                    done += st.buf.take(&mut buf[done..]);
                }
                Err(p) => {
                    st.buf.set_filled(p.transferred);
                    done += st.buf.take(&mut buf[done..]);
                    return self.read_stopped(st, done, p.error);
                }
            }
        }
        Ok(done)
    }

    fn write_locked(
        &self,
        drive: &Arc<dyn TapeDriver>,
        st: &mut TapeState,
        data: &[u8],
    ) -> Result<usize, Errno> {
        if st.buf.eom_detected {
            return Err(Errno::ENOSPC);
        }
        if !st.buf.is_writing {
            // Switching direction discards read-ahead.
            st.buf.reset();
            st.buf.is_writing = true;
        }
        st.last_write = true;
        st.cond = Cond::None;
        let limit = self.limit();
        let bufsize = st.buf.bufsize();
        if st.buf.varblk {
            if data.len() > bufsize {
                return Err(Errno::EINVAL);
            }
            return match retry(limit, "tape write", || drive.write(data)) {
                Ok(n) => {
                    st.block_no += 1;
                    st.buf.has_written = true;
                    Ok(n)
                }
                Err(p) => self.write_stopped(st, p),
            };
        }
        let mut done = 0;
        if st.buf.buffered() > 0 {
            done += st.buf.append(data);
            if !st.buf.is_full() {
                return Ok(done);
            }
            // A failed flush drops the whole block, including what this
            // call appended to it.
            self.flush(drive, st)?;
            st.buf.is_writing = true;
        }
        let whole = (data.len() - done) / bufsize * bufsize;
        if whole > 0 {
            match retry(limit, "tape write", || drive.write(&data[done..done + whole])) {
                Ok(n) => {
                    done += n;
                    st.block_no += to_i32((n / bufsize) as i64);
                    st.buf.has_written = true;
                }
                Err(p) => {
                    st.block_no += to_i32((p.transferred / bufsize) as i64);
                    return self.write_stopped(st, Partial::new(done + p.transferred, p.error));
                }
            }
        }
        if done < data.len() {
            done += st.buf.append(&data[done..]);
        }
        Ok(done)
    }

    fn write_stopped(&self, st: &mut TapeState, p: Partial) -> Result<usize, Errno> {
        if p.error.is_end_of_medium() {
            st.buf.eom_detected = true;
            st.lasterr = p.error.0;
            log::debug!("{}: end of medium after {} bytes", self.base.name(), p.transferred);
            return if p.transferred > 0 {
                Ok(p.transferred)
            } else {
                Err(Errno::ENOSPC)
            };
        }
        let errno = st.note_error(p.error);
        if p.transferred > 0 {
            Ok(p.transferred)
        } else {
            Err(errno)
        }
    }

    // -----------------------------------------------------------------------
    // Ioctls
    // -----------------------------------------------------------------------

    fn set_block_size(
        &self,
        drive: &Arc<dyn TapeDriver>,
        st: &mut TapeState,
        size: i32,
    ) -> Result<(), Errno> {
        let size = u32::try_from(size).map_err(|_| Errno::EINVAL)?;
        self.flush(drive, st)?;
        retry(self.limit(), "tape set block size", || drive.set_media_block_size(size))
            .map_err(|e| st.note_error(e))?;
        let (bufsize, varblk) = if size == 0 {
            let params = drive.drive_parameters().map_err(|e| st.note_error(e))?;
            (params.maximum_block_size as usize, true)
        } else {
            (size as usize, false)
        };
        st.buf = RawBuffer::new(bufsize, varblk);
        Ok(())
    }

    fn set_options(
        &self,
        drive: &Arc<dyn TapeDriver>,
        st: &mut TapeState,
        count: i32,
    ) -> Result<(), Errno> {
        let group = count & MT_ST_OPTIONS;
        let bits = count & !MT_ST_OPTIONS;
        let on = match group {
            0 => return Ok(()),
            MT_ST_BOOLEANS | MT_ST_SETBOOLEANS => true,
            MT_ST_CLEARBOOLEANS => false,
            _ => return Err(Errno::EINVAL),
        };
        let params = drive.drive_parameters().map_err(|e| st.note_error(e))?;
        let mut settings = TapeDriveSettings {
            compression: params.compression,
            report_setmarks: params.report_setmarks,
            data_padding: params.data_padding,
            ecc: params.ecc,
        };
        let apply = |flag: &mut bool, mask: i32| {
            if group == MT_ST_BOOLEANS {
                *flag = bits & mask != 0;
            } else if bits & mask != 0 {
                *flag = on;
            }
        };
        apply(&mut st.buffer_writes, MT_ST_BUFFER_WRITES);
        apply(&mut st.two_fm, MT_ST_TWO_FM);
        apply(&mut st.auto_lock, MT_ST_AUTO_LOCK);
        apply(&mut settings.ecc, MT_ST_ECC);
        apply(&mut settings.data_padding, MT_ST_PADDING);
        apply(&mut settings.report_setmarks, MT_ST_REPORT_SM);
        retry(self.limit(), "tape set drive parameters", || {
            drive.set_drive_parameters(settings)
        })
        .map_err(|e| st.note_error(e))
    }

    fn mtop(&self, op: &mut MtOp) -> Result<(), Errno> {
        let drive = self.driver()?;
        let mut st = self.state.lock();
        let st = &mut *st;
        let count = op.mt_count;
        let n = i64::from(count);
        log::trace!("{}: mtop {} count {count}", self.base.name(), op.mt_op);
        match op.mt_op {
            MTRESET => {
                self.position(&drive, st, TapeSeek::Rewind)?;
                st.buf.reset();
                st.cond = Cond::None;
                st.lasterr = 0;
                Ok(())
            }
            MTFSF => self.position(&drive, st, TapeSeek::Filemarks(n)),
            MTBSF => self.position(&drive, st, TapeSeek::Filemarks(-n)),
            MTFSR => self.position(&drive, st, TapeSeek::RelativeBlocks(n)),
            MTBSR => self.position(&drive, st, TapeSeek::RelativeBlocks(-n)),
            MTWEOF => self.write_marks(&drive, st, TapeMark::Filemark, count),
            MTREW => self.position(&drive, st, TapeSeek::Rewind),
            MTOFFL => {
                self.position(&drive, st, TapeSeek::Rewind)?;
                self.prepare(&drive, st, TapePrepare::Unload)
            }
            MTNOP => self.flush(&drive, st),
            MTRETEN => self.prepare(&drive, st, TapePrepare::Tension),
            MTBSFM => {
                self.position(&drive, st, TapeSeek::Filemarks(-n))?;
                self.position(&drive, st, TapeSeek::Filemarks(1))
            }
            MTFSFM => {
                self.position(&drive, st, TapeSeek::Filemarks(n))?;
                self.position(&drive, st, TapeSeek::Filemarks(-1))
            }
            MTEOM => {
                self.position(&drive, st, TapeSeek::EndOfData)?;
                st.unknown_position();
                st.cond = Cond::Eod;
                Ok(())
            }
            MTERASE => {
                self.flush(&drive, st)?;
                let how = if count == 0 {
                    TapeErase::Short
                } else {
                    TapeErase::Long
                };
                retry(self.limit(), "tape erase", || drive.erase(how))
                    .map_err(|e| st.note_error(e))
            }
            MTSETBLK => self.set_block_size(&drive, st, count),
            MTSETDENSITY => Ok(()),
            MTSEEK => {
                let block = u64::try_from(count).map_err(|_| Errno::EINVAL)?;
                self.position(&drive, st, TapeSeek::LogicalBlock(block))
            }
            MTTELL => {
                self.flush(&drive, st)?;
                let pos = retry(self.limit(), "tape tell", || drive.position())
                    .map_err(|e| st.note_error(e))?;
                op.mt_count = to_i32(i64::try_from(pos.block).unwrap_or(i64::MAX));
                Ok(())
            }
            MTSETDRVBUFFER => self.set_options(&drive, st, count),
            MTFSS => self.position(&drive, st, TapeSeek::Setmarks(n)),
            MTBSS => self.position(&drive, st, TapeSeek::Setmarks(-n)),
            MTWSM => self.write_marks(&drive, st, TapeMark::Setmark, count),
            MTLOCK => self.prepare(&drive, st, TapePrepare::Lock),
            MTUNLOCK => self.prepare(&drive, st, TapePrepare::Unlock),
            MTLOAD => self.prepare(&drive, st, TapePrepare::Load),
            MTUNLOAD => self.prepare(&drive, st, TapePrepare::Unload),
            MTCOMPRESSION => {
                let params = drive.drive_parameters().map_err(|e| st.note_error(e))?;
                let settings = TapeDriveSettings {
                    compression: count != 0,
                    report_setmarks: params.report_setmarks,
                    data_padding: params.data_padding,
                    ecc: params.ecc,
                };
                retry(self.limit(), "tape compression", || {
                    drive.set_drive_parameters(settings)
                })
                .map_err(|e| st.note_error(e))
            }
            other => {
                log::debug!("{}: unknown tape op {other}", self.base.name());
                Err(Errno::EINVAL)
            }
        }
    }

    fn mtget(&self, get: &mut MtGet) -> Result<(), Errno> {
        let drive = self.driver()?;
        let st = self.state.lock();
        *get = MtGet {
            mt_type: MT_ISSCSI2,
            mt_fileno: st.file_no,
            mt_blkno: st.block_no,
            mt_erreg: i64::from(st.lasterr),
            ..MtGet::default()
        };
        if drive.status().is_err() {
            get.mt_gstat |= GMT_DR_OPEN;
            return Ok(());
        }
        get.mt_gstat |= GMT_ONLINE;
        if let Ok(media) = drive.media_parameters() {
            get.mt_dsreg = i64::from(media.block_size) & 0x00ff_ffff;
            if media.write_protected {
                get.mt_gstat |= GMT_WR_PROT;
            }
        }
        if let Ok(params) = drive.drive_parameters() {
            if params.compression {
                get.mt_gstat |= GMT_HW_COMP;
            }
        }
        if let Ok(pos) = drive.position() {
            get.mt_resid = i64::from(pos.partition);
            if pos.block == 0 {
                get.mt_gstat |= GMT_BOT;
            }
        }
        get.mt_gstat |= match st.cond {
            Cond::Eof => GMT_EOF,
            Cond::Eod => GMT_EOD,
            Cond::Setmark => GMT_SM,
            Cond::Bot => GMT_BOT,
            Cond::None => 0,
        };
        if st.buf.eom_detected {
            get.mt_gstat |= GMT_EOT;
        }
        Ok(())
    }

    fn close_locked(&self, drive: &Arc<dyn TapeDriver>, st: &mut TapeState) -> Result<(), Errno> {
        let mut result = self.flush(drive, st);
        if st.last_write && !st.buf.eom_detected {
            let marks = if st.two_fm { 2 } else { 1 };
            result = result.and(self.write_marks(drive, st, TapeMark::Filemark, marks));
            if st.two_fm && !self.rewind_on_close {
                result = result.and(self.position(drive, st, TapeSeek::Filemarks(-1)));
            }
        }
        if self.rewind_on_close {
            result = result.and(self.position(drive, st, TapeSeek::Rewind));
        }
        result
    }
}

impl Fhandler for TapeHandler {
    fn base(&self) -> &FhBase {
        &self.base
    }

    fn open(&self, flags: i32, _mode: u32) -> Result<(), Errno> {
        let result = self.open_drive(flags);
        if let Err(e) = result {
            log::debug!("{}: open failed: {e}", self.base.name());
            self.handle.close();
        }
        result
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        if !self.base.readable() {
            return Err(Errno::EBADF);
        }
        let drive = self.driver()?;
        let mut st = self.state.lock();
        let st = &mut *st;
        if st.buf.is_writing {
            self.flush(&drive, st)?;
            st.buf.reset();
        }
        st.last_write = false;
        if st.buf.eof_detected {
            st.buf.eof_detected = false;
            return Ok(0);
        }
        if st.buf.eom_detected {
            return Err(Errno::ENOSPC);
        }
        self.read_locked(&drive, st, buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Errno> {
        if !self.base.writable() {
            return Err(Errno::EBADF);
        }
        let drive = self.driver()?;
        let mut st = self.state.lock();
        self.write_locked(&drive, &mut st, buf)
    }

    fn lseek(&self, offset: i64, whence: Whence) -> Result<u64, Errno> {
        let drive = self.driver()?;
        let mut st = self.state.lock();
        let st = &mut *st;
        let bufsize = i64::try_from(st.buf.bufsize()).map_err(|_| Errno::EINVAL)?;
        if offset % bufsize != 0 {
            return Err(Errno::EINVAL);
        }
        let blocks = offset / bufsize;
        match whence {
            Whence::Set => {
                self.flush(&drive, st)?;
                let here = drive.position().map_err(|e| st.note_error(e))?;
                let here = i64::try_from(here.block).map_err(|_| Errno::EINVAL)?;
                if blocks != here {
                    self.position(&drive, st, TapeSeek::RelativeBlocks(blocks - here))?;
                }
            }
            Whence::Cur => {
                if blocks != 0 {
                    self.position(&drive, st, TapeSeek::RelativeBlocks(blocks))?;
                }
            }
            Whence::End => {
                if blocks != 0 {
                    return Err(Errno::EINVAL);
                }
                self.position(&drive, st, TapeSeek::EndOfData)?;
            }
        }
        let here = drive.position().map_err(|e| st.note_error(e))?;
        Ok(here.block * st.buf.bufsize() as u64)
    }

    fn ioctl(&self, cmd: u64, arg: IoctlArg<'_>) -> Result<i64, Errno> {
        match (cmd, arg) {
            (MTIOCTOP, IoctlArg::Mtop(op)) => self.mtop(op).map(|()| 0),
            (MTIOCGET, IoctlArg::Mtget(get)) => self.mtget(get).map(|()| 0),
            (MTIOCPOS, IoctlArg::IntOut(out)) => {
                let drive = self.driver()?;
                let mut st = self.state.lock();
                self.flush(&drive, &mut st)?;
                let pos = drive.position().map_err(|e| st.note_error(e))?;
                *out = i64::try_from(pos.block).unwrap_or(i64::MAX);
                Ok(0)
            }
            (RDIOCDOP, IoctlArg::RdOp(op)) => {
                if op.rd_op != RDSETBLK {
                    return Err(Errno::EINVAL);
                }
                let drive = self.driver()?;
                let mut st = self.state.lock();
                self.flush(&drive, &mut st)?;
                st.buf.set_size(op.rd_parm as usize)?;
                Ok(0)
            }
            (RDIOCGET, IoctlArg::RdGet(out)) => {
                *out = u32::try_from(self.state.lock().buf.bufsize()).unwrap_or(u32::MAX);
                Ok(0)
            }
            (MTIOCTOP | MTIOCGET | MTIOCPOS | RDIOCDOP | RDIOCGET, _) => Err(Errno::EINVAL),
            (cmd, arg) => self.base.ioctl(cmd, &arg),
        }
    }

    fn fstat(&self) -> Result<Stat, Errno> {
        let mut st = self.base.stat();
        st.st_blksize = i64::try_from(self.state.lock().buf.bufsize()).unwrap_or(i64::MAX);
        Ok(st)
    }

    fn close(&self) -> Result<(), Errno> {
        let Ok(drive) = self.driver() else {
            self.handle.close();
            return Ok(());
        };
        let result = {
            let mut st = self.state.lock();
            self.close_locked(&drive, &mut st)
        };
        if let Err(e) = result {
            log::warn!("{}: close: {e}", self.base.name());
        }
        self.handle.close();
        result
    }

    fn dup(self: Arc<Self>) -> Result<Arc<dyn Fhandler>, Errno> {
        let copy = Self {
            base: self.base.dup_copy(),
            unit: self.unit,
            rewind_on_close: self.rewind_on_close,
            handle: self.handle.duplicate(true)?,
            state: Mutex::new(self.state.lock().copy_counters()),
        };
        Ok(Arc::new(copy))
    }

    fn fork_copy(&self, child: &Arc<Env>) -> Result<Arc<dyn Fhandler>, Errno> {
        let copy = Self {
            base: self.base.copy_for(child),
            unit: self.unit,
            rewind_on_close: self.rewind_on_close,
            handle: self.handle.fork_copy(&child.process)?,
            state: Mutex::new(self.state.lock().copy_counters()),
        };
        Ok(Arc::new(copy))
    }

    fn fixup_after_fork(&self, parent: &Process) -> Result<(), Errno> {
        self.handle.fixup_after_fork(parent)
    }

    fn fixup_after_exec(&self) {
        if let Ok(drive) = self.driver() {
            let mut st = self.state.lock();
            if let Err(e) = self.flush(&drive, &mut st) {
                log::debug!("{}: flush before exec: {e}", self.base.name());
            }
            st.buf.reset();
        }
    }

    fn set_close_on_exec(&self, cloexec: bool) -> Result<(), Errno> {
        self.handle.set_inherit(!cloexec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestRig;
    use ntposix_native::tape::{SimTape, TapeRecord};

    use crate::flags::{O_RDONLY, O_RDWR};

    fn rig_with(records: Vec<TapeRecord>) -> (TestRig, Arc<SimTape>) {
        let tape = Arc::new(SimTape::new(64));
        tape.load_records(records);
        let rig = TestRig::new().tape(Arc::clone(&tape)).build();
        (rig, tape)
    }

    fn open(rig: &TestRig, rewind: bool, flags: i32) -> Arc<TapeHandler> {
        let name = if rewind { "/dev/st0" } else { "/dev/nst0" };
        let fh = Arc::new(TapeHandler::new(rig.env(), name, 0, rewind, flags));
        fh.open(flags, 0).unwrap();
        fh
    }

    fn data(bytes: &[u8]) -> TapeRecord {
        TapeRecord::Data(bytes.to_vec())
    }

    #[test]
    fn variable_mode_reads_one_record_per_call() {
        let (rig, _) = rig_with(vec![data(b"alpha"), data(b"beta")]);
        let fh = open(&rig, false, O_RDONLY);
        let mut buf = [0u8; 100];
        assert_eq!(fh.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"alpha");
        assert_eq!(fh.read(&mut buf).unwrap(), 4);
    }

    #[test]
    fn small_reads_are_served_from_the_buffer() {
        let (rig, _) = rig_with(vec![data(b"abcdef")]);
        let fh = open(&rig, false, O_RDONLY);
        let mut buf = [0u8; 4];
        assert_eq!(fh.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(fh.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn filemark_ends_a_file_then_eod_reports_enospc() {
        let (rig, _) = rig_with(vec![data(b"x"), TapeRecord::Filemark]);
        let fh = open(&rig, false, O_RDONLY);
        let mut buf = [0u8; 100];
        assert_eq!(fh.read(&mut buf).unwrap(), 1);
        assert_eq!(fh.read(&mut buf).unwrap(), 0);
        // End of data: zero once, then no space.
        assert_eq!(fh.read(&mut buf).unwrap(), 0);
        assert_eq!(fh.read(&mut buf), Err(Errno::ENOSPC));
    }

    #[test]
    fn spacing_past_end_of_data_is_recorded_not_reported() {
        let (rig, _) = rig_with(vec![data(b"a")]);
        let fh = open(&rig, false, O_RDONLY);
        let mut op = MtOp {
            mt_op: MTFSF,
            mt_count: 1,
        };
        fh.ioctl(MTIOCTOP, IoctlArg::Mtop(&mut op)).unwrap();
        let mut get = MtGet::default();
        fh.ioctl(MTIOCGET, IoctlArg::Mtget(&mut get)).unwrap();
        assert_ne!(get.mt_gstat & GMT_EOD, 0);
        let mut buf = [0u8; 16];
        assert_eq!(fh.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn forward_then_backward_filemarks_returns_to_start_block() {
        let (rig, tape) = rig_with(vec![
            data(b"a"),
            TapeRecord::Filemark,
            data(b"b"),
            TapeRecord::Filemark,
            data(b"c"),
            TapeRecord::Filemark,
        ]);
        let fh = open(&rig, false, O_RDONLY);
        let mut mtop = |op: i16, count: i32| {
            let mut op = MtOp {
                mt_op: op,
                mt_count: count,
            };
            fh.ioctl(MTIOCTOP, IoctlArg::Mtop(&mut op)).unwrap();
            op.mt_count
        };
        mtop(MTFSF, 2);
        mtop(MTBSF, 1);
        let start = tape.cursor();
        assert_eq!(start, 3);
        mtop(MTFSF, 2);
        assert_eq!(tape.cursor(), 6);
        mtop(MTBSF, 2);
        assert_eq!(tape.cursor(), start);
        assert_eq!(mtop(MTTELL, 0) as usize, start);
    }

    #[test]
    fn close_after_write_appends_a_filemark() {
        let (rig, tape) = rig_with(Vec::new());
        let fh = open(&rig, true, O_RDWR);
        assert_eq!(fh.write(b"payload").unwrap(), 7);
        fh.close().unwrap();
        assert_eq!(
            tape.records(),
            vec![data(b"payload"), TapeRecord::Filemark]
        );
        assert_eq!(tape.cursor(), 0);
    }

    #[test]
    fn fixed_mode_pads_the_tail_block() {
        let (rig, tape) = rig_with(Vec::new());
        let fh = open(&rig, false, O_RDWR);
        let mut op = MtOp {
            mt_op: MTSETBLK,
            mt_count: 4,
        };
        fh.ioctl(MTIOCTOP, IoctlArg::Mtop(&mut op)).unwrap();
        assert_eq!(fh.write(b"abcdef").unwrap(), 6);
        fh.close().unwrap();
        assert_eq!(
            tape.records(),
            vec![data(b"abcd"), data(b"ef\0\0"), TapeRecord::Filemark]
        );
    }

    #[test]
    fn fixed_block_refused_at_end_of_medium_counts_nothing() {
        let tape = Arc::new(SimTape::new(1));
        let rig = TestRig::new().tape(Arc::clone(&tape)).build();
        let fh = open(&rig, false, O_RDWR);
        let mut op = MtOp {
            mt_op: MTSETBLK,
            mt_count: 4,
        };
        fh.ioctl(MTIOCTOP, IoctlArg::Mtop(&mut op)).unwrap();
        assert_eq!(fh.write(b"ab").unwrap(), 2);
        assert_eq!(fh.write(b"cdef").unwrap(), 4);
        assert_eq!(fh.write(b"ghij"), Err(Errno::ENOSPC));
        assert_eq!(fh.write(b"k"), Err(Errno::ENOSPC));
        assert_eq!(tape.records(), vec![data(b"abcd")]);
    }

    #[test]
    fn media_changes_under_the_bound_are_invisible() {
        let (rig, tape) = rig_with(vec![data(b"ok")]);
        let fh = open(&rig, false, O_RDONLY);
        tape.faults().inject(WinError::MEDIA_CHANGED, 4);
        let mut buf = [0u8; 8];
        assert_eq!(fh.read(&mut buf).unwrap(), 2);
    }

    #[test]
    fn media_changes_over_the_bound_surface_as_eio() {
        let (rig, tape) = rig_with(vec![data(b"ok")]);
        let fh = open(&rig, false, O_RDONLY);
        tape.faults().inject(WinError::MEDIA_CHANGED, 5);
        let mut buf = [0u8; 8];
        assert_eq!(fh.read(&mut buf), Err(Errno::EIO));
        let mut get = MtGet::default();
        fh.ioctl(MTIOCGET, IoctlArg::Mtget(&mut get)).unwrap();
        assert_eq!(get.mt_erreg, i64::from(WinError::MEDIA_CHANGED.0));
    }

    #[test]
    fn backspacing_at_bot_is_espipe() {
        let (rig, _) = rig_with(vec![data(b"a")]);
        let fh = open(&rig, false, O_RDONLY);
        let mut op = MtOp {
            mt_op: MTBSR,
            mt_count: 1,
        };
        assert_eq!(fh.ioctl(MTIOCTOP, IoctlArg::Mtop(&mut op)), Err(Errno::ESPIPE));
    }

    #[test]
    fn unknown_op_is_einval() {
        let (rig, _) = rig_with(Vec::new());
        let fh = open(&rig, false, O_RDONLY);
        let mut op = MtOp {
            mt_op: 99,
            mt_count: 0,
        };
        assert_eq!(fh.ioctl(MTIOCTOP, IoctlArg::Mtop(&mut op)), Err(Errno::EINVAL));
    }

    #[test]
    fn stat_reports_buffer_size() {
        let (rig, _) = rig_with(Vec::new());
        let fh = open(&rig, false, O_RDONLY);
        let st = fh.fstat().unwrap();
        assert_eq!(st.st_blksize, 64 * 1024);
        assert_eq!(st.st_mode & crate::flags::S_IFMT, crate::flags::S_IFCHR);
    }
}
