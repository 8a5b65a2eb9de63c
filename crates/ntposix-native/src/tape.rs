//! Tape drives.
//!
//! [`TapeDriver`] is the primitive surface of a tape device: transfers,
//! positioning, marks, prepare/erase and the drive/media parameter blocks.
//! [`SimTape`] keeps the medium as a list of records (data blocks, filemarks,
//! setmarks); the position is an index into that list, so every record,
//! marks included, occupies one block number.

use parking_lot::Mutex;

use crate::fault::FaultPlan;
use crate::status::{Partial, WinError};

// ---------------------------------------------------------------------------
// Primitive surface
// ---------------------------------------------------------------------------

/// Positioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeSeek {
    Rewind,
    /// Absolute logical block number.
    LogicalBlock(u64),
    /// Past the last recorded data.
    EndOfData,
    /// Space by blocks; stops after a filemark moving forward, on it moving back.
    RelativeBlocks(i64),
    /// Space by filemarks; forward lands past the last mark, backward on it.
    Filemarks(i64),
    /// Space by setmarks, with the same landing rules as filemarks.
    Setmarks(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeMark {
    Filemark,
    ShortFilemark,
    LongFilemark,
    Setmark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapePrepare {
    Load,
    Unload,
    Tension,
    Lock,
    Unlock,
    Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeErase {
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TapePosition {
    pub partition: u32,
    pub block: u64,
}

/// Drive capabilities and current settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeDriveParameters {
    pub default_block_size: u32,
    pub maximum_block_size: u32,
    pub minimum_block_size: u32,
    pub maximum_partition_count: u32,
    pub supports_compression: bool,
    pub compression: bool,
    pub supports_setmarks: bool,
    pub report_setmarks: bool,
    pub supports_lock: bool,
    pub data_padding: bool,
    pub ecc: bool,
    pub eot_warning_zone_size: u32,
}

impl Default for TapeDriveParameters {
    fn default() -> Self {
        Self {
            default_block_size: 512,
            maximum_block_size: 64 * 1024,
            minimum_block_size: 1,
            maximum_partition_count: 1,
            supports_compression: true,
            compression: false,
            supports_setmarks: true,
            report_setmarks: true,
            supports_lock: true,
            data_padding: false,
            ecc: true,
            eot_warning_zone_size: 0,
        }
    }
}

/// Media description. `block_size == 0` means variable-block mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeMediaParameters {
    pub capacity: u64,
    pub remaining: u64,
    pub block_size: u32,
    pub partition_count: u32,
    pub write_protected: bool,
}

/// Settable subset of the drive parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeDriveSettings {
    pub compression: bool,
    pub report_setmarks: bool,
    pub data_padding: bool,
    pub ecc: bool,
}

/// Primitive operations a tape device provides.
pub trait TapeDriver: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize, Partial>;
    fn write(&self, buf: &[u8]) -> Result<usize, Partial>;
    fn position(&self) -> Result<TapePosition, WinError>;
    fn set_position(&self, seek: TapeSeek) -> Result<(), WinError>;
    fn write_marks(&self, mark: TapeMark, count: u32) -> Result<(), WinError>;
    fn prepare(&self, op: TapePrepare) -> Result<(), WinError>;
    fn erase(&self, how: TapeErase) -> Result<(), WinError>;
    fn drive_parameters(&self) -> Result<TapeDriveParameters, WinError>;
    fn media_parameters(&self) -> Result<TapeMediaParameters, WinError>;
    fn set_media_block_size(&self, size: u32) -> Result<(), WinError>;
    fn set_drive_parameters(&self, settings: TapeDriveSettings) -> Result<(), WinError>;
    /// Whether the drive is ready (`GetTapeStatus`).
    fn status(&self) -> Result<(), WinError>;
}

// ---------------------------------------------------------------------------
// Simulated drive
// ---------------------------------------------------------------------------

/// One record on a simulated medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapeRecord {
    Data(Vec<u8>),
    Filemark,
    Setmark,
}

impl TapeRecord {
    fn is_filemark(&self) -> bool {
        matches!(self, Self::Filemark)
    }

    fn is_setmark(&self) -> bool {
        matches!(self, Self::Setmark)
    }
}

#[derive(Debug)]
struct SimTapeState {
    records: Vec<TapeRecord>,
    pos: usize,
    block_size: u32,
    loaded: bool,
    locked: bool,
    write_protected: bool,
    capacity_blocks: usize,
    params: TapeDriveParameters,
}

/// An in-memory tape drive with a loaded medium.
#[derive(Debug)]
pub struct SimTape {
    state: Mutex<SimTapeState>,
    faults: FaultPlan,
}

impl SimTape {
    /// A loaded, empty medium holding at most `capacity_blocks` records,
    /// in variable-block mode.
    #[must_use]
    pub fn new(capacity_blocks: usize) -> Self {
        Self::with_parameters(capacity_blocks, TapeDriveParameters::default())
    }

    #[must_use]
    pub fn with_parameters(capacity_blocks: usize, params: TapeDriveParameters) -> Self {
        Self {
            state: Mutex::new(SimTapeState {
                records: Vec::new(),
                pos: 0,
                block_size: 0,
                loaded: true,
                locked: false,
                write_protected: false,
                capacity_blocks,
                params,
            }),
            faults: FaultPlan::new(),
        }
    }

    /// Replace the medium contents and rewind.
    pub fn load_records(&self, records: Vec<TapeRecord>) {
        let mut state = self.state.lock();
        state.records = records;
        state.pos = 0;
        state.loaded = true;
    }

    #[must_use]
    pub fn records(&self) -> Vec<TapeRecord> {
        self.state.lock().records.clone()
    }

    /// Current record index.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.state.lock().pos
    }

    pub fn set_write_protected(&self, protected: bool) {
        self.state.lock().write_protected = protected;
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    #[must_use]
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    fn space_marks(
        state: &mut SimTapeState,
        count: i64,
        is_mark: fn(&TapeRecord) -> bool,
    ) -> Result<(), WinError> {
        let wanted = count.unsigned_abs();
        let mut passed = 0u64;
        if count > 0 {
            while passed < wanted {
                let Some(record) = state.records.get(state.pos) else {
                    return Err(WinError::NO_DATA_DETECTED);
                };
                let hit = is_mark(record);
                state.pos += 1;
                if hit {
                    passed += 1;
                }
            }
        } else {
            while passed < wanted {
                if state.pos == 0 {
                    return Err(WinError::BEGINNING_OF_MEDIA);
                }
                state.pos -= 1;
                if is_mark(&state.records[state.pos]) {
                    passed += 1;
                }
            }
        }
        Ok(())
    }

    fn space_blocks(state: &mut SimTapeState, count: i64) -> Result<(), WinError> {
        if count >= 0 {
            for _ in 0..count {
                let Some(record) = state.records.get(state.pos) else {
                    return Err(WinError::NO_DATA_DETECTED);
                };
                let filemark = record.is_filemark();
                let setmark = record.is_setmark() && state.params.report_setmarks;
                state.pos += 1;
                if filemark {
                    return Err(WinError::FILEMARK_DETECTED);
                }
                if setmark {
                    return Err(WinError::SETMARK_DETECTED);
                }
            }
        } else {
            for _ in 0..count.unsigned_abs() {
                if state.pos == 0 {
                    return Err(WinError::BEGINNING_OF_MEDIA);
                }
                state.pos -= 1;
                let record = &state.records[state.pos];
                if record.is_filemark() {
                    return Err(WinError::FILEMARK_DETECTED);
                }
                if record.is_setmark() && state.params.report_setmarks {
                    return Err(WinError::SETMARK_DETECTED);
                }
            }
        }
        Ok(())
    }

    fn append(state: &mut SimTapeState, record: TapeRecord) -> Result<(), WinError> {
        if state.records.len() >= state.capacity_blocks {
            return Err(WinError::END_OF_MEDIA);
        }
        state.records.push(record);
        state.pos += 1;
        Ok(())
    }

    fn ready(state: &SimTapeState) -> Result<(), WinError> {
        if state.loaded {
            Ok(())
        } else {
            Err(WinError::NO_MEDIA_IN_DRIVE)
        }
    }
}

impl TapeDriver for SimTape {
    fn read(&self, buf: &mut [u8]) -> Result<usize, Partial> {
        self.faults.check()?;
        let mut state = self.state.lock();
        Self::ready(&state)?;
        let block = state.block_size as usize;
        if block != 0 && buf.len() % block != 0 {
            return Err(Partial::none(WinError::INVALID_BLOCK_LENGTH));
        }
        let mut done = 0usize;
        loop {
            let Some(record) = state.records.get(state.pos) else {
                return Err(Partial::new(done, WinError::NO_DATA_DETECTED));
            };
            match record {
                TapeRecord::Filemark => {
                    state.pos += 1;
                    return Err(Partial::new(done, WinError::FILEMARK_DETECTED));
                }
                TapeRecord::Setmark => {
                    state.pos += 1;
                    if state.params.report_setmarks {
                        return Err(Partial::new(done, WinError::SETMARK_DETECTED));
                    }
                    continue;
                }
                TapeRecord::Data(data) => {
                    let room = buf.len() - done;
                    let n = data.len().min(room);
                    buf[done..done + n].copy_from_slice(&data[..n]);
                    let truncated = data.len() > room;
                    state.pos += 1;
                    done += n;
                    if truncated {
                        return Err(Partial::new(done, WinError::MORE_DATA));
                    }
                    // Variable-block reads return one record per call.
                    if block == 0 || done == buf.len() {
                        return Ok(done);
                    }
                }
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Partial> {
        self.faults.check()?;
        let mut state = self.state.lock();
        Self::ready(&state)?;
        if state.write_protected {
            return Err(Partial::none(WinError::WRITE_PROTECT));
        }
        let block = state.block_size as usize;
        let bad_length = if block == 0 {
            buf.len() > state.params.maximum_block_size as usize
        } else {
            buf.len() % block != 0
        };
        if bad_length {
            return Err(Partial::none(WinError::INVALID_BLOCK_LENGTH));
        }
        let pos = state.pos;
        state.records.truncate(pos);
        if block == 0 {
            Self::append(&mut state, TapeRecord::Data(buf.to_vec()))
                .map_err(Partial::none)?;
            return Ok(buf.len());
        }
        let mut done = 0usize;
        for chunk in buf.chunks(block) {
            Self::append(&mut state, TapeRecord::Data(chunk.to_vec()))
                .map_err(|e| Partial::new(done, e))?;
            done += chunk.len();
        }
        Ok(done)
    }

    fn position(&self) -> Result<TapePosition, WinError> {
        let state = self.state.lock();
        Self::ready(&state)?;
        Ok(TapePosition {
            partition: 1,
            block: state.pos as u64,
        })
    }

    fn set_position(&self, seek: TapeSeek) -> Result<(), WinError> {
        self.faults.check()?;
        let mut state = self.state.lock();
        Self::ready(&state)?;
        match seek {
            TapeSeek::Rewind => {
                state.pos = 0;
                Ok(())
            }
            TapeSeek::LogicalBlock(block) => {
                let block = usize::try_from(block).unwrap_or(usize::MAX);
                if block > state.records.len() {
                    state.pos = state.records.len();
                    Err(WinError::NO_DATA_DETECTED)
                } else {
                    state.pos = block;
                    Ok(())
                }
            }
            TapeSeek::EndOfData => {
                state.pos = state.records.len();
                Ok(())
            }
            TapeSeek::RelativeBlocks(count) => Self::space_blocks(&mut state, count),
            TapeSeek::Filemarks(count) => {
                Self::space_marks(&mut state, count, TapeRecord::is_filemark)
            }
            TapeSeek::Setmarks(count) => {
                if !state.params.supports_setmarks {
                    return Err(WinError::NOT_SUPPORTED);
                }
                Self::space_marks(&mut state, count, TapeRecord::is_setmark)
            }
        }
    }

    fn write_marks(&self, mark: TapeMark, count: u32) -> Result<(), WinError> {
        self.faults.check()?;
        let mut state = self.state.lock();
        Self::ready(&state)?;
        if state.write_protected {
            return Err(WinError::WRITE_PROTECT);
        }
        let record = match mark {
            TapeMark::Setmark if !state.params.supports_setmarks => {
                return Err(WinError::NOT_SUPPORTED);
            }
            TapeMark::Setmark => TapeRecord::Setmark,
            TapeMark::Filemark | TapeMark::ShortFilemark | TapeMark::LongFilemark => {
                TapeRecord::Filemark
            }
        };
        let pos = state.pos;
        state.records.truncate(pos);
        for _ in 0..count {
            Self::append(&mut state, record.clone())?;
        }
        Ok(())
    }

    fn prepare(&self, op: TapePrepare) -> Result<(), WinError> {
        self.faults.check()?;
        let mut state = self.state.lock();
        match op {
            TapePrepare::Load => {
                state.loaded = true;
                state.pos = 0;
            }
            TapePrepare::Unload => {
                Self::ready(&state)?;
                state.loaded = false;
                state.pos = 0;
            }
            TapePrepare::Tension => {
                Self::ready(&state)?;
                state.pos = 0;
            }
            TapePrepare::Lock | TapePrepare::Unlock => {
                if !state.params.supports_lock {
                    return Err(WinError::NOT_SUPPORTED);
                }
                state.locked = op == TapePrepare::Lock;
            }
            TapePrepare::Format => {
                Self::ready(&state)?;
                state.records.clear();
                state.pos = 0;
            }
        }
        Ok(())
    }

    fn erase(&self, _how: TapeErase) -> Result<(), WinError> {
        self.faults.check()?;
        let mut state = self.state.lock();
        Self::ready(&state)?;
        if state.write_protected {
            return Err(WinError::WRITE_PROTECT);
        }
        let pos = state.pos;
        state.records.truncate(pos);
        Ok(())
    }

    fn drive_parameters(&self) -> Result<TapeDriveParameters, WinError> {
        Ok(self.state.lock().params)
    }

    fn media_parameters(&self) -> Result<TapeMediaParameters, WinError> {
        let state = self.state.lock();
        Self::ready(&state)?;
        let unit = u64::from(if state.block_size == 0 {
            state.params.default_block_size
        } else {
            state.block_size
        });
        let capacity = state.capacity_blocks as u64 * unit;
        let used = state.records.len() as u64 * unit;
        Ok(TapeMediaParameters {
            capacity,
            remaining: capacity.saturating_sub(used),
            block_size: state.block_size,
            partition_count: 1,
            write_protected: state.write_protected,
        })
    }

    fn set_media_block_size(&self, size: u32) -> Result<(), WinError> {
        let mut state = self.state.lock();
        Self::ready(&state)?;
        if size != 0
            && (size < state.params.minimum_block_size || size > state.params.maximum_block_size)
        {
            return Err(WinError::INVALID_PARAMETER);
        }
        state.block_size = size;
        Ok(())
    }

    fn set_drive_parameters(&self, settings: TapeDriveSettings) -> Result<(), WinError> {
        let mut state = self.state.lock();
        if settings.compression && !state.params.supports_compression {
            return Err(WinError::NOT_SUPPORTED);
        }
        state.params.compression = settings.compression;
        state.params.report_setmarks = settings.report_setmarks;
        state.params.data_padding = settings.data_padding;
        state.params.ecc = settings.ecc;
        Ok(())
    }

    fn status(&self) -> Result<(), WinError> {
        Self::ready(&self.state.lock())
    }
}
