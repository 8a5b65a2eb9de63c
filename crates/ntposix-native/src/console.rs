//! Console device: an input queue plus a character-cell screen buffer.
//!
//! The screen buffer is driven by explicit cursor moves and cell writes;
//! interpretation of control characters and escape sequences belongs to the
//! terminal layer above.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::status::WinError;

/// `CONSOLE_SCREEN_BUFFER_INFO`, reduced to what the terminal layer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub width: u16,
    pub height: u16,
    pub cursor_x: u16,
    pub cursor_y: u16,
    pub attribute: u16,
}

#[derive(Debug)]
struct ScreenBuffer {
    width: u16,
    height: u16,
    cells: Vec<u8>,
    cursor_x: u16,
    cursor_y: u16,
    attribute: u16,
}

impl ScreenBuffer {
    fn index(&self, x: u16, y: u16) -> usize {
        usize::from(y) * usize::from(self.width) + usize::from(x)
    }

    fn scroll(&mut self, lines: u16) {
        let lines = lines.min(self.height);
        let shift = usize::from(lines) * usize::from(self.width);
        self.cells.drain(..shift);
        self.cells.extend(std::iter::repeat_n(b' ', shift));
    }
}

pub const DEFAULT_ATTRIBUTE: u16 = 0x07;

/// A console.
#[derive(Debug)]
pub struct ConsoleDevice {
    input: Mutex<VecDeque<u8>>,
    input_cond: Condvar,
    screen: Mutex<ScreenBuffer>,
}

impl ConsoleDevice {
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            input: Mutex::new(VecDeque::new()),
            input_cond: Condvar::new(),
            screen: Mutex::new(ScreenBuffer {
                width,
                height,
                cells: vec![b' '; usize::from(width) * usize::from(height)],
                cursor_x: 0,
                cursor_y: 0,
                attribute: DEFAULT_ATTRIBUTE,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Queue keystrokes as if typed.
    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes);
        self.input_cond.notify_all();
    }

    /// Take up to `buf.len()` queued keystrokes without blocking.
    pub fn read_input(&self, buf: &mut [u8]) -> usize {
        let mut input = self.input.lock();
        let n = buf.len().min(input.len());
        for (dst, src) in buf.iter_mut().zip(input.drain(..n)) {
            *dst = src;
        }
        n
    }

    #[must_use]
    pub fn input_available(&self) -> usize {
        self.input.lock().len()
    }

    /// Park until input arrives or `slice` elapses.
    pub fn wait_input(&self, slice: Duration) {
        let mut input = self.input.lock();
        if input.is_empty() {
            let _ = self.input_cond.wait_for(&mut input, slice);
        }
    }

    pub fn flush_input(&self) {
        self.input.lock().clear();
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn screen_info(&self) -> ScreenInfo {
        let s = self.screen.lock();
        ScreenInfo {
            width: s.width,
            height: s.height,
            cursor_x: s.cursor_x,
            cursor_y: s.cursor_y,
            attribute: s.attribute,
        }
    }

    pub fn set_cursor(&self, x: u16, y: u16) -> Result<(), WinError> {
        let mut s = self.screen.lock();
        if x >= s.width || y >= s.height {
            return Err(WinError::INVALID_PARAMETER);
        }
        s.cursor_x = x;
        s.cursor_y = y;
        Ok(())
    }

    pub fn set_attribute(&self, attribute: u16) {
        self.screen.lock().attribute = attribute;
    }

    /// Store `chars` into cells from the cursor on, wrapping at the right
    /// edge and scrolling at the bottom. Returns the number of cells written.
    pub fn write_chars(&self, chars: &[u8]) -> usize {
        let mut s = self.screen.lock();
        for &c in chars {
            let idx = s.index(s.cursor_x, s.cursor_y);
            s.cells[idx] = c;
            s.cursor_x += 1;
            if s.cursor_x == s.width {
                s.cursor_x = 0;
                if s.cursor_y + 1 == s.height {
                    s.scroll(1);
                } else {
                    s.cursor_y += 1;
                }
            }
        }
        chars.len()
    }

    /// Fill `count` cells starting at (`x`, `y`) with `ch`; clamped to the buffer.
    pub fn fill_chars(&self, x: u16, y: u16, ch: u8, count: usize) -> Result<usize, WinError> {
        let mut s = self.screen.lock();
        if x >= s.width || y >= s.height {
            return Err(WinError::INVALID_PARAMETER);
        }
        let start = s.index(x, y);
        let end = (start + count).min(s.cells.len());
        s.cells[start..end].fill(ch);
        Ok(end - start)
    }

    /// Scroll the whole buffer up by `lines`, blanking the bottom.
    pub fn scroll_up(&self, lines: u16) {
        self.screen.lock().scroll(lines);
    }

    /// Text of row `y` with trailing blanks removed.
    #[must_use]
    pub fn line_text(&self, y: u16) -> String {
        let s = self.screen.lock();
        if y >= s.height {
            return String::new();
        }
        let start = s.index(0, y);
        let row = &s.cells[start..start + usize::from(s.width)];
        String::from_utf8_lossy(row).trim_end().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_queue_is_fifo() {
        let c = ConsoleDevice::new(10, 3);
        c.push_input(b"abc");
        assert_eq!(c.input_available(), 3);
        let mut buf = [0u8; 2];
        assert_eq!(c.read_input(&mut buf), 2);
        assert_eq!(&buf, b"ab");
        c.flush_input();
        assert_eq!(c.input_available(), 0);
    }

    #[test]
    fn write_wraps_and_scrolls() {
        let c = ConsoleDevice::new(4, 2);
        c.write_chars(b"abcdefgh");
        assert_eq!(c.line_text(0), "efgh");
        assert_eq!(c.line_text(1), "");
        let info = c.screen_info();
        assert_eq!((info.cursor_x, info.cursor_y), (0, 1));
    }

    #[test]
    fn fill_and_cursor_bounds() {
        let c = ConsoleDevice::new(4, 2);
        c.write_chars(b"abcd");
        assert_eq!(c.fill_chars(2, 0, b' ', 100), Ok(6));
        assert_eq!(c.line_text(0), "ab");
        assert_eq!(c.set_cursor(4, 0), Err(WinError::INVALID_PARAMETER));
    }
}
