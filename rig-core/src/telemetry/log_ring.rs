use core::fmt::{self, Write};

use heapless::{Deque, String};

/// Number of log lines retained by [`LogRing`].
pub const LOG_RING_LINES: usize = 100;
/// Maximum characters kept per log line; longer lines are truncated.
pub const LOG_LINE_WIDTH: usize = 200;

pub type LogLine = String<LOG_LINE_WIDTH>;

/// Bounded in-memory log that discards the oldest line when full.
pub struct LogRing<const LINES: usize = LOG_RING_LINES> {
    lines: Deque<LogLine, LINES>,
    total: u32,
}

impl<const LINES: usize> LogRing<LINES> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Deque::new(),
            total: 0,
        }
    }

    /// Appends a line, evicting the oldest entry when the ring is full.
    pub fn push(&mut self, text: &str) {
        let mut line = LogLine::new();
        for ch in text.chars() {
            if line.push(ch).is_err() {
                break;
            }
        }
        self.push_line(line);
    }

    /// Formats and appends a line.
    pub fn push_fmt(&mut self, args: fmt::Arguments<'_>) {
        let mut line = TruncatingLine(LogLine::new());
        let _ = line.write_fmt(args);
        self.push_line(line.0);
    }

    fn push_line(&mut self, line: LogLine) {
        if self.lines.is_full() {
            let _ = self.lines.pop_front();
        }
        let _ = self.lines.push_back(line);
        self.total = self.total.wrapping_add(1);
    }

    /// Iterates over retained lines, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Iterates over the newest `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &str> {
        let skip = self.lines.len().saturating_sub(count);
        self.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of lines ever pushed, including evicted ones.
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl<const LINES: usize> Default for LogRing<LINES> {
    fn default() -> Self {
        Self::new()
    }
}

struct TruncatingLine(LogLine);

impl Write for TruncatingLine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.0.push(ch).is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_line_when_full() {
        let mut ring: LogRing<3> = LogRing::new();
        for index in 0..5 {
            ring.push_fmt(format_args!("line {index}"));
        }

        let lines: heapless::Vec<&str, 3> = ring.iter().collect();
        assert_eq!(lines.as_slice(), &["line 2", "line 3", "line 4"]);
        assert_eq!(ring.total(), 5);
    }

    #[test]
    fn long_lines_are_truncated() {
        let mut ring: LogRing<2> = LogRing::new();
        let mut long = heapless::String::<256>::new();
        for _ in 0..256 {
            long.push('x').unwrap();
        }
        ring.push(&long);

        assert_eq!(ring.iter().next().unwrap().len(), LOG_LINE_WIDTH);
    }

    #[test]
    fn tail_returns_newest_lines() {
        let mut ring: LogRing<4> = LogRing::new();
        for text in ["a", "b", "c", "d"] {
            ring.push(text);
        }

        let tail: heapless::Vec<&str, 4> = ring.tail(2).collect();
        assert_eq!(tail.as_slice(), &["c", "d"]);
        assert_eq!(ring.tail(10).count(), 4);
    }
}
