//! CDC1 uplink line format.
//!
//! Each buffered snapshot leaves the board as one JSON object per line, in
//! the same shape the collector service accepts inside its `data` array:
//!
//! ```text
//! {"test_id":"run-1","timestamp":1532,"ina260":{"voltage_v":12.34,"current_ma":1520.00},"load_cell":{"raw_value":532,"is_ready":true},"set_speed":0.50}
//! ```

use core::fmt::{self, Write};

use heapless::String;
use rig_core::buffer::SensorSnapshot;

use crate::rig::FirmwareInstant;

/// Longest encoded line, terminator included.
pub const UPLINK_LINE_LEN: usize = 224;

pub type UplinkLine = String<UPLINK_LINE_LEN>;

/// Encodes one snapshot as a newline-terminated JSON line.
pub fn encode_line(
    line: &mut UplinkLine,
    test_id: &str,
    snapshot: &SensorSnapshot<FirmwareInstant>,
) -> fmt::Result {
    line.clear();
    line.write_str("{\"test_id\":\"")?;
    write_escaped(line, test_id)?;
    write!(
        line,
        "\",\"timestamp\":{},\"ina260\":{{\"voltage_v\":{:.2},\"current_ma\":{:.2}}},",
        snapshot.timestamp.as_millis(),
        snapshot.bus_voltage_v,
        snapshot.bus_current_ma
    )?;
    writeln!(
        line,
        "\"load_cell\":{{\"raw_value\":{:.0},\"is_ready\":{}}},\"set_speed\":{:.2}}}",
        snapshot.load_cell, snapshot.load_cell_valid, snapshot.commanded
    )
}

fn write_escaped<W: Write>(out: &mut W, text: &str) -> fmt::Result {
    for ch in text.chars() {
        match ch {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            ch if ch.is_control() => {}
            ch => out.write_char(ch)?,
        }
    }
    Ok(())
}
