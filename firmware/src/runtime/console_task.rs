use rig_core::repl::commands::CommandExecutor;
use rig_core::telemetry::LogLine;

use super::{CONSOLE_RX_QUEUE, CONSOLE_TX_QUEUE, LOG_RING, REQUEST_QUEUE, STATUS};
use crate::console::{self, ConsoleRig, LineAssembler, LineEvent, Response};
use crate::rig::FirmwareInstant;

const NEWLINE: &str = "\r\n";

#[embassy_executor::task]
pub async fn run() -> ! {
    let mut executor = CommandExecutor::new(ConsoleRig::new(REQUEST_QUEUE.sender(), &STATUS));
    let mut assembler = LineAssembler::new();
    let rx = CONSOLE_RX_QUEUE.receiver();

    loop {
        let frame = rx.receive().await;
        for byte in frame {
            match assembler.push(byte) {
                LineEvent::Pending => {}
                LineEvent::Overflow => reply("error: line too long").await,
                LineEvent::Ready => {
                    let response = match assembler.line() {
                        Ok(line) => {
                            defmt::debug!("console: {=str}", line);
                            Some(console::execute(&mut executor, line, FirmwareInstant::now()))
                        }
                        Err(_) => None,
                    };
                    assembler.clear();

                    match response {
                        Some(Response::Lines(lines)) => {
                            for line in &lines {
                                reply(line).await;
                            }
                        }
                        Some(Response::Log { count }) => replay_log(count).await,
                        None => reply("error: invalid utf-8").await,
                    }
                }
            }
        }
    }
}

async fn reply(text: &str) {
    let tx = CONSOLE_TX_QUEUE.sender();
    for frame in console::frames(text).chain(console::frames(NEWLINE)) {
        tx.send(frame).await;
    }
}

/// Copies one ring line at a time so the lock is never held across an await.
async fn replay_log(count: usize) {
    let available = LOG_RING.lock(|ring| ring.borrow().len()).min(count);
    for index in 0..available {
        let line = LOG_RING.lock(|ring| {
            ring.borrow()
                .tail(available)
                .nth(index)
                .and_then(|line| LogLine::try_from(line).ok())
        });
        match line {
            Some(line) => reply(&line).await,
            None => break,
        }
    }
}
