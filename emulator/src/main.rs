mod collector;
mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use crossterm::style::Stylize;
use session::{Session, SessionOptions, TranscriptProfile};

const USAGE: &str = "Usage: rig-emulator [--profile <ramp|abort|overflow>] [--fail-uploads]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "{}",
        "Motor test rig emulator ready. Type `help` for commands or `exit` to quit.".bold()
    )?;

    loop {
        line.clear();
        write!(writer, "{}", "> ".dark_grey())?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            if is_failure(&response) {
                writeln!(writer, "{}", response.red())?;
            } else if response.starts_with("ok ") || response.starts_with("HTTP 200") {
                writeln!(writer, "{}", response.green())?;
            } else {
                writeln!(writer, "{response}")?;
            }
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn is_failure(line: &str) -> bool {
    line.starts_with("error:") || line.starts_with("HTTP 4") || line.starts_with("HTTP 5")
}

fn parse_options(args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    let mut args = args.peekable();

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            options.profile = TranscriptProfile::from_tag(value)?;
        } else if arg == "--profile" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --profile".to_string())?;
            options.profile = TranscriptProfile::from_tag(&value)?;
        } else if arg == "--fail-uploads" {
            options.fail_uploads = true;
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }

    Ok(options)
}
