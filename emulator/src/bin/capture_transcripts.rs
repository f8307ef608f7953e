use std::io;

#[allow(dead_code)]
#[path = "../collector.rs"]
mod collector;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../sim.rs"]
mod sim;

use session::{Session, SessionOptions, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Ramp)?;
    record_profile(TranscriptProfile::Abort)?;
    record_profile(TranscriptProfile::Overflow)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(SessionOptions {
        profile,
        fail_uploads: profile == TranscriptProfile::Overflow,
    })?;
    match profile {
        TranscriptProfile::Ramp => record_ramp(&mut session),
        TranscriptProfile::Abort => record_abort(&mut session),
        TranscriptProfile::Overflow => record_overflow(&mut session),
    }
}

fn record_ramp(session: &mut Session) -> io::Result<()> {
    session.handle_command("help")?;
    session.handle_command("advance 1s")?;
    session.handle_command("display")?;
    session.handle_command(r#"post {"test_id":"ramp-1","speeds":[0.1,0.3,0.5],"ramp_delay":1500}"#)?;
    session.handle_command(r#"post {"test_id":"ramp-2","speeds":[0.2],"ramp_delay":1500}"#)?;
    session.handle_command("advance 2s")?;
    session.handle_command("status")?;
    session.handle_command("display")?;
    session.handle_command("advance 3s")?;
    session.handle_command("uploads")?;
    session.handle_command("log 12")?;
    Ok(())
}

fn record_abort(session: &mut Session) -> io::Result<()> {
    session.handle_command("start spin-up dwell=2s speeds=0.25,0.5,0.75,1.0")?;
    session.handle_command("start again dwell=1s speeds=0.1")?;
    session.handle_command("advance 2500ms")?;
    session.handle_command("abort")?;
    session.handle_command("display")?;
    session.handle_command("status")?;
    session.handle_command("abort")?;
    session.handle_command("uploads")?;
    Ok(())
}

fn record_overflow(session: &mut Session) -> io::Result<()> {
    session.handle_command("start soak dwell=5s speeds=0.6")?;
    session.handle_command("advance 4500ms")?;
    session.handle_command("status")?;
    session.handle_command("advance 1s")?;
    session.handle_command("uploads")?;
    session.handle_command("log")?;
    Ok(())
}
