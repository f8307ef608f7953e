//! Log sites for the rig task.
//!
//! Every line goes to defmt on target (stdout on host) and into the shared
//! [`SharedLogRing`] so the console `log` command can replay it.

use core::fmt;

use rig_core::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecord};

use super::{FirmwareInstant, SharedLogRing};

fn append(logs: &SharedLogRing, args: fmt::Arguments<'_>) {
    logs.lock(|ring| ring.borrow_mut().push_fmt(args));
}

pub(super) fn tare_captured(logs: &SharedLogRing, tare: i32, timestamp: FirmwareInstant) {
    let t = timestamp.as_micros();
    append(logs, format_args!("hx711: tare captured raw={tare} t={t}us"));
    emit_tare_captured(tare, t);
}

#[cfg(target_os = "none")]
fn emit_tare_captured(tare: i32, t: u64) {
    defmt::info!("hx711: tare captured raw={} t={}us", tare, t);
}

#[cfg(not(target_os = "none"))]
fn emit_tare_captured(tare: i32, t: u64) {
    println!("hx711: tare captured raw={tare} t={t}us");
}

pub(super) fn request_rejected(
    logs: &SharedLogRing,
    request: &'static str,
    reason: &'static str,
    timestamp: FirmwareInstant,
) {
    let t = timestamp.as_micros();
    append(logs, format_args!("rig: {request} rejected ({reason}) t={t}us"));
    emit_request_rejected(request, reason, t);
}

#[cfg(target_os = "none")]
fn emit_request_rejected(request: &'static str, reason: &'static str, t: u64) {
    defmt::warn!("rig: {} rejected ({}) t={}us", request, reason, t);
}

#[cfg(not(target_os = "none"))]
fn emit_request_rejected(request: &'static str, reason: &'static str, t: u64) {
    println!("rig: {request} rejected ({reason}) t={t}us");
}

pub(super) fn buffer_full(logs: &SharedLogRing, capacity: usize, timestamp: FirmwareInstant) {
    let t = timestamp.as_micros();
    append(
        logs,
        format_args!("rig: buffer full ({capacity}), waiting to send t={t}us"),
    );
    emit_buffer_full(capacity, t);
}

#[cfg(target_os = "none")]
fn emit_buffer_full(capacity: usize, t: u64) {
    defmt::warn!("rig: buffer full ({}), waiting to send t={}us", capacity, t);
}

#[cfg(not(target_os = "none"))]
fn emit_buffer_full(capacity: usize, t: u64) {
    println!("rig: buffer full ({capacity}), waiting to send t={t}us");
}

pub(super) fn ready_stats(
    logs: &SharedLogRing,
    percent: u8,
    checks: u32,
    timestamp: FirmwareInstant,
) {
    let t = timestamp.as_micros();
    append(
        logs,
        format_args!("hx711: ready {percent}% of {checks} checks t={t}us"),
    );
    emit_ready_stats(percent, checks, t);
}

#[cfg(target_os = "none")]
fn emit_ready_stats(percent: u8, checks: u32, t: u64) {
    defmt::info!("hx711: ready {}% of {} checks t={}us", percent, checks, t);
}

#[cfg(not(target_os = "none"))]
fn emit_ready_stats(percent: u8, checks: u32, t: u64) {
    println!("hx711: ready {percent}% of {checks} checks t={t}us");
}

/// Mirrors one telemetry record into the logs.
pub(super) fn telemetry(logs: &SharedLogRing, record: &TelemetryRecord<FirmwareInstant>) {
    let label = event_label(record.event);
    let t = record.timestamp.as_micros();

    match record.details {
        TelemetryPayload::Step(step) => {
            append(
                logs,
                format_args!(
                    "rig: {label} step={} value={}/1000 t={t}us",
                    step.index, step.value_permille
                ),
            );
            emit_step(label, step.index, step.value_permille, t);
        }
        TelemetryPayload::Batch(batch) => {
            append(
                logs,
                format_args!(
                    "uplink: {label} count={} dropped={} t={t}us",
                    batch.count, batch.dropped
                ),
            );
            emit_batch(label, batch.count, batch.dropped, t);
        }
        TelemetryPayload::Test(test) => {
            let duration_ms = test
                .duration
                .map_or(0, |duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
            append(
                logs,
                format_args!(
                    "rig: {label} steps={} duration={duration_ms}ms t={t}us",
                    test.steps
                ),
            );
            emit_test(label, test.steps, duration_ms, t);
        }
        TelemetryPayload::None => {
            append(logs, format_args!("rig: {label} t={t}us"));
            emit_plain(label, t);
        }
    }
}

#[cfg(target_os = "none")]
fn emit_step(label: &'static str, index: u8, permille: u16, t: u64) {
    defmt::info!("rig: {} step={} value={}/1000 t={}us", label, index, permille, t);
}

#[cfg(not(target_os = "none"))]
fn emit_step(label: &'static str, index: u8, permille: u16, t: u64) {
    println!("rig: {label} step={index} value={permille}/1000 t={t}us");
}

#[cfg(target_os = "none")]
fn emit_batch(label: &'static str, count: u16, dropped: u32, t: u64) {
    if label == "upload-failed" || label == "snapshot-dropped" {
        defmt::warn!("uplink: {} count={} dropped={} t={}us", label, count, dropped, t);
    } else {
        defmt::info!("uplink: {} count={} dropped={} t={}us", label, count, dropped, t);
    }
}

#[cfg(not(target_os = "none"))]
fn emit_batch(label: &'static str, count: u16, dropped: u32, t: u64) {
    println!("uplink: {label} count={count} dropped={dropped} t={t}us");
}

#[cfg(target_os = "none")]
fn emit_test(label: &'static str, steps: u8, duration_ms: u64, t: u64) {
    defmt::info!("rig: {} steps={} duration={}ms t={}us", label, steps, duration_ms, t);
}

#[cfg(not(target_os = "none"))]
fn emit_test(label: &'static str, steps: u8, duration_ms: u64, t: u64) {
    println!("rig: {label} steps={steps} duration={duration_ms}ms t={t}us");
}

#[cfg(target_os = "none")]
fn emit_plain(label: &'static str, t: u64) {
    defmt::info!("rig: {} t={}us", label, t);
}

#[cfg(not(target_os = "none"))]
fn emit_plain(label: &'static str, t: u64) {
    println!("rig: {label} t={t}us");
}

const fn event_label(event: TelemetryEventKind) -> &'static str {
    match event {
        TelemetryEventKind::TestStarted => "test-started",
        TelemetryEventKind::StepAdvanced => "step-advanced",
        TelemetryEventKind::TestCompleted => "test-completed",
        TelemetryEventKind::TestAborted => "test-aborted",
        TelemetryEventKind::SnapshotDropped => "snapshot-dropped",
        TelemetryEventKind::BatchUploaded => "batch-uploaded",
        TelemetryEventKind::UploadFailed => "upload-failed",
        TelemetryEventKind::BatchSkipped => "batch-skipped",
        TelemetryEventKind::Custom(_) => "custom",
    }
}
