use core::time::Duration;

use embassy_time::Ticker;

use super::BenchRuntime;
use crate::rig::{FirmwareInstant, RequestReceiver, TICK_INTERVAL};

#[embassy_executor::task]
pub async fn run(mut runtime: BenchRuntime, requests: RequestReceiver<'static>) -> ! {
    let tare = runtime.boot(FirmwareInstant::now());
    defmt::info!("rig: ready tare={}", tare);

    let mut ticker = Ticker::every(tick_period(TICK_INTERVAL));
    loop {
        ticker.next().await;

        let now = FirmwareInstant::now();
        while let Ok(request) = requests.try_receive() {
            runtime.handle_request(request, now);
        }
        runtime.tick(now);
    }
}

fn tick_period(interval: Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_micros(u64::try_from(interval.as_micros()).unwrap_or(u64::MAX))
}
