use embassy_futures::join::{join, join3};
use embassy_futures::select::{Either, Either3, select, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::Sender;
use embassy_usb::driver::{Driver, EndpointError};

use super::{CONSOLE_RX_QUEUE, CONSOLE_TX_QUEUE, UPLINK_QUEUE, USB_STORAGE};
use crate::console::ConsoleFrame;
use crate::rig::UplinkBatch;
use crate::uplink::{self, UplinkLine};
use crate::usb::{self, CdcPort, UsbDeviceStrings, UsbPortKind};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

const PACKET_LEN: usize = usb::MAX_PACKET_SIZE as usize;

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let mut composite = usb::UsbComposite::new(driver, storage, UsbDeviceStrings::default());

    let console = composite
        .take_port(UsbPortKind::Console)
        .expect("console CDC interface unavailable");
    let uplink = composite
        .take_port(UsbPortKind::Uplink)
        .expect("uplink CDC interface unavailable");

    let mut device = composite.device;
    join3(device.run(), run_console(console), run_uplink(uplink)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_console<D: Driver<'static>>(port: CdcPort<D>) -> ! {
    let CdcPort {
        mut sender,
        mut receiver,
        control,
        ..
    } = port;
    let rx_queue = CONSOLE_RX_QUEUE.sender();
    let tx_queue = CONSOLE_TX_QUEUE.receiver();
    let mut ingress = [0u8; PACKET_LEN];
    let mut pending_tx: Option<ConsoleFrame> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        usb::wait_for_dtr(&control, &sender).await;
        // Replies queued for a previous host are stale.
        pending_tx = None;
        while tx_queue.try_receive().is_ok() {}
        defmt::info!("usb: console connected");

        loop {
            let outcome = select3(
                receiver.read_packet(&mut ingress),
                async {
                    let frame = match pending_tx.take() {
                        Some(frame) => frame,
                        None => tx_queue.receive().await,
                    };
                    let result = sender.write_packet(&frame).await;
                    if result.is_err() {
                        pending_tx = Some(frame);
                    }
                    result
                },
                control.control_changed(),
            )
            .await;

            match outcome {
                Either3::First(Ok(0)) | Either3::Second(Ok(())) => {}
                Either3::First(Ok(count)) => match ConsoleFrame::from_slice(&ingress[..count]) {
                    Ok(frame) => rx_queue.send(frame).await,
                    Err(()) => defmt::warn!("usb: dropping console frame len={}", count),
                },
                Either3::First(Err(EndpointError::Disabled))
                | Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console disabled");
                    break;
                }
                Either3::First(Err(_)) | Either3::Second(Err(_)) => {
                    defmt::warn!("usb: console transfer error");
                }
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: console host dropped DTR");
                        break;
                    }
                }
            }
        }
    }
}

async fn run_uplink<D: Driver<'static>>(port: CdcPort<D>) -> ! {
    let CdcPort {
        mut sender,
        mut receiver,
        control,
        ..
    } = port;
    let batches = UPLINK_QUEUE.receiver();

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        usb::wait_for_dtr(&control, &sender).await;
        defmt::info!("usb: uplink connected");

        loop {
            match select(batches.receive(), control.control_changed()).await {
                Either::First(batch) => match write_batch(&mut sender, &batch).await {
                    Ok(()) => {}
                    Err(EndpointError::Disabled) => {
                        defmt::warn!("usb: uplink disabled mid-batch");
                        break;
                    }
                    Err(EndpointError::BufferOverflow) => {
                        defmt::warn!("usb: uplink packet overflow");
                    }
                },
                Either::Second(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: uplink host dropped DTR");
                        break;
                    }
                }
            }
        }
    }
}

async fn write_batch<D: Driver<'static>>(
    sender: &mut Sender<'static, D>,
    batch: &UplinkBatch,
) -> Result<(), EndpointError> {
    let mut line = UplinkLine::new();
    for snapshot in &batch.snapshots {
        if uplink::encode_line(&mut line, &batch.test_id, snapshot).is_err() {
            defmt::warn!("usb: uplink line truncated");
            continue;
        }
        write_text(sender, line.as_bytes()).await?;
    }
    defmt::debug!("usb: uplinked {} samples", batch.snapshots.len());
    Ok(())
}

async fn write_text<D: Driver<'static>>(
    sender: &mut Sender<'static, D>,
    bytes: &[u8],
) -> Result<(), EndpointError> {
    for packet in bytes.chunks(PACKET_LEN) {
        sender.write_packet(packet).await?;
    }
    // A full final packet needs a ZLP to end the transfer.
    if bytes.len() % PACKET_LEN == 0 {
        sender.write_packet(&[]).await?;
    }
    Ok(())
}
