//! Dual-CDC USB composite device.
//!
//! CDC0 carries the operator console and CDC1 the sample uplink. The rest of
//! the firmware takes each port's split handles without touching the Embassy
//! builder.

use embassy_usb::class::cdc_acm::{CdcAcmClass, ControlChanged, Receiver, Sender, State};
use embassy_usb::driver::Driver;
use embassy_usb::{Builder, Config, UsbDevice};

/// CDC interfaces exposed by the rig.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsbPortKind {
    /// Operator console (CDC0).
    Console,
    /// Newline-delimited JSON samples (CDC1).
    Uplink,
}

pub const MAX_PACKET_SIZE: u16 = 64;

const CONTROL_BUFFER_LEN: usize = 64;
const CONFIG_DESCRIPTOR_LEN: usize = 256;
const BOS_DESCRIPTOR_LEN: usize = 256;
const MSOS_DESCRIPTOR_LEN: usize = 256;

/// pid.codes test VID/PID.
const USB_VID: u16 = 0x1209;
const USB_PID: u16 = 0x0001;

#[derive(Clone, Copy, Debug)]
pub struct UsbDeviceStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: Option<&'static str>,
}

impl Default for UsbDeviceStrings {
    fn default() -> Self {
        Self {
            manufacturer: "Motor Test Rig",
            product: "Thrust Stand Controller",
            serial_number: None,
        }
    }
}

/// Descriptor buffers and CDC state; must outlive the device.
pub struct UsbDeviceStorage {
    control_buf: [u8; CONTROL_BUFFER_LEN],
    config_descriptor: [u8; CONFIG_DESCRIPTOR_LEN],
    bos_descriptor: [u8; BOS_DESCRIPTOR_LEN],
    msos_descriptor: [u8; MSOS_DESCRIPTOR_LEN],
    console_state: State<'static>,
    uplink_state: State<'static>,
}

impl UsbDeviceStorage {
    pub fn new() -> Self {
        Self {
            control_buf: [0; CONTROL_BUFFER_LEN],
            config_descriptor: [0; CONFIG_DESCRIPTOR_LEN],
            bos_descriptor: [0; BOS_DESCRIPTOR_LEN],
            msos_descriptor: [0; MSOS_DESCRIPTOR_LEN],
            console_state: State::new(),
            uplink_state: State::new(),
        }
    }
}

/// Split handles for one CDC ACM port.
pub struct CdcPort<D: Driver<'static>> {
    pub kind: UsbPortKind,
    pub sender: Sender<'static, D>,
    pub receiver: Receiver<'static, D>,
    pub control: ControlChanged<'static>,
}

impl<D: Driver<'static>> CdcPort<D> {
    fn split(kind: UsbPortKind, class: CdcAcmClass<'static, D>) -> Self {
        let (sender, receiver, control) = class.split_with_control();
        Self {
            kind,
            sender,
            receiver,
            control,
        }
    }
}

pub struct UsbComposite<D: Driver<'static>> {
    pub device: UsbDevice<'static, D>,
    console: Option<CdcPort<D>>,
    uplink: Option<CdcPort<D>>,
}

impl<D: Driver<'static>> UsbComposite<D> {
    pub fn new(driver: D, storage: &'static mut UsbDeviceStorage, strings: UsbDeviceStrings) -> Self {
        let mut config = Config::new(USB_VID, USB_PID);
        config.manufacturer = Some(strings.manufacturer);
        config.product = Some(strings.product);
        config.serial_number = strings.serial_number;
        #[allow(clippy::cast_possible_truncation)]
        {
            config.max_packet_size_0 = MAX_PACKET_SIZE as u8;
        }
        config.max_power = 100;
        // IAD composite so both CDC functions bind on every host.
        config.device_class = 0xEF;
        config.device_sub_class = 0x02;
        config.device_protocol = 0x01;
        config.composite_with_iads = true;

        let mut builder = Builder::new(
            driver,
            config,
            &mut storage.config_descriptor,
            &mut storage.bos_descriptor,
            &mut storage.msos_descriptor,
            &mut storage.control_buf,
        );

        let console = CdcAcmClass::new(&mut builder, &mut storage.console_state, MAX_PACKET_SIZE);
        let uplink = CdcAcmClass::new(&mut builder, &mut storage.uplink_state, MAX_PACKET_SIZE);

        Self {
            device: builder.build(),
            console: Some(CdcPort::split(UsbPortKind::Console, console)),
            uplink: Some(CdcPort::split(UsbPortKind::Uplink, uplink)),
        }
    }

    pub fn take_port(&mut self, kind: UsbPortKind) -> Option<CdcPort<D>> {
        match kind {
            UsbPortKind::Console => self.console.take(),
            UsbPortKind::Uplink => self.uplink.take(),
        }
    }
}

/// Waits until the host asserts DTR on the port.
pub async fn wait_for_dtr<D: Driver<'static>>(
    control: &ControlChanged<'static>,
    sender: &Sender<'static, D>,
) {
    while !sender.dtr() {
        control.control_changed().await;
    }
}
