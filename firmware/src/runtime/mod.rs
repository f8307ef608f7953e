use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Input, Level, Output, OutputType, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::mode::Blocking;
use embassy_stm32::peripherals::TIM3;
use embassy_stm32::time::{Hertz, khz};
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm, SimplePwmChannel};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Timer};
use rig_core::ports::{PulseActuator, PulseRange};
use rig_core::sampling::RigConfig;
use rig_core::telemetry::LogRing;
use static_cell::StaticCell;

use crate::console::ConsoleQueue;
use crate::hw::esc::ESC_FRAME_HZ;
use crate::hw::{EscOutput, Hx711, Ina260};
use crate::rig::{ChannelUploader, RequestQueue, RigRuntime, SharedLogRing, UplinkQueue};
use crate::status::StatusBoard;
use crate::usb;

mod console_task;
mod rig_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

type BenchEsc = PulseActuator<EscOutput<SimplePwmChannel<'static, TIM3>>>;
type BenchLoadCell = Hx711<Input<'static>, Output<'static>, Delay>;
type BenchPower = Ina260<I2c<'static, Blocking>>;
pub(super) type BenchRuntime = RigRuntime<'static, BenchEsc, BenchLoadCell, BenchPower>;

/// Hold time for each pulse of the ESC arming sequence.
const ARMING_HOLD_MS: u64 = 1_000;

pub(super) static REQUEST_QUEUE: RequestQueue = Channel::new();
pub(super) static UPLINK_QUEUE: UplinkQueue = Channel::new();
pub(super) static CONSOLE_RX_QUEUE: ConsoleQueue = Channel::new();
pub(super) static CONSOLE_TX_QUEUE: ConsoleQueue = Channel::new();
pub(super) static LOG_RING: SharedLogRing = Mutex::new(RefCell::new(LogRing::new()));
pub(super) static STATUS: StatusBoard = StatusBoard::new();
pub(super) static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA6,
        PA11,
        PA12,
        PB4,
        PB5,
        PB8,
        PB9,
        I2C1,
        TIM3,
        USB,
        ..
    } = hal::init(config);

    let pwm = SimplePwm::new(
        TIM3,
        Some(PwmPin::new(PA6, OutputType::PushPull)),
        None,
        None,
        None,
        Hertz(ESC_FRAME_HZ),
        CountingMode::EdgeAlignedUp,
    );
    let mut esc_channel = pwm.split().ch1;
    esc_channel.enable();
    let mut actuator = PulseActuator::new(EscOutput::new(esc_channel), PulseRange::default());

    let mut load_cell = Hx711::new(
        Input::new(PB4, Pull::None),
        Output::new(PB5, Level::Low, Speed::Low),
        Delay,
    );
    load_cell.reset();

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = khz(400);
    let power = Ina260::new(I2c::new_blocking(I2C1, PB8, PB9, i2c_config));

    for step in 0..actuator.range().arming_sequence().len() {
        actuator.arm_step(step);
        Timer::after_millis(ARMING_HOLD_MS).await;
    }
    defmt::info!("rig: ESC armed");

    let runtime: BenchRuntime = RigRuntime::new(
        actuator,
        load_cell,
        power,
        ChannelUploader::new(UPLINK_QUEUE.sender()),
        &LOG_RING,
        &STATUS,
        RigConfig::default(),
    );

    spawner
        .spawn(rig_task::run(runtime, REQUEST_QUEUE.receiver()))
        .expect("failed to spawn rig task");

    spawner
        .spawn(console_task::run())
        .expect("failed to spawn console task");

    spawner
        .spawn(usb_task::run(USB, PA12, PA11))
        .expect("failed to spawn USB task");

    core::future::pending::<()>().await;
}
