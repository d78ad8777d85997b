//! # Control Loop
//!
//! Single owner of all pipeline state. One task interleaves four sources:
//!
//! 1. the shutdown future (SIGINT/SIGTERM in the binary)
//! 2. operator [`BridgeCommand`]s
//! 3. the fixed-rate tick, which runs the transform and writes both DACs
//! 4. wheel events, each waited for at most `poll_timeout_ms`
//!
//! Sources are polled in that order, so a flood of wheel events can never
//! delay a tick. Nothing runs concurrently with anything else.
//!
//! ## Centering
//!
//! Both DACs are set to mid-scale before the first tick. Every exit (stop
//! command, shutdown signal, input error) then re-centers the DACs, releases
//! the wheel grab and closes the bus, in that order. If the task unwinds
//! instead, [`DacPair`]'s `Drop` still centers.

use embedded_hal::i2c::I2c;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{invalid, Config};
use crate::controller::mapper::{BindingTarget, EventMapper, InputEvent, Mapped};
use crate::controller::source::InputSource;
use crate::error::Result;
use crate::output::dac::{Channel, DacPair, WritePath};
use crate::pipeline::{CodePair, Pipeline};
use crate::telemetry::status::BridgeStatus;

/// Capacity of the command queue
const COMMAND_QUEUE_LEN: usize = 16;

/// Operator requests, handled between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    /// Learn a new code for `target` from the next qualifying event.
    StartBinding(BindingTarget),
    CancelBinding,
    /// Restore the configured input codes.
    ResetBindings,
    /// Forget all axis bounds and empty the smoothing windows.
    ResetCalibration,
    /// Write mid-scale to both DACs once.
    Center,
    /// Swap in a new configuration. Rejected if it fails validation or
    /// changes the pedal mode or bus settings.
    ApplyConfig(Box<Config>),
    Stop,
}

/// The loop owner's side of a [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    pub commands: mpsc::Sender<BridgeCommand>,
    pub status: watch::Receiver<BridgeStatus>,
}

/// Wheel-to-DAC control loop.
pub struct Bridge<I: InputSource, B: I2c> {
    config: Config,
    input: I,
    dacs: DacPair<B>,
    mapper: EventMapper,
    pipeline: Pipeline,
    status: BridgeStatus,
    status_tx: watch::Sender<BridgeStatus>,
    commands: mpsc::Receiver<BridgeCommand>,
    commands_open: bool,
    write_failing: bool,
}

impl<I: InputSource, B: I2c> Bridge<I, B> {
    /// Creates the loop and the handle used to steer and observe it.
    ///
    /// `config` is expected to be validated already.
    pub fn new(config: Config, input: I, dacs: DacPair<B>) -> (Self, BridgeHandle) {
        let mut status = BridgeStatus::new(config.pedals.pedal_mode);
        for warning in config.warnings() {
            warn!("{}", warning);
            status.record_fault(warning);
        }
        let (status_tx, status_rx) = watch::channel(status.clone());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_LEN);

        let bridge = Self {
            mapper: EventMapper::new(&config.input),
            pipeline: Pipeline::new(&config),
            config,
            input,
            dacs,
            status,
            status_tx,
            commands: command_rx,
            commands_open: true,
            write_failing: false,
        };
        let handle = BridgeHandle {
            commands: command_tx,
            status: status_rx,
        };
        (bridge, handle)
    }

    /// Runs until `shutdown` resolves, a [`BridgeCommand::Stop`] arrives or
    /// the input device fails.
    ///
    /// # Errors
    ///
    /// - `BusWrite`: the DACs could not be centered at startup or shutdown
    /// - `Device`: the wheel stopped delivering events
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = match self.dacs.center() {
            Ok(()) => {
                info!(
                    "DACs centered, starting control loop at {}Hz ({:?} pedals)",
                    self.config.control.update_hz, self.config.pedals.pedal_mode
                );
                self.control_loop(shutdown).await
            }
            Err(e) => {
                error!("Failed to center DACs at startup: {}", e);
                Err(e)
            }
        };
        self.finish(result)
    }

    async fn control_loop<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tick_interval(self.config.control.update_hz);

        loop {
            let poll_timeout = Duration::from_millis(self.config.control.poll_timeout_ms);

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }

                command = self.commands.recv(), if self.commands_open => {
                    match command {
                        Some(BridgeCommand::Stop) => {
                            info!("Stop command received");
                            return Ok(());
                        }
                        Some(command) => {
                            let update_hz = self.config.control.update_hz;
                            self.handle_command(command);
                            if self.config.control.update_hz != update_hz {
                                ticker = tick_interval(self.config.control.update_hz);
                            }
                        }
                        None => {
                            debug!("All command senders dropped");
                            self.commands_open = false;
                        }
                    }
                }

                tick = ticker.tick() => {
                    self.on_tick(tick.into_std());
                }

                event = timeout(poll_timeout, self.input.next_event()) => {
                    match event {
                        Ok(Ok(event)) => self.handle_event(event),
                        Ok(Err(e)) => {
                            error!("Input device failed: {}", e);
                            self.status.record_fault(e.to_string());
                            return Err(e);
                        }
                        // Poll window elapsed without input
                        Err(_) => {}
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: InputEvent) {
        if let Some(binding) = self.mapper.try_bind(&event) {
            self.status.last_binding = Some(binding);
            self.status.binding = None;
            return;
        }

        match self.mapper.classify(&event) {
            Mapped::Axis(axis, value) => self.pipeline.observe(axis, value),
            Mapped::Pedal(pedal, pressed) => {
                if self.pipeline.set_button(pedal, pressed) {
                    info!("{:?} pedal {}", pedal, if pressed { "pressed" } else { "released" });
                }
            }
            Mapped::Ignored => trace!("Ignored event {:?}", event),
        }
    }

    fn handle_command(&mut self, command: BridgeCommand) {
        debug!("Command: {:?}", command);
        match command {
            BridgeCommand::StartBinding(target) => {
                self.mapper.start_binding(target);
                self.status.binding = Some(target);
            }
            BridgeCommand::CancelBinding => {
                self.mapper.cancel_binding();
                self.status.binding = None;
            }
            BridgeCommand::ResetBindings => {
                self.mapper.reset_bindings();
                self.status.binding = None;
            }
            BridgeCommand::ResetCalibration => {
                self.pipeline.reset_calibration();
                info!("Calibration and smoothing reset");
            }
            BridgeCommand::Center => {
                if let Err(e) = self.dacs.center() {
                    warn!("Center command failed: {}", e);
                    self.status.write_failures += 1;
                    self.status.record_fault(e.to_string());
                }
            }
            BridgeCommand::ApplyConfig(config) => {
                if let Err(e) = self.apply_config(*config) {
                    warn!("Rejected new configuration: {}", e);
                    self.status.record_fault(e.to_string());
                }
            }
            // Handled by the loop
            BridgeCommand::Stop => {}
        }
        self.publish();
    }

    fn apply_config(&mut self, config: Config) -> Result<()> {
        config.validate()?;

        if config.pedals.pedal_mode != self.config.pedals.pedal_mode {
            return Err(invalid(format!(
                "pedal_mode is fixed for the session ({:?})",
                self.config.pedals.pedal_mode
            )));
        }
        if config.bus != self.config.bus {
            return Err(invalid("bus settings cannot change while running"));
        }

        if config.input != self.config.input {
            self.mapper = EventMapper::new(&config.input);
            self.status.binding = None;
        }
        self.pipeline.resize_filters(&config.control);
        self.config = config;
        info!("Configuration applied");
        for warning in self.config.warnings() {
            warn!("{}", warning);
            self.status.record_fault(warning);
        }
        Ok(())
    }

    fn on_tick(&mut self, now: std::time::Instant) {
        self.status.tick_count += 1;

        if self.mapper.is_binding() {
            // Outputs hold their last value while a control is being learned
            self.status.binding = self.mapper.binding_target();
            self.publish();
            return;
        }

        let output = self.pipeline.tick(now, &self.config);
        trace!(
            "tick {}: processed {:?} codes {:?}",
            self.status.tick_count,
            output.processed,
            output.codes
        );
        self.write_codes(output.codes);

        self.status.record_tick(&output);
        self.status.record_inputs(self.pipeline.tracker(), self.pipeline.pedals());
        self.publish();
    }

    fn write_codes(&mut self, codes: CodePair) {
        let mut failed = false;

        for (channel, code) in [(Channel::Steering, codes.steering), (Channel::Throttle, codes.throttle)] {
            match self.dacs.write(channel, code) {
                Ok(WritePath::Primary) => {}
                Ok(WritePath::Fallback) => {
                    self.status.fallback_writes += 1;
                    if self.status.fallback_writes == 1 {
                        warn!("DAC 0x{:02x} only accepts raw writes", self.dacs.address(channel));
                    }
                }
                Err(e) => {
                    failed = true;
                    self.status.write_failures += 1;
                    if self.write_failing {
                        debug!("{}", e);
                    } else {
                        warn!("{}", e);
                    }
                    self.status.record_fault(e.to_string());
                }
            }
        }

        if self.write_failing && !failed {
            info!("DAC writes recovered");
        }
        self.write_failing = failed;
    }

    fn publish(&mut self) {
        self.status_tx.send_replace(self.status.clone());
    }

    /// Center, release, close. Runs on every exit path.
    fn finish(self, result: Result<()>) -> Result<()> {
        let Self {
            mut input,
            dacs,
            mut status,
            status_tx,
            ..
        } = self;

        let centered = dacs.close();
        match &centered {
            Ok(()) => {
                status.codes = CodePair::default();
                info!("DACs centered and bus closed");
            }
            Err(e) => error!("Failed to center DACs on shutdown: {}", e),
        }

        let released = input.release();
        status_tx.send_replace(status);

        result.and(centered).and(released)
    }
}

fn tick_interval(update_hz: u32) -> Interval {
    let period = Duration::from_micros(1_000_000 / u64::from(update_hz.max(1)));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mapper::BindingKind;
    use crate::controller::pedals::PedalMode;
    use crate::controller::source::mocks::ScriptedInput;
    use crate::error::BridgeError;
    use crate::output::dac::mocks::MockBus;
    use crate::output::dac::{DAC_CODE_CENTER, DAC_CODE_MAX};
    use evdev::{AbsoluteAxisType, Key};
    use tokio::time::sleep;

    const CENTER_FRAME: [u8; 3] = [0x40, 0x80, 0x00];

    /// Unshaped, unsmoothed, uninverted config so codes follow inputs directly.
    fn direct_config() -> Config {
        let mut config = Config::default();
        config.shaping.deadzone = 0.0;
        config.shaping.expo = 0.0;
        config.shaping.clamp = 1.0;
        config.shaping.invert_throttle = false;
        config.pedals.analog_pedal_feel = false;
        config.control.steering_filter_len = 1;
        config.control.throttle_filter_len = 1;
        config
    }

    fn key(key: Key, pressed: bool) -> InputEvent {
        InputEvent::Button { code: key.code(), pressed }
    }

    fn axis(axis: AbsoluteAxisType, value: i32) -> InputEvent {
        InputEvent::Axis { code: axis.0, value }
    }

    fn bridge(config: Config, input: ScriptedInput, bus: &MockBus) -> (Bridge<ScriptedInput, MockBus>, BridgeHandle) {
        let dacs = DacPair::new(bus.clone(), config.bus.steering_addr, config.bus.throttle_addr);
        Bridge::new(config, input, dacs)
    }

    fn after_ms(ms: u64) -> tokio::time::Sleep {
        sleep(Duration::from_millis(ms))
    }

    fn assert_centered_at_both_ends(writes: &[(u8, Vec<u8>)]) {
        assert!(writes.len() >= 4);
        assert_eq!(writes[0], (0x60, CENTER_FRAME.to_vec()));
        assert_eq!(writes[1], (0x61, CENTER_FRAME.to_vec()));
        assert_eq!(writes[writes.len() - 2], (0x60, CENTER_FRAME.to_vec()));
        assert_eq!(writes[writes.len() - 1], (0x61, CENTER_FRAME.to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticks_write_center() {
        let bus = MockBus::new();
        let input = ScriptedInput::new();
        let released = input.released.clone();
        let (bridge, handle) = bridge(direct_config(), input, &bus);

        bridge.run(after_ms(22)).await.unwrap();

        let writes = bus.get_writes();
        // Startup center, ticks at 0/5/10/15/20 ms, shutdown center
        assert_eq!(writes.len(), 2 + 5 * 2 + 2);
        assert!(writes.iter().all(|(_, frame)| frame == &CENTER_FRAME));
        assert_centered_at_both_ends(&writes);
        assert!(*released.lock().unwrap());
        assert_eq!(handle.status.borrow().tick_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_ramp_and_release() {
        let bus = MockBus::new();
        let input = ScriptedInput::new()
            .at(1, key(Key::BTN_TR, true))
            .at(1102, key(Key::BTN_TR, false));
        let (bridge, handle) = bridge(direct_config(), input, &bus);

        let mut status = handle.status.clone();
        let task = tokio::spawn(bridge.run(after_ms(1120)));

        sleep(Duration::from_millis(1100)).await;
        {
            let snapshot = status.borrow_and_update();
            assert!(snapshot.forward_pressed);
            assert_eq!(snapshot.processed.throttle, 1.0);
            assert_eq!(snapshot.codes.throttle, DAC_CODE_MAX);
        }

        task.await.unwrap().unwrap();
        let snapshot = status.borrow();
        assert!(!snapshot.forward_pressed);
        assert_eq!(snapshot.processed.throttle, 0.0);
        assert_eq!(snapshot.codes.throttle, DAC_CODE_CENTER);

        let writes = bus.get_writes();
        assert!(writes.contains(&(0x61, vec![0x40, 0xFF, 0xF0])));
        assert_centered_at_both_ends(&writes);
        // Last tick before shutdown already wrote center
        let last_tick_write = &writes[writes.len() - 3];
        assert_eq!(last_tick_write, &(0x61, CENTER_FRAME.to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_pedals_interlock() {
        let bus = MockBus::new();
        let input = ScriptedInput::new()
            .at(1, key(Key::BTN_TR, true))
            .at(500, key(Key::BTN_TL, true));
        let (bridge, handle) = bridge(direct_config(), input, &bus);

        bridge.run(after_ms(600)).await.unwrap();

        let snapshot = handle.status.borrow();
        assert!(snapshot.forward_pressed);
        assert!(snapshot.reverse_pressed);
        assert_eq!(snapshot.processed.throttle, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_binding_suspends_writes() {
        let bus = MockBus::new();
        let input = ScriptedInput::new().at(50, axis(AbsoluteAxisType::ABS_WHEEL, 20000));
        let (bridge, handle) = bridge(direct_config(), input, &bus);

        handle
            .commands
            .send(BridgeCommand::StartBinding(BindingTarget::Steering))
            .await
            .unwrap();
        bridge.run(after_ms(57)).await.unwrap();

        // Startup center, one tick at 55 ms after binding, shutdown center
        assert_eq!(bus.get_writes().len(), 6);

        let snapshot = handle.status.borrow();
        assert_eq!(snapshot.binding, None);
        let learned = snapshot.last_binding.unwrap();
        assert_eq!(learned.target, BindingTarget::Steering);
        assert_eq!(learned.kind, BindingKind::Axis);
        assert_eq!(learned.code, AbsoluteAxisType::ABS_WHEEL.0);
        assert_eq!(snapshot.tick_count, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_still_centers_and_releases() {
        let bus = MockBus::new();
        let input = ScriptedInput::new()
            .at(1, key(Key::BTN_TR, true))
            .disconnect_at(300);
        let released = input.released.clone();
        let (bridge, handle) = bridge(direct_config(), input, &bus);

        let result = bridge.run(std::future::pending()).await;
        assert!(matches!(result, Err(BridgeError::Device(_))));

        assert_centered_at_both_ends(&bus.get_writes());
        assert!(*released.lock().unwrap());
        assert!(handle.status.borrow().last_fault.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_center_failure_refuses_to_run() {
        let bus = MockBus::new();
        bus.set_reject_all(true);
        let input = ScriptedInput::new();
        let released = input.released.clone();
        let (bridge, handle) = bridge(direct_config(), input, &bus);

        let result = bridge.run(std::future::pending()).await;
        assert!(matches!(result, Err(BridgeError::BusWrite { addr: 0x60, .. })));
        assert!(*released.lock().unwrap());
        assert_eq!(handle.status.borrow().tick_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failures_do_not_stop_loop() {
        let bus = MockBus::new();
        let (bridge, handle) = bridge(direct_config(), ScriptedInput::new(), &bus);
        let task = tokio::spawn(bridge.run(std::future::pending()));

        sleep(Duration::from_millis(12)).await;
        bus.set_reject_all(true);
        sleep(Duration::from_millis(10)).await;
        bus.set_reject_all(false);
        sleep(Duration::from_millis(10)).await;

        handle.commands.send(BridgeCommand::Stop).await.unwrap();
        task.await.unwrap().unwrap();

        let snapshot = handle.status.borrow();
        assert!(snapshot.write_failures > 0);
        assert!(snapshot.last_fault.as_ref().unwrap().message.contains("DAC write"));
        assert_centered_at_both_ends(&bus.get_writes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_writes_counted() {
        let bus = MockBus::new();
        bus.set_reject_framed(true);
        let (bridge, handle) = bridge(direct_config(), ScriptedInput::new(), &bus);

        bridge.run(after_ms(7)).await.unwrap();

        let snapshot = handle.status.borrow();
        assert_eq!(snapshot.fallback_writes, 4);
        assert_eq!(snapshot.write_failures, 0);
        assert!(bus.get_writes().iter().all(|(_, frame)| frame == &[0x80, 0x00]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_config() {
        let bus = MockBus::new();
        let (bridge, handle) = bridge(direct_config(), ScriptedInput::new(), &bus);

        let mut other_mode = direct_config();
        other_mode.pedals.pedal_mode = PedalMode::SplitAxis;
        handle
            .commands
            .send(BridgeCommand::ApplyConfig(Box::new(other_mode)))
            .await
            .unwrap();

        let mut trimmed = direct_config();
        trimmed.shaping.throttle_trim = 0.5;
        handle
            .commands
            .send(BridgeCommand::ApplyConfig(Box::new(trimmed)))
            .await
            .unwrap();

        bridge.run(after_ms(3)).await.unwrap();

        let snapshot = handle.status.borrow();
        assert!(snapshot.last_fault.as_ref().unwrap().message.contains("pedal_mode"));
        assert_eq!(snapshot.pedal_mode, PedalMode::Buttons);
        assert_eq!(snapshot.processed.throttle, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_curve_reported_in_status() {
        let bus = MockBus::new();
        let mut config = direct_config();
        config.pedals.acceleration_curve = "bouncy".to_string();
        let (bridge, handle) = bridge(config, ScriptedInput::new(), &bus);

        let fault = handle.status.borrow().last_fault.clone().unwrap();
        assert!(fault.message.contains("bouncy"));
        assert!(fault.message.contains("linear"));

        bridge.run(after_ms(3)).await.unwrap();
        assert!(handle.status.borrow().last_fault.as_ref().unwrap().message.contains("bouncy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_config_unknown_curve_reported_in_status() {
        let bus = MockBus::new();
        let (bridge, handle) = bridge(direct_config(), ScriptedInput::new(), &bus);
        assert!(handle.status.borrow().last_fault.is_none());

        let mut config = direct_config();
        config.pedals.acceleration_curve = "bouncy".to_string();
        handle
            .commands
            .send(BridgeCommand::ApplyConfig(Box::new(config)))
            .await
            .unwrap();

        bridge.run(after_ms(3)).await.unwrap();

        let snapshot = handle.status.borrow();
        assert!(snapshot.last_fault.as_ref().unwrap().message.contains("bouncy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_calibration_command() {
        let bus = MockBus::new();
        let input = ScriptedInput::new()
            .at(1, axis(AbsoluteAxisType::ABS_X, -100))
            .at(2, axis(AbsoluteAxisType::ABS_X, 100));
        let (bridge, handle) = bridge(direct_config(), input, &bus);
        let mut status = handle.status.clone();
        let task = tokio::spawn(bridge.run(std::future::pending()));

        sleep(Duration::from_millis(8)).await;
        assert_eq!(status.borrow_and_update().processed.steering, 1.0);

        handle.commands.send(BridgeCommand::ResetCalibration).await.unwrap();
        sleep(Duration::from_millis(8)).await;
        assert_eq!(status.borrow_and_update().processed.steering, 0.0);

        handle.commands.send(BridgeCommand::Stop).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_keeps_running() {
        let bus = MockBus::new();
        let (bridge, handle) = bridge(direct_config(), ScriptedInput::new(), &bus);
        let status = handle.status.clone();
        drop(handle);

        bridge.run(after_ms(12)).await.unwrap();
        assert_eq!(status.borrow().tick_count, 3);
    }
}
