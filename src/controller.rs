//! DSP mode controller
//!
//! Finite-state machine over the coprocessor's operating mode. Each command
//! is validated against the current mode, then its register sequence is
//! written. The mode only advances once every write succeeded; bus failures
//! and out-of-domain status values land in [`Mode::Fault`], which only
//! [`Command::BoostReset`] leaves.
//!
//! The controller remembers the training index of the last loaded container
//! so grammar can be swapped without reloading the firmware.

use crate::config::DeviceConfig;
use crate::image::{ImageError, TrainingDataInfo};
use crate::loader::{self, FirmwareBundle, LoadError, LoadPlan, LoadReport};
use crate::regs::{self, FwStatus, IrqStatus, RegWrite};
use crate::transport::{write_sequence, BusError, BusTransport};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Coprocessor operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    /// DSP not loaded
    #[default]
    Normal,
    /// Firmware loaded, detection off
    DspLoaded,
    /// One-shot detection armed
    DspArmed,
    /// Continuous detection
    DspListening,
    FactoryTest,
    /// Protocol failure; only a boost reset recovers
    Fault,
}

impl Mode {
    /// Whether a status readback after an interrupt means anything in this mode
    pub fn expects_detection(self) -> bool {
        matches!(self, Self::DspArmed | Self::DspListening)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::DspLoaded => "dsp-loaded",
            Self::DspArmed => "dsp-armed",
            Self::DspListening => "dsp-listening",
            Self::FactoryTest => "factory-test",
            Self::Fault => "fault",
        };
        f.write_str(name)
    }
}

/// Mode controller command
#[derive(Debug, Clone, Copy)]
pub enum Command<'a> {
    LoadFirmware(&'a FirmwareBundle),
    Reload(&'a FirmwareBundle),
    /// Write one training blob (grammar) into the loaded firmware
    LoadGrammar(&'a [u8]),
    StartOneShot,
    StopOneShot,
    StartListening,
    StopListening,
    IrqReset,
    IrqQuery,
    QueryFwState,
    EnterFactory,
    QuitFactory,
    BoostReset,
}

/// Payload-free command tag, for logs and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    LoadFirmware,
    Reload,
    LoadGrammar,
    StartOneShot,
    StopOneShot,
    StartListening,
    StopListening,
    IrqReset,
    IrqQuery,
    QueryFwState,
    EnterFactory,
    QuitFactory,
    BoostReset,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Command<'_> {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::LoadFirmware(_) => CommandKind::LoadFirmware,
            Self::Reload(_) => CommandKind::Reload,
            Self::LoadGrammar(_) => CommandKind::LoadGrammar,
            Self::StartOneShot => CommandKind::StartOneShot,
            Self::StopOneShot => CommandKind::StopOneShot,
            Self::StartListening => CommandKind::StartListening,
            Self::StopListening => CommandKind::StopListening,
            Self::IrqReset => CommandKind::IrqReset,
            Self::IrqQuery => CommandKind::IrqQuery,
            Self::QueryFwState => CommandKind::QueryFwState,
            Self::EnterFactory => CommandKind::EnterFactory,
            Self::QuitFactory => CommandKind::QuitFactory,
            Self::BoostReset => CommandKind::BoostReset,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("{command} is not valid in mode {mode}")]
    InvalidTransition { mode: Mode, command: CommandKind },

    #[error("Firmware load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Register {register:#04x} returned {value:#04x}, outside its status domain")]
    ProtocolFault { register: u32, value: u8 },

    #[error("Firmware reported {0} after load")]
    FirmwareRejected(FwStatus),
}

impl ControllerError {
    /// Whether this error moved the device to [`Mode::Fault`]
    pub fn is_fault(&self) -> bool {
        match self {
            Self::InvalidTransition { .. } => false,
            Self::Load(e) => e.touched_device(),
            Self::Bus(_) | Self::ProtocolFault { .. } | Self::FirmwareRejected(_) => true,
        }
    }
}

impl From<ImageError> for ControllerError {
    fn from(e: ImageError) -> Self {
        Self::Load(LoadError::Image(e))
    }
}

/// Value read back by a query command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Readback {
    IrqStatus(IrqStatus),
    FwStatus(FwStatus),
}

/// Result of a successful command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
    pub readback: Option<Readback>,
    pub load: Option<LoadReport>,
}

/// Validated work for one command, built before the bus is touched
enum Step<'a> {
    Load(LoadPlan<'a>),
    Grammar(LoadPlan<'a>),
    Sequence(&'static [RegWrite]),
    QueryIrq,
    QueryFw,
}

/// Mode state machine.
///
/// The caller owns the mode and the transport and must serialize calls (the
/// device does so with its bus lock).
#[derive(Debug, Clone, Default)]
pub struct ModeController {
    config: DeviceConfig,
    training_index: Option<Vec<TrainingDataInfo>>,
}

impl ModeController {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            training_index: None,
        }
    }

    /// Training index of the firmware currently loaded
    pub fn training_index(&self) -> Option<&[TrainingDataInfo]> {
        self.training_index.as_deref()
    }

    /// Target mode of `command` from `mode`, or `None` if the transition is not allowed
    pub fn target(mode: Mode, command: CommandKind) -> Option<Mode> {
        use CommandKind as C;
        use Mode as M;

        match (mode, command) {
            (_, C::BoostReset) => Some(M::Normal),
            (M::Fault, _) => None,
            (_, C::IrqReset | C::IrqQuery | C::QueryFwState) => Some(mode),
            (M::Normal, C::LoadFirmware) => Some(M::DspLoaded),
            (M::DspLoaded | M::DspArmed, C::Reload) => Some(M::DspLoaded),
            (M::DspLoaded, C::LoadGrammar) => Some(M::DspLoaded),
            (M::DspLoaded, C::StartOneShot) => Some(M::DspArmed),
            (M::DspArmed, C::StopOneShot) => Some(M::DspLoaded),
            (M::DspLoaded, C::StartListening) => Some(M::DspListening),
            (M::DspListening, C::StopListening) => Some(M::DspLoaded),
            (M::DspLoaded, C::EnterFactory) => Some(M::FactoryTest),
            (M::FactoryTest, C::QuitFactory) => Some(M::DspLoaded),
            _ => None,
        }
    }

    /// Apply `command` to the device, updating `mode` only if every bus access succeeded.
    ///
    /// Invalid transitions and malformed firmware are rejected without bus
    /// traffic and leave `mode` untouched. Any failure after the first bus
    /// access leaves `mode` at [`Mode::Fault`].
    pub fn apply<T: BusTransport + ?Sized>(
        &mut self,
        mode: &mut Mode,
        command: Command<'_>,
        transport: &mut T,
    ) -> Result<Transition, ControllerError> {
        let from = *mode;
        let kind = command.kind();

        let to = Self::target(from, kind).ok_or(ControllerError::InvalidTransition {
            mode: from,
            command: kind,
        })?;

        let step = match command {
            Command::LoadFirmware(bundle) | Command::Reload(bundle) => {
                Step::Load(LoadPlan::for_bundle(bundle)?)
            }
            Command::LoadGrammar(blob) => {
                Step::Grammar(LoadPlan::for_training(self.training_index(), blob)?)
            }
            Command::StartOneShot => Step::Sequence(regs::START_ONESHOT),
            Command::StopOneShot => Step::Sequence(regs::STOP_ONESHOT),
            Command::StartListening => Step::Sequence(regs::START_LISTENING),
            Command::StopListening => Step::Sequence(regs::STOP_LISTENING),
            Command::EnterFactory => Step::Sequence(regs::FACTORY_ENTER),
            Command::QuitFactory => Step::Sequence(regs::FACTORY_QUIT),
            Command::IrqReset => Step::Sequence(regs::IRQ_RESET),
            Command::BoostReset => Step::Sequence(regs::BOOST_RESET),
            Command::IrqQuery => Step::QueryIrq,
            Command::QueryFwState => Step::QueryFw,
        };

        debug!("{}: {} -> {}", kind, from, to);

        let mut transition = Transition {
            from,
            to,
            readback: None,
            load: None,
        };

        let outcome = match step {
            Step::Load(plan) => self.run_load(&plan, transport).map(|report| {
                self.training_index = plan.training_index().map(<[_]>::to_vec);
                transition.load = Some(report);
            }),
            Step::Grammar(plan) => loader::execute(&plan, transport)
                .map(|report| {
                    transition.load = Some(report);
                })
                .map_err(Into::into),
            Step::Sequence(sequence) => write_sequence(transport, sequence).map_err(Into::into),
            Step::QueryIrq => self.query_irq(transport).map(|status| {
                transition.readback = Some(Readback::IrqStatus(status));
            }),
            Step::QueryFw => self.query_fw(transport).map(|status| {
                transition.readback = Some(Readback::FwStatus(status));
            }),
        };

        match outcome {
            Ok(()) => {
                if kind == CommandKind::BoostReset {
                    self.training_index = None;
                }
                if from != to {
                    info!("Mode {} -> {} ({})", from, to, kind);
                }
                *mode = to;
                Ok(transition)
            }
            Err(e) => {
                error!("{} failed in mode {}: {}", kind, from, e);
                *mode = Mode::Fault;
                Err(e)
            }
        }
    }

    fn run_load<T: BusTransport + ?Sized>(
        &self,
        plan: &LoadPlan<'_>,
        transport: &mut T,
    ) -> Result<LoadReport, ControllerError> {
        let report = loader::execute(plan, transport)?;

        if self.config.verify_fw_status {
            match self.query_fw(transport)? {
                FwStatus::InitSuccess => {}
                status => {
                    warn!("Firmware did not come up: {}", status);
                    return Err(ControllerError::FirmwareRejected(status));
                }
            }
        }

        Ok(report)
    }

    fn query_irq<T: BusTransport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> Result<IrqStatus, ControllerError> {
        let raw = transport.read(regs::IRQ_STATUS)?;
        IrqStatus::from_raw(raw).ok_or(ControllerError::ProtocolFault {
            register: regs::IRQ_STATUS,
            value: raw,
        })
    }

    fn query_fw<T: BusTransport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> Result<FwStatus, ControllerError> {
        let raw = transport.read(regs::FW_STATUS)?;
        FwStatus::from_raw(raw).ok_or(ControllerError::ProtocolFault {
            register: regs::FW_STATUS,
            value: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::tests::{build_container, build_training_blob};
    use crate::transport::{MockBusTransport, SimulatedTransport};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn bundle() -> FirmwareBundle {
        FirmwareBundle::new(build_container(&[(24, 4, 0x1000)], None, &[1, 2, 3, 4]))
    }

    fn loaded(sim: &mut SimulatedTransport) -> (ModeController, Mode) {
        let mut controller = ModeController::default();
        let mut mode = Mode::Normal;
        let bundle = bundle();
        controller
            .apply(&mut mode, Command::LoadFirmware(&bundle), sim)
            .unwrap();
        (controller, mode)
    }

    #[test]
    fn test_transition_table() {
        use CommandKind as C;

        assert_eq!(ModeController::target(Mode::Normal, C::LoadFirmware), Some(Mode::DspLoaded));
        assert_eq!(ModeController::target(Mode::DspArmed, C::Reload), Some(Mode::DspLoaded));
        assert_eq!(ModeController::target(Mode::DspListening, C::IrqQuery), Some(Mode::DspListening));
        assert_eq!(ModeController::target(Mode::Fault, C::BoostReset), Some(Mode::Normal));
        assert_eq!(ModeController::target(Mode::Fault, C::IrqReset), None);
        assert_eq!(ModeController::target(Mode::Normal, C::StartOneShot), None);
        assert_eq!(ModeController::target(Mode::DspListening, C::Reload), None);
        assert_eq!(ModeController::target(Mode::FactoryTest, C::StartOneShot), None);
    }

    #[test]
    fn test_load_then_arm() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded(&mut sim);
        assert_eq!(mode, Mode::DspLoaded);

        let t = controller
            .apply(&mut mode, Command::StartOneShot, &mut sim)
            .unwrap();
        assert_eq!((t.from, t.to), (Mode::DspLoaded, Mode::DspArmed));
        assert_eq!(mode, Mode::DspArmed);
        assert_eq!(sim.register(regs::DSP_CTRL1), 0x01);
    }

    #[test]
    fn test_start_oneshot_writes_in_order() {
        let mut controller = ModeController::default();
        let mut mode = Mode::DspLoaded;

        let mut mock = MockBusTransport::new();
        let mut seq = Sequence::new();
        for step in regs::START_ONESHOT {
            let expected = *step;
            mock.expect_write()
                .withf(move |address, bytes| *address == expected.register && bytes == [expected.value].as_slice())
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        controller
            .apply(&mut mode, Command::StartOneShot, &mut mock)
            .unwrap();
        assert_eq!(mode, Mode::DspArmed);
    }

    #[test]
    fn test_invalid_transition_keeps_mode() {
        let mut controller = ModeController::default();
        let mut mode = Mode::Normal;

        let mut mock = MockBusTransport::new();
        mock.expect_write().never();
        mock.expect_read().never();

        let err = controller
            .apply(&mut mode, Command::StartOneShot, &mut mock)
            .unwrap_err();
        assert_eq!(
            err,
            ControllerError::InvalidTransition {
                mode: Mode::Normal,
                command: CommandKind::StartOneShot
            }
        );
        assert!(!err.is_fault());
        assert_eq!(mode, Mode::Normal);
    }

    #[test]
    fn test_malformed_firmware_keeps_mode() {
        let mut controller = ModeController::default();
        let mut mode = Mode::Normal;
        let bad = FirmwareBundle::new(vec![0; 8]);

        let mut mock = MockBusTransport::new();
        mock.expect_write().never();

        let err = controller
            .apply(&mut mode, Command::LoadFirmware(&bad), &mut mock)
            .unwrap_err();
        assert!(matches!(err, ControllerError::Load(LoadError::Image(_))));
        assert_eq!(mode, Mode::Normal);
    }

    #[test]
    fn test_write_failure_mid_sequence_faults() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded(&mut sim);

        // the load wrote once, so START_ONESHOT's second write is #3
        sim.fail_nth_write(3);

        let err = controller
            .apply(&mut mode, Command::StartOneShot, &mut sim)
            .unwrap_err();
        assert!(err.is_fault());
        assert_eq!(mode, Mode::Fault);
    }

    #[test]
    fn test_fault_requires_boost_reset() {
        let mut controller = ModeController::default();
        let mut mode = Mode::Fault;
        let mut sim = SimulatedTransport::new();

        assert!(controller
            .apply(&mut mode, Command::IrqQuery, &mut sim)
            .is_err());
        assert_eq!(mode, Mode::Fault);

        controller
            .apply(&mut mode, Command::BoostReset, &mut sim)
            .unwrap();
        assert_eq!(mode, Mode::Normal);
    }

    #[test]
    fn test_firmware_rejected_by_dsp() {
        let mut controller = ModeController::default();
        let mut mode = Mode::Normal;
        let mut sim = SimulatedTransport::new();
        sim.set_boot_status(0x02);

        let bundle = bundle();
        let err = controller
            .apply(&mut mode, Command::LoadFirmware(&bundle), &mut sim)
            .unwrap_err();
        assert_eq!(err, ControllerError::FirmwareRejected(FwStatus::TdOversize));
        assert_eq!(mode, Mode::Fault);
    }

    #[test]
    fn test_irq_query_out_of_domain_faults() {
        let mut controller = ModeController::default();
        let mut mode = Mode::DspListening;

        let mut mock = MockBusTransport::new();
        mock.expect_read()
            .with(eq(regs::IRQ_STATUS))
            .times(1)
            .returning(|_| Ok(0x7f));

        let err = controller
            .apply(&mut mode, Command::IrqQuery, &mut mock)
            .unwrap_err();
        assert_eq!(
            err,
            ControllerError::ProtocolFault {
                register: regs::IRQ_STATUS,
                value: 0x7f
            }
        );
        assert_eq!(mode, Mode::Fault);
    }

    #[test]
    fn test_queries_keep_mode() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded(&mut sim);
        sim.raise_trigger();

        let t = controller
            .apply(&mut mode, Command::IrqQuery, &mut sim)
            .unwrap();
        assert_eq!(t.readback, Some(Readback::IrqStatus(IrqStatus::Triggered)));

        let t = controller
            .apply(&mut mode, Command::QueryFwState, &mut sim)
            .unwrap();
        assert_eq!(t.readback, Some(Readback::FwStatus(FwStatus::InitSuccess)));

        controller
            .apply(&mut mode, Command::IrqReset, &mut sim)
            .unwrap();
        assert_eq!(sim.register(regs::IRQ_STATUS), regs::IRQ_CLEAR);
        assert_eq!(mode, Mode::DspLoaded);
    }

    #[test]
    fn test_factory_round_trip() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded(&mut sim);

        controller
            .apply(&mut mode, Command::EnterFactory, &mut sim)
            .unwrap();
        assert_eq!(mode, Mode::FactoryTest);
        assert_eq!(sim.register(regs::TEST_MODE_CTRL1), 0x01);

        controller
            .apply(&mut mode, Command::QuitFactory, &mut sim)
            .unwrap();
        assert_eq!(mode, Mode::DspLoaded);
    }

    fn loaded_with_index(sim: &mut SimulatedTransport) -> (ModeController, Mode) {
        let mut controller = ModeController::default();
        let mut mode = Mode::Normal;
        // header 12 + segment 12 + count 4 + one entry 8 = 36
        let bundle = FirmwareBundle::new(build_container(
            &[(36, 2, 0x1000)],
            Some(&[(3, 0x0fff_0000)]),
            &[1, 2],
        ));
        controller
            .apply(&mut mode, Command::LoadFirmware(&bundle), sim)
            .unwrap();
        (controller, mode)
    }

    #[test]
    fn test_load_grammar_into_loaded_dsp() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded_with_index(&mut sim);
        assert_eq!(controller.training_index().map(<[_]>::len), Some(1));

        let grammar = build_training_blob(3, 12, 20, 20);
        let t = controller
            .apply(&mut mode, Command::LoadGrammar(&grammar), &mut sim)
            .unwrap();

        assert_eq!(t.load, Some(LoadReport { writes: 1, bytes: 8 }));
        assert_eq!(mode, Mode::DspLoaded);
        assert_eq!(sim.memory_at(0x0fff_0000), Some(grammar[12..20].to_vec()));
    }

    #[test]
    fn test_load_grammar_unknown_id_touches_nothing() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded_with_index(&mut sim);
        let before = sim.records().len();

        let grammar = build_training_blob(4, 12, 20, 20);
        let err = controller
            .apply(&mut mode, Command::LoadGrammar(&grammar), &mut sim)
            .unwrap_err();

        assert!(!err.is_fault());
        assert_eq!(mode, Mode::DspLoaded);
        assert_eq!(sim.records().len(), before);
    }

    #[test]
    fn test_load_grammar_bus_failure_faults() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded_with_index(&mut sim);
        // the firmware load wrote once
        sim.fail_nth_write(2);

        let grammar = build_training_blob(3, 12, 20, 20);
        let err = controller
            .apply(&mut mode, Command::LoadGrammar(&grammar), &mut sim)
            .unwrap_err();

        assert!(err.is_fault());
        assert_eq!(mode, Mode::Fault);
    }

    #[test]
    fn test_load_grammar_only_from_loaded() {
        use CommandKind as C;

        assert_eq!(ModeController::target(Mode::Normal, C::LoadGrammar), None);
        assert_eq!(ModeController::target(Mode::DspArmed, C::LoadGrammar), None);
        assert_eq!(ModeController::target(Mode::DspListening, C::LoadGrammar), None);
    }

    #[test]
    fn test_boost_reset_forgets_training_index() {
        let mut sim = SimulatedTransport::new();
        let (mut controller, mut mode) = loaded_with_index(&mut sim);

        controller
            .apply(&mut mode, Command::BoostReset, &mut sim)
            .unwrap();

        assert!(controller.training_index().is_none());
    }
}
