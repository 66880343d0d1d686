//! Per-device context and the public device handle
//!
//! Lock domains:
//! - bus lock (`core`): transport, mode and controller; every bus access goes
//!   through it, so commands apply in the order callers issue them
//! - read lock: re-entrancy guard around status readback, taken before the bus lock
//! - IRQ lock: the interrupt-enabled flag, never held across an `.await`

use crate::config::{ConfigError, DeviceConfig};
use crate::controller::{Command, CommandKind, ControllerError, Mode, ModeController, Transition};
use crate::regdump::{self, DumpError, RegisterValue};
use crate::transport::BusTransport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Invalid device config: {0}")]
    Config(#[from] ConfigError),

    #[error("Device must be attached from within a Tokio runtime")]
    NoRuntime,
}

/// A trigger fired on the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionEvent {
    /// Microseconds since epoch, taken when the event was dispatched
    pub timestamp: i64,
}

impl DetectionEvent {
    fn now() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Self { timestamp }
    }
}

/// Device statistics
#[derive(Debug, Clone)]
pub struct DeviceStats {
    pub mode: Mode,
    pub irq_enabled: bool,
    pub detection_enabled: bool,
    pub interrupts: u64,
    pub detections: u64,
    pub spurious: u64,
    pub irq_work_pending: bool,
    pub debounce_pending: bool,
}

/// State behind the bus lock
pub(crate) struct DeviceCore {
    pub(crate) transport: Box<dyn BusTransport + Send>,
    pub(crate) mode: Mode,
    pub(crate) controller: ModeController,
}

#[derive(Default)]
pub(crate) struct WorkHandles {
    pub(crate) irq: Option<JoinHandle<()>>,
    pub(crate) debounce: Option<JoinHandle<()>>,
}

pub(crate) struct DeviceContext {
    pub(crate) core: Mutex<DeviceCore>,
    pub(crate) read_lock: Mutex<()>,
    irq_enabled: parking_lot::Mutex<bool>,
    detection_enabled: AtomicBool,

    pub(crate) irq_pending: AtomicBool,
    pub(crate) debounce_pending: AtomicBool,
    pub(crate) work: parking_lot::Mutex<WorkHandles>,

    pub(crate) config: DeviceConfig,
    pub(crate) runtime: Handle,
    events: mpsc::UnboundedSender<DetectionEvent>,

    pub(crate) interrupts: AtomicU64,
    detections: AtomicU64,
    pub(crate) spurious: AtomicU64,
}

impl DeviceContext {
    pub(crate) fn irq_enabled(&self) -> bool {
        *self.irq_enabled.lock()
    }

    pub(crate) fn set_irq_enabled(&self, enabled: bool) {
        let mut irq = self.irq_enabled.lock();
        if *irq != enabled {
            debug!("IRQ {}", if enabled { "enabled" } else { "disabled" });
        }
        *irq = enabled;
    }

    /// Disable the interrupt if it is enabled; returns whether it was
    pub(crate) fn try_mask_irq(&self) -> bool {
        let mut irq = self.irq_enabled.lock();
        std::mem::replace(&mut *irq, false)
    }

    pub(crate) fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Acquire)
    }

    /// Align detection and interrupt enablement with `mode`
    fn sync_detection(&self, mode: Mode) {
        let on = mode.expects_detection();
        self.detection_enabled.store(on, Ordering::Release);
        self.set_irq_enabled(on);
    }

    /// Run one controller command with the bus lock held
    pub(crate) fn apply_locked(
        &self,
        core: &mut DeviceCore,
        command: Command<'_>,
    ) -> Result<Transition, ControllerError> {
        let DeviceCore {
            transport,
            mode,
            controller,
        } = core;
        let before = *mode;

        let result = controller.apply(mode, command, transport.as_mut());

        if *mode != before {
            self.sync_detection(*mode);
        }

        result
    }

    pub(crate) fn emit_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
        if self.events.send(DetectionEvent::now()).is_err() {
            warn!("Detection event receiver dropped");
        }
    }

    fn cancel_work(&self) {
        let mut work = self.work.lock();
        for handle in [work.irq.take(), work.debounce.take()].into_iter().flatten() {
            handle.abort();
        }
        self.irq_pending.store(false, Ordering::Release);
        self.debounce_pending.store(false, Ordering::Release);
    }
}

/// Handle to one attached IM401
pub struct SmartMic {
    pub(crate) ctx: Arc<DeviceContext>,
    event_rx: Mutex<mpsc::UnboundedReceiver<DetectionEvent>>,
}

impl SmartMic {
    /// Attach to a device reachable through `transport`.
    ///
    /// Must be called within a Tokio runtime; deferred interrupt work is
    /// scheduled on that runtime even when interrupts are raised from other threads.
    pub fn attach<T>(transport: T, config: DeviceConfig) -> Result<Self, DeviceError>
    where
        T: BusTransport + Send + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| DeviceError::NoRuntime)?;

        info!("Attaching IM401");
        info!("Debounce: {} ms", config.debounce_ms);
        info!("Verify FW status: {}", config.verify_fw_status);

        let (events, event_rx) = mpsc::unbounded_channel();

        let ctx = DeviceContext {
            core: Mutex::new(DeviceCore {
                transport: Box::new(transport),
                mode: Mode::Normal,
                controller: ModeController::new(config.clone()),
            }),
            read_lock: Mutex::new(()),
            irq_enabled: parking_lot::Mutex::new(false),
            detection_enabled: AtomicBool::new(false),
            irq_pending: AtomicBool::new(false),
            debounce_pending: AtomicBool::new(false),
            work: parking_lot::Mutex::new(WorkHandles::default()),
            config,
            runtime,
            events,
            interrupts: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
        };

        Ok(Self {
            ctx: Arc::new(ctx),
            event_rx: Mutex::new(event_rx),
        })
    }

    /// Apply a mode controller command.
    ///
    /// Commands are applied strictly in call order. Once the register
    /// sequence has started the command runs to completion.
    pub async fn apply(&self, command: Command<'_>) -> Result<Transition, ControllerError> {
        let kind = command.kind();

        let _reader = match kind {
            CommandKind::IrqQuery | CommandKind::QueryFwState => {
                Some(self.ctx.read_lock.lock().await)
            }
            _ => None,
        };

        let mut core = self.ctx.core.lock().await;
        let result = self.ctx.apply_locked(&mut core, command);

        match &result {
            Ok(t) => debug!("{} done ({} -> {})", kind, t.from, t.to),
            Err(e) if e.is_fault() => warn!("{} drove the device to fault: {}", kind, e),
            Err(e) => debug!("{} rejected: {}", kind, e),
        }

        result
    }

    /// Current mode
    pub async fn mode(&self) -> Mode {
        self.ctx.core.lock().await.mode
    }

    pub fn irq_enabled(&self) -> bool {
        self.ctx.irq_enabled()
    }

    /// Read the diagnostic register list
    pub async fn dump_registers(&self) -> Result<Vec<RegisterValue>, DumpError> {
        let mut core = self.ctx.core.lock().await;
        regdump::dump_registers(core.transport.as_mut())
    }

    /// Get the next detection event (non-blocking)
    pub async fn try_recv_event(&self) -> Option<DetectionEvent> {
        let mut rx = self.event_rx.lock().await;
        rx.try_recv().ok()
    }

    /// Get the next detection event (blocking)
    pub async fn recv_event(&self) -> Option<DetectionEvent> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// Get current statistics
    pub async fn stats(&self) -> DeviceStats {
        let mode = self.mode().await;
        let ctx = &self.ctx;

        DeviceStats {
            mode,
            irq_enabled: ctx.irq_enabled(),
            detection_enabled: ctx.detection_enabled(),
            interrupts: ctx.interrupts.load(Ordering::Relaxed),
            detections: ctx.detections.load(Ordering::Relaxed),
            spurious: ctx.spurious.load(Ordering::Relaxed),
            irq_work_pending: ctx.irq_pending.load(Ordering::Acquire),
            debounce_pending: ctx.debounce_pending.load(Ordering::Acquire),
        }
    }

    /// Detach: mask the interrupt, then cancel deferred work
    pub async fn detach(self) {
        self.ctx.sync_detection(Mode::Normal);
        self.ctx.cancel_work();

        let core = self.ctx.core.lock().await;
        // a readback that already held the bus lock may have re-enabled it
        self.ctx.sync_detection(Mode::Normal);
        info!("Detached IM401 in mode {}", core.mode);
    }
}
