//! Trigger detection path
//!
//! An interrupt from the coprocessor masks the line and queues irq work on
//! the runtime captured at attach. The irq work arms a debounced readback,
//! which reads the IRQ status behind the read lock and, on a real trigger,
//! dispatches one [`DetectionEvent`](crate::device::DetectionEvent).
//!
//! A work item stops counting as pending once it starts running, so an
//! interrupt raised while a readback is still finishing queues a new one
//! instead of being lost.

use crate::controller::{Command, ControllerError, Mode, Readback};
use crate::device::{DeviceContext, SmartMic};
use crate::regs::IrqStatus;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// What a status readback concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// The interrupt was already masked; nothing was read
    Masked,
    /// The mode left the detection modes before the readback ran
    Stale,
    /// The DSP reported no trigger; the interrupt is re-enabled
    Spurious,
    /// A trigger was confirmed and dispatched; `mode` is the mode afterwards
    Detected { mode: Mode },
}

/// Cloneable interrupt source for one device.
///
/// Hand it to whatever owns the physical IRQ line (a GPIO poller, a signal
/// handler thread). [`InterruptLine::raise`] never blocks and may be called
/// from any thread.
#[derive(Clone)]
pub struct InterruptLine {
    ctx: Arc<DeviceContext>,
}

impl InterruptLine {
    /// Signal the interrupt; returns whether it was accepted (not masked)
    pub fn raise(&self) -> bool {
        self.ctx.on_interrupt()
    }
}

impl SmartMic {
    pub fn interrupt_line(&self) -> InterruptLine {
        InterruptLine {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Asynchronous interrupt entry point.
    ///
    /// Masks the interrupt and queues the deferred readback. A second signal
    /// while masked, or while irq work is still queued, is absorbed.
    pub fn signal_interrupt(&self) -> bool {
        self.ctx.on_interrupt()
    }

    /// Service one interrupt inline: mask, wait out the debounce, read status.
    ///
    /// Same semantics as the deferred path, for callers that poll the line
    /// themselves and want the outcome.
    pub async fn service_interrupt(&self) -> Result<DetectionOutcome, ControllerError> {
        if !self.ctx.try_mask_irq() {
            trace!("Interrupt while masked, ignoring");
            return Ok(DetectionOutcome::Masked);
        }
        self.ctx.interrupts.fetch_add(1, Ordering::Relaxed);

        tokio::time::sleep(self.ctx.config.debounce()).await;
        self.ctx.read_status().await
    }
}

impl DeviceContext {
    pub(crate) fn on_interrupt(self: &Arc<Self>) -> bool {
        if !self.try_mask_irq() {
            trace!("Interrupt while masked, ignoring");
            return false;
        }
        self.interrupts.fetch_add(1, Ordering::Relaxed);

        if self.irq_pending.swap(true, Ordering::AcqRel) {
            debug!("IRQ work already queued");
            return true;
        }

        let ctx = Arc::clone(self);
        let handle = self.runtime.spawn(async move { ctx.irq_work() });
        self.work.lock().irq = Some(handle);

        true
    }

    fn irq_work(self: Arc<Self>) {
        self.irq_pending.store(false, Ordering::Release);

        if self.debounce_pending.swap(true, Ordering::AcqRel) {
            debug!("Detection readback already scheduled");
            return;
        }

        let delay = self.config.debounce();
        let ctx = Arc::clone(&self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            ctx.debounce_pending.store(false, Ordering::Release);

            if let Err(e) = ctx.read_status().await {
                error!("Detection readback failed: {}", e);
            }
        });
        self.work.lock().debounce = Some(handle);
    }

    /// Read the trigger status and act on it.
    ///
    /// Takes the read lock, then the bus lock. The interrupt is left masked
    /// when the device is no longer in a detection mode or faulted.
    pub(crate) async fn read_status(&self) -> Result<DetectionOutcome, ControllerError> {
        let _reader = self.read_lock.lock().await;
        let mut core = self.core.lock().await;

        if !core.mode.expects_detection() || !self.detection_enabled() {
            debug!("Mode {} no longer expects detections, dropping readback", core.mode);
            return Ok(DetectionOutcome::Stale);
        }

        let transition = self.apply_locked(&mut core, Command::IrqQuery)?;

        if transition.readback != Some(Readback::IrqStatus(IrqStatus::Triggered)) {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            debug!("Spurious interrupt in mode {}", core.mode);
            self.set_irq_enabled(true);
            return Ok(DetectionOutcome::Spurious);
        }

        let follow_up = if core.mode == Mode::DspArmed {
            Command::StopOneShot
        } else {
            Command::IrqReset
        };
        self.apply_locked(&mut core, follow_up)?;

        if core.mode.expects_detection() {
            self.set_irq_enabled(true);
        }

        info!("Trigger detected, mode now {}", core.mode);
        self.emit_detection();

        Ok(DetectionOutcome::Detected { mode: core.mode })
    }
}
