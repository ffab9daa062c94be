// Phase reporting and the status overlay shown while a module is prepared.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PHASE_CHANNEL_CAPACITY: usize = 64;

/// Structured progress of one acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionPhase {
    Preparing {
        module: String,
        display_name: String,
        part: u32,
        total_parts: u32,
    },
    Ready {
        module: String,
    },
    Failed {
        module: String,
        message: String,
    },
}

impl AcquisitionPhase {
    /// Human-readable text for the overlay.
    pub fn text(&self) -> String {
        match self {
            Self::Preparing {
                display_name,
                part,
                total_parts,
                ..
            } => {
                if *total_parts > 1 {
                    format!("Preparing {display_name}... (Part {part}/{total_parts})")
                } else {
                    format!("Preparing {display_name}...")
                }
            }
            Self::Ready { .. } => String::new(),
            Self::Failed { message, .. } => message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OverlayState {
    #[default]
    Hidden,
    Visible {
        text: String,
        failed: bool,
    },
}

/// Blocking overlay state plus a stream of phase events.
///
/// A failure stays visible for `dismiss_after` and then hides itself.
/// Any newer status cancels a pending dismissal.
pub struct StatusOverlay {
    state_tx: watch::Sender<OverlayState>,
    phase_tx: broadcast::Sender<AcquisitionPhase>,
    pending_dismiss: Mutex<Option<CancellationToken>>,
    dismiss_after: Duration,
}

impl StatusOverlay {
    pub fn new(dismiss_after: Duration) -> Self {
        let (state_tx, _) = watch::channel(OverlayState::Hidden);
        let (phase_tx, _) = broadcast::channel(PHASE_CHANNEL_CAPACITY);
        Self {
            state_tx,
            phase_tx,
            pending_dismiss: Mutex::new(None),
            dismiss_after,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_phases(&self) -> broadcast::Receiver<AcquisitionPhase> {
        self.phase_tx.subscribe()
    }

    pub fn state(&self) -> OverlayState {
        self.state_tx.borrow().clone()
    }

    /// Publish a phase and update the overlay to match.
    pub fn report(&self, phase: AcquisitionPhase) {
        self.cancel_pending_dismiss();
        match &phase {
            AcquisitionPhase::Preparing { .. } => {
                self.state_tx.send_replace(OverlayState::Visible {
                    text: phase.text(),
                    failed: false,
                });
            }
            AcquisitionPhase::Ready { .. } => {
                self.state_tx.send_replace(OverlayState::Hidden);
            }
            AcquisitionPhase::Failed { .. } => {
                self.state_tx.send_replace(OverlayState::Visible {
                    text: phase.text(),
                    failed: true,
                });
                self.schedule_dismiss();
            }
        }
        // No subscribers is fine.
        let _ = self.phase_tx.send(phase);
    }

    pub fn hide(&self) {
        self.cancel_pending_dismiss();
        self.state_tx.send_replace(OverlayState::Hidden);
    }

    fn cancel_pending_dismiss(&self) {
        if let Some(token) = self.pending_dismiss.lock().take() {
            token.cancel();
        }
    }

    fn schedule_dismiss(&self) {
        let token = CancellationToken::new();
        *self.pending_dismiss.lock() = Some(token.clone());

        let state_tx = self.state_tx.clone();
        let delay = self.dismiss_after;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    debug!("dismissing failure overlay after {:?}", delay);
                    state_tx.send_replace(OverlayState::Hidden);
                }
                _ = token.cancelled() => {}
            }
        });
    }
}
