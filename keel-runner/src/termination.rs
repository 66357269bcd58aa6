//! Termination escalation
//!
//! A timed-out command is stopped by sending an ordered list of signals,
//! waiting a grace period after each one. The same policy drives host
//! processes and containers through the [`Terminable`] seam.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Signal sent at one escalation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
    Kill,
}

impl StopSignal {
    /// Signal name as understood by container engines (`kill --signal`)
    pub fn name(self) -> &'static str {
        match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
            StopSignal::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    pub fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            StopSignal::Interrupt => Signal::SIGINT,
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationStep {
    pub signal: StopSignal,
    /// How long to wait for exit after sending `signal`
    pub grace: Duration,
}

/// Something that can be signalled and waited on
#[async_trait]
pub trait Terminable: Send {
    async fn send_signal(&mut self, signal: StopSignal) -> std::io::Result<()>;

    /// Waits up to `grace` for exit; returns true once the target is gone
    async fn wait_exit(&mut self, grace: Duration) -> bool;
}

/// Ordered signal escalation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationPolicy {
    steps: Vec<TerminationStep>,
}

impl TerminationPolicy {
    pub fn new(steps: Vec<TerminationStep>) -> Self {
        Self { steps }
    }

    /// Single SIGKILL with a short reap window
    pub fn immediate() -> Self {
        Self::new(vec![TerminationStep {
            signal: StopSignal::Kill,
            grace: Duration::from_secs(1),
        }])
    }

    /// Replaces the grace period of every step
    pub fn with_grace(mut self, grace: Duration) -> Self {
        for step in &mut self.steps {
            step.grace = grace;
        }
        self
    }

    pub fn steps(&self) -> &[TerminationStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the escalation until the target exits
    ///
    /// Returns false if the target was still alive after the last step.
    pub async fn terminate<T: Terminable + ?Sized>(&self, target: &mut T) -> bool {
        for step in &self.steps {
            debug!("Sending {} (grace {:?})", step.signal.name(), step.grace);

            if let Err(e) = target.send_signal(step.signal).await {
                debug!("Failed to send {}: {}", step.signal.name(), e);
            }

            if target.wait_exit(step.grace).await {
                return true;
            }
        }
        false
    }
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self::new(vec![
            TerminationStep {
                signal: StopSignal::Interrupt,
                grace: Duration::from_secs(2),
            },
            TerminationStep {
                signal: StopSignal::Terminate,
                grace: Duration::from_secs(5),
            },
            TerminationStep {
                signal: StopSignal::Kill,
                grace: Duration::from_secs(5),
            },
        ])
    }
}
