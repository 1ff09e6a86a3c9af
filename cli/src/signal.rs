//! Termination signals that interrupt a load.

use tokio::signal::unix::{signal, Signal, SignalKind};

/// Which signal asked the loader to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
    Hangup,
}

impl Shutdown {
    pub fn name(self) -> &'static str {
        match self {
            Shutdown::Interrupt => "SIGINT",
            Shutdown::Terminate => "SIGTERM",
            Shutdown::Hangup => "SIGHUP",
        }
    }

    /// Conventional shell status for death by this signal.
    pub fn exit_code(self) -> i32 {
        128 + match self {
            Shutdown::Interrupt => libc::SIGINT,
            Shutdown::Terminate => libc::SIGTERM,
            Shutdown::Hangup => libc::SIGHUP,
        }
    }
}

/// Registered handlers, installed before any work starts.
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next termination signal.
    pub async fn recv(&mut self) -> Shutdown {
        tokio::select! {
            _ = self.interrupt.recv() => Shutdown::Interrupt,
            _ = self.terminate.recv() => Shutdown::Terminate,
            _ = self.hangup.recv() => Shutdown::Hangup,
        }
    }
}
