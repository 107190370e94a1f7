// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals during a test run.
//!
//! A signal stops further dispatch of tests. Tests that are already running are allowed to finish
//! or hit their own timeout.

use crate::errors::SignalHandlerSetupError;
use std::fmt;

/// Which signals a test run listens for.
///
/// Passed into [`TestRunnerBuilder::build`](crate::runner::TestRunnerBuilder::build).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// Listen for interrupts, plus hangup and termination on Unix.
    Standard,

    /// Listen for nothing. Runs can then only be canceled through a
    /// [`CancelHandle`](crate::runner::CancelHandle).
    Noop,
}

impl SignalHandlerKind {
    /// Must be called from within a Tokio runtime context.
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        let signals = match self {
            Self::Standard => Some(imp::Signals::new()?),
            Self::Noop => None,
        };
        Ok(SignalHandler { signals })
    }
}

#[derive(Debug)]
pub(crate) struct SignalHandler {
    signals: Option<imp::Signals>,
}

impl SignalHandler {
    /// Waits for the next signal. Returns `None` once no more signals can be received.
    pub(crate) async fn recv(&mut self) -> Option<SignalEvent> {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => None,
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::SignalEvent;
    use std::{future::poll_fn, task::Poll};
    use tokio::signal::unix::{Signal, SignalKind, signal};

    #[derive(Debug)]
    struct Watched {
        event: SignalEvent,
        signal: Signal,
        closed: bool,
    }

    #[derive(Debug)]
    pub(super) struct Signals {
        watched: [Watched; 3],
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            let watch = |event, kind| -> std::io::Result<Watched> {
                Ok(Watched {
                    event,
                    signal: signal(kind)?,
                    closed: false,
                })
            };
            Ok(Self {
                watched: [
                    watch(SignalEvent::Interrupt, SignalKind::interrupt())?,
                    watch(SignalEvent::Hangup, SignalKind::hangup())?,
                    watch(SignalEvent::Term, SignalKind::terminate())?,
                ],
            })
        }

        pub(super) async fn recv(&mut self) -> Option<SignalEvent> {
            poll_fn(|cx| {
                let mut open = false;
                for watched in self.watched.iter_mut().filter(|watched| !watched.closed) {
                    match watched.signal.poll_recv(cx) {
                        Poll::Ready(Some(())) => return Poll::Ready(Some(watched.event)),
                        Poll::Ready(None) => watched.closed = true,
                        Poll::Pending => open = true,
                    }
                }
                if open {
                    Poll::Pending
                } else {
                    Poll::Ready(None)
                }
            })
            .await
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::SignalEvent;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        // None once the stream has ended.
        ctrl_c: Option<CtrlC>,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self {
                ctrl_c: Some(ctrl_c()?),
            })
        }

        pub(super) async fn recv(&mut self) -> Option<SignalEvent> {
            let received = self.ctrl_c.as_mut()?.recv().await;
            if received.is_none() {
                self.ctrl_c = None;
            }
            received.map(|()| SignalEvent::Interrupt)
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    use super::SignalEvent;

    #[derive(Debug)]
    pub(super) struct Signals;

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self)
        }

        pub(super) async fn recv(&mut self) -> Option<SignalEvent> {
            None
        }
    }
}

/// A signal received during a test run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignalEvent {
    /// SIGINT on Unix, Ctrl-C on Windows.
    Interrupt,

    /// SIGHUP.
    #[cfg(unix)]
    Hangup,

    /// SIGTERM.
    #[cfg(unix)]
    Term,
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "interrupt",
            #[cfg(unix)]
            Self::Hangup => "hangup",
            #[cfg(unix)]
            Self::Term => "termination",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_handler_never_fires() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime built");
        let mut handler = SignalHandlerKind::Noop.build().expect("noop handler built");
        assert_eq!(runtime.block_on(handler.recv()), None);
    }

    #[test]
    fn test_signal_event_display() {
        assert_eq!(SignalEvent::Interrupt.to_string(), "interrupt");
        #[cfg(unix)]
        assert_eq!(SignalEvent::Term.to_string(), "termination");
    }
}
