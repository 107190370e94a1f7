// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use owo_colors::{OwoColorize, Style};
use std::{fmt, process::ExitStatus, time::Duration};

/// The reason a process terminated abnormally.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum AbortStatus {
    /// The process was terminated by a Unix signal.
    #[cfg(unix)]
    UnixSignal(i32),

    /// The process exited with an NTSTATUS error code.
    #[cfg(windows)]
    WindowsNtStatus(i32),
}

impl AbortStatus {
    /// Returns the abort status, if the process didn't exit normally.
    pub(crate) fn extract(exit_status: ExitStatus) -> Option<Self> {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::process::ExitStatusExt;
                exit_status.signal().map(AbortStatus::UnixSignal)
            } else if #[cfg(windows)] {
                // NTSTATUS values with the severity bits set to "error" are negative as an i32.
                exit_status
                    .code()
                    .and_then(|code| (code < 0).then_some(AbortStatus::WindowsNtStatus(code)))
            } else {
                let _ = exit_status;
                None
            }
        }
    }
}

// "exited with"/"aborted with"
pub(crate) fn display_exited_with(exit_status: ExitStatus) -> String {
    match AbortStatus::extract(exit_status) {
        Some(abort_status) => display_abort_status(abort_status),
        None => match exit_status.code() {
            Some(code) => format!("exited with exit code {code}"),
            None => "exited with an unknown error".to_owned(),
        },
    }
}

pub(crate) fn display_abort_status(abort_status: AbortStatus) -> String {
    match abort_status {
        #[cfg(unix)]
        AbortStatus::UnixSignal(sig) => match signal_str(sig) {
            Some(s) => format!("aborted with signal {sig} (SIG{s})"),
            None => format!("aborted with signal {sig}"),
        },
        #[cfg(windows)]
        AbortStatus::WindowsNtStatus(nt_status) => {
            format!("aborted with code {nt_status:#010x}")
        }
    }
}

#[cfg(unix)]
fn signal_str(signal: i32) -> Option<&'static str> {
    // These signal numbers are the same on at least Linux, macOS, FreeBSD and illumos.
    match signal {
        1 => Some("HUP"),
        2 => Some("INT"),
        3 => Some("QUIT"),
        4 => Some("ILL"),
        5 => Some("TRAP"),
        6 => Some("ABRT"),
        8 => Some("FPE"),
        9 => Some("KILL"),
        10 => Some("BUS"),
        11 => Some("SEGV"),
        13 => Some("PIPE"),
        14 => Some("ALRM"),
        15 => Some("TERM"),
        _ => None,
    }
}

/// Write out a test identifier, highlighting the binary and the test name.
pub(crate) fn write_test_name(
    name: &str,
    binary_style: Style,
    test_style: Style,
    f: &mut impl fmt::Write,
) -> fmt::Result {
    match name.split_once('.') {
        Some((binary, rest)) => {
            write!(f, "{}.", binary.style(binary_style))?;
            // Look for the part of the test after the last `.`, if any.
            match rest.rsplit_once('.') {
                Some((suite, test)) => write!(f, "{suite}.{}", test.style(test_style)),
                None => write!(f, "{}", rest.style(test_style)),
            }
        }
        None => write!(f, "{}", name.style(test_style)),
    }
}

/// Formats a duration as `[   0.034s]`.
pub(crate) struct DisplayDuration(pub(crate) Duration);

impl fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // * > means right-align.
        // * 8 is the number of characters to pad to.
        // * .3 means print three digits after the decimal point.
        write!(f, "[{:>8.3}s]", self.0.as_secs_f64())
    }
}
