//! Termination results and the setup-failure record
//!
//! A child that fails before exec writes exactly one record to the
//! setup-failure channel:
//!
//! ```text
//! [stage u8][errno i32 LE][len u16 LE][len bytes of UTF-8 message]
//! ```
//!
//! Encoding works on a caller-provided stack buffer so the child never
//! allocates between fork and exec.

use std::fmt;

use nix::sys::signal::Signal;

/// Longest message carried by a setup-failure record
pub const MAX_MESSAGE_LEN: usize = 1024;
/// Size of the fixed record header
pub const RECORD_HEADER_LEN: usize = 7;
/// Largest possible record
pub const MAX_RECORD_LEN: usize = RECORD_HEADER_LEN + MAX_MESSAGE_LEN;

/// Ordered stages of the child setup pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetupStage {
    Namespace,
    Filesystem,
    Privilege,
    SyscallFilter,
    Exec,
}

impl SetupStage {
    pub const ALL: [SetupStage; 5] = [
        SetupStage::Namespace,
        SetupStage::Filesystem,
        SetupStage::Privilege,
        SetupStage::SyscallFilter,
        SetupStage::Exec,
    ];

    /// Exit code of a child that failed in this stage
    pub fn exit_code(self) -> i32 {
        match self {
            SetupStage::Namespace => 226,
            SetupStage::Filesystem => 233,
            SetupStage::Privilege => 218,
            SetupStage::SyscallFilter => 228,
            SetupStage::Exec => 203,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SetupStage::Namespace => "namespace",
            SetupStage::Filesystem => "filesystem",
            SetupStage::Privilege => "privilege",
            SetupStage::SyscallFilter => "syscall-filter",
            SetupStage::Exec => "exec",
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            SetupStage::Namespace => 1,
            SetupStage::Filesystem => 2,
            SetupStage::Privilege => 3,
            SetupStage::SyscallFilter => 4,
            SetupStage::Exec => 5,
        }
    }

    fn from_wire(byte: u8) -> Option<Self> {
        SetupStage::ALL.into_iter().find(|s| s.to_wire() == byte)
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed step inside the child, before it is tagged with a stage.
///
/// `subject` borrows data prepared before fork, usually a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepError<'a> {
    pub step: &'static str,
    pub subject: Option<&'a [u8]>,
    pub errno: i32,
}

impl<'a> StepError<'a> {
    pub fn new(step: &'static str, errno: i32) -> Self {
        Self {
            step,
            subject: None,
            errno,
        }
    }

    /// Capture `errno` from the last failed libc call
    pub fn last_os(step: &'static str) -> Self {
        Self::new(step, crate::util::last_errno())
    }

    pub fn with_subject(mut self, subject: &'a [u8]) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Encode as a setup-failure record for `stage`
    pub fn encode(&self, stage: SetupStage, buf: &mut [u8; MAX_RECORD_LEN]) -> usize {
        match self.subject {
            Some(subject) => {
                SetupFailure::encode(stage, self.errno, &[self.step.as_bytes(), b" ", subject], buf)
            }
            None => SetupFailure::encode(stage, self.errno, &[self.step.as_bytes()], buf),
        }
    }
}

/// A confinement step that failed inside the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupFailure {
    pub stage: SetupStage,
    /// Raw OS error number, 0 when the failure was not a syscall error
    pub errno: i32,
    /// Which step failed
    pub message: String,
}

impl SetupFailure {
    /// Encode a record into `buf` from message fragments.
    ///
    /// Fragments are concatenated and truncated at [`MAX_MESSAGE_LEN`],
    /// never splitting a UTF-8 sequence. Returns the record length.
    pub fn encode(
        stage: SetupStage,
        errno: i32,
        fragments: &[&[u8]],
        buf: &mut [u8; MAX_RECORD_LEN],
    ) -> usize {
        let mut len = 0usize;
        let message = &mut buf[RECORD_HEADER_LEN..];
        for fragment in fragments {
            let room = MAX_MESSAGE_LEN - len;
            if room == 0 {
                break;
            }
            let take = fragment.len().min(room);
            message[len..len + take].copy_from_slice(&fragment[..take]);
            len += take;
        }
        // Back off to a character boundary if truncation split one.
        while len > 0 && std::str::from_utf8(&message[..len]).is_err() {
            len -= 1;
        }

        buf[0] = stage.to_wire();
        buf[1..5].copy_from_slice(&errno.to_le_bytes());
        buf[5..7].copy_from_slice(&(len as u16).to_le_bytes());
        RECORD_HEADER_LEN + len
    }

    /// Decode a record; `None` when the bytes do not form a complete one.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_LEN {
            return None;
        }
        let stage = SetupStage::from_wire(bytes[0])?;
        let errno = i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let len = u16::from_le_bytes([bytes[5], bytes[6]]) as usize;
        if len > MAX_MESSAGE_LEN {
            return None;
        }
        let body = bytes.get(RECORD_HEADER_LEN..RECORD_HEADER_LEN + len)?;
        Some(Self {
            stage,
            errno,
            message: String::from_utf8_lossy(body).into_owned(),
        })
    }

    /// The OS error, if the failure carried one
    pub fn os_error(&self) -> Option<std::io::Error> {
        (self.errno != 0).then(|| std::io::Error::from_raw_os_error(self.errno))
    }
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage: {}", self.stage, self.message)?;
        if let Some(err) = self.os_error() {
            write!(f, ": {}", err)?;
        }
        Ok(())
    }
}

/// How a launched process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationResult {
    /// The program exited on its own with this code
    Exited { code: i32 },
    /// The program was terminated by this signal
    KilledBySignal { signal: i32 },
    /// The confined environment could not be set up or the program could not be run
    SetupFailed(SetupFailure),
    /// The timeout elapsed and the child was killed
    TimedOut,
}

impl TerminationResult {
    pub fn success(&self) -> bool {
        matches!(self, TerminationResult::Exited { code: 0 })
    }

    /// Stage that failed, for setup failures
    pub fn setup_stage(&self) -> Option<SetupStage> {
        match self {
            TerminationResult::SetupFailed(failure) => Some(failure.stage),
            _ => None,
        }
    }

    /// Signal that killed the program, if any
    pub fn signal(&self) -> Option<Signal> {
        match self {
            TerminationResult::KilledBySignal { signal } => Signal::try_from(*signal).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for TerminationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationResult::Exited { code } => write!(f, "exited with code {}", code),
            TerminationResult::KilledBySignal { signal } => match Signal::try_from(*signal) {
                Ok(sig) => write!(f, "killed by {}", sig.as_str()),
                Err(_) => write!(f, "killed by signal {}", signal),
            },
            TerminationResult::SetupFailed(failure) => write!(f, "setup failed: {}", failure),
            TerminationResult::TimedOut => write!(f, "timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let mut buf = [0u8; MAX_RECORD_LEN];
        let n = SetupFailure::encode(SetupStage::Privilege, 1, &[b"setresuid"], &mut buf);
        assert_eq!(n, RECORD_HEADER_LEN + 9);
        assert_eq!(buf[0], 3);
        assert_eq!(&buf[1..5], &1i32.to_le_bytes());
        assert_eq!(&buf[5..7], &9u16.to_le_bytes());
        assert_eq!(&buf[7..n], b"setresuid");
    }

    #[test]
    fn test_decode_joins_fragments() {
        let mut buf = [0u8; MAX_RECORD_LEN];
        let n = SetupFailure::encode(
            SetupStage::Filesystem,
            libc::ENOENT,
            &[b"bind mount ", b"/var/empty"],
            &mut buf,
        );
        let failure = SetupFailure::decode(&buf[..n]).unwrap();
        assert_eq!(failure.stage, SetupStage::Filesystem);
        assert_eq!(failure.errno, libc::ENOENT);
        assert_eq!(failure.message, "bind mount /var/empty");
        assert!(failure.to_string().starts_with("filesystem stage: bind mount"));
    }

    #[test]
    fn test_step_error_encoding() {
        let mut buf = [0u8; MAX_RECORD_LEN];
        let err = StepError::new("remount read-only", libc::EPERM).with_subject(b"/usr");
        let n = err.encode(SetupStage::Filesystem, &mut buf);
        let failure = SetupFailure::decode(&buf[..n]).unwrap();
        assert_eq!(failure.message, "remount read-only /usr");
        assert_eq!(failure.errno, libc::EPERM);

        let n = StepError::new("setresuid", libc::EPERM).encode(SetupStage::Privilege, &mut buf);
        assert_eq!(SetupFailure::decode(&buf[..n]).unwrap().message, "setresuid");
    }

    #[test]
    fn test_long_message_truncated_on_char_boundary() {
        let mut buf = [0u8; MAX_RECORD_LEN];
        let long = "é".repeat(MAX_MESSAGE_LEN);
        let n = SetupFailure::encode(SetupStage::Exec, 2, &[long.as_bytes()], &mut buf);
        assert!(n <= MAX_RECORD_LEN);
        let failure = SetupFailure::decode(&buf[..n]).unwrap();
        assert_eq!(failure.message.len(), MAX_MESSAGE_LEN);
        assert!(failure.message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_decode_rejects_short_or_corrupt() {
        assert!(SetupFailure::decode(&[]).is_none());
        assert!(SetupFailure::decode(&[2, 0, 0, 0, 0, 5, 0, b'a']).is_none());
        assert!(SetupFailure::decode(&[9, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_stage_exit_codes_distinct() {
        let mut codes: Vec<i32> = SetupStage::ALL.iter().map(|s| s.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), SetupStage::ALL.len());
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(
            TerminationResult::Exited { code: 3 }.to_string(),
            "exited with code 3"
        );
        assert_eq!(
            TerminationResult::KilledBySignal { signal: libc::SIGPIPE }.to_string(),
            "killed by SIGPIPE"
        );
        assert_eq!(TerminationResult::TimedOut.to_string(), "timed out");
    }

    #[test]
    fn test_termination_accessors() {
        assert!(TerminationResult::Exited { code: 0 }.success());
        assert!(!TerminationResult::TimedOut.success());
        let killed = TerminationResult::KilledBySignal { signal: libc::SIGSYS };
        assert_eq!(killed.signal(), Some(Signal::SIGSYS));
        let failed = TerminationResult::SetupFailed(SetupFailure {
            stage: SetupStage::SyscallFilter,
            errno: 0,
            message: "install filter".into(),
        });
        assert_eq!(failed.setup_stage(), Some(SetupStage::SyscallFilter));
    }
}
