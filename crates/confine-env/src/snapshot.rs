//! Point-in-time capture of pass-through variables

use std::time::SystemTime;

/// Values of the pass-through names as they were when the snapshot was taken.
///
/// Names not set at capture time are simply absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassThroughSnapshot {
    vars: Vec<(String, String)>,
    taken_at: SystemTime,
}

impl PassThroughSnapshot {
    /// Capture from the current process environment
    pub fn capture(names: &[String]) -> Self {
        Self::capture_with(names, |name| std::env::var(name).ok())
    }

    /// Capture using a custom lookup
    pub fn capture_with<F>(names: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars: Vec<(String, String)> = Vec::new();
        for name in names {
            if vars.iter().any(|(n, _)| n == name) {
                continue;
            }
            if let Some(value) = lookup(name) {
                vars.push((name.clone(), value));
            }
        }
        Self {
            vars,
            taken_at: SystemTime::now(),
        }
    }

    pub fn empty() -> Self {
        Self::capture_with(&[], |_| None)
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn taken_at(&self) -> SystemTime {
        self.taken_at
    }
}
