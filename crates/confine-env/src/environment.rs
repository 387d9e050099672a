//! Ordered variable mapping

use std::ffi::CString;

use confine_core::util::str_to_cstring;
use confine_core::Result;

/// Environment variables in first-insertion order.
///
/// Setting an existing name replaces its value but keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((name, value)),
        }
    }

    pub fn extend<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in pairs {
            self.set(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `NAME=VALUE` strings ready for `execve`
    pub fn to_envp(&self) -> Result<Vec<CString>> {
        self.vars
            .iter()
            .map(|(n, v)| str_to_cstring(&format!("{}={}", n, v), "environment variable"))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Environment::new();
        env.extend(iter);
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_keeps_position() {
        let mut env = Environment::new();
        env.set("A", "1");
        env.set("B", "2");
        env.set("A", "3");
        let pairs: Vec<_> = env.iter().collect();
        assert_eq!(pairs, vec![("A", "3"), ("B", "2")]);
    }

    #[test]
    fn test_to_envp() {
        let env: Environment = [("PATH", "/bin"), ("X", "a b")].into_iter().collect();
        let envp = env.to_envp().unwrap();
        assert_eq!(envp[0].to_str().unwrap(), "PATH=/bin");
        assert_eq!(envp[1].to_str().unwrap(), "X=a b");
    }

    #[test]
    fn test_to_envp_rejects_nul() {
        let mut env = Environment::new();
        env.set("BAD", "a\0b");
        assert!(env.to_envp().is_err());
    }
}
