//! Environment merge

use std::path::PathBuf;

use confine_core::config::EnvironmentConfig;
use confine_core::{ConfineError, Result};
use log::debug;

use crate::environment::Environment;
use crate::file::load_env_file;
use crate::snapshot::PassThroughSnapshot;

/// Variables derived from the resolved user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEnvironment {
    pub name: String,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// Check that every explicit assignment has the `NAME=VALUE` form.
pub fn validate_assignments(assignments: &[String]) -> Result<()> {
    for assignment in assignments {
        match assignment.split_once('=') {
            Some((name, _)) if !name.is_empty() => {}
            _ => {
                return Err(ConfineError::InvalidConfig(format!(
                    "Environment assignment must be NAME=VALUE: {:?}",
                    assignment
                )));
            }
        }
    }
    Ok(())
}

/// Builds the final environment for one launch
pub struct EnvironmentBuilder<'a> {
    config: &'a EnvironmentConfig,
    snapshot: &'a PassThroughSnapshot,
    user: Option<&'a UserEnvironment>,
    runtime_directory: Option<PathBuf>,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(config: &'a EnvironmentConfig, snapshot: &'a PassThroughSnapshot) -> Self {
        Self {
            config,
            snapshot,
            user: None,
            runtime_directory: None,
        }
    }

    pub fn user(mut self, user: Option<&'a UserEnvironment>) -> Self {
        self.user = user;
        self
    }

    pub fn runtime_directory(mut self, path: Option<PathBuf>) -> Self {
        self.runtime_directory = path;
        self
    }

    /// Merge all sources; later sources win on collisions.
    ///
    /// Only a required environment file that cannot be read fails.
    pub fn build(&self) -> Result<Environment> {
        let mut env = Environment::new();

        if let Some(user) = self.user {
            env.set("USER", user.name.as_str());
            env.set("LOGNAME", user.name.as_str());
            env.set("HOME", user.home.display().to_string());
            env.set("SHELL", user.shell.display().to_string());
        }
        env.extend(self.config.defaults.iter().cloned());
        if let Some(dir) = &self.runtime_directory {
            env.set("RUNTIME_DIRECTORY", dir.display().to_string());
        }

        env.extend(self.snapshot.vars().iter().cloned());

        for spec in &self.config.files {
            if let Some(vars) = load_env_file(spec)? {
                debug!(
                    "Loaded {} variables from {}",
                    vars.len(),
                    spec.path.display()
                );
                env.extend(vars);
            }
        }

        validate_assignments(&self.config.assignments)?;
        env.extend(
            self.config
                .assignments
                .iter()
                .filter_map(|a| a.split_once('=')),
        );

        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confine_core::config::PathSpec;
    use std::fs;

    fn snapshot(pairs: &[(&str, &str)]) -> PassThroughSnapshot {
        let names: Vec<String> = pairs.iter().map(|(n, _)| n.to_string()).collect();
        PassThroughSnapshot::capture_with(&names, |name| {
            pairs
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.to_string())
        })
    }

    #[test]
    fn test_merge_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("env");
        fs::write(&file, "VAR1=b\nVAR2=c\n").unwrap();

        let config = EnvironmentConfig {
            defaults: Vec::new(),
            files: vec![PathSpec::required(&file)],
            assignments: vec!["VAR2=d".to_string()],
            pass_through: vec!["VAR1".to_string()],
        };
        let snap = snapshot(&[("VAR1", "a")]);
        let env = EnvironmentBuilder::new(&config, &snap).build().unwrap();

        assert_eq!(env.len(), 2);
        assert_eq!(env.get("VAR1"), Some("b"));
        assert_eq!(env.get("VAR2"), Some("d"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let config = EnvironmentConfig {
            defaults: vec![("LANG".into(), "C".into())],
            assignments: vec!["A=1".into()],
            ..Default::default()
        };
        let snap = snapshot(&[("B", "2")]);
        let builder = EnvironmentBuilder::new(&config, &snap);
        assert_eq!(builder.build().unwrap(), builder.build().unwrap());
    }

    #[test]
    fn test_default_config_provides_path() {
        let config = EnvironmentConfig::default();
        let snap = PassThroughSnapshot::empty();
        let env = EnvironmentBuilder::new(&config, &snap).build().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("PATH"), Some(confine_core::util::DEFAULT_PATH));
    }

    #[test]
    fn test_empty_base_stays_empty() {
        let config = EnvironmentConfig {
            defaults: Vec::new(),
            ..Default::default()
        };
        let snap = PassThroughSnapshot::empty();
        let env = EnvironmentBuilder::new(&config, &snap).build().unwrap();
        assert!(env.is_empty());
    }

    #[test]
    fn test_user_and_runtime_defaults() {
        let user = UserEnvironment {
            name: "nobody".into(),
            home: PathBuf::from("/nonexistent"),
            shell: PathBuf::from("/usr/sbin/nologin"),
        };
        let config = EnvironmentConfig {
            assignments: vec!["HOME=/srv".into()],
            ..Default::default()
        };
        let snap = PassThroughSnapshot::empty();
        let env = EnvironmentBuilder::new(&config, &snap)
            .user(Some(&user))
            .runtime_directory(Some(PathBuf::from("/run/svc")))
            .build()
            .unwrap();
        assert_eq!(env.get("USER"), Some("nobody"));
        assert_eq!(env.get("LOGNAME"), Some("nobody"));
        assert_eq!(env.get("HOME"), Some("/srv"));
        assert_eq!(env.get("SHELL"), Some("/usr/sbin/nologin"));
        assert_eq!(env.get("RUNTIME_DIRECTORY"), Some("/run/svc"));
    }

    #[test]
    fn test_missing_required_file_fails() {
        let config = EnvironmentConfig {
            files: vec![PathSpec::required("/nonexistent/confine.env")],
            ..Default::default()
        };
        let snap = PassThroughSnapshot::empty();
        assert!(EnvironmentBuilder::new(&config, &snap).build().is_err());
    }

    #[test]
    fn test_missing_optional_file_skipped() {
        let config = EnvironmentConfig {
            files: vec![PathSpec::optional("/nonexistent/confine.env")],
            ..Default::default()
        };
        let snap = PassThroughSnapshot::empty();
        assert!(EnvironmentBuilder::new(&config, &snap).build().is_ok());
    }

    #[test]
    fn test_validate_assignments() {
        assert!(validate_assignments(&["A=1".into(), "B=".into()]).is_ok());
        assert!(validate_assignments(&["NOEQUALS".into()]).is_err());
        assert!(validate_assignments(&["=value".into()]).is_err());
    }
}
