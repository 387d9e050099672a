//! Validated execution spec and its builder
//!
//! Everything that can be decided without forking is decided here: users
//! and groups are resolved, capability sets are checked, syscall filters are
//! compiled and pass-through variables are captured. A built
//! [`ExecutionSpec`] is immutable and can be launched any number of times.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use confine_core::capabilities::SystemCapabilities;
use confine_core::config::{
    CapabilitySet, ExecConfig, IoScheduling, MountPropagation, PathSpec, Personality,
    RuntimeDirectoryConfig, SyscallFilterConfig,
};
use confine_core::util::find_binary;
use confine_core::{ConfineError, Result};
use confine_env::{PassThroughSnapshot, UserEnvironment, validate_assignments};
use confine_fs::{DEFAULT_RUNTIME_ROOT, RuntimeDirectoryPlan, state_dir, validate_paths};
use confine_namespace::NamespacePlan;
use confine_privilege::{CapabilityPlan, PrivilegePlan, ResolvedIdentity, forced_drops};
use confine_seccomp::CompiledFilter;

/// Syscall groups denied when kernel modules are protected
const KERNEL_MODULE_GROUPS: &[&str] = &["@module"];

/// Builder for [`ExecutionSpec`]
#[derive(Debug, Clone)]
pub struct ExecutionSpecBuilder {
    config: ExecConfig,
    system: Option<SystemCapabilities>,
    runtime_root: PathBuf,
    private_tmp_base: Option<PathBuf>,
}

impl ExecutionSpecBuilder {
    /// Start a spec that runs `program` with defaults for everything else
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::from_config(ExecConfig::new(program))
    }

    /// Start from a raw configuration, typically loaded from JSON
    pub fn from_config(config: ExecConfig) -> Self {
        Self {
            config,
            system: None,
            runtime_root: PathBuf::from(DEFAULT_RUNTIME_ROOT),
            private_tmp_base: None,
        }
    }

    /// Append arguments after argv[0]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_directory = Some(dir.into());
        self
    }

    pub fn umask(mut self, umask: u32) -> Self {
        self.config.umask = umask;
        self
    }

    /// Run as this user (name or numeric uid)
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.identity.user = Some(user.into());
        self
    }

    /// Run with this primary group (name or numeric gid)
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.config.identity.group = Some(group.into());
        self
    }

    pub fn supplementary_group(mut self, group: impl Into<String>) -> Self {
        self.config.identity.supplementary_groups.push(group.into());
        self
    }

    /// Lowest-priority variable, overridden by every other source
    pub fn environment_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .environment
            .defaults
            .push((name.into(), value.into()));
        self
    }

    /// Explicit `NAME=VALUE` assignment
    pub fn assignment(mut self, assignment: impl Into<String>) -> Self {
        self.config.environment.assignments.push(assignment.into());
        self
    }

    /// Copy `name` from the launcher's environment at build time
    pub fn pass_through(mut self, name: impl Into<String>) -> Self {
        self.config.environment.pass_through.push(name.into());
        self
    }

    pub fn environment_file(mut self, path: impl Into<PathBuf>, ignore_missing: bool) -> Self {
        let spec = if ignore_missing {
            PathSpec::optional(path)
        } else {
            PathSpec::required(path)
        };
        self.config.environment.files.push(spec);
        self
    }

    pub fn personality(mut self, personality: Personality) -> Self {
        self.config.personality = Some(personality);
        self
    }

    pub fn private_tmp(mut self, enabled: bool) -> Self {
        self.config.filesystem.private_tmp = enabled;
        self
    }

    pub fn private_devices(mut self, enabled: bool) -> Self {
        self.config.filesystem.private_devices = enabled;
        self
    }

    pub fn private_network(mut self, enabled: bool) -> Self {
        self.config.private_network = enabled;
        self
    }

    pub fn read_only_path(mut self, path: PathSpec) -> Self {
        self.config.filesystem.read_only_paths.push(path);
        self
    }

    pub fn read_write_path(mut self, path: PathSpec) -> Self {
        self.config.filesystem.read_write_paths.push(path);
        self
    }

    pub fn inaccessible_path(mut self, path: PathSpec) -> Self {
        self.config.filesystem.inaccessible_paths.push(path);
        self
    }

    pub fn protect_kernel_modules(mut self, enabled: bool) -> Self {
        self.config.filesystem.protect_kernel_modules = enabled;
        self
    }

    pub fn mount_propagation(mut self, propagation: MountPropagation) -> Self {
        self.config.filesystem.mount_propagation = Some(propagation);
        self
    }

    pub fn runtime_directory(mut self, config: RuntimeDirectoryConfig) -> Self {
        self.config.runtime_directory = Some(config);
        self
    }

    /// Limit the bounding set. Repeated calls merge: the result allows
    /// everything either set allows.
    pub fn bounding_set(mut self, set: CapabilitySet) -> Result<Self> {
        let merged = match self.config.capabilities.bounding_set.take() {
            Some(existing) => existing.merge(&set)?,
            None => set,
        };
        self.config.capabilities.bounding_set = Some(merged);
        Ok(self)
    }

    pub fn ambient_set(mut self, set: CapabilitySet) -> Self {
        self.config.capabilities.ambient_set = Some(set);
        self
    }

    pub fn syscall_filter(mut self, filter: SyscallFilterConfig) -> Self {
        self.config.syscall_filter = Some(filter);
        self
    }

    pub fn ignore_sigpipe(mut self, ignore: bool) -> Self {
        self.config.ignore_sigpipe = ignore;
        self
    }

    pub fn no_new_privileges(mut self, enabled: bool) -> Self {
        self.config.no_new_privileges = enabled;
        self
    }

    pub fn oom_score_adjust(mut self, value: i32) -> Self {
        self.config.oom_score_adjust = Some(value);
        self
    }

    pub fn io_scheduling(mut self, scheduling: IoScheduling) -> Self {
        self.config.io_scheduling = Some(scheduling);
        self
    }

    /// Use previously detected kernel features instead of probing in `build`
    pub fn system_capabilities(mut self, system: SystemCapabilities) -> Self {
        self.system = Some(system);
        self
    }

    /// Directory that runtime directories and launcher state live under
    pub fn runtime_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.runtime_root = root.into();
        self
    }

    /// Directory the per-launch private temp directory is created in
    pub fn private_tmp_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.private_tmp_base = Some(base.into());
        self
    }

    /// Validate and resolve everything; nothing is forked.
    pub fn build(self) -> Result<ExecutionSpec> {
        let Self {
            config,
            system,
            runtime_root,
            private_tmp_base,
        } = self;
        let system = system.unwrap_or_else(SystemCapabilities::detect);

        if config.program.as_os_str().is_empty() {
            return Err(ConfineError::InvalidConfig(
                "Program cannot be empty".to_string(),
            ));
        }
        if !runtime_root.is_absolute() {
            return Err(ConfineError::InvalidConfig(format!(
                "Runtime root {} is not absolute",
                runtime_root.display()
            )));
        }

        validate_assignments(&config.environment.assignments)?;
        let identity = ResolvedIdentity::resolve(&config.identity)?;
        let filter = compile_filter(&config, &system)?;

        if config.capabilities.ambient_set.is_some() && !system.has_ambient_capabilities {
            return Err(ConfineError::FeatureNotAvailable(
                "Ambient capabilities are not supported by this kernel".to_string(),
            ));
        }
        let capabilities = CapabilityPlan::new(
            &config.capabilities,
            &forced_drops(
                config.filesystem.private_devices,
                config.filesystem.protect_kernel_modules,
            ),
        )?;
        let privilege = PrivilegePlan::new(&config, &identity, capabilities)?;

        validate_paths(&config.filesystem)?;
        let runtime_directory = config
            .runtime_directory
            .as_ref()
            .map(|rd| {
                RuntimeDirectoryPlan::new(
                    &runtime_root,
                    rd,
                    identity.effective_uid().as_raw(),
                    identity.effective_gid().as_raw(),
                )
            })
            .transpose()?;

        let snapshot = PassThroughSnapshot::capture(&config.environment.pass_through);
        let namespaces = NamespacePlan::from_config(&config);
        let user_environment = identity.user.as_ref().map(|user| UserEnvironment {
            name: user.name.clone(),
            home: user.home.clone(),
            shell: user.shell.clone(),
        });
        let executable = resolve_executable(&config.program);

        info!(
            "Built execution spec for {} (namespaces: mount={} net={}, filters={})",
            executable.display(),
            namespaces.mount,
            namespaces.net,
            filter.program_count()
        );

        Ok(ExecutionSpec {
            state_dir: state_dir(&runtime_root),
            config,
            executable,
            identity,
            user_environment,
            snapshot,
            namespaces,
            privilege,
            filter,
            runtime_directory,
            private_tmp_base,
        })
    }
}

fn compile_filter(config: &ExecConfig, system: &SystemCapabilities) -> Result<CompiledFilter> {
    let mut filter = match &config.syscall_filter {
        Some(_) if !system.has_seccomp => {
            return Err(ConfineError::FeatureNotAvailable(
                "Syscall filtering requires seccomp support".to_string(),
            ));
        }
        Some(filter_config) => CompiledFilter::compile(filter_config)?,
        None => CompiledFilter::default(),
    };

    if config.filesystem.protect_kernel_modules {
        if system.has_seccomp {
            filter.extend(CompiledFilter::deny_groups(
                KERNEL_MODULE_GROUPS,
                libc::EPERM as u32,
            )?)?;
        } else {
            warn!("Seccomp unavailable; kernel modules protected by capabilities and mounts only");
        }
    }
    Ok(filter)
}

/// Bare names are looked up on the launcher's `PATH`. A name that cannot be
/// found is kept so that `execve` reports the failure.
fn resolve_executable(program: &Path) -> PathBuf {
    let Some(name) = program.to_str() else {
        return program.to_path_buf();
    };
    if name.contains('/') {
        return program.to_path_buf();
    }
    match find_binary(name) {
        Some(found) => {
            debug!("Resolved {} to {}", name, found.display());
            found
        }
        None => program.to_path_buf(),
    }
}

/// An immutable, validated description of one launch
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    config: ExecConfig,
    executable: PathBuf,
    identity: ResolvedIdentity,
    user_environment: Option<UserEnvironment>,
    snapshot: PassThroughSnapshot,
    namespaces: NamespacePlan,
    privilege: PrivilegePlan,
    filter: CompiledFilter,
    runtime_directory: Option<RuntimeDirectoryPlan>,
    state_dir: PathBuf,
    private_tmp_base: Option<PathBuf>,
}

impl ExecutionSpec {
    pub fn builder(program: impl Into<PathBuf>) -> ExecutionSpecBuilder {
        ExecutionSpecBuilder::new(program)
    }

    /// The configuration this spec was built from
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Path handed to `execve`
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn identity(&self) -> &ResolvedIdentity {
        &self.identity
    }

    pub fn user_environment(&self) -> Option<&UserEnvironment> {
        self.user_environment.as_ref()
    }

    /// Pass-through variables as captured by `build`
    pub fn snapshot(&self) -> &PassThroughSnapshot {
        &self.snapshot
    }

    pub fn namespaces(&self) -> &NamespacePlan {
        &self.namespaces
    }

    pub fn privilege(&self) -> &PrivilegePlan {
        &self.privilege
    }

    pub fn filter(&self) -> &CompiledFilter {
        &self.filter
    }

    pub fn runtime_directory(&self) -> Option<&RuntimeDirectoryPlan> {
        self.runtime_directory.as_ref()
    }

    /// Launcher state below the runtime root
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn private_tmp_base(&self) -> Option<&Path> {
        self.private_tmp_base.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confine_core::config::{FilterMode, ViolationAction};

    fn builder() -> ExecutionSpecBuilder {
        ExecutionSpecBuilder::new("/bin/true").system_capabilities(SystemCapabilities::assume_all())
    }

    #[test]
    fn test_minimal_spec() {
        let spec = builder().build().unwrap();
        assert_eq!(spec.executable(), Path::new("/bin/true"));
        assert!(spec.filter().is_empty());
        assert!(spec.namespaces().is_empty());
        assert!(spec.runtime_directory().is_none());
        assert_eq!(spec.state_dir(), Path::new("/run/confine"));
    }

    #[test]
    fn test_bare_program_resolved_on_path() {
        let spec = ExecutionSpecBuilder::new("sh")
            .system_capabilities(SystemCapabilities::assume_all())
            .build()
            .unwrap();
        assert!(spec.executable().is_absolute());
        assert!(spec.executable().ends_with("sh"));
    }

    #[test]
    fn test_unknown_program_kept_for_exec() {
        let spec = ExecutionSpecBuilder::new("definitely_missing_cmd_xyz")
            .system_capabilities(SystemCapabilities::assume_all())
            .build()
            .unwrap();
        assert_eq!(spec.executable(), Path::new("definitely_missing_cmd_xyz"));
    }

    #[test]
    fn test_empty_program_rejected() {
        let err = ExecutionSpecBuilder::new("").build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_malformed_assignment_rejected() {
        let err = builder().assignment("NOEQUALS").build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_ambient_outside_bounding_rejected() {
        let err = builder()
            .bounding_set(CapabilitySet::Allow(vec!["CAP_CHOWN".into()]))
            .unwrap()
            .ambient_set(CapabilitySet::Allow(vec!["CAP_NET_ADMIN".into()]))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("CAP_NET_ADMIN"));
    }

    #[test]
    fn test_ambient_rejected_when_private_devices_drops_it() {
        let err = builder()
            .private_devices(true)
            .ambient_set(CapabilitySet::Allow(vec!["CAP_MKNOD".into()]))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_bounding_sets_merge() {
        let b = builder()
            .bounding_set(CapabilitySet::Allow(vec!["CAP_CHOWN".into()]))
            .unwrap()
            .bounding_set(CapabilitySet::Allow(vec!["CAP_KILL".into()]))
            .unwrap();
        match &b.config.capabilities.bounding_set {
            Some(CapabilitySet::Allow(names)) => {
                assert_eq!(names, &vec!["CAP_CHOWN".to_string(), "CAP_KILL".to_string()]);
            }
            other => panic!("unexpected set: {:?}", other),
        }
    }

    #[test]
    fn test_missing_features_reported() {
        let mut system = SystemCapabilities::assume_all();
        system.has_seccomp = false;
        let err = ExecutionSpecBuilder::new("/bin/true")
            .system_capabilities(system.clone())
            .syscall_filter(SyscallFilterConfig {
                mode: FilterMode::Deny,
                syscalls: vec!["uname".into()],
                violation: None,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfineError::FeatureNotAvailable(_)));

        system.has_seccomp = true;
        system.has_ambient_capabilities = false;
        let err = ExecutionSpecBuilder::new("/bin/true")
            .system_capabilities(system)
            .ambient_set(CapabilitySet::Allow(vec!["CAP_CHOWN".into()]))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfineError::FeatureNotAvailable(_)));
    }

    #[test]
    fn test_filter_errors_are_configuration_errors() {
        let err = builder()
            .syscall_filter(SyscallFilterConfig {
                mode: FilterMode::Allow,
                syscalls: vec!["uname:EPERM".into()],
                violation: None,
            })
            .build()
            .unwrap_err();
        assert!(err.is_configuration());

        let err = builder()
            .syscall_filter(SyscallFilterConfig {
                mode: FilterMode::Deny,
                syscalls: vec!["@no-such-group".into()],
                violation: Some(ViolationAction::Kill),
            })
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_protect_kernel_modules_adds_filter() {
        let spec = builder().protect_kernel_modules(true).build().unwrap();
        assert_eq!(spec.filter().program_count(), 1);
        assert!(spec.namespaces().mount);
        assert!(
            spec.privilege()
                .capabilities()
                .bounding_drop()
                .contains(&caps::Capability::CAP_SYS_MODULE)
        );
    }

    #[test]
    fn test_relative_paths_rejected() {
        let err = builder()
            .read_only_path(PathSpec::required("usr"))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());

        let err = builder().runtime_root("run").build().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_runtime_directory_below_root() {
        let spec = builder()
            .runtime_root("/tmp/confine-root")
            .runtime_directory(RuntimeDirectoryConfig {
                name: "svc".into(),
                group: None,
                mode: Some(0o700),
            })
            .build()
            .unwrap();
        assert_eq!(
            spec.runtime_directory().unwrap().path(),
            Path::new("/tmp/confine-root/svc")
        );
        assert_eq!(spec.state_dir(), Path::new("/tmp/confine-root/confine"));
    }

    #[test]
    fn test_unknown_user_rejected() {
        let err = builder()
            .user("no-such-user-confine-test")
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_pass_through_captured_at_build() {
        let name = "CONFINE_SPEC_PASS_THROUGH_TEST";
        unsafe { std::env::set_var(name, "before") };
        let spec = builder().pass_through(name).build().unwrap();
        unsafe { std::env::set_var(name, "after") };
        assert_eq!(
            spec.snapshot().vars(),
            &[(name.to_string(), "before".to_string())]
        );
        unsafe { std::env::remove_var(name) };
    }
}
