//! Privilege stage tests
//!
//! Each test forks a child that applies a plan and reports back through its
//! exit code. Identity and capability tests need root and are skipped
//! otherwise.

use confine_core::ExecConfig;
use confine_core::config::{CapabilityConfig, CapabilitySet, IdentityConfig};
use confine_core::util::is_root;
use confine_privilege::{CapabilityPlan, PrivilegePlan, ResolvedIdentity};

const SETUP_FAILED: i32 = 100;
const NOBODY: u32 = 65534;

fn run_with(plan: &PrivilegePlan, check: &dyn Fn() -> i32) -> i32 {
    unsafe {
        let pid = libc::fork();
        assert!(pid >= 0, "fork failed: {}", std::io::Error::last_os_error());

        if pid == 0 {
            if plan.apply().is_err() {
                libc::_exit(SETUP_FAILED);
            }
            libc::_exit(check());
        }

        let mut status: i32 = 0;
        assert_eq!(libc::waitpid(pid, &mut status, 0), pid);
        assert!(libc::WIFEXITED(status), "status=0x{:x}", status);
        libc::WEXITSTATUS(status)
    }
}

fn build(config: &ExecConfig) -> PrivilegePlan {
    let identity = ResolvedIdentity::resolve(&config.identity).expect("identity");
    let caps = CapabilityPlan::new(&config.capabilities, &[]).expect("capabilities");
    PrivilegePlan::new(config, &identity, caps).expect("plan")
}

fn require_root() -> bool {
    if !is_root() {
        eprintln!("Skipping: requires root");
        return false;
    }
    true
}

#[test]
fn working_directory_and_umask() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = std::fs::canonicalize(dir.path()).unwrap();
    let expected = confine_core::util::path_to_cstring(&canonical).unwrap();

    let mut config = ExecConfig::new("/bin/true");
    config.working_directory = Some(canonical.clone());
    config.umask = 0o077;
    let plan = build(&config);

    let code = run_with(&plan, &|| unsafe {
        let mut buf = [0u8; 4096];
        if libc::getcwd(buf.as_mut_ptr().cast(), buf.len()).is_null() {
            return 1;
        }
        let cwd = std::ffi::CStr::from_ptr(buf.as_ptr().cast());
        if cwd != expected.as_c_str() {
            return 2;
        }
        if libc::umask(0) != 0o077 {
            return 3;
        }
        0
    });
    assert_eq!(code, 0);
}

#[test]
fn missing_working_directory_fails() {
    let mut config = ExecConfig::new("/bin/true");
    config.working_directory = Some("/nonexistent-confine-dir".into());
    let plan = build(&config);
    assert_eq!(run_with(&plan, &|| 0), SETUP_FAILED);
}

#[test]
fn no_new_privileges_is_set() {
    let mut config = ExecConfig::new("/bin/true");
    config.no_new_privileges = true;
    let plan = build(&config);
    let code = run_with(&plan, &|| unsafe {
        if libc::prctl(libc::PR_GET_NO_NEW_PRIVS, 0, 0, 0, 0) == 1 { 0 } else { 1 }
    });
    assert_eq!(code, 0);
}

#[test]
fn drops_to_unprivileged_user() {
    if !require_root() {
        return;
    }
    let mut config = ExecConfig::new("/bin/true");
    config.identity = IdentityConfig {
        user: Some(NOBODY.to_string()),
        group: Some(NOBODY.to_string()),
        supplementary_groups: Vec::new(),
    };
    let plan = build(&config);

    let code = run_with(&plan, &|| unsafe {
        if libc::getuid() != NOBODY || libc::geteuid() != NOBODY {
            return 1;
        }
        if libc::getgid() != NOBODY {
            return 2;
        }
        // The old root uid must be unrecoverable.
        if libc::setuid(0) == 0 {
            return 3;
        }
        0
    });
    assert_eq!(code, 0);
}

#[test]
fn bounding_set_is_reduced() {
    if !require_root() {
        return;
    }
    let mut config = ExecConfig::new("/bin/true");
    config.capabilities = CapabilityConfig {
        bounding_set: Some(CapabilitySet::Allow(vec!["CAP_NET_BIND_SERVICE".into()])),
        ambient_set: None,
    };
    let plan = build(&config);

    let code = run_with(&plan, &|| unsafe {
        let admin = libc::prctl(libc::PR_CAPBSET_READ, 21, 0, 0, 0);
        let bind = libc::prctl(libc::PR_CAPBSET_READ, 10, 0, 0, 0);
        if admin == 0 && bind == 1 { 0 } else { 1 }
    });
    assert_eq!(code, 0);
}

#[test]
fn ambient_capability_survives_user_change() {
    if !require_root() {
        return;
    }
    if !confine_core::SystemCapabilities::detect().has_ambient_capabilities {
        eprintln!("Skipping: ambient capabilities not supported");
        return;
    }
    let mut config = ExecConfig::new("/bin/true");
    config.identity.user = Some(NOBODY.to_string());
    config.capabilities = CapabilityConfig {
        bounding_set: Some(CapabilitySet::Allow(vec!["CAP_NET_BIND_SERVICE".into()])),
        ambient_set: Some(CapabilitySet::Allow(vec!["CAP_NET_BIND_SERVICE".into()])),
    };
    let plan = build(&config);

    let code = run_with(&plan, &|| unsafe {
        let set = libc::prctl(
            libc::PR_CAP_AMBIENT,
            libc::PR_CAP_AMBIENT_IS_SET,
            10,
            0,
            0,
        );
        let keep = libc::prctl(libc::PR_GET_KEEPCAPS, 0, 0, 0, 0);
        if set == 1 && keep == 0 && libc::getuid() == NOBODY { 0 } else { 1 }
    });
    assert_eq!(code, 0);
}
