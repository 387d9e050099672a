//! Mount plan enforcement tests
//!
//! These tests require root (CAP_SYS_ADMIN) and are skipped otherwise.
//! Each test builds a plan in the parent, forks a child that applies it,
//! and checks the view from inside the child.

use std::ffi::CStr;
use std::path::Path;

use confine_core::config::{FilesystemConfig, PathSpec};
use confine_core::util::{is_root, path_to_cstring};
use confine_fs::{MountPlan, PrivateTmp};

const SETUP_FAILED: i32 = 100;

fn fork_with(plan: &MountPlan, check: &dyn Fn() -> i32) -> i32 {
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
        let ret = libc::waitpid(pid, &mut status, 0);
        assert_eq!(ret, pid);
        assert!(libc::WIFEXITED(status), "status=0x{:x}", status);
        libc::WEXITSTATUS(status)
    }
}

fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

fn exists(path: &CStr) -> bool {
    unsafe { libc::access(path.as_ptr(), libc::F_OK) == 0 }
}

fn require_root() -> bool {
    if !is_root() {
        eprintln!("Skipping: requires root");
        return false;
    }
    true
}

fn build(config: &FilesystemConfig, tmp: Option<&PrivateTmp>, state: &Path) -> MountPlan {
    MountPlan::from_config(config, tmp, state).expect("plan should build")
}

#[test]
fn private_tmp_hides_host_files() {
    if !require_root() {
        return;
    }
    let state = tempfile::tempdir().unwrap();
    let marker = tempfile::NamedTempFile::new_in("/tmp").unwrap();
    let marker_c = path_to_cstring(marker.path()).unwrap();

    let private = PrivateTmp::create().unwrap();
    let config = FilesystemConfig {
        private_tmp: true,
        ..Default::default()
    };
    let plan = build(&config, Some(&private), state.path());

    let code = fork_with(&plan, &|| {
        let fd = unsafe {
            libc::open(c"/tmp/confine-written".as_ptr(), libc::O_CREAT | libc::O_WRONLY, 0o644)
        };
        if fd < 0 || exists(&marker_c) {
            return 1;
        }
        0
    });
    assert_eq!(code, 0);
    assert!(private.tmp_dir().join("confine-written").exists());
    assert!(!Path::new("/tmp/confine-written").exists());
}

#[test]
fn read_only_path_rejects_writes() {
    if !require_root() {
        return;
    }
    let state = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let file = path_to_cstring(&target.path().join("new")).unwrap();

    let config = FilesystemConfig {
        read_only_paths: vec![PathSpec::required(target.path())],
        ..Default::default()
    };
    let plan = build(&config, None, state.path());

    let code = fork_with(&plan, &|| {
        let fd = unsafe { libc::open(file.as_ptr(), libc::O_CREAT | libc::O_WRONLY, 0o644) };
        if fd == -1 && errno() == libc::EROFS { 0 } else { 1 }
    });
    assert_eq!(code, 0);
}

#[test]
fn read_write_path_inside_read_only_tree() {
    if !require_root() {
        return;
    }
    let state = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let inner = target.path().join("writable");
    std::fs::create_dir(&inner).unwrap();
    let file = path_to_cstring(&inner.join("new")).unwrap();

    let config = FilesystemConfig {
        read_only_paths: vec![PathSpec::required(target.path())],
        read_write_paths: vec![PathSpec::required(&inner)],
        ..Default::default()
    };
    let plan = build(&config, None, state.path());

    let code = fork_with(&plan, &|| {
        let fd = unsafe { libc::open(file.as_ptr(), libc::O_CREAT | libc::O_WRONLY, 0o644) };
        if fd >= 0 { 0 } else { 1 }
    });
    assert_eq!(code, 0);
}

#[test]
fn inaccessible_path_is_empty() {
    if !require_root() {
        return;
    }
    let state = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    std::fs::write(target.path().join("secret"), b"x").unwrap();
    let secret = path_to_cstring(&target.path().join("secret")).unwrap();
    let dir = path_to_cstring(target.path()).unwrap();

    let config = FilesystemConfig {
        inaccessible_paths: vec![PathSpec::required(target.path())],
        ..Default::default()
    };
    let plan = build(&config, None, state.path());

    let code = fork_with(&plan, &|| {
        if exists(&secret) || !exists(&dir) {
            return 1;
        }
        0
    });
    assert_eq!(code, 0);
}

#[test]
fn missing_required_path_fails_optional_skipped() {
    if !require_root() {
        return;
    }
    let state = tempfile::tempdir().unwrap();

    let config = FilesystemConfig {
        read_only_paths: vec![PathSpec::optional("/nonexistent-confine-test")],
        ..Default::default()
    };
    let plan = build(&config, None, state.path());
    assert_eq!(fork_with(&plan, &|| 0), 0);

    let config = FilesystemConfig {
        read_only_paths: vec![PathSpec::required("/nonexistent-confine-test")],
        ..Default::default()
    };
    let plan = build(&config, None, state.path());
    assert_eq!(fork_with(&plan, &|| 0), SETUP_FAILED);
}

#[test]
fn private_devices_expose_only_pseudo_devices() {
    if !require_root() {
        return;
    }
    let state = tempfile::tempdir().unwrap();
    // Any host block device, if there is one, must disappear.
    let block = std::fs::read_dir("/dev")
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| {
            use std::os::unix::fs::FileTypeExt;
            e.file_type().map(|t| t.is_block_device()).unwrap_or(false)
        })
        .map(|e| path_to_cstring(&e.path()).unwrap());

    let config = FilesystemConfig {
        private_devices: true,
        ..Default::default()
    };
    let plan = build(&config, None, state.path());

    let code = fork_with(&plan, &|| {
        if !exists(c"/dev/null") || !exists(c"/dev/urandom") {
            return 1;
        }
        if let Some(block) = &block
            && exists(block)
        {
            return 2;
        }
        0
    });
    assert_eq!(code, 0);
}
