//! Synthetic packages describing the capabilities of the host.
//!
//! Virtual packages let repository metadata depend on host properties: the OS
//! family, the CPU architecture, the available CUDA driver, and the system
//! libc. They are fed to the solver as already-installed packages and are
//! never fetched or linked.
//!
//! Every probe can be overridden through an environment variable
//! (`PANGOLIN_OVERRIDE_*`), which is how cross-platform solves and tests pin
//! the host description. An override set to an empty string disables the
//! corresponding package.

use std::mem::MaybeUninit;
use std::os::raw::{c_int, c_uint, c_ulong};

use libloading::{Library, Symbol};
use pangolin_types::{PackageInfo, PackageType};

/// The placeholder checksum carried by every virtual package.
const VIRTUAL_PACKAGE_MD5: &str = "12345678901234567890123456789012";

/// Environment variable that overrides the probed OS version.
pub const OVERRIDE_OS_VERSION_VAR: &str = "PANGOLIN_OVERRIDE_OS_VERSION";

/// Environment variable that overrides the probed CUDA driver version.
pub const OVERRIDE_CUDA_VERSION_VAR: &str = "PANGOLIN_OVERRIDE_CUDA";

/// Environment variable that overrides the probed glibc version.
pub const OVERRIDE_GLIBC_VERSION_VAR: &str = "PANGOLIN_OVERRIDE_GLIBC";

/// Returns the platform tag of the host, e.g. `linux-64`.
pub fn host_platform() -> String {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "osx",
        "windows" => "win",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "64",
        "x86" => "32",
        "aarch64" if os == "osx" => "arm64",
        other => other,
    };
    format!("{os}-{arch}")
}

fn make_virtual_package(name: &str, version: &str, build_string: &str) -> PackageInfo {
    let version = if version.is_empty() { "0" } else { version };
    let build_string = if build_string.is_empty() {
        "0"
    } else {
        build_string
    };
    PackageInfo {
        name: name.to_string(),
        version: version.to_string(),
        build_string: build_string.to_string(),
        build_number: 0,
        channel: String::from("@"),
        subdir: host_platform(),
        file_name: name.to_string(),
        url: String::new(),
        size: 0,
        timestamp: 0,
        md5: Some(String::from(VIRTUAL_PACKAGE_MD5)),
        sha256: None,
        depends: Vec::new(),
        constrains: Vec::new(),
        license: None,
        package_type: PackageType::VirtualSystem,
    }
}

/// Reads an override variable: unset means "probe the host", an empty value
/// disables the probe, anything else is the version to advertise.
fn override_version(var: &str) -> Option<Option<String>> {
    match std::env::var(var) {
        Ok(value) if value.is_empty() => Some(None),
        Ok(value) => Some(Some(value)),
        Err(_) => None,
    }
}

/// Returns the version to advertise for the host OS package.
fn os_version() -> String {
    override_version(OVERRIDE_OS_VERSION_VAR)
        .flatten()
        .unwrap_or_default()
}

/// The dynamic library names and paths the CUDA driver may be found under.
fn cuda_library_paths() -> &'static [&'static str] {
    if cfg!(windows) {
        &["nvcuda.dll"]
    } else if cfg!(target_os = "macos") {
        &["libcuda.dylib", "/usr/local/cuda/lib/libcuda.dylib"]
    } else {
        &[
            "libcuda.so.1",
            "libcuda.so",
            "/usr/lib64/nvidia/libcuda.so.1",
            "/usr/lib/x86_64-linux-gnu/libcuda.so.1",
            "/usr/lib/wsl/lib/libcuda.so.1",
        ]
    }
}

/// Queries the CUDA driver for the maximum CUDA version it supports, by
/// loading the driver library and calling `cuInit`/`cuDriverGetVersion`.
/// Returns `None` when no driver is present or the query fails.
fn detect_cuda_version() -> Option<String> {
    let cuda_library = cuda_library_paths()
        .iter()
        .find_map(|path| unsafe { Library::new(*path).ok() })?;

    let cu_init: Symbol<'_, unsafe extern "C" fn(c_uint) -> c_ulong> =
        unsafe { cuda_library.get(b"cuInit\0") }.ok()?;
    let cu_driver_get_version: Symbol<'_, unsafe extern "C" fn(*mut c_int) -> c_ulong> =
        unsafe { cuda_library.get(b"cuDriverGetVersion\0") }.ok()?;

    if unsafe { cu_init(0) } != 0 {
        tracing::warn!("failed to initialize the CUDA driver API");
        return None;
    }

    let mut version = MaybeUninit::uninit();
    if unsafe { cu_driver_get_version(version.as_mut_ptr()) } != 0 {
        tracing::warn!("failed to query the CUDA driver version");
        return None;
    }
    let version = unsafe { version.assume_init() };

    Some(format!("{}.{}", version / 1000, (version % 1000) / 10))
}

/// The CUDA driver version to advertise, honoring the override variable.
fn cuda_version() -> Option<String> {
    match override_version(OVERRIDE_CUDA_VERSION_VAR) {
        Some(overridden) => overridden,
        None => detect_cuda_version(),
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn detect_glibc_version() -> Option<String> {
    extern "C" {
        fn gnu_get_libc_version() -> *const std::os::raw::c_char;
    }
    let version = unsafe { std::ffi::CStr::from_ptr(gnu_get_libc_version()) };
    version.to_str().ok().map(String::from)
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn detect_glibc_version() -> Option<String> {
    None
}

/// The glibc version to advertise, honoring the override variable. `None` on
/// hosts that do not run glibc.
fn glibc_version() -> Option<String> {
    match override_version(OVERRIDE_GLIBC_VERSION_VAR) {
        Some(overridden) => overridden,
        None => detect_glibc_version(),
    }
}

/// The virtual packages describing the OS family and CPU architecture of the
/// host.
pub fn dist_packages() -> Vec<PackageInfo> {
    let mut res = Vec::new();
    if cfg!(windows) {
        res.push(make_virtual_package("__win", &os_version(), ""));
    }
    if cfg!(unix) {
        res.push(make_virtual_package("__unix", "", ""));
    }
    if cfg!(target_os = "linux") {
        res.push(make_virtual_package("__linux", &os_version(), ""));
    }
    if cfg!(target_os = "macos") {
        res.push(make_virtual_package("__osx", &os_version(), ""));
    }
    res.push(make_virtual_package(
        "__archspec",
        "1",
        std::env::consts::ARCH,
    ));
    res
}

/// Probes the host and returns every virtual package describing it: the OS
/// family and architecture, the glibc version, and the CUDA driver version
/// when a driver is installed.
pub fn get_virtual_packages() -> Vec<PackageInfo> {
    let mut res = dist_packages();
    if let Some(glibc) = glibc_version() {
        res.push(make_virtual_package("__glibc", &glibc, ""));
    }
    if let Some(cuda) = cuda_version() {
        res.push(make_virtual_package("__cuda", &cuda, ""));
    }
    tracing::debug!(
        "virtual packages: {:?}",
        res.iter().map(ToString::to_string).collect::<Vec<_>>()
    );
    res
}
