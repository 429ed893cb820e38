use std::env;
use std::path::PathBuf;

const WATCHED: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"];

fn warn(message: impl AsRef<str>) {
    println!("cargo:warning={}", message.as_ref());
}

/// Location of a vcpkg FFmpeg install for the configured triplet.
fn vcpkg_ffmpeg_dir(root: &str) -> PathBuf {
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    PathBuf::from(root).join("installed").join(triplet)
}

fn main() {
    for variable in WATCHED {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // Only Windows builds lack a pkg-config route to the FFmpeg libraries.
    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows" || env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    let Ok(root) = env::var("VCPKG_ROOT") else {
        warn("framecodec links FFmpeg: set FFMPEG_DIR, or VCPKG_ROOT with a vcpkg FFmpeg install.");
        return;
    };

    let ffmpeg_dir = vcpkg_ffmpeg_dir(&root);
    if !ffmpeg_dir.exists() {
        warn(format!("No vcpkg FFmpeg found under {}.", ffmpeg_dir.display()));
        return;
    }

    warn(format!(
        "Using vcpkg FFmpeg at {0}; set FFMPEG_DIR={0} to skip this probe.",
        ffmpeg_dir.display()
    ));
    if env::var_os("VCPKGRS_DYNAMIC").is_none() {
        warn("Dynamic vcpkg FFmpeg builds also need VCPKGRS_DYNAMIC=1.");
    }
}
