#[cfg(target_os = "windows")]
use std::path::PathBuf;

fn main() {
    #[cfg(target_os = "windows")]
    {
        // FFmpeg DLLs must sit next to the produced binaries for ac-ffmpeg to load
        let ffmpeg_bin = PathBuf::from("third_party/ffmpeg/bin");
        let Ok(out_dir) = std::env::var("OUT_DIR").map(PathBuf::from) else {
            println!("cargo:warning=OUT_DIR not set, skipping FFmpeg DLL copy");
            return;
        };
        // OUT_DIR is target/<profile>/build/<crate>/out
        let Some(target_dir) = out_dir.ancestors().nth(3) else {
            println!("cargo:warning=Cannot resolve target dir from {}", out_dir.display());
            return;
        };

        match std::fs::read_dir(&ffmpeg_bin) {
            Ok(entries) => {
                for path in entries.flatten().map(|entry| entry.path()) {
                    if !is_required_ffmpeg_dll(&path) {
                        continue;
                    }
                    let Some(file_name) = path.file_name() else {
                        continue;
                    };
                    let dest = target_dir.join(file_name);
                    if !dest.exists() || file_modified(&path) > file_modified(&dest) {
                        if let Err(e) = std::fs::copy(&path, &dest) {
                            panic!("Failed to copy {:?} -> {:?}: {}", path, dest, e);
                        }
                        println!("cargo:warning=Copied {} to output dir", path.display());
                    }
                }
                println!("cargo:rustc-link-search=native={}", ffmpeg_bin.display());
            }
            Err(_) => {
                println!(
                    "cargo:warning=FFmpeg DLLs not found at {}",
                    ffmpeg_bin.display()
                );
            }
        }

        println!("cargo:rerun-if-changed=third_party/ffmpeg/bin");
    }
}

#[cfg(target_os = "windows")]
fn file_modified(path: &std::path::Path) -> std::time::SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

/// Only the libraries the decode path links against: demux, decode, scale, resample.
#[cfg(target_os = "windows")]
fn is_required_ffmpeg_dll(path: &std::path::Path) -> bool {
    const REQUIRED_DLL_PREFIXES: &[&str] = &[
        "avcodec-",
        "avformat-",
        "avutil-",
        "swresample-",
        "swscale-",
    ];

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let lower = file_name.to_ascii_lowercase();
    lower.ends_with(".dll") && REQUIRED_DLL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}
