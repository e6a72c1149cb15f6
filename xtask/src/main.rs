use flate2::{Compression, write::GzEncoder};
use sha2::{Digest, Sha256};
use std::{
    env,
    fs,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::Command,
};


const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

const BINARY_TARGETS: [&str; 2] = [
    "tdcstream",
    "correlate",
];

type DynError = Box<dyn std::error::Error>;

fn main() -> Result<(), DynError> {
    let task = env::args().nth(1);
    let target = env::args().nth(2);
    match task.as_deref() {
        Some("dist") => dist(target.as_deref())?,
        _ => help(),
    }
    Ok(())
}

fn help() {
    eprintln!(
        r#"Tasks:

dist [TARGET]   build release binaries (with chip support on linux) and package
    "#)
}

fn dist(target: Option<&str>) -> Result<(), DynError> {
    let _ = fs::remove_dir_all(&dist_tmp_dir());
    fs::create_dir_all(&dist_tmp_dir())?;
    fs::create_dir_all(&dist_dir())?;

    dist_binary(target)?;

    Ok(())
}

fn host_target() -> String {
    format!("{}-{}", env::consts::ARCH, env::consts::OS)
}

fn dist_binary(target: Option<&str>) -> Result<(), DynError> {
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut args = vec!["build", "--release"];
    // spidev and the GPIO character device only exist on linux
    let linux = match target {
        Some(t) => t.contains("linux"),
        None => cfg!(target_os = "linux"),
    };
    if linux {
        args.extend_from_slice(&["--features", "tdcstream/hardware"]);
    }
    if let Some(t) = target {
        args.extend_from_slice(&["--target", t]);
    }
    let build_status = Command::new(cargo)
        .current_dir(project_root())
        .args(&args)
        .status()?;
    if !build_status.success() {
        return Err("cargo build failed".into());
    }

    let release_dir = match target {
        Some(t) => project_root().join("target").join(t).join("release"),
        None => project_root().join("target/release"),
    };
    for binary in BINARY_TARGETS {
        let mut bin = release_dir.join(binary);
        let mut dst = dist_tmp_dir().join(binary);
        if cfg!(windows) {
            bin.set_extension("exe");
            dst.set_extension("exe");
        }
        fs::copy(&bin, &dst)
            .map_err(|e| format!("cannot copy {}: {}", bin.display(), e))?;
        println!("{} copied to distdir", binary);
    }

    let filename = format!(
        "gpx2-readout-{}-{}.tar.gz",
        GIT_VERSION,
        target.map(String::from).unwrap_or_else(host_target),
    );
    let filepath = dist_dir().join(&filename);
    {
        let tar_gz = fs::File::create(&filepath)?;
        let enc = GzEncoder::new(tar_gz, Compression::default());
        let mut tar = tar::Builder::new(enc);
        tar.append_dir_all("gpx2-readout", dist_tmp_dir())?;
        tar.finish()?;
    }
    println!("tarball prepared");

    update_checksums(&filepath, &filename)?;
    println!("SHA256 checksum prepared");

    fs::remove_dir_all(dist_tmp_dir())?;
    println!("dist_tmp dir cleanup");
    Ok(())
}

/// Record the checksum of `filepath` in the SHA256 file of the dist dir,
/// replacing any earlier entry for the same tarball
fn update_checksums(filepath: &Path, filename: &str) -> Result<(), DynError> {
    let sha256path = dist_dir().join("SHA256");
    let mut tar_gz = fs::File::open(filepath)?;
    let mut sha256 = Sha256::new();
    io::copy(&mut tar_gz, &mut sha256)?;
    let checksum = format!("{:x}", sha256.finalize());

    let mut all_checksums = String::new();
    if let Ok(sha256file) = fs::File::open(&sha256path) {
        let buf = BufReader::new(sha256file);
        for line in buf.lines() {
            let text = line?;
            if !text.contains(filename) {
                all_checksums.push_str(&text);
                all_checksums.push('\n');
            }
        }
    }
    all_checksums.push_str(&checksum);
    all_checksums.push_str("  ");
    all_checksums.push_str(filename);
    all_checksums.push('\n');

    let mut buf = BufWriter::new(fs::File::create(sha256path)?);
    buf.write_all(all_checksums.as_bytes())?;
    buf.flush()?;
    Ok(())
}

fn project_root() -> PathBuf {
    Path::new(&env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(1)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn dist_tmp_dir() -> PathBuf {
    project_root().join("target/dist_tmp")
}

fn dist_dir() -> PathBuf {
    project_root().join("target/dist")
}
