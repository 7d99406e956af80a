use std::process::Command;

const GIT_WATCH: [&str; 3] = ["../../.git/HEAD", "../../.git/refs/", "../../.git/packed-refs"];

fn main() {
    // release tarballs carry no .git; packagers pin the revision instead
    println!("cargo:rerun-if-env-changed=QUERYBEAT_BUILD_SHA");
    let sha = std::env::var("QUERYBEAT_BUILD_SHA")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(short_head)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=QUERYBEAT_GIT_SHA={}", sha.trim());

    for path in GIT_WATCH {
        println!("cargo:rerun-if-changed={path}");
    }
}

fn short_head() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}
