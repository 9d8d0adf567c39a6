use std::process::Command;

fn main() {
    // Outside a git checkout the binary reports "unknown".
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match commit {
        Some(commit) => println!("cargo:rustc-env=GIT_COMMIT={commit}"),
        None => println!("cargo:warning=git commit unavailable, version reports unknown"),
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}
