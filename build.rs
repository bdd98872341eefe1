use std::process::Command;

fn main() {
    // Priority: CI env var > git command > "unknown"
    let commit = std::env::var("BUILD_COMMIT").unwrap_or_else(|_| {
        Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    });

    let date = std::env::var("BUILD_DATE").unwrap_or_else(|_| {
        Command::new("date")
            .args(["+%Y-%m-%d"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    });

    println!("cargo:rustc-env=BUILD_COMMIT={}", commit);
    println!("cargo:rustc-env=BUILD_DATE={}", date);

    for trigger in [
        "cargo:rerun-if-changed=.git/HEAD",
        "cargo:rerun-if-env-changed=BUILD_COMMIT",
        "cargo:rerun-if-env-changed=BUILD_DATE",
    ] {
        println!("{}", trigger);
    }
}
