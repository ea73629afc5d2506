use std::{env, process::Command};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let revision = command_stdout("git", &["rev-parse", "--short", "HEAD"])
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "unknown".into());
    let tree = match command_stdout("git", &["status", "--porcelain"]) {
        Some(status) if status.is_empty() => "clean",
        Some(_) => "dirty",
        None => "unknown",
    };
    let built_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let entries = [
        ("HASH", revision),
        ("STATUS", tree.to_string()),
        ("TIMESTAMP", built_at),
        ("TARGET", env::var("TARGET").unwrap_or_else(|_| "unknown".into())),
        ("PROFILE", env::var("PROFILE").unwrap_or_else(|_| "unknown".into())),
        (
            "RUSTC",
            command_stdout("rustc", &["--version"]).unwrap_or_else(|| "unknown".into()),
        ),
    ];
    for (key, value) in entries {
        println!("cargo:rustc-env=FINLEDGER_BUILD_{key}={value}");
    }
}

fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|text| text.trim().to_string())
}
