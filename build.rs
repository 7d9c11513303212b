use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    enforce_engine_domain_boundary();
}

fn enforce_engine_domain_boundary() {
    // The engine reports through the `log` facade only and never touches
    // files: dataset loading and logger setup belong to the caller.
    let forbidden = [
        ("std::fs", "file access"),
        ("File::open", "file access"),
        ("println!", "stdout output; use log::debug!/log::warn!"),
        ("eprintln!", "stderr output; use log::warn!"),
        ("dbg!", "debug output"),
        ("env_logger", "logger installation"),
        ("log::set_logger", "logger installation"),
        ("std::process::exit", "process termination"),
    ];

    let mut violations = Vec::new();
    let src_root = PathBuf::from("src");
    let mut stack = vec![src_root];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let rel = path.to_string_lossy().to_string();
            let src = match fs::read_to_string(&path) {
                Ok(s) => s,
                Err(_) => continue,
            };
            for (line_no, line) in src.lines().enumerate() {
                for (token, reason) in &forbidden {
                    if line.contains(token) {
                        violations.push(format!(
                            "{}:{} contains '{}' ({})",
                            rel,
                            line_no + 1,
                            token,
                            reason
                        ));
                    }
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nerror: engine/domain boundary violations detected in noise modules:");
        for v in violations {
            eprintln!("  - {v}");
        }
        panic!("noise engine modules must stay free of I/O and logger setup");
    }
}
