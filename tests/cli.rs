use assert_cmd::Command;
use predicates::str::contains;
use std::time::{SystemTime, UNIX_EPOCH};

#[test]
fn no_args_prints_banner_and_help() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_npuasm"));
    cmd.assert()
        .success()
        .stdout(contains("npuasm, version"))
        .stdout(contains("Usage: npuasm"))
        .stdout(contains("assemble"))
        .stdout(contains("inspect"));
}

#[test]
fn help_flag_prints_help() {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_npuasm"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("Relocatable-container assembler"))
        .stdout(contains("Usage: npuasm"));
}

#[test]
fn assemble_and_inspect_work() {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("npuasm-cli-{unique}"));
    std::fs::create_dir_all(&root).expect("failed to create temp root");

    let input = root.join("demo.asm");
    std::fs::write(
        &input,
        "start_job 7\nlocal_barrier 3\nlaunch_job 9\nend_job\nstart_job 9\neof\nbuf:\nword 0xAB\n",
    )
    .expect("failed to write input");

    let container = root.join("demo.npuobj");

    let mut assemble = Command::new(env!("CARGO_BIN_EXE_npuasm"));
    assemble
        .arg("assemble")
        .arg(&input)
        .arg("-o")
        .arg(&container)
        .assert()
        .success();
    assert!(container.exists());

    let mut inspect = Command::new(env!("CARGO_BIN_EXE_npuasm"));
    inspect
        .arg("inspect")
        .arg(&container)
        .assert()
        .success()
        .stdout(contains("[.ctrltext]"))
        .stdout(contains("[.ctrldata]"));
}

#[test]
fn shortcut_mode_uses_default_output_path() {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("npuasm-shortcut-{unique}"));
    std::fs::create_dir_all(&root).expect("failed to create temp root");

    let input = root.join("prog.asm");
    std::fs::write(&input, "start_job 1\nend_job\neof\n").expect("failed to write input");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_npuasm"));
    cmd.arg(&input).assert().success();
    assert!(root.join("prog.npuobj").exists());
}

#[test]
fn unknown_format_without_flag_fails() {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("npuasm-fmt-{unique}"));
    std::fs::create_dir_all(&root).expect("failed to create temp root");

    let input = root.join("blob.bin");
    std::fs::write(&input, [0u8; 4]).expect("failed to write input");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_npuasm"));
    cmd.arg(&input)
        .assert()
        .failure()
        .stderr(contains("cannot infer input format"));
}

#[test]
fn malformed_assembly_reports_error() {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("npuasm-bad-{unique}"));
    std::fs::create_dir_all(&root).expect("failed to create temp root");

    let input = root.join("bad.asm");
    std::fs::write(&input, "end_job\n").expect("failed to write input");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_npuasm"));
    cmd.arg(&input)
        .assert()
        .failure()
        .stderr(contains("'end_job' without an open job"));
}
