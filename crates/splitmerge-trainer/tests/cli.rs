use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

const TREEBANK: &str = "
(ROOT (S (NP (DT the) (NN dog)) (VP (VBZ barks))))
(ROOT (S (NP (DT a) (NN cat)) (VP (VBZ sleeps))))
(ROOT (S (NP (DT the) (NN cat)) (VP (VBZ barks))))
(ROOT (S (NP (DT a) (NN dog)) (VP (VBZ sleeps))))
";

fn temp_workspace() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

#[test]
fn train_writes_phase_and_final_checkpoints() {
    let workspace = temp_workspace();
    let train_path = workspace.path().join("train.mrg");
    fs::write(&train_path, TREEBANK).expect("write treebank");
    let out = workspace.path().join("grammar");

    let mut train = Command::cargo_bin("train").expect("binary exists");
    train
        .args(["--out", out.to_str().unwrap()])
        .args(["--train", train_path.to_str().unwrap()])
        .args(["--rounds", "1"])
        .args(["--split-min-it", "1", "--split-max-it", "1"])
        .args(["--merge-min-it", "1", "--merge-max-it", "1"])
        .args(["--smooth-max-it", "1"])
        .assert()
        .success();

    for name in ["grammar_1_splitting", "grammar_1_merging", "grammar_1_smoothing", "grammar"] {
        assert!(workspace.path().join(name).exists(), "{name} was written");
    }
}

#[test]
fn train_requires_an_output_path() {
    let workspace = temp_workspace();
    let train_path = workspace.path().join("train.mrg");
    fs::write(&train_path, TREEBANK).expect("write treebank");

    Command::cargo_bin("train")
        .expect("binary exists")
        .args(["--train", train_path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn train_reports_unreadable_treebank() {
    let workspace = temp_workspace();
    let out = workspace.path().join("grammar");

    Command::cargo_bin("train")
        .expect("binary exists")
        .args(["--out", out.to_str().unwrap()])
        .args(["--train", workspace.path().join("nope.mrg").to_str().unwrap()])
        .assert()
        .failure();
    assert!(!out.exists());
}
