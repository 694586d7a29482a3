use assert_cmd::cargo::cargo_bin_cmd;
use doc_model::{Annotation, AnnotationKind, Color, DocumentStore, Frame, ShapeMark};
use pdf_engine::{blank_document, PageSize};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

fn write_pdf(dir: &Path, name: &str, sizes: &[(f32, f32)]) -> PathBuf {
    let sizes: Vec<PageSize> = sizes
        .iter()
        .map(|&(width_pt, height_pt)| PageSize { width_pt, height_pt })
        .collect();
    let path = dir.join(name);
    fs::write(&path, blank_document(&sizes).expect("blank document")).expect("write pdf");
    path
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should contain valid json")
}

#[test]
fn info_emits_stable_json_contract() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "two.pdf", &[(612.0, 792.0), (300.0, 200.0)]);

    let output = cargo_bin_cmd!("pagemark-cli").arg("info").arg(&pdf).assert().success();
    let value = stdout_json(output.get_output());

    assert_eq!(value["page_count"], 2);
    assert_eq!(value["pages"][0]["width"], 612.0);
    assert_eq!(value["pages"][0]["height"], 792.0);
    assert_eq!(value["pages"][1]["width"], 300.0);
    assert_eq!(value["pages"][1]["height"], 200.0);
}

#[test]
fn info_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("pagemark-cli")
        .arg("info")
        .arg(temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("invalid.pdf");
    fs::write(&path, b"this is not a pdf").expect("write");

    cargo_bin_cmd!("pagemark-cli")
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn init_then_bake_produces_a_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "source.pdf", &[(612.0, 792.0), (612.0, 792.0)]);
    let project = temp.path().join("project.json");
    let baked = temp.path().join("out/baked.pdf");

    let init = cargo_bin_cmd!("pagemark-cli")
        .arg("init")
        .arg(&pdf)
        .arg("--output")
        .arg(&project)
        .assert()
        .success();
    assert_eq!(stdout_json(init.get_output())["page_count"], 2);

    let state = storage::read_project(&project).expect("project should load");
    let mut store = DocumentStore::from_state(state).expect("valid state");
    store
        .add(Annotation::new(
            1,
            AnnotationKind::Rect(ShapeMark {
                frame: Frame::new(10.0, 10.0, 20.0, 20.0),
                color: Color::RED,
                fill_color: None,
                stroke_width: 2.0,
                opacity: 1.0,
            }),
        ))
        .expect("page exists");
    storage::write_project(&project, &store.snapshot()).expect("project should save");

    let bake = cargo_bin_cmd!("pagemark-cli")
        .arg("bake")
        .arg(&project)
        .arg("--output")
        .arg(&baked)
        .assert()
        .success();
    let report = stdout_json(bake.get_output());
    assert_eq!(report["report"]["pages"], 2);
    assert_eq!(report["report"]["drawn"], 1);
    assert_eq!(report["report"]["skipped"], Value::Array(Vec::new()));

    let info = cargo_bin_cmd!("pagemark-cli").arg("info").arg(&baked).assert().success();
    assert_eq!(stdout_json(info.get_output())["page_count"], 2);
}

#[test]
fn bake_rejects_corrupt_project() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "source.pdf", &[(612.0, 792.0)]);
    let project = temp.path().join("project.json");
    let baked = temp.path().join("baked.pdf");

    cargo_bin_cmd!("pagemark-cli")
        .arg("init")
        .arg(&pdf)
        .arg("--output")
        .arg(&project)
        .assert()
        .success();

    let mut state = storage::read_project(&project).expect("project should load");
    let rect = Annotation::new(
        0,
        AnnotationKind::Rect(ShapeMark {
            frame: Frame::new(10.0, 10.0, 20.0, 20.0),
            color: Color::RED,
            fill_color: None,
            stroke_width: 2.0,
            opacity: 1.0,
        }),
    );
    state.annotations.push(rect.clone());
    state.annotations.push(rect);
    storage::write_project(&project, &state).expect("project should save");

    cargo_bin_cmd!("pagemark-cli")
        .arg("bake")
        .arg(&project)
        .arg("--output")
        .arg(&baked)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is corrupt"))
        .stderr(predicate::str::contains("duplicate annotation id"));
    assert!(!baked.exists());
}

#[test]
fn bake_rejects_invalid_config() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "source.pdf", &[(612.0, 792.0)]);
    let project = temp.path().join("project.json");
    let config = temp.path().join("config.json");
    fs::write(&config, r#"{ "export": { "supersample": 0.0 } }"#).expect("write config");

    cargo_bin_cmd!("pagemark-cli")
        .arg("init")
        .arg(&pdf)
        .arg("--output")
        .arg(&project)
        .assert()
        .success();

    cargo_bin_cmd!("pagemark-cli")
        .arg("bake")
        .arg(&project)
        .arg("--output")
        .arg(temp.path().join("out.pdf"))
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn text_lists_regions_of_a_blank_page() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "blank.pdf", &[(612.0, 792.0)]);

    let output = cargo_bin_cmd!("pagemark-cli")
        .arg("text")
        .arg(&pdf)
        .arg("--page")
        .arg("1")
        .assert()
        .success();

    assert_eq!(stdout_json(output.get_output()), Value::Array(Vec::new()));
}

#[test]
fn text_rejects_page_zero() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "blank.pdf", &[(612.0, 792.0)]);

    cargo_bin_cmd!("pagemark-cli")
        .arg("text")
        .arg(&pdf)
        .arg("--page")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("1-based"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("pagemark-cli")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
