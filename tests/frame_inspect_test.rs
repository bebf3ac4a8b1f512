use predicates::prelude::*;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;
use zip::ZipWriter;
use zip::write::FileOptions;

const DOCUMENT: &str = r#"<?xml version='1.0' encoding='utf-8'?>
<Document SchemaVersion="4">
    <Properties Count="3">
        <Property name="Company" type="App::PropertyString" status="0">
            <String value="Acme Framing"/>
        </Property>
        <Property name="Label" type="App::PropertyString" status="0">
            <String value="Barn"/>
        </Property>
        <Property name="Meta" type="App::PropertyMap" status="0">
            <Map count="1">
                <Item key="Project" value="Barn"/>
            </Map>
        </Property>
    </Properties>
    <Objects Count="5">
        <ObjectDeps Name="Roof" Count="2">
            <Dep Name="Rafter_L_1"/>
            <Dep Name="Rafter_R_1"/>
        </ObjectDeps>
        <Object type="Part::Box" name="Footing_1" id="0"/>
        <Object type="Part::Box" name="Rafter_L_1" id="1"/>
        <Object type="Part::Box" name="Rafter_R_1" id="2"/>
        <Object type="Sketcher::SketchObject" name="Sketch" id="3"/>
        <Object type="App::DocumentObjectGroup" name="Roof" id="4"/>
    </Objects>
</Document>
"#;

fn write_container(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create container");
    let mut zip = ZipWriter::new(file);
    for (name, bytes) in entries {
        zip.start_file(*name, FileOptions::default())
            .expect("start entry");
        zip.write_all(bytes).expect("write entry");
    }
    zip.finish().expect("finish container");
}

fn frame_patch(root: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("frame-patch");
    cmd.current_dir(root)
        .env("HOME", root)
        .env("XDG_CONFIG_HOME", root.join("xdg"))
        .env("FRAME_PATCH_HOME", root)
        .env("FRAME_PATCH_SCRATCH_DIR", root.join("scratch"))
        .env_remove("FRAME_PATCH_CONFIG");
    cmd
}

#[test]
fn inspect_reports_properties_categories_and_groups() {
    let tmp = tempdir().expect("tempdir");
    let source = tmp.path().join("barn.FCStd");
    write_container(&source, &[("Document.xml", DOCUMENT.as_bytes())]);
    let before = fs::read(&source).expect("read source");

    frame_patch(tmp.path())
        .arg("inspect")
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("inspect ok"))
        .stdout(predicate::str::contains("property Company=Acme Framing"))
        .stdout(predicate::str::contains("property CreatedBy absent"))
        .stdout(predicate::str::contains("meta Project=Barn"))
        .stdout(predicate::str::contains("objects=5"))
        .stdout(predicate::str::contains("category foundation=1"))
        .stdout(predicate::str::contains("category roof=2"))
        .stdout(predicate::str::contains("unclassified=Sketch"))
        .stdout(predicate::str::contains(
            "group Roof id=4 children=Rafter_L_1,Rafter_R_1",
        ));

    assert_eq!(fs::read(&source).expect("reread source"), before);
}

#[test]
fn inspect_fails_on_malformed_document() {
    let tmp = tempdir().expect("tempdir");
    let source = tmp.path().join("broken.FCStd");
    write_container(
        &source,
        &[("Document.xml", b"<Document><Objects></Document>".as_slice())],
    );

    frame_patch(tmp.path())
        .arg("inspect")
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("stage `load` failed"));
}
