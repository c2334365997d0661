//! Integration tests running the resolvecheck binary against a temp project.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const SCENARIOS: [&str; 3] = ["NoExport/Gradle", "NoExport/Internal", "Export/Gradle"];

/// Picks the fixture tree matching the current build settings and copies it
/// into the output directory.
const RESOLVE_SCRIPT: &str = r#"set -e
system=$(sed -n 's/^buildSystem: //p' "$RESOLVECHECK_SETTINGS")
export_flag=$(sed -n 's/^exportAndroidProject: //p' "$RESOLVECHECK_SETTINGS")
if [ "$export_flag" = "true" ]; then layout=Export; else layout=NoExport; fi
if [ "$system" = "gradle" ]; then flavor=Gradle; else flavor=Internal; fi
grep -q "artifact: support-annotations" "$RESOLVECHECK_DEPENDENCIES"
mkdir -p "$RESOLVECHECK_OUTPUT_DIR"
cp -R "fixtures/$layout/$flavor/." "$RESOLVECHECK_OUTPUT_DIR/"
"#;

fn resolvecheck_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_resolvecheck"))
}

fn write_zip(path: &Path, entries: &[(&str, &str)], stored: bool) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let method = if stored {
        zip::CompressionMethod::Stored
    } else {
        zip::CompressionMethod::Deflated
    };
    let options = SimpleFileOptions::default().compression_method(method);
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, contents) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Lay out expected trees and resolver fixtures with the same logical
/// contents but differently packed archives.
fn project(extra_config: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    for scenario in SCENARIOS {
        let classes = format!("classes for {scenario}");
        let entries = [("classes.jar", classes.as_str()), ("R.txt", "int id a 0x1")];

        let expected = root.join("ExpectedArtifacts").join(scenario);
        write_zip(&expected.join("support-annotations-26.1.0.aar"), &entries, false);
        fs::write(expected.join("resolved.txt"), scenario).unwrap();
        fs::write(expected.join("support-annotations-26.1.0.aar.meta"), "guid: 1").unwrap();

        let fixture = root.join("fixtures").join(scenario);
        let mut reversed = entries;
        reversed.reverse();
        write_zip(&fixture.join("support-annotations-26.1.0.aar"), &reversed, true);
        fs::write(fixture.join("resolved.txt"), scenario).unwrap();
    }

    fs::write(root.join("resolve.sh"), RESOLVE_SCRIPT).unwrap();
    fs::write(
        root.join("resolvecheck.yaml"),
        format!(
            r#"version: 1
resolver:
  cmd: sh
  args: ["resolve.sh"]
  timeout: 60
{extra_config}"#
        ),
    )
    .unwrap();
    dir
}

fn run(project: &Path, args: &[&str]) -> Output {
    resolvecheck_cmd()
        .arg("run")
        .arg(project)
        .args(args)
        .output()
        .unwrap()
}

fn describe(output: &Output) -> String {
    format!(
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

fn json_report(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| panic!("{e}\n{}", describe(output)))
}

#[test]
fn matching_project_passes_every_scenario() {
    let dir = project("");

    let output = run(dir.path(), &[]);

    assert!(output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    for name in [
        "SetupDependencies",
        "ResolveForGradleBuildSystem",
        "ResolveForInternalBuildSystem",
        "ResolveForGradleBuildSystemAndExport",
    ] {
        assert!(stdout.contains(&format!("✓ {name} (")), "{stdout}");
        assert!(stderr.contains(&format!("{name}: PASSED")), "{stderr}");
    }
    assert!(stdout.contains("4 passed, 0 failed, 0 skipped"));
    assert!(stderr.contains("Test run PASSED"));
}

#[test]
fn changed_archive_contents_fail_the_run() {
    let dir = project("");
    write_zip(
        &dir.path()
            .join("fixtures/Export/Gradle/support-annotations-26.1.0.aar"),
        &[("classes.jar", "different classes"), ("R.txt", "int id a 0x1")],
        true,
    );

    let output = run(dir.path(), &["--output", "json"]);

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    let report = json_report(&output);
    assert_eq!(report["passed"], false);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[1]["verdict"], "PASSED");
    let export = &results[3];
    assert_eq!(export["name"], "ResolveForGradleBuildSystemAndExport");
    assert_eq!(export["verdict"], "FAILED");
    let messages = export["error_messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    let message = messages[0].as_str().unwrap();
    assert!(message.starts_with("Archive"), "{message}");
    assert!(message.contains("classes.jar"), "{message}");
}

#[test]
fn unavailable_build_system_is_skipped() {
    let dir = project("build_systems: [gradle]\n");

    let output = run(dir.path(), &["--output", "json"]);

    assert!(output.status.success(), "{}", describe(&output));
    let report = json_report(&output);
    let internal = &report["results"][2];
    assert_eq!(internal["name"], "ResolveForInternalBuildSystem");
    assert_eq!(internal["verdict"], "SKIPPED");
    assert_eq!(internal["skipped"], true);
}

#[test]
fn locked_export_setting_fails_every_resolution() {
    let dir = project("locked_settings: [exportAndroidProject]\n");

    let output = run(dir.path(), &["--output", "json"]);

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    let report = json_report(&output);
    let results = report["results"].as_array().unwrap();
    // Every resolution scenario sets the export flag, so each one fails the read-back.
    for result in &results[1..] {
        assert_eq!(result["verdict"], "FAILED");
        let message = result["error_messages"][0].as_str().unwrap();
        assert!(message.starts_with("exportAndroidProject is unset"), "{message}");
    }
    assert_eq!(results[0]["verdict"], "PASSED");
}

#[test]
fn resolver_failure_is_reported_first() {
    let dir = project("");
    fs::write(dir.path().join("resolve.sh"), "exit 2\n").unwrap();

    let output = run(dir.path(), &["--output", "json"]);

    assert_eq!(output.status.code(), Some(1));
    let report = json_report(&output);
    let gradle = &report["results"][1]["error_messages"];
    assert!(
        gradle[0]
            .as_str()
            .unwrap()
            .starts_with("Resolution failed")
    );
    assert!(
        gradle
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m.as_str().unwrap().starts_with("Missing expected artifact"))
    );
}

#[test]
fn junit_output_lists_every_test_case() {
    let dir = project("build_systems: [gradle]\n");

    let output = run(dir.path(), &["--output", "junit"]);

    assert!(output.status.success(), "{}", describe(&output));
    let xml = String::from_utf8_lossy(&output.stdout);
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("tests=\"4\" failures=\"0\" skipped=\"1\""), "{xml}");
    assert!(xml.contains("<testcase name=\"ResolveForGradleBuildSystem\""));
    assert!(xml.contains("<skipped message="));
}

#[test]
fn failing_environment_setup_stops_before_any_test() {
    let dir = project(
        r#"setup:
  - run:
      cmd: "false"
"#,
    );

    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("environment did not become ready"), "{stderr}");
    assert!(!stderr.contains("Starting SetupDependencies"), "{stderr}");
    assert!(!dir.path().join("Assets").exists());
}

#[test]
fn missing_config_is_an_error() {
    let dir = TempDir::new().unwrap();

    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no resolvecheck.yaml"));
}

#[test]
fn compare_command_reports_discrepancies() {
    let dir = project("");
    let expected = dir.path().join("ExpectedArtifacts/NoExport/Gradle");
    let same = dir.path().join("fixtures/NoExport/Gradle");
    let different = dir.path().join("fixtures/Export/Gradle");

    let ok = resolvecheck_cmd()
        .arg("compare")
        .arg(&expected)
        .arg(&same)
        .output()
        .unwrap();
    assert!(ok.status.success(), "{}", describe(&ok));

    fs::remove_file(different.join("resolved.txt")).unwrap();
    let failed = resolvecheck_cmd()
        .arg("compare")
        .arg(&expected)
        .arg(&different)
        .output()
        .unwrap();
    assert_eq!(failed.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&failed.stdout);
    assert!(stdout.contains("Missing expected artifact"), "{stdout}");
    assert!(stdout.contains("Archive"), "{stdout}");
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("resolvecheck.yaml");

    let created = resolvecheck_cmd().arg("init").arg(&path).output().unwrap();
    assert!(created.status.success());
    assert!(
        fs::read_to_string(&path)
            .unwrap()
            .contains("resolver:")
    );

    let again = resolvecheck_cmd().arg("init").arg(&path).output().unwrap();
    assert_eq!(again.status.code(), Some(1));
}

#[test]
fn output_dir_covering_the_project_is_refused_before_running() {
    let dir = project("output_dir: .\n");

    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("refusing to use output_dir"), "{stderr}");
    assert!(dir.path().join("resolvecheck.yaml").exists());
    assert!(dir.path().join("ExpectedArtifacts/Export/Gradle").is_dir());
}

#[test]
fn output_dir_inside_expected_artifacts_is_refused() {
    let dir = project("output_dir: ExpectedArtifacts/Export\n");

    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    assert!(dir.path().join("ExpectedArtifacts/Export/Gradle").is_dir());
}

#[test]
fn missing_expected_tree_fails_its_scenario() {
    let dir = project("");
    fs::remove_dir_all(dir.path().join("ExpectedArtifacts/Export")).unwrap();

    let output = run(dir.path(), &["--output", "json"]);

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    let report = json_report(&output);
    let export = &report["results"][3];
    assert_eq!(export["verdict"], "FAILED");
    let message = export["error_messages"][0].as_str().unwrap();
    assert!(message.starts_with("Expected artifact tree"), "{message}");
}

#[test]
fn compare_command_fails_for_missing_expected_tree() {
    let dir = TempDir::new().unwrap();

    let output = resolvecheck_cmd()
        .arg("compare")
        .arg(dir.path().join("nope"))
        .arg(dir.path().join("also-nope"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("does not exist"));
}

#[test]
fn compare_command_uses_policy_from_config() {
    let dir = project("compare:\n  ignore: ['\\.meta$', '\\.txt$']\n");
    let expected = dir.path().join("ExpectedArtifacts/NoExport/Gradle");
    let actual = dir.path().join("fixtures/NoExport/Gradle");
    fs::write(actual.join("resolved.txt"), "changed").unwrap();

    let default_policy = resolvecheck_cmd()
        .arg("compare")
        .arg(&expected)
        .arg(&actual)
        .output()
        .unwrap();
    assert_eq!(default_policy.status.code(), Some(1));

    let configured = resolvecheck_cmd()
        .arg("compare")
        .arg(&expected)
        .arg(&actual)
        .arg("--config")
        .arg(dir.path().join("resolvecheck.yaml"))
        .output()
        .unwrap();
    assert!(configured.status.success(), "{}", describe(&configured));
}
