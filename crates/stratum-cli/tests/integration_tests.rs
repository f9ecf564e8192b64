//! Integration tests for CLI commands

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to run stratum command
fn stratum(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stratum"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute stratum")
}

/// Get the fixtures path
fn fixtures_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures")
}

fn fixture(name: &str) -> String {
    format!("{}/{}", fixtures_path(), name)
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("Output should be valid JSON")
}

fn step_field<'a>(plan: &'a serde_json::Value, field: &str) -> Vec<&'a str> {
    plan["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s[field].as_str().unwrap())
        .collect()
}

mod plan_command {
    use super::*;

    #[test]
    fn test_plan_default_configuration() {
        let catalog = fixture("catalog.yaml");
        let output = stratum(&["plan", "--catalog", &catalog]);

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("EXECUTION PLAN"));
        assert!(stdout.contains("4 components in 4 waves, 3 changes"));
        assert!(stdout.contains("Wave 3"));
    }

    #[test]
    fn test_plan_json_follows_dependency_order() {
        let catalog = fixture("catalog.yaml");
        let manifest = fixture("manifest.yaml");
        let config = fixture("config.yaml");
        let output = stratum(&[
            "plan", "--catalog", &catalog, "--manifest", &manifest, "-c", &config, "-o", "json",
        ]);

        assert!(output.status.success());
        let plan = stdout_json(&output);
        assert_eq!(
            step_field(&plan, "component"),
            vec!["crds", "database", "api", "dashboard"]
        );
        assert_eq!(
            step_field(&plan, "action"),
            vec!["install", "install", "install", "install"]
        );
        assert_eq!(plan["deleting"], false);
    }

    #[test]
    fn test_plan_against_recorded_status() {
        let dir = TempDir::new().unwrap();
        let status = dir.path().join("status.yaml");
        fs::write(
            &status,
            r#"
state: Ready
components:
  crds:
    name: crds
    state: Ready
    installed: true
  database:
    name: database
    state: Ready
    installed: true
"#,
        )
        .unwrap();

        let catalog = fixture("catalog.yaml");
        let output = stratum(&[
            "plan",
            "--catalog",
            &catalog,
            "--status",
            status.to_str().unwrap(),
            "--uninstall",
            "-o",
            "json",
        ]);

        assert!(output.status.success());
        let plan = stdout_json(&output);
        assert_eq!(
            step_field(&plan, "component"),
            vec!["dashboard", "api", "database", "crds"]
        );
        assert_eq!(
            step_field(&plan, "action"),
            vec!["keep", "keep", "uninstall", "uninstall"]
        );
    }

    #[test]
    fn test_plan_rejects_cycles() {
        let catalog = fixture("cyclic-catalog.yaml");
        let output = stratum(&["plan", "--catalog", &catalog]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Circular"));
    }

    #[test]
    fn test_plan_missing_catalog() {
        let output = stratum(&["plan", "--catalog", "/nonexistent/catalog.yaml"]);

        assert_eq!(output.status.code(), Some(5));
    }

    #[test]
    fn test_catalog_from_environment() {
        let output = Command::new(env!("CARGO_BIN_EXE_stratum"))
            .args(["plan", "-o", "json"])
            .env("STRATUM_CATALOG", fixture("catalog.yaml"))
            .output()
            .expect("Failed to execute stratum");

        assert!(output.status.success());
        assert_eq!(stdout_json(&output)["steps"].as_array().unwrap().len(), 4);
    }
}

mod values_command {
    use super::*;

    #[test]
    fn test_values_merges_every_layer() {
        let catalog = fixture("catalog.yaml");
        let manifest = fixture("manifest.yaml");
        let config = fixture("config.yaml");
        let output = stratum(&[
            "values", "database", "--catalog", &catalog, "--manifest", &manifest, "-c", &config,
            "-o", "json",
        ]);

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let values = stdout_json(&output);
        // override beats the chart default
        assert_eq!(values["replicas"], 3);
        // generated image layer, relocated to the mirror
        assert_eq!(values["image"]["registry"], "mirror.internal");
        assert_eq!(values["image"]["repository"], "library/postgres");
        assert_eq!(values["image"]["tag"], "16.2");
        assert_eq!(values["image"]["pullPolicy"], "IfNotPresent");
        // install arguments
        assert_eq!(values["auth"]["users"], serde_json::json!(["app", "reporting"]));
    }

    #[test]
    fn test_values_set_is_applied_last() {
        let catalog = fixture("catalog.yaml");
        let config = fixture("config.yaml");
        let output = stratum(&[
            "values", "database", "--catalog", &catalog, "-c", &config, "--set", "replicas=5",
            "-o", "json",
        ]);

        assert!(output.status.success());
        assert_eq!(stdout_json(&output)["replicas"], 5);
    }

    #[test]
    fn test_values_yaml_output() {
        let catalog = fixture("catalog.yaml");
        let output = stratum(&["values", "api", "--catalog", &catalog]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout.trim(), "replicas: 2");
    }

    #[test]
    fn test_values_disabled_component_notes_it() {
        let catalog = fixture("catalog.yaml");
        let output = stratum(&["values", "dashboard", "--catalog", &catalog]);

        assert!(output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("disabled"));
    }

    #[test]
    fn test_values_unknown_component() {
        let catalog = fixture("catalog.yaml");
        let output = stratum(&["values", "cache", "--catalog", &catalog]);

        assert_eq!(output.status.code(), Some(4));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("cache"));
    }

    #[test]
    fn test_values_reference_needs_cluster() {
        let catalog = fixture("catalog.yaml");
        let platform = fixture("platform.yaml");
        let output = stratum(&["values", "api", "--catalog", &catalog, "-c", &platform]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("api-overrides"));
    }
}
