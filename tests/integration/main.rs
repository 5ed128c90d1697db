//! Integration tests for Strata

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A scratch environment: global config pointing the store into a temp dir
    struct TestEnv {
        temp: TempDir,
        config: PathBuf,
    }

    impl TestEnv {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = temp.path().join("store");
            let config = temp.path().join("config.toml");
            std::fs::write(
                &config,
                format!(
                    "[general]\nbuild_log = false\n\n[cache]\ndir = {:?}\n",
                    store.display().to_string()
                ),
            )
            .unwrap();
            Self { temp, config }
        }

        fn path(&self) -> &Path {
            self.temp.path()
        }

        fn strata(&self) -> Command {
            let mut cmd = strata();
            cmd.current_dir(self.path())
                .env("NO_COLOR", "1")
                .arg("--config")
                .arg(&self.config);
            cmd
        }
    }

    fn strata() -> Command {
        cargo_bin_cmd!("strata")
    }

    #[test]
    fn help_displays() {
        strata()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("layered container image builder"));
    }

    #[test]
    fn version_displays() {
        strata()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("strata"));
    }

    #[test]
    fn build_help_lists_options() {
        strata()
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--base"))
            .stdout(predicate::str::contains("--manifest"));
    }

    #[test]
    fn config_path_shows_override() {
        let env = TestEnv::new();
        env.strata()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_displays_defaults() {
        let env = TestEnv::new();
        env.strata()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("python:3.11-slim"));
    }

    #[test]
    fn local_config_overrides_global() {
        let env = TestEnv::new();
        std::fs::write(
            env.path().join("strata.toml"),
            "[build]\nbase_image = \"python:3.12-slim\"\n",
        )
        .unwrap();

        env.strata()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("python:3.12-slim"));

        env.strata()
            .args(["--no-local", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("python:3.11-slim"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let env = TestEnv::new();
        std::fs::write(&env.config, "[build]\nworkdir = 42\n").unwrap();

        env.strata()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn images_list_empty() {
        let env = TestEnv::new();
        env.strata()
            .args(["images", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No images"));
    }

    #[test]
    fn images_list_json_empty() {
        let env = TestEnv::new();
        env.strata()
            .args(["images", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn images_inspect_unknown_fails() {
        let env = TestEnv::new();
        env.strata()
            .args(["images", "inspect", "deadbeef"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Image not found"));
    }

    #[test]
    fn images_rm_unknown_fails() {
        let env = TestEnv::new();
        env.strata()
            .args(["images", "rm", "deadbeef"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Image not found"));
    }

    #[test]
    fn cache_list_empty() {
        let env = TestEnv::new();
        env.strata()
            .args(["cache", "list"])
            .assert()
            .success();
    }

    #[test]
    fn cache_info_reports_miss() {
        let env = TestEnv::new();
        std::fs::write(env.path().join("requirements.txt"), "flask==3.0.0\n").unwrap();

        env.strata()
            .args(["cache", "info"])
            .assert()
            .success()
            .stdout(predicate::str::contains("flask"))
            .stdout(predicate::str::contains("miss"));
    }

    #[test]
    fn context_local_config_is_used() {
        let env = TestEnv::new();
        let ctx = env.path().join("svc");
        std::fs::create_dir(&ctx).unwrap();
        std::fs::write(ctx.join("strata.toml"), "[build]\nmanifest = \"deps.txt\"\n").unwrap();
        std::fs::write(ctx.join("deps.txt"), "django==5.0\n").unwrap();

        env.strata()
            .args(["cache", "info", "svc"])
            .assert()
            .success()
            .stdout(predicate::str::contains("deps.txt"))
            .stdout(predicate::str::contains("django"));

        env.strata()
            .args(["--no-local", "cache", "info", "svc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Manifest not found"));
    }

    #[test]
    fn cache_gc_dry_run_on_empty_store() {
        let env = TestEnv::new();
        env.strata()
            .args(["cache", "gc", "--dry-run"])
            .assert()
            .success();
    }

    #[test]
    fn build_without_manifest_fails() {
        let env = TestEnv::new();
        env.strata()
            .arg("build")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Manifest not found"));
    }

    #[test]
    fn build_rejects_missing_context() {
        let env = TestEnv::new();
        env.strata()
            .args(["build", "does-not-exist"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("is not a directory"));
    }

    #[test]
    fn run_unknown_image_fails() {
        let env = TestEnv::new();
        env.strata()
            .args(["run", "deadbeef"])
            .assert()
            .failure();
    }

    #[test]
    fn init_creates_project_config() {
        let env = TestEnv::new();
        strata()
            .arg("init")
            .arg("--path")
            .arg(env.path())
            .assert()
            .success();

        let written = std::fs::read_to_string(env.path().join("strata.toml")).unwrap();
        assert!(written.contains("[build]"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let env = TestEnv::new();
        std::fs::write(env.path().join("strata.toml"), "# mine\n").unwrap();

        strata()
            .arg("init")
            .arg("--path")
            .arg(env.path())
            .assert()
            .failure();

        let kept = std::fs::read_to_string(env.path().join("strata.toml")).unwrap();
        assert_eq!(kept, "# mine\n");
    }
}
