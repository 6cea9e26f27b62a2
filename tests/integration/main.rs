//! Integration tests for Kiln

/// Whether a working C compiler is on this machine
fn have_compiler() -> bool {
    let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    std::process::Command::new(cc)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! require_compiler {
    () => {
        if !crate::have_compiler() {
            eprintln!("skipping: no C compiler found");
            return;
        }
    };
}

mod cli_tests {
    use assert_cmd::cargo::{cargo_bin, cargo_bin_cmd};
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn kiln(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.env("KILN_CONFIG", temp.path().join("config.toml"))
            .env("KILN_CACHE_DIR", temp.path().join("cache"))
            .env_remove("KILN_FORCE_REBUILD");
        cmd
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        kiln(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("compile once, load anywhere"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        kiln(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn dir_follows_env() {
        let temp = TempDir::new().unwrap();
        kiln(&temp)
            .arg("dir")
            .assert()
            .success()
            .stdout(predicate::str::contains("cache"));
    }

    #[test]
    fn config_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        kiln(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let temp = TempDir::new().unwrap();
        kiln(&temp).args(["config", "init"]).assert().success();
        assert!(temp.path().join("config.toml").exists());

        kiln(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), "[cache\n").unwrap();
        kiln(&temp)
            .arg("dir")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn list_empty_cache() {
        let temp = TempDir::new().unwrap();
        kiln(&temp)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn list_shows_root_and_artifacts() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        let artifact = format!(
            "demo_{}{}",
            "0123456789abcdef".repeat(2),
            std::env::consts::DLL_SUFFIX
        );
        fs::write(cache.join(artifact), b"not loaded").unwrap();

        kiln(&temp)
            .arg("list")
            .assert()
            .success()
            .stdout(
                predicate::str::contains("Root")
                    .and(predicate::str::contains("demo"))
                    .and(predicate::str::contains("0123456789abcdef0123456789abcdef")),
            );
    }

    #[test]
    fn missing_source_fails() {
        let temp = TempDir::new().unwrap();
        kiln(&temp)
            .args(["build", "does-not-exist.c"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn name_and_module_conflict() {
        let temp = TempDir::new().unwrap();
        kiln(&temp)
            .args(["key", "a.c", "--module", "--name", "x"])
            .assert()
            .failure();
    }

    #[test]
    fn key_is_stable_and_option_sensitive() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("add.c");
        fs::write(&source, "T add(T a, T b) { return a + b; }\n").unwrap();

        let key_of = |define: &str| {
            let output = kiln(&temp)
                .args(["key", source.to_str().unwrap(), "-D", define])
                .output()
                .unwrap();
            assert!(output.status.success());
            String::from_utf8(output.stdout).unwrap().trim().to_string()
        };

        let int_key = key_of("T=int");
        assert_eq!(int_key.len(), 32);
        assert!(int_key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(int_key, key_of("T=int"));
        assert_ne!(int_key, key_of("T=double"));
    }

    #[test]
    fn build_then_list() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("add.c");
        fs::write(&source, "int add(int a, int b) { return a + b; }\n").unwrap();

        kiln(&temp)
            .args(["build", source.to_str().unwrap(), "--name", "add", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"name\": \"add_"));

        kiln(&temp)
            .args(["list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("add"));
    }

    #[test]
    fn compile_errors_fail_the_build() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("broken.c");
        fs::write(&source, "int broken( { return }\n").unwrap();

        kiln(&temp)
            .args(["build", source.to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));

        // nothing was published
        kiln(&temp)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn concurrent_processes_share_one_artifact() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("mul.c");
        fs::write(&source, "int mul(int a, int b) { return a * b; }\n").unwrap();

        let children: Vec<_> = (0..4)
            .map(|_| {
                std::process::Command::new(cargo_bin!("kiln"))
                    .args(["build", "-q", source.to_str().unwrap(), "--name", "mul"])
                    .env("KILN_CACHE_DIR", temp.path().join("cache"))
                    .env("KILN_CONFIG", temp.path().join("config.toml"))
                    .env_remove("KILN_FORCE_REBUILD")
                    .spawn()
                    .unwrap()
            })
            .collect();

        for mut child in children {
            assert!(child.wait().unwrap().success());
        }

        let suffix = std::env::consts::DLL_SUFFIX;
        let artifacts: Vec<_> = fs::read_dir(temp.path().join("cache"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(suffix))
            .collect();
        assert_eq!(artifacts.len(), 1);
    }
}

mod library_tests {
    use kiln::{ArtifactKind, BuildCoordinator, BuildOptions, BuildRequest, KilnError};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn coordinator(temp: &TempDir) -> BuildCoordinator {
        BuildCoordinator::from_config(&kiln::config::Config::default())
            .with_cache_dir(Some(temp.path().to_path_buf()))
            .with_force_rebuild(false)
    }

    fn typed(ty: &str) -> BuildOptions {
        let mut extra = BTreeMap::new();
        extra.insert("define_macros".to_string(), json!([["T", ty]]));
        BuildOptions {
            extra,
            ..Default::default()
        }
    }

    #[test]
    fn same_source_different_options_coexist() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let kiln = coordinator(&temp);
        let source = "T add(T x, T y) { return x + y; }\n";

        let ints = kiln
            .compile(&BuildRequest::new(source).name("add").options(typed("int")))
            .unwrap();
        let doubles = kiln
            .compile(&BuildRequest::new(source).name("add").options(typed("double")))
            .unwrap();
        assert_ne!(ints.key(), doubles.key());

        unsafe {
            let add_int = ints.get::<extern "C" fn(i32, i32) -> i32>("add").unwrap();
            let add_double = doubles.get::<extern "C" fn(f64, f64) -> f64>("add").unwrap();
            assert_eq!(add_int(3, 4), 7);
            assert_eq!(add_double(3.0, 4.0), 7.0);
        }
    }

    #[test]
    fn second_call_reuses_loaded_module() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let kiln = coordinator(&temp);
        let request = BuildRequest::new("int seven(void) { return 7; }\n").quiet(true);

        let first = kiln.compile(&request).unwrap();
        let second = kiln.compile(&request).unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));

        // a fresh coordinator (another process) reuses the published file
        let modified = std::fs::metadata(first.path()).unwrap().modified().unwrap();
        let other = coordinator(&temp).compile(&request).unwrap();
        assert_eq!(other.path(), first.path());
        assert_eq!(
            std::fs::metadata(other.path()).unwrap().modified().unwrap(),
            modified
        );
    }

    #[test]
    fn force_rebuild_reloads() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let kiln = coordinator(&temp);
        let request = BuildRequest::new("int one(void) { return 1; }\n").quiet(true);

        let first = kiln.compile(&request).unwrap();
        let rebuilt = kiln.compile(&request.clone().force_rebuild(true)).unwrap();
        assert!(!std::sync::Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(first.key(), rebuilt.key());

        unsafe {
            let one = rebuilt.get::<extern "C" fn() -> i32>("one").unwrap();
            assert_eq!(one(), 1);
        }
    }

    #[test]
    fn module_kind_embeds_name_and_key() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let kiln = coordinator(&temp);
        let source = "int run(void) { return 42; }\nKILN_MODULE(demo, run);\n";
        let options = BuildOptions {
            kind: ArtifactKind::Module,
            ..Default::default()
        };

        let module = kiln
            .compile(&BuildRequest::new(source).options(options))
            .unwrap();
        assert!(module.name().starts_with("demo_"));
        assert_eq!(module.embedded_key().as_deref(), Some(module.key().as_str()));
        assert_eq!(module.embedded_name().as_deref(), Some(module.name()));
        assert_eq!(module.entry_symbol().as_deref(), Some("run"));
    }

    #[test]
    fn compiler_diagnostics_surface() {
        require_compiler!();
        let temp = TempDir::new().unwrap();
        let err = coordinator(&temp)
            .compile(&BuildRequest::new("int broken( {\n").quiet(true))
            .unwrap_err();
        assert!(err.is_build_failure());
        assert!(matches!(err, KilnError::Build { .. }));
    }
}
