//! Integration tests for the `generate` command.
use pdngen::cli::{GenerateOpts, handle_generate_command};
use pdngen::output::OutputDirs;
use pdngen::scenario::{generate_scenario, load_scenarios};
use pdngen::settings::Settings;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Get the path to the demo specification.
fn get_spec_path() -> PathBuf {
    PathBuf::from("demos/simple/scenarios.toml")
}

/// An integration test for the `generate` command.
#[test]
fn test_handle_generate_command() {
    unsafe { std::env::set_var("PDNGEN_LOG_LEVEL", "off") };

    // Save results to non-existent directory to check that directory creation works
    let dir = tempdir().unwrap();
    let output_dir = dir.path().join("out");
    let opts = GenerateOpts {
        output_dir: Some(output_dir.clone()),
        seed: Some(1),
        ..GenerateOpts::default()
    };
    handle_generate_command(&get_spec_path(), &opts, Some(Settings::default())).unwrap();

    // Four scenarios with two realisations each
    let config_dir = output_dir.join("config");
    for s in 0..4 {
        assert!(config_dir.join(format!("area_list_{s}.txt")).is_file());
        assert!(config_dir.join(format!("area_index_{s}.json")).is_file());
        assert!(output_dir.join("results").join(format!("scenario_{s}")).is_dir());
        for r in 0..2 {
            assert!(config_dir.join(format!("settings_{s}_{r}.json")).is_file());
        }
    }
    assert!(!config_dir.join("settings_4_0.json").exists());
    // Messages are tagged with the scenario and realisation they belong to
    let log = fs::read_to_string(output_dir.join("pdngen.log")).unwrap();
    assert!(log.contains("] scenario 0: 5 of 6 areas included"));
    assert!(log.contains("] scenario 3_1: "));

    // Area 2 sends no birds to the selected districts
    assert_eq!(
        fs::read_to_string(config_dir.join("area_index_0.json")).unwrap(),
        r#"{"0":0,"1":1,"3":2,"4":3,"5":4}"#
    );

    // Second time will fail because the output folder is not empty
    assert_eq!(
        handle_generate_command(&get_spec_path(), &opts, Some(Settings::default()))
            .unwrap_err()
            .chain()
            .next()
            .unwrap()
            .to_string(),
        format!("Failed to create output directory: {}", output_dir.display())
    );
}

/// Generate every scenario in the demo with a fixed seed, returning the generated files
fn generate_demo(output_dir: &Path, seed: u64) -> Vec<(String, String)> {
    let dirs = OutputDirs::create(output_dir).unwrap();
    for (s, params) in load_scenarios(&get_spec_path()).unwrap().iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(seed + s as u64);
        generate_scenario(s, params, &dirs, false, &mut rng).unwrap();
    }

    let mut files: Vec<_> = fs::read_dir(&dirs.config)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let contents = fs::read_to_string(&path).unwrap();

            // Settings files contain absolute paths
            let contents = contents.replace(&output_dir.display().to_string(), "");
            (name, contents)
        })
        .collect();
    files.sort();
    files
}

/// The same seed gives the same networks
#[test]
fn test_generate_reproducible() {
    let (dir1, dir2) = (tempdir().unwrap(), tempdir().unwrap());
    let files1 = generate_demo(dir1.path(), 5);
    let files2 = generate_demo(dir2.path(), 5);
    assert_eq!(files1.len(), 4 * 3 + 4 * 2 * 5);
    assert_eq!(files1, files2);
}
