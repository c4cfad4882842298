//! Integration tests for the `expand` command.
use pdngen::cli::handle_expand_command;
use pdngen::settings::Settings;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;
use toml::Table;

/// An integration test for the `expand` command.
#[test]
fn test_handle_expand_command() {
    unsafe { std::env::set_var("PDNGEN_LOG_LEVEL", "off") };

    let dir = tempdir().unwrap();
    handle_expand_command(
        &PathBuf::from("demos/simple/scenarios.toml"),
        Some(dir.path()),
        false,
        Some(Settings::default()),
    )
    .unwrap();

    let mut n_farms = Vec::new();
    let mut network = Vec::new();
    for s in 0..4 {
        let file_path = dir.path().join(format!("scenario_{s}.toml"));
        let scenario: Table = toml::from_str(&fs::read_to_string(file_path).unwrap()).unwrap();
        assert!(!scenario.contains_key("expansion"));
        assert_eq!(scenario["simulator"]["Tmax"].as_integer(), Some(365));

        let settings = &scenario["popgenerator_settings"];
        n_farms.push(settings["farm_params"]["n_farms"]["BR"].as_integer().unwrap());
        let params = &settings["market_network_params"];
        network.push((
            params["rho_market"].as_float().unwrap(),
            params["p_random_market"].as_float().unwrap(),
        ));
    }
    assert!(!dir.path().join("scenario_4.toml").exists());

    // Linked keys come first, so they vary slowest
    assert_eq!(n_farms, [40, 80, 40, 80]);
    assert_eq!(network, [(0.2, 0.5), (0.2, 0.5), (0.4, 0.1), (0.4, 0.1)]);
}
