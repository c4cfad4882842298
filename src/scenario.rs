//! Loading expanded scenarios and generating the files describing each of them.
//!
//! A scenario specification is expanded into one configuration per scenario (see
//! [`crate::expand`]). Each configuration is checked up front and then drives, in order: flux
//! estimation, area selection, market creation, the market network, area-market fluxes and farm
//! placement. Every stochastic realisation of a scenario gets its own set of files plus a settings
//! file pointing the simulator at them.
use crate::area_market::compute_area_market_flux;
use crate::bird::{BirdType, check_bird_types};
use crate::edge::write_edge_file;
use crate::expand::generate_configurations;
use crate::farm::{FarmParameters, create_farms, write_farm_catalog};
use crate::flux::{
    FluxParameters, compute_flux_parameters, get_areas_included, write_flux_parameters,
};
use crate::geography::{Crs, RegionTable, write_index_map, write_region_file};
use crate::input::{input_err_msg, read_toml, resolve_path};
use crate::log::ScenarioContext;
use crate::market::{MarketParameters, create_market_info, write_market_catalog};
use crate::network::{Heterogeneity, MarketNetworkParameters, generate_market_network};
use crate::output::OutputDirs;
use anyhow::{Context, Result, ensure};
use log::{debug, info};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

const fn default_n_realizations() -> u32 {
    1
}

/// Settings shared by every part of the generator
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneralSettings {
    /// Bird types to generate networks for
    pub bts: Vec<BirdType>,
    /// Number of stochastic realisations of the scenario
    #[serde(default = "default_n_realizations")]
    pub n_realizations: u32,
}

/// Where to find the area geometries
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeographyParameters {
    /// Path to a GeoJSON file with one feature per area
    pub path_geo: PathBuf,
    /// Coordinate reference system of the file
    #[serde(default)]
    pub crs: Crs,
}

/// Parameters for each stage of network generation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PopGeneratorSettings {
    /// How area-market fluxes are estimated
    pub flux_params: FluxParameters,
    /// Area geometries
    pub geography_params: GeographyParameters,
    /// Markets
    pub market_params: MarketParameters,
    /// The network between markets
    pub market_network_params: MarketNetworkParameters,
    /// Farm placement and attributes
    pub farm_params: FarmParameters,
}

/// The full set of parameters for a single scenario
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioParameters {
    /// General settings
    pub general_settings: GeneralSettings,
    /// Network generation parameters
    pub popgenerator_settings: PopGeneratorSettings,
    /// Epidemiological parameters, passed on to the simulator untouched
    #[serde(default)]
    pub epi_params: Table,
    /// Extra simulator settings, copied into every settings file
    #[serde(default)]
    pub simulator: Table,
}

impl ScenarioParameters {
    /// Read parameters from an expanded configuration.
    ///
    /// Relative paths are taken to be relative to `base_dir`.
    pub fn from_table(table: Table, base_dir: &Path) -> Result<Self> {
        let mut params: Self = Value::Table(table).try_into()?;
        params.resolve_paths(base_dir);
        params.validate()?;

        Ok(params)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let settings = &mut self.popgenerator_settings;
        for path in settings.flux_params.paths_raw_flux.values_mut() {
            *path = resolve_path(base_dir, path);
        }
        settings.geography_params.path_geo =
            resolve_path(base_dir, &settings.geography_params.path_geo);
    }

    /// Check that the parameters are consistent with each other and with the requested bird types
    pub fn validate(&self) -> Result<()> {
        let bts = &self.general_settings.bts;
        check_bird_types(bts)?;
        ensure!(
            self.general_settings.n_realizations >= 1,
            "n_realizations must be a positive integer"
        );

        let settings = &self.popgenerator_settings;
        ensure!(
            !settings.flux_params.districts.is_empty(),
            "districts is empty"
        );
        for bird_type in bts {
            ensure!(
                settings.flux_params.paths_raw_flux.contains_key(bird_type),
                "No flux file given for {bird_type}"
            );
        }
        create_market_info(bts, &settings.market_params)?;
        Heterogeneity::from_concentration(settings.market_network_params.het_w_market)
            .context("Invalid het_w_market")?;
        settings.farm_params.validate(bts)?;

        Ok(())
    }
}

/// Expand the specification at `spec_path` and read the parameters of every scenario
pub fn load_scenarios(spec_path: &Path) -> Result<Vec<ScenarioParameters>> {
    let spec: Table = read_toml(spec_path)?;
    let configurations =
        generate_configurations(&spec).with_context(|| input_err_msg(spec_path))?;
    info!(
        "Expanded {} into {} scenarios",
        spec_path.display(),
        configurations.len()
    );

    let base_dir = spec_path.parent().unwrap_or(Path::new("."));
    configurations
        .into_iter()
        .enumerate()
        .map(|(s, table)| {
            ScenarioParameters::from_table(table, base_dir)
                .with_context(|| format!("Invalid parameters for scenario {s}"))
        })
        .collect()
}

/// Write data as JSON
fn write_json<T: serde::Serialize + ?Sized>(file_path: &Path, data: &T) -> Result<()> {
    fs::write(file_path, serde_json::to_string(data)?)
        .with_context(|| format!("Could not write {}", file_path.display()))
}

fn path_value(path: &Path) -> JsonValue {
    JsonValue::String(path.display().to_string())
}

/// Generate every realisation of a scenario.
///
/// # Arguments
///
/// * `scenario` - The scenario's index, used in file names
/// * `params` - The scenario's parameters
/// * `dirs` - Output folders
/// * `debug_model` - Whether to also write the estimated flux parameters
/// * `rng` - Random number generator for this scenario
pub fn generate_scenario<R: Rng + ?Sized>(
    scenario: usize,
    params: &ScenarioParameters,
    dirs: &OutputDirs,
    debug_model: bool,
    rng: &mut R,
) -> Result<()> {
    let _context = ScenarioContext::enter(scenario.to_string());
    let bts = &params.general_settings.bts;
    let settings = &params.popgenerator_settings;
    let results_dir = dirs.create_scenario_results(scenario)?;

    let estimates = compute_flux_parameters(&settings.flux_params, bts)?;
    if debug_model {
        write_flux_parameters(
            &dirs.config_file(&format!("flux_parameters_{scenario}.json")),
            &estimates,
        )?;
    }

    let areas_included = get_areas_included(&estimates, bts);
    let geography = &settings.geography_params;
    let regions = RegionTable::load(&geography.path_geo, geography.crs, &areas_included)?;
    info!(
        "{} of {} areas included",
        areas_included.len(),
        regions.regions().len()
    );

    let area_list_path = dirs.config_file(&format!("area_list_{scenario}.txt"));
    write_region_file(&area_list_path, &regions)?;
    write_index_map(
        &dirs.config_file(&format!("area_index_{scenario}.json")),
        &regions,
    )?;

    let epi_model_path = dirs.config_file(&format!("epi_model_parameters_{scenario}.json"));
    write_json(&epi_model_path, &params.epi_params)?;

    let n_markets = settings.market_params.n_markets;
    for realization in 0..params.general_settings.n_realizations {
        let id = format!("{scenario}_{realization}");
        let _context = ScenarioContext::enter(id.clone());
        debug!("Generating realisation {realization}");

        let market_list_path = dirs.config_file(&format!("market_info_{id}.json"));
        let markets = create_market_info(bts, &settings.market_params)?;
        write_market_catalog(&market_list_path, &markets)?;

        let market_network_path = dirs.config_file(&format!("market_network_{id}.txt"));
        let market_edges =
            generate_market_network(n_markets, bts, &settings.market_network_params, rng)
                .context("Could not generate market network")?;
        write_edge_file(&market_network_path, &market_edges)?;

        let area_market_fluxes_path = dirs.config_file(&format!("area_market_flux_{id}.txt"));
        let area_edges = compute_area_market_flux(&regions, &estimates, bts, n_markets, rng)
            .context("Could not generate area-market fluxes")?;
        write_edge_file(&area_market_fluxes_path, &area_edges)?;

        let farm_list_path = dirs.config_file(&format!("farm_info_{id}.json"));
        let farms = create_farms(&regions, &estimates, bts, &settings.farm_params, rng)
            .context("Could not create farms")?;
        write_farm_catalog(&farm_list_path, &farms)?;

        let mut model_settings = Map::new();
        model_settings.insert("scenarioID".into(), id.clone().into());
        model_settings.insert("realizationID".into(), realization.into());
        model_settings.insert("bts".into(), serde_json::to_value(bts)?);
        for (key, path) in [
            ("area_list_path", &area_list_path),
            ("market_list_path", &market_list_path),
            ("market_network_path", &market_network_path),
            ("area_market_fluxes_path", &area_market_fluxes_path),
            ("farm_list_path", &farm_list_path),
            ("epi_model_path", &epi_model_path),
            ("output_folder_path", &results_dir),
        ] {
            model_settings.insert(key.into(), path_value(path));
        }
        for (key, value) in &params.simulator {
            model_settings.insert(key.clone(), serde_json::to_value(value)?);
        }
        write_json(
            &dirs.config_file(&format!("settings_{id}.json")),
            &model_settings,
        )?;

        info!(
            "{} markets, {} market links, {} area-market links, {} farms",
            markets.len(),
            market_edges.len(),
            area_edges.len(),
            farms.len()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, rng};
    use rand::rngs::StdRng;
    use rstest::{fixture, rstest};
    use std::fs::File;
    use std::io::Write;
    use tempfile::{TempDir, tempdir};

    /// Two square areas; only the first sends birds to markets
    const GEOJSON: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1000,0],[1000,1000],[0,1000],[0,0]]]}},
        {"type": "Feature", "properties": {},
         "geometry": {"type": "Polygon", "coordinates": [[[1000,0],[2000,0],[2000,1000],[1000,1000],[1000,0]]]}}
    ]}"#;

    const FLUX_CSV: &str = "a_DHAKA,b_DHAKA,c_CTG\n4,1,7\n0,0,3\n";

    const SCENARIO: &str = r#"
        [general_settings]
        bts = ["BR"]
        n_realizations = 2

        [popgenerator_settings.flux_params]
        mode = "dirichlet"
        districts = ["DHAKA"]
        paths_raw_flux.BR = "flux_BR.csv"

        [popgenerator_settings.geography_params]
        path_geo = "areas.geojson"

        [popgenerator_settings.market_params]
        n_markets = 4
        n_layers = 2
        prop_birds_market.BR = { W = [0.5, 0.0], R = [0.5, 0.0] }

        [popgenerator_settings.market_network_params]
        rho_market = 0.5
        p_random_market = 0.2
        self_w_market = 0.3
        het_w_market = inf

        [popgenerator_settings.farm_params]
        n_farms = 5
        p_random = 0.0
        size.BR = 1000
        rollout_time.BR = { mode = "Constant", value = 3 }
        refill.BR = { mode = "Geometric", p_refill = 0.1 }

        [epi_params]
        beta = 0.5

        [simulator]
        Tmax = 100
    "#;

    #[fixture]
    fn input_dir() -> TempDir {
        let dir = tempdir().unwrap();
        for (name, contents) in [("areas.geojson", GEOJSON), ("flux_BR.csv", FLUX_CSV)] {
            let mut file = File::create(dir.path().join(name)).unwrap();
            write!(file, "{contents}").unwrap();
        }
        dir
    }

    fn parameters(dir: &Path) -> ScenarioParameters {
        ScenarioParameters::from_table(toml::from_str(SCENARIO).unwrap(), dir).unwrap()
    }

    #[rstest]
    fn test_from_table_resolves_paths(input_dir: TempDir) {
        let params = parameters(input_dir.path());
        let settings = &params.popgenerator_settings;
        assert_eq!(
            settings.flux_params.paths_raw_flux[&BirdType::Broiler],
            input_dir.path().join("flux_BR.csv")
        );
        assert_eq!(
            settings.geography_params.path_geo,
            input_dir.path().join("areas.geojson")
        );
        assert_eq!(settings.geography_params.crs, Crs::Metric);
    }

    #[rstest]
    fn test_validate_missing_bird_type(input_dir: TempDir) {
        let mut params = parameters(input_dir.path());
        params.general_settings.bts.push(BirdType::Duck);
        assert_error!(params.validate(), "No flux file given for DE");
    }

    #[rstest]
    fn test_validate_no_realizations(input_dir: TempDir) {
        let mut params = parameters(input_dir.path());
        params.general_settings.n_realizations = 0;
        assert_error!(params.validate(), "n_realizations must be a positive integer");
    }

    #[rstest]
    fn test_generate_scenario(input_dir: TempDir, mut rng: StdRng) {
        let params = parameters(input_dir.path());
        let out = tempdir().unwrap();
        let dirs = OutputDirs::create(out.path()).unwrap();
        generate_scenario(7, &params, &dirs, true, &mut rng).unwrap();

        // Only the first area has flux to DHAKA markets
        assert_eq!(
            fs::read_to_string(dirs.config_file("area_list_7.txt")).unwrap(),
            "0 500 500\n"
        );
        assert_eq!(
            fs::read_to_string(dirs.config_file("area_index_7.json")).unwrap(),
            r#"{"0":0}"#
        );
        assert_eq!(
            fs::read_to_string(dirs.config_file("epi_model_parameters_7.json")).unwrap(),
            r#"{"beta":0.5}"#
        );
        assert!(dirs.config_file("flux_parameters_7.json").is_file());

        for realization in 0..2 {
            let id = format!("7_{realization}");
            for name in [
                format!("market_info_{id}.json"),
                format!("market_network_{id}.txt"),
                format!("area_market_flux_{id}.txt"),
                format!("farm_info_{id}.json"),
            ] {
                assert!(dirs.config_file(&name).is_file(), "{name} missing");
            }

            let settings: JsonValue = serde_json::from_str(
                &fs::read_to_string(dirs.config_file(&format!("settings_{id}.json"))).unwrap(),
            )
            .unwrap();
            assert_eq!(settings["scenarioID"], JsonValue::from(id.as_str()));
            assert_eq!(settings["realizationID"], JsonValue::from(realization));
            assert_eq!(settings["bts"], serde_json::json!(["BR"]));
            assert_eq!(settings["Tmax"], JsonValue::from(100));
            assert_eq!(
                settings["output_folder_path"],
                path_value(&out.path().join("results").join("scenario_7"))
            );

            let farms: JsonValue = serde_json::from_str(
                &fs::read_to_string(dirs.config_file(&format!("farm_info_{id}.json"))).unwrap(),
            )
            .unwrap();
            let farms = farms.as_object().unwrap();
            assert_eq!(farms.len(), 5);
            assert!(farms.values().all(|farm| farm["catchment_area"] == 0));
        }
    }

    /// [`SCENARIO`] written as a specification to be expanded.
    ///
    /// Arrays hold candidate values, so array-valued parameters are wrapped or kept whole with the
    /// stop marker.
    fn write_spec(dir: &Path, replace: (&str, &str)) -> PathBuf {
        let spec = SCENARIO
            .replace(r#"bts = ["BR"]"#, r#"bts = [["BR"]]"#)
            .replace(r#"districts = ["DHAKA"]"#, r#"districts = [["DHAKA"]]"#)
            .replace("prop_birds_market.BR", "prop_birds_market._BR")
            .replace(replace.0, replace.1)
            + "\n[expansion]\nshared = { \"general_settings/n_realizations\" = 1 }\n";
        let spec_path = dir.join("scenarios.toml");
        fs::write(&spec_path, spec).unwrap();
        spec_path
    }

    #[rstest]
    fn test_load_scenarios(input_dir: TempDir) {
        let spec_path = write_spec(
            input_dir.path(),
            ("rho_market = 0.5", "rho_market = [0.1, 0.5, 0.9]"),
        );

        let scenarios = load_scenarios(&spec_path).unwrap();
        assert_eq!(scenarios.len(), 3);
        assert_eq!(
            scenarios
                .iter()
                .map(|s| s.popgenerator_settings.market_network_params.rho_market)
                .collect::<Vec<_>>(),
            [0.1, 0.5, 0.9]
        );
        for scenario in &scenarios {
            assert_eq!(scenario.general_settings.bts, [BirdType::Broiler]);
            assert_eq!(scenario.general_settings.n_realizations, 1);
            assert_eq!(
                scenario.popgenerator_settings.market_params.prop_birds_market[&BirdType::Broiler]
                    .wholesale,
                [0.5, 0.0]
            );
        }
    }

    #[rstest]
    fn test_load_scenarios_invalid(input_dir: TempDir) {
        let spec_path = write_spec(input_dir.path(), ("n_farms = 5", "n_farms = { DE = 5 }"));
        assert_eq!(
            load_scenarios(&spec_path)
                .unwrap_err()
                .root_cause()
                .to_string(),
            "n_farms has no entry for BR"
        );
        assert_error!(load_scenarios(&spec_path), "Invalid parameters for scenario 0");
    }
}
