use sqm::config::{Axis, Config, SeedMode, SweepConfig, SweepParam};
use sqm::error::SqmError;

const SAMPLE_YAML: &str = "\
simulation:
  dtau: 0.3d0
  ds: 0.3d-5
  s_end: 1d0
  Nsample: 50
paths:
  output_dir: ./out
  fortran_binary: ./a.out
sweep:
  U: 20.0
  mu_start: 0.0
  mu_end: 1.0
  mu_step: 0.25
seed:
  mode: hybrid
  base_seed: 100
";

#[test]
fn test_yaml_with_range_sweep() {
    let cfg = Config::from_yaml_str(SAMPLE_YAML).unwrap();
    assert_eq!(cfg.simulation.nsample, 50);
    assert_eq!(cfg.simulation.ds, "0.3d-5");

    let sweep = cfg.sweep.as_ref().unwrap();
    assert_eq!(sweep.param(), SweepParam::Mu);
    assert_eq!(sweep.fixed(), 20.0);
    assert_eq!(sweep.values(), &[0.0, 0.25, 0.5, 0.75]);

    assert_eq!(cfg.seed.mode, SeedMode::Hybrid);
    assert_eq!(cfg.seed.get_seed(2).unwrap(), Some(102));
}

#[test]
fn test_missing_sections_use_defaults() {
    let cfg = Config::from_yaml_str("simulation:\n  Nsample: 10\n").unwrap();
    assert_eq!(cfg.simulation.nsample, 10);
    assert_eq!(cfg.simulation.dtau, "0.3d0");
    assert!(cfg.sweep.is_none());
    assert_eq!(cfg.seed.mode, SeedMode::System);
}

#[test]
fn test_invalid_sweep_is_rejected_on_load() {
    let both = "sweep:\n  U_values: [1.0, 2.0]\n  mu_values: [0.0, 1.0]\n";
    assert!(Config::from_yaml_str(both).is_err());

    let partial = "sweep:\n  U: 1.0\n  mu_start: 0.0\n  mu_end: 1.0\n";
    assert!(Config::from_yaml_str(partial).is_err());
}

#[test]
fn test_yaml_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yaml");
    let cfg = Config {
        sweep: Some(
            SweepConfig::new(Some(Axis::Sweep(vec![1.0, 2.5])), Some(Axis::Fixed(0.5))).unwrap(),
        ),
        ..Config::default()
    };
    cfg.to_yaml(&path).unwrap();
    let back = Config::load(&path).unwrap();
    assert_eq!(back, cfg);
}

#[test]
fn test_json_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let cfg = Config::default();
    cfg.to_json(&path).unwrap();
    assert_eq!(Config::load(&path).unwrap(), cfg);
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, SqmError::NotFound(_)));
}
