//! Re-analysing existing output directories and writing reports.

use std::fs;
use std::path::Path;

use num_complex::Complex64;
use sqm::collect::collect_dir;
use sqm::config::SweepParam;
use sqm::error::SqmError;
use sqm::fortran_io::{dat_filename, write_dat, Header, Sample};
use sqm::report::{write_correlation_csv, write_sweep_csv};
use sqm::runner::analyze_dat;

fn write_point(dir: &Path, u: f64, mu: f64) {
    let samples: Vec<Sample> = (0..4)
        .map(|k| Sample {
            a: vec![Complex64::new(1.0, 0.0); 4],
            a_ast: vec![Complex64::new(mu + k as f64, 0.0); 4],
        })
        .collect();
    let path = dir.join(dat_filename(u, mu, "1d0"));
    write_dat(path, &Header { nx: 4, u, mu, ntau: 2 }, &samples).unwrap();
}

#[test]
fn test_collect_infers_mu_sweep() {
    let dir = tempfile::tempdir().unwrap();
    for mu in [2.0, 0.0, 1.0] {
        write_point(dir.path(), 20.0, mu);
    }
    fs::File::create(dir.path().join("U=20.0,mu=3.0,s=1d0.dat")).unwrap();
    fs::write(dir.path().join("notes.txt"), "unrelated").unwrap();

    let collected = collect_dir(dir.path(), false).unwrap();
    assert_eq!(collected.param, SweepParam::Mu);
    assert_eq!(collected.fixed, 20.0);
    let mus: Vec<f64> = collected.points.iter().map(|p| p.mu).collect();
    assert_eq!(mus, vec![0.0, 1.0, 2.0]);
    // Mean of mu + k over k = 0..4
    assert_eq!(collected.points[1].correlation_midpoint, 2.5);
    assert_eq!(collected.skipped.len(), 1);
    assert!(collected.skipped[0].1.contains("empty"));
}

#[test]
fn test_collect_rejects_mixed_parameters() {
    let dir = tempfile::tempdir().unwrap();
    write_point(dir.path(), 1.0, 0.0);
    write_point(dir.path(), 2.0, 1.0);
    assert!(matches!(collect_dir(dir.path(), true), Err(SqmError::Config(_))));
}

#[test]
fn test_collect_empty_and_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(collect_dir(dir.path(), true), Err(SqmError::Config(_))));
    assert!(matches!(
        collect_dir(dir.path().join("absent"), true),
        Err(SqmError::NotFound(_))
    ));
}

#[test]
fn test_reports_are_readable_csv() {
    let dir = tempfile::tempdir().unwrap();
    for u in [1.0, 2.0] {
        write_point(dir.path(), u, 0.5);
    }
    let collected = collect_dir(dir.path(), true).unwrap();
    assert_eq!(collected.param, SweepParam::U);

    let sweep_csv = dir.path().join("reports").join("sweep.csv");
    write_sweep_csv(&sweep_csv, collected.param, &collected.points).unwrap();
    let mut rdr = csv::Reader::from_path(&sweep_csv).unwrap();
    let headers = rdr.headers().unwrap().clone();
    assert_eq!(&headers[0], "sweep_value");
    assert_eq!(&headers[5], "corrected_mean");
    let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][0], "1");
    assert_eq!(&rows[1][0], "2");
    // No autocorrelation analysis was requested.
    assert_eq!(&rows[0][5], "");

    let corr_csv = dir.path().join("corr.csv");
    write_correlation_csv(&corr_csv, &collected.points[0].correlation).unwrap();
    let rows: Vec<csv::StringRecord> = csv::Reader::from_path(&corr_csv)
        .unwrap()
        .records()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(&rows[3][0], "3");
}

#[test]
fn test_anticorrelated_series_leaves_corrected_error_unset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(dat_filename(1.0, 0.0, "1d0"));
    // Midpoint alternates 0, 1, 0, 1, ...
    let samples: Vec<Sample> = (0..40)
        .map(|k| Sample {
            a: vec![Complex64::new(1.0, 0.0); 2],
            a_ast: vec![Complex64::new((k % 2) as f64, 0.0); 2],
        })
        .collect();
    write_dat(&path, &Header { nx: 2, u: 1.0, mu: 0.0, ntau: 2 }, &samples).unwrap();

    let point = analyze_dat(&path, false).unwrap();
    assert_eq!(point.thermalization_skip, 0);
    assert!(point.tau_int.unwrap() < 0.0);
    assert_eq!(point.corrected_mean, Some(0.5));
    assert_eq!(point.corrected_error, None);
    assert_eq!(point.n_eff, Some(1.0));

    let csv_path = dir.path().join("sweep.csv");
    write_sweep_csv(&csv_path, SweepParam::U, &[point]).unwrap();
    let text = fs::read_to_string(&csv_path).unwrap();
    assert!(!text.contains("NaN"));
}
