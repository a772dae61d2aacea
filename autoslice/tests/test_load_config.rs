use std::fs::write;

use autoslice::load_config::{load_bom, load_run_config};
use autoslice_core::config::PlateTimePolicy;
use tempfile::NamedTempFile;

const VALID_CONFIG: &str = "\
project_name: clock
work_dir: ./tmp/clock
printer:
  bed_width_mm: 250.0
  bed_depth_mm: 210.0
  max_height_mm: 210.0
material:
  cost_per_mm3: 0.0002
tools:
  converter_bin: step-convert
  slicer_bin: prusa-slicer
  profile: profiles/pla.ini
plate_time: sequential
bom:
  rotor: 2
  cover: 1
";

#[test]
fn loads_valid_config_with_inline_bom() {
    let file = NamedTempFile::new().expect("Creating temp config file failed");
    write(file.path(), VALID_CONFIG).expect("Writing temp config failed");

    let config = load_run_config(file.path()).expect("valid config must load");
    assert_eq!(config.run.project_name, "clock");
    assert_eq!(config.run.printer.bed_width_mm, 250.0);
    assert_eq!(config.run.plate_time, PlateTimePolicy::Sequential);
    // Defaults apply for omitted sections.
    assert_eq!(config.run.retry.max_attempts, 5);
    assert_eq!(config.run.tools.timeout_secs, 600);
    assert!(!config.run.fresh_queue);

    let bom = config.bom().expect("inline BOM must be accepted");
    assert_eq!(bom.get("rotor"), Some(2));
    assert_eq!(bom.get("cover"), Some(1));
}

#[test]
fn rejects_unreadable_config_path() {
    let err = load_run_config("definitely-not-a-config.yaml")
        .expect_err("missing file must fail");
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn rejects_invalid_yaml() {
    let file = NamedTempFile::new().unwrap();
    write(file.path(), "printer: [not, a, mapping").unwrap();
    let err = load_run_config(file.path()).expect_err("bad YAML must fail");
    assert!(err.to_string().contains("Failed to parse config YAML"));
}

#[test]
fn rejects_non_positive_printer_dimensions() {
    let file = NamedTempFile::new().unwrap();
    write(
        file.path(),
        VALID_CONFIG.replace("bed_width_mm: 250.0", "bed_width_mm: 0.0"),
    )
    .unwrap();
    let err = load_run_config(file.path()).expect_err("zero bed width must fail");
    assert!(err.to_string().contains("printer dimensions"));
}

#[test]
fn config_without_bom_section_requires_bom_flag() {
    let file = NamedTempFile::new().unwrap();
    let without_bom = VALID_CONFIG
        .replace("bom:\n  rotor: 2\n  cover: 1\n", "");
    write(file.path(), without_bom).unwrap();
    let config = load_run_config(file.path()).expect("config without BOM is valid");
    let err = config.bom().expect_err("missing BOM must be reported");
    assert!(err.to_string().contains("--bom"));
}

#[test]
fn loads_bom_file() {
    let file = NamedTempFile::new().unwrap();
    write(file.path(), "rotor: 2\ncover: 1\n").unwrap();
    let bom = load_bom(file.path()).expect("valid BOM must load");
    assert_eq!(bom.len(), 2);
    assert_eq!(bom.get("rotor"), Some(2));
}

#[test]
fn rejects_zero_quantity_in_bom() {
    let file = NamedTempFile::new().unwrap();
    write(file.path(), "rotor: 0\n").unwrap();
    let err = load_bom(file.path()).expect_err("zero quantity must fail");
    assert!(err.to_string().contains("positive"));
}
