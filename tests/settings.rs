use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_chrom_session::campaign::{Campaign, Chromatogram, RawData};
use kira_chrom_session::error::KiraError;
use kira_chrom_session::settings::ProcessingSettings;

fn campaign_spanning(time: Vec<f64>, wavelength: Vec<f64>) -> Campaign {
    let absorbance = vec![vec![0.0; wavelength.len()]; time.len()];
    let mut campaign = Campaign::new();
    campaign.push(Chromatogram {
        name: "Sample 1".to_string(),
        sample_path: "s.txt".to_string(),
        blank_path: None,
        raw: RawData::new(time, wavelength, absorbance).unwrap(),
        peaks: Vec::new(),
    });
    campaign
}

#[test]
fn partial_text_fills_defaults() {
    let settings = ProcessingSettings::from_text(r#"{ "min_prominence": 0.02 }"#).unwrap();
    assert_eq!(settings.min_prominence, 0.02);
    assert_eq!(settings.max_wavelength, 600.0);
    assert_eq!(settings.min_rel_integral, 0.01);
}

#[test]
fn save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("settings.yaml")).unwrap();
    let settings = ProcessingSettings {
        max_peak_distance: 0.75,
        min_elution_time: 1.5,
        ..ProcessingSettings::default()
    };
    settings.save(&path).unwrap();
    assert_eq!(ProcessingSettings::load(&path).unwrap(), settings);
}

#[test]
fn inverted_ranges_are_rejected() {
    assert_matches!(
        ProcessingSettings::from_text(r#"{ "min_elution_time": 5, "max_elution_time": 2 }"#),
        Err(KiraError::SettingsParse(_))
    );
    assert_matches!(
        ProcessingSettings::from_text(r#"{ "min_wavelength": 700 }"#),
        Err(KiraError::SettingsParse(_))
    );
    assert_matches!(
        ProcessingSettings::from_text("\"fast\""),
        Err(KiraError::SettingsParse(_))
    );
}

#[test]
fn clamping_follows_campaign_axes() {
    let campaign = campaign_spanning(vec![0.123, 1.0, 12.347], vec![239.6, 300.0, 410.2]);
    let clamped = ProcessingSettings::default().clamped_to(&campaign);
    assert_eq!(clamped.min_wavelength, 240.0);
    assert_eq!(clamped.max_wavelength, 410.0);
    assert_eq!(clamped.min_elution_time, 0.12);
    assert_eq!(clamped.max_elution_time, 12.35);
    assert_eq!(clamped.min_prominence, 0.001);

    let narrow = ProcessingSettings {
        min_wavelength: 250.0,
        max_wavelength: 280.0,
        min_elution_time: 2.0,
        max_elution_time: 4.0,
        ..ProcessingSettings::default()
    };
    assert_eq!(narrow.clamped_to(&campaign), narrow);
    assert_eq!(narrow.clamped_to(&Campaign::new()), narrow);
}

#[test]
fn reads_yaml_mappings() {
    let text = "\
min_rel_prominence: 0.05
max_wavelength: 400
min_elution_time: 1.5
";
    let settings = ProcessingSettings::from_text(text).unwrap();
    assert_eq!(settings.min_rel_prominence, 0.05);
    assert_eq!(settings.max_wavelength, 400.0);
    assert_eq!(settings.min_elution_time, 1.5);
    assert_eq!(settings.min_wavelength, 220.0);

    let written = settings.to_text().unwrap();
    assert!(written.contains("max_wavelength: 400.0"));
    assert_eq!(ProcessingSettings::from_text(&written).unwrap(), settings);
}

#[test]
fn descending_wavelengths_clamp_to_a_valid_range() {
    let campaign = campaign_spanning(vec![0.0, 1.0], vec![410.0, 300.0, 240.0]);
    let clamped = ProcessingSettings::default().clamped_to(&campaign);
    assert_eq!(clamped.min_wavelength, 240.0);
    assert_eq!(clamped.max_wavelength, 410.0);
    assert!(clamped.validate().is_ok());
}
