use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_chrom_session::builder::CampaignBuilder;
use kira_chrom_session::cache::FileCache;
use kira_chrom_session::campaign::CompoundReference;
use kira_chrom_session::domain::{FileId, ProcessingStatus, TableRow};
use kira_chrom_session::error::KiraError;
use kira_chrom_session::settings::ProcessingSettings;
use kira_chrom_session::state::StateStore;

struct Fixture {
    _dir: TempDir,
    state: Arc<StateStore>,
    cache: FileCache,
    builder: CampaignBuilder,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(StateStore::new());
    let root = Utf8PathBuf::from_path_buf(dir.path().join("cache")).unwrap();
    let cache = FileCache::new(root, Arc::clone(&state));
    cache.init().unwrap();
    let builder = CampaignBuilder::new(Arc::clone(&state), cache.clone());
    Fixture {
        _dir: dir,
        state,
        cache,
        builder,
    }
}

/// Two wavelengths; absorbance is `level` and `2 * level` everywhere.
fn dad_text(times: &[f64], level: f64) -> String {
    let mut text = String::from("# exported by detector\ntime,250,260\n");
    for t in times {
        text.push_str(&format!("{t},{level},{}\n", level * 2.0));
    }
    text
}

fn upload(fixture: &Fixture, name: &str, content: &str) -> FileId {
    fixture.cache.store(name, content.as_bytes()).unwrap()
}

fn new_row(name: &str, sample: FileId, blank: Option<FileId>) -> TableRow {
    TableRow {
        name: name.to_string(),
        sample_file_id: Some(sample),
        blank_file_id: blank,
        ..TableRow::default()
    }
}

const TIMES: [f64; 4] = [0.0, 0.5, 1.0, 1.5];

#[test]
fn new_rows_get_contiguous_indices() {
    let fixture = fixture();
    let rows: Vec<TableRow> = (0..4)
        .map(|i| {
            let id = upload(&fixture, &format!("s{i}.txt"), &dad_text(&TIMES, i as f64));
            new_row(&format!("Sample {}", i + 1), id, None)
        })
        .collect();

    let outcome = fixture.builder.build(&rows, None).unwrap();
    assert_eq!(outcome.campaign.len(), 4);
    assert_eq!(
        outcome.campaign.chromatograms.keys().copied().collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert!(outcome.warnings.is_empty());
    assert!(Arc::ptr_eq(&outcome.campaign, &fixture.state.campaign()));
}

#[test]
fn concentration_requires_compound_name() {
    let fixture = fixture();
    let blank = upload(&fixture, "b.txt", &dad_text(&TIMES, 1.0));
    let sample = upload(&fixture, "s.txt", &dad_text(&TIMES, 4.0));

    let mut row = new_row("Sample 1", sample, Some(blank));
    row.compound_conc = Some("12.5".to_string());
    let err = fixture.builder.build(&[row.clone()], None).unwrap_err();
    assert_matches!(err, KiraError::Validation(_));
    assert!(fixture.state.campaign().is_empty());

    row.compound_name = Some("X".to_string());
    let outcome = fixture.builder.build(&[row], None).unwrap();
    let campaign = outcome.campaign;
    assert_eq!(campaign.len(), 1);
    assert_eq!(
        campaign.compound_references[&0],
        CompoundReference {
            compound: "X".to_string(),
            concentration: Some(12.5),
        }
    );

    let chromatogram = &campaign.chromatograms[&0];
    assert_eq!(chromatogram.sample_path, "s.txt");
    assert_eq!(chromatogram.blank_path.as_deref(), Some("b.txt"));
    assert_eq!(chromatogram.raw.absorbance[2], vec![3.0, 6.0]);
}

#[test]
fn non_numeric_concentrations_are_rejected() {
    let fixture = fixture();
    let sample = upload(&fixture, "s.txt", &dad_text(&TIMES, 1.0));

    let mut row = new_row("Sample 1", sample, None);
    row.compound_name = Some("X".to_string());
    row.compound_conc = Some("a lot".to_string());
    assert_matches!(
        fixture.builder.build(&[row.clone()], None),
        Err(KiraError::Validation(_))
    );

    row.compound_conc = None;
    row.istd_conc = Some("1,5".to_string());
    assert_matches!(
        fixture.builder.build(&[row], None),
        Err(KiraError::Validation(_))
    );
}

#[test]
fn internal_standard_must_be_in_table() {
    let fixture = fixture();
    let a = upload(&fixture, "a.txt", &dad_text(&TIMES, 1.0));
    let b = upload(&fixture, "b.txt", &dad_text(&TIMES, 2.0));

    let mut rows = vec![new_row("A", a, None), new_row("B", b, None)];
    rows[1].compound_name = Some("caffeine".to_string());
    rows[0].istd_conc = Some("0.5".to_string());

    let err = fixture.builder.build(&rows, Some("theobromine")).unwrap_err();
    assert_matches!(err, KiraError::Validation(message) if message.contains("internal standard"));

    let campaign = fixture.builder.build(&rows, Some("caffeine")).unwrap().campaign;
    assert_eq!(campaign.istd_chromatogram, Some(1));
    assert_eq!(campaign.istd_compound(), Some("caffeine"));
    assert_eq!(campaign.istd_concentrations[&0], 0.5);

    let campaign = fixture.builder.build(&rows, Some("")).unwrap().campaign;
    assert_eq!(campaign.istd_chromatogram, None);
}

#[test]
fn confirm_then_reopen_is_stable() {
    let fixture = fixture();
    let blank = upload(&fixture, "blank.txt", &dad_text(&TIMES, 0.5));
    let s1 = upload(&fixture, "one.txt", &dad_text(&TIMES, 3.0));
    let s2 = upload(&fixture, "two.txt", &dad_text(&TIMES, 7.25));

    let mut rows = vec![new_row("Standard", s1, Some(blank)), new_row("Run", s2, None)];
    rows[0].compound_name = Some("X".to_string());
    rows[0].compound_conc = Some("12.5".to_string());
    rows[1].istd_conc = Some("0.125".to_string());

    let first = fixture.builder.build(&rows, Some("X")).unwrap().campaign;
    let table = first.upload_table();
    assert!(table.rows.iter().all(|row| row.chromatogram_id.is_some()));
    assert_eq!(table.istd.as_deref(), Some("X"));

    let second = fixture
        .builder
        .build(&table.rows, table.istd.as_deref())
        .unwrap()
        .campaign;
    assert_eq!(*first, *second);
}

#[test]
fn loaded_rows_are_renamed_without_reloading() {
    let fixture = fixture();
    let sample = upload(&fixture, "s.txt", &dad_text(&TIMES, 1.0));
    fixture
        .builder
        .build(&[new_row("Sample 1", sample, None)], None)
        .unwrap();
    std::fs::remove_file(fixture.cache.get(sample).unwrap().cached_path).unwrap();

    let mut table = fixture.state.campaign().upload_table();
    table.rows[0].name = "Renamed".to_string();
    let campaign = fixture.builder.build(&table.rows, None).unwrap().campaign;
    assert_eq!(campaign.chromatograms[&0].name, "Renamed");
    assert_eq!(campaign.chromatograms[&0].raw.absorbance[0], vec![1.0, 2.0]);
}

#[test]
fn mismatched_time_axis_is_interpolated_with_warning() {
    let fixture = fixture();
    let a = upload(&fixture, "a.txt", &dad_text(&TIMES, 1.0));
    let b = upload(&fixture, "b.txt", &dad_text(&[0.0, 0.75, 1.5], 2.0));

    let outcome = fixture
        .builder
        .build(&[new_row("A", a, None), new_row("B", b, None)], None)
        .unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.campaign.chromatograms[&1].raw.time, TIMES.to_vec());
    assert_eq!(outcome.campaign.chromatograms[&1].raw.absorbance[1], vec![2.0, 4.0]);
}

#[test]
fn new_rows_are_appended_after_loaded_ones() {
    let fixture = fixture();
    let a = upload(&fixture, "a.txt", &dad_text(&TIMES, 1.0));
    let b = upload(&fixture, "b.txt", &dad_text(&TIMES, 2.0));
    fixture.builder.build(&[new_row("A", a, None)], None).unwrap();

    let mut rows = fixture.state.campaign().upload_table().rows;
    rows.push(new_row("B", b, None));
    let campaign = fixture.builder.build(&rows, None).unwrap().campaign;
    assert_eq!(campaign.chromatograms[&1].name, "B");
}

#[test]
fn settings_are_carried_over() {
    let fixture = fixture();
    let mut previous = (*fixture.state.campaign()).clone();
    let settings = ProcessingSettings {
        min_rel_prominence: 0.2,
        ..ProcessingSettings::default()
    };
    previous.settings = Some(settings);
    fixture.state.set_campaign(previous);

    let campaign = fixture.builder.build(&[], None).unwrap().campaign;
    assert!(campaign.is_empty());
    assert_eq!(campaign.settings, Some(settings));
}

#[test]
fn unknown_references_fail_without_commit() {
    let fixture = fixture();
    let rows = vec![TableRow {
        chromatogram_id: Some(9),
        name: "ghost".to_string(),
        ..TableRow::default()
    }];
    assert_matches!(
        fixture.builder.build(&rows, None),
        Err(KiraError::ChromatogramNotFound(9))
    );

    let rows = vec![new_row("missing", FileId::new(77), None)];
    assert_matches!(fixture.builder.build(&rows, None), Err(KiraError::NotFound(_)));

    let unparsable = upload(&fixture, "junk.txt", "time,250\n0.0,abc\n");
    let rows = vec![new_row("junk", unparsable, None)];
    assert_matches!(
        fixture.builder.build(&rows, None),
        Err(KiraError::DataFormat { .. })
    );
    assert!(fixture.state.campaign().is_empty());
}

#[test]
fn build_is_refused_while_processing() {
    let fixture = fixture();
    let sample = upload(&fixture, "s.txt", &dad_text(&TIMES, 1.0));
    let before = fixture.state.campaign();

    fixture
        .state
        .set_processing_status(ProcessingStatus::processing());
    assert_matches!(
        fixture.builder.build(&[new_row("Sample 1", sample, None)], None),
        Err(KiraError::Busy)
    );
    assert!(Arc::ptr_eq(&before, &fixture.state.campaign()));

    fixture.state.set_processing_status(ProcessingStatus::idle());
    let outcome = fixture
        .builder
        .build(&[new_row("Sample 1", sample, None)], None)
        .unwrap();
    assert_eq!(outcome.campaign.len(), 1);
}
