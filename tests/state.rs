use std::sync::Arc;
use std::thread;

use assert_matches::assert_matches;

use kira_chrom_session::campaign::{Campaign, Chromatogram, RawData};
use kira_chrom_session::domain::{FileId, ProcessingState, ProcessingStatus, Severity};
use kira_chrom_session::error::KiraError;
use kira_chrom_session::state::StateStore;

fn campaign_of(size: usize) -> Campaign {
    let mut campaign = Campaign::new();
    for i in 0..size {
        campaign.push(Chromatogram {
            name: format!("generation {size}"),
            sample_path: format!("s{i}.txt"),
            blank_path: None,
            raw: RawData::new(vec![0.0, 1.0], vec![254.0], vec![vec![0.0], vec![1.0]]).unwrap(),
            peaks: Vec::new(),
        });
    }
    campaign
}

#[test]
fn defaults_after_init() {
    let state = StateStore::new();
    assert!(state.campaign().is_empty());
    assert!(state.cached_files().is_empty());
    assert_eq!(state.current_blank(), None);
    assert_eq!(state.displayed_chromatogram(), None);
    assert_eq!(state.processing_status().state, ProcessingState::Idle);
}

#[test]
fn setters_replace_values() {
    let state = StateStore::new();
    state.set_current_blank(Some(FileId::new(3)));
    state.set_displayed_chromatogram(Some(1));
    state.set_processing_status(ProcessingStatus::processing());

    assert_eq!(state.current_blank(), Some(FileId::new(3)));
    assert_eq!(state.displayed_chromatogram(), Some(1));
    assert_eq!(state.processing_status().state, ProcessingState::Processing);
}

#[test]
fn snapshots_survive_replacement() {
    let state = StateStore::new();
    state.set_campaign(campaign_of(2));
    let before = state.campaign();

    let committed = state.set_campaign(campaign_of(5));
    assert_eq!(before.len(), 2);
    assert_eq!(committed.len(), 5);
    assert!(Arc::ptr_eq(&committed, &state.campaign()));
}

#[test]
fn transition_applies_only_when_requested() {
    let state = StateStore::new();

    let replaced = state.transition_processing_status(|status| {
        (status.state == ProcessingState::DataReady).then(|| status.acknowledged())
    });
    assert!(replaced.is_none());

    state.set_processing_status(ProcessingStatus::data_ready("done", Severity::Info));
    let replaced = state
        .transition_processing_status(|status| Some(status.acknowledged()))
        .unwrap();
    assert_eq!(replaced.state, ProcessingState::DataReady);
    assert_eq!(state.processing_status().state, ProcessingState::Idle);
    assert_eq!(state.processing_status().message, "done");
}

#[test]
fn readers_see_whole_campaigns() {
    let state = Arc::new(StateStore::new());
    state.set_campaign(campaign_of(1));

    let writer = {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            for round in 0..200 {
                state.set_campaign(campaign_of(1 + round % 4));
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for _ in 0..500 {
                    let campaign = state.campaign();
                    let expected = format!("generation {}", campaign.len());
                    assert!(campaign.chromatograms.values().all(|c| c.name == expected));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn guarded_commit_waits_for_processing_to_end() {
    let state = StateStore::new();
    let before = state.set_campaign(campaign_of(1));

    state.set_processing_status(ProcessingStatus::processing());
    assert_matches!(
        state.set_campaign_unless_processing(campaign_of(3)),
        Err(KiraError::Busy)
    );
    assert!(Arc::ptr_eq(&before, &state.campaign()));

    state.set_processing_status(ProcessingStatus::data_ready("done", Severity::Info));
    let committed = state.set_campaign_unless_processing(campaign_of(3)).unwrap();
    assert!(Arc::ptr_eq(&committed, &state.campaign()));
    assert_eq!(state.processing_status().state, ProcessingState::DataReady);
}
