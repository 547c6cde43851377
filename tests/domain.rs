use assert_matches::assert_matches;

use epaper_archiver::domain::{
    ArchiveRange, EditionDate, JobKind, Publication, TargetArtifact, canonical_file_name,
    date_from_file_name,
};
use epaper_archiver::error::ArchiverError;

#[test]
fn canonical_name_round_trips_its_date() {
    let date: EditionDate = "2025-01-05".parse().unwrap();
    let publication: Publication = "Wormser Zeitung".parse().unwrap();
    let name = canonical_file_name(date, &publication);
    assert_eq!(name, "2025-01-05_Wormser_Zeitung.pdf");
    assert_eq!(date_from_file_name(&name), Some(date));
    assert_eq!(date_from_file_name("download.pdf"), None);
}

#[test]
fn invalid_inputs() {
    assert_matches!(
        "05.01.2025".parse::<EditionDate>(),
        Err(ArchiverError::InvalidDate(_))
    );
    assert!("../etc".parse::<Publication>().is_err());
    assert_matches!(
        ArchiveRange::new("2025-01-05".parse().unwrap(), 0),
        Err(ArchiverError::InvalidRange(_))
    );
}

#[test]
fn range_walks_backwards_across_month_end() {
    let range = ArchiveRange::new("2025-03-02".parse().unwrap(), 4).unwrap();
    let dates: Vec<String> = range.dates().map(|d| d.iso()).collect();
    assert_eq!(dates, ["2025-03-02", "2025-03-01", "2025-02-28", "2025-02-27"]);
}

#[test]
fn week_label_uses_iso_year() {
    let date: EditionDate = "2024-12-30".parse().unwrap();
    assert_eq!(date.week_label(), "2025-W01");
}

#[test]
fn target_validity_is_strictly_above_threshold() {
    let temp = tempfile::tempdir().unwrap();
    let publication: Publication = "Paper".parse().unwrap();
    let target = TargetArtifact::new(temp.path(), "2025-01-05".parse().unwrap(), &publication, 100);

    assert!(!target.is_valid());
    std::fs::write(&target.path, vec![0u8; 100]).unwrap();
    assert!(!target.is_valid());
    std::fs::write(&target.path, vec![0u8; 101]).unwrap();
    assert!(target.is_valid());
    assert_eq!(target.current_size(), Some(101));
}

#[test]
fn job_kinds_display_kebab_case() {
    assert_eq!(JobKind::ArchiveBackfill.to_string(), "archive-backfill");
    assert_eq!(
        serde_json::to_string(&JobKind::FullReindex).unwrap(),
        "\"full-reindex\""
    );
}
