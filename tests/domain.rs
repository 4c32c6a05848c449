use assert_matches::assert_matches;

use dicom_indexer::domain::{HierarchyPath, InputSource, SessionKey, SessionMetadata};
use dicom_indexer::error::IndexerError;
use dicom_indexer::resolve::{PathResolver, SessionLayout};

mod common;

#[test]
fn parse_session_key() {
    let key: SessionKey = "StudyDescription".parse().unwrap();
    assert_eq!(key.tag(), (0x0008, 0x1030));
    let err = "Modality".parse::<SessionKey>().unwrap_err();
    assert_matches!(err, IndexerError::MissingMetadataField(_));
}

#[test]
fn hierarchy_path_serde_roundtrip_as_string() {
    let path: HierarchyPath = "Smith/Jane/Brain".parse().unwrap();
    let json = serde_json::to_string(&path).unwrap();
    assert_eq!(json, "\"Smith/Jane/Brain\"");
    let err = serde_json::from_str::<HierarchyPath>("\"\"").unwrap_err();
    assert!(err.to_string().contains("invalid"));
}

#[test]
fn referrer_and_study_expand_to_three_segments() {
    let metadata = SessionMetadata::new()
        .with(SessionKey::ReferringPhysicianName, "Smith^Jane")
        .with(SessionKey::StudyDescription, "Brain");
    let resolver = PathResolver::new("{ReferringPhysicianName}/{StudyDescription}").unwrap();
    let path = resolver.resolve(&metadata).unwrap();
    assert_eq!(path.segments(), ["Smith", "Jane", "Brain"]);
}

#[test]
fn session_layout_paths() {
    let layout = SessionLayout::derive(&common::config(None), &common::session_metadata()).unwrap();
    assert_eq!(layout.session_id, "1.2.840.113619.2.55");
    assert_eq!(
        layout.session_project.to_string(),
        "Smith/Jane/Brain/sourcedata/dicoms/1.2.840.113619.2.55"
    );
    assert_eq!(
        layout.study_project.to_string(),
        "Smith/Jane/Brain/sourcedata/dicoms/study"
    );
    assert_eq!(layout.bids_project.to_string(), "Smith/Jane/Brain/bids");
    assert_eq!(
        layout
            .shared_groups
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        ["Smith/Jane/Brain/derivatives", "Smith/Jane/Brain/qc"]
    );
    assert_eq!(layout.session_subpath.as_str(), "P001/1.2.840.113619.2.55");
}

#[test]
fn layout_fails_without_session_tag() {
    let metadata = SessionMetadata::new()
        .with(SessionKey::ReferringPhysicianName, "Smith")
        .with(SessionKey::StudyDescription, "Brain")
        .with(SessionKey::PatientID, "P001");
    let err = SessionLayout::derive(&common::config(None), &metadata).unwrap_err();
    assert_matches!(err, IndexerError::MissingMetadataField(field) if field == "StudyInstanceUID");
}

#[test]
fn file_url_becomes_local_input() {
    let temp = tempfile::tempdir().unwrap();
    let file = temp.path().join("session.7z");
    std::fs::write(&file, b"7z").unwrap();
    let input: InputSource = format!("file://{}", file.display()).parse().unwrap();
    assert_matches!(input, InputSource::LocalFile(_));
}
