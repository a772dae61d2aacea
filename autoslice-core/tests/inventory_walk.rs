use std::fs;

use autoslice_core::contract::MockMeshConverter;
use autoslice_core::inventory::{
    walk_source, Bom, FileSource, InventoryError, ReconcileWarning, SourceFormat,
};
use tempfile::tempdir;

fn bom(entries: &[(&str, u32)]) -> Bom {
    Bom::from_entries(entries.iter().map(|(name, qty)| (name.to_string(), *qty)))
}

#[tokio::test]
async fn folder_walk_discovers_supported_files_in_order() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("bracket.stl"), b"solid bracket").unwrap();
    fs::write(dir.path().join("cover.step"), b"ISO-10303-21;").unwrap();
    fs::write(dir.path().join("notes.txt"), b"not a part").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub").join("gear.STP"), b"ISO-10303-21;").unwrap();

    let converter = MockMeshConverter::new();
    let inventory = walk_source(
        &FileSource::Folder(dir.path().to_path_buf()),
        &converter,
        &bom(&[("bracket", 1), ("cover", 1), ("gear", 1)]),
    )
    .await
    .expect("walk should succeed");

    let names: Vec<&str> = inventory.parts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["bracket", "cover", "gear"]);
    assert_eq!(inventory.parts[0].format, SourceFormat::Mesh);
    assert_eq!(inventory.parts[1].format, SourceFormat::AssemblyStep);
    assert_eq!(inventory.parts[2].format, SourceFormat::AssemblyStep);
    assert!(
        inventory.warnings.is_empty(),
        "exact BOM agreement must not produce warnings, got {:?}",
        inventory.warnings
    );
}

#[tokio::test]
async fn reconciliation_warns_on_missing_and_unlisted() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.stl"), b"solid a").unwrap();
    fs::write(dir.path().join("b.stl"), b"solid b").unwrap();

    let converter = MockMeshConverter::new();
    let inventory = walk_source(
        &FileSource::Folder(dir.path().to_path_buf()),
        &converter,
        &bom(&[("a", 2), ("c", 4)]),
    )
    .await
    .expect("walk should succeed");

    let a = inventory.parts.iter().find(|p| p.name == "a").unwrap();
    assert_eq!(a.quantity, 2, "BOM quantity should be attached");
    let b = inventory.parts.iter().find(|p| p.name == "b").unwrap();
    assert_eq!(b.quantity, 1, "unlisted part defaults to quantity 1");

    assert!(inventory
        .warnings
        .contains(&ReconcileWarning::Unlisted { part: "b".into() }));
    assert!(inventory.warnings.contains(&ReconcileWarning::Missing {
        part: "c".into(),
        quantity: 4
    }));
    assert_eq!(inventory.warnings.len(), 2);
}

#[tokio::test]
async fn duplicate_identities_keep_first_and_warn() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.step"), b"ISO-10303-21;").unwrap();
    fs::write(dir.path().join("a.stl"), b"solid a").unwrap();

    let converter = MockMeshConverter::new();
    let inventory = walk_source(
        &FileSource::Folder(dir.path().to_path_buf()),
        &converter,
        &bom(&[("a", 1)]),
    )
    .await
    .expect("walk should succeed");

    assert_eq!(inventory.parts.len(), 1);
    // Entries are visited name-sorted, so a.step is discovered first.
    assert_eq!(inventory.parts[0].format, SourceFormat::AssemblyStep);
    assert!(inventory
        .warnings
        .contains(&ReconcileWarning::Duplicate { part: "a".into() }));
}

#[tokio::test]
async fn missing_source_path_is_fatal() {
    let converter = MockMeshConverter::new();
    let err = walk_source(
        &FileSource::Folder("/definitely/not/a/real/path".into()),
        &converter,
        &Bom::default(),
    )
    .await
    .expect_err("missing source must fail");
    assert!(matches!(err, InventoryError::SourceMissing(_)));
}

#[tokio::test]
async fn folder_with_no_supported_files_is_fatal() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("readme.md"), b"no parts here").unwrap();

    let converter = MockMeshConverter::new();
    let err = walk_source(
        &FileSource::Folder(dir.path().to_path_buf()),
        &converter,
        &Bom::default(),
    )
    .await
    .expect_err("a folder without parts must fail");
    assert!(matches!(err, InventoryError::NoSupportedFiles(_)));
}

#[tokio::test]
async fn assembly_components_become_parts() {
    let dir = tempdir().unwrap();
    let assembly = dir.path().join("clock.step");
    fs::write(&assembly, b"ISO-10303-21;").unwrap();

    let mut converter = MockMeshConverter::new();
    converter
        .expect_list_components()
        .times(1)
        .returning(|_| Ok(vec!["frame".to_string(), "lid".to_string()]));

    let inventory = walk_source(
        &FileSource::Assembly(assembly.clone()),
        &converter,
        &bom(&[("frame", 3)]),
    )
    .await
    .expect("walk should succeed");

    assert_eq!(inventory.parts.len(), 2);
    let frame = &inventory.parts[0];
    assert_eq!(frame.name, "frame");
    assert_eq!(frame.quantity, 3);
    assert_eq!(frame.component.as_deref(), Some("frame"));
    assert_eq!(frame.source_path, assembly);
    assert_eq!(frame.format, SourceFormat::AssemblyStep);
    assert!(inventory
        .warnings
        .contains(&ReconcileWarning::Unlisted { part: "lid".into() }));
}

#[tokio::test]
async fn assembly_with_no_components_is_fatal() {
    let dir = tempdir().unwrap();
    let assembly = dir.path().join("empty.step");
    fs::write(&assembly, b"ISO-10303-21;").unwrap();

    let mut converter = MockMeshConverter::new();
    converter
        .expect_list_components()
        .times(1)
        .returning(|_| Ok(Vec::new()));

    let err = walk_source(&FileSource::Assembly(assembly), &converter, &Bom::default())
        .await
        .expect_err("an empty assembly must fail");
    assert!(matches!(err, InventoryError::NoSupportedFiles(_)));
}
