use std::fs::{self, create_dir_all, File};
use std::io::{Read, Write};
use std::path::Path;

use gtfs_transformer::archive::{pack, unpack, ArchiveError};
use tempfile::tempdir;

fn write_feed(dir: &Path) {
    create_dir_all(dir.join("extras")).unwrap();
    fs::write(dir.join("stops.txt"), "stop_id,stop_name\nS1,Main St\n").unwrap();
    fs::write(dir.join("agency.txt"), "agency_id,agency_name\nA,Metro\n").unwrap();
    fs::write(dir.join("extras/notes.txt"), "hello").unwrap();
}

fn entry_names(archive: &Path) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

#[test]
fn test_pack_writes_sorted_relative_entries() {
    let tmp = tempdir().unwrap();
    let feed = tmp.path().join("feed");
    write_feed(&feed);
    let archive = tmp.path().join("feed.zip");

    let count = pack(&feed, &archive).expect("pack should succeed");

    assert_eq!(count, 3);
    assert_eq!(
        entry_names(&archive),
        vec!["agency.txt", "extras/notes.txt", "stops.txt"]
    );

    let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let mut stops = String::new();
    zip.by_name("stops.txt")
        .unwrap()
        .read_to_string(&mut stops)
        .unwrap();
    assert!(stops.contains("S1,Main St"));
}

#[test]
fn test_unpack_restores_packed_tree() {
    let tmp = tempdir().unwrap();
    let feed = tmp.path().join("feed");
    write_feed(&feed);
    let archive = tmp.path().join("feed.zip");
    pack(&feed, &archive).unwrap();

    let dest = tmp.path().join("unpacked");
    let mut extracted = unpack(&archive, &dest).expect("unpack should succeed");
    extracted.sort();

    assert_eq!(extracted.len(), 3);
    assert_eq!(
        fs::read_to_string(dest.join("extras/notes.txt")).unwrap(),
        "hello"
    );
    assert_eq!(
        fs::read_to_string(dest.join("agency.txt")).unwrap(),
        "agency_id,agency_name\nA,Metro\n"
    );
}

#[test]
fn test_pack_rejects_empty_directory() {
    let tmp = tempdir().unwrap();
    let empty = tmp.path().join("empty");
    create_dir_all(empty.join("nested")).unwrap();

    let err = pack(&empty, &tmp.path().join("out.zip")).unwrap_err();
    assert!(matches!(err, ArchiveError::Empty(_)), "got {err:?}");
}

#[test]
fn test_unpack_skips_entries_escaping_destination() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("evil.zip");
    {
        let file = File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("../escaped.txt", options).unwrap();
        writer.write_all(b"nope").unwrap();
        writer.start_file("routes.txt", options).unwrap();
        writer.write_all(b"route_id\nR1\n").unwrap();
        writer.finish().unwrap();
    }

    let dest = tmp.path().join("out");
    let extracted = unpack(&archive, &dest).unwrap();

    assert_eq!(extracted, vec![dest.join("routes.txt")]);
    assert!(!tmp.path().join("escaped.txt").exists());
}

#[test]
fn test_unpack_reports_corrupt_archive() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("broken.zip");
    fs::write(&archive, b"this is not a zip file").unwrap();

    let err = unpack(&archive, &tmp.path().join("out")).unwrap_err();
    assert!(matches!(err, ArchiveError::Read { .. }), "got {err:?}");
}
