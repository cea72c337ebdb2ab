//! Save/load fidelity and corruption handling.

#![cfg(feature = "persistence")]

use proxim::benchmark::create_clustered_dataset;
use proxim::persistence::{
    deserialize_index, read_binary_index_file, read_index_file, serialize_index,
    write_binary_index_file, write_index_file,
};
use proxim::{index_factory, BinaryFlatIndex, DistanceMetric, Error, Index, Registry, VectorIndex};

const D: usize = 16;

fn populated(desc: &str) -> (Index, Vec<f32>) {
    let ds = create_clustered_dataset(600, 10, D, 8, 0.05, 21);
    let mut idx = index_factory(D, desc, DistanceMetric::L2).unwrap();
    idx.train(&ds.train).unwrap();
    idx.add(&ds.train).unwrap();
    (idx, ds.test)
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn file_round_trip_preserves_search() {
    let dir = tempfile::tempdir().unwrap();
    for desc in [
        "Flat",
        "IVF8,Flat",
        "IVF8,SQ8",
        "SQ4",
        "SQfp16",
        "LSH32rt",
        "PCA8,IVF4,Flat",
        "RR16,Flat,RFlat",
    ] {
        let (mut idx, queries) = populated(desc);
        if idx.nprobe().is_ok() {
            idx.set_nprobe(3).unwrap();
        }
        let path = dir.path().join(format!("{}.pxix", desc.replace(',', "_")));
        write_index_file(&idx, &path).unwrap();
        let back = read_index_file(&path).unwrap();

        assert_eq!(back.ntotal(), idx.ntotal(), "{desc}");
        assert_eq!(back.dimension(), idx.dimension(), "{desc}");
        assert_eq!(back.is_trained(), idx.is_trained(), "{desc}");
        assert_eq!(
            back.search(&queries, 5).unwrap(),
            idx.search(&queries, 5).unwrap(),
            "{desc}"
        );
    }
}

#[test]
fn id_map_labels_survive() {
    let ds = create_clustered_dataset(100, 3, D, 4, 0.05, 2);
    let mut idx = index_factory(D, "IDMap,Flat", DistanceMetric::L2).unwrap();
    let ids: Vec<i64> = (0..100).map(|i| 1_000 + 7 * i).collect();
    idx.add_with_ids(&ds.train, &ids).unwrap();

    let back = deserialize_index(&serialize_index(&idx).unwrap()).unwrap();
    let res = back.search(&ds.train[..D], 1).unwrap();
    assert_eq!(res.labels, vec![1_000]);
    assert_eq!(back.reconstruct(1_007).unwrap(), ds.train[D..2 * D].to_vec());
}

#[test]
fn binary_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codes.pxix");
    let mut idx = BinaryFlatIndex::new(32).unwrap();
    idx.add(&[0xff, 0x00, 0xff, 0x00, 0x0f, 0x0f, 0x0f, 0x0f]).unwrap();
    write_binary_index_file(&idx, &path).unwrap();
    assert_eq!(read_binary_index_file(&path).unwrap(), idx);
}

#[test]
fn registry_write_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reg.pxix");
    let reg = Registry::new();
    let h = reg.index_factory(D, "IVF4,Flat", DistanceMetric::L2).unwrap();
    let ds = create_clustered_dataset(200, 2, D, 4, 0.05, 8);
    reg.train(h, 200, &ds.train).unwrap();
    reg.add(h, 200, &ds.train).unwrap();
    reg.write(h, &path).unwrap();

    let h2 = reg.read(&path).unwrap();
    assert_ne!(h, h2);
    assert_eq!(reg.ntotal(h2).unwrap(), 200);
    assert_eq!(
        reg.search(h, 2, &ds.test, 3).unwrap(),
        reg.search(h2, 2, &ds.test, 3).unwrap()
    );
}

// =============================================================================
// Corruption
// =============================================================================

#[test]
fn missing_file_is_io() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        read_index_file(dir.path().join("absent.pxix")),
        Err(Error::Io(_))
    ));
}

#[test]
fn garbage_payload_is_corrupt() {
    let (idx, _) = populated("IVF4,Flat");
    let mut bytes = serialize_index(&idx).unwrap();
    let tail = bytes.len() - 1;
    bytes[tail] ^= 0xff;
    for b in &mut bytes[17..40] {
        *b = 0xff;
    }
    assert!(matches!(deserialize_index(&bytes), Err(Error::CorruptData(_))));
}

#[test]
fn truncated_file_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.pxix");
    let (idx, _) = populated("Flat");
    let bytes = serialize_index(&idx).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(read_index_file(&path), Err(Error::CorruptData(_))));

    std::fs::write(&path, &bytes[..5]).unwrap();
    assert!(matches!(read_index_file(&path), Err(Error::CorruptData(_))));
}

#[test]
fn future_version_is_rejected() {
    let (idx, _) = populated("Flat");
    let mut bytes = serialize_index(&idx).unwrap();
    bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
    assert!(matches!(
        deserialize_index(&bytes),
        Err(Error::UnsupportedVersion(7))
    ));
}
