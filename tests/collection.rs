mod common;

use std::path::PathBuf;

use common::{expected_box, expected_positions, write_trr, write_xtc_small, TrrOptions};
use trajview::{AtomSelection, Config, Error, FrameSelection, IndexKind, TrajectoryCollection};

fn split_trr(dir: &std::path::Path, counts: &[u64]) -> std::io::Result<Vec<PathBuf>> {
    // Every part continues the frame numbering of the previous one.
    let mut start = 0;
    let mut parts = Vec::new();
    for (idx, &count) in counts.iter().enumerate() {
        let part = dir.join(format!("run.part{:04}.trr", idx + 1));
        write_trr(&part, 6, start..start + count, TrrOptions::default())?;
        parts.push(part);
        start += count;
    }
    Ok(parts)
}

#[test]
fn frame_count_is_the_sum_of_parts() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let counts = [3, 1, 4, 1, 5];
    let parts = split_trr(dir.path(), &counts)?;

    for n in 1..=parts.len() {
        let collection = TrajectoryCollection::open(&parts[..n], &Config::default())?;
        assert_eq!(collection.frame_count(), counts[..n].iter().sum::<u64>());
        assert_eq!(collection.part_frame_counts(), counts[..n]);
    }
    Ok(())
}

#[test]
fn boundary_between_parts() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let (a, b) = (4, 3);
    let parts = split_trr(dir.path(), &[a, b])?;
    let collection = TrajectoryCollection::open(&parts, &Config::default())?;

    let last_of_first = collection.frame(a - 1)?;
    let first_of_second = collection.frame(a)?;
    assert_eq!(last_of_first.index, a - 1);
    assert_eq!(first_of_second.index, a);
    assert_eq!(last_of_first.positions, expected_positions(a - 1, 6, 10.0));
    assert_eq!(first_of_second.positions, expected_positions(a, 6, 10.0));
    assert_eq!(first_of_second.boxvec, expected_box(a, 10.0));

    let last = collection.frame(a + b - 1)?;
    assert_eq!(last.positions, expected_positions(a + b - 1, 6, 10.0));
    match collection.frame(a + b) {
        Err(Error::OutOfRange {
            kind: IndexKind::Frame,
            index,
            len,
            ..
        }) => assert_eq!((index, len), (a + b, a + b)),
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[test]
fn parts_are_ordered_by_path() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut parts = split_trr(dir.path(), &[2, 2, 2])?;
    parts.reverse();

    let collection = TrajectoryCollection::open(&parts, &Config::default())?;
    parts.reverse();
    assert_eq!(collection.parts(), parts);
    for idx in 0..6 {
        assert_eq!(collection.frame(idx)?.positions, expected_positions(idx, 6, 10.0));
    }
    Ok(())
}

#[test]
fn unit_cell_of_the_first_part() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let parts = split_trr(dir.path(), &[2, 2])?;
    let collection = TrajectoryCollection::open(&parts, &Config::default())?;
    assert_eq!(collection.unit_cell(), expected_box(0, 10.0));
    assert_eq!(collection.atom_count(), 6);
    Ok(())
}

#[test]
fn atom_counts_must_agree() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let first = dir.path().join("run.part0001.xtc");
    let second = dir.path().join("run.part0002.xtc");
    write_xtc_small(&first, 3, 0..2)?;
    write_xtc_small(&second, 4, 2..4)?;

    match TrajectoryCollection::open(&[first, second.clone()], &Config::default()) {
        Err(Error::PartMismatch {
            path,
            expected: 3,
            found: 4,
        }) => assert_eq!(path, second),
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[test]
fn update_shifts_later_parts() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let parts = split_trr(dir.path(), &[2, 3])?;
    let collection = TrajectoryCollection::open(&parts, &Config::default())?;
    let before = collection.frame(2)?;

    // The first part grows by two frames, which get indices 2 and 3.
    write_trr(&parts[0], 6, 100..102, TrrOptions::default())?;
    assert_eq!(collection.update(true)?, 7);
    assert_eq!(collection.part_frame_counts(), [4, 3]);
    assert_eq!(collection.frame(2)?.positions, expected_positions(100, 6, 10.0));
    assert_eq!(collection.frame(4)?.positions, before.positions);
    Ok(())
}

#[test]
fn selections() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let parts = split_trr(dir.path(), &[3, 3])?;
    let collection = TrajectoryCollection::open(&parts, &Config::default())?;

    let selection = AtomSelection::Ranges(vec![4..6, 0..1]);
    let frame = collection.frame_with_selection(4, &selection)?;
    let full = expected_positions(4, 6, 10.0);
    let expected = [&full[12..18], &full[0..3]].concat();
    assert_eq!(frame.positions, expected);
    assert_eq!(frame.index, 4);

    let path = collection.atom_path(5, &FrameSelection::FrameList(vec![5, 0, 3]))?;
    let expected: Vec<_> = [5, 0, 3]
        .iter()
        .map(|&idx| expected_positions(idx, 6, 10.0)[15..18].to_vec())
        .collect();
    let path: Vec<_> = path.iter().map(|p| p.to_array().to_vec()).collect();
    assert_eq!(path, expected);

    assert!(matches!(
        collection.atom_path(6, &FrameSelection::All),
        Err(Error::OutOfRange {
            kind: IndexKind::Atom,
            ..
        })
    ));
    assert!(matches!(
        collection.frame_with_selection(0, &AtomSelection::Ranges(vec![5..7])),
        Err(Error::OutOfRange {
            kind: IndexKind::Atom,
            ..
        })
    ));
    Ok(())
}

#[test]
fn no_parts() {
    let result = TrajectoryCollection::open(&[], &Config::default());
    assert!(matches!(result, Err(Error::NoParts { .. })), "{result:?}");

    match TrajectoryCollection::open_named("md/@run.xtc", &[], &Config::default()) {
        Err(err @ Error::NoParts { .. }) => {
            assert!(err.to_string().contains("md/@run.xtc"), "{err}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn named_collection() -> trajview::Result<()> {
    let dir = tempfile::tempdir()?;
    let parts = split_trr(dir.path(), &[2, 2])?;
    let name = dir.path().join("@run.trr");
    let collection = TrajectoryCollection::open_named(&name, &parts, &Config::default())?;
    assert_eq!(collection.path(), name);
    assert_eq!(collection.parts(), parts);

    match collection.frame(4) {
        Err(Error::OutOfRange { path, .. }) => assert_eq!(path, name),
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}
