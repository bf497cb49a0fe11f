#![allow(dead_code)]

use std::fs;
use std::path::Path;

use quadb_common::{Quad, QuadPattern, Term};
use quadb_storage::{Dataset, StorageError, StorageResult};
use quadb_transaction::{execute_read, execute_write};
use rand::Rng;

pub const EX: &str = "http://example.org/";

pub fn iri(local: &str) -> Term {
    Term::iri(format!("{EX}{local}"))
}

/// Quad number `i`, spread over three named graphs.
pub fn numbered_quad(i: usize) -> Quad {
    Quad::new(
        iri(&format!("graph{}", i % 3)),
        iri(&format!("s{i}")),
        iri("value"),
        Term::typed_literal(i.to_string(), "http://www.w3.org/2001/XMLSchema#integer"),
    )
}

pub fn numbered_quads(range: std::ops::Range<usize>) -> Vec<Quad> {
    range.map(numbered_quad).collect()
}

/// `n` quads with random subjects and objects.
pub fn random_quads(n: usize) -> Vec<Quad> {
    let mut rng = rand::rng();
    (0..n)
        .map(|_| {
            Quad::triple(
                iri(&format!("r{}", rng.random_range(0..1_000_000u32))),
                iri("rand"),
                Term::literal(format!("{:x}", rng.random::<u64>())),
            )
        })
        .collect()
}

pub fn add_all(dataset: &(impl Dataset + ?Sized), quads: &[Quad]) -> StorageResult<()> {
    execute_write(dataset, |txn| {
        for quad in quads {
            dataset.add(txn, quad)?;
        }
        Ok::<_, StorageError>(())
    })
}

pub fn delete_all(dataset: &(impl Dataset + ?Sized), quads: &[Quad]) -> StorageResult<()> {
    execute_write(dataset, |txn| {
        for quad in quads {
            dataset.delete(txn, quad)?;
        }
        Ok::<_, StorageError>(())
    })
}

/// Every quad in the dataset, sorted.
pub fn all_quads(dataset: &(impl Dataset + ?Sized)) -> StorageResult<Vec<Quad>> {
    let mut quads = execute_read(dataset, |txn| dataset.find(txn, &QuadPattern::any()))?;
    quads.sort();
    Ok(quads)
}

pub fn sorted(mut quads: Vec<Quad>) -> Vec<Quad> {
    quads.sort();
    quads
}

/// Names and contents of every file under `dir`, for checking that nothing changed.
pub fn snapshot_files(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let path = e.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            (name, fs::read(&path).unwrap())
        })
        .collect();
    files.sort();
    files
}
