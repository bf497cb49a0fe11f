use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::{Command, Output};

use insta_cmd::get_cargo_bin;
use quadb_common::{Quad, Term};
use quadb_storage::ChangeLogWriter;

pub fn run_cli() -> Command {
    Command::new(get_cargo_bin("quadb"))
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn quad(i: usize) -> Quad {
    Quad::triple(
        Term::iri(format!("http://example.org/s{i}")),
        Term::iri("http://example.org/value"),
        Term::literal(i.to_string()),
    )
}

/// Writes a change log adding `adds` numbered quads and then deleting the first `deletes`.
pub fn write_log(path: &Path, adds: usize, deletes: usize) {
    let file = BufWriter::new(File::create(path).unwrap());
    let mut writer = ChangeLogWriter::new(file);
    for i in 0..adds {
        writer.add(&quad(i)).unwrap();
    }
    for i in 0..deletes {
        writer.delete(&quad(i)).unwrap();
    }
    writer.finish().unwrap().into_inner().unwrap();
}
