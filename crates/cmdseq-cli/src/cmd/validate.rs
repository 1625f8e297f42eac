use std::path::Path;

use cmdseq_core::Sequence;
use serde::Serialize;

use crate::output;
use crate::Cli;

#[derive(Serialize)]
struct ValidateReport {
    sequence: String,
    records: u32,
    checksum: String,
    valid: bool,
}

pub fn run(cli: &Cli, file: &Path) -> anyhow::Result<()> {
    let dictionary = cli.dictionary()?;
    let sequence = Sequence::load(file, &dictionary)?;

    if cli.json {
        output::print_json(&ValidateReport {
            sequence: sequence.name().to_string(),
            records: sequence.len(),
            checksum: format!("{:#010x}", sequence.checksum()),
            valid: true,
        })
    } else {
        println!(
            "{}: valid, {} records, checksum {:#010x}",
            sequence.name(),
            sequence.len(),
            sequence.checksum()
        );
        Ok(())
    }
}
