use std::path::Path;

use cmdseq_core::{Sequence, TimeTag};
use serde::Serialize;

use crate::output;
use crate::Cli;

#[derive(Serialize)]
struct RecordView {
    index: u32,
    time_tag: TimeTag,
    opcode: String,
    mnemonic: String,
    arg_bytes: usize,
}

pub fn run(cli: &Cli, file: &Path) -> anyhow::Result<()> {
    let dictionary = cli.dictionary()?;
    let sequence = Sequence::load(file, &dictionary)?;

    let views: Vec<RecordView> = sequence
        .records()
        .iter()
        .map(|r| RecordView {
            index: r.index,
            time_tag: r.time_tag,
            opcode: format!("{:#06x}", r.opcode),
            mnemonic: dictionary.mnemonic(r.opcode).unwrap_or("?").to_string(),
            arg_bytes: r.args.len(),
        })
        .collect();

    if cli.json {
        return output::print_json(&views);
    }

    println!("{} ({} records)", sequence.name(), sequence.len());
    output::print_table(
        &["IDX", "TIME TAG", "OPCODE", "MNEMONIC", "ARGS"],
        views
            .iter()
            .map(|v| {
                vec![
                    v.index.to_string(),
                    v.time_tag.to_string(),
                    v.opcode.clone(),
                    v.mnemonic.clone(),
                    format!("{} B", v.arg_bytes),
                ]
            })
            .collect(),
    );
    Ok(())
}
