use clap::Args;
use serde::Serialize;
use std::cmp::Ordering;

use buildreg::version::FlatVersion;

use super::CmdResult;

#[derive(Args)]
pub struct CompareArgs {
    /// Version currently recorded
    pub existing: String,

    /// Version that would replace it
    pub candidate: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareOutput {
    existing: String,
    candidate: String,
    existing_flat: String,
    candidate_flat: String,
    is_newer: bool,
}

pub fn run_json(args: CompareArgs) -> CmdResult<CompareOutput> {
    let existing = FlatVersion::parse(&args.existing)?;
    let candidate = FlatVersion::parse(&args.candidate)?;
    let is_newer = candidate.cmp_padded(&existing) == Ordering::Greater;

    Ok((
        CompareOutput {
            existing: args.existing,
            candidate: args.candidate,
            existing_flat: existing.flat().to_string(),
            candidate_flat: candidate.flat().to_string(),
            is_newer,
        },
        0,
    ))
}
