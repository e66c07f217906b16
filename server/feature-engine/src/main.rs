//! Binary entrypoint: extract features for one commit and print them as JSON.
//!
//! stdin is either a CommitInput JSON object or a bare unified diff (scored
//! with the heuristic extractor). `--pretty` indents the output.

use feature_engine::{run, CommitInput};
use std::io::{self, Read, Write};

fn main() {
  if let Err(e) = run_binary() {
    let _ = writeln!(io::stderr(), "feature-engine: {}", e);
    std::process::exit(1);
  }
}

fn parse_input(raw: &str) -> Result<CommitInput, serde_json::Error> {
  if raw.trim_start().starts_with('{') {
    return serde_json::from_str(raw);
  }
  Ok(CommitInput {
    repository: "stdin".into(),
    commit_hash: "stdin".into(),
    diff_text: Some(raw.to_string()),
    ..CommitInput::default()
  })
}

fn run_binary() -> Result<(), Box<dyn std::error::Error>> {
  let pretty = std::env::args().skip(1).any(|a| a == "--pretty");

  let mut raw = String::new();
  io::stdin().lock().read_to_string(&mut raw)?;
  if raw.trim().is_empty() {
    return Err("empty input".into());
  }
  let out = run(&parse_input(&raw)?);

  let mut stdout = io::stdout().lock();
  if pretty {
    serde_json::to_writer_pretty(&mut stdout, &out)?;
  } else {
    serde_json::to_writer(&mut stdout, &out)?;
  }
  writeln!(stdout)?;
  Ok(())
}
