//! Heuristic per-file stats from a plain unified diff.
//!
//! Used when the commit source cannot provide per-file stats. Recognizes
//! `diff --git a/x b/y` headers and `---`/`+++` file markers; counts `+`/`-`
//! lines per file. Inside a hunk the `@@ -a,b +c,d @@` line counts decide
//! where the hunk ends, so body lines that happen to start with `---` or
//! `+++` are counted, not read as headers. Lines before any header are
//! attributed to an unnamed file.

use crate::types::FileStat;

/// Lines still expected on each side of the current hunk.
#[derive(Debug, Clone, Copy)]
struct Hunk {
  old: u32,
  new: u32,
}

impl Hunk {
  /// `@@ -12,5 +12,7 @@ ...`; a missing count means one line.
  fn parse(line: &str) -> Option<Self> {
    let mut parts = line.strip_prefix("@@ ")?.split_whitespace();
    let old = range_len(parts.next()?.strip_prefix('-')?)?;
    let new = range_len(parts.next()?.strip_prefix('+')?)?;
    Some(Self { old, new })
  }

  fn is_done(&self) -> bool {
    self.old == 0 && self.new == 0
  }
}

fn range_len(range: &str) -> Option<u32> {
  match range.split_once(',') {
    Some((start, len)) => {
      start.parse::<u32>().ok()?;
      len.parse().ok()
    }
    None => range.parse::<u32>().ok().map(|_| 1),
  }
}

fn file_index(files: &mut Vec<FileStat>, current: &mut Option<usize>) -> usize {
  match *current {
    Some(idx) => idx,
    None => {
      files.push(FileStat::new("", 0, 0));
      let idx = files.len() - 1;
      *current = Some(idx);
      idx
    }
  }
}

pub fn estimate_file_stats(diff_text: &str) -> Vec<FileStat> {
  let mut files: Vec<FileStat> = Vec::new();
  let mut current: Option<usize> = None;
  let mut hunk: Option<Hunk> = None;

  for line in diff_text.lines() {
    if let Some(h) = hunk.as_mut() {
      let body = match line.as_bytes().first() {
        Some(b'+') => {
          h.new = h.new.saturating_sub(1);
          Some((1, 0))
        }
        Some(b'-') => {
          h.old = h.old.saturating_sub(1);
          Some((0, 1))
        }
        Some(b' ') | None => {
          h.old = h.old.saturating_sub(1);
          h.new = h.new.saturating_sub(1);
          Some((0, 0))
        }
        // "\ No newline at end of file"
        Some(b'\\') => Some((0, 0)),
        Some(_) => None,
      };
      if let Some((adds, dels)) = body {
        if h.is_done() {
          hunk = None;
        }
        let idx = file_index(&mut files, &mut current);
        files[idx].additions += adds;
        files[idx].deletions += dels;
        continue;
      }
      // Anything else ends a truncated hunk and is read as a header.
      hunk = None;
    }

    if let Some(rest) = line.strip_prefix("diff --git ") {
      let path = rest
        .split_whitespace()
        .last()
        .map(|p| p.strip_prefix("b/").unwrap_or(p))
        .unwrap_or_default();
      files.push(FileStat::new(path, 0, 0));
      current = Some(files.len() - 1);
      continue;
    }
    if line.starts_with("@@ ") {
      hunk = Hunk::parse(line).filter(|h| !h.is_done());
      continue;
    }
    if let Some(rest) = line.strip_prefix("+++ ") {
      let path = rest.trim();
      if path != "/dev/null" {
        let path = path.strip_prefix("b/").unwrap_or(path);
        match current {
          Some(idx) if files[idx].path.is_empty() => files[idx].path = path.to_string(),
          Some(_) => {}
          None => {
            files.push(FileStat::new(path, 0, 0));
            current = Some(files.len() - 1);
          }
        }
      }
      continue;
    }
    if let Some(rest) = line.strip_prefix("--- ") {
      // Deleted files only name themselves on the `---` side.
      let path = rest.trim();
      if current.is_none() && path != "/dev/null" {
        let path = path.strip_prefix("a/").unwrap_or(path);
        files.push(FileStat::new(path, 0, 0));
        current = Some(files.len() - 1);
      }
      continue;
    }

    // Bare `+`/`-` lines with no hunk header.
    let delta = if line.starts_with('+') {
      (1, 0)
    } else if line.starts_with('-') {
      (0, 1)
    } else {
      continue;
    };
    let idx = file_index(&mut files, &mut current);
    files[idx].additions += delta.0;
    files[idx].deletions += delta.1;
  }

  files
}
