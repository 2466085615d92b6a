//! Line-level unified diff generation and application.
//!
//! The rest of the system treats diffs as plain text artifacts; this module
//! is the only place that understands hunk structure. Application is exact:
//! applying `unified_diff(a, b)` to `a` reproduces `b` byte for byte,
//! including the presence or absence of a trailing newline.

use crate::EngineError;

const CONTEXT: usize = 3;
const NO_NEWLINE: &str = "\\ No newline at end of file";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DiffOp {
    Equal,
    Delete,
    Insert,
}

/// Produce a unified diff with `--- original` / `+++ mutated` headers and
/// three lines of context. Identical inputs yield an empty string.
pub fn unified_diff(original: &str, mutated: &str) -> String {
    let old: Vec<&str> = split_lines(original);
    let new: Vec<&str> = split_lines(mutated);
    let ops = diff_ops(&old, &new);
    if !ops
        .iter()
        .any(|op| matches!(op.0, DiffOp::Delete | DiffOp::Insert))
    {
        return String::new();
    }

    let mut out = String::from("--- original\n+++ mutated\n");
    let old_no_newline = !original.is_empty() && !original.ends_with('\n');
    let new_no_newline = !mutated.is_empty() && !mutated.ends_with('\n');

    for hunk in hunks(&ops) {
        let (old_start, old_count, new_start, new_count) = hunk_ranges(&ops[hunk.clone()]);
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            display_start(old_start, old_count),
            old_count,
            display_start(new_start, new_count),
            new_count
        ));
        let mut old_index = old_start;
        let mut new_index = new_start;
        for (op, _, _) in &ops[hunk] {
            match op {
                DiffOp::Equal => {
                    push_diff_line(&mut out, ' ', old[old_index]);
                    if old_index + 1 == old.len() && old_no_newline {
                        out.push_str(NO_NEWLINE);
                        out.push('\n');
                    }
                    old_index += 1;
                    new_index += 1;
                }
                DiffOp::Delete => {
                    push_diff_line(&mut out, '-', old[old_index]);
                    if old_index + 1 == old.len() && old_no_newline {
                        out.push_str(NO_NEWLINE);
                        out.push('\n');
                    }
                    old_index += 1;
                }
                DiffOp::Insert => {
                    push_diff_line(&mut out, '+', new[new_index]);
                    if new_index + 1 == new.len() && new_no_newline {
                        out.push_str(NO_NEWLINE);
                        out.push('\n');
                    }
                    new_index += 1;
                }
            }
        }
    }
    out
}

/// Apply a diff produced by [`unified_diff`] back onto the original text.
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String, EngineError> {
    if diff.is_empty() {
        return Ok(original.to_string());
    }
    let old: Vec<&str> = split_lines(original);
    let mut result = String::new();
    let mut old_index = 0usize;
    let mut trim_trailing_newline = false;

    let mut lines = diff.lines().peekable();
    let mut in_hunk = false;
    while let Some(line) = lines.next() {
        if !in_hunk && (line.starts_with("--- ") || line.starts_with("+++ ")) {
            continue;
        }
        if let Some(header) = line.strip_prefix("@@") {
            in_hunk = true;
            let (hunk_old_start, _) = parse_hunk_header(header)?;
            while old_index < hunk_old_start {
                let kept = old
                    .get(old_index)
                    .ok_or_else(|| patch_err("hunk start beyond end of input"))?;
                // Raw copies keep their own trailing-newline state.
                result.push_str(kept);
                old_index += 1;
            }
            continue;
        }
        let (marker, content) = split_marker(line)?;
        match marker {
            ' ' => {
                let current = old
                    .get(old_index)
                    .ok_or_else(|| patch_err("context past end of input"))?;
                if trim_line(current) != content {
                    return Err(patch_err("context mismatch"));
                }
                result.push_str(current);
                if !current.ends_with('\n') {
                    result.push('\n');
                    trim_trailing_newline = true;
                }
                old_index += 1;
                peek_no_newline(&mut lines);
            }
            '-' => {
                let current = old
                    .get(old_index)
                    .ok_or_else(|| patch_err("deletion past end of input"))?;
                if trim_line(current) != content {
                    return Err(patch_err("deletion mismatch"));
                }
                old_index += 1;
                // A no-newline note after a deletion refers to the old text.
                peek_no_newline(&mut lines);
            }
            '+' => {
                result.push_str(content);
                result.push('\n');
                if peek_no_newline(&mut lines) {
                    trim_trailing_newline = true;
                }
            }
            other => {
                return Err(patch_err(&format!("unrecognized diff marker {other:?}")));
            }
        }
    }

    while old_index < old.len() {
        result.push_str(old[old_index]);
        old_index += 1;
    }

    if trim_trailing_newline && result.ends_with('\n') {
        result.pop();
    }
    Ok(result)
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split_inclusive('\n').collect()
    }
}

fn trim_line(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

fn push_diff_line(out: &mut String, marker: char, line: &str) {
    out.push(marker);
    out.push_str(trim_line(line));
    out.push('\n');
}

fn peek_no_newline(lines: &mut std::iter::Peekable<std::str::Lines<'_>>) -> bool {
    if lines.peek() == Some(&NO_NEWLINE) {
        lines.next();
        true
    } else {
        false
    }
}

fn patch_err(message: &str) -> EngineError {
    EngineError::PatchApply(message.to_string())
}

/// `-a,b +c,d` → zero-based old start and count.
fn parse_hunk_header(header: &str) -> Result<(usize, usize), EngineError> {
    let header = header.trim().trim_end_matches("@@").trim();
    let old_part = header
        .split_whitespace()
        .find(|part| part.starts_with('-'))
        .ok_or_else(|| patch_err("malformed hunk header"))?;
    let old_part = &old_part[1..];
    let (start, count) = match old_part.split_once(',') {
        Some((s, c)) => (
            s.parse::<usize>().map_err(|_| patch_err("bad hunk start"))?,
            c.parse::<usize>().map_err(|_| patch_err("bad hunk count"))?,
        ),
        None => (
            old_part
                .parse::<usize>()
                .map_err(|_| patch_err("bad hunk start"))?,
            1,
        ),
    };
    // Zero-count ranges display the preceding line number.
    let zero_based = if count == 0 { start } else { start.saturating_sub(1) };
    Ok((zero_based, count))
}

fn display_start(start: usize, count: usize) -> usize {
    if count == 0 {
        start
    } else {
        start + 1
    }
}

/// Longest-common-subsequence edit script. Each op carries the old and new
/// indices it consumes so hunk ranges fall out directly.
fn diff_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<(DiffOp, usize, usize)> {
    let n = old.len();
    let m = new.len();
    let mut table = vec![0u32; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[at(i, j)] = if old[i] == new[j] {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }

    let mut ops = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push((DiffOp::Equal, i, j));
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            ops.push((DiffOp::Delete, i, j));
            i += 1;
        } else {
            ops.push((DiffOp::Insert, i, j));
            j += 1;
        }
    }
    while i < n {
        ops.push((DiffOp::Delete, i, j));
        i += 1;
    }
    while j < m {
        ops.push((DiffOp::Insert, i, j));
        j += 1;
    }
    ops
}

/// Group change runs into hunks, keeping up to [`CONTEXT`] equal lines on
/// each side and merging runs whose gap fits inside shared context.
fn hunks(ops: &[(DiffOp, usize, usize)]) -> Vec<std::ops::Range<usize>> {
    let mut ranges: Vec<std::ops::Range<usize>> = Vec::new();
    let mut index = 0;
    while index < ops.len() {
        if ops[index].0 == DiffOp::Equal {
            index += 1;
            continue;
        }
        let run_start = index;
        let mut run_end = index;
        let mut gap = 0;
        let mut cursor = index;
        while cursor < ops.len() {
            if ops[cursor].0 == DiffOp::Equal {
                gap += 1;
                if gap > CONTEXT * 2 {
                    break;
                }
            } else {
                gap = 0;
                run_end = cursor;
            }
            cursor += 1;
        }
        let start = run_start.saturating_sub(CONTEXT);
        let end = (run_end + 1 + CONTEXT).min(ops.len());
        ranges.push(start..end);
        index = end;
    }
    ranges
}

fn split_marker(line: &str) -> Result<(char, &str), EngineError> {
    let mut chars = line.chars();
    match chars.next() {
        Some(marker) => Ok((marker, &line[marker.len_utf8()..])),
        None => Ok((' ', "")),
    }
}

fn hunk_ranges(ops: &[(DiffOp, usize, usize)]) -> (usize, usize, usize, usize) {
    let old_start = ops.first().map(|(_, i, _)| *i).unwrap_or(0);
    let new_start = ops.first().map(|(_, _, j)| *j).unwrap_or(0);
    let old_count = ops
        .iter()
        .filter(|(op, _, _)| matches!(op, DiffOp::Equal | DiffOp::Delete))
        .count();
    let new_count = ops
        .iter()
        .filter(|(op, _, _)| matches!(op, DiffOp::Equal | DiffOp::Insert))
        .count();
    (old_start, old_count, new_start, new_count)
}
