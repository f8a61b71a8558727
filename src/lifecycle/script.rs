use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Names tried before falling back to any `*.sh` file.
pub const PRIORITY_SCRIPTS: [&str; 5] = ["run.sh", "main.sh", "job.sh", "start.sh", "submit.sh"];

/// Entry script of a fetched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLocation {
    /// Directory the scheduler should run from
    pub dir: PathBuf,
    /// Script file name inside `dir`
    pub script: String,
}

/// Locate the entry script in `folder`, or in its only subdirectory when the
/// folder itself has none (extracted archives often nest one level).
pub fn find_job_script(folder: &Path) -> io::Result<Option<ScriptLocation>> {
    if let Some(found) = find_script_in(folder)? {
        return Ok(Some(found));
    }

    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    if subdirs.len() == 1 {
        return find_script_in(&subdirs[0]);
    }
    Ok(None)
}

fn find_script_in(dir: &Path) -> io::Result<Option<ScriptLocation>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(".sh") {
                scripts.push(name.to_string());
            }
        }
    }
    scripts.sort();

    let chosen = PRIORITY_SCRIPTS
        .iter()
        .find(|name| scripts.iter().any(|s| s.as_str() == **name))
        .map(|name| name.to_string())
        .or_else(|| scripts.into_iter().next());

    Ok(chosen.map(|script| ScriptLocation {
        dir: dir.to_path_buf(),
        script,
    }))
}

/// Strip trailing carriage returns from every line of every `*.sh` file
/// below `folder`. Returns how many files were rewritten.
pub fn normalize_line_endings(folder: &Path) -> io::Result<usize> {
    let mut rewritten = 0;
    for entry in WalkDir::new(folder).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_script = entry
            .path()
            .extension()
            .map(|ext| ext == "sh")
            .unwrap_or(false);
        if !is_script {
            continue;
        }

        let contents = std::fs::read(entry.path())?;
        if !contents.contains(&b'\r') {
            continue;
        }
        let fixed = strip_carriage_returns(&contents);
        if fixed != contents {
            std::fs::write(entry.path(), fixed)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

fn strip_carriage_returns(contents: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contents.len());
    for line in contents.split_inclusive(|b| *b == b'\n') {
        let (body, newline) = match line.strip_suffix(b"\n") {
            Some(body) => (body, true),
            None => (line, false),
        };
        out.extend_from_slice(body.strip_suffix(b"\r").unwrap_or(body));
        if newline {
            out.push(b'\n');
        }
    }
    out
}
