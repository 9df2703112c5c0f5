//! The Command Runner (C3).
//!
//! Runs a shell command in a given working directory, teeing its combined
//! stdout/stderr to the agent's own stdout while also capturing it for the
//! feedback document. This is the only way user-declared pre/post-update
//! commands are executed.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

fn ansi_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[([0-9;]*[mGKF])").expect("static regex is valid"))
}

/// Run `cmd` through the system shell in `cwd`, streaming output to stdout
/// line by line while capturing it. Never errors on a non-zero exit code;
/// the exit code is surfaced in the return value instead.
pub fn run(cmd: &str, cwd: &Path) -> Result<(i32, String)> {
    log::debug!("$ {cmd} [{}]", cwd.display());

    // Redirect stderr into stdout inside the shell itself, so the two
    // streams arrive already merged and line-interleaved in the order the
    // child wrote them, rather than needing to be read from two pipes.
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(format!("{cmd} 2>&1"))
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn command: {cmd}"))?;

    let stdout = child.stdout.take().expect("stdout was piped");

    let mut captured = String::new();
    let mut out = std::io::stdout();

    for line in BufReader::new(stdout).lines() {
        let line = line.with_context(|| "failed to read command output")?;
        let _ = writeln!(out, "\t{line}");
        captured.push_str(&line);
        captured.push('\n');
    }

    let status = child.wait().with_context(|| "failed to wait on command")?;
    let exit_code = status.code().unwrap_or(-1);

    let stripped = ansi_escape_re().replace_all(&captured, "").into_owned();
    Ok((exit_code, stripped))
}
