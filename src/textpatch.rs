use std::path::Path;

/// Idempotent upsert of a marker-delimited block owned by this tool.
///
/// Any existing region between `start_marker` and `end_marker` lines is
/// removed wherever it occurs, then the new block is appended with fresh
/// markers, separated from surviving content by one blank line. Lines outside
/// the region keep their relative order; the result always ends with exactly
/// one trailing newline and contains each marker exactly once.
pub fn upsert_block(
    content: &str,
    start_marker: &str,
    end_marker: &str,
    block: &str,
) -> (String, bool) {
    let mut kept: Vec<&str> = Vec::new();
    let mut skip = false;
    for ln in content.lines() {
        if ln == start_marker {
            skip = true;
            continue;
        }
        if ln == end_marker {
            skip = false;
            continue;
        }
        if !skip {
            kept.push(ln);
        }
    }
    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }

    let mut out = String::new();
    if !kept.is_empty() {
        out.push_str(&kept.join("\n"));
        out.push_str("\n\n");
    }
    out.push_str(start_marker);
    out.push('\n');
    let body = block.trim_end_matches('\n');
    if !body.is_empty() {
        out.push_str(body);
        out.push('\n');
    }
    out.push_str(end_marker);
    out.push('\n');

    let changed = out != content;
    (out, changed)
}

/// Idempotent upsert of a single managed row in a line-oriented config file.
///
/// Rows for which `is_managed` returns true are rewritten to `entry`; comment
/// and blank lines are never touched. When no managed row exists, `entry` is
/// appended (after a separating blank line if the file does not end on one).
/// The `changed` flag reports whether any row was rewritten or appended.
pub fn upsert_entry(
    content: &str,
    is_managed: impl Fn(&str) -> bool,
    entry: &str,
) -> (String, bool) {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut changed = false;
    let mut found = false;

    for ln in lines.iter_mut() {
        let trim = ln.trim();
        if trim.is_empty() || trim.starts_with('#') {
            continue;
        }
        if !is_managed(trim) {
            continue;
        }
        found = true;
        if trim != entry {
            *ln = entry.to_string();
            changed = true;
        }
    }

    if !found {
        if lines.last().is_some_and(|l| !l.trim().is_empty()) {
            lines.push(String::new());
        }
        lines.push(entry.to_string());
        changed = true;
    }

    let mut out = lines.join("\n");
    if !out.ends_with('\n') {
        out.push('\n');
    }
    (out, changed)
}

/// True when a shell line already sources ~/.bashrc in some form.
fn sources_bashrc(line: &str) -> bool {
    let toks: Vec<&str> = line
        .split([' ', '\t', ';'])
        .filter(|t| !t.is_empty())
        .collect();
    toks.windows(2).any(|w| {
        (w[0] == "." || w[0] == "source")
            && (w[1] == "~/.bashrc" || w[1] == "$HOME/.bashrc" || w[1] == ".bashrc")
    })
}

/// Ensure a profile file chains into ~/.bashrc, appending a sourcing line
/// only when none is present.
pub fn ensure_sources_bashrc(content: &str) -> (String, bool) {
    if content.lines().any(sources_bashrc) {
        return (content.to_string(), false);
    }
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("[[ -f ~/.bashrc ]] && . ~/.bashrc\n");
    (out, true)
}

/// Write a file via a same-directory temp file and rename.
pub fn atomic_write(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = dir.join(format!(".{base}.tmp"));
    std::fs::write(&tmp, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "### ARC_PROMPT_START";
    const END: &str = "### ARC_PROMPT_END";

    #[test]
    fn upsert_block_appends_to_empty_file() {
        let (out, changed) = upsert_block("", START, END, "export X=1");
        assert!(changed);
        assert_eq!(out, format!("{START}\nexport X=1\n{END}\n"));
    }

    #[test]
    fn upsert_block_separates_with_blank_line() {
        let (out, changed) = upsert_block("alias ll='ls -l'\n", START, END, "export X=1");
        assert!(changed);
        assert_eq!(
            out,
            format!("alias ll='ls -l'\n\n{START}\nexport X=1\n{END}\n")
        );
    }

    #[test]
    fn upsert_block_is_idempotent() {
        let (first, _) = upsert_block("line-a\nline-b\n", START, END, "export X=1");
        let (second, changed) = upsert_block(&first, START, END, "export X=1");
        assert!(!changed);
        assert_eq!(first, second);
        let (third, _) = upsert_block(&second, START, END, "export X=1");
        assert_eq!(second, third);
        assert_eq!(first.matches(START).count(), 1);
        assert_eq!(first.matches(END).count(), 1);
    }

    #[test]
    fn upsert_block_preserves_surrounding_lines() {
        let input = format!("before\n{START}\nold block\n{END}\nafter\n");
        let (out, changed) = upsert_block(&input, START, END, "new block");
        assert!(changed);
        assert!(out.starts_with("before\nafter\n"));
        assert!(out.contains("new block"));
        assert!(!out.contains("old block"));
    }

    #[test]
    fn upsert_block_collapses_duplicate_regions() {
        let input = format!("{START}\none\n{END}\nmid\n{START}\ntwo\n{END}\n");
        let (out, _) = upsert_block(&input, START, END, "fresh");
        assert_eq!(out.matches(START).count(), 1);
        assert!(out.starts_with("mid\n"));
    }

    #[test]
    fn upsert_entry_appends_when_missing() {
        let is_home_arc = |ln: &str| ln.split_whitespace().nth(1) == Some("/home/arc");
        let (out, changed) = upsert_entry(
            "# /etc/fstab\nUUID=abc / ext4 defaults 0 1\n",
            is_home_arc,
            "src /home/arc nfs4 opts 0 0",
        );
        assert!(changed);
        assert!(out.ends_with("src /home/arc nfs4 opts 0 0\n"));
        assert!(out.contains("UUID=abc / ext4 defaults 0 1"));
    }

    #[test]
    fn upsert_entry_replaces_only_the_managed_row() {
        let is_home_arc = |ln: &str| ln.split_whitespace().nth(1) == Some("/home/arc");
        let input = "# header\nold /home/arc nfs4 stale 0 0\nUUID=abc / ext4 defaults 0 1\n";
        let (out, changed) = upsert_entry(input, is_home_arc, "src /home/arc nfs4 opts 0 0");
        assert!(changed);
        assert!(!out.contains("stale"));
        assert!(out.contains("# header"));
        assert!(out.contains("UUID=abc / ext4 defaults 0 1"));
    }

    #[test]
    fn upsert_entry_unchanged_for_exact_match() {
        let is_home_arc = |ln: &str| ln.split_whitespace().nth(1) == Some("/home/arc");
        let entry = "src /home/arc nfs4 opts 0 0";
        let input = format!("{entry}\n");
        let (out, changed) = upsert_entry(&input, is_home_arc, entry);
        assert!(!changed);
        assert_eq!(out, input);
    }

    #[test]
    fn upsert_entry_never_touches_comments() {
        let is_home_arc = |ln: &str| ln.split_whitespace().nth(1) == Some("/home/arc");
        let input = "# old /home/arc comment\n";
        let (out, changed) = upsert_entry(input, is_home_arc, "entry /home/arc x 0 0");
        assert!(changed);
        assert!(out.starts_with("# old /home/arc comment\n"));
    }

    #[test]
    fn ensure_sources_bashrc_detects_existing_forms() {
        for existing in [
            "[[ -f ~/.bashrc ]] && . ~/.bashrc\n",
            "source ~/.bashrc\n",
            "if [ -f ~/.bashrc ]; then source ~/.bashrc; fi\n",
        ] {
            let (_, changed) = ensure_sources_bashrc(existing);
            assert!(!changed, "should detect: {existing:?}");
        }
    }

    #[test]
    fn ensure_sources_bashrc_appends_once() {
        let (out, changed) = ensure_sources_bashrc("export PATH=$PATH\n");
        assert!(changed);
        assert!(out.ends_with("[[ -f ~/.bashrc ]] && . ~/.bashrc\n"));
        let (again, changed2) = ensure_sources_bashrc(&out);
        assert!(!changed2);
        assert_eq!(out, again);
    }
}
