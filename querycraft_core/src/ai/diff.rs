use similar::{ChangeTag, TextDiff};

/// Character diff from `original` to `edited`, with changed runs wrapped as
/// `[Added: ...]` / `[Removed: ...]` and unchanged text inline.
pub fn annotate_char_diff(original: &str, edited: &str) -> String {
    let diff = TextDiff::from_chars(original, edited);
    let mut out = String::new();
    let mut run: Option<(ChangeTag, String)> = None;

    for change in diff.iter_all_changes() {
        let tag = change.tag();
        match run.as_mut() {
            Some((t, buf)) if *t == tag => buf.push_str(change.value()),
            _ => {
                if let Some((t, buf)) = run.take() {
                    push_run(&mut out, t, &buf);
                }
                run = Some((tag, change.value().to_string()));
            }
        }
    }
    if let Some((t, buf)) = run {
        push_run(&mut out, t, &buf);
    }
    out
}

fn push_run(out: &mut String, tag: ChangeTag, text: &str) {
    match tag {
        ChangeTag::Equal => out.push_str(text),
        ChangeTag::Insert => {
            out.push_str("[Added: ");
            out.push_str(text);
            out.push(']');
        }
        ChangeTag::Delete => {
            out.push_str("[Removed: ");
            out.push_str(text);
            out.push(']');
        }
    }
}

/// Diff context for the refine prompt; `None` when the user ran the query unchanged.
pub fn modification_context(original: &str, executed: Option<&str>) -> Option<String> {
    match executed {
        Some(e) if !e.is_empty() && e != original => Some(annotate_char_diff(original, e)),
        _ => None,
    }
}
