//! Section splitting for generated documentation pages.

/// Split a markdown body on level-2 headings (`## `) outside fenced code.
///
/// Returns `(heading, section)` pairs whose sections concatenate back to
/// `body`. Text before the first heading is a section with no heading.
pub(super) fn split_sections(body: &str) -> Vec<(Option<String>, &str)> {
    let mut sections = Vec::new();
    let mut heading: Option<String> = None;
    let mut start = 0;
    let mut offset = 0;
    let mut in_fence = false;

    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        } else if !in_fence && line.starts_with("## ") {
            if offset > start {
                sections.push((heading.take(), &body[start..offset]));
                start = offset;
            }
            heading = Some(line[3..].trim().to_string());
        }
        offset += line.len();
    }

    if start < body.len() {
        sections.push((heading, &body[start..]));
    }
    sections
}
