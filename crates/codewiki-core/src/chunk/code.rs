//! Declaration-boundary scanning and import extraction for source files.
//!
//! Boundaries are recognized with per-language-family line patterns. This is
//! a line-prefix heuristic, not a parser: nested declarations that happen to
//! start a line also open a new unit.

use once_cell::sync::Lazy;
use regex::Regex;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static boundary pattern"))
        .collect()
}

static RUST: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:async|unsafe|const|default|extern\s+"[^"]*")\s+)*(?:fn|struct|enum|trait|mod|type|union)\s+(?P<name>[A-Za-z_]\w*)"#,
        r"^\s*(?:unsafe\s+)?impl\b(?:\s*<[^{]*?>)?\s*(?P<name>[A-Za-z_][\w:]*)",
        r"^\s*macro_rules!\s*(?P<name>[A-Za-z_]\w*)",
    ])
});

static JS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^\s*(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|interface|type|enum|namespace)\s+(?P<name>[A-Za-z_$][\w$]*)",
        r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>)",
    ])
});

static PYTHON: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^\s*(?:async\s+)?def\s+(?P<name>\w+)",
        r"^\s*class\s+(?P<name>\w+)",
    ])
});

static GO: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^func\s+(?:\([^)]*\)\s*)?(?P<name>\w+)",
        r"^type\s+(?P<name>\w+)",
    ])
});

static JVM: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|sealed|open|data|inline|override|partial|async|virtual|suspend)\s+)*(?:class|interface|enum|record|object|struct|trait|fun|func|def)\s+(?P<name>[A-Za-z_]\w*)",
        r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|override|async|virtual)\s+)+[\w<>\[\],.?]+\s+(?P<name>[A-Za-z_]\w*)\s*\(",
    ])
});

static C_FAMILY: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^\s*(?:typedef\s+)?(?:struct|class|union|enum(?:\s+class)?|namespace)\s+(?P<name>[A-Za-z_]\w*)",
        r"^[A-Za-z_][\w\s\*&:<>,]*?\b(?P<name>[A-Za-z_]\w*)\s*\([^;]*$",
    ])
});

static RUBY: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^\s*def\s+(?P<name>[\w.?!=]+)",
        r"^\s*(?:class|module)\s+(?P<name>[A-Z][\w:]*)",
    ])
});

static PHP: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^\s*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+(?P<name>\w+)",
        r"^\s*(?:abstract\s+|final\s+)?(?:class|interface|trait|enum)\s+(?P<name>\w+)",
    ])
});

static JS_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:const|let|var)\s+[\w${}\s,]+=\s*require\(").expect("static require pattern")
});

const IMPORT_PREFIXES: &[&str] = &[
    "use ",
    "pub use ",
    "import ",
    "from ",
    "#include",
    "#import",
    "require ",
    "require(",
    "require_relative",
    "package ",
    "extern crate",
    "using ",
    "@import",
];

const COMMENT_PREFIXES: &[&str] = &["//", "#", "/*", "*", "--", ";"];

/// Boundary patterns for a path, or `None` when the extension is unknown.
fn patterns_for(path: &str) -> Option<&'static [Regex]> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    let table: &'static Lazy<Vec<Regex>> = match ext.as_str() {
        "rs" => &RUST,
        "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts" => &JS,
        "py" | "pyi" => &PYTHON,
        "go" => &GO,
        "java" | "kt" | "kts" | "scala" | "cs" | "swift" | "groovy" => &JVM,
        "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" | "m" | "mm" => &C_FAMILY,
        "rb" | "rake" => &RUBY,
        "php" => &PHP,
        _ => return None,
    };
    Some(table.as_slice())
}

/// `Some(name)` if `line` opens a declaration; the inner option is the
/// captured symbol name.
fn match_boundary(patterns: &[Regex], line: &str) -> Option<Option<String>> {
    patterns.iter().find_map(|re| {
        re.captures(line)
            .map(|caps| caps.name("name").map(|m| m.as_str().to_string()))
    })
}

/// Split `text` into `(symbol, body)` units along declaration boundaries.
///
/// Bodies are contiguous slices that concatenate back to `text`. A run of
/// doc comments, attributes or decorators directly above a declaration
/// belongs to that declaration's unit. A pending block is only flushed once
/// it holds other non-blank lines, so leading blank lines and a file's
/// opening doc comment travel with the next declaration.
pub(super) fn split_units<'a>(path: &str, text: &'a str) -> Vec<(Option<String>, &'a str)> {
    let Some(patterns) = patterns_for(path) else {
        return vec![(None, text)];
    };

    let mut units = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    let mut symbol: Option<String> = None;
    let mut has_content = false;
    // Start of the decoration run immediately above the current line.
    let mut lead: Option<usize> = None;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(name) = match_boundary(patterns, line) {
            let split = lead.unwrap_or(offset);
            if has_content {
                units.push((symbol.take(), &text[start..split]));
                start = split;
            }
            symbol = name;
            has_content = true;
            lead = None;
        } else if is_decoration(trimmed) {
            lead.get_or_insert(offset);
        } else if trimmed.is_empty() {
            // A blank line detaches the run from whatever follows.
            if lead.take().is_some() {
                has_content = true;
            }
        } else {
            has_content = true;
            lead = None;
        }
        offset += line.len();
    }

    if start < text.len() {
        units.push((symbol, &text[start..]));
    }
    units
}

/// Comment, attribute or decorator line that can sit above a declaration.
fn is_decoration(line: &str) -> bool {
    if line.is_empty() || is_import(line) {
        return false;
    }
    if line.starts_with('@') {
        return true;
    }
    // `#[attr]` and `# comment`, but not `#define` or `#ifdef`.
    if let Some(rest) = line.strip_prefix('#') {
        return !rest.starts_with(|c: char| c.is_ascii_alphabetic());
    }
    is_comment(line)
}

fn is_import(line: &str) -> bool {
    IMPORT_PREFIXES.iter().any(|p| line.starts_with(p)) || JS_REQUIRE.is_match(line)
}

fn is_comment(line: &str) -> bool {
    COMMENT_PREFIXES.iter().any(|p| line.starts_with(p))
}

fn depth_delta(line: &str) -> i32 {
    line.chars().fold(0, |d, c| match c {
        '{' | '(' => d + 1,
        '}' | ')' => d - 1,
        _ => d,
    })
}

/// The leading import block of a file, from the first import line through
/// the last one, with a trailing newline. Empty when the file opens with
/// code.
pub(super) fn import_block(text: &str) -> String {
    let mut block_start: Option<usize> = None;
    let mut block_end = 0;
    let mut offset = 0;
    let mut depth = 0i32;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let line_end = offset + line.len();

        if depth > 0 {
            depth += depth_delta(trimmed);
            block_end = line_end;
        } else if is_import(trimmed) {
            block_start.get_or_insert(offset);
            depth = depth_delta(trimmed).max(0);
            block_end = line_end;
        } else if !(trimmed.is_empty() || is_comment(trimmed)) {
            break;
        }
        offset = line_end;
    }

    match block_start {
        Some(start) => {
            let mut block = text[start..block_end].to_string();
            if !block.ends_with('\n') {
                block.push('\n');
            }
            block
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(path: &str, text: &str) -> Vec<Option<String>> {
        split_units(path, text).into_iter().map(|(s, _)| s).collect()
    }

    #[test]
    fn test_rust_boundaries() {
        let text = "//! crate docs\nuse x;\n\npub struct A;\n\nimpl<T: Clone> Trait for A {}\n\npub(crate) async fn run() {}\nmacro_rules! m { () => {} }\n";
        assert_eq!(
            symbols("lib.rs", text),
            vec![
                None,
                Some("A".into()),
                Some("Trait".into()),
                Some("run".into()),
                Some("m".into())
            ]
        );
    }

    #[test]
    fn test_type_prefix_needs_keyword() {
        let text = "fn a() {\n    type_of(x);\n}\n";
        assert_eq!(symbols("a.rs", text), vec![Some("a".into())]);
    }

    #[test]
    fn test_typescript_arrow_and_class() {
        let text = "import { a } from 'a';\n\nexport const handler = async (req: Req) => {\n};\n\nexport class Router {\n}\n";
        assert_eq!(
            symbols("src/app.ts", text),
            vec![None, Some("handler".into()), Some("Router".into())]
        );
    }

    #[test]
    fn test_go_method_receiver() {
        let text = "package x\n\nfunc (s *Server) Start() error {\n}\n\ntype Server struct{}\n";
        assert_eq!(
            symbols("x.go", text),
            vec![None, Some("Start".into()), Some("Server".into())]
        );
    }

    #[test]
    fn test_python_and_java() {
        assert_eq!(
            symbols("m.py", "class A:\n    def run(self):\n        pass\n"),
            vec![Some("A".into()), Some("run".into())]
        );
        assert_eq!(
            symbols(
                "A.java",
                "public class A {\n    public static void main(String[] args) {\n    }\n}\n"
            ),
            vec![Some("A".into()), Some("main".into())]
        );
    }

    #[test]
    fn test_leading_blank_lines_carry_forward() {
        let text = "\n\nfn a() {}\n";
        let units = split_units("a.rs", text);
        assert_eq!(units, vec![(Some("a".to_string()), text)]);
    }

    #[test]
    fn test_doc_comments_and_attributes_stay_with_declaration() {
        let text = "use x;\n\n/// Alpha docs.\n#[inline]\nfn alpha() {}\n\n// stray note\n\n#[derive(Debug)]\nstruct Beta;\n";
        let units = split_units("lib.rs", text);
        assert_eq!(
            units,
            vec![
                (None, "use x;\n\n"),
                (Some("alpha".to_string()), "/// Alpha docs.\n#[inline]\nfn alpha() {}\n\n// stray note\n\n"),
                (Some("Beta".to_string()), "#[derive(Debug)]\nstruct Beta;\n"),
            ]
        );
    }

    #[test]
    fn test_python_decorator_stays_with_def() {
        let text = "import os\n\n@app.route('/')\ndef index():\n    pass\n";
        let units = split_units("app.py", text);
        assert_eq!(units[1], (Some("index".to_string()), "@app.route('/')\ndef index():\n    pass\n"));
    }

    #[test]
    fn test_preprocessor_lines_are_not_decorations() {
        let text = "#define N 4\nint main(void) {\n}\n";
        assert_eq!(symbols("m.c", text), vec![None, Some("main".into())]);
    }

    #[test]
    fn test_unknown_extension_one_unit() {
        let text = "fn looks_like_rust() {}\nfn again() {}\n";
        assert_eq!(split_units("Makefile", text), vec![(None, text)]);
    }

    #[test]
    fn test_import_block_multiline() {
        let text = "#!/usr/bin/env python\n# comment\nimport os\nfrom x import (\n    a,\n    b,\n)\n\nprint(1)\n";
        assert_eq!(import_block(text), "import os\nfrom x import (\n    a,\n    b,\n)\n");
    }

    #[test]
    fn test_import_block_stops_at_code() {
        assert_eq!(import_block("fn main() {}\nuse late;\n"), "");
        assert_eq!(
            import_block("const fs = require('fs');\n\nfunction a() {}\n"),
            "const fs = require('fs');\n"
        );
        assert_eq!(import_block("#include <stdio.h>"), "#include <stdio.h>\n");
    }
}
