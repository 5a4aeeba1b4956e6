use axfix_core::issue::{DomDescriptor, Issue};
use axfix_core::round::FixGroup;

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Accessibility conventions the linter and audit actually accept
const A11Y_RULES: &str = r#"ACCESSIBILITY RULES:
- Form controls: label them with a wrapping <label>Text <input /></label> or an aria-label attribute.
  Do not use the htmlFor/id pairing; the linter does not recognise it.
- Alt text describes what the image conveys. Never use the words "image", "photo", or "picture";
  screen readers already announce the element type. Use alt="" only for purely decorative images.
- Prefer native interactive elements (button, a with href) over div/span with click handlers."#;

const EDIT_RULES: &str = r#"EDIT RULES:
- Change only what the listed issues require. Never invent new issues or touch unrelated code.
- Preserve indentation, quotes, imports, exports, and the component's behaviour.
- Return the complete file. No placeholders, ellipses, or line numbers."#;

// ═══════════════════════════════════════════════════════════════════════════════
// PROMPTS
// ═══════════════════════════════════════════════════════════════════════════════

pub const FIX_SYSTEM: &str = r#"You are a senior front-end engineer specialising in WCAG accessibility for React components.

You receive a component file and one or more accessibility issues found in it. Fix every listed issue with the smallest correct change.

If you are not sure how to fix an issue correctly, reply with "Sorry, I am unable to confidently address this issue." followed by the reason, and do not return a file.

OUTPUT FORMAT:
<response>
<explanation>One or two sentences on what you changed and why.</explanation>
<file>
...the complete corrected file...
</file>
</response>"#;

pub fn fix_system() -> String {
    format!("{}\n\n{}\n\n{}", FIX_SYSTEM, A11Y_RULES, EDIT_RULES)
}

pub fn fix_user(group: &FixGroup, content: &str) -> String {
    let scope = if group.needs_whole_file() {
        "Some issues were found in the rendered page and could not be tied to source lines. \
         Use the element descriptions to find the right place anywhere in the file."
            .to_string()
    } else {
        match group.span() {
            Some(span) => format!("The issues are on line(s) {} of the file.", span),
            None => String::new(),
        }
    };

    format!(
        "<input>\n<file>\n{}\n</file>\n<issues>\n{}\n</issues>\n</input>\n\n{}",
        content.trim_end(),
        group.describe(),
        scope
    )
    .trim_end()
    .to_string()
}

pub const GROUPING_SYSTEM: &str = r#"You group accessibility issues in a React component so that related issues are fixed together.

Put issues in the same group when they:
1. affect the same element, even across lines (a label and its input)
2. are semantically related
3. could conflict if fixed separately

Every issue number must appear in exactly one group.

Return ONLY a JSON array of arrays of issue numbers, e.g. [[1, 2], [3], [4, 5]]."#;

pub fn grouping_user(issues: &[Issue], content: &str) -> String {
    let numbered = issues
        .iter()
        .enumerate()
        .map(|(i, issue)| format!("{}. {}", i + 1, issue.describe()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<file>\n{}\n</file>\n\n<issues>\n{}\n</issues>",
        content.trim_end(),
        numbered
    )
}

pub const LINE_SYSTEM: &str = r#"You locate where a rendered HTML element is written in a React component's source.

You receive the numbered source lines and a description of the rendered element (CSS selector, HTML snippet, accessible label).

Return ONLY a JSON object with the 1-based line range of the element's opening tag:
{"start": <first line>, "end": <last line>}"#;

pub fn line_user(dom: &DomDescriptor, content: &str) -> String {
    let numbered = content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:>4} | {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n");

    let mut element = format!("selector: {}", dom.selector);
    if let Some(tag) = dom.element_tag() {
        element.push_str(&format!("\ntag: {}", tag));
    }
    if let Some(snippet) = &dom.snippet {
        element.push_str(&format!("\nhtml: {}", snippet.trim()));
    }
    if let Some(label) = &dom.label {
        element.push_str(&format!("\nlabel: {}", label.trim()));
    }
    if let Some(role) = &dom.role {
        element.push_str(&format!("\nrole: {}", role));
    }

    format!("<source>\n{}\n</source>\n\n<element>\n{}\n</element>", numbered, element)
}
