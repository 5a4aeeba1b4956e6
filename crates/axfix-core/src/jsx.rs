//! Tree-sitter view of JSX/TSX components
//!
//! Used for two things: finding the source elements a rendered DOM node could
//! have come from, and rejecting proposed fixes that no longer parse.

use crate::issue::LineRange;
use std::cell::RefCell;
use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════

thread_local! {
    static JSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });
}

/// Grammar a component file is parsed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `.js` / `.jsx`
    Jsx,
    /// `.ts` / `.tsx`
    Tsx,
}

impl Dialect {
    pub fn from_path(path: &Path) -> Self {
        let is_typescript = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("tsx") || ext.eq_ignore_ascii_case("ts"))
            .unwrap_or(false);
        if is_typescript {
            Dialect::Tsx
        } else {
            Dialect::Jsx
        }
    }
}

fn parse(content: &str, dialect: Dialect) -> anyhow::Result<Tree> {
    let parsed = match dialect {
        Dialect::Jsx => JSX_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Dialect::Tsx => TSX_PARSER.with(|p| p.borrow_mut().parse(content, None)),
    };
    parsed.ok_or_else(|| anyhow::anyhow!("Failed to parse component"))
}

/// Returns the 1-based line of the first syntax error, if any.
pub fn first_syntax_error(content: &str, dialect: Dialect) -> anyhow::Result<Option<usize>> {
    let tree = parse(content, dialect)?;
    let root = tree.root_node();
    if !root.has_error() {
        return Ok(None);
    }
    Ok(Some(find_error_line(&root).unwrap_or(1)))
}

fn find_error_line(node: &Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(line) = find_error_line(&child) {
                return Some(line);
            }
        }
    }
    None
}

/// A JSX element as written in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsxElement {
    /// Tag name as written (`img`, `Button`, `motion.div`)
    pub tag: String,
    /// Lines of the opening tag, where attributes live
    pub opening: LineRange,
    /// Lines of the whole element including children
    pub extent: LineRange,
    /// Opening tag source text
    pub opening_text: String,
    /// Whole element source text
    pub text: String,
}

impl JsxElement {
    /// Case-insensitive tag comparison against a DOM element name.
    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    /// Value of a string attribute in the opening tag (`id="x"` → `x`).
    pub fn attribute(&self, name: &str) -> Option<&str> {
        let needle = format!("{}=", name);
        let mut search = self.opening_text.as_str();
        while let Some(pos) = search.find(&needle) {
            let preceded_ok = search[..pos]
                .chars()
                .last()
                .map(|c| c.is_whitespace())
                .unwrap_or(false);
            let after = &search[pos + needle.len()..];
            if preceded_ok {
                let quote = after.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let rest = &after[1..];
                    let end = rest.find(quote)?;
                    return Some(&rest[..end]);
                }
            }
            search = after;
        }
        None
    }

    /// Visible text inside the element with tags and braces stripped.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        let mut depth = 0usize;
        let mut started = false;
        for c in self.text.chars() {
            match c {
                '<' => depth += 1,
                '>' if depth > 0 => {
                    depth -= 1;
                    started = true;
                }
                _ if depth == 0 && started => out.push(c),
                _ => {}
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Every named JSX element in document order. Fragments are skipped.
pub fn extract_elements(content: &str, dialect: Dialect) -> anyhow::Result<Vec<JsxElement>> {
    let tree = parse(content, dialect)?;
    let mut elements = Vec::new();
    collect_elements(&tree.root_node(), content, &mut elements);
    Ok(elements)
}

fn collect_elements(node: &Node, content: &str, out: &mut Vec<JsxElement>) {
    let opening = match node.kind() {
        "jsx_element" => node.child_by_field_name("open_tag"),
        "jsx_self_closing_element" => Some(*node),
        _ => None,
    };

    if let Some(opening) = opening {
        if let Some(name) = opening.child_by_field_name("name") {
            out.push(JsxElement {
                tag: node_text(&name, content).to_string(),
                opening: node_lines(&opening),
                extent: node_lines(node),
                opening_text: node_text(&opening, content).to_string(),
                text: node_text(node, content).to_string(),
            });
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_elements(&child, content, out);
    }
}

fn node_text<'c>(node: &Node, content: &'c str) -> &'c str {
    content.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

fn node_lines(node: &Node) -> LineRange {
    LineRange::new(node.start_position().row + 1, node.end_position().row + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = r#"const Card = () => {
  return (
    <div className="card">
      <img src="logo.png" />
      <img
        id="hero"
        src="hero.png"
      />
      <button onClick={go}>Go home</button>
    </div>
  );
};

export default Card;
"#;

    #[test]
    fn test_extracts_elements_in_document_order() {
        let elements = extract_elements(CARD, Dialect::Tsx).unwrap();
        let tags: Vec<_> = elements.iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["div", "img", "img", "button"]);

        assert_eq!(elements[1].opening, LineRange::single(4));
        assert_eq!(elements[2].opening, LineRange::new(5, 8));
        assert_eq!(elements[0].extent, LineRange::new(3, 10));
        assert_eq!(elements[0].opening, LineRange::single(3));
    }

    #[test]
    fn test_attribute_and_inner_text() {
        let elements = extract_elements(CARD, Dialect::Jsx).unwrap();
        assert_eq!(elements[2].attribute("id"), Some("hero"));
        assert_eq!(elements[1].attribute("src"), Some("logo.png"));
        assert_eq!(elements[1].attribute("id"), None);
        assert_eq!(elements[0].attribute("className"), Some("card"));
        assert_eq!(elements[3].inner_text(), "Go home");
    }

    #[test]
    fn test_syntax_check() {
        assert_eq!(first_syntax_error(CARD, Dialect::Tsx).unwrap(), None);
        let broken = CARD.replace("</div>", "");
        assert!(first_syntax_error(&broken, Dialect::Tsx).unwrap().is_some());
    }

    #[test]
    fn test_dialect_from_extension() {
        assert_eq!(Dialect::from_path(Path::new("a/Card.tsx")), Dialect::Tsx);
        assert_eq!(Dialect::from_path(Path::new("a/Card.jsx")), Dialect::Jsx);
        assert_eq!(Dialect::from_path(Path::new("a/Card")), Dialect::Jsx);
    }
}
