use std::collections::BTreeMap;

pub(crate) static EMPTY_EXPAND: ExpandTree = ExpandTree {
    children: BTreeMap::new(),
};

/// Parsed `X-Expand` header: comma separated, dot delimited field paths.
///
/// `"owner,items.tags"` expands `owner` and `items`, and `tags` within each
/// item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandTree {
    children: BTreeMap<String, ExpandTree>,
}

impl ExpandTree {
    pub fn parse(header: &str) -> Self {
        let mut tree = ExpandTree::default();
        for path in header.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut node = &mut tree;
            for part in path.split('.').map(str::trim).filter(|p| !p.is_empty()) {
                node = node.children.entry(part.to_string()).or_default();
            }
        }
        tree
    }

    pub fn contains(&self, field: &str) -> bool {
        self.children.contains_key(field)
    }

    pub fn child(&self, field: &str) -> &ExpandTree {
        self.children.get(field).unwrap_or(&EMPTY_EXPAND)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Canonical form, used in memo keys.
    pub fn key(&self) -> String {
        let mut out = String::new();
        self.write_key(&mut out);
        out
    }

    fn write_key(&self, out: &mut String) {
        for (i, (name, child)) in self.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(name);
            if !child.is_empty() {
                out.push('(');
                child.write_key(out);
                out.push(')');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_paths() {
        let tree = ExpandTree::parse("owner, items.tags,items.owner");
        assert!(tree.contains("owner"));
        assert!(tree.contains("items"));
        assert!(tree.child("items").contains("tags"));
        assert!(tree.child("items").contains("owner"));
        assert!(!tree.child("owner").contains("tags"));
        assert_eq!(tree.key(), "items(owner,tags),owner");
    }

    #[test]
    fn empty_header_expands_nothing() {
        let tree = ExpandTree::parse("");
        assert!(tree.is_empty());
        assert!(tree.child("anything").is_empty());
    }
}
