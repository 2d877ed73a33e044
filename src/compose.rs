//! Block inheritance.
//!
//! A template that extends another is compiled by collecting every block
//! definition along its ancestor chain into an override table, the most
//! derived definition winning, and then rebuilding the root ancestor's tree
//! with each block's body taken from that table.

use std::collections::HashMap;

use crate::{
    ast::{Branch, Node},
    error::CompositionError,
};

/// The parent named by a template's `extends` tag, if it has one.
pub(crate) fn extends_target(nodes: &[Node]) -> Option<&str> {
    nodes.iter().find_map(|node| {
        if let Node::Extends { parent, .. } = node {
            Some(parent.as_str())
        } else {
            None
        }
    })
}

type Overrides<'n> = HashMap<&'n str, &'n [Node]>;

/// Merges an inheritance chain given root ancestor first.
pub(crate) fn merge(chain: &[&[Node]]) -> Result<Vec<Node>, CompositionError> {
    let Some(root) = chain.first() else {
        return Ok(Vec::new());
    };

    let mut overrides = Overrides::new();
    for nodes in chain {
        collect_blocks(nodes, &mut overrides);
    }
    expand(root, &overrides, &mut Vec::new())
}

fn collect_blocks<'n>(nodes: &'n [Node], overrides: &mut Overrides<'n>) {
    for node in nodes {
        match node {
            Node::Block { name, body, .. } => {
                overrides.insert(name.as_str(), body.as_slice());
                collect_blocks(body, overrides);
            }
            Node::If {
                branches,
                else_body,
            } => {
                for branch in branches {
                    collect_blocks(&branch.body, overrides);
                }
                if let Some(else_body) = else_body {
                    collect_blocks(else_body, overrides);
                }
            }
            Node::For {
                body, else_body, ..
            } => {
                collect_blocks(body, overrides);
                if let Some(else_body) = else_body {
                    collect_blocks(else_body, overrides);
                }
            }
            Node::Text(_) | Node::Print { .. } | Node::Extends { .. } | Node::Include { .. } => {}
        }
    }
}

fn expand<'n>(
    nodes: &'n [Node],
    overrides: &Overrides<'n>,
    active: &mut Vec<&'n str>,
) -> Result<Vec<Node>, CompositionError> {
    nodes
        .iter()
        .map(|node| expand_node(node, overrides, active))
        .collect()
}

fn expand_optional<'n>(
    nodes: Option<&'n Vec<Node>>,
    overrides: &Overrides<'n>,
    active: &mut Vec<&'n str>,
) -> Result<Option<Vec<Node>>, CompositionError> {
    nodes
        .map(|nodes| expand(nodes, overrides, active))
        .transpose()
}

fn expand_node<'n>(
    node: &'n Node,
    overrides: &Overrides<'n>,
    active: &mut Vec<&'n str>,
) -> Result<Node, CompositionError> {
    let expanded = match node {
        Node::Block { name, body, span } => {
            if active.contains(&name.as_str()) {
                return Err(CompositionError::RecursiveBlock { name: name.clone() });
            }
            let winner = overrides.get(name.as_str()).copied().unwrap_or(body.as_slice());
            active.push(name.as_str());
            let body = expand(winner, overrides, active)?;
            active.pop();
            Node::Block {
                name: name.clone(),
                body,
                span: *span,
            }
        }
        Node::If {
            branches,
            else_body,
        } => Node::If {
            branches: branches
                .iter()
                .map(|branch| {
                    Ok(Branch {
                        condition: branch.condition.clone(),
                        body: expand(&branch.body, overrides, active)?,
                        span: branch.span,
                    })
                })
                .collect::<Result<_, CompositionError>>()?,
            else_body: expand_optional(else_body.as_ref(), overrides, active)?,
        },
        Node::For {
            targets,
            iterable,
            body,
            else_body,
            span,
        } => Node::For {
            targets: targets.clone(),
            iterable: iterable.clone(),
            body: expand(body, overrides, active)?,
            else_body: expand_optional(else_body.as_ref(), overrides, active)?,
            span: *span,
        },
        Node::Text(_) | Node::Print { .. } | Node::Extends { .. } | Node::Include { .. } => {
            node.clone()
        }
    };
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse;

    fn nodes(source: &str) -> Vec<Node> {
        parse("test", source, true).unwrap()
    }

    fn texts(nodes: &[Node]) -> String {
        let mut out = String::new();
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Block { name, body, .. } => {
                    out.push_str(&format!("[{name}:"));
                    out.push_str(&texts(body));
                    out.push(']');
                }
                _ => out.push('?'),
            }
        }
        out
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_extends_target() {
        assert_eq!(
            extends_target(&nodes("{% extends \"base\" %}{% block a %}{% endblock %}")),
            Some("base")
        );
        assert_eq!(extends_target(&nodes("plain")), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_most_derived_block_wins() {
        let base = nodes("<{% block head %}H{% endblock %}|{% block content %}C{% endblock %}>");
        let middle = nodes("{% extends \"base\" %}{% block content %}M{% endblock %}");
        let leaf = nodes("{% extends \"middle\" %}ignored{% block head %}L{% endblock %}");

        let merged = merge(&[base.as_slice(), middle.as_slice(), leaf.as_slice()]).unwrap();
        assert_eq!(texts(&merged), "<[head:L]|[content:M]>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_blocks_resolve_through_overrides() {
        let base = nodes("{% block outer %}({% block inner %}i{% endblock %}){% endblock %}");
        let child = nodes(
            "{% extends \"base\" %}{% block outer %}<{% block inner %}I{% endblock %}>{% endblock %}",
        );
        let merged = merge(&[base.as_slice(), child.as_slice()]).unwrap();
        assert_eq!(texts(&merged), "[outer:<[inner:I]>]");

        let grandchild = nodes("{% extends \"child\" %}{% block inner %}G{% endblock %}");
        let merged = merge(&[base.as_slice(), child.as_slice(), grandchild.as_slice()]).unwrap();
        assert_eq!(texts(&merged), "[outer:<[inner:G]>]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_blocks_inside_control_flow() {
        let base = nodes("{% if x %}{% block a %}1{% endblock %}{% endif %}");
        let child = nodes("{% extends \"base\" %}{% block a %}2{% endblock %}");
        let merged = merge(&[base.as_slice(), child.as_slice()]).unwrap();
        let Some(Node::If { branches, .. }) = merged.first() else {
            panic!("expected an if node, got {merged:?}");
        };
        assert_eq!(texts(&branches[0].body), "[a:2]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_single_template_is_its_own_root() {
        let page = nodes("a{% block b %}c{% endblock %}");
        assert_eq!(merge(&[page.as_slice()]).unwrap(), page);
    }
}
