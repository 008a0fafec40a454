//! Small accessors over KDL nodes.
//!
//! Blocks are written as `name { key value }`, so "entries" here are child
//! nodes whose first positional argument holds the value.

use kdl::{KdlNode, KdlValue};

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|n| n.name().value() == name)
}

/// First positional argument of a node, as a string
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    first_arg(node)?.as_string().map(|s| s.to_string())
}

/// String value of a named child
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    child(node, name).and_then(get_first_arg_string)
}

/// Integer value of a named child
pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    first_arg(child(node, name)?)?.as_integer()
}

/// Boolean value of a named child
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Option<bool> {
    first_arg(child(node, name)?)?.as_bool()
}

/// All integer arguments of a named child, e.g. `notification-days 30 14 7`
pub fn get_int_list_entry(node: &KdlNode, name: &str) -> Option<Vec<i128>> {
    let child = child(node, name)?;
    Some(
        child
            .entries()
            .iter()
            .filter(|e| e.name().is_none())
            .filter_map(|e| e.value().as_integer())
            .collect(),
    )
}

/// First argument of every child with the given name, e.g. repeated `webhook "..."`
pub fn get_repeated_string_entries(node: &KdlNode, name: &str) -> Vec<String> {
    node.children()
        .map(|doc| {
            doc.nodes()
                .iter()
                .filter(|n| n.name().value() == name)
                .filter_map(get_first_arg_string)
                .collect()
        })
        .unwrap_or_default()
}
