//! Graphviz rendering of a schematic.
//!
//! A pure function of the schematic; no machine state is read.

use super::model::{MachineValue, Schematic};
use std::fmt::Write;

/// Render `schematic` as a DOT digraph.
///
/// Transitions are solid edges labelled with their input (guarded edges
/// carry the connector key), parent links are dashed edges, and states with
/// an entry action list it in their label. Output is sorted, so the same
/// schematic always renders the same text.
pub fn to_dot<S: MachineValue, I: MachineValue>(schematic: &Schematic<S, I>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph {} {{", quote(&schematic.name));
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, style=rounded];");
    let _ = writeln!(out, "  __start [shape=point];");
    let _ = writeln!(
        out,
        "  __start -> {};",
        quote(&format!("{:?}", schematic.initial_state))
    );

    let mut nodes: Vec<String> = Vec::new();
    let mut edges: Vec<String> = Vec::new();

    for definition in schematic.states.values() {
        let id = quote(&format!("{:?}", definition.value));
        let mut label = format!("{:?}", definition.value);
        if let Some(description) = &definition.description {
            label.push_str(&format!("\\n{description}"));
        }
        if let Some(action) = &definition.entry_action {
            label.push_str(&format!("\\nentry: {}", action.connector_key));
        }
        nodes.push(format!("  {id} [label={}];", quote(&label)));

        if let Some(parent) = &definition.parent {
            edges.push(format!(
                "  {id} -> {} [style=dashed, arrowhead=empty];",
                quote(&format!("{parent:?}"))
            ));
        }

        for transition in definition.transitions.values() {
            let mut label = format!("{:?}", transition.input);
            if let Some(precondition) = &transition.precondition {
                label.push_str(&format!(" [{}]", precondition.connector_key));
            }
            edges.push(format!(
                "  {id} -> {} [label={}];",
                quote(&format!("{:?}", transition.resultant_state)),
                quote(&label)
            ));
        }
    }

    nodes.sort();
    edges.sort();
    for line in nodes.iter().chain(edges.iter()) {
        let _ = writeln!(out, "{line}");
    }
    out.push('}');
    out.push('\n');

    out
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\\\""))
}
