//! Mermaid flowchart rendering of node shapes

use std::fmt::Write;

use crate::shape::NodeShape;

/// Render a shape tree as a Mermaid `flowchart TD` diagram
pub fn render_mermaid(shape: &NodeShape) -> String {
    let mut renderer = MermaidRenderer::default();
    renderer.out.push_str("flowchart TD\n");
    renderer.render(shape, 1);
    renderer.out
}

/// Entry and exit node ids of a rendered fragment
struct Fragment {
    entry: String,
    exits: Vec<String>,
}

#[derive(Default)]
struct MermaidRenderer {
    out: String,
    next_id: usize,
}

impl MermaidRenderer {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("n{}", self.next_id)
    }

    fn line(&mut self, depth: usize, text: &str) {
        // Writing to a String cannot fail.
        let _ = writeln!(self.out, "{}{}", "  ".repeat(depth), text);
    }

    fn connect(&mut self, depth: usize, from: &[String], to: &str, label: Option<&str>) {
        for source in from {
            let edge = match label {
                Some(label) => format!("{source} -- \"{}\" --> {to}", escape(label)),
                None => format!("{source} --> {to}"),
            };
            self.line(depth, &edge);
        }
    }

    fn single(&mut self, depth: usize, open: &str, label: &str, close: &str) -> Fragment {
        let id = self.fresh_id();
        self.line(depth, &format!("{id}{open}\"{}\"{close}", escape(label)));
        Fragment {
            entry: id.clone(),
            exits: vec![id],
        }
    }

    fn render(&mut self, shape: &NodeShape, depth: usize) -> Fragment {
        match shape {
            NodeShape::Leaf { label } => self.single(depth, "[", label, "]"),
            NodeShape::Sequence { steps } => {
                let id = self.fresh_id();
                self.line(depth, &format!("subgraph {id} [\"Sequence\"]"));
                self.line(depth + 1, "direction TB");
                let fragment = if steps.is_empty() {
                    self.single(depth + 1, "[", "identity", "]")
                } else {
                    let mut entry = None;
                    let mut exits: Vec<String> = Vec::new();
                    for step in steps {
                        let child = self.render(step, depth + 1);
                        self.connect(depth + 1, &exits, &child.entry, None);
                        entry.get_or_insert(child.entry);
                        exits = child.exits;
                    }
                    Fragment {
                        entry: entry.unwrap_or_default(),
                        exits,
                    }
                };
                self.line(depth, "end");
                fragment
            }
            NodeShape::Predicate { on_true, on_false } => {
                let decision = self.single(depth, "{", "Predicate", "}");
                let yes = self.render(on_true, depth);
                let no = self.render(on_false, depth);
                self.connect(depth, &decision.exits, &yes.entry, Some("true"));
                self.connect(depth, &decision.exits, &no.entry, Some("false"));
                Fragment {
                    entry: decision.entry,
                    exits: yes.exits.into_iter().chain(no.exits).collect(),
                }
            }
            NodeShape::Switch { cases, default } => {
                let decision = self.single(depth, "{", "Switch", "}");
                let mut exits = Vec::new();
                for (key, case) in cases {
                    let branch = self.render(case, depth);
                    self.connect(depth, &decision.exits, &branch.entry, Some(key.as_str()));
                    exits.extend(branch.exits);
                }
                let fallback = self.render(default, depth);
                self.connect(depth, &decision.exits, &fallback.entry, Some("default"));
                exits.extend(fallback.exits);
                Fragment {
                    entry: decision.entry,
                    exits,
                }
            }
            NodeShape::Fork { branch, parallel } => {
                let id = self.fresh_id();
                let title = if *parallel { "Fork (parallel)" } else { "Fork" };
                self.line(depth, &format!("subgraph {id} [\"{title}\"]"));
                self.line(depth + 1, "direction TB");
                let split = self.single(depth + 1, "((", "Split", "))");
                let body = self.render(branch, depth + 1);
                let reduce = self.single(depth + 1, "((", "Reduce", "))");
                self.connect(depth + 1, &split.exits, &body.entry, Some("each item"));
                self.connect(depth + 1, &body.exits, &reduce.entry, None);
                self.line(depth, "end");
                Fragment {
                    entry: split.entry,
                    exits: reduce.exits,
                }
            }
            NodeShape::Wrapper { label, inner } => {
                let head = self.single(depth, "[/", label, "/]");
                if inner.is_empty() {
                    return head;
                }
                let mut exits = Vec::new();
                for child in inner {
                    let child = self.render(child, depth);
                    self.connect(depth, &head.exits, &child.entry, None);
                    exits.extend(child.exits);
                }
                Fragment {
                    entry: head.entry,
                    exits,
                }
            }
        }
    }
}

fn escape(label: &str) -> String {
    label.replace('"', "#quot;")
}
