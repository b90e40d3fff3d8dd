//! Data-flow order of a bin's children.

use crate::element::Element;
use daggy::petgraph::algo::toposort;
use daggy::petgraph::Direction;
use daggy::{Dag, NodeIndex};
use tracing::warn;

/// Children of `bin` linked by their pads, as a DAG with an edge from
/// every upstream child to each downstream child it feeds.
pub(crate) struct LinkGraph {
    dag: Dag<usize, ()>,
    nodes: Vec<NodeIndex>,
}

/// The child of `bin` that contains `element`, directly or through nested
/// bins.
fn child_index(bin: &Element, children: &[Element], element: Element) -> Option<usize> {
    let mut current = element;
    loop {
        let parent = current.parent()?;
        if &parent == bin {
            return children.iter().position(|c| *c == current);
        }
        current = parent;
    }
}

impl LinkGraph {
    /// Build the graph from the current pad links.
    ///
    /// A link that would close a cycle is ignored.
    pub(crate) fn build(bin: &Element, children: &[Element]) -> Self {
        let mut dag = Dag::new();
        let nodes: Vec<NodeIndex> = (0..children.len()).map(|i| dag.add_node(i)).collect();

        for (from, child) in children.iter().enumerate() {
            for pad in child.src_pads() {
                let Some(peer) = pad.peer() else { continue };
                let Some(downstream) = peer.parent() else { continue };
                let Some(to) = child_index(bin, children, downstream) else {
                    continue;
                };
                if to == from {
                    continue;
                }
                if dag.update_edge(nodes[from], nodes[to], ()).is_err() {
                    warn!(
                        bin = %bin.name(),
                        from = %child.name(),
                        to = %children[to].name(),
                        "link closes a cycle, ignored for ordering"
                    );
                }
            }
        }
        Self { dag, nodes }
    }

    /// Child indices with every upstream child before its downstream ones.
    pub(crate) fn upstream_first(&self) -> Vec<usize> {
        match toposort(self.dag.graph(), None) {
            Ok(order) => order.into_iter().map(|n| self.dag[n]).collect(),
            Err(_) => (0..self.nodes.len()).collect(),
        }
    }

    /// Children that feed no other child of the bin.
    pub(crate) fn terminal(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|&&n| {
                self.dag
                    .graph()
                    .neighbors_directed(n, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|&n| self.dag[n])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{FakeSink, FakeSrc, Identity};
    use crate::pipeline::Bin;

    #[test]
    fn test_upstream_first_regardless_of_add_order() {
        let bin = Bin::new("bin");
        let sink = FakeSink::new().build("sink");
        let id = Identity::new().build("id");
        let src = FakeSrc::new().build("src");
        bin.add_many(&[&sink, &id, &src]).unwrap();
        Element::link_many(&[&src, &id, &sink]).unwrap();

        let children = bin.children();
        let graph = LinkGraph::build(&bin, &children);
        let names: Vec<&str> = graph
            .upstream_first()
            .into_iter()
            .map(|i| children[i].name())
            .collect();
        assert_eq!(names, ["src", "id", "sink"]);

        let terminal: Vec<&str> = graph.terminal().into_iter().map(|i| children[i].name()).collect();
        assert_eq!(terminal, ["sink"]);
    }
}
