//! Test data builders for creating graphs

use rxvis_rs::pipeline::{ConnectLine, Element, ElementType, Graph};
use serde_json::Value;

/// Fluent graph builder. Connect lines get ids `l1`, `l2`, ... in the order
/// they are added.
pub struct GraphBuilder {
    graph: Graph,
    lines: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            lines: 0,
        }
    }

    pub fn element(mut self, element: Element) -> Self {
        self.graph.add_element(element);
        self
    }

    pub fn range(self, id: &str, start: i64, count: i64) -> Self {
        self.element(
            Element::new(id, ElementType::Range)
                .with_property("start", start)
                .with_property("count", count),
        )
    }

    pub fn of(self, id: &str, items: Vec<Value>) -> Self {
        self.element(Element::new(id, ElementType::Of).with_property("items", items))
    }

    pub fn interval(self, id: &str, period: i64, count: i64) -> Self {
        self.element(
            Element::new(id, ElementType::Interval)
                .with_property("period", period)
                .with_property("count", count),
        )
    }

    pub fn map(self, id: &str, project: &str) -> Self {
        self.element(Element::new(id, ElementType::Map).with_property("project", project))
    }

    pub fn filter(self, id: &str, predicate: &str) -> Self {
        self.element(Element::new(id, ElementType::Filter).with_property("predicate", predicate))
    }

    pub fn operator(self, id: &str, element_type: ElementType) -> Self {
        self.element(Element::new(id, element_type))
    }

    pub fn result(self, id: &str) -> Self {
        self.element(Element::new(id, ElementType::Result))
    }

    fn line_id(&mut self) -> String {
        self.lines += 1;
        format!("l{}", self.lines)
    }

    pub fn pipe(mut self, from: &str, to: &str) -> Self {
        let id = self.line_id();
        self.graph.add_connect_line(ConnectLine::pipe(id, from, to));
        self
    }

    /// Pipe into a join input at `index`.
    pub fn pipe_at(mut self, from: &str, to: &str, index: u32) -> Self {
        let id = self.line_id();
        self.graph
            .add_connect_line(ConnectLine::pipe(id, from, to).with_index(index));
        self
    }

    pub fn subscribe(mut self, from: &str, to: &str) -> Self {
        let id = self.line_id();
        self.graph.add_connect_line(ConnectLine::subscribe(id, from, to));
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `creation -> result` over one subscribe line.
pub fn linear(creation: Element) -> Graph {
    let id = creation.id.as_str().to_string();
    GraphBuilder::new()
        .element(creation)
        .result("result")
        .subscribe(&id, "result")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_builder() {
        let graph = GraphBuilder::new()
            .range("src", 1, 3)
            .result("res")
            .pipe("src", "res")
            .subscribe("src", "res")
            .build();

        assert_eq!(graph.element_count(), 2);
        let ids: Vec<&str> = graph.connect_lines().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "l2"]);
    }
}
