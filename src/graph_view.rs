use crate::knowledge_graph::{EdgeType, KnowledgeGraph, NodeType};
use anyhow::{Context, Result};
use log::info;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

const VIS_NETWORK_URL: &str = "https://unpkg.com/vis-network@9.1.9/standalone/umd/vis-network.min.js";

/// Visual style of one node type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeStyle {
    pub color: &'static str,
    pub border_color: &'static str,
    pub shape: &'static str,
    pub size: usize,
    pub font_color: &'static str,
    pub border_width: u32,
}

pub fn node_style(node_type: NodeType) -> NodeStyle {
    match node_type {
        NodeType::Document => NodeStyle {
            color: "#4A90D9",
            border_color: "#2E5A8C",
            shape: "dot",
            size: 40,
            font_color: "#FFFFFF",
            border_width: 3,
        },
        NodeType::Keyword => NodeStyle {
            color: "#E74C3C",
            border_color: "#A93226",
            shape: "diamond",
            size: 22,
            font_color: "#333333",
            border_width: 2,
        },
        NodeType::Method => NodeStyle {
            color: "#27AE60",
            border_color: "#1E8449",
            shape: "triangle",
            size: 24,
            font_color: "#333333",
            border_width: 2,
        },
        NodeType::Dataset => NodeStyle {
            color: "#F39C12",
            border_color: "#B7950B",
            shape: "square",
            size: 20,
            font_color: "#333333",
            border_width: 2,
        },
        NodeType::Field => NodeStyle {
            color: "#9B59B6",
            border_color: "#7D3C98",
            shape: "star",
            size: 26,
            font_color: "#333333",
            border_width: 2,
        },
        NodeType::Application => NodeStyle {
            color: "#1ABC9C",
            border_color: "#16A085",
            shape: "hexagon",
            size: 22,
            font_color: "#333333",
            border_width: 2,
        },
    }
}

/// Edges take the colour of the entity type they point to
pub fn edge_color(edge_type: EdgeType) -> &'static str {
    match edge_type {
        EdgeType::ContainsKeyword => node_style(NodeType::Keyword).color,
        EdgeType::UsesMethod => node_style(NodeType::Method).color,
        EdgeType::UsesDataset => node_style(NodeType::Dataset).color,
        EdgeType::BelongsToField => node_style(NodeType::Field).color,
        EdgeType::HasApplication => node_style(NodeType::Application).color,
    }
}

/// Displayed size grows with degree, by at most 15
pub fn node_size(node_type: NodeType, degree: usize) -> usize {
    node_style(node_type).size + (degree * 2).min(15)
}

fn vis_nodes(graph: &KnowledgeGraph) -> Vec<Value> {
    graph
        .nodes()
        .iter()
        .map(|node| {
            let style = node_style(node.node_type);
            let title = if node.supports.is_empty() {
                node.title.clone()
            } else {
                format!("{}\nSupported by: {}", node.title, node.supports.join(", "))
            };
            json!({
                "id": node.id,
                "label": node.label,
                "title": title,
                "group": node.node_type.as_str(),
                "shape": style.shape,
                "size": node_size(node.node_type, graph.degree(&node.id)),
                "color": { "background": style.color, "border": style.border_color },
                "font": { "color": style.font_color },
                "borderWidth": style.border_width,
                "borderWidthSelected": style.border_width + 2,
            })
        })
        .collect()
}

fn vis_edges(graph: &KnowledgeGraph) -> Vec<Value> {
    graph
        .edges()
        .iter()
        .map(|edge| {
            json!({
                "from": edge.source,
                "to": edge.target,
                "color": edge_color(edge.edge_type),
                "width": edge.weight,
                "title": edge.edge_type.label(),
            })
        })
        .collect()
}

fn network_options() -> Value {
    json!({
        "physics": {
            "enabled": true,
            "barnesHut": {
                "gravitationalConstant": -6000,
                "centralGravity": 0.25,
                "springLength": 100,
                "springConstant": 0.03,
                "damping": 0.12
            },
            "stabilization": { "enabled": true, "iterations": 200 }
        },
        "interaction": {
            "hover": true,
            "tooltipDelay": 100,
            "hideEdgesOnDrag": true,
            "zoomSpeed": 0.3,
            "zoomView": true
        },
        "nodes": {
            "font": { "size": 13, "face": "Microsoft YaHei, Arial, sans-serif", "color": "#333333" }
        },
        "edges": {
            "smooth": { "type": "continuous" },
            "color": { "opacity": 0.7 },
            "width": 1.5
        }
    })
}

fn legend_html() -> String {
    [
        (NodeType::Document, "Document"),
        (NodeType::Keyword, "Keyword"),
        (NodeType::Method, "Method"),
        (NodeType::Field, "Field"),
        (NodeType::Dataset, "Dataset"),
        (NodeType::Application, "Application"),
    ]
    .iter()
    .map(|(node_type, label)| {
        format!(
            r#"<span class="legend-item"><span class="swatch" style="background:{}"></span>{} ({})</span>"#,
            node_style(*node_type).color,
            label,
            node_style(*node_type).shape
        )
    })
    .collect::<Vec<String>>()
    .join("\n      ")
}

/// JSON embedded in a script block must not close it early
fn script_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

/// Render the graph as a self-contained vis-network page
pub fn render_html(graph: &KnowledgeGraph, height: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Knowledge Graph</title>
  <script src="{script}"></script>
  <style>
    body {{ margin: 0; font-family: Arial, sans-serif; background: #f8f9fa; }}
    #graph {{ width: 100%; height: {height}; border-bottom: 1px solid #ddd; }}
    .legend {{ padding: 8px 12px; font-size: 13px; color: #333; }}
    .legend-item {{ margin-right: 16px; white-space: nowrap; }}
    .swatch {{ display: inline-block; width: 12px; height: 12px; margin-right: 4px; border-radius: 2px; vertical-align: middle; }}
  </style>
</head>
<body>
  <div id="graph"></div>
  <div class="legend">
      {legend}
  </div>
  <script>
    var nodes = new vis.DataSet({nodes});
    var edges = new vis.DataSet({edges});
    var container = document.getElementById("graph");
    var network = new vis.Network(container, {{ nodes: nodes, edges: edges }}, {options});
  </script>
</body>
</html>
"#,
        script = VIS_NETWORK_URL,
        height = height,
        legend = legend_html(),
        nodes = script_json(&Value::Array(vis_nodes(graph))),
        edges = script_json(&Value::Array(vis_edges(graph))),
        options = script_json(&network_options()),
    )
}

/// Write the graph page to `path`, creating parent directories
pub fn write_html<P: AsRef<Path>>(graph: &KnowledgeGraph, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    fs::write(path, render_html(graph, "600px"))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Knowledge graph page written to {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_extractor::{DocumentEntities, ExtractedEntities};
    use std::collections::BTreeMap;

    fn graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        let entities = ExtractedEntities {
            keywords: vec!["retrieval".into()],
            methods: vec!["</script>BERT".into()],
            ..Default::default()
        };
        let supports: BTreeMap<String, Vec<String>> = entities
            .iter()
            .map(|(_, e)| (e.to_string(), vec!["a.pdf#0".to_string()]))
            .collect();
        graph.add_document(&DocumentEntities {
            source_file: "a.pdf".to_string(),
            entities,
            supports,
        });
        graph
    }

    #[test]
    fn test_node_size_is_capped() {
        assert_eq!(node_size(NodeType::Document, 2), 44);
        assert_eq!(node_size(NodeType::Keyword, 100), 37);
        assert_eq!(node_size(NodeType::Field, 0), 26);
    }

    #[test]
    fn test_edge_colors_follow_entity_type() {
        assert_eq!(edge_color(EdgeType::UsesMethod), "#27AE60");
        assert_eq!(edge_color(EdgeType::HasApplication), "#1ABC9C");
    }

    #[test]
    fn test_vis_nodes_and_edges() {
        let graph = graph();
        let nodes = vis_nodes(&graph);
        let edges = vis_edges(&graph);

        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0]["shape"], "dot");
        assert_eq!(nodes[0]["size"], 44);
        assert_eq!(nodes[1]["color"]["background"], "#E74C3C");
        assert!(nodes[1]["title"].as_str().unwrap().contains("a.pdf#0"));
        assert_eq!(edges[1]["width"], 1.5);
        assert_eq!(edges[1]["title"], "Uses Method");
    }

    #[test]
    fn test_html_page_is_self_contained() {
        let html = render_html(&graph(), "600px");

        assert!(html.contains(r#"<meta charset="utf-8">"#));
        assert!(html.contains("vis-network"));
        assert!(html.contains("new vis.Network"));
        assert!(html.contains("Knowledge"));
        assert!(html.contains("Application (hexagon)"));
        // Entity text cannot terminate the script block
        assert_eq!(html.matches("</script>").count(), 2);
    }

    #[test]
    fn test_write_html_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphs").join("knowledge_graph.html");

        write_html(&graph(), &path).unwrap();

        assert!(fs::read_to_string(&path).unwrap().starts_with("<!DOCTYPE html>"));
    }
}
